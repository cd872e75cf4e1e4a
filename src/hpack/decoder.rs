//! HPACK header-block decoding (RFC 7541 §6).

use super::{huffman, integer, static_table};
use crate::error::Http2Error;
use crate::hpack::table::DynamicTable;
use crate::types::Headers;

/// Per-header overhead applied when checking a decoded list against
/// `max_decoded_header_bytes`, mirroring the size model HPACK itself uses for table entries
/// (RFC 7541 §4.1) so one guard covers both the dynamic table and the decompression-bomb check.
const HEADER_OVERHEAD: usize = 32;

/// Decodes header blocks against a persistent dynamic table.
///
/// `max_decoded_header_bytes` bounds the total `name.len() + value.len() + 32` across a single
/// `decode` call, guarding against a compression bomb that expands a tiny block into an
/// unbounded header list.
pub struct Decoder {
    dynamic_table: DynamicTable,
    max_allowed_dynamic_table_size: usize,
    max_decoded_header_bytes: usize,
}

impl Decoder {
    pub fn new(
        initial_dynamic_table_size: usize,
        max_allowed_dynamic_table_size: usize,
        max_decoded_header_bytes: usize,
    ) -> Self {
        Self {
            dynamic_table: DynamicTable::new(initial_dynamic_table_size),
            max_allowed_dynamic_table_size,
            max_decoded_header_bytes,
        }
    }

    pub fn dynamic_table_used(&self) -> usize {
        self.dynamic_table.used()
    }

    /// Decodes one complete header block fragment (already reassembled across any
    /// HEADERS/CONTINUATION boundary by the caller) into an ordered header list.
    pub fn decode(&mut self, block: &[u8]) -> Result<Headers, Http2Error> {
        let mut headers = Headers::new();
        let mut pos = 0;
        let mut decoded_bytes = 0usize;
        let mut seen_header_field = false;

        while pos < block.len() {
            let byte = block[pos];

            if byte & 0x80 != 0 {
                let (index, consumed) = integer::decode(&block[pos..], 7)?;
                pos += consumed;
                if index == 0 {
                    return Err(Http2Error::InvalidTableIndex(0));
                }
                let (name, value) = self.resolve_index(index)?;
                push_header(&mut headers, &mut decoded_bytes, name, value, self.max_decoded_header_bytes)?;
                seen_header_field = true;
            } else if byte & 0x40 != 0 {
                let (name, value, consumed) = self.decode_literal(&block[pos..], 6)?;
                pos += consumed;
                push_header(
                    &mut headers,
                    &mut decoded_bytes,
                    name.clone(),
                    value.clone(),
                    self.max_decoded_header_bytes,
                )?;
                self.dynamic_table.insert(name, value);
                seen_header_field = true;
            } else if byte & 0x20 != 0 {
                if seen_header_field {
                    return Err(Http2Error::SizeUpdateOutOfOrder);
                }
                let (size, consumed) = integer::decode(&block[pos..], 5)?;
                pos += consumed;
                if size > self.max_allowed_dynamic_table_size {
                    return Err(Http2Error::SizeUpdateTooLarge);
                }
                self.dynamic_table.set_max_size(size);
            } else if byte & 0x10 != 0 {
                let (name, value, consumed) = self.decode_literal(&block[pos..], 4)?;
                pos += consumed;
                push_header(&mut headers, &mut decoded_bytes, name, value, self.max_decoded_header_bytes)?;
                seen_header_field = true;
            } else {
                let (name, value, consumed) = self.decode_literal(&block[pos..], 4)?;
                pos += consumed;
                push_header(&mut headers, &mut decoded_bytes, name, value, self.max_decoded_header_bytes)?;
                seen_header_field = true;
            }
        }

        Ok(headers)
    }

    fn resolve_index(&self, index: usize) -> Result<(String, String), Http2Error> {
        let static_len = static_table::STATIC_TABLE.len();
        if index <= static_len {
            let (name, value) = static_table::get(index).ok_or(Http2Error::InvalidTableIndex(index))?;
            Ok((name.to_string(), value.to_string()))
        } else {
            let (name, value) = self
                .dynamic_table
                .get(index - static_len)
                .ok_or(Http2Error::InvalidTableIndex(index))?;
            Ok((name.to_string(), value.to_string()))
        }
    }

    /// Decodes a literal representation's name and value starting at `input[0]`, where
    /// `input[0]`'s low `prefix_bits` bits hold the name-index integer (0 meaning "name follows
    /// as a literal string"). Returns `(name, value, bytes_consumed)`.
    fn decode_literal(
        &self,
        input: &[u8],
        prefix_bits: u8,
    ) -> Result<(String, String, usize), Http2Error> {
        let (name_index, mut pos) = integer::decode(input, prefix_bits)?;

        let name = if name_index == 0 {
            let (name, consumed) = decode_string(&input[pos..])?;
            pos += consumed;
            name
        } else {
            self.resolve_index(name_index)?.0
        };

        let (value, consumed) = decode_string(&input[pos..])?;
        pos += consumed;

        Ok((name, value, pos))
    }
}

fn push_header(
    headers: &mut Headers,
    decoded_bytes: &mut usize,
    name: String,
    value: String,
    max_decoded_header_bytes: usize,
) -> Result<(), Http2Error> {
    *decoded_bytes += name.len() + value.len() + HEADER_OVERHEAD;
    if *decoded_bytes > max_decoded_header_bytes {
        return Err(Http2Error::HeaderListTooLarge);
    }
    headers.push((name, value));
    Ok(())
}

/// Decodes a length-prefixed, optionally Huffman-coded string starting at `input[0]`. Decoded
/// bytes are opaque octets, reinterpreted 1:1 as Latin-1 code points rather than assumed UTF-8,
/// since HPACK string data carries arbitrary octets (RFC 7541 §5.2).
fn decode_string(input: &[u8]) -> Result<(String, usize), Http2Error> {
    if input.is_empty() {
        return Err(Http2Error::Truncated);
    }
    let is_huffman = input[0] & 0x80 != 0;
    let (len, consumed) = integer::decode(input, 7)?;

    let end = consumed
        .checked_add(len)
        .ok_or(Http2Error::Truncated)?;
    if end > input.len() {
        return Err(Http2Error::Truncated);
    }
    let raw = &input[consumed..end];

    let bytes = if is_huffman {
        huffman::decode(raw)?
    } else {
        raw.to_vec()
    };

    Ok((super::bytes_to_latin1_string(&bytes), end))
}
