//! HPACK header-block encoding (RFC 7541 §6, §7.1.3's sensitivity guidance).

use super::{huffman, integer, static_table};
use crate::hpack::table::DynamicTable;
use crate::types::Headers;

/// Header names the encoder always emits as "literal, never indexed" regardless of the
/// dynamic-table policy, since their values are typically per-request secrets that must not
/// leak into a compressed representation an intermediary might cache or replay.
fn is_sensitive(lower_name: &str) -> bool {
    matches!(lower_name, "authorization" | "cookie" | "set-cookie")
}

/// Encodes header lists against a persistent dynamic table, choosing the shortest
/// representation available (indexed > literal-indexed-name > literal-literal-name) and
/// Huffman-coding any literal string whose Huffman encoding is shorter.
pub struct Encoder {
    dynamic_table: DynamicTable,
    pending_size_update: Option<usize>,
}

impl Encoder {
    pub fn new(max_dynamic_table_size: usize) -> Self {
        Self {
            dynamic_table: DynamicTable::new(max_dynamic_table_size),
            pending_size_update: None,
        }
    }

    /// Queues a `Dynamic Table Size Update` instruction to be emitted at the start of the next
    /// [`Encoder::encode`] call, applying the new bound to the table at the same time.
    pub fn set_dynamic_table_size(&mut self, new_size: usize) {
        self.pending_size_update = Some(new_size);
    }

    pub fn dynamic_table_used(&self) -> usize {
        self.dynamic_table.used()
    }

    /// Encodes `headers` into a single header block fragment.
    pub fn encode(&mut self, headers: &Headers) -> Vec<u8> {
        let mut out = Vec::new();

        if let Some(size) = self.pending_size_update.take() {
            self.dynamic_table.set_max_size(size);
            integer::encode(&mut out, 5, 0x20, size);
        }

        for (name, value) in headers {
            self.encode_header(&mut out, name, value);
        }

        out
    }

    fn encode_header(&mut self, out: &mut Vec<u8>, name: &str, value: &str) {
        let name = name.to_ascii_lowercase();

        if let Some(index) = self.find_name_value(&name, value) {
            integer::encode(out, 7, 0x80, index);
            return;
        }

        let name_index = self.find_name(&name);
        if is_sensitive(&name) {
            encode_literal(out, 4, 0x10, name_index, &name, value);
        } else {
            encode_literal(out, 6, 0x40, name_index, &name, value);
            self.dynamic_table.insert(name, value.to_string());
        }
    }

    fn find_name_value(&self, name: &str, value: &str) -> Option<usize> {
        static_table::find_name_value(name, value)
            .or_else(|| self.dynamic_table.find_name_value(name, value).map(shift))
    }

    fn find_name(&self, name: &str) -> Option<usize> {
        static_table::find_name(name).or_else(|| self.dynamic_table.find_name(name).map(shift))
    }
}

/// Dynamic-table indices follow the static table's 61 entries (RFC 7541 §2.3.3).
fn shift(dynamic_index: usize) -> usize {
    dynamic_index + static_table::STATIC_TABLE.len()
}

fn encode_literal(
    out: &mut Vec<u8>,
    prefix_bits: u8,
    high_bits: u8,
    name_index: Option<usize>,
    name: &str,
    value: &str,
) {
    match name_index {
        Some(index) => integer::encode(out, prefix_bits, high_bits, index),
        None => {
            integer::encode(out, prefix_bits, high_bits, 0);
            encode_string(out, name);
        }
    }
    encode_string(out, value);
}

/// Encodes a header string, choosing Huffman whenever it is at least one octet shorter than the
/// literal representation (RFC 7541 §5.2's "SHOULD" made concrete).
fn encode_string(out: &mut Vec<u8>, s: &str) {
    let bytes = super::latin1_string_to_bytes(s);
    let huffman_len = huffman::encoded_len(&bytes);

    if huffman_len < bytes.len() {
        integer::encode(out, 7, 0x80, huffman_len);
        out.extend(huffman::encode(&bytes));
    } else {
        integer::encode(out, 7, 0, bytes.len());
        out.extend_from_slice(&bytes);
    }
}
