//! HTTP/2 frame types and the frame codec (§4.1).
//!
//! A [`Frame`] is the typed wire record described by RFC 7540 §4.1: a 9-byte header (24-bit
//! length, 8-bit type, 8-bit flags, 31-bit stream id) followed by exactly `length` payload
//! bytes. [`FrameReader`]/[`FrameWriter`] read and write these over a split transport half.

use crate::error::Http2Error;
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::{FromPrimitive, ToPrimitive};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// The fixed 24-byte client connection preface (RFC 7540 §3.5).
pub const PREFACE: &[u8; 24] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// <https://httpwg.org/specs/rfc7540.html#FrameTypes>
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, FromPrimitive, ToPrimitive)]
#[repr(u8)]
pub enum FrameType {
    Data = 0x0,
    Headers = 0x1,
    Priority = 0x2,
    ResetStream = 0x3,
    Settings = 0x4,
    PushPromise = 0x5,
    Ping = 0x6,
    GoAway = 0x7,
    WindowUpdate = 0x8,
    Continuation = 0x9,
}

/// <https://httpwg.org/specs/rfc7540.html#ErrorCodes>
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum ErrorType {
    NoError = 0x0,
    ProtocolError = 0x1,
    InternalError = 0x2,
    FlowControlError = 0x3,
    SettingsTimeout = 0x4,
    StreamClosed = 0x5,
    FrameSizeError = 0x6,
    RefusedStream = 0x7,
    Cancel = 0x8,
    CompressionError = 0x9,
    ConnectError = 0xa,
    EnhanceYourCalm = 0xb,
    InadequateSecurity = 0xc,
    Http11Required = 0xd,
}

impl ErrorType {
    /// Unknown codes round-trip as `InternalError`; the RFC permits treating unrecognized codes
    /// as equivalent to INTERNAL_ERROR.
    pub fn from_wire(value: u32) -> Self {
        ErrorType::from_u32(value).unwrap_or(ErrorType::InternalError)
    }
}

/// A decoded or to-be-encoded HTTP/2 frame. `length` is tracked separately from
/// `payload.len()` so [`FrameWriter::write_frame`] can emit a prefix of a larger buffer.
#[derive(Debug, Clone)]
pub struct Frame {
    pub typ: FrameType,
    pub flags: u8,
    pub stream_id: u32,
    pub length: u32,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(typ: FrameType, flags: u8, stream_id: u32, payload: Vec<u8>) -> Self {
        let length = payload.len() as u32;
        Self {
            typ,
            flags,
            stream_id,
            length,
            payload,
        }
    }

    /// Builds an RST_STREAM frame carrying `code` for `stream_id` (§4.7/§7: the client emits
    /// this whenever a stream-scoped error or cancellation fails just that stream).
    pub fn rst_stream(stream_id: u32, code: ErrorType) -> Self {
        Self::new(FrameType::ResetStream, 0, stream_id, (code.to_u32().unwrap_or(0)).to_be_bytes().to_vec())
    }
}

/// Reads frames off an owned half of a split transport. The connection multiplexer's reader
/// task is the sole owner of one of these (§4.7, §5).
pub struct FrameReader<R> {
    inner: R,
}

impl<R: AsyncReadExt + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Reads exactly 9 bytes, decodes the length, and fails with `FrameTooLarge` before
    /// consuming the payload if `length > max_frame_size`. Otherwise reads the payload in full.
    pub async fn read_frame(&mut self, max_frame_size: u32) -> Result<Frame, Http2Error> {
        let mut header = [0u8; 9];
        self.inner
            .read_exact(&mut header)
            .await
            .map_err(|e| Http2Error::Transport(e.to_string()))?;

        let length = u32::from_be_bytes([0, header[0], header[1], header[2]]);
        if length > max_frame_size {
            return Err(Http2Error::FrameTooLarge(length));
        }

        let typ = FrameType::from_u8(header[3]).ok_or(Http2Error::UnknownFrameType)?;
        let flags = header[4];
        let stream_id =
            u32::from_be_bytes([header[5], header[6], header[7], header[8]]) & (u32::MAX >> 1);

        let mut payload = vec![0u8; length as usize];
        self.inner
            .read_exact(&mut payload)
            .await
            .map_err(|e| Http2Error::Transport(e.to_string()))?;

        Ok(Frame {
            typ,
            flags,
            stream_id,
            length,
            payload,
        })
    }
}

/// Writes frames to an owned half of a split transport. The connection multiplexer's writer
/// task is the sole owner of one of these, so that exactly one task ever touches the write half
/// (§4.7, §5's ordering guarantees).
pub struct FrameWriter<W> {
    inner: W,
    preface_written: bool,
}

impl<W: AsyncWriteExt + Unpin> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            preface_written: false,
        }
    }

    pub async fn write_preface(&mut self) -> Result<(), Http2Error> {
        debug_assert!(!self.preface_written, "write_preface called twice");
        self.preface_written = true;
        self.inner
            .write_all(PREFACE)
            .await
            .map_err(|e| Http2Error::Transport(e.to_string()))?;
        self.inner
            .flush()
            .await
            .map_err(|e| Http2Error::Transport(e.to_string()))
    }

    pub async fn write_frame(&mut self, frame: &Frame, flush: bool) -> Result<(), Http2Error> {
        if frame.length as usize > frame.payload.len() {
            return Err(Http2Error::InvalidArgument(format!(
                "frame.length ({}) exceeds payload.len() ({})",
                frame.length,
                frame.payload.len()
            )));
        }

        let mut header = [0u8; 9];
        header[0..3].copy_from_slice(&frame.length.to_be_bytes()[1..]);
        header[3] = frame.typ.to_u8().expect("FrameType is repr(u8)");
        header[4] = frame.flags;
        header[5..9].copy_from_slice(&(frame.stream_id & (u32::MAX >> 1)).to_be_bytes());

        self.inner
            .write_all(&header)
            .await
            .map_err(|e| Http2Error::Transport(e.to_string()))?;
        self.inner
            .write_all(&frame.payload[..frame.length as usize])
            .await
            .map_err(|e| Http2Error::Transport(e.to_string()))?;

        if flush {
            self.inner
                .flush()
                .await
                .map_err(|e| Http2Error::Transport(e.to_string()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn round_trips_a_frame() {
        let (client, mut server) = duplex(4096);
        let mut writer = FrameWriter::new(client);

        let frame = Frame::new(FrameType::Ping, 0, 0, vec![1, 2, 3, 4, 5, 6, 7, 8]);
        writer.write_frame(&frame, true).await.unwrap();

        let mut header = [0u8; 9];
        AsyncReadExt::read_exact(&mut server, &mut header).await.unwrap();
        assert_eq!(&header[0..3], &[0, 0, 8]);
        assert_eq!(header[3], FrameType::Ping as u8);
        assert_eq!(header[5..9], [0, 0, 0, 0]);
    }

    #[tokio::test]
    async fn read_frame_masks_high_bit_of_stream_id() {
        let (mut client, server) = duplex(4096);
        let mut reader = FrameReader::new(server);

        let mut wire = Vec::new();
        wire.extend_from_slice(&[0, 0, 0]); // length = 0
        wire.push(FrameType::WindowUpdate as u8);
        wire.push(0); // flags
        wire.extend_from_slice(&(0x8000_0007u32).to_be_bytes()); // high bit set
        client.write_all(&wire).await.unwrap();

        let frame = reader.read_frame(16_384).await.unwrap();
        assert_eq!(frame.stream_id, 7);
    }

    #[tokio::test]
    async fn read_frame_rejects_oversized_length() {
        let (mut client, server) = duplex(4096);
        let mut reader = FrameReader::new(server);

        let mut wire = Vec::new();
        wire.extend_from_slice(&(20_000u32).to_be_bytes()[1..]);
        wire.push(FrameType::Data as u8);
        wire.push(0);
        wire.extend_from_slice(&0u32.to_be_bytes());
        client.write_all(&wire).await.unwrap();

        let err = reader.read_frame(16_384).await.unwrap_err();
        assert!(matches!(err, Http2Error::FrameTooLarge(20_000)));
    }

    #[tokio::test]
    async fn write_frame_rejects_length_past_payload() {
        let (client, _server) = duplex(4096);
        let mut writer = FrameWriter::new(client);
        let mut frame = Frame::new(FrameType::Ping, 0, 0, vec![1, 2]);
        frame.length = 10;
        let err = writer.write_frame(&frame, true).await.unwrap_err();
        assert!(matches!(err, Http2Error::InvalidArgument(_)));
    }
}
