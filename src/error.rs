//! Error taxonomies.
//!
//! Two layers: [`Http2Error`] is the wire-level/HPACK vocabulary the protocol engine itself
//! raises (it always carries an RFC 7540 error code), and [`RequestError`] is the public
//! taxonomy from the spec's error handling design, which every failed request surfaces to the
//! caller. [`Http2Error`] is converted into [`RequestError::Network`] at the connection/stream
//! boundary; [`RequestError`] also accommodates failures that never touch the wire at all
//! (cancellation, malformed requests, TLS).

use crate::frame::ErrorType;

/// Wire-level and HPACK errors raised by the protocol engine. Every variant maps to an RFC 7540
/// error code via [`Http2Error::code`].
#[derive(thiserror::Error, Debug, Clone)]
pub enum Http2Error {
    #[error("unknown frame type")]
    UnknownFrameType,
    #[error("frame payload shorter than its declared length")]
    PayloadTooShort,
    #[error("frame of {0} bytes exceeds the peer's max frame size")]
    FrameTooLarge(u32),
    #[error("unexpected zero stream id")]
    ZeroStreamId,
    #[error("zero-length WINDOW_UPDATE increment on stream 0")]
    ZeroConnectionWindowIncrement,
    #[error("zero-length WINDOW_UPDATE increment on a stream")]
    ZeroStreamWindowIncrement,
    #[error("flow-control window would exceed 2^31-1")]
    WindowOverflow,
    #[error("flow-control window would go negative")]
    WindowUnderflow,
    #[error("SETTINGS ACK carried a non-empty payload")]
    SettingsAckNotEmpty,
    #[error("SETTINGS frame on a non-zero stream")]
    SettingsOnStream,
    #[error("PUSH_PROMISE received, but ENABLE_PUSH=0 was advertised")]
    PushNotEnabled,
    #[error("frame of a type requiring END_HEADERS continuation arrived out of order")]
    ContinuationOutOfOrder,
    #[error("first frame of a stream was not HEADERS")]
    NotHeadersFirst,
    #[error(":status header missing or not a valid status code")]
    InvalidStatus,
    #[error("HPACK: integer continuation implies too many bit shifts")]
    IntegerOverflow,
    #[error("HPACK: integer truncated mid-continuation")]
    IntegerTruncated,
    #[error("HPACK: Huffman stream ended mid-code or hit the EOS symbol")]
    HuffmanInvalid,
    #[error("HPACK: Huffman padding longer than 7 bits")]
    HuffmanPaddingTooLong,
    #[error("HPACK: indexed header field referenced index {0}, out of range")]
    InvalidTableIndex(usize),
    #[error("HPACK: dynamic table size update did not come first in its header block")]
    SizeUpdateOutOfOrder,
    #[error("HPACK: dynamic table size update exceeds the negotiated bound")]
    SizeUpdateTooLarge,
    #[error("HPACK: decoded header list exceeds the configured maximum")]
    HeaderListTooLarge,
    #[error("HPACK: truncated header block")]
    Truncated,
    #[error("stream id {0} exceeds 2^31-1")]
    StreamIdExhausted,
    #[error("received frame on a closed stream")]
    StreamClosed,
    #[error("generic protocol error: {0}")]
    Protocol(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("transport error: {0}")]
    Transport(String),
}

impl Http2Error {
    /// Maps every variant to the RFC 7540 error code an RST_STREAM/GOAWAY carrying it would use.
    pub fn code(&self) -> ErrorType {
        use Http2Error::*;
        match self {
            UnknownFrameType | PayloadTooShort | ZeroStreamId | ContinuationOutOfOrder
            | NotHeadersFirst | InvalidStatus | Protocol(_) | PushNotEnabled
            | ZeroConnectionWindowIncrement => ErrorType::ProtocolError,
            FrameTooLarge(_) | SettingsAckNotEmpty => ErrorType::FrameSizeError,
            SettingsOnStream => ErrorType::ProtocolError,
            ZeroStreamWindowIncrement => ErrorType::ProtocolError,
            WindowOverflow | WindowUnderflow => ErrorType::FlowControlError,
            IntegerOverflow | IntegerTruncated | HuffmanInvalid | HuffmanPaddingTooLong
            | InvalidTableIndex(_) | SizeUpdateOutOfOrder | SizeUpdateTooLarge
            | HeaderListTooLarge | Truncated => ErrorType::CompressionError,
            StreamIdExhausted => ErrorType::InternalError,
            StreamClosed => ErrorType::StreamClosed,
            InvalidArgument(_) => ErrorType::InternalError,
            Transport(_) => ErrorType::InternalError,
        }
    }
}

/// The public error taxonomy returned alongside a failed request, per §7.
#[derive(thiserror::Error, Debug, Clone)]
pub enum RequestError {
    #[error("network error: {0}")]
    Network(String),
    #[error("timed out")]
    Timeout,
    #[error("http error: status {0}")]
    Http(u16),
    #[error("certificate error: {0}")]
    Certificate(String),
    #[error("request cancelled")]
    Cancelled,
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("unknown error: {0}")]
    Unknown(String),
}

impl RequestError {
    /// NetworkError and Timeout are retryable unconditionally; HttpError only for 5xx; every
    /// other category is non-retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            RequestError::Network(_) | RequestError::Timeout => true,
            RequestError::Http(status) => (500..600).contains(status),
            RequestError::Certificate(_)
            | RequestError::Cancelled
            | RequestError::InvalidRequest(_)
            | RequestError::Unknown(_) => false,
        }
    }
}

impl From<Http2Error> for RequestError {
    fn from(err: Http2Error) -> Self {
        RequestError::Network(err.to_string())
    }
}

impl From<std::io::Error> for RequestError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::TimedOut {
            RequestError::Timeout
        } else {
            RequestError::Network(err.to_string())
        }
    }
}
