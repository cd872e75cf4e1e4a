//! The byte-duplex transport contract the connection multiplexer is built against (§6).
//!
//! TLS negotiation, certificate validation, DNS resolution, and TCP connect are explicitly out
//! of scope (§1): this module only describes the interface the core consumes once a transport
//! has already been negotiated, plus the concrete implementations the client reaches for
//! (`tokio::net::TcpStream` wrapped in `tokio-rustls`, and `tokio::io::DuplexStream` for tests).

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;

/// An owned, already-connected byte-duplex transport with ALPN observable before the preface is
/// written. The connection multiplexer owns exactly one of these for its lifetime (§5).
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send + 'static {
    /// The negotiated ALPN protocol, if the transport performed a handshake. `None` for
    /// transports (like an in-memory duplex in tests) that never negotiate one.
    fn alpn_protocol(&self) -> Option<Vec<u8>> {
        None
    }
}

impl Transport for TlsStream<TcpStream> {
    fn alpn_protocol(&self) -> Option<Vec<u8>> {
        self.get_ref().1.alpn_protocol().map(<[u8]>::to_vec)
    }
}

impl Transport for tokio::io::DuplexStream {}
