//! Per-stream lifecycle and response assembly (§4.5's client-view state table, §3's `Stream`
//! data model). HPACK decoding itself stays connection-scoped (the dynamic table is shared
//! across all streams); a [`Stream`] only receives already-decoded header lists and folds them
//! into its state machine and response buffer.

use crate::error::Http2Error;
use crate::flow_control::{should_replenish, Window};
use crate::pool::{Pool, PooledBuffer};
use crate::response::Response;
use crate::types::{Headers, NonZeroStreamId};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    ReservedLocal,
    ReservedRemote,
    Open,
    HalfClosedLocal,
    HalfClosedRemote,
    Closed,
}

/// One client-initiated stream: its lifecycle state, both flow-control windows, and the
/// in-progress response being assembled from HEADERS/CONTINUATION/DATA frames.
pub struct Stream {
    pub id: NonZeroStreamId,
    pub state: StreamState,
    pub send_window: Window,
    pub recv_window: Window,
    /// Set once the first HEADERS block (carrying `:status`) has been decoded. Any non-HEADERS
    /// frame arriving before this is set is a stream error (§4.5).
    pub headers_seen: bool,
    /// Set while a HEADERS/PUSH_PROMISE block is incomplete (no END_HEADERS yet); cleared when
    /// its CONTINUATION chain's END_HEADERS arrives. The connection multiplexer is the one that
    /// enforces "every subsequent frame must be CONTINUATION on this stream" (§4.5), since that
    /// rule is connection-scoped (`continuation_stream_id`), not per-stream.
    pub expecting_continuation: bool,
    /// Bytes drained from `recv_window` since the last WINDOW_UPDATE was queued for this stream
    /// (§4.6's half-window replenishment heuristic).
    recv_consumed_since_update: u32,
    status: Option<u16>,
    response_headers: Headers,
    body: PooledBuffer,
}

impl Stream {
    pub fn new(
        id: NonZeroStreamId,
        initial_send_window: u32,
        initial_recv_window: u32,
        pool: &Arc<Pool>,
    ) -> Self {
        Self {
            id,
            state: StreamState::Idle,
            send_window: Window::new(initial_send_window),
            recv_window: Window::new(initial_recv_window),
            headers_seen: false,
            expecting_continuation: false,
            recv_consumed_since_update: 0,
            status: None,
            response_headers: Headers::new(),
            body: pool.rent(4096),
        }
    }

    pub fn status(&self) -> Option<u16> {
        self.status
    }

    pub fn is_closed(&self) -> bool {
        self.state == StreamState::Closed
    }

    /// Idle --send HEADERS--> Open or HalfClosedLocal, depending on whether this request has a
    /// body (§4.5: GET/HEAD send END_STREAM immediately, other methods follow with DATA).
    pub fn send_headers(&mut self, end_stream: bool) {
        debug_assert_eq!(self.state, StreamState::Idle);
        self.state = if end_stream {
            StreamState::HalfClosedLocal
        } else {
            StreamState::Open
        };
    }

    /// Open --send END_STREAM--> HalfClosedLocal; HalfClosedRemote --send END_STREAM--> Closed.
    pub fn send_end_stream(&mut self) {
        self.state = match self.state {
            StreamState::Open => StreamState::HalfClosedLocal,
            StreamState::HalfClosedRemote => StreamState::Closed,
            other => other,
        };
    }

    /// Open --recv END_STREAM--> HalfClosedRemote; HalfClosedLocal --recv END_STREAM--> Closed.
    pub fn recv_end_stream(&mut self) {
        self.state = match self.state {
            StreamState::Open => StreamState::HalfClosedRemote,
            StreamState::HalfClosedLocal => StreamState::Closed,
            other => other,
        };
    }

    /// send/recv RST_STREAM, or a connection-scoped failure: any non-Closed state becomes
    /// Closed.
    pub fn reset(&mut self) {
        self.state = StreamState::Closed;
    }

    /// Folds a decoded header block into the response. The first block must carry a `:status`
    /// that parses as an ASCII-digit integer (§4.5); later blocks (e.g. trailers) are merged in
    /// without that requirement.
    pub fn apply_headers(&mut self, headers: Headers) -> Result<(), Http2Error> {
        if !self.headers_seen {
            let status = headers
                .iter()
                .find(|(k, _)| k == ":status")
                .map(|(_, v)| v.as_str())
                .and_then(|v| v.parse::<u16>().ok())
                .ok_or(Http2Error::InvalidStatus)?;
            self.status = Some(status);
            self.headers_seen = true;
        }
        self.response_headers.extend(headers);
        Ok(())
    }

    pub fn append_body(&mut self, data: &[u8]) {
        self.body.extend_from_slice(data);
    }

    /// Tracks bytes drained from `recv_window` by an incoming DATA frame, replenishing the
    /// window and returning the WINDOW_UPDATE increment to send once the half-consumed
    /// threshold is crossed (§4.6). Returns `None` when no replenishment is due yet.
    pub fn note_received(&mut self, len: u32, full_window_size: u32) -> Result<Option<u32>, Http2Error> {
        self.recv_consumed_since_update = self.recv_consumed_since_update.saturating_add(len);
        if should_replenish(self.recv_consumed_since_update, full_window_size) {
            let increment = self.recv_consumed_since_update;
            self.recv_consumed_since_update = 0;
            self.recv_window.increment(increment)?;
            Ok(Some(increment))
        } else {
            Ok(None)
        }
    }

    pub fn into_response(self, request_id: usize, elapsed: std::time::Duration) -> Response {
        Response {
            request_id,
            headers: self.response_headers,
            body: bytes::Bytes::copy_from_slice(&self.body),
            elapsed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::num::NonZeroU32;

    fn stream() -> Stream {
        let pool = Pool::new([(4096, 4)]);
        Stream::new(NonZeroU32::new(1).unwrap(), 65_535, 65_535, &pool)
    }

    #[test]
    fn get_request_transitions_straight_to_half_closed_local() {
        let mut s = stream();
        s.send_headers(true);
        assert_eq!(s.state, StreamState::HalfClosedLocal);
    }

    #[test]
    fn post_request_transitions_through_open() {
        let mut s = stream();
        s.send_headers(false);
        assert_eq!(s.state, StreamState::Open);
        s.send_end_stream();
        assert_eq!(s.state, StreamState::HalfClosedLocal);
    }

    #[test]
    fn full_round_trip_reaches_closed() {
        let mut s = stream();
        s.send_headers(true); // HalfClosedLocal
        s.recv_end_stream(); // HalfClosedLocal --recv END_STREAM--> Closed
        assert_eq!(s.state, StreamState::Closed);
    }

    #[test]
    fn missing_status_fails_the_stream() {
        let mut s = stream();
        s.send_headers(true);
        let err = s
            .apply_headers(vec![("content-type".to_string(), "text/plain".to_string())])
            .unwrap_err();
        assert!(matches!(err, Http2Error::InvalidStatus));
    }

    #[test]
    fn malformed_status_fails_the_stream() {
        let mut s = stream();
        s.send_headers(true);
        let err = s
            .apply_headers(vec![(":status".to_string(), "not-a-number".to_string())])
            .unwrap_err();
        assert!(matches!(err, Http2Error::InvalidStatus));
    }

    #[test]
    fn valid_status_is_recorded_once() {
        let mut s = stream();
        s.send_headers(true);
        s.apply_headers(vec![(":status".to_string(), "200".to_string())])
            .unwrap();
        assert_eq!(s.status(), Some(200));
    }
}
