//! The connection multiplexer (§4.7, §5): one reader task and one writer task per connection,
//! coordinated through a shared `Mutex<State>` and an unbounded outbound frame queue so that
//! exactly one task ever touches the transport's write half.
//!
//! HPACK encoding/decoding and both flow-control windows are connection-scoped here; each
//! [`Stream`] only tracks its own window and already-decoded headers.

use crate::config::ConnectionConfig;
use crate::error::Http2Error;
use crate::flags::{ContinuationFlags, DataFlags, HeadersFlags, PingFlags, SettingsFlags};
use crate::flow_control::{should_replenish, Window};
use crate::frame::{ErrorType, Frame, FrameReader, FrameType, FrameWriter};
use crate::hpack;
use crate::pool::Pool;
use crate::request::Request;
use crate::response::Response;
use crate::settings::Settings;
use crate::stream::Stream;
use crate::transport::Transport;
use crate::types::{Headers, NonZeroStreamId, DEFAULT_HEADER_TABLE_SIZE, DEFAULT_INITIAL_WINDOW_SIZE};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::{mpsc, oneshot, Notify};

struct StreamEntry {
    stream: Stream,
    request_id: usize,
    response_tx: Option<oneshot::Sender<Result<Response, Http2Error>>>,
    start: Instant,
}

struct State {
    streams: HashMap<NonZeroStreamId, StreamEntry>,
    next_stream_id: u32,
    local_settings: Settings,
    peer_settings: Settings,
    connection_send_window: Window,
    connection_recv_window: Window,
    connection_recv_consumed_since_update: u32,
    encoder: hpack::Encoder,
    decoder: hpack::Decoder,
    /// Non-`None` while a HEADERS/PUSH_PROMISE block's CONTINUATION chain is incomplete; every
    /// other frame type is a connection error until END_HEADERS arrives (§4.5).
    continuation_stream_id: Option<NonZeroStreamId>,
    pending_end_stream: bool,
    header_block_buffer: Vec<u8>,
    closed: bool,
    goaway_received: Option<(u32, ErrorType)>,
    /// Bounded record of stream ids this connection created and has since removed from
    /// `streams` (finalized, reset, or failed). Used to tell a frame arriving for a CLOSED
    /// stream apart from one naming a stream id never opened at all (§4.5/§9 open question:
    /// CLOSED streams get RST_STREAM(STREAM_CLOSED), not silent drop).
    closed_stream_order: VecDeque<u32>,
    closed_stream_set: HashSet<u32>,
}

/// How many closed stream ids to remember for the STREAM_CLOSED check above.
const CLOSED_STREAM_MEMORY: usize = 1024;

impl State {
    fn note_stream_closed(&mut self, stream_id: u32) {
        if self.closed_stream_set.insert(stream_id) {
            self.closed_stream_order.push_back(stream_id);
            if self.closed_stream_order.len() > CLOSED_STREAM_MEMORY {
                if let Some(evicted) = self.closed_stream_order.pop_front() {
                    self.closed_stream_set.remove(&evicted);
                }
            }
        }
    }

    fn was_recently_closed(&self, stream_id: u32) -> bool {
        self.closed_stream_set.contains(&stream_id)
    }
}

struct Shared {
    state: Mutex<State>,
    outbound: mpsc::UnboundedSender<Frame>,
    window_notify: Notify,
    config: ConnectionConfig,
    pool: Arc<Pool>,
}

/// One HTTP/2 connection: a live reader/writer task pair plus the shared state they coordinate
/// through. Cloning a [`Connection`] shares the same underlying transport and stream table.
#[derive(Clone)]
pub struct Connection {
    shared: Arc<Shared>,
}

impl Connection {
    /// True once the connection has failed or received/sent GOAWAY; a client-side cache should
    /// dial a fresh connection rather than route more requests through this one.
    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().expect("connection state lock").closed
    }

    /// Performs the client preface and initial SETTINGS handshake over `transport`, spawns the
    /// reader and writer tasks, and waits for the peer's first SETTINGS frame before returning.
    pub async fn connect<T: Transport>(
        transport: T,
        config: ConnectionConfig,
        pool: Arc<Pool>,
    ) -> Result<Self, Http2Error> {
        let (read_half, write_half) = tokio::io::split(transport);
        let mut writer = FrameWriter::new(write_half);

        writer.write_preface().await?;
        let local_settings =
            Settings::local_defaults(config.header_table_size, config.max_header_list_size);
        writer.write_frame(&local_settings.to_frame(), true).await?;

        // SETTINGS_INITIAL_WINDOW_SIZE only resizes new stream windows (RFC 7540 §6.9.2); the
        // connection window always starts at 65535 and can only be raised with an explicit
        // WINDOW_UPDATE on stream 0.
        if config.initial_window_size > DEFAULT_INITIAL_WINDOW_SIZE {
            let delta = config.initial_window_size - DEFAULT_INITIAL_WINDOW_SIZE;
            writer
                .write_frame(&Frame::new(FrameType::WindowUpdate, 0, 0, delta.to_be_bytes().to_vec()), true)
                .await?;
        }

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();

        let state = State {
            streams: HashMap::new(),
            next_stream_id: 1,
            local_settings,
            peer_settings: Settings::peer_defaults(),
            connection_send_window: Window::new(DEFAULT_INITIAL_WINDOW_SIZE),
            connection_recv_window: Window::new(config.initial_window_size),
            connection_recv_consumed_since_update: 0,
            encoder: hpack::Encoder::new(DEFAULT_HEADER_TABLE_SIZE as usize),
            decoder: hpack::Decoder::new(
                DEFAULT_HEADER_TABLE_SIZE as usize,
                config.header_table_size as usize,
                config.max_decoded_header_bytes,
            ),
            continuation_stream_id: None,
            pending_end_stream: false,
            header_block_buffer: Vec::new(),
            closed: false,
            goaway_received: None,
            closed_stream_order: VecDeque::new(),
            closed_stream_set: HashSet::new(),
        };

        let shared = Arc::new(Shared {
            state: Mutex::new(state),
            outbound: outbound_tx,
            window_notify: Notify::new(),
            config,
            pool,
        });

        tokio::spawn(run_writer(writer, outbound_rx));
        tokio::spawn(run_reader(shared.clone(), FrameReader::new(read_half), ready_tx));

        ready_rx
            .await
            .map_err(|_| Http2Error::Transport("connection closed before SETTINGS".into()))??;

        Ok(Self { shared })
    }

    /// Sends one request to completion: HEADERS (+ CONTINUATION if the compressed block doesn't
    /// fit in one frame), then DATA frames gated by both flow-control windows, then awaits the
    /// full response. Callers apply their own deadline (e.g. via `tokio::time::timeout`) around
    /// this call; a connection-level failure surfaces here as [`Http2Error`].
    pub async fn send_request(&self, request: &Request) -> Result<Response, Http2Error> {
        let (tx, rx) = oneshot::channel();
        let stream_id;
        let outbound_frames;

        {
            let mut state = self.shared.state.lock().expect("connection state lock");
            if state.closed {
                return Err(Http2Error::Transport("connection closed".into()));
            }

            stream_id =
                NonZeroStreamId::new(state.next_stream_id).ok_or(Http2Error::StreamIdExhausted)?;
            state.next_stream_id = state
                .next_stream_id
                .checked_add(2)
                .ok_or(Http2Error::StreamIdExhausted)?;

            let has_body = !request.body.is_empty();
            let mut stream = Stream::new(
                stream_id,
                state.peer_settings.initial_window_size(),
                self.shared.config.initial_window_size,
                &self.shared.pool,
            );
            stream.send_headers(!has_body);

            let block = state.encoder.encode(&request.headers);
            let max_frame_size = state.peer_settings.max_frame_size() as usize;
            outbound_frames = split_header_block(stream_id, block, max_frame_size, !has_body);

            state.streams.insert(
                stream_id,
                StreamEntry {
                    stream,
                    request_id: request.id,
                    response_tx: Some(tx),
                    start: Instant::now(),
                },
            );
        }

        // From here on a stream exists in the active table; if this future is dropped before
        // `rx` resolves (caller cancellation, or a `tokio::time::timeout` firing around this
        // call), the guard queues RST_STREAM(CANCEL) and removes the stream so no permit/entry
        // leaks (§5 "Cancellation").
        let guard = CancelGuard::new(self.shared.clone(), stream_id);

        for frame in outbound_frames {
            self.shared
                .outbound
                .send(frame)
                .map_err(|_| Http2Error::Transport("writer task gone".into()))?;
        }

        if !request.body.is_empty() {
            self.send_body(stream_id, &request.body).await?;
        }

        let result = rx
            .await
            .map_err(|_| Http2Error::Transport("connection closed mid-request".into()))?;
        guard.disarm();
        result
    }

    /// Best-effort graceful disposal (§4.7): marks the connection closed so no further request is
    /// admitted, queues a GOAWAY(NO_ERROR), and fails every still-active stream. Idempotent.
    pub fn close(&self) {
        let mut state = self.shared.state.lock().expect("connection state lock");
        if state.closed {
            return;
        }
        state.closed = true;
        let mut payload = Vec::with_capacity(8);
        payload.extend_from_slice(&0u32.to_be_bytes());
        payload.extend_from_slice(&(ErrorType::NoError as u32).to_be_bytes());
        let _ = self
            .shared
            .outbound
            .send(Frame::new(FrameType::GoAway, 0, 0, payload));
        for (_, mut entry) in state.streams.drain() {
            if let Some(tx) = entry.response_tx.take() {
                let _ = tx.send(Err(Http2Error::Transport("connection closed".into())));
            }
        }
    }

    async fn send_body(&self, stream_id: NonZeroStreamId, body: &[u8]) -> Result<(), Http2Error> {
        let max_frame_size = {
            let state = self.shared.state.lock().expect("connection state lock");
            state.peer_settings.max_frame_size() as usize
        };

        let mut offset = 0;
        while offset < body.len() {
            let chunk_len = loop {
                let notified = self.shared.window_notify.notified();

                {
                    let mut state = self.shared.state.lock().expect("connection state lock");
                    if state.closed {
                        return Err(Http2Error::Transport("connection closed".into()));
                    }
                    let conn_avail = state.connection_send_window.available().max(0) as usize;
                    let stream_avail = state
                        .streams
                        .get(&stream_id)
                        .map(|e| e.stream.send_window.available().max(0) as usize)
                        .unwrap_or(0);
                    let avail = conn_avail
                        .min(stream_avail)
                        .min(max_frame_size)
                        .min(body.len() - offset);

                    if avail > 0 {
                        state.connection_send_window.consume(avail as u32)?;
                        if let Some(entry) = state.streams.get_mut(&stream_id) {
                            entry.stream.send_window.consume(avail as u32)?;
                        } else {
                            return Err(Http2Error::StreamClosed);
                        }
                        break avail;
                    }
                }

                notified.await;
            };

            let end = offset + chunk_len;
            let is_last = end == body.len();
            let flags = if is_last { DataFlags::END_STREAM.bits() } else { 0 };
            let frame = Frame::new(FrameType::Data, flags, stream_id.get(), body[offset..end].to_vec());
            self.shared
                .outbound
                .send(frame)
                .map_err(|_| Http2Error::Transport("writer task gone".into()))?;
            offset = end;

            if is_last {
                let mut state = self.shared.state.lock().expect("connection state lock");
                if let Some(entry) = state.streams.get_mut(&stream_id) {
                    entry.stream.send_end_stream();
                }
            }
        }

        Ok(())
    }
}

/// Queues RST_STREAM(CANCEL) and drops the stream from the active table when a request future is
/// cancelled mid-flight (dropped before its response arrives). A no-op if the stream already
/// finished or was removed some other way (it's simply absent from the table by then) — disarming
/// after a successful `rx.await` skips the lock entirely on the common path.
struct CancelGuard {
    shared: Arc<Shared>,
    stream_id: NonZeroStreamId,
    armed: bool,
}

impl CancelGuard {
    fn new(shared: Arc<Shared>, stream_id: NonZeroStreamId) -> Self {
        Self {
            shared,
            stream_id,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = self.shared.state.lock().expect("connection state lock");
        if state.streams.remove(&self.stream_id).is_some() {
            state.note_stream_closed(self.stream_id.get());
            let _ = self
                .shared
                .outbound
                .send(Frame::rst_stream(self.stream_id.get(), ErrorType::Cancel));
        }
    }
}

/// Splits an already-encoded HPACK block across a HEADERS frame plus as many CONTINUATION
/// frames as required to respect `max_frame_size`, setting END_HEADERS on the last one and
/// END_STREAM on the HEADERS frame when the request carries no body (§4.5).
fn split_header_block(
    stream_id: NonZeroStreamId,
    block: Vec<u8>,
    max_frame_size: usize,
    end_stream: bool,
) -> Vec<Frame> {
    let max_frame_size = max_frame_size.max(1);
    let mut chunks: Vec<&[u8]> = block.chunks(max_frame_size).collect();
    if chunks.is_empty() {
        chunks.push(&[]);
    }

    let last = chunks.len() - 1;
    chunks
        .into_iter()
        .enumerate()
        .map(|(i, chunk)| {
            if i == 0 {
                let mut flags = HeadersFlags::empty();
                if i == last {
                    flags |= HeadersFlags::END_HEADERS;
                }
                if end_stream {
                    flags |= HeadersFlags::END_STREAM;
                }
                Frame::new(FrameType::Headers, flags.bits(), stream_id.get(), chunk.to_vec())
            } else {
                let mut flags = ContinuationFlags::empty();
                if i == last {
                    flags |= ContinuationFlags::END_HEADERS;
                }
                Frame::new(FrameType::Continuation, flags.bits(), stream_id.get(), chunk.to_vec())
            }
        })
        .collect()
}

async fn run_writer<W>(mut writer: FrameWriter<W>, mut rx: mpsc::UnboundedReceiver<Frame>)
where
    W: tokio::io::AsyncWriteExt + Unpin + Send + 'static,
{
    while let Some(frame) = rx.recv().await {
        if writer.write_frame(&frame, true).await.is_err() {
            break;
        }
    }
}

async fn run_reader<R>(
    shared: Arc<Shared>,
    mut reader: FrameReader<R>,
    mut ready_tx: Option<oneshot::Sender<Result<(), Http2Error>>>,
) where
    R: tokio::io::AsyncReadExt + Unpin + Send + 'static,
{
    loop {
        let max_frame_size = {
            let state = shared.state.lock().expect("connection state lock");
            state.local_settings.max_frame_size()
        };

        match reader.read_frame(max_frame_size).await {
            Ok(frame) => {
                if let Err(err) = shared.handle_frame(frame, &mut ready_tx) {
                    shared.fail_connection(err);
                    return;
                }
            }
            Err(err) => {
                if let Some(tx) = ready_tx.take() {
                    let _ = tx.send(Err(err.clone()));
                }
                shared.fail_connection(err);
                return;
            }
        }
    }
}

impl Shared {
    fn handle_frame(
        &self,
        frame: Frame,
        ready_tx: &mut Option<oneshot::Sender<Result<(), Http2Error>>>,
    ) -> Result<(), Http2Error> {
        match frame.typ {
            FrameType::Settings => self.handle_settings(frame, ready_tx),
            FrameType::WindowUpdate => self.handle_window_update(frame),
            FrameType::Headers => self.handle_headers(frame),
            FrameType::Continuation => self.handle_continuation(frame),
            FrameType::Data => self.handle_data(frame),
            FrameType::ResetStream => self.handle_reset_stream(frame),
            FrameType::Ping => self.handle_ping(frame),
            FrameType::GoAway => self.handle_goaway(frame),
            // Server push is never enabled locally (ENABLE_PUSH=0, §4.12/§1): any PUSH_PROMISE
            // is a protocol error.
            FrameType::PushPromise => Err(Http2Error::PushNotEnabled),
            // Stream prioritization signals are accepted and ignored; scheduling by priority is
            // out of scope (§1).
            FrameType::Priority => Ok(()),
        }
    }

    fn handle_settings(
        &self,
        frame: Frame,
        ready_tx: &mut Option<oneshot::Sender<Result<(), Http2Error>>>,
    ) -> Result<(), Http2Error> {
        if frame.stream_id != 0 {
            return Err(Http2Error::SettingsOnStream);
        }
        if frame.flags & SettingsFlags::ACK.bits() != 0 {
            if !frame.payload.is_empty() {
                return Err(Http2Error::SettingsAckNotEmpty);
            }
            return Ok(());
        }

        let incoming = Settings::from_frame_payload(&frame.payload)?;

        let mut state = self.state.lock().expect("connection state lock");
        let old_initial = state.peer_settings.initial_window_size();
        for (param, value) in incoming.iter_in_order() {
            state.peer_settings.set(param, value);
        }
        let new_initial = state.peer_settings.initial_window_size();
        if new_initial != old_initial {
            let delta = i64::from(new_initial) - i64::from(old_initial);
            for entry in state.streams.values_mut() {
                entry.stream.send_window.apply_initial_window_delta(delta)?;
            }
        }
        state
            .encoder
            .set_dynamic_table_size(state.peer_settings.header_table_size() as usize);
        drop(state);

        let _ = self.outbound.send(Settings::ack_frame());
        self.window_notify.notify_waiters();

        if let Some(tx) = ready_tx.take() {
            let _ = tx.send(Ok(()));
        }
        Ok(())
    }

    /// A zero increment or an overflow past 2^31-1 is a connection error when it names stream 0,
    /// but only a *stream* error (RST_STREAM, connection unaffected) when it names a stream
    /// (§4.6); only the former ever propagates out of this function.
    fn handle_window_update(&self, frame: Frame) -> Result<(), Http2Error> {
        if frame.payload.len() != 4 {
            return Err(Http2Error::PayloadTooShort);
        }
        let increment =
            u32::from_be_bytes(frame.payload[0..4].try_into().expect("len checked")) & (u32::MAX >> 1);

        if frame.stream_id == 0 {
            if increment == 0 {
                return Err(Http2Error::ZeroConnectionWindowIncrement);
            }
            let mut state = self.state.lock().expect("connection state lock");
            state.connection_send_window.increment(increment)?;
            drop(state);
            self.window_notify.notify_waiters();
            return Ok(());
        }

        let Some(id) = NonZeroStreamId::new(frame.stream_id) else {
            return Err(Http2Error::ZeroStreamId);
        };
        let mut state = self.state.lock().expect("connection state lock");
        if state.streams.contains_key(&id) {
            let result = if increment == 0 {
                Err(Http2Error::ZeroStreamWindowIncrement)
            } else {
                state.streams.get_mut(&id).unwrap().stream.send_window.increment(increment)
            };
            if let Err(err) = result {
                self.fail_stream(&mut state, id, err);
            }
        }
        drop(state);
        self.window_notify.notify_waiters();
        Ok(())
    }

    fn handle_headers(&self, frame: Frame) -> Result<(), Http2Error> {
        let stream_id = NonZeroStreamId::new(frame.stream_id).ok_or(Http2Error::ZeroStreamId)?;
        let end_headers = frame.flags & HeadersFlags::END_HEADERS.bits() != 0;
        let end_stream = frame.flags & HeadersFlags::END_STREAM.bits() != 0;

        let mut state = self.state.lock().expect("connection state lock");
        if state.continuation_stream_id.is_some() {
            return Err(Http2Error::ContinuationOutOfOrder);
        }
        state.header_block_buffer.clear();
        state.header_block_buffer.extend_from_slice(&frame.payload);

        if end_headers {
            self.finish_header_block(&mut state, stream_id, end_stream)
        } else {
            state.continuation_stream_id = Some(stream_id);
            state.pending_end_stream = end_stream;
            Ok(())
        }
    }

    fn handle_continuation(&self, frame: Frame) -> Result<(), Http2Error> {
        let stream_id = NonZeroStreamId::new(frame.stream_id).ok_or(Http2Error::ZeroStreamId)?;
        let end_headers = frame.flags & ContinuationFlags::END_HEADERS.bits() != 0;

        let mut state = self.state.lock().expect("connection state lock");
        if state.continuation_stream_id != Some(stream_id) {
            return Err(Http2Error::ContinuationOutOfOrder);
        }
        state.header_block_buffer.extend_from_slice(&frame.payload);

        if end_headers {
            let end_stream = state.pending_end_stream;
            state.continuation_stream_id = None;
            self.finish_header_block(&mut state, stream_id, end_stream)
        } else {
            Ok(())
        }
    }

    fn finish_header_block(
        &self,
        state: &mut State,
        stream_id: NonZeroStreamId,
        end_stream: bool,
    ) -> Result<(), Http2Error> {
        let block = std::mem::take(&mut state.header_block_buffer);
        // HPACK decoding errors are always connection-scoped (the dynamic table is shared, §4.4),
        // so this `?` is the one place in this function allowed to fail the whole connection.
        let headers: Headers = state.decoder.decode(&block)?;

        if !state.streams.contains_key(&stream_id) {
            // Headers for a stream we no longer track (already failed/finalized); the decode
            // call above still ran so the shared dynamic table stays in sync with the peer.
            // A CLOSED stream receiving anything other than PRIORITY/WINDOW_UPDATE/RST_STREAM
            // is a stream error, not a silent drop (§4.5/§9).
            if state.was_recently_closed(stream_id.get()) {
                let _ = self
                    .outbound
                    .send(Frame::rst_stream(stream_id.get(), ErrorType::StreamClosed));
            }
            return Ok(());
        }

        // A malformed/missing `:status` fails only this stream (§4.5/§7), not the connection.
        if let Err(err) = state.streams.get_mut(&stream_id).unwrap().stream.apply_headers(headers) {
            self.fail_stream(state, stream_id, err);
            return Ok(());
        }

        let entry = state.streams.get_mut(&stream_id).unwrap();
        if end_stream {
            entry.stream.recv_end_stream();
            if entry.stream.is_closed() {
                self.finalize_stream(state, stream_id);
            }
        }
        Ok(())
    }

    fn handle_data(&self, frame: Frame) -> Result<(), Http2Error> {
        let stream_id = NonZeroStreamId::new(frame.stream_id).ok_or(Http2Error::ZeroStreamId)?;
        if frame.flags & DataFlags::PADDED.bits() != 0 {
            return Err(Http2Error::Protocol("DATA padding is not supported".into()));
        }
        let end_stream = frame.flags & DataFlags::END_STREAM.bits() != 0;
        let len = frame.payload.len() as u32;
        let full_window = self.config.initial_window_size;

        let mut state = self.state.lock().expect("connection state lock");
        state.connection_recv_window.consume(len)?;

        let mut to_send = Vec::new();
        state.connection_recv_consumed_since_update =
            state.connection_recv_consumed_since_update.saturating_add(len);
        if should_replenish(state.connection_recv_consumed_since_update, full_window) {
            let increment = state.connection_recv_consumed_since_update;
            state.connection_recv_consumed_since_update = 0;
            state.connection_recv_window.increment(increment)?;
            to_send.push(Frame::new(
                FrameType::WindowUpdate,
                0,
                0,
                increment.to_be_bytes().to_vec(),
            ));
        }

        // DATA before the stream's first HEADERS is a stream error, not connection-wide (§4.5):
        // every response must open with HEADERS.
        if matches!(state.streams.get(&stream_id), Some(entry) if !entry.stream.headers_seen) {
            self.fail_stream(&mut state, stream_id, Http2Error::NotHeadersFirst);
            drop(state);
            for frame in to_send {
                let _ = self.outbound.send(frame);
            }
            return Ok(());
        }

        if let Some(entry) = state.streams.get_mut(&stream_id) {
            entry.stream.recv_window.consume(len)?;
            entry.stream.append_body(&frame.payload);
            if let Some(increment) = entry.stream.note_received(len, full_window)? {
                to_send.push(Frame::new(
                    FrameType::WindowUpdate,
                    0,
                    stream_id.get(),
                    increment.to_be_bytes().to_vec(),
                ));
            }
            if end_stream {
                entry.stream.recv_end_stream();
                if entry.stream.is_closed() {
                    self.finalize_stream(&mut state, stream_id);
                }
            }
        } else if state.was_recently_closed(stream_id.get()) {
            // DATA for a stream already CLOSED on our side: a stream error, not a silent drop
            // (§4.5/§9 open question).
            to_send.push(Frame::rst_stream(stream_id.get(), ErrorType::StreamClosed));
        }
        drop(state);

        for frame in to_send {
            let _ = self.outbound.send(frame);
        }
        Ok(())
    }

    fn handle_reset_stream(&self, frame: Frame) -> Result<(), Http2Error> {
        let stream_id = NonZeroStreamId::new(frame.stream_id).ok_or(Http2Error::ZeroStreamId)?;
        if frame.payload.len() != 4 {
            return Err(Http2Error::PayloadTooShort);
        }
        let code = ErrorType::from_wire(u32::from_be_bytes(
            frame.payload[0..4].try_into().expect("len checked"),
        ));

        let mut state = self.state.lock().expect("connection state lock");
        if let Some(mut entry) = state.streams.remove(&stream_id) {
            entry.stream.reset();
            if let Some(tx) = entry.response_tx.take() {
                let _ = tx.send(Err(Http2Error::Protocol(format!(
                    "stream reset by peer: {code:?}"
                ))));
            }
        }
        state.note_stream_closed(stream_id.get());
        Ok(())
    }

    fn handle_ping(&self, frame: Frame) -> Result<(), Http2Error> {
        if frame.stream_id != 0 {
            return Err(Http2Error::Protocol("PING on a non-zero stream".into()));
        }
        if frame.payload.len() != 8 {
            return Err(Http2Error::PayloadTooShort);
        }
        if frame.flags & PingFlags::ACK.bits() == 0 {
            let _ = self.outbound.send(Frame::new(
                FrameType::Ping,
                PingFlags::ACK.bits(),
                0,
                frame.payload,
            ));
        }
        Ok(())
    }

    fn handle_goaway(&self, frame: Frame) -> Result<(), Http2Error> {
        if frame.payload.len() < 8 {
            return Err(Http2Error::PayloadTooShort);
        }
        let last_stream_id =
            u32::from_be_bytes(frame.payload[0..4].try_into().expect("len checked")) & (u32::MAX >> 1);
        let code = ErrorType::from_wire(u32::from_be_bytes(
            frame.payload[4..8].try_into().expect("len checked"),
        ));

        let mut state = self.state.lock().expect("connection state lock");
        state.goaway_received = Some((last_stream_id, code));

        // Streams the peer never began processing are failed now so the caller can retry
        // elsewhere; streams at or below `last_stream_id` are left to finish normally (§4.7).
        let stranded: Vec<NonZeroStreamId> = state
            .streams
            .keys()
            .filter(|id| id.get() > last_stream_id)
            .copied()
            .collect();
        for id in stranded {
            if let Some(mut entry) = state.streams.remove(&id) {
                if let Some(tx) = entry.response_tx.take() {
                    let _ = tx.send(Err(Http2Error::Protocol(format!(
                        "GOAWAY before stream was processed: {code:?}"
                    ))));
                }
            }
            state.note_stream_closed(id.get());
        }
        Ok(())
    }

    /// Fails exactly one stream: removes it from the active table, signals its waiter with
    /// `err`, and queues RST_STREAM carrying `err`'s RFC 7540 code. The connection itself keeps
    /// running (§4.5/§7: stream errors never tear down the connection).
    fn fail_stream(&self, state: &mut State, stream_id: NonZeroStreamId, err: Http2Error) {
        if let Some(mut entry) = state.streams.remove(&stream_id) {
            if let Some(tx) = entry.response_tx.take() {
                let _ = tx.send(Err(err.clone()));
            }
        }
        state.note_stream_closed(stream_id.get());
        let _ = self.outbound.send(Frame::rst_stream(stream_id.get(), err.code()));
    }

    fn finalize_stream(&self, state: &mut State, stream_id: NonZeroStreamId) {
        if let Some(mut entry) = state.streams.remove(&stream_id) {
            let elapsed = entry.start.elapsed();
            if let Some(tx) = entry.response_tx.take() {
                let response = entry.stream.into_response(entry.request_id, elapsed);
                let _ = tx.send(Ok(response));
            }
        }
        state.note_stream_closed(stream_id.get());
    }

    fn fail_connection(&self, err: Http2Error) {
        let mut state = self.state.lock().expect("connection state lock");
        state.closed = true;
        for (_, mut entry) in state.streams.drain() {
            if let Some(tx) = entry.response_tx.take() {
                let _ = tx.send(Err(err.clone()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Method;
    use tokio::io::{split, AsyncReadExt, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};
    use url::Url;

    fn pool() -> Arc<Pool> {
        Pool::new([(4096, 8), (16384, 4)])
    }

    /// Drives the server side of the handshake over a raw in-memory duplex: reads the client
    /// preface and SETTINGS, replies with its own SETTINGS, and waits for the client's ACK.
    /// Returns the live client [`Connection`] plus frame reader/writer over the server side for
    /// the test body to continue driving.
    async fn handshake() -> (
        Connection,
        FrameReader<ReadHalf<DuplexStream>>,
        FrameWriter<WriteHalf<DuplexStream>>,
    ) {
        let (client_transport, server_transport) = tokio::io::duplex(64 * 1024);
        let (mut server_read, server_write) = split(server_transport);

        let connect = tokio::spawn(Connection::connect(
            client_transport,
            ConnectionConfig::default(),
            pool(),
        ));

        let mut preface = [0u8; 24];
        server_read.read_exact(&mut preface).await.unwrap();
        assert_eq!(&preface, crate::frame::PREFACE);

        let mut server_reader = FrameReader::new(server_read);
        let mut server_writer = FrameWriter::new(server_write);

        let client_settings = server_reader.read_frame(16_384).await.unwrap();
        assert_eq!(client_settings.typ, FrameType::Settings);

        server_writer
            .write_frame(&Settings::peer_defaults().to_frame(), true)
            .await
            .unwrap();
        let ack = server_reader.read_frame(16_384).await.unwrap();
        assert_eq!(ack.typ, FrameType::Settings);
        assert_ne!(ack.flags & SettingsFlags::ACK.bits(), 0);

        let connection = connect.await.unwrap().unwrap();
        (connection, server_reader, server_writer)
    }

    #[tokio::test]
    async fn get_request_round_trips_a_simple_response() {
        let (connection, mut server_reader, mut server_writer) = handshake().await;

        let request = Request::get(Url::parse("https://example.com/hello").unwrap(), None);
        let request_fut = tokio::spawn({
            let connection = connection.clone();
            let request = request.clone();
            async move { connection.send_request(&request).await }
        });

        let headers_frame = server_reader.read_frame(16_384).await.unwrap();
        assert_eq!(headers_frame.typ, FrameType::Headers);
        assert_ne!(headers_frame.flags & HeadersFlags::END_STREAM.bits(), 0);
        let stream_id = headers_frame.stream_id;

        let mut encoder = hpack::Encoder::new(4096);
        let response_headers: Headers = vec![
            (":status".to_string(), "200".to_string()),
            ("content-type".to_string(), "text/plain".to_string()),
        ];
        let block = encoder.encode(&response_headers);
        server_writer
            .write_frame(
                &Frame::new(FrameType::Headers, HeadersFlags::END_HEADERS.bits(), stream_id, block),
                true,
            )
            .await
            .unwrap();
        server_writer
            .write_frame(
                &Frame::new(
                    FrameType::Data,
                    DataFlags::END_STREAM.bits(),
                    stream_id,
                    b"hello world".to_vec(),
                ),
                true,
            )
            .await
            .unwrap();

        let response = request_fut.await.unwrap().unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(&response.body[..], b"hello world");
    }

    #[tokio::test]
    async fn large_response_body_triggers_window_update() {
        let (connection, mut server_reader, mut server_writer) = handshake().await;

        let request = Request::get(Url::parse("https://example.com/big").unwrap(), None);
        let request_fut = tokio::spawn({
            let connection = connection.clone();
            let request = request.clone();
            async move { connection.send_request(&request).await }
        });

        let headers_frame = server_reader.read_frame(16_384).await.unwrap();
        let stream_id = headers_frame.stream_id;

        let mut encoder = hpack::Encoder::new(4096);
        let block = encoder.encode(&vec![(":status".to_string(), "200".to_string())]);
        server_writer
            .write_frame(
                &Frame::new(FrameType::Headers, HeadersFlags::END_HEADERS.bits(), stream_id, block),
                true,
            )
            .await
            .unwrap();

        // Send enough DATA to cross the half-window replenishment threshold (64KiB window, so
        // 40KiB alone should trigger a stream-level WINDOW_UPDATE).
        let chunk = vec![b'x'; 40 * 1024];
        server_writer
            .write_frame(&Frame::new(FrameType::Data, 0, stream_id, chunk.clone()), true)
            .await
            .unwrap();

        let window_update = server_reader.read_frame(16_384).await.unwrap();
        assert_eq!(window_update.typ, FrameType::WindowUpdate);

        server_writer
            .write_frame(
                &Frame::new(FrameType::Data, DataFlags::END_STREAM.bits(), stream_id, Vec::new()),
                true,
            )
            .await
            .unwrap();

        let response = request_fut.await.unwrap().unwrap();
        assert_eq!(response.body.len(), 40 * 1024);
    }

    #[tokio::test]
    async fn post_request_sends_headers_then_data() {
        let (connection, mut server_reader, mut server_writer) = handshake().await;

        let request = Request::post(
            Url::parse("https://example.com/submit").unwrap(),
            None,
            bytes::Bytes::from_static(b"payload"),
        );
        let request_fut = tokio::spawn({
            let connection = connection.clone();
            let request = request.clone();
            async move { connection.send_request(&request).await }
        });

        let headers_frame = server_reader.read_frame(16_384).await.unwrap();
        assert_eq!(headers_frame.flags & HeadersFlags::END_STREAM.bits(), 0);
        let stream_id = headers_frame.stream_id;

        let data_frame = server_reader.read_frame(16_384).await.unwrap();
        assert_eq!(data_frame.typ, FrameType::Data);
        assert_eq!(&data_frame.payload, b"payload");
        assert_ne!(data_frame.flags & DataFlags::END_STREAM.bits(), 0);

        let mut encoder = hpack::Encoder::new(4096);
        let block = encoder.encode(&vec![(":status".to_string(), "201".to_string())]);
        server_writer
            .write_frame(
                &Frame::new(
                    FrameType::Headers,
                    HeadersFlags::END_HEADERS.bits() | HeadersFlags::END_STREAM.bits(),
                    stream_id,
                    block,
                ),
                true,
            )
            .await
            .unwrap();

        let response = request_fut.await.unwrap().unwrap();
        assert_eq!(response.status(), 201);
    }

    #[tokio::test]
    async fn goaway_fails_streams_above_last_stream_id() {
        let (connection, mut server_reader, mut server_writer) = handshake().await;

        let request = Request::get(Url::parse("https://example.com/one").unwrap(), None);
        let request_fut = tokio::spawn({
            let connection = connection.clone();
            let request = request.clone();
            async move { connection.send_request(&request).await }
        });

        let _headers_frame = server_reader.read_frame(16_384).await.unwrap();

        let mut goaway_payload = Vec::new();
        goaway_payload.extend_from_slice(&0u32.to_be_bytes()); // last_stream_id = 0
        goaway_payload.extend_from_slice(&(ErrorType::NoError as u32).to_be_bytes());
        server_writer
            .write_frame(&Frame::new(FrameType::GoAway, 0, 0, goaway_payload), true)
            .await
            .unwrap();

        let err = request_fut.await.unwrap().unwrap_err();
        assert!(matches!(err, Http2Error::Protocol(_)));
    }

    #[tokio::test]
    async fn malformed_status_fails_only_that_stream_and_rst_streams_it() {
        let (connection, mut server_reader, mut server_writer) = handshake().await;

        let bad_request = Request::get(Url::parse("https://example.com/bad").unwrap(), None);
        let bad_fut = tokio::spawn({
            let connection = connection.clone();
            let request = bad_request.clone();
            async move { connection.send_request(&request).await }
        });

        let headers_frame = server_reader.read_frame(16_384).await.unwrap();
        let bad_stream_id = headers_frame.stream_id;

        let mut encoder = hpack::Encoder::new(4096);
        let block = encoder.encode(&vec![(":status".to_string(), "not-a-number".to_string())]);
        server_writer
            .write_frame(
                &Frame::new(
                    FrameType::Headers,
                    HeadersFlags::END_HEADERS.bits() | HeadersFlags::END_STREAM.bits(),
                    bad_stream_id,
                    block,
                ),
                true,
            )
            .await
            .unwrap();

        let rst = server_reader.read_frame(16_384).await.unwrap();
        assert_eq!(rst.typ, FrameType::ResetStream);
        assert_eq!(rst.stream_id, bad_stream_id);
        assert!(bad_fut.await.unwrap().is_err());

        // The connection itself must still be usable: a second request on the same connection
        // completes normally.
        assert!(!connection.is_closed());
        let good_request = Request::get(Url::parse("https://example.com/good").unwrap(), None);
        let good_fut = tokio::spawn({
            let connection = connection.clone();
            let request = good_request.clone();
            async move { connection.send_request(&request).await }
        });

        let headers_frame = server_reader.read_frame(16_384).await.unwrap();
        let good_stream_id = headers_frame.stream_id;
        assert_ne!(good_stream_id, bad_stream_id);

        let mut encoder = hpack::Encoder::new(4096);
        let block = encoder.encode(&vec![(":status".to_string(), "200".to_string())]);
        server_writer
            .write_frame(
                &Frame::new(
                    FrameType::Headers,
                    HeadersFlags::END_HEADERS.bits() | HeadersFlags::END_STREAM.bits(),
                    good_stream_id,
                    block,
                ),
                true,
            )
            .await
            .unwrap();

        let response = good_fut.await.unwrap().unwrap();
        assert_eq!(response.status(), 200);
    }

    #[tokio::test]
    async fn data_before_headers_fails_only_that_stream() {
        let (connection, mut server_reader, mut server_writer) = handshake().await;

        let request = Request::get(Url::parse("https://example.com/early-data").unwrap(), None);
        let request_fut = tokio::spawn({
            let connection = connection.clone();
            let request = request.clone();
            async move { connection.send_request(&request).await }
        });

        let headers_frame = server_reader.read_frame(16_384).await.unwrap();
        let stream_id = headers_frame.stream_id;

        // Peer sends DATA without ever sending HEADERS first: a stream error, not a connection
        // error (§4.5).
        server_writer
            .write_frame(&Frame::new(FrameType::Data, 0, stream_id, b"oops".to_vec()), true)
            .await
            .unwrap();

        let rst = server_reader.read_frame(16_384).await.unwrap();
        assert_eq!(rst.typ, FrameType::ResetStream);
        assert!(request_fut.await.unwrap().is_err());
        assert!(!connection.is_closed());
    }

    #[tokio::test]
    async fn data_on_an_already_closed_stream_gets_stream_closed_rst() {
        let (connection, mut server_reader, mut server_writer) = handshake().await;

        let request = Request::get(Url::parse("https://example.com/done").unwrap(), None);
        let request_fut = tokio::spawn({
            let connection = connection.clone();
            let request = request.clone();
            async move { connection.send_request(&request).await }
        });

        let headers_frame = server_reader.read_frame(16_384).await.unwrap();
        let stream_id = headers_frame.stream_id;

        let mut encoder = hpack::Encoder::new(4096);
        let block = encoder.encode(&vec![(":status".to_string(), "200".to_string())]);
        server_writer
            .write_frame(
                &Frame::new(
                    FrameType::Headers,
                    HeadersFlags::END_HEADERS.bits() | HeadersFlags::END_STREAM.bits(),
                    stream_id,
                    block,
                ),
                true,
            )
            .await
            .unwrap();

        let response = request_fut.await.unwrap().unwrap();
        assert_eq!(response.status(), 200);

        // The stream is now CLOSED on our side; a further DATA frame naming it is a stream
        // error (RST_STREAM(STREAM_CLOSED)), not silently dropped (§4.5/§9).
        server_writer
            .write_frame(&Frame::new(FrameType::Data, 0, stream_id, b"late".to_vec()), true)
            .await
            .unwrap();

        let rst = server_reader.read_frame(16_384).await.unwrap();
        assert_eq!(rst.typ, FrameType::ResetStream);
        assert_eq!(rst.stream_id, stream_id);
        let code = u32::from_be_bytes(rst.payload[0..4].try_into().unwrap());
        assert_eq!(code, ErrorType::StreamClosed as u32);
        assert!(!connection.is_closed());
    }

    #[tokio::test]
    async fn cancelling_a_request_rst_streams_it_and_keeps_the_connection_alive() {
        let (connection, mut server_reader, _server_writer) = handshake().await;

        let request = Request::get(Url::parse("https://example.com/slow").unwrap(), None);
        let handle = tokio::spawn({
            let connection = connection.clone();
            async move { connection.send_request(&request).await }
        });

        let headers_frame = server_reader.read_frame(16_384).await.unwrap();
        let stream_id = headers_frame.stream_id;

        handle.abort();
        let _ = handle.await;

        let rst = server_reader.read_frame(16_384).await.unwrap();
        assert_eq!(rst.typ, FrameType::ResetStream);
        assert_eq!(rst.stream_id, stream_id);
        assert!(!connection.is_closed());
    }

    #[test]
    fn split_header_block_sets_end_headers_only_on_the_last_frame() {
        let stream_id = NonZeroStreamId::new(1).unwrap();
        let block = vec![0u8; 100];
        let frames = split_header_block(stream_id, block, 40, true);
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].typ, FrameType::Headers);
        assert_ne!(frames[0].flags & HeadersFlags::END_STREAM.bits(), 0);
        assert_eq!(frames[0].flags & HeadersFlags::END_HEADERS.bits(), 0);
        assert_eq!(frames[1].typ, FrameType::Continuation);
        assert_eq!(frames[1].flags & ContinuationFlags::END_HEADERS.bits(), 0);
        assert_eq!(frames[2].typ, FrameType::Continuation);
        assert_ne!(frames[2].flags & ContinuationFlags::END_HEADERS.bits(), 0);
    }
}
