//! HTTP/2 connection engine
//!
//! One engine instance drives one accepted connection: preface handshake,
//! SETTINGS exchange, the frame dispatch loop, header-block reassembly
//! across CONTINUATION, request assembly, response emission, and the error
//! policy. The engine runs as a single blocking loop, so each connection
//! is a serial processor: one frame is handled to completion before the
//! next is read, and stream handlers run inline.

use super::codec::{self, FrameBuilder, FrameParser, Parsed, StrippedPayload};
use super::error::{Error, ErrorCode, FrameOutcome, Result};
use super::flow_control::{ConnectionFlowControl, WindowError};
use super::frames::*;
use super::hpack;
use super::settings::Settings;
use super::stream::{OpenError, StreamId, StreamManager};
use super::{CONNECTION_PREFACE, DEFAULT_MAX_CONCURRENT_STREAMS, DEFAULT_MAX_HEADER_LIST_SIZE};
use crate::http::session::{HttpSession, SessionOps};
use crate::router::{Request, Response, SharedRouter};
use bytes::Bytes;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Header names that must not appear in HTTP/2 requests
const CONNECTION_SPECIFIC_HEADERS: [&str; 5] = [
    "connection",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "upgrade",
];

/// Response headers stripped before HPACK encoding; the engine computes
/// framing itself
const HOP_BY_HOP_RESPONSE_HEADERS: [&str; 4] =
    ["connection", "keep-alive", "transfer-encoding", "content-length"];

/// Engine tuning knobs taken from server configuration.
#[derive(Debug, Clone)]
pub struct H2Config {
    /// Settings advertised in the server's initial SETTINGS frame
    pub settings: Settings,
    /// Cap on any single request body
    pub max_body_size: usize,
    /// Read/idle timeout
    pub timeout: Option<Duration>,
}

impl Default for H2Config {
    fn default() -> Self {
        H2Config {
            settings: server_settings(),
            max_body_size: 1024 * 1024,
            timeout: Some(Duration::from_secs(30)),
        }
    }
}

/// The six parameters this server always advertises.
pub fn server_settings() -> Settings {
    Settings {
        header_table_size: Some(super::DEFAULT_HEADER_TABLE_SIZE),
        enable_push: Some(false),
        max_concurrent_streams: Some(DEFAULT_MAX_CONCURRENT_STREAMS),
        initial_window_size: Some(super::DEFAULT_INITIAL_WINDOW_SIZE),
        max_frame_size: Some(super::DEFAULT_MAX_FRAME_SIZE),
        max_header_list_size: Some(DEFAULT_MAX_HEADER_LIST_SIZE),
    }
}

/// In-progress header block: between a HEADERS frame without END_HEADERS
/// and the CONTINUATION that finishes the block, nothing else may arrive.
struct ContinuationGuard {
    stream_id: StreamId,
    end_stream: bool,
    is_trailers: bool,
}

/// Whether the dispatch loop keeps running after a frame
enum LoopState {
    Continue,
    Shutdown,
}

/// Server-side HTTP/2 connection engine.
pub struct H2Connection<S: SessionOps> {
    session: HttpSession<S>,
    parser: FrameParser,
    streams: StreamManager,
    conn_flow: ConnectionFlowControl,
    hpack_encoder: hpack::Encoder,
    hpack_decoder: hpack::Decoder,
    local_settings: Settings,
    peer_settings: Settings,
    continuation: Option<ContinuationGuard>,
    goaway_sent: bool,
    goaway_received: bool,
    max_body_size: usize,
    router: SharedRouter,
}

impl<S: SessionOps> H2Connection<S> {
    /// Create an engine over an accepted session
    pub fn new(session: S, router: SharedRouter, config: H2Config) -> Self {
        let mut session = HttpSession::new(session);
        session.set_timeout(config.timeout);

        let mut parser = FrameParser::new();
        parser.set_max_frame_size(config.settings.get_max_frame_size());

        let max_concurrent = config
            .settings
            .get_max_concurrent_streams()
            .unwrap_or(DEFAULT_MAX_CONCURRENT_STREAMS);

        H2Connection {
            session,
            parser,
            streams: StreamManager::new(max_concurrent),
            conn_flow: ConnectionFlowControl::new(),
            hpack_encoder: hpack::Encoder::new(),
            hpack_decoder: hpack::Decoder::new(config.settings.get_header_table_size() as usize),
            local_settings: config.settings,
            peer_settings: Settings::new(),
            continuation: None,
            goaway_sent: false,
            goaway_received: false,
            max_body_size: config.max_body_size,
            router,
        }
    }

    /// Serve the connection until it terminates.
    ///
    /// `initial` carries bytes the dispatcher already consumed from the
    /// socket (the sniffed preface on cleartext). `alpn_h2` selects when
    /// the server SETTINGS frame goes out: immediately after an ALPN `h2`
    /// negotiation, or only once the cleartext preface has been validated.
    pub fn run(&mut self, initial: &[u8], alpn_h2: bool) -> Result<()> {
        if alpn_h2 {
            self.send_initial_settings()?;
        }

        if !self.read_preface(initial)? {
            // Preface mismatch: GOAWAY PROTOCOL_ERROR with last_stream_id 0
            self.send_goaway(ErrorCode::ProtocolError, "invalid connection preface")?;
            return Ok(());
        }

        if !alpn_h2 {
            self.send_initial_settings()?;
        }

        let mut buf = [0u8; 16 * 1024];
        loop {
            match self.drain_frames()? {
                LoopState::Shutdown => return Ok(()),
                LoopState::Continue => {}
            }

            let n = match self.session.read(&mut buf) {
                Ok(n) => n,
                Err(crate::http::Error::Timeout) => {
                    debug!("connection idle timeout");
                    self.send_goaway(ErrorCode::NoError, "idle timeout")?;
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            };

            if n == 0 {
                trace!("peer closed connection");
                if !self.goaway_sent {
                    self.send_goaway(ErrorCode::NoError, "")?;
                }
                return Ok(());
            }

            self.parser.push(&buf[..n]);
        }
    }

    /// Validate the 24-octet client preface, buffering reads as needed.
    ///
    /// Leftover bytes beyond the preface are fed into the frame parser.
    fn read_preface(&mut self, initial: &[u8]) -> Result<bool> {
        let mut pending = initial.to_vec();
        let mut buf = [0u8; 4096];

        while pending.len() < CONNECTION_PREFACE.len() {
            let n = self.session.read(&mut buf).map_err(Error::Http)?;
            if n == 0 {
                return Err(Error::MissingPreface);
            }
            pending.extend_from_slice(&buf[..n]);
        }

        if &pending[..CONNECTION_PREFACE.len()] != CONNECTION_PREFACE {
            return Ok(false);
        }

        self.parser.push(&pending[CONNECTION_PREFACE.len()..]);
        Ok(true)
    }

    fn send_initial_settings(&mut self) -> Result<()> {
        let frame = FrameBuilder::settings(&self.local_settings);
        self.session.write_all(&frame)?;
        Ok(())
    }

    /// Process every complete frame currently buffered.
    fn drain_frames(&mut self) -> Result<LoopState> {
        loop {
            match self.parser.next_frame() {
                Parsed::NeedMore => return Ok(LoopState::Continue),
                Parsed::Error(code, reason) => {
                    self.send_goaway(code, &reason)?;
                    return Ok(LoopState::Shutdown);
                }
                Parsed::Frame(frame) => {
                    let outcome = self.handle_frame(frame)?;
                    match outcome {
                        FrameOutcome::Continue => {}
                        FrameOutcome::StreamError(id, code) => {
                            debug!(stream_id = id, code = %code, "stream error");
                            self.send_rst_stream(id, code)?;
                        }
                        FrameOutcome::ConnectionError(code, reason) => {
                            debug!(code = %code, reason = %reason, "connection error");
                            self.send_goaway(code, &reason)?;
                            return Ok(LoopState::Shutdown);
                        }
                    }
                }
            }
        }
    }

    /// Dispatch one frame after the CONTINUATION-atomicity check.
    fn handle_frame(&mut self, frame: Frame) -> Result<FrameOutcome> {
        trace!(
            raw_type = frame.raw_type,
            stream_id = frame.stream_id,
            len = frame.payload_len(),
            "frame received"
        );

        if let Some(guard) = &self.continuation {
            let is_expected = frame.frame_type() == Some(FrameType::Continuation)
                && frame.stream_id == guard.stream_id;
            if !is_expected {
                return Ok(FrameOutcome::conn(
                    ErrorCode::ProtocolError,
                    "expected CONTINUATION for the open header block",
                ));
            }
        }

        match frame.frame_type() {
            Some(FrameType::Data) => self.handle_data(frame),
            Some(FrameType::Headers) => self.handle_headers(frame),
            Some(FrameType::Priority) => Ok(self.handle_priority(&frame)),
            Some(FrameType::RstStream) => Ok(self.handle_rst_stream(&frame)),
            Some(FrameType::Settings) => self.handle_settings(frame),
            Some(FrameType::PushPromise) => Ok(FrameOutcome::conn(
                ErrorCode::ProtocolError,
                "client sent PUSH_PROMISE",
            )),
            Some(FrameType::Ping) => self.handle_ping(&frame),
            Some(FrameType::Goaway) => Ok(self.handle_goaway(&frame)),
            Some(FrameType::WindowUpdate) => self.handle_window_update(&frame),
            Some(FrameType::Continuation) => self.handle_continuation(frame),
            None => {
                // Unknown frame types are accepted and discarded
                trace!(raw_type = frame.raw_type, "discarding unknown frame type");
                Ok(FrameOutcome::Continue)
            }
        }
    }

    fn handle_headers(&mut self, frame: Frame) -> Result<FrameOutcome> {
        let stream_id = frame.stream_id;
        if stream_id == 0 {
            return Ok(FrameOutcome::conn(
                ErrorCode::ProtocolError,
                "HEADERS on stream 0",
            ));
        }
        if stream_id % 2 == 0 {
            return Ok(FrameOutcome::conn(
                ErrorCode::ProtocolError,
                "client-initiated stream id must be odd",
            ));
        }

        let end_stream = frame.flags.is_end_stream();
        let end_headers = frame.flags.is_end_headers();

        let StrippedPayload { data, priority } =
            match codec::strip_padding(frame.payload, frame.flags, true) {
                Ok(stripped) => stripped,
                Err((code, reason)) => return Ok(FrameOutcome::ConnectionError(code, reason)),
            };

        if let Some(spec) = priority {
            if spec.stream_dependency == stream_id {
                return Ok(FrameOutcome::StreamError(stream_id, ErrorCode::ProtocolError));
            }
        }

        if self.streams.get(stream_id).is_some() {
            // A later header block on a live stream is a trailer block
            return self.begin_trailer_block(stream_id, data, end_stream, end_headers);
        }

        if self.streams.is_closed_id(stream_id) {
            return Ok(FrameOutcome::StreamError(stream_id, ErrorCode::StreamClosed));
        }

        if self.goaway_sent {
            // Draining: no new streams after our GOAWAY
            self.streams.mark_closed(stream_id);
            return Ok(FrameOutcome::StreamError(stream_id, ErrorCode::RefusedStream));
        }

        match self.streams.open_client_stream(stream_id) {
            Ok(()) => {}
            Err(OpenError::EvenStreamId) => {
                return Ok(FrameOutcome::conn(
                    ErrorCode::ProtocolError,
                    "client-initiated stream id must be odd",
                ))
            }
            Err(OpenError::NotMonotonic) => {
                return Ok(FrameOutcome::conn(
                    ErrorCode::ProtocolError,
                    "new stream id does not exceed previous ids",
                ))
            }
            Err(OpenError::RefusedStream) => {
                self.streams.mark_closed(stream_id);
                return Ok(FrameOutcome::StreamError(stream_id, ErrorCode::RefusedStream));
            }
        }

        let stream = self.streams.get_mut(stream_id).expect("stream just opened");
        if let Some(spec) = priority {
            stream.set_priority(spec);
        }
        if let Err(code) = stream.recv_headers(end_stream) {
            return Ok(FrameOutcome::StreamError(stream_id, code));
        }
        stream.header_accum.extend_from_slice(&data);

        if let Some(outcome) = self.check_header_block_size(stream_id) {
            return Ok(outcome);
        }

        if end_headers {
            self.finish_header_block(stream_id, end_stream, false)
        } else {
            self.continuation = Some(ContinuationGuard {
                stream_id,
                end_stream,
                is_trailers: false,
            });
            Ok(FrameOutcome::Continue)
        }
    }

    /// HEADERS on an existing stream: only legal as a trailer block.
    fn begin_trailer_block(
        &mut self,
        stream_id: StreamId,
        data: Bytes,
        end_stream: bool,
        end_headers: bool,
    ) -> Result<FrameOutcome> {
        let stream = self.streams.get_mut(stream_id).expect("caller checked presence");

        if !stream.received_initial_headers || stream.received_end_stream {
            return Ok(FrameOutcome::StreamError(stream_id, ErrorCode::StreamClosed));
        }
        if !end_stream {
            // Trailers must end the stream (RFC 7540 Section 8.1)
            return Ok(FrameOutcome::StreamError(stream_id, ErrorCode::ProtocolError));
        }
        if let Err(code) = stream.recv_headers(end_stream) {
            return Ok(FrameOutcome::StreamError(stream_id, code));
        }
        stream.header_accum.extend_from_slice(&data);

        if let Some(outcome) = self.check_header_block_size(stream_id) {
            return Ok(outcome);
        }

        if end_headers {
            self.finish_header_block(stream_id, end_stream, true)
        } else {
            self.continuation = Some(ContinuationGuard {
                stream_id,
                end_stream,
                is_trailers: true,
            });
            Ok(FrameOutcome::Continue)
        }
    }

    fn handle_continuation(&mut self, frame: Frame) -> Result<FrameOutcome> {
        let guard = match self.continuation.take() {
            Some(guard) => guard,
            None => {
                return Ok(FrameOutcome::conn(
                    ErrorCode::ProtocolError,
                    "CONTINUATION without an open header block",
                ))
            }
        };

        // Stream match was verified by the guard check in handle_frame
        let stream = match self.streams.get_mut(guard.stream_id) {
            Some(stream) => stream,
            None => {
                return Ok(FrameOutcome::conn(
                    ErrorCode::ProtocolError,
                    "CONTINUATION for a vanished stream",
                ))
            }
        };
        stream.header_accum.extend_from_slice(&frame.payload);

        if let Some(outcome) = self.check_header_block_size(guard.stream_id) {
            return Ok(outcome);
        }

        if frame.flags.is_end_headers() {
            self.finish_header_block(guard.stream_id, guard.end_stream, guard.is_trailers)
        } else {
            self.continuation = Some(guard);
            Ok(FrameOutcome::Continue)
        }
    }

    /// Compare the accumulated block against SETTINGS_MAX_HEADER_LIST_SIZE.
    fn check_header_block_size(&mut self, stream_id: StreamId) -> Option<FrameOutcome> {
        let limit = self
            .local_settings
            .get_max_header_list_size()
            .unwrap_or(DEFAULT_MAX_HEADER_LIST_SIZE) as usize;
        let accumulated = self.streams.get(stream_id).map_or(0, |s| s.header_accum.len());
        if accumulated > limit {
            self.continuation = None;
            Some(FrameOutcome::conn(
                ErrorCode::CompressionError,
                "header block exceeds SETTINGS_MAX_HEADER_LIST_SIZE",
            ))
        } else {
            None
        }
    }

    /// END_HEADERS seen: decode, validate, and maybe dispatch the request.
    fn finish_header_block(
        &mut self,
        stream_id: StreamId,
        end_stream: bool,
        is_trailers: bool,
    ) -> Result<FrameOutcome> {
        self.continuation = None;

        let block = match self.streams.get_mut(stream_id) {
            Some(stream) => stream.header_accum.split().freeze(),
            None => return Ok(FrameOutcome::Continue),
        };

        let header_list = match self.hpack_decoder.decode(&block) {
            Ok(list) => list,
            Err(e) => {
                return Ok(FrameOutcome::conn(ErrorCode::CompressionError, e.to_string()))
            }
        };

        if is_trailers {
            if let Err(reason) = validate_trailers(&header_list) {
                debug!(stream_id, reason, "trailer validation failed");
                return Ok(FrameOutcome::StreamError(stream_id, ErrorCode::ProtocolError));
            }
            let stream = self.streams.get_mut(stream_id).expect("stream present");
            stream.received_trailers = true;
            // Trailer fields are validated but not forwarded to handlers
        } else {
            if let Err(reason) = validate_request_headers(&header_list) {
                debug!(stream_id, reason, "request header validation failed");
                return Ok(FrameOutcome::StreamError(stream_id, ErrorCode::ProtocolError));
            }
            let expected = match content_length_of(&header_list) {
                Ok(expected) => expected,
                Err(reason) => {
                    debug!(stream_id, reason, "content-length rejected");
                    return Ok(FrameOutcome::StreamError(stream_id, ErrorCode::ProtocolError));
                }
            };
            let stream = self.streams.get_mut(stream_id).expect("stream present");
            stream.headers = header_list;
            stream.received_initial_headers = true;
            stream.expected_content_length = expected;
        }

        if end_stream {
            let stream = self.streams.get_mut(stream_id).expect("stream present");
            if let Some(expected) = stream.expected_content_length {
                if stream.received_bytes != expected {
                    return Ok(FrameOutcome::StreamError(stream_id, ErrorCode::ProtocolError));
                }
            }
            return self.dispatch_request(stream_id);
        }

        Ok(FrameOutcome::Continue)
    }

    fn handle_data(&mut self, frame: Frame) -> Result<FrameOutcome> {
        let stream_id = frame.stream_id;
        if stream_id == 0 {
            return Ok(FrameOutcome::conn(ErrorCode::ProtocolError, "DATA on stream 0"));
        }

        // Every payload octet, padding included, debits both receive
        // windows.
        let flow_len = frame.payload.len();
        if (flow_len as i64) > self.conn_flow.recv_window().size() {
            return Ok(FrameOutcome::conn(
                ErrorCode::FlowControlError,
                "DATA overran the connection receive window",
            ));
        }
        self.conn_flow.recv_window_mut().debit(flow_len);
        // The full payload is restored immediately: the connection window
        // never throttles body delivery, only per-stream windows do
        self.replenish_connection_window(flow_len)?;

        if self.streams.get(stream_id).is_none() {
            if self.streams.is_closed_id(stream_id) {
                return Ok(FrameOutcome::StreamError(stream_id, ErrorCode::StreamClosed));
            }
            return Ok(FrameOutcome::conn(ErrorCode::ProtocolError, "DATA on idle stream"));
        }

        let end_stream = frame.flags.is_end_stream();
        let flags = frame.flags;

        let (stream_window_ok, can_receive) = {
            let stream = self.streams.get(stream_id).expect("checked above");
            (
                (flow_len as i64) <= stream.flow().recv_window().size(),
                stream.state().can_receive(),
            )
        };
        if !stream_window_ok {
            return Ok(FrameOutcome::StreamError(stream_id, ErrorCode::FlowControlError));
        }
        if !can_receive {
            return Ok(FrameOutcome::StreamError(stream_id, ErrorCode::StreamClosed));
        }

        let data = match codec::strip_padding(frame.payload, flags, false) {
            Ok(stripped) => stripped.data,
            Err((code, reason)) => return Ok(FrameOutcome::ConnectionError(code, reason)),
        };

        {
            let max_body_size = self.max_body_size;
            let stream = self.streams.get_mut(stream_id).expect("checked above");
            stream.flow_mut().recv_window_mut().debit(flow_len);

            if stream.body.len() + data.len() > max_body_size {
                return Ok(FrameOutcome::StreamError(stream_id, ErrorCode::RefusedStream));
            }

            stream.received_bytes += data.len() as u64;
            if let Some(expected) = stream.expected_content_length {
                if stream.received_bytes > expected {
                    return Ok(FrameOutcome::StreamError(stream_id, ErrorCode::ProtocolError));
                }
            }

            stream.body.extend_from_slice(&data);
            if let Err(code) = stream.recv_data(end_stream) {
                return Ok(FrameOutcome::StreamError(stream_id, code));
            }
        }

        // Per-stream replenishment: restore the window while the stream
        // still expects more DATA, so the peer is never blocked while the
        // handler consumes the body
        if flow_len > 0 && !end_stream {
            let update =
                FrameBuilder::window_update(&WindowUpdateFrame::new(stream_id, flow_len as u32));
            self.session.write_all(&update)?;
            if let Some(stream) = self.streams.get_mut(stream_id) {
                let _ = stream.flow_mut().recv_window_mut().credit(flow_len as u32);
            }
        }

        if end_stream {
            let stream = self.streams.get_mut(stream_id).expect("checked above");
            if let Some(expected) = stream.expected_content_length {
                if stream.received_bytes != expected {
                    return Ok(FrameOutcome::StreamError(stream_id, ErrorCode::ProtocolError));
                }
            }
            return self.dispatch_request(stream_id);
        }

        Ok(FrameOutcome::Continue)
    }

    fn replenish_connection_window(&mut self, amount: usize) -> Result<()> {
        if amount == 0 {
            return Ok(());
        }
        let frame = FrameBuilder::window_update(&WindowUpdateFrame::new(0, amount as u32));
        self.session.write_all(&frame)?;
        let _ = self.conn_flow.recv_window_mut().credit(amount as u32);
        Ok(())
    }

    fn handle_priority(&mut self, frame: &Frame) -> FrameOutcome {
        let stream_id = frame.stream_id;
        if stream_id == 0 {
            return FrameOutcome::conn(ErrorCode::ProtocolError, "PRIORITY on stream 0");
        }

        let spec = match PrioritySpec::parse(&frame.payload) {
            Some(spec) => spec,
            None => {
                return FrameOutcome::conn(ErrorCode::FrameSizeError, "short PRIORITY payload")
            }
        };

        if spec.stream_dependency == stream_id {
            return FrameOutcome::StreamError(stream_id, ErrorCode::ProtocolError);
        }

        if let Some(stream) = self.streams.get_mut(stream_id) {
            stream.set_priority(spec);
        } else if !self.streams.is_closed_id(stream_id) {
            // PRIORITY on an idle stream stores state without creating the
            // stream or debiting concurrency
            self.streams.store_pending_priority(stream_id, spec);
        }

        FrameOutcome::Continue
    }

    fn handle_rst_stream(&mut self, frame: &Frame) -> FrameOutcome {
        let stream_id = frame.stream_id;
        if stream_id == 0 {
            return FrameOutcome::conn(ErrorCode::ProtocolError, "RST_STREAM on stream 0");
        }

        let code = u32::from_be_bytes([
            frame.payload[0],
            frame.payload[1],
            frame.payload[2],
            frame.payload[3],
        ]);
        debug!(
            stream_id,
            code = %ErrorCode::from_u32(code).map(|c| c.name()).unwrap_or("unknown"),
            "peer reset stream"
        );

        if self.streams.get(stream_id).is_some() {
            // Cancellation: discard the stream and any buffered response
            self.streams.close_stream(stream_id);
        } else if !self.streams.is_closed_id(stream_id) {
            // Reset of a never-seen stream: accept and remember the id
            self.streams.mark_closed(stream_id);
        }
        // RST_STREAM on an already-closed stream is ignored

        FrameOutcome::Continue
    }

    fn handle_settings(&mut self, frame: Frame) -> Result<FrameOutcome> {
        if frame.stream_id != 0 {
            return Ok(FrameOutcome::conn(
                ErrorCode::ProtocolError,
                "SETTINGS on a non-zero stream",
            ));
        }

        if frame.flags.is_ack() {
            if !frame.payload.is_empty() {
                return Ok(FrameOutcome::conn(
                    ErrorCode::FrameSizeError,
                    "SETTINGS ACK with a payload",
                ));
            }
            trace!("peer acknowledged our settings");
            return Ok(FrameOutcome::Continue);
        }

        let incoming = match Settings::parse_payload(&frame.payload) {
            Ok(settings) => settings,
            Err(e) => {
                let code = Settings::rejection_code(&e);
                return Ok(FrameOutcome::ConnectionError(code, e.to_string()));
            }
        };

        if let Some(new_window) = incoming.initial_window_size {
            if self.streams.set_remote_initial_window(new_window).is_err() {
                return Ok(FrameOutcome::conn(
                    ErrorCode::FlowControlError,
                    "INITIAL_WINDOW_SIZE change overflows a stream window",
                ));
            }
        }

        self.peer_settings.merge(&incoming);
        self.session.write_all(&FrameBuilder::settings_ack())?;

        // Shrunken windows may have re-opened, or frame size grown
        self.pump_all()?;

        Ok(FrameOutcome::Continue)
    }

    fn handle_ping(&mut self, frame: &Frame) -> Result<FrameOutcome> {
        if frame.stream_id != 0 {
            return Ok(FrameOutcome::conn(
                ErrorCode::ProtocolError,
                "PING on a non-zero stream",
            ));
        }
        if frame.flags.is_ack() {
            return Ok(FrameOutcome::Continue);
        }

        let mut data = [0u8; 8];
        data.copy_from_slice(&frame.payload[..8]);
        let pong = FrameBuilder::ping(&PingFrame::ack(data));
        self.session.write_all(&pong)?;
        Ok(FrameOutcome::Continue)
    }

    fn handle_goaway(&mut self, frame: &Frame) -> FrameOutcome {
        if frame.stream_id != 0 {
            return FrameOutcome::conn(ErrorCode::ProtocolError, "GOAWAY on a non-zero stream");
        }

        let last_stream_id = u32::from_be_bytes([
            frame.payload[0],
            frame.payload[1],
            frame.payload[2],
            frame.payload[3],
        ]) & 0x7FFF_FFFF;
        let code = u32::from_be_bytes([
            frame.payload[4],
            frame.payload[5],
            frame.payload[6],
            frame.payload[7],
        ]);

        debug!(
            last_stream_id,
            code = %ErrorCode::from_u32(code).map(|c| c.name()).unwrap_or("unknown"),
            "peer sent GOAWAY"
        );
        // Existing streams drain; new ones are refused at open time
        self.goaway_received = true;
        FrameOutcome::Continue
    }

    fn handle_window_update(&mut self, frame: &Frame) -> Result<FrameOutcome> {
        let increment = u32::from_be_bytes([
            frame.payload[0],
            frame.payload[1],
            frame.payload[2],
            frame.payload[3],
        ]) & 0x7FFF_FFFF;
        let stream_id = frame.stream_id;

        if stream_id == 0 {
            match self.conn_flow.send_window_mut().credit(increment) {
                Ok(()) => {
                    // Revisit every stream with buffered data, in
                    // creation order
                    self.pump_all()?;
                    Ok(FrameOutcome::Continue)
                }
                Err(WindowError::ZeroIncrement) => Ok(FrameOutcome::conn(
                    ErrorCode::ProtocolError,
                    "WINDOW_UPDATE with zero increment",
                )),
                Err(WindowError::Overflow) => Ok(FrameOutcome::conn(
                    ErrorCode::FlowControlError,
                    "connection send window overflow",
                )),
            }
        } else if let Some(stream) = self.streams.get_mut(stream_id) {
            match stream.flow_mut().send_window_mut().credit(increment) {
                Ok(()) => {
                    self.pump_stream(stream_id)?;
                    Ok(FrameOutcome::Continue)
                }
                Err(WindowError::ZeroIncrement) => {
                    Ok(FrameOutcome::StreamError(stream_id, ErrorCode::ProtocolError))
                }
                Err(WindowError::Overflow) => {
                    Ok(FrameOutcome::StreamError(stream_id, ErrorCode::FlowControlError))
                }
            }
        } else if self.streams.is_closed_id(stream_id) {
            // Late update for a finished stream
            Ok(FrameOutcome::Continue)
        } else {
            Ok(FrameOutcome::conn(
                ErrorCode::ProtocolError,
                "WINDOW_UPDATE on idle stream",
            ))
        }
    }

    /// Build the request record and emit the routed response.
    fn dispatch_request(&mut self, stream_id: StreamId) -> Result<FrameOutcome> {
        let request = {
            let stream = self.streams.get_mut(stream_id).expect("stream present");

            let mut method = String::new();
            let mut target = String::new();
            let mut headers = crate::http::Headers::new();
            for (name, value) in &stream.headers {
                match name.as_str() {
                    ":method" => method = value.clone(),
                    ":path" => target = value.clone(),
                    ":scheme" | ":authority" => {}
                    _ => headers.insert(name.clone(), value.clone()),
                }
            }

            let (path, query) = match target.split_once('?') {
                Some((path, query)) => (path.to_string(), Some(query.to_string())),
                None => (target, None),
            };

            Request {
                method,
                path,
                query,
                headers,
                body: stream.body.split().freeze(),
            }
        };

        self.streams.record_processed(stream_id);

        debug!(
            stream_id,
            method = %request.method,
            path = %request.path,
            "dispatching request"
        );

        let router = self.router.clone();
        let response = match catch_unwind(AssertUnwindSafe(|| router.route(&request))) {
            Ok(response) => response,
            Err(_) => {
                warn!(stream_id, "handler panicked, responding 500");
                Response::new(500)
            }
        };

        self.send_response(stream_id, response)?;
        Ok(FrameOutcome::Continue)
    }

    /// Emit response HEADERS (and queue DATA) for a stream.
    fn send_response(&mut self, stream_id: StreamId, response: Response) -> Result<()> {
        let mut header_list: Vec<(String, String)> =
            vec![(":status".to_string(), response.status.to_string())];

        for (name, value) in response.headers.iter() {
            let lower = name.to_ascii_lowercase();
            if HOP_BY_HOP_RESPONSE_HEADERS.contains(&lower.as_str()) {
                continue;
            }
            header_list.push((lower, value.to_string()));
        }
        if !response.body.is_empty() {
            header_list.push(("content-length".to_string(), response.body.len().to_string()));
        }

        let block = Bytes::from(self.hpack_encoder.encode(&header_list));
        let end_stream = response.body.is_empty();

        let max_frame = self.peer_settings.get_max_frame_size() as usize;
        if block.len() <= max_frame {
            let frame = HeadersFrame::new(stream_id, block, end_stream, true);
            self.session.write_all(&FrameBuilder::headers(&frame))?;
        } else {
            // Oversized header block: HEADERS plus CONTINUATION frames
            let first = block.slice(..max_frame);
            let frame = HeadersFrame::new(stream_id, first, end_stream, false);
            self.session.write_all(&FrameBuilder::headers(&frame))?;

            let mut offset = max_frame;
            while offset < block.len() {
                let end = (offset + max_frame).min(block.len());
                let continuation = ContinuationFrame {
                    stream_id,
                    header_block: block.slice(offset..end),
                    end_headers: end == block.len(),
                };
                self.session.write_all(&FrameBuilder::continuation(&continuation))?;
                offset = end;
            }
        }

        if let Some(stream) = self.streams.get_mut(stream_id) {
            let _ = stream.send_headers(end_stream);
            if !end_stream {
                stream.queue_outbound(response.body, true);
            }
        }

        if end_stream {
            self.finish_if_complete(stream_id);
        } else {
            self.pump_stream(stream_id)?;
        }
        Ok(())
    }

    /// Drain one stream's outbound buffer as far as the windows allow.
    ///
    /// Chunk size is min(peer max frame size, stream window, connection
    /// window); END_STREAM rides only on the final chunk.
    fn pump_stream(&mut self, stream_id: StreamId) -> Result<()> {
        loop {
            let max_frame = self.peer_settings.get_max_frame_size() as usize;
            let conn_available = self.conn_flow.send_window().available();

            let (chunk, end_stream) = {
                let stream = match self.streams.get_mut(stream_id) {
                    Some(stream) => stream,
                    None => return Ok(()),
                };

                let remaining = stream.outbound_remaining();
                if remaining == 0 {
                    break;
                }

                let stream_available = stream.flow().send_window().available();
                let budget = max_frame.min(stream_available).min(conn_available);
                if budget == 0 {
                    return Ok(());
                }

                let (chunk, is_last) = stream.take_outbound(budget);
                let end_stream = is_last && stream.outbound_end_stream();

                stream.flow_mut().send_window_mut().debit(chunk.len());
                if end_stream {
                    stream.send_end_stream();
                }
                (chunk, end_stream)
            };

            self.conn_flow.send_window_mut().debit(chunk.len());

            let frame = DataFrame::new(stream_id, chunk, end_stream);
            self.session.write_all(&FrameBuilder::data(&frame))?;

            if end_stream {
                break;
            }
        }

        self.finish_if_complete(stream_id);
        Ok(())
    }

    /// Revisit every stream with buffered outbound data, in insertion order.
    fn pump_all(&mut self) -> Result<()> {
        for stream_id in self.streams.ids_in_order() {
            self.pump_stream(stream_id)?;
        }
        Ok(())
    }

    /// Destroy a stream once both directions have finished.
    fn finish_if_complete(&mut self, stream_id: StreamId) {
        if let Some(stream) = self.streams.get(stream_id) {
            if stream.is_complete() {
                self.streams.close_stream(stream_id);
            }
        }
    }

    fn send_rst_stream(&mut self, stream_id: StreamId, code: ErrorCode) -> Result<()> {
        let frame = RstStreamFrame {
            stream_id,
            error_code: code,
        };
        self.session.write_all(&FrameBuilder::rst_stream(&frame))?;
        self.streams.close_stream(stream_id);
        Ok(())
    }

    fn send_goaway(&mut self, code: ErrorCode, reason: &str) -> Result<()> {
        if self.goaway_sent {
            return Ok(());
        }
        self.goaway_sent = true;
        let frame = GoawayFrame::new(
            self.streams.last_processed_id(),
            code,
            Bytes::copy_from_slice(reason.as_bytes()),
        );
        self.session.write_all(&FrameBuilder::goaway(&frame))?;
        Ok(())
    }
}

/// Validate a decoded request header list (RFC 7540 Section 8.1.2).
fn validate_request_headers(headers: &[(String, String)]) -> std::result::Result<(), &'static str> {
    let mut method = None;
    let mut scheme = None;
    let mut path = None;
    let mut authority: Option<&str> = None;
    let mut seen_regular = false;

    for (name, value) in headers {
        if name.chars().any(|c| c.is_ascii_uppercase()) {
            return Err("header name contains uppercase characters");
        }

        if let Some(pseudo) = name.strip_prefix(':') {
            if seen_regular {
                return Err("pseudo-header after a regular header");
            }
            match pseudo {
                "method" => {
                    if method.replace(value.as_str()).is_some() {
                        return Err("duplicate :method");
                    }
                }
                "scheme" => {
                    if scheme.replace(value.as_str()).is_some() {
                        return Err("duplicate :scheme");
                    }
                }
                "path" => {
                    if path.replace(value.as_str()).is_some() {
                        return Err("duplicate :path");
                    }
                }
                "authority" => {
                    if authority.replace(value.as_str()).is_some() {
                        return Err("duplicate :authority");
                    }
                }
                _ => return Err("unknown or response-only pseudo-header in request"),
            }
        } else {
            seen_regular = true;
            if CONNECTION_SPECIFIC_HEADERS.contains(&name.as_str()) {
                return Err("connection-specific header in HTTP/2 request");
            }
            if name == "te" && value != "trailers" {
                return Err("te header with a value other than trailers");
            }
        }
    }

    if method.is_none() {
        return Err("missing :method");
    }
    if scheme.is_none() {
        return Err("missing :scheme");
    }
    match path {
        None => return Err("missing :path"),
        Some("") => return Err("empty :path"),
        Some(_) => {}
    }

    Ok(())
}

/// Validate a trailer header list: regular fields only.
fn validate_trailers(headers: &[(String, String)]) -> std::result::Result<(), &'static str> {
    for (name, value) in headers {
        if name.starts_with(':') {
            return Err("pseudo-header in trailers");
        }
        if name.chars().any(|c| c.is_ascii_uppercase()) {
            return Err("header name contains uppercase characters");
        }
        if CONNECTION_SPECIFIC_HEADERS.contains(&name.as_str()) {
            return Err("connection-specific header in trailers");
        }
        if name == "te" && value != "trailers" {
            return Err("te header with a value other than trailers");
        }
    }
    Ok(())
}

/// Extract the declared content length, tolerating equal repeats.
fn content_length_of(
    headers: &[(String, String)],
) -> std::result::Result<Option<u64>, &'static str> {
    let mut expected: Option<u64> = None;

    for (name, value) in headers {
        if name == "content-length" {
            let parsed: u64 = value.parse().map_err(|_| "unparsable content-length")?;
            match expected {
                None => expected = Some(parsed),
                Some(previous) if previous == parsed => {}
                Some(_) => return Err("conflicting content-length values"),
            }
        }
    }

    Ok(expected)
}
