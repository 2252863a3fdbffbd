//! HTTP/2 stream records and the stream manager
//!
//! A stream record carries everything the connection engine needs for one
//! request/response exchange: the RFC 7540 Section 5.1 state, both flow
//! windows, accumulators for the header block and the body, the decoded
//! header list, content-length bookkeeping, and the buffered outbound
//! response body.
//!
//! The manager is the exclusive owner of all stream records. The engine
//! holds stream ids and re-borrows records per frame; nothing points back
//! from a stream to the manager.

use super::error::ErrorCode;
use super::flow_control::StreamFlowControl;
use super::frames::PrioritySpec;
use bytes::{Bytes, BytesMut};
use std::collections::{HashMap, HashSet};

/// Stream ID type
pub type StreamId = u32;

/// Stream state as defined in RFC 7540 Section 5.1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// No frames have been sent or received
    Idle,
    /// PUSH_PROMISE sent (unused by this server, kept for completeness)
    ReservedLocal,
    /// PUSH_PROMISE received
    ReservedRemote,
    /// Both sides can send frames
    Open,
    /// We can no longer send, the peer can
    HalfClosedLocal,
    /// The peer can no longer send, we can
    HalfClosedRemote,
    /// Stream is closed
    Closed,
}

impl StreamState {
    /// Whether we may still send DATA on this stream
    pub fn can_send(&self) -> bool {
        matches!(self, StreamState::Open | StreamState::HalfClosedRemote)
    }

    /// Whether the peer may still send DATA on this stream
    pub fn can_receive(&self) -> bool {
        matches!(self, StreamState::Open | StreamState::HalfClosedLocal)
    }

    /// Whether the stream is closed
    pub fn is_closed(&self) -> bool {
        matches!(self, StreamState::Closed)
    }
}

/// One HTTP/2 stream.
#[derive(Debug)]
pub struct H2Stream {
    id: StreamId,
    state: StreamState,
    flow: StreamFlowControl,
    priority: Option<PrioritySpec>,

    /// Header block fragments accumulated until END_HEADERS
    pub header_accum: BytesMut,
    /// Decoded header list (name, value), wire order
    pub headers: Vec<(String, String)>,
    /// Accumulated request body
    pub body: BytesMut,

    /// Declared content-length, when the request carried one
    pub expected_content_length: Option<u64>,
    /// DATA payload octets received so far (excluding padding)
    pub received_bytes: u64,

    /// The initial header block has been fully received
    pub received_initial_headers: bool,
    /// A trailer block has been received
    pub received_trailers: bool,

    /// Buffered response body awaiting window capacity
    outbound_buffer: Bytes,
    outbound_offset: usize,
    outbound_end_stream: bool,

    /// Peer signalled END_STREAM
    pub received_end_stream: bool,
    /// We signalled END_STREAM
    pub sent_end_stream: bool,
}

impl H2Stream {
    /// Create a stream with the negotiated window sizes
    pub fn new(id: StreamId, send_window: u32, recv_window: u32) -> Self {
        H2Stream {
            id,
            state: StreamState::Idle,
            flow: StreamFlowControl::with_initial_sizes(send_window, recv_window),
            priority: None,
            header_accum: BytesMut::new(),
            headers: Vec::new(),
            body: BytesMut::new(),
            expected_content_length: None,
            received_bytes: 0,
            received_initial_headers: false,
            received_trailers: false,
            outbound_buffer: Bytes::new(),
            outbound_offset: 0,
            outbound_end_stream: false,
            received_end_stream: false,
            sent_end_stream: false,
        }
    }

    /// Stream ID
    pub fn id(&self) -> StreamId {
        self.id
    }

    /// Current state
    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Flow control windows
    pub fn flow(&self) -> &StreamFlowControl {
        &self.flow
    }

    /// Mutable flow control windows
    pub fn flow_mut(&mut self) -> &mut StreamFlowControl {
        &mut self.flow
    }

    /// Stored priority, if any
    pub fn priority(&self) -> Option<&PrioritySpec> {
        self.priority.as_ref()
    }

    /// Store peer-advised priority (parsed, not used for scheduling)
    pub fn set_priority(&mut self, priority: PrioritySpec) {
        self.priority = Some(priority);
    }

    /// Apply the state transition for a received HEADERS frame.
    ///
    /// Trailer acceptance (HEADERS in a state that already saw the initial
    /// block) is decided by the caller; this enforces the raw state table.
    pub fn recv_headers(&mut self, end_stream: bool) -> Result<(), ErrorCode> {
        match self.state {
            StreamState::Idle => {
                self.state = if end_stream {
                    StreamState::HalfClosedRemote
                } else {
                    StreamState::Open
                };
            }
            StreamState::ReservedRemote => {
                self.state = StreamState::HalfClosedLocal;
            }
            StreamState::Open | StreamState::HalfClosedLocal => {
                if end_stream {
                    self.state = match self.state {
                        StreamState::Open => StreamState::HalfClosedRemote,
                        _ => StreamState::Closed,
                    };
                }
            }
            StreamState::HalfClosedRemote | StreamState::Closed => {
                return Err(ErrorCode::StreamClosed);
            }
            StreamState::ReservedLocal => {
                return Err(ErrorCode::ProtocolError);
            }
        }

        if end_stream {
            self.received_end_stream = true;
        }
        Ok(())
    }

    /// Apply the state transition for a received DATA frame
    pub fn recv_data(&mut self, end_stream: bool) -> Result<(), ErrorCode> {
        if !self.state.can_receive() {
            return Err(ErrorCode::StreamClosed);
        }

        if end_stream {
            self.received_end_stream = true;
            self.state = match self.state {
                StreamState::Open => StreamState::HalfClosedRemote,
                StreamState::HalfClosedLocal => StreamState::Closed,
                other => other,
            };
        }
        Ok(())
    }

    /// Apply the state transition for HEADERS we send
    pub fn send_headers(&mut self, end_stream: bool) -> Result<(), ErrorCode> {
        match self.state {
            StreamState::Idle => {
                self.state = if end_stream {
                    StreamState::HalfClosedLocal
                } else {
                    StreamState::Open
                };
            }
            StreamState::ReservedLocal => {
                self.state = StreamState::HalfClosedRemote;
            }
            StreamState::Open | StreamState::HalfClosedRemote => {
                if end_stream {
                    self.state = match self.state {
                        StreamState::Open => StreamState::HalfClosedLocal,
                        _ => StreamState::Closed,
                    };
                }
            }
            _ => return Err(ErrorCode::StreamClosed),
        }

        if end_stream {
            self.sent_end_stream = true;
        }
        Ok(())
    }

    /// Record END_STREAM sent on a DATA frame
    pub fn send_end_stream(&mut self) {
        self.sent_end_stream = true;
        self.state = match self.state {
            StreamState::Open => StreamState::HalfClosedLocal,
            StreamState::HalfClosedRemote => StreamState::Closed,
            other => other,
        };
    }

    /// Force the stream closed (RST_STREAM in either direction)
    pub fn close(&mut self) {
        self.state = StreamState::Closed;
        self.outbound_buffer = Bytes::new();
        self.outbound_offset = 0;
    }

    /// Both directions have finished
    pub fn is_complete(&self) -> bool {
        self.state.is_closed() || (self.received_end_stream && self.sent_end_stream)
    }

    /// Queue a response body for window-paced sending
    pub fn queue_outbound(&mut self, body: Bytes, end_stream: bool) {
        self.outbound_buffer = body;
        self.outbound_offset = 0;
        self.outbound_end_stream = end_stream;
    }

    /// Unsent outbound bytes remaining
    pub fn outbound_remaining(&self) -> usize {
        self.outbound_buffer.len() - self.outbound_offset
    }

    /// Whether END_STREAM is owed once the buffer drains
    pub fn outbound_end_stream(&self) -> bool {
        self.outbound_end_stream
    }

    /// Take up to `max` outbound bytes, advancing the offset.
    ///
    /// Returns the chunk and whether it is the final one.
    pub fn take_outbound(&mut self, max: usize) -> (Bytes, bool) {
        let remaining = self.outbound_remaining();
        let take = remaining.min(max);
        let chunk = self
            .outbound_buffer
            .slice(self.outbound_offset..self.outbound_offset + take);
        self.outbound_offset += take;
        (chunk, self.outbound_remaining() == 0)
    }
}

/// Failure modes when a client opens a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenError {
    /// Client-initiated stream ids must be odd
    EvenStreamId,
    /// New ids must strictly exceed every previously opened client id
    NotMonotonic,
    /// SETTINGS_MAX_CONCURRENT_STREAMS would be exceeded
    RefusedStream,
}

/// Exclusive owner of all streams on one connection.
#[derive(Debug)]
pub struct StreamManager {
    streams: HashMap<StreamId, H2Stream>,
    /// Creation order, for fair revisiting of buffered senders
    order: Vec<StreamId>,
    last_processed_id: StreamId,
    highest_client_id: StreamId,
    closed_ids: HashSet<StreamId>,
    pending_priority: HashMap<StreamId, PrioritySpec>,
    local_initial_window: u32,
    remote_initial_window: u32,
    max_concurrent: u32,
}

impl StreamManager {
    /// Create a manager accepting at most `max_concurrent` open streams
    pub fn new(max_concurrent: u32) -> Self {
        StreamManager {
            streams: HashMap::new(),
            order: Vec::new(),
            last_processed_id: 0,
            highest_client_id: 0,
            closed_ids: HashSet::new(),
            pending_priority: HashMap::new(),
            local_initial_window: super::DEFAULT_INITIAL_WINDOW_SIZE,
            remote_initial_window: super::DEFAULT_INITIAL_WINDOW_SIZE,
            max_concurrent,
        }
    }

    /// Open a stream for a client HEADERS frame.
    ///
    /// Enforces odd parity, strict monotonicity over previously seen client
    /// ids, and the concurrency cap. A stored pending priority (from
    /// PRIORITY on the then-idle stream) is attached on creation. Borrow
    /// the new record afterwards through [`StreamManager::get_mut`].
    pub fn open_client_stream(&mut self, id: StreamId) -> Result<(), OpenError> {
        if id % 2 == 0 {
            return Err(OpenError::EvenStreamId);
        }
        if id <= self.highest_client_id {
            return Err(OpenError::NotMonotonic);
        }
        if self.streams.len() >= self.max_concurrent as usize {
            return Err(OpenError::RefusedStream);
        }

        self.highest_client_id = id;

        let mut stream = H2Stream::new(id, self.remote_initial_window, self.local_initial_window);
        if let Some(priority) = self.pending_priority.remove(&id) {
            stream.set_priority(priority);
        }
        self.streams.insert(id, stream);
        self.order.push(id);

        Ok(())
    }

    /// Borrow a stream
    pub fn get(&self, id: StreamId) -> Option<&H2Stream> {
        self.streams.get(&id)
    }

    /// Mutably borrow a stream
    pub fn get_mut(&mut self, id: StreamId) -> Option<&mut H2Stream> {
        self.streams.get_mut(&id)
    }

    /// Whether this id belongs to a stream that once existed and is gone
    pub fn is_closed_id(&self, id: StreamId) -> bool {
        self.closed_ids.contains(&id)
    }

    /// Whether this client id has never been opened
    pub fn is_idle_client_id(&self, id: StreamId) -> bool {
        id > self.highest_client_id
    }

    /// Destroy a stream and remember its id as closed
    pub fn close_stream(&mut self, id: StreamId) {
        if self.streams.remove(&id).is_some() {
            self.order.retain(|&other| other != id);
        }
        self.closed_ids.insert(id);
    }

    /// Mark an id closed without it ever existing (refused or reset idle)
    pub fn mark_closed(&mut self, id: StreamId) {
        self.closed_ids.insert(id);
        if id % 2 == 1 && id > self.highest_client_id {
            self.highest_client_id = id;
        }
    }

    /// Record a fully processed request stream for GOAWAY reporting
    pub fn record_processed(&mut self, id: StreamId) {
        if id > self.last_processed_id {
            self.last_processed_id = id;
        }
    }

    /// Highest stream id for which processing completed
    pub fn last_processed_id(&self) -> StreamId {
        self.last_processed_id
    }

    /// Highest client stream id seen so far
    pub fn highest_client_id(&self) -> StreamId {
        self.highest_client_id
    }

    /// Store priority for a stream that does not exist yet
    pub fn store_pending_priority(&mut self, id: StreamId, priority: PrioritySpec) {
        self.pending_priority.insert(id, priority);
    }

    /// Number of currently open streams
    pub fn active_count(&self) -> usize {
        self.streams.len()
    }

    /// Stream ids in creation order
    pub fn ids_in_order(&self) -> Vec<StreamId> {
        self.order.clone()
    }

    /// Apply a changed peer SETTINGS_INITIAL_WINDOW_SIZE to every send
    /// window. An overflow on any stream fails the whole operation.
    pub fn set_remote_initial_window(&mut self, new_size: u32) -> Result<(), ()> {
        for stream in self.streams.values_mut() {
            stream
                .flow_mut()
                .send_window_mut()
                .update_initial_size(new_size)
                .map_err(|_| ())?;
        }
        self.remote_initial_window = new_size;
        Ok(())
    }

    /// Local initial window advertised to the peer for new streams
    pub fn local_initial_window(&self) -> u32 {
        self.local_initial_window
    }
}
