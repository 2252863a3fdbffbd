//! HTTP/2 protocol engine
//!
//! Server-side HTTP/2 per RFC 7540 with in-tree HPACK (RFC 7541). The
//! module split follows the protocol layers:
//!
//! - [`frames`]: frame model (types, flags, typed frames)
//! - [`codec`]: wire parsing and serialization of frames
//! - [`hpack`]: header compression
//! - [`stream`]: per-stream state machine and the stream manager
//! - [`flow_control`]: connection- and stream-level windows
//! - [`settings`]: SETTINGS parameters
//! - [`connection`]: the per-connection engine tying it all together

pub mod codec;
pub mod connection;
pub mod error;
pub mod flow_control;
pub mod frames;
pub mod hpack;
pub mod settings;
pub mod stream;

pub use connection::{server_settings, H2Config, H2Connection};
pub use error::{Error, ErrorCode, FrameOutcome, Result};
pub use frames::{Frame, FrameFlags, FrameType};
pub use settings::Settings;
pub use stream::{H2Stream, StreamId, StreamManager, StreamState};

/// HTTP/2 connection preface that must be sent by clients
///
/// From RFC 7540 Section 3.5:
/// "PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n"
pub const CONNECTION_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Default initial window size (65535 bytes)
pub const DEFAULT_INITIAL_WINDOW_SIZE: u32 = 65535;

/// Default maximum frame size (16384 bytes)
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16384;

/// Absolute ceiling on the frame payload size (2^24 - 1)
pub const MAX_ALLOWED_FRAME_SIZE: u32 = 0x00FF_FFFF;

/// Default header table size (4096 bytes)
pub const DEFAULT_HEADER_TABLE_SIZE: u32 = 4096;

/// Default maximum concurrent streams accepted from a peer
pub const DEFAULT_MAX_CONCURRENT_STREAMS: u32 = 100;

/// Default maximum size of a received header list
pub const DEFAULT_MAX_HEADER_LIST_SIZE: u32 = 16384;

/// Maximum stream ID value (2^31 - 1)
pub const MAX_STREAM_ID: u32 = 0x7FFF_FFFF;

/// Stream ID 0 (connection-level)
pub const CONNECTION_STREAM_ID: u32 = 0;
