//! HTTP/2 error types
//!
//! Error codes from RFC 7540 Section 7, the crate-level error enum, and
//! the `FrameOutcome` type every frame handler returns. The dispatch loop
//! translates outcomes into wire frames: a stream error becomes RST_STREAM
//! and the connection survives, a connection error becomes GOAWAY followed
//! by close.

use std::fmt;

/// HTTP/2 errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error from the underlying session layer
    #[error("HTTP error: {0}")]
    Http(#[from] crate::http::Error),

    /// Protocol error detected (RFC 7540 Section 7 - Error code 0x1)
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Internal error (RFC 7540 Section 7 - Error code 0x2)
    #[error("Internal error: {0}")]
    Internal(String),

    /// Flow control error (RFC 7540 Section 7 - Error code 0x3)
    #[error("Flow control error: {0}")]
    FlowControl(String),

    /// Stream closed (RFC 7540 Section 7 - Error code 0x5)
    #[error("Stream closed: {0}")]
    StreamClosed(u32),

    /// Frame size error (RFC 7540 Section 7 - Error code 0x6)
    #[error("Frame size error: {0}")]
    FrameSize(String),

    /// Refused stream (RFC 7540 Section 7 - Error code 0x7)
    #[error("Refused stream: {0}")]
    RefusedStream(u32),

    /// Compression error (RFC 7540 Section 7 - Error code 0x9)
    #[error("Compression error: {0}")]
    Compression(#[from] super::hpack::HpackError),

    /// Invalid settings value
    #[error("Invalid settings value: {0}")]
    InvalidSettings(String),

    /// Missing connection preface
    #[error("Missing connection preface")]
    MissingPreface,

    /// Connection closed by peer
    #[error("Connection closed")]
    ConnectionClosed,
}

/// HTTP/2 error codes as defined in RFC 7540 Section 7
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorCode {
    /// Graceful shutdown
    NoError = 0x0,
    /// Protocol error detected
    ProtocolError = 0x1,
    /// Implementation fault
    InternalError = 0x2,
    /// Flow-control limits exceeded
    FlowControlError = 0x3,
    /// Settings not acknowledged
    SettingsTimeout = 0x4,
    /// Frame received for closed stream
    StreamClosed = 0x5,
    /// Frame size incorrect
    FrameSizeError = 0x6,
    /// Stream not processed
    RefusedStream = 0x7,
    /// Stream cancelled
    Cancel = 0x8,
    /// Compression state not updated
    CompressionError = 0x9,
    /// Processing capacity exceeded
    EnhanceYourCalm = 0xb,
}

impl ErrorCode {
    /// Convert error code to u32
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// Create error code from u32
    pub fn from_u32(code: u32) -> Option<Self> {
        match code {
            0x0 => Some(ErrorCode::NoError),
            0x1 => Some(ErrorCode::ProtocolError),
            0x2 => Some(ErrorCode::InternalError),
            0x3 => Some(ErrorCode::FlowControlError),
            0x4 => Some(ErrorCode::SettingsTimeout),
            0x5 => Some(ErrorCode::StreamClosed),
            0x6 => Some(ErrorCode::FrameSizeError),
            0x7 => Some(ErrorCode::RefusedStream),
            0x8 => Some(ErrorCode::Cancel),
            0x9 => Some(ErrorCode::CompressionError),
            0xb => Some(ErrorCode::EnhanceYourCalm),
            _ => None,
        }
    }

    /// Get error name
    pub fn name(&self) -> &'static str {
        match self {
            ErrorCode::NoError => "NO_ERROR",
            ErrorCode::ProtocolError => "PROTOCOL_ERROR",
            ErrorCode::InternalError => "INTERNAL_ERROR",
            ErrorCode::FlowControlError => "FLOW_CONTROL_ERROR",
            ErrorCode::SettingsTimeout => "SETTINGS_TIMEOUT",
            ErrorCode::StreamClosed => "STREAM_CLOSED",
            ErrorCode::FrameSizeError => "FRAME_SIZE_ERROR",
            ErrorCode::RefusedStream => "REFUSED_STREAM",
            ErrorCode::Cancel => "CANCEL",
            ErrorCode::CompressionError => "COMPRESSION_ERROR",
            ErrorCode::EnhanceYourCalm => "ENHANCE_YOUR_CALM",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:x})", self.name(), self.as_u32())
    }
}

/// Result of processing a single received frame.
///
/// Every frame handler returns one of these; the dispatch loop owns the
/// translation into outbound RST_STREAM / GOAWAY frames.
#[derive(Debug)]
pub enum FrameOutcome {
    /// Frame fully processed, keep going
    Continue,
    /// Recoverable error scoped to one stream
    StreamError(u32, ErrorCode),
    /// Fatal error: GOAWAY with this code, then close
    ConnectionError(ErrorCode, String),
}

impl FrameOutcome {
    /// Connection error helper with a formatted reason
    pub fn conn(code: ErrorCode, reason: impl Into<String>) -> Self {
        FrameOutcome::ConnectionError(code, reason.into())
    }
}

/// Result type for HTTP/2 operations
pub type Result<T> = std::result::Result<T, Error>;
