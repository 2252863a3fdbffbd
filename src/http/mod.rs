//! HTTP/1.1 protocol support
//!
//! The HTTP/1.1 layer exists for the shared-port path: connections that do
//! not negotiate `h2` (via ALPN or the cleartext preface) are served here.
//! All I/O goes through the `SessionOps` abstraction so the same code runs
//! over plain TCP and TLS.

pub mod chunked;
pub mod h1;
pub mod h2;
pub mod headers;
pub mod message;
pub mod parser;
pub mod session;

pub use headers::Headers;
pub use message::{Method, Status, Version};
pub use parser::RequestParser;
pub use session::{HttpSession, SessionOps};

/// Result type for HTTP/1.1 operations
pub type Result<T> = std::result::Result<T, Error>;

/// HTTP/1.1 operation errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid HTTP version: {0}")]
    InvalidVersion(String),

    #[error("Invalid HTTP method: {0}")]
    InvalidMethod(String),

    #[error("Invalid HTTP status: {0}")]
    InvalidStatus(String),

    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    #[error("Invalid chunk size: {0}")]
    InvalidChunkSize(String),

    #[error("Request target too long ({0} bytes)")]
    TargetTooLong(usize),

    #[error("Headers exceed configured limit")]
    HeadersTooLarge,

    #[error("Body exceeds configured limit")]
    BodyTooLarge,

    #[error("Incomplete message")]
    Incomplete,

    #[error("Timeout")]
    Timeout,

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Maximum length of the request target in octets
pub const MAX_TARGET_LEN: usize = 8192;

/// Maximum length of a single header line in octets
pub const MAX_HEADER_LINE: usize = 8192;

/// Maximum number of headers per message
pub const MAX_HEADERS: usize = 100;

/// Maximum size of a single chunk in a chunked body
pub const MAX_CHUNK_SIZE: usize = 64 * 1024;

/// Maximum number of chunks in a chunked body
pub const MAX_CHUNK_COUNT: usize = 1000;

/// CRLF line ending
pub const CRLF: &str = "\r\n";
