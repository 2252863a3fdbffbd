//! h2serve - HTTP/2 and HTTP/1.1 on a shared listening port
//!
//! This crate implements an HTTP server whose single listener speaks both
//! HTTP/2 (RFC 7540/7541) and HTTP/1.1 (RFC 9112). Protocol selection uses
//! the ALPN outcome when TLS is enabled, and connection-preface detection
//! on plaintext connections.

pub mod config;
pub mod dispatch;
pub mod http;
pub mod logging;
pub mod router;
pub mod server;
pub mod tls;
