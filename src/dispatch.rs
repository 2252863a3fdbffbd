//! Shared-port protocol selection
//!
//! Every accepted connection lands here. With TLS, the ALPN outcome picks
//! the engine. On plaintext, the first bytes are sniffed: the HTTP/2
//! connection preface selects the HTTP/2 engine (which re-consumes the
//! buffered bytes), a known HTTP/1.1 method selects the HTTP/1.1 loop,
//! and 24 octets matching neither get an HTTP/2 GOAWAY with
//! PROTOCOL_ERROR before the connection is dropped.

use crate::http::h1::{self, H1Config};
use crate::http::h2::codec::FrameBuilder;
use crate::http::h2::frames::GoawayFrame;
use crate::http::h2::{ErrorCode, H2Config, H2Connection, CONNECTION_PREFACE};
use crate::http::session::{FdSessionOps, PollEvents, SessionOps};
use crate::http::Method;
use crate::router::SharedRouter;
use crate::tls::TlsConfig;
use bytes::Bytes;
use std::net::TcpStream;
use tracing::{debug, trace};

/// Per-connection protocol configuration
#[derive(Debug, Clone, Default)]
pub struct DispatchConfig {
    /// HTTP/1.1 loop settings
    pub h1: H1Config,
    /// HTTP/2 engine settings
    pub h2: H2Config,
}

/// Result of inspecting the first bytes of a plaintext connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sniff {
    /// Too early to tell
    NeedMore,
    /// The 24-octet HTTP/2 connection preface
    H2Preface,
    /// A known HTTP/1.1 method followed by a space
    Http1,
    /// 24 octets that are neither
    Unknown,
}

/// Classify buffered bytes from a plaintext connection.
pub fn sniff(buf: &[u8]) -> Sniff {
    let n = buf.len().min(CONNECTION_PREFACE.len());
    if buf[..n] == CONNECTION_PREFACE[..n] {
        return if n == CONNECTION_PREFACE.len() {
            Sniff::H2Preface
        } else {
            Sniff::NeedMore
        };
    }

    for name in Method::NAMES {
        let name = name.as_bytes();
        if buf.len() > name.len() {
            if &buf[..name.len()] == name && buf[name.len()] == b' ' {
                return Sniff::Http1;
            }
        } else if &name[..buf.len()] == buf {
            // Could still become this method
            return Sniff::NeedMore;
        }
    }

    if buf.len() >= CONNECTION_PREFACE.len() {
        Sniff::Unknown
    } else {
        Sniff::NeedMore
    }
}

/// Serve one accepted connection, selecting the protocol first.
///
/// Runs on the connection's own thread; failures are logged, never
/// propagated, so one bad connection cannot take the listener down.
pub fn handle_connection(
    stream: TcpStream,
    tls: Option<&TlsConfig>,
    router: SharedRouter,
    config: &DispatchConfig,
) {
    let result = match tls {
        Some(tls) => serve_tls(stream, tls, router, config),
        None => serve_plaintext(stream, router, config),
    };
    if let Err(reason) = result {
        debug!(%reason, "connection ended with error");
    }
}

fn serve_tls(
    stream: TcpStream,
    tls: &TlsConfig,
    router: SharedRouter,
    config: &DispatchConfig,
) -> Result<(), String> {
    let session = tls.accept(stream).map_err(|e| e.to_string())?;

    if session.negotiated_h2() {
        trace!("ALPN selected h2");
        let mut connection = H2Connection::new(session, router, config.h2.clone());
        connection.run(&[], true).map_err(|e| e.to_string())
    } else {
        trace!(alpn = ?session.selected_alpn(), "serving HTTP/1.1 over TLS");
        h1::serve_connection(session, router, &config.h1, &[]).map_err(|e| e.to_string())
    }
}

fn serve_plaintext(
    stream: TcpStream,
    router: SharedRouter,
    config: &DispatchConfig,
) -> Result<(), String> {
    let mut session = FdSessionOps::new(stream);
    let mut buffered = Vec::with_capacity(CONNECTION_PREFACE.len());
    let mut buf = [0u8; 64];

    loop {
        match sniff(&buffered) {
            Sniff::NeedMore => {
                let ready = session
                    .poll(PollEvents::Read, config.h1.timeout)
                    .map_err(|e| e.to_string())?;
                if !ready {
                    return Err("timed out sniffing protocol".to_string());
                }
                let n = session.read(&mut buf).map_err(|e| e.to_string())?;
                if n == 0 {
                    // Closed before revealing a protocol
                    return Ok(());
                }
                buffered.extend_from_slice(&buf[..n]);
            }
            Sniff::H2Preface => {
                trace!("cleartext preface detected");
                let mut connection = H2Connection::new(session, router, config.h2.clone());
                return connection.run(&buffered, false).map_err(|e| e.to_string());
            }
            Sniff::Http1 => {
                trace!("HTTP/1.1 method prefix detected");
                return h1::serve_connection(session, router, &config.h1, &buffered)
                    .map_err(|e| e.to_string());
            }
            Sniff::Unknown => {
                debug!("unrecognized protocol prefix, sending GOAWAY");
                let goaway = FrameBuilder::goaway(&GoawayFrame::new(
                    0,
                    ErrorCode::ProtocolError,
                    Bytes::from_static(b"unrecognized protocol"),
                ));
                let _ = session.write(&goaway);
                let _ = session.close();
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sniff_preface() {
        assert_eq!(sniff(b""), Sniff::NeedMore);
        assert_eq!(sniff(b"PRI"), Sniff::NeedMore);
        assert_eq!(sniff(b"PRI * HTTP/2.0\r\n"), Sniff::NeedMore);
        assert_eq!(sniff(CONNECTION_PREFACE), Sniff::H2Preface);

        let mut longer = CONNECTION_PREFACE.to_vec();
        longer.extend_from_slice(b"\x00\x00\x00\x04\x00\x00\x00\x00\x00");
        assert_eq!(sniff(&longer), Sniff::H2Preface);
    }

    #[test]
    fn test_sniff_methods() {
        assert_eq!(sniff(b"G"), Sniff::NeedMore);
        assert_eq!(sniff(b"GET"), Sniff::NeedMore);
        assert_eq!(sniff(b"GET "), Sniff::Http1);
        assert_eq!(sniff(b"POST / HTTP/1.1\r\n"), Sniff::Http1);
        assert_eq!(sniff(b"DELETE /x HTTP/1.1\r\n"), Sniff::Http1);
        // PUT shares a first byte with the preface
        assert_eq!(sniff(b"PU"), Sniff::NeedMore);
        assert_eq!(sniff(b"PUT /y HTTP/1.1\r\n"), Sniff::Http1);
    }

    #[test]
    fn test_sniff_unknown() {
        // Not a method, not the preface: undecided until 24 octets
        assert_eq!(sniff(b"SSH-2.0-OpenSSH"), Sniff::NeedMore);
        assert_eq!(sniff(b"SSH-2.0-OpenSSH_9.6 ubun"), Sniff::Unknown);
        // Preface diverging at the last octet
        let mut almost = CONNECTION_PREFACE.to_vec();
        *almost.last_mut().unwrap() = b'X';
        assert_eq!(sniff(&almost), Sniff::Unknown);
    }
}
