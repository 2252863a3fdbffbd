//! TLS session operations
//!
//! Wraps an OpenSSL `SslStream` behind the [`SessionOps`] trait, with the
//! same poll-based readiness handling as the plain-fd session. The
//! negotiated ALPN protocol is exposed for the dispatcher.

use super::config::{TlsConfig, TlsError};
use crate::http::session::{poll_fd, PollEvents, SessionOps};
use crate::http::{Error as HttpError, Result as HttpResult};
use openssl::ssl::{ErrorCode as SslErrorCode, Ssl, SslStream};
use std::io;
use std::net::TcpStream;
use std::os::fd::AsRawFd;
use std::time::Duration;

/// An accepted TLS session
pub struct TlsSessionOps {
    stream: SslStream<TcpStream>,
}

impl TlsSessionOps {
    /// Run the server-side handshake over an accepted TCP stream
    pub fn accept(stream: TcpStream, config: &TlsConfig) -> super::Result<Self> {
        let ssl = Ssl::new(&config.ctx)?;
        let mut stream = SslStream::new(ssl, stream)
            .map_err(|e| TlsError::OperationFailed(e.to_string()))?;

        stream
            .accept()
            .map_err(|e| TlsError::HandshakeFailed(e.to_string()))?;

        Ok(TlsSessionOps { stream })
    }

    /// The ALPN protocol the handshake settled on, if any
    pub fn selected_alpn(&self) -> Option<&[u8]> {
        self.stream.ssl().selected_alpn_protocol()
    }

    /// Whether ALPN chose HTTP/2
    pub fn negotiated_h2(&self) -> bool {
        self.selected_alpn() == Some(b"h2")
    }
}

impl SessionOps for TlsSessionOps {
    fn poll(&self, events: PollEvents, timeout: Option<Duration>) -> HttpResult<bool> {
        // TLS may have already buffered plaintext beyond what the fd shows
        if matches!(events, PollEvents::Read | PollEvents::Both) && self.stream.ssl().pending() > 0
        {
            return Ok(true);
        }
        poll_fd(self.stream.get_ref().as_raw_fd(), events, timeout)
    }

    fn read(&mut self, buf: &mut [u8]) -> HttpResult<usize> {
        match self.stream.ssl_read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.code() == SslErrorCode::ZERO_RETURN => Ok(0),
            Err(e) => match e.into_io_error() {
                Ok(io_err) => Err(HttpError::Io(io_err)),
                Err(ssl_err) => Err(HttpError::Io(io::Error::new(
                    io::ErrorKind::Other,
                    ssl_err.to_string(),
                ))),
            },
        }
    }

    fn write(&mut self, buf: &[u8]) -> HttpResult<usize> {
        match self.stream.ssl_write(buf) {
            Ok(n) => Ok(n),
            Err(e) => match e.into_io_error() {
                Ok(io_err) => Err(HttpError::Io(io_err)),
                Err(ssl_err) => Err(HttpError::Io(io::Error::new(
                    io::ErrorKind::Other,
                    ssl_err.to_string(),
                ))),
            },
        }
    }

    fn close(&mut self) -> HttpResult<()> {
        // Best-effort close_notify; the peer may already be gone
        let _ = self.stream.shutdown();
        Ok(())
    }
}
