//! Session operations abstraction
//!
//! The session operations pattern lets every protocol engine in this crate
//! run unchanged over plain TCP and TLS: the engines see only the
//! [`SessionOps`] trait (poll, read, write, close), and the dispatcher
//! decides which implementation backs a given connection.

use super::{Error, Result};
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::os::fd::AsRawFd;
use std::time::Duration;

/// Session operations trait
///
/// Abstracts over plain TCP and TLS transports.
pub trait SessionOps {
    /// Wait for readiness; true when the requested operation will not block
    fn poll(&self, events: PollEvents, timeout: Option<Duration>) -> Result<bool>;

    /// Read data from the session
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Write data to the session
    fn write(&mut self, buf: &[u8]) -> Result<usize>;

    /// Close the session
    fn close(&mut self) -> Result<()>;
}

/// Poll events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollEvents {
    Read,
    Write,
    Both,
}

/// A session plus the idle timeout applied to its blocking operations.
pub struct HttpSession<S: SessionOps> {
    session: S,
    timeout: Option<Duration>,
}

impl<S: SessionOps> HttpSession<S> {
    /// Wrap a session with the default 10-second timeout
    pub fn new(session: S) -> Self {
        HttpSession {
            session,
            timeout: Some(Duration::from_secs(10)),
        }
    }

    /// Set the timeout for operations
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    /// Get the timeout
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Read data, waiting at most the configured timeout
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if !self.session.poll(PollEvents::Read, self.timeout)? {
            return Err(Error::Timeout);
        }
        self.session.read(buf)
    }

    /// Write data, waiting at most the configured timeout for readiness
    pub fn write(&mut self, buf: &[u8]) -> Result<usize> {
        if !self.session.poll(PollEvents::Write, self.timeout)? {
            return Err(Error::Timeout);
        }
        self.session.write(buf)
    }

    /// Write an entire buffer
    pub fn write_all(&mut self, mut buf: &[u8]) -> Result<()> {
        while !buf.is_empty() {
            let n = self.write(buf)?;
            if n == 0 {
                return Err(Error::ConnectionClosed);
            }
            buf = &buf[n..];
        }
        Ok(())
    }

    /// Close the session
    pub fn close(&mut self) -> Result<()> {
        self.session.close()
    }

    /// Get a reference to the underlying session
    pub fn get_ref(&self) -> &S {
        &self.session
    }

    /// Get a mutable reference to the underlying session
    pub fn get_mut(&mut self) -> &mut S {
        &mut self.session
    }
}

/// Plain file-descriptor session over a TCP stream
pub struct FdSessionOps {
    stream: TcpStream,
}

impl FdSessionOps {
    /// Create session operations from a TCP stream
    pub fn new(stream: TcpStream) -> Self {
        FdSessionOps { stream }
    }

    /// Get a reference to the underlying stream
    pub fn stream(&self) -> &TcpStream {
        &self.stream
    }
}

/// Poll a raw fd for readiness. Shared by the plain and TLS sessions.
pub(crate) fn poll_fd(fd: i32, events: PollEvents, timeout: Option<Duration>) -> Result<bool> {
    use libc::{poll, pollfd, POLLIN, POLLOUT};

    let mut pfd = pollfd {
        fd,
        events: match events {
            PollEvents::Read => POLLIN,
            PollEvents::Write => POLLOUT,
            PollEvents::Both => POLLIN | POLLOUT,
        },
        revents: 0,
    };

    let timeout_ms = timeout.map(|d| d.as_millis() as i32).unwrap_or(-1);

    let result = unsafe { poll(&mut pfd as *mut pollfd, 1, timeout_ms) };

    if result < 0 {
        return Err(Error::Io(io::Error::last_os_error()));
    }

    Ok(result > 0)
}

impl SessionOps for FdSessionOps {
    fn poll(&self, events: PollEvents, timeout: Option<Duration>) -> Result<bool> {
        poll_fd(self.stream.as_raw_fd(), events, timeout)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.stream.read(buf).map_err(Error::from)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.stream.write(buf).map_err(Error::from)
    }

    fn close(&mut self) -> Result<()> {
        use std::net::Shutdown;
        // A peer that already closed makes shutdown fail harmlessly
        match self.stream.shutdown(Shutdown::Both) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(Error::Io(e)),
        }
    }
}

/// Helper to create an HTTP session from a TCP stream
pub fn from_tcp_stream(stream: TcpStream) -> HttpSession<FdSessionOps> {
    HttpSession::new(FdSessionOps::new(stream))
}
