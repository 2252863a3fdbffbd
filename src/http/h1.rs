//! HTTP/1.1 connection serving
//!
//! The keep-alive loop for connections that did not negotiate HTTP/2:
//! parse a request, hand it to the router, write the response, repeat
//! until the peer closes, asks to close, or goes idle past the timeout.

use super::parser::{ParsedRequest, ParserLimits, RequestParser};
use super::session::{HttpSession, SessionOps};
use super::{Error, Method, Result, Status, Version};
use crate::router::{Request, Response, SharedRouter};
use bytes::Bytes;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// HTTP/1.1 loop configuration
#[derive(Debug, Clone)]
pub struct H1Config {
    /// Cap on any single request body
    pub max_body_size: usize,
    /// Cap on the aggregate header section
    pub max_headers_size: usize,
    /// Read/keep-alive idle timeout
    pub timeout: Option<Duration>,
}

impl Default for H1Config {
    fn default() -> Self {
        H1Config {
            max_body_size: 1024 * 1024,
            max_headers_size: 16 * 1024,
            timeout: Some(Duration::from_secs(30)),
        }
    }
}

/// Serve one HTTP/1.1 connection until it closes.
///
/// `initial` carries bytes the shared-port dispatcher already read while
/// sniffing the protocol.
pub fn serve_connection<S: SessionOps>(
    session: S,
    router: SharedRouter,
    config: &H1Config,
    initial: &[u8],
) -> Result<()> {
    let mut session = HttpSession::new(session);
    session.set_timeout(config.timeout);

    let limits = ParserLimits {
        max_headers_size: config.max_headers_size,
        max_body_size: config.max_body_size,
    };

    let mut carry = initial.to_vec();
    let mut buf = [0u8; 8192];

    loop {
        let mut parser = RequestParser::new(limits);

        let request = loop {
            if !carry.is_empty() {
                let pending = std::mem::take(&mut carry);
                match parser.parse(&pending) {
                    Ok(Some(request)) => break request,
                    Ok(None) => {}
                    Err(e) => {
                        respond_parse_error(&mut session, &e)?;
                        return Ok(());
                    }
                }
            }

            let n = match session.read(&mut buf) {
                Ok(n) => n,
                Err(Error::Timeout) => {
                    debug!("keep-alive idle timeout");
                    return Ok(());
                }
                Err(e) => return Err(e),
            };
            if n == 0 {
                // Peer closed, either between requests or mid-request
                return Ok(());
            }

            match parser.parse(&buf[..n]) {
                Ok(Some(request)) => break request,
                Ok(None) => {}
                Err(e) => {
                    respond_parse_error(&mut session, &e)?;
                    return Ok(());
                }
            }
        };

        carry = parser.take_leftover();

        let keep_alive = wants_keep_alive(&request);
        let is_head = request.method == Method::Head;

        let routed = to_routed_request(&request);
        debug!(method = %routed.method, path = %routed.path, "http/1.1 request");

        let response = match catch_unwind(AssertUnwindSafe(|| router.route(&routed))) {
            Ok(response) => response,
            Err(_) => {
                warn!("handler panicked, responding 500");
                Response::new(500)
            }
        };

        let wire = serialize_response(&response, keep_alive, is_head);
        session.write_all(&wire)?;

        if !keep_alive {
            return Ok(());
        }
    }
}

/// HTTP/1.1 defaults to persistent connections; HTTP/1.0 opts in.
fn wants_keep_alive(request: &ParsedRequest) -> bool {
    let connection = request.headers.get("Connection");
    match request.version {
        Version::Http11 => !matches!(connection, Some(v) if v.eq_ignore_ascii_case("close")),
        Version::Http10 => matches!(connection, Some(v) if v.eq_ignore_ascii_case("keep-alive")),
    }
}

fn to_routed_request(request: &ParsedRequest) -> Request {
    let (path, query) = match request.target.split_once('?') {
        Some((path, query)) => (path.to_string(), Some(query.to_string())),
        None => (request.target.clone(), None),
    };

    Request {
        method: request.method.as_str().to_string(),
        path,
        query,
        headers: request.headers.clone(),
        body: Bytes::copy_from_slice(&request.body),
    }
}

/// Serialize a handler response to HTTP/1.1 wire form.
///
/// The engine owns message framing: handler-supplied `Content-Length`,
/// `Transfer-Encoding` and `Connection` headers are dropped and replaced.
fn serialize_response(response: &Response, keep_alive: bool, is_head: bool) -> Vec<u8> {
    let status = Status::new(response.status).unwrap_or(Status::INTERNAL_SERVER_ERROR);

    let mut wire = Vec::with_capacity(256 + response.body.len());
    wire.extend_from_slice(
        format!("HTTP/1.1 {} {}\r\n", status.code(), status.reason_phrase()).as_bytes(),
    );
    wire.extend_from_slice(format!("date: {}\r\n", imf_date(SystemTime::now())).as_bytes());
    wire.extend_from_slice(b"server: h2serve\r\n");

    for (name, value) in response.headers.iter() {
        if name.eq_ignore_ascii_case("content-length")
            || name.eq_ignore_ascii_case("transfer-encoding")
            || name.eq_ignore_ascii_case("connection")
        {
            continue;
        }
        wire.extend_from_slice(format!("{}: {}\r\n", name, value).as_bytes());
    }

    wire.extend_from_slice(format!("content-length: {}\r\n", response.body.len()).as_bytes());
    wire.extend_from_slice(if keep_alive {
        b"connection: keep-alive\r\n".as_slice()
    } else {
        b"connection: close\r\n".as_slice()
    });
    wire.extend_from_slice(b"\r\n");

    if !is_head {
        wire.extend_from_slice(&response.body);
    }
    wire
}

/// Answer a malformed request as helpfully as the error allows, then let
/// the caller close the connection.
fn respond_parse_error<S: SessionOps>(session: &mut HttpSession<S>, error: &Error) -> Result<()> {
    let status = match error {
        Error::TargetTooLong(_) => 414,
        Error::HeadersTooLarge => 431,
        Error::BodyTooLarge => 413,
        Error::InvalidVersion(_) => 505,
        Error::InvalidMethod(_) => 501,
        _ => 400,
    };
    debug!(status, error = %error, "rejecting malformed request");

    let response = Response::new(status)
        .with_header("content-type", "text/plain; charset=utf-8")
        .with_body(Bytes::from(format!("{}\n", error)));
    let wire = serialize_response(&response, false, false);
    session.write_all(&wire)
}

/// Format a timestamp as an IMF-fixdate (RFC 9110 Section 5.6.7).
fn imf_date(now: SystemTime) -> String {
    const DAYS: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];
    const MONTHS: [&str; 12] = [
        "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
    ];

    let secs = now
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64;
    let days = secs.div_euclid(86400);
    let rem = secs.rem_euclid(86400);
    let (hour, minute, second) = (rem / 3600, (rem % 3600) / 60, rem % 60);

    // Civil-from-days conversion over the proleptic Gregorian calendar
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = yoe + era * 400 + i64::from(month <= 2);

    let weekday = (days + 4).rem_euclid(7) as usize;

    format!(
        "{}, {:02} {} {} {:02}:{:02}:{:02} GMT",
        DAYS[weekday],
        day,
        MONTHS[(month - 1) as usize],
        year,
        hour,
        minute,
        second
    )
}
