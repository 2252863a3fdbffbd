//! Incremental HTTP/1.1 request parsing
//!
//! Feed bytes in as they arrive; get a complete request out once the
//! message ends. Every limit from the server configuration is enforced
//! while parsing: target length, per-header and aggregate header sizes,
//! header count, and body size (fixed-length or chunked).

use super::chunked::ChunkedDecoder;
use super::{
    Error, Headers, Method, Result, Version, MAX_HEADER_LINE, MAX_HEADERS, MAX_TARGET_LEN,
};

/// Parser limits taken from server configuration
#[derive(Debug, Clone, Copy)]
pub struct ParserLimits {
    /// Aggregate size of all header lines
    pub max_headers_size: usize,
    /// Maximum request body size
    pub max_body_size: usize,
}

impl Default for ParserLimits {
    fn default() -> Self {
        ParserLimits {
            max_headers_size: 16 * 1024,
            max_body_size: 1024 * 1024,
        }
    }
}

/// A fully parsed request
#[derive(Debug)]
pub struct ParsedRequest {
    pub method: Method,
    pub target: String,
    pub version: Version,
    pub headers: Headers,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ParserState {
    RequestLine,
    Headers,
    FixedBody,
    ChunkedBody,
    Complete,
}

/// HTTP/1.1 request parser
pub struct RequestParser {
    state: ParserState,
    buffer: Vec<u8>,
    limits: ParserLimits,

    method: Option<Method>,
    target: Option<String>,
    version: Option<Version>,
    headers: Headers,
    headers_bytes: usize,

    content_length: usize,
    chunked: Option<ChunkedDecoder>,
    body: Vec<u8>,
}

impl RequestParser {
    /// Create a parser with the given limits
    pub fn new(limits: ParserLimits) -> Self {
        RequestParser {
            state: ParserState::RequestLine,
            buffer: Vec::new(),
            limits,
            method: None,
            target: None,
            version: None,
            headers: Headers::new(),
            headers_bytes: 0,
            content_length: 0,
            chunked: None,
            body: Vec::new(),
        }
    }

    /// Feed data to the parser.
    ///
    /// Returns `Ok(Some(request))` once a complete request has been read,
    /// `Ok(None)` when more input is needed.
    pub fn parse(&mut self, data: &[u8]) -> Result<Option<ParsedRequest>> {
        self.buffer.extend_from_slice(data);

        loop {
            let progressed = match self.state {
                ParserState::RequestLine => self.parse_request_line()?,
                ParserState::Headers => self.parse_header_line()?,
                ParserState::FixedBody => self.parse_fixed_body()?,
                ParserState::ChunkedBody => self.parse_chunked_body()?,
                ParserState::Complete => return Ok(Some(self.take_request())),
            };
            if !progressed {
                return Ok(None);
            }
        }
    }

    /// Bytes beyond the parsed request, for pipelined follow-ups
    pub fn take_leftover(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buffer)
    }

    fn parse_request_line(&mut self) -> Result<bool> {
        let Some(crlf) = find_crlf(&self.buffer) else {
            if self.buffer.len() > MAX_TARGET_LEN + 64 {
                return Err(Error::TargetTooLong(self.buffer.len()));
            }
            return Ok(false);
        };

        let line = String::from_utf8_lossy(&self.buffer[..crlf]).into_owned();
        self.buffer.drain(..crlf + 2);

        let mut parts = line.split(' ');
        let (method, target, version) = match (parts.next(), parts.next(), parts.next(), parts.next())
        {
            (Some(m), Some(t), Some(v), None) if !m.is_empty() && !t.is_empty() => (m, t, v),
            _ => {
                return Err(Error::Parse(format!(
                    "malformed request line: {:?}",
                    line
                )))
            }
        };

        if target.len() > MAX_TARGET_LEN {
            return Err(Error::TargetTooLong(target.len()));
        }

        self.method = Some(Method::from_str(method)?);
        self.target = Some(target.to_string());
        self.version = Some(Version::from_str(version)?);
        self.state = ParserState::Headers;
        Ok(true)
    }

    fn parse_header_line(&mut self) -> Result<bool> {
        let Some(crlf) = find_crlf(&self.buffer) else {
            if self.buffer.len() > MAX_HEADER_LINE {
                return Err(Error::HeadersTooLarge);
            }
            return Ok(false);
        };

        if crlf == 0 {
            // Empty line ends the header section
            self.buffer.drain(..2);
            return self.begin_body();
        }

        if crlf > MAX_HEADER_LINE {
            return Err(Error::HeadersTooLarge);
        }
        self.headers_bytes += crlf + 2;
        if self.headers_bytes > self.limits.max_headers_size {
            return Err(Error::HeadersTooLarge);
        }
        if self.headers.len() >= MAX_HEADERS {
            return Err(Error::HeadersTooLarge);
        }

        let line = String::from_utf8_lossy(&self.buffer[..crlf]).into_owned();
        self.buffer.drain(..crlf + 2);

        let (name, value) = Headers::parse_header_line(&line)?;
        self.headers.insert(name, value);
        Ok(true)
    }

    /// Header section done: work out how the body is delimited.
    fn begin_body(&mut self) -> Result<bool> {
        if let Some(encoding) = self.headers.get("Transfer-Encoding") {
            if !encoding.eq_ignore_ascii_case("chunked") {
                return Err(Error::Parse(format!(
                    "unsupported transfer-encoding: {}",
                    encoding
                )));
            }
            if self.headers.contains("Content-Length") {
                return Err(Error::Parse(
                    "both content-length and transfer-encoding present".to_string(),
                ));
            }
            self.chunked = Some(ChunkedDecoder::new(self.limits.max_body_size));
            self.state = ParserState::ChunkedBody;
            return Ok(true);
        }

        if let Some(cl_str) = self.headers.get("Content-Length") {
            let content_length: usize = cl_str
                .parse()
                .map_err(|_| Error::Parse(format!("invalid content-length: {}", cl_str)))?;
            if content_length > self.limits.max_body_size {
                return Err(Error::BodyTooLarge);
            }
            self.content_length = content_length;
            self.state = ParserState::FixedBody;
            return Ok(true);
        }

        self.state = ParserState::Complete;
        Ok(true)
    }

    fn parse_fixed_body(&mut self) -> Result<bool> {
        if self.buffer.len() < self.content_length {
            return Ok(false);
        }
        self.body = self.buffer.drain(..self.content_length).collect();
        self.state = ParserState::Complete;
        Ok(true)
    }

    fn parse_chunked_body(&mut self) -> Result<bool> {
        let decoder = self.chunked.as_mut().expect("decoder set with state");
        let (consumed, complete) = decoder.decode(&self.buffer, &mut self.body)?;
        self.buffer.drain(..consumed);

        if complete {
            self.state = ParserState::Complete;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn take_request(&mut self) -> ParsedRequest {
        ParsedRequest {
            method: self.method.take().unwrap_or(Method::Get),
            target: self.target.take().unwrap_or_default(),
            version: self.version.take().unwrap_or_default(),
            headers: std::mem::take(&mut self.headers),
            body: std::mem::take(&mut self.body),
        }
    }
}

impl Default for RequestParser {
    fn default() -> Self {
        Self::new(ParserLimits::default())
    }
}

/// Find the next CRLF in a buffer
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}
