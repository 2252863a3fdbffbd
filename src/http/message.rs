//! HTTP message primitives
//!
//! Methods, versions and status codes shared by both protocol paths. The
//! HTTP/1.1 parser validates against these; the response writer uses the
//! canonical reason phrases.

use super::{Error, Result};
use std::fmt;

/// HTTP methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Connect,
    Options,
    Trace,
    Patch,
}

impl Method {
    /// Parse method from string
    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "GET" => Ok(Method::Get),
            "HEAD" => Ok(Method::Head),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "DELETE" => Ok(Method::Delete),
            "CONNECT" => Ok(Method::Connect),
            "OPTIONS" => Ok(Method::Options),
            "TRACE" => Ok(Method::Trace),
            "PATCH" => Ok(Method::Patch),
            _ => Err(Error::InvalidMethod(s.to_string())),
        }
    }

    /// Convert method to string
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Connect => "CONNECT",
            Method::Options => "OPTIONS",
            Method::Trace => "TRACE",
            Method::Patch => "PATCH",
        }
    }

    /// All method names, used by the shared-port sniffer
    pub const NAMES: [&'static str; 9] = [
        "GET", "HEAD", "POST", "PUT", "DELETE", "CONNECT", "OPTIONS", "TRACE", "PATCH",
    ];
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// HTTP version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Version {
    Http10,
    Http11,
}

impl Version {
    /// Parse a version token.
    ///
    /// Anything shaped `HTTP/<digit>.<digit>` that this server does not
    /// speak maps to `InvalidVersion` so callers can answer 505; malformed
    /// tokens are plain parse errors.
    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "HTTP/1.0" => Ok(Version::Http10),
            "HTTP/1.1" => Ok(Version::Http11),
            _ if is_version_shaped(s) => Err(Error::InvalidVersion(s.to_string())),
            _ => Err(Error::Parse(format!("malformed HTTP version: {}", s))),
        }
    }

    /// Convert version to string
    pub fn as_str(&self) -> &'static str {
        match self {
            Version::Http10 => "HTTP/1.0",
            Version::Http11 => "HTTP/1.1",
        }
    }
}

/// `HTTP/[0-9].[0-9]`
fn is_version_shaped(s: &str) -> bool {
    let bytes = s.as_bytes();
    bytes.len() == 8
        && &bytes[..5] == b"HTTP/"
        && bytes[5].is_ascii_digit()
        && bytes[6] == b'.'
        && bytes[7].is_ascii_digit()
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Default for Version {
    fn default() -> Self {
        Version::Http11
    }
}

/// HTTP status code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Status {
    code: u16,
}

impl Status {
    /// Create a new status code
    pub fn new(code: u16) -> Result<Self> {
        if (100..600).contains(&code) {
            Ok(Status { code })
        } else {
            Err(Error::InvalidStatus(format!("invalid status code: {}", code)))
        }
    }

    /// Get the status code
    pub fn code(&self) -> u16 {
        self.code
    }

    /// Get the canonical reason phrase for this status code
    pub fn reason_phrase(&self) -> &'static str {
        match self.code {
            100 => "Continue",
            101 => "Switching Protocols",
            200 => "OK",
            201 => "Created",
            202 => "Accepted",
            204 => "No Content",
            206 => "Partial Content",
            301 => "Moved Permanently",
            302 => "Found",
            303 => "See Other",
            304 => "Not Modified",
            307 => "Temporary Redirect",
            308 => "Permanent Redirect",
            400 => "Bad Request",
            401 => "Unauthorized",
            403 => "Forbidden",
            404 => "Not Found",
            405 => "Method Not Allowed",
            408 => "Request Timeout",
            409 => "Conflict",
            410 => "Gone",
            411 => "Length Required",
            413 => "Payload Too Large",
            414 => "URI Too Long",
            415 => "Unsupported Media Type",
            426 => "Upgrade Required",
            431 => "Request Header Fields Too Large",
            500 => "Internal Server Error",
            501 => "Not Implemented",
            502 => "Bad Gateway",
            503 => "Service Unavailable",
            504 => "Gateway Timeout",
            505 => "HTTP Version Not Supported",
            _ => "Unknown",
        }
    }

    /// Check if this is a success status (2xx)
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }

    /// Check if this is a client error status (4xx)
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.code)
    }

    /// Check if this is a server error status (5xx)
    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.code)
    }

    // Common status codes as constants
    pub const OK: Status = Status { code: 200 };
    pub const BAD_REQUEST: Status = Status { code: 400 };
    pub const NOT_FOUND: Status = Status { code: 404 };
    pub const INTERNAL_SERVER_ERROR: Status = Status { code: 500 };
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.reason_phrase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_from_str() {
        assert_eq!(Method::from_str("GET").unwrap(), Method::Get);
        assert_eq!(Method::from_str("POST").unwrap(), Method::Post);
        assert!(Method::from_str("BREW").is_err());
        assert!(Method::from_str("get").is_err());
    }

    #[test]
    fn test_version_from_str() {
        assert_eq!(Version::from_str("HTTP/1.0").unwrap(), Version::Http10);
        assert_eq!(Version::from_str("HTTP/1.1").unwrap(), Version::Http11);

        // Well-formed but unsupported
        assert!(matches!(
            Version::from_str("HTTP/2.0"),
            Err(Error::InvalidVersion(_))
        ));
        assert!(matches!(
            Version::from_str("HTTP/0.9"),
            Err(Error::InvalidVersion(_))
        ));

        // Malformed
        assert!(matches!(Version::from_str("HTTP/11"), Err(Error::Parse(_))));
        assert!(matches!(Version::from_str("http/1.1"), Err(Error::Parse(_))));
    }

    #[test]
    fn test_status() {
        let status = Status::new(200).unwrap();
        assert_eq!(status.code(), 200);
        assert_eq!(status.reason_phrase(), "OK");
        assert!(status.is_success());
        assert!(!status.is_client_error());

        assert!(Status::new(99).is_err());
        assert!(Status::new(600).is_err());
    }

    #[test]
    fn test_status_reason_phrases() {
        assert_eq!(Status::new(431).unwrap().reason_phrase(), "Request Header Fields Too Large");
        assert_eq!(Status::new(505).unwrap().reason_phrase(), "HTTP Version Not Supported");
        assert_eq!(Status::new(418).unwrap().reason_phrase(), "Unknown");
    }
}
