//! HTTP headers handling
//!
//! An ordered header multimap with case-insensitive lookups. Both protocol
//! paths use it: the HTTP/1.1 parser fills it from header lines, the
//! HTTP/2 engine from decoded HPACK header lists. Count and size limits
//! are enforced by the parsers, not here.

use super::{Error, Result};
use std::fmt;

/// HTTP headers collection
///
/// Headers are stored in insertion order and support:
/// - Case-insensitive header name lookups
/// - Multiple values for the same header name
/// - Iteration over all headers
#[derive(Debug, Clone, Default)]
pub struct Headers {
    headers: Vec<(String, String)>,
}

impl Headers {
    /// Create a new empty headers collection
    pub fn new() -> Self {
        Headers::default()
    }

    /// Insert a header
    ///
    /// A repeated name adds another value rather than replacing the first.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.push((name.into(), value.into()));
    }

    /// Get the first value for a header (case-insensitive)
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Get all values for a header (case-insensitive)
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.headers
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// Check if a header exists
    pub fn contains(&self, name: &str) -> bool {
        self.headers
            .iter()
            .any(|(n, _)| n.eq_ignore_ascii_case(name))
    }

    /// Remove all instances of a header (case-insensitive), returning how
    /// many were removed
    pub fn remove(&mut self, name: &str) -> usize {
        let initial_len = self.headers.len();
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        initial_len - self.headers.len()
    }

    /// Get the number of headers
    pub fn len(&self) -> usize {
        self.headers.len()
    }

    /// Check if there are no headers
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    /// Iterate over all headers
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Parse one header line into name and value.
    ///
    /// Whitespace between the field name and the colon is rejected
    /// (RFC 9112 Section 5.1).
    pub fn parse_header_line(line: &str) -> Result<(String, String)> {
        let colon_pos = line
            .find(':')
            .ok_or_else(|| Error::InvalidHeader(format!("no colon in header: {}", line)))?;

        let name = &line[..colon_pos];
        if name.is_empty() {
            return Err(Error::InvalidHeader("empty header name".to_string()));
        }
        if name.ends_with(|c: char| c == ' ' || c == '\t') {
            return Err(Error::InvalidHeader(format!(
                "whitespace before colon in header: {}",
                line
            )));
        }

        let value = line[colon_pos + 1..].trim().to_string();
        Ok((name.to_string(), value))
    }
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.headers {
            writeln!(f, "{}: {}", name, value)?;
        }
        Ok(())
    }
}

impl FromIterator<(String, String)> for Headers {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.insert(name, value);
        }
        headers
    }
}
