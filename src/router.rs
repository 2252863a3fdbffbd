//! Request routing contract
//!
//! Both protocol engines hand requests to a [`Router`] and emit whatever
//! response it returns. The records are deliberately opaque to the core:
//! nothing here interprets the path beyond the query split the engines
//! already performed.

use crate::http::Headers;
use bytes::Bytes;
use std::sync::Arc;

/// A routed request: method, path, query, headers, body.
#[derive(Debug, Clone)]
pub struct Request {
    /// Request method, uppercase ("GET", "POST", ...)
    pub method: String,
    /// Path component of the target, before any `?`
    pub path: String,
    /// Query string after `?`, when present
    pub query: Option<String>,
    /// Request headers, names lowercased by the HTTP/2 path and preserved
    /// as sent on the HTTP/1.1 path (lookups are case-insensitive)
    pub headers: Headers,
    /// Request body
    pub body: Bytes,
}

impl Request {
    /// First value of a header, case-insensitive
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// Body as UTF-8, lossy
    pub fn body_string(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// A handler-produced response.
#[derive(Debug, Clone)]
pub struct Response {
    /// Status code
    pub status: u16,
    /// Response headers
    pub headers: Headers,
    /// Response body
    pub body: Bytes,
}

impl Response {
    /// Empty response with a status code
    pub fn new(status: u16) -> Self {
        Response {
            status,
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    /// 200 response with a text body
    pub fn text(body: impl Into<String>) -> Self {
        Response::new(200)
            .with_header("content-type", "text/plain; charset=utf-8")
            .with_body(Bytes::from(body.into()))
    }

    /// Add a header
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Set the body
    pub fn with_body(mut self, body: Bytes) -> Self {
        self.body = body;
        self
    }
}

/// The single capability the core needs from the application layer.
pub trait Router: Send + Sync {
    /// Map a request to a response. Must not block indefinitely.
    fn route(&self, request: &Request) -> Response;
}

impl<F> Router for F
where
    F: Fn(&Request) -> Response + Send + Sync,
{
    fn route(&self, request: &Request) -> Response {
        self(request)
    }
}

/// Shared router handle installed per server
pub type SharedRouter = Arc<dyn Router>;

/// Built-in router used by the `server` binary: a health endpoint, an echo
/// endpoint, and 404 for everything else.
pub struct DefaultRouter;

impl Router for DefaultRouter {
    fn route(&self, request: &Request) -> Response {
        match (request.method.as_str(), request.path.as_str()) {
            ("GET", "/") => Response::text("h2serve\n"),
            ("GET", "/healthz") => Response::text("ok\n"),
            ("POST", "/echo") => {
                let content_type = request
                    .header("content-type")
                    .unwrap_or("application/octet-stream")
                    .to_string();
                Response::new(200)
                    .with_header("content-type", content_type)
                    .with_body(request.body.clone())
            }
            _ => Response::new(404)
                .with_header("content-type", "text/plain; charset=utf-8")
                .with_body(Bytes::from_static(b"not found\n")),
        }
    }
}
