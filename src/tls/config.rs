//! Server TLS configuration
//!
//! Builds the OpenSSL server context once at startup; every accepted
//! connection shares it. ALPN preference order is `h2` then `http/1.1`.

use openssl::ssl::{AlpnError, SslAcceptor, SslContext, SslFiletype, SslMethod};
use std::path::Path;

/// ALPN protocol list in wire format: length-prefixed names
const ALPN_PROTOCOLS: &[u8] = b"\x02h2\x08http/1.1";

/// TLS errors
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("OpenSSL error: {0}")]
    OpenSsl(#[from] openssl::error::ErrorStack),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Certificate error: {0}")]
    Certificate(String),

    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("TLS operation failed: {0}")]
    OperationFailed(String),
}

/// Immutable server TLS configuration
#[derive(Clone)]
pub struct TlsConfig {
    pub(crate) ctx: SslContext,
}

impl TlsConfig {
    /// Build a server configuration from PEM certificate and key files.
    pub fn server(cert_file: &Path, key_file: &Path) -> super::Result<Self> {
        if !cert_file.exists() {
            return Err(TlsError::Certificate(format!(
                "certificate file not found: {}",
                cert_file.display()
            )));
        }
        if !key_file.exists() {
            return Err(TlsError::Certificate(format!(
                "private key file not found: {}",
                key_file.display()
            )));
        }

        let mut builder = SslAcceptor::mozilla_intermediate_v5(SslMethod::tls_server())?;
        builder.set_certificate_chain_file(cert_file)?;
        builder.set_private_key_file(key_file, SslFiletype::PEM)?;
        builder.check_private_key()?;

        builder.set_alpn_select_callback(|_ssl, client_protocols| {
            openssl::ssl::select_next_proto(ALPN_PROTOCOLS, client_protocols)
                .ok_or(AlpnError::NOACK)
        });

        Ok(TlsConfig {
            ctx: builder.build().into_context(),
        })
    }

    /// Accept a client connection, running the TLS handshake.
    pub fn accept(&self, stream: std::net::TcpStream) -> super::Result<super::TlsSessionOps> {
        super::session::TlsSessionOps::accept(stream, self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_missing_cert_rejected() {
        let missing = PathBuf::from("/nonexistent/cert.pem");
        let result = TlsConfig::server(&missing, &missing);
        assert!(matches!(result, Err(TlsError::Certificate(_))));
    }
}
