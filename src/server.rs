//! TCP listener and per-connection scheduling
//!
//! One OS thread per accepted connection: each connection is its own
//! serial processor, frames and requests on it are handled in order, and
//! connections only share the immutable configuration, the router, and
//! the process-wide HPACK tables.

use crate::config::Config;
use crate::dispatch::{self, DispatchConfig};
use crate::http::h1::H1Config;
use crate::http::h2::{server_settings, H2Config};
use crate::router::SharedRouter;
use crate::tls::TlsConfig;
use std::net::TcpListener;
use std::sync::Arc;
use std::thread;
use tracing::{error, info, warn};

/// The assembled server: configuration, router, optional TLS context.
pub struct Server {
    config: Config,
    router: SharedRouter,
    tls: Option<Arc<TlsConfig>>,
}

impl Server {
    /// Build a server from validated configuration and a router.
    ///
    /// Loads TLS material up front so misconfiguration fails before the
    /// socket is bound.
    pub fn new(config: Config, router: SharedRouter) -> Result<Self, crate::tls::TlsError> {
        let tls = match &config.tls {
            Some(tls_settings) => Some(Arc::new(TlsConfig::server(
                &tls_settings.cert_file,
                &tls_settings.key_file,
            )?)),
            None => None,
        };

        Ok(Server {
            config,
            router,
            tls,
        })
    }

    /// Bind and serve until the process ends.
    pub fn run(&self) -> std::io::Result<()> {
        let addr = (self.config.host.as_str(), self.config.port);
        let listener = TcpListener::bind(addr)?;
        let local = listener.local_addr()?;
        info!(
            addr = %local,
            tls = self.tls.is_some(),
            "listening"
        );

        let dispatch_config = self.dispatch_config();

        for stream in listener.incoming() {
            let stream = match stream {
                Ok(stream) => stream,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    continue;
                }
            };

            let peer = stream
                .peer_addr()
                .map(|a| a.to_string())
                .unwrap_or_else(|_| "unknown".to_string());
            let router = self.router.clone();
            let tls = self.tls.clone();
            let config = dispatch_config.clone();

            let spawned = thread::Builder::new()
                .name(format!("conn-{}", peer))
                .spawn(move || {
                    let span = tracing::info_span!("connection", %peer);
                    let _guard = span.enter();
                    dispatch::handle_connection(stream, tls.as_deref(), router, &config);
                });
            if let Err(e) = spawned {
                error!(error = %e, "failed to spawn connection thread");
            }
        }

        Ok(())
    }

    fn dispatch_config(&self) -> DispatchConfig {
        let timeout = Some(self.config.timeout);

        DispatchConfig {
            h1: H1Config {
                max_body_size: self.config.max_body_size,
                max_headers_size: self.config.max_headers_size,
                timeout,
            },
            h2: H2Config {
                settings: {
                    let mut settings = server_settings();
                    settings.max_header_list_size = Some(self.config.max_headers_size as u32);
                    settings
                },
                max_body_size: self.config.max_body_size,
                timeout,
            },
        }
    }
}
