//! Layered server configuration
//!
//! Settings come from four layers, weakest first: built-in defaults, the
//! JSON config file, command-line flags, and `HTTP_SERVER_*` environment
//! variables. Each layer only overrides what it actually sets. Validation
//! runs once on the fully resolved result and produces human-readable
//! messages suitable for stderr.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("config file {path} is not valid: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("{0}")]
    Invalid(String),

    #[error("{0}")]
    Usage(String),
}

/// Log verbosity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Parse a level name
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(ConfigError::Invalid(format!(
                "unknown log level {:?} (expected debug, info, warn or error)",
                other
            ))),
        }
    }

    /// Name as accepted by `parse`
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    /// Parse a format name
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(ConfigError::Invalid(format!(
                "unknown log format {:?} (expected text or json)",
                other
            ))),
        }
    }
}

/// TLS file locations
#[derive(Debug, Clone)]
pub struct TlsSettings {
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
}

/// Fully resolved server configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub tls: Option<TlsSettings>,
    pub max_body_size: usize,
    pub max_headers_size: usize,
    pub timeout: Duration,
    pub log_level: LogLevel,
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            host: "0.0.0.0".to_string(),
            port: 8080,
            tls: None,
            max_body_size: 1024 * 1024,
            max_headers_size: 16 * 1024,
            timeout: Duration::from_secs(30),
            log_level: LogLevel::Info,
            log_format: LogFormat::Text,
        }
    }
}

/// One layer of not-yet-resolved settings
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub config_path: Option<PathBuf>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub tls_enabled: Option<bool>,
    pub tls_cert_file: Option<PathBuf>,
    pub tls_key_file: Option<PathBuf>,
    pub max_body_size: Option<usize>,
    pub max_headers_size: Option<usize>,
    pub timeout_seconds: Option<u64>,
    pub log_level: Option<LogLevel>,
    pub log_format: Option<LogFormat>,
}

/// What the command line asked for
#[derive(Debug)]
pub enum CliAction {
    /// Print usage and exit 0
    Help,
    /// Run with these overrides
    Run(Overrides),
}

/// Usage text for `--help` and flag errors
pub const USAGE: &str = "\
Usage: server [OPTIONS]

Options:
  --config <path>            JSON configuration file
  --host <addr>              Listen address (default 0.0.0.0)
  --port <n>                 Listen port (default 8080)
  --tls-enabled              Enable TLS (requires cert and key)
  --tls-cert-file <path>     PEM certificate chain
  --tls-key-file <path>      PEM private key
  --max-body-size <bytes>    Maximum request body size (>= 1024)
  --max-headers-size <bytes> Maximum header section size (>= 1024)
  --timeout <seconds>        Read / keep-alive idle timeout (>= 1)
  --log-level <level>        debug | info | warn | error
  --log-format <format>      text | json
  --help                     Show this help
";

/// Parse command-line arguments (excluding the program name).
pub fn parse_args(args: &[String]) -> Result<CliAction, ConfigError> {
    let mut overrides = Overrides::default();
    let mut iter = args.iter();

    while let Some(arg) = iter.next() {
        let mut value_of = |flag: &str| {
            iter.next()
                .cloned()
                .ok_or_else(|| ConfigError::Usage(format!("{} requires a value", flag)))
        };

        match arg.as_str() {
            "--help" | "-h" => return Ok(CliAction::Help),
            "--config" => overrides.config_path = Some(PathBuf::from(value_of("--config")?)),
            "--host" => overrides.host = Some(value_of("--host")?),
            "--port" => {
                let raw = value_of("--port")?;
                let port = raw
                    .parse()
                    .map_err(|_| ConfigError::Usage(format!("invalid port: {}", raw)))?;
                overrides.port = Some(port);
            }
            "--tls-enabled" => overrides.tls_enabled = Some(true),
            "--tls-cert-file" => {
                overrides.tls_cert_file = Some(PathBuf::from(value_of("--tls-cert-file")?))
            }
            "--tls-key-file" => {
                overrides.tls_key_file = Some(PathBuf::from(value_of("--tls-key-file")?))
            }
            "--max-body-size" => {
                let raw = value_of("--max-body-size")?;
                overrides.max_body_size = Some(parse_size("--max-body-size", &raw)?);
            }
            "--max-headers-size" => {
                let raw = value_of("--max-headers-size")?;
                overrides.max_headers_size = Some(parse_size("--max-headers-size", &raw)?);
            }
            "--timeout" => {
                let raw = value_of("--timeout")?;
                let secs = raw
                    .parse()
                    .map_err(|_| ConfigError::Usage(format!("invalid timeout: {}", raw)))?;
                overrides.timeout_seconds = Some(secs);
            }
            "--log-level" => overrides.log_level = Some(LogLevel::parse(&value_of("--log-level")?)?),
            "--log-format" => {
                overrides.log_format = Some(LogFormat::parse(&value_of("--log-format")?)?)
            }
            other => {
                return Err(ConfigError::Usage(format!("unknown option: {}", other)));
            }
        }
    }

    Ok(CliAction::Run(overrides))
}

fn parse_size(flag: &str, raw: &str) -> Result<usize, ConfigError> {
    raw.parse()
        .map_err(|_| ConfigError::Usage(format!("{}: invalid size {}", flag, raw)))
}

/// Read the `HTTP_SERVER_*` environment variables, the highest-precedence
/// layer.
pub fn from_env() -> Result<Overrides, ConfigError> {
    let var = |name: &str| std::env::var(format!("HTTP_SERVER_{}", name)).ok();
    let mut overrides = Overrides::default();

    overrides.host = var("HOST");
    if let Some(raw) = var("PORT") {
        overrides.port = Some(raw.parse().map_err(|_| {
            ConfigError::Invalid(format!("HTTP_SERVER_PORT: invalid port {}", raw))
        })?);
    }
    if let Some(raw) = var("TLS_ENABLED") {
        overrides.tls_enabled = Some(parse_bool("HTTP_SERVER_TLS_ENABLED", &raw)?);
    }
    overrides.tls_cert_file = var("TLS_CERT_FILE").map(PathBuf::from);
    overrides.tls_key_file = var("TLS_KEY_FILE").map(PathBuf::from);
    if let Some(raw) = var("MAX_BODY_SIZE") {
        overrides.max_body_size = Some(raw.parse().map_err(|_| {
            ConfigError::Invalid(format!("HTTP_SERVER_MAX_BODY_SIZE: invalid size {}", raw))
        })?);
    }
    if let Some(raw) = var("MAX_HEADERS_SIZE") {
        overrides.max_headers_size = Some(raw.parse().map_err(|_| {
            ConfigError::Invalid(format!("HTTP_SERVER_MAX_HEADERS_SIZE: invalid size {}", raw))
        })?);
    }
    if let Some(raw) = var("TIMEOUT_SECONDS") {
        overrides.timeout_seconds = Some(raw.parse().map_err(|_| {
            ConfigError::Invalid(format!("HTTP_SERVER_TIMEOUT_SECONDS: invalid value {}", raw))
        })?);
    }
    if let Some(raw) = var("LOG_LEVEL") {
        overrides.log_level = Some(LogLevel::parse(&raw)?);
    }
    if let Some(raw) = var("LOG_FORMAT") {
        overrides.log_format = Some(LogFormat::parse(&raw)?);
    }

    Ok(overrides)
}

fn parse_bool(name: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::Invalid(format!(
            "{}: expected a boolean, got {:?}",
            name, other
        ))),
    }
}

// JSON config file shape. Unknown keys are ignored by default; type
// mismatches surface serde's message.

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    server: Option<FileServer>,
    limits: Option<FileLimits>,
    logging: Option<FileLogging>,
}

#[derive(Debug, Default, Deserialize)]
struct FileServer {
    host: Option<String>,
    port: Option<u16>,
    tls: Option<FileTls>,
}

#[derive(Debug, Default, Deserialize)]
struct FileTls {
    enabled: Option<bool>,
    cert_file: Option<PathBuf>,
    key_file: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct FileLimits {
    max_body_size: Option<usize>,
    max_headers_size: Option<usize>,
    timeout_seconds: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct FileLogging {
    level: Option<String>,
    format: Option<String>,
}

fn load_file(path: &PathBuf) -> Result<Overrides, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.clone(),
        source,
    })?;
    let file: FileConfig = serde_json::from_str(&text).map_err(|source| ConfigError::Json {
        path: path.clone(),
        source,
    })?;

    let mut overrides = Overrides::default();
    if let Some(server) = file.server {
        overrides.host = server.host;
        overrides.port = server.port;
        if let Some(tls) = server.tls {
            overrides.tls_enabled = tls.enabled;
            overrides.tls_cert_file = tls.cert_file;
            overrides.tls_key_file = tls.key_file;
        }
    }
    if let Some(limits) = file.limits {
        overrides.max_body_size = limits.max_body_size;
        overrides.max_headers_size = limits.max_headers_size;
        overrides.timeout_seconds = limits.timeout_seconds;
    }
    if let Some(logging) = file.logging {
        if let Some(level) = logging.level {
            overrides.log_level = Some(LogLevel::parse(&level)?);
        }
        if let Some(format) = logging.format {
            overrides.log_format = Some(LogFormat::parse(&format)?);
        }
    }

    Ok(overrides)
}

impl Config {
    /// Resolve the final configuration from CLI and environment layers.
    ///
    /// Precedence: defaults, then the config file (if any), then CLI
    /// flags, then environment variables.
    pub fn resolve(cli: Overrides, env: Overrides) -> Result<Config, ConfigError> {
        let mut layers = Vec::new();
        if let Some(path) = &cli.config_path {
            layers.push(load_file(path)?);
        }
        layers.push(cli);
        layers.push(env);

        let mut config = Config::default();
        let mut tls_enabled = false;
        let mut cert_file = None;
        let mut key_file = None;

        for layer in layers {
            if let Some(host) = layer.host {
                config.host = host;
            }
            if let Some(port) = layer.port {
                config.port = port;
            }
            if let Some(enabled) = layer.tls_enabled {
                tls_enabled = enabled;
            }
            if let Some(path) = layer.tls_cert_file {
                cert_file = Some(path);
            }
            if let Some(path) = layer.tls_key_file {
                key_file = Some(path);
            }
            if let Some(size) = layer.max_body_size {
                config.max_body_size = size;
            }
            if let Some(size) = layer.max_headers_size {
                config.max_headers_size = size;
            }
            if let Some(secs) = layer.timeout_seconds {
                config.timeout = Duration::from_secs(secs);
            }
            if let Some(level) = layer.log_level {
                config.log_level = level;
            }
            if let Some(format) = layer.log_format {
                config.log_format = format;
            }
        }

        if config.max_body_size < 1024 {
            return Err(ConfigError::Invalid(format!(
                "max body size must be at least 1024 bytes, got {}",
                config.max_body_size
            )));
        }
        if config.max_headers_size < 1024 {
            return Err(ConfigError::Invalid(format!(
                "max headers size must be at least 1024 bytes, got {}",
                config.max_headers_size
            )));
        }
        if config.timeout < Duration::from_secs(1) {
            return Err(ConfigError::Invalid(
                "timeout must be at least 1 second".to_string(),
            ));
        }

        if tls_enabled {
            match (cert_file, key_file) {
                (Some(cert), Some(key)) => {
                    config.tls = Some(TlsSettings {
                        cert_file: cert,
                        key_file: key,
                    });
                }
                (None, _) => {
                    return Err(ConfigError::Invalid(
                        "TLS is enabled but no certificate file was given".to_string(),
                    ))
                }
                (_, None) => {
                    return Err(ConfigError::Invalid(
                        "TLS is enabled but no private key file was given".to_string(),
                    ))
                }
            }
        }

        Ok(config)
    }
}
