//! Logging setup
//!
//! Installs the process-wide tracing subscriber according to the resolved
//! configuration. Only the binary calls this; library code just emits
//! `tracing` events.

use crate::config::{LogFormat, LogLevel};
use tracing::level_filters::LevelFilter;

/// Install the global subscriber. Call once, from `main`.
pub fn init(level: LogLevel, format: LogFormat) {
    let filter = match level {
        LogLevel::Debug => LevelFilter::DEBUG,
        LogLevel::Info => LevelFilter::INFO,
        LogLevel::Warn => LevelFilter::WARN,
        LogLevel::Error => LevelFilter::ERROR,
    };

    let builder = tracing_subscriber::fmt()
        .with_max_level(filter)
        .with_target(false);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}
