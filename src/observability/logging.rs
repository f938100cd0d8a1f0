//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber once per process
//! - Select the output format from configuration
//!
//! # Design Decisions
//! - `RUST_LOG` wins over the configured level
//! - JSON format for log shipping, pretty format for interactive use

use crate::config::schema::LogFormat;
use tracing_subscriber::EnvFilter;

/// Build the filter used when `RUST_LOG` is unset.
pub fn default_filter(level: &str) -> String {
    format!("anycast_router={level}")
}

/// Install the global subscriber. Later calls are ignored.
pub fn init_logging(level: &str, format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter(level)));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let result = match format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
    };

    if let Err(e) = result {
        tracing::debug!(error = %e, "Logging already initialised");
    }
}
