//! Tracing subscriber setup.
//!
//! `RUST_LOG` takes precedence over the configured `application.log_level`, so
//! fine-grained filters such as `RUST_LOG=chest_impedance::source=trace` work
//! without touching the configuration file.

use crate::config::{ApplicationConfig, LogFormat};
use crate::error::{AppResult, ImpedanceError};
use tracing_subscriber::EnvFilter;

/// Build the filter from `RUST_LOG`, falling back to the configured level.
pub fn env_filter(config: &ApplicationConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level))
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init(config: &ApplicationConfig) -> AppResult<()> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter(config))
        .with_thread_names(true);

    let installed = match config.log_format {
        LogFormat::Pretty => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };

    installed.map_err(|err| ImpedanceError::Logging(err.to_string()))
}
