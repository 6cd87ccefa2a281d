//! Custom error types for the application.
//!
//! `ImpedanceError` is the single error type returned by the library. It is built
//! with `thiserror` and consolidates the failure sources of the acquisition
//! pipeline:
//!
//! - **`Config`**: loading or validating the layered configuration.
//! - **`Io`** / **`Csv`**: file access for recordings.
//! - **`Recording`**: a recording file that parses but is not a list of `t,v` pairs.
//! - **`Library`** / **`Instrument`**: the WaveForms SDK could not be loaded, or the
//!   device reported an error.
//! - **`NonMonotonicSample`**: a sample arrived out of time order.
//! - **`Processing`**: invalid arguments to the windowing/analysis stages.
//! - **`FeatureNotEnabled`**: functionality compiled out via feature flags.
//!
//! `#[from]` conversions let the `?` operator lift the underlying errors.

use crate::config::ConfigError;
use std::path::PathBuf;
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, ImpedanceError>;

#[derive(Error, Debug)]
pub enum ImpedanceError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid recording {path}: line {line}: {reason}")]
    Recording {
        path: PathBuf,
        line: u64,
        reason: String,
    },

    #[error("WaveForms SDK error: {0}")]
    Library(#[from] dwf_sys::LoadError),

    #[error("Instrument error: {0}")]
    Instrument(String),

    #[error("Sample at t={next} is not after the previous sample at t={previous}")]
    NonMonotonicSample { previous: f64, next: f64 },

    #[error("Data processing error: {0}")]
    Processing(String),

    #[error("Data source '{0}' is already running")]
    AlreadyStarted(String),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("GUI error: {0}")]
    Gui(String),

    #[error("Failed to install log subscriber: {0}")]
    Logging(String),

    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),
}

impl ImpedanceError {
    /// True when the error is a missing file, so callers can report the path plainly.
    pub fn is_not_found(&self) -> bool {
        match self {
            ImpedanceError::Io(err) => err.kind() == std::io::ErrorKind::NotFound,
            ImpedanceError::Csv(err) => matches!(
                err.kind(),
                csv::ErrorKind::Io(io) if io.kind() == std::io::ErrorKind::NotFound
            ),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ImpedanceError::Instrument("device unplugged".to_string());
        assert_eq!(err.to_string(), "Instrument error: device unplugged");
    }

    #[test]
    fn test_non_monotonic_display() {
        let err = ImpedanceError::NonMonotonicSample {
            previous: 1.5,
            next: 1.0,
        };
        assert!(err.to_string().contains("t=1 is not after"));
    }

    #[test]
    fn test_not_found_detection() {
        let err: ImpedanceError =
            std::io::Error::new(std::io::ErrorKind::NotFound, "missing").into();
        assert!(err.is_not_found());
        assert!(!ImpedanceError::Processing("x".into()).is_not_found());
    }
}
