//! Layered configuration using Figment.
//!
//! Configuration is assembled from, in increasing order of precedence:
//! 1. Compiled-in defaults (`Settings::default()`)
//! 2. A TOML file (`config/impedance.toml` unless another path is given)
//! 3. Environment variables prefixed with `IMPEDANCE_`
//!
//! # Environment Variable Overrides
//!
//! Sections and keys are separated by a double underscore so that keys may
//! themselves contain underscores:
//!
//! ```text
//! IMPEDANCE_APPLICATION__LOG_LEVEL=debug
//! IMPEDANCE_ANALYZER__POLLING_FREQUENCY_HZ=50
//! IMPEDANCE_PROCESSING__ANALYSIS_WINDOW_SECS=20
//! ```
//!
//! # Example
//!
//! ```no_run
//! use chest_impedance::config::Settings;
//!
//! let settings = Settings::load(None)?;
//! println!("Polling at {} Hz", settings.analyzer.polling_frequency_hz);
//! # Ok::<(), chest_impedance::config::ConfigError>(())
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default location of the configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/impedance.toml";

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "IMPEDANCE_";

/// Highest stimulus amplitude (peak-to-0 volts) allowed on the device under
/// test: human subjects with intact skin at 100 kHz. The total voltage across
/// the adapter may be higher.
pub const MAX_SUBJECT_AMPLITUDE_VOLTS: f64 = 1e-3;

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration load error: {0}")]
    LoadError(#[from] figment::Error),
    #[error("Configuration file not found: {0}")]
    NotFound(PathBuf),
    #[error("Configuration validation error: {0}")]
    ValidationError(String),
    #[error("Configuration serialization error: {0}")]
    SerializeError(#[from] toml::ser::Error),
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Application settings
    pub application: ApplicationConfig,
    /// Impedance analyzer (hardware) settings
    pub analyzer: AnalyzerConfig,
    /// Windowing and analysis settings
    pub processing: ProcessingConfig,
    /// Live display settings
    pub gui: GuiConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format
    pub log_format: LogFormat,
}

/// Log line formatting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human readable, ANSI coloured when attached to a terminal.
    Pretty,
    /// One JSON object per line.
    Json,
}

/// How the device under test is wired to the analyzer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImpedanceMode {
    /// W1-C1-DUT-C2-R-GND
    DutFirst,
    /// W1-C1-R-C2-DUT-GND
    ReferenceFirst,
    /// Analog Discovery impedance analyzer adapter (reference resistor is ignored)
    ImpedanceAdapter,
}

impl ImpedanceMode {
    /// SDK mode code passed to `FDwfAnalogImpedanceModeSet`.
    pub fn code(self) -> i32 {
        match self {
            ImpedanceMode::DutFirst => 0,
            ImpedanceMode::ReferenceFirst => 1,
            ImpedanceMode::ImpedanceAdapter => 8,
        }
    }
}

/// Impedance analyzer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Wiring of the device under test
    pub mode: ImpedanceMode,
    /// Stimulus frequency the impedance is measured at (Hz)
    pub measurement_frequency_hz: f64,
    /// How often the impedance is read (Hz)
    pub polling_frequency_hz: f64,
    /// Reference resistor (ohms); ignored with the adapter
    pub reference_resistance_ohms: f64,
    /// Stimulus amplitude, peak-to-0 (volts)
    pub amplitude_volts: f64,
    /// DC offset of the stimulus (volts)
    pub offset_volts: f64,
    /// Stimulus periods averaged per measurement
    pub minimum_periods: u32,
    /// Readings at or below this are rejected (ohms)
    pub min_valid_ohms: f64,
    /// Readings at or above this are rejected (ohms)
    pub max_valid_ohms: f64,
    /// Delay between connection attempts (ms)
    pub reconnect_interval_ms: u64,
    /// Explicit path to the WaveForms SDK library
    pub library_path: Option<PathBuf>,
}

impl AnalyzerConfig {
    /// Seconds between polls.
    pub fn polling_period(&self) -> f64 {
        1.0 / self.polling_frequency_hz
    }

    /// Physiologically plausible readings only.
    pub fn is_valid_reading(&self, ohms: f64) -> bool {
        ohms > self.min_valid_ohms && ohms < self.max_valid_ohms
    }
}

/// Windowing and analysis configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Length of the analysed window (seconds)
    pub analysis_window_secs: f64,
    /// Interval between analyses (seconds)
    pub analysis_period_secs: f64,
    /// Largest timing jitter, as a fraction of the period, tolerated without resampling
    pub resample_threshold_proportion: f64,
    /// Frequency band searched for the respiratory rate (Hz), `[low, high]`
    pub respiratory_band_hz: [f64; 2],
}

/// Live display configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuiConfig {
    /// Samples kept in the live plot
    pub plot_capacity: usize,
    /// Capacity of the broadcast channel feeding viewers
    pub event_capacity: usize,
    /// Initial window width (points)
    pub window_width: f32,
    /// Initial window height (points)
    pub window_height: f32,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
        }
    }
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            mode: ImpedanceMode::ImpedanceAdapter,
            measurement_frequency_hz: 100e3,
            polling_frequency_hz: 1e2,
            reference_resistance_ohms: 100.0,
            amplitude_volts: 1e-3,
            offset_volts: 0.0,
            minimum_periods: 32,
            min_valid_ohms: 0.0,
            max_valid_ohms: 1e6,
            reconnect_interval_ms: 1000,
            library_path: None,
        }
    }
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        // The previous 10 seconds every 5 seconds: long enough for respiration,
        // short enough for low-latency VAE detection.
        Self {
            analysis_window_secs: 10.0,
            analysis_period_secs: 5.0,
            resample_threshold_proportion: 0.5,
            respiratory_band_hz: [0.1, 1.0],
        }
    }
}

impl Default for GuiConfig {
    fn default() -> Self {
        Self {
            plot_capacity: 5000,
            event_capacity: 4096,
            window_width: 800.0,
            window_height: 600.0,
        }
    }
}

// ============================================================================
// Configuration Loading and Validation
// ============================================================================

impl Settings {
    /// Load configuration from defaults, a TOML file, and the environment.
    ///
    /// With `path == None` the default file is used if it exists. An explicitly
    /// given path must exist.
    ///
    /// # Errors
    ///
    /// Returns a ConfigError if:
    /// - An explicit config file does not exist
    /// - The file or an environment override cannot be parsed
    /// - Configuration validation fails
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(path) if !path.exists() => return Err(ConfigError::NotFound(path.to_path_buf())),
            Some(path) => path.to_path_buf(),
            None => PathBuf::from(DEFAULT_CONFIG_PATH),
        };
        Self::figment(&path).extract::<Self>()?.validated()
    }

    /// The provider stack used by [`Settings::load`].
    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    fn validated(self) -> Result<Self, ConfigError> {
        self.validate()?;
        Ok(self)
    }

    /// Validate configuration after loading
    ///
    /// Checks:
    /// - Log level is valid (trace, debug, info, warn, error)
    /// - Stimulus amplitude is positive and within the human-subject limit
    /// - Frequencies, periods and the reference resistor are positive
    /// - The valid reading range is non-empty
    /// - Analysis window, period, jitter threshold and band are coherent
    /// - GUI buffers are non-zero
    ///
    /// # Errors
    ///
    /// Returns a ConfigError with a descriptive message for any validation failure.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: String| Err(ConfigError::ValidationError(message));

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return invalid(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            ));
        }

        let analyzer = &self.analyzer;
        if !(analyzer.amplitude_volts > 0.0 && analyzer.amplitude_volts <= MAX_SUBJECT_AMPLITUDE_VOLTS)
        {
            return invalid(format!(
                "Invalid amplitude_volts {}. Must be > 0 and <= {} V on human subjects",
                analyzer.amplitude_volts, MAX_SUBJECT_AMPLITUDE_VOLTS
            ));
        }
        for (name, value) in [
            ("measurement_frequency_hz", analyzer.measurement_frequency_hz),
            ("polling_frequency_hz", analyzer.polling_frequency_hz),
            ("reference_resistance_ohms", analyzer.reference_resistance_ohms),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return invalid(format!("Invalid {name} {value}. Must be > 0"));
            }
        }
        if analyzer.minimum_periods == 0 {
            return invalid("Invalid minimum_periods 0. Must be > 0".to_string());
        }
        if analyzer.min_valid_ohms >= analyzer.max_valid_ohms {
            return invalid(format!(
                "Invalid reading range ({}, {}). min_valid_ohms must be below max_valid_ohms",
                analyzer.min_valid_ohms, analyzer.max_valid_ohms
            ));
        }

        let processing = &self.processing;
        if !(processing.analysis_window_secs > 0.0 && processing.analysis_period_secs > 0.0) {
            return invalid(format!(
                "Invalid analysis window {} s / period {} s. Both must be > 0",
                processing.analysis_window_secs, processing.analysis_period_secs
            ));
        }
        let threshold = processing.resample_threshold_proportion;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return invalid(format!(
                "Invalid resample_threshold_proportion {threshold}. Must be in (0, 1]"
            ));
        }
        let [low, high] = processing.respiratory_band_hz;
        if !(low >= 0.0 && low < high) {
            return invalid(format!(
                "Invalid respiratory_band_hz [{low}, {high}]. Must satisfy 0 <= low < high"
            ));
        }

        if self.gui.plot_capacity == 0 || self.gui.event_capacity == 0 {
            return invalid("Invalid gui buffers. plot_capacity and event_capacity must be > 0".into());
        }

        Ok(())
    }

    /// Effective configuration rendered as TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.analyzer.mode.code(), 8);
        assert!((settings.analyzer.polling_period() - 0.01).abs() < 1e-12);
    }

    #[test]
    fn test_invalid_log_level() {
        let mut settings = Settings::default();
        settings.application.log_level = "verbose".to_string();
        let result = settings.validate();
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Invalid log_level"));
    }

    #[test]
    fn test_amplitude_above_subject_limit_rejected() {
        let mut settings = Settings::default();
        settings.analyzer.amplitude_volts = 2e-3;
        let err = settings.validate().unwrap_err().to_string();
        assert!(err.contains("amplitude_volts"));
    }

    #[test]
    fn test_zero_polling_frequency_rejected() {
        let mut settings = Settings::default();
        settings.analyzer.polling_frequency_hz = 0.0;
        let err = settings.validate().unwrap_err().to_string();
        assert!(err.contains("polling_frequency_hz"));
    }

    #[test]
    fn test_empty_reading_range_rejected() {
        let mut settings = Settings::default();
        settings.analyzer.min_valid_ohms = 10.0;
        settings.analyzer.max_valid_ohms = 10.0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_inverted_band_rejected() {
        let mut settings = Settings::default();
        settings.processing.respiratory_band_hz = [1.0, 0.1];
        let err = settings.validate().unwrap_err().to_string();
        assert!(err.contains("respiratory_band_hz"));
    }

    #[test]
    fn test_reading_validity_is_exclusive() {
        let analyzer = AnalyzerConfig::default();
        assert!(!analyzer.is_valid_reading(0.0));
        assert!(analyzer.is_valid_reading(55.0));
        assert!(!analyzer.is_valid_reading(1e6));
        assert!(!analyzer.is_valid_reading(f64::NAN));
    }

    #[test]
    fn test_toml_round_trip_of_defaults() {
        let rendered = Settings::default().to_toml().unwrap();
        assert!(rendered.contains("[analyzer]"));
        assert!(rendered.contains("mode = \"impedance_adapter\""));
        let parsed: Settings = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed, Settings::default());
    }
}
