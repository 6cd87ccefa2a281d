//! Data source implementations.
//!
//! - [`replay::ReplaySource`] plays back a CSV recording in real time.
//! - [`analyzer::AnalyzerSource`] polls an [`crate::hardware::ImpedanceAnalyzer`].

pub mod analyzer;
pub mod replay;

pub use analyzer::AnalyzerSource;
pub use replay::ReplaySource;
