//! Core library for the `impedance` application.
//!
//! Chest impedance is measured with a Digilent Analog Discovery impedance
//! analyzer (or replayed from a CSV recording), windowed, aligned to a fixed
//! sampling period, and analysed for respiratory features. The binary wires
//! these pieces to a live plot or runs them headless.
//!
//! - [`core`]: samples, the `DataSource` trait and the debugging delegate.
//! - [`data`]: the sliding window, resampling, analysis and CSV recordings.
//! - [`source`]: replay and live analyzer sources.
//! - [`hardware`]: the analyzer abstraction over the WaveForms SDK.
//! - [`app`]: the session that connects a source to the pipeline and viewers.

pub mod app;
pub mod config;
pub mod core;
pub mod data;
pub mod error;
#[cfg(feature = "gui")]
pub mod gui;
pub mod hardware;
pub mod logging;
pub mod source;
