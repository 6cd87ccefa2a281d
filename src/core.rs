//! Core traits and data types for the impedance pipeline.
//!
//! # Data Flow
//!
//! ```text
//! DataSource --[SourceEvent]--> mpsc::channel ---> pipeline task ---> DataProcessor
//!                                                        |
//!                                                        +--> broadcast::channel ---> GUI
//! ```
//!
//! Sources run on their own task or blocking thread and never touch the
//! consumers directly. Everything downstream of the channel runs on the
//! pipeline task.
//!
//! # Thread Safety
//!
//! Sources and delegates are `Send` so they can be moved onto Tokio tasks.

use crate::error::AppResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// A single impedance reading.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimeValueSample {
    /// Seconds, relative to the start of acquisition for live sources.
    pub t: f64,
    /// Measured resistance in ohms.
    pub v: f64,
}

impl TimeValueSample {
    pub fn new(t: f64, v: f64) -> Self {
        Self { t, v }
    }

    /// Copy of this sample re-timed to `t`.
    pub fn with_time(self, t: f64) -> Self {
        Self { t, ..self }
    }

    /// Copy of this sample with value `v`.
    pub fn with_value(self, v: f64) -> Self {
        Self { v, ..self }
    }
}

/// Events delivered by a [`DataSource`].
#[derive(Clone, Debug, PartialEq)]
pub enum SourceEvent {
    /// A new reading.
    Sample(TimeValueSample),
    /// The source ran out of data (end of a replayed file).
    EndOfStream,
    /// The source failed and will deliver nothing further.
    Fault(String),
}

/// A producer of impedance samples.
///
/// `start` hands the source the sending half of the event channel; the source
/// delivers events from its own worker until it is stopped, runs out of data,
/// or faults. Dropping the sender is how consumers learn the worker is gone.
#[async_trait]
pub trait DataSource: Send {
    /// Human readable name for logs and the GUI.
    fn name(&self) -> &str;

    /// Nominal seconds between samples, if known.
    fn expected_sampling_period(&self) -> Option<f64>;

    /// Begin delivering events. Errors if already started.
    async fn start(&mut self, events: mpsc::Sender<SourceEvent>) -> AppResult<()>;

    /// Stop delivering events and wait for the worker to release its resources.
    ///
    /// Stopping a source that is not running is a no-op.
    async fn stop(&mut self) -> AppResult<()>;

    /// True before `start` and after `stop` or the end of data.
    fn is_stopped(&self) -> bool;
}

/// Receives derived sample data for validation and debugging.
pub trait GraphicalDebuggingDelegate: Send {
    /// Graph `samples` under `label`.
    ///
    /// `samples` need not be a complete series, but within one label times must
    /// keep increasing across calls unless `clear_first` is set, in which case
    /// the label's prior data is discarded first.
    fn graph_intermediate_samples(
        &mut self,
        label: &str,
        samples: &[TimeValueSample],
        clear_first: bool,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_copies() {
        let sample = TimeValueSample::new(1.0, 52.0);
        assert_eq!(sample.with_time(2.0), TimeValueSample::new(2.0, 52.0));
        assert_eq!(sample.with_value(48.5), TimeValueSample::new(1.0, 48.5));
        // Original is untouched.
        assert_eq!(sample.t, 1.0);
    }

    #[test]
    fn test_event_types() {
        let event = SourceEvent::Sample(TimeValueSample::new(0.01, 50.0));
        assert!(matches!(event, SourceEvent::Sample(_)));
        assert_ne!(SourceEvent::EndOfStream, SourceEvent::Fault("x".into()));
    }
}
