//! Live acquisition from an impedance analyzer.
//!
//! The analyzer is driven from a dedicated blocking thread
//! (`spawn_blocking`): SDK calls block, and the poll schedule needs a thread
//! that sleeps precisely rather than an async task sharing a worker.
//!
//! # Poll schedule
//!
//! Slot `n` is due `n * period` after the analysis starts, and its sample is
//! stamped with exactly that time. If the thread falls behind, overdue slots
//! are skipped; slots skipped by more than one period are reported as
//! dropped.

use crate::config::AnalyzerConfig;
use crate::core::{DataSource, SourceEvent, TimeValueSample};
use crate::data::recording::RecordingWriter;
use crate::error::{AppResult, ImpedanceError};
use crate::hardware::{AnalyzerStatus, ImpedanceAnalyzer};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Longest uninterrupted sleep, so that `stop` is noticed promptly.
const STOP_CHECK_INTERVAL: Duration = Duration::from_millis(50);

pub struct AnalyzerSource<A> {
    name: String,
    config: AnalyzerConfig,
    analyzer: Option<A>,
    recording: Option<RecordingWriter>,
    stopped: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl<A: ImpedanceAnalyzer + 'static> AnalyzerSource<A> {
    pub fn new(analyzer: A, config: AnalyzerConfig) -> Self {
        Self {
            name: "Analog Discovery".to_string(),
            config,
            analyzer: Some(analyzer),
            recording: None,
            stopped: Arc::new(AtomicBool::new(true)),
            task: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Append every valid sample to `recording`.
    pub fn with_recording(mut self, recording: RecordingWriter) -> Self {
        self.recording = Some(recording);
        self
    }
}

#[async_trait]
impl<A: ImpedanceAnalyzer + 'static> DataSource for AnalyzerSource<A> {
    fn name(&self) -> &str {
        &self.name
    }

    fn expected_sampling_period(&self) -> Option<f64> {
        Some(self.config.polling_period())
    }

    async fn start(&mut self, events: mpsc::Sender<SourceEvent>) -> AppResult<()> {
        let analyzer = match self.analyzer.take() {
            Some(analyzer) if self.is_stopped() => analyzer,
            other => {
                self.analyzer = other;
                return Err(ImpedanceError::AlreadyStarted(self.name.clone()));
            }
        };

        self.stopped.store(false, Ordering::SeqCst);
        let poller = Poller {
            analyzer,
            config: self.config.clone(),
            recording: self.recording.take(),
            stopped: Arc::clone(&self.stopped),
            events,
        };
        self.task = Some(tokio::task::spawn_blocking(move || poller.run()));
        Ok(())
    }

    async fn stop(&mut self) -> AppResult<()> {
        self.stopped.store(true, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            task.await?;
        }
        Ok(())
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// State owned by the polling thread.
struct Poller<A> {
    analyzer: A,
    config: AnalyzerConfig,
    recording: Option<RecordingWriter>,
    stopped: Arc<AtomicBool>,
    events: mpsc::Sender<SourceEvent>,
}

#[derive(Debug, Default)]
struct PollStats {
    samples: u64,
    invalid: u64,
    pending: u64,
    dropped: u64,
}

impl<A: ImpedanceAnalyzer> Poller<A> {
    fn run(mut self) {
        let mut stats = PollStats::default();
        if let Err(err) = self.acquire(&mut stats) {
            error!(error = %err, "Analyzer fault");
            let _ = self.events.blocking_send(SourceEvent::Fault(err.to_string()));
        }
        self.analyzer.close();
        self.stopped.store(true, Ordering::SeqCst);
        info!(
            samples = stats.samples,
            invalid = stats.invalid,
            pending = stats.pending,
            dropped = stats.dropped,
            "Analyzer polling finished"
        );
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Sleep for `duration`, waking early if the source is stopped.
    fn sleep(&self, duration: Duration) {
        let deadline = Instant::now() + duration;
        while !self.is_stopped() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            std::thread::sleep(remaining.min(STOP_CHECK_INTERVAL));
        }
    }

    /// Wait for a device and open it. `Ok(false)` if stopped first.
    fn open_device(&mut self) -> AppResult<bool> {
        let reconnect = Duration::from_millis(self.config.reconnect_interval_ms);

        let mut logged_waiting = false;
        loop {
            let devices = self.analyzer.enumerate()?;
            for device in &devices {
                info!(
                    name = %device.name,
                    serial_number = %device.serial_number,
                    in_use = device.in_use,
                    "Enumerated analyzer"
                );
            }
            if !devices.is_empty() {
                break;
            }
            if !logged_waiting {
                info!("No analyzer connected. Awaiting device connection.");
                logged_waiting = true;
            }
            self.sleep(reconnect);
            if self.is_stopped() {
                return Ok(false);
            }
        }

        let mut last_error: Option<String> = None;
        while !self.is_stopped() {
            if self.analyzer.open_first()? {
                info!("Analyzer opened");
                return Ok(true);
            }
            let message = self.analyzer.last_error();
            if message != last_error {
                warn!(
                    error = message.as_deref().unwrap_or("unknown"),
                    "Failed to open analyzer"
                );
                last_error = message;
            }
            self.sleep(reconnect);
        }
        Ok(false)
    }

    fn acquire(&mut self, stats: &mut PollStats) -> AppResult<()> {
        if !self.open_device()? {
            return Ok(());
        }
        self.analyzer.configure(&self.config)?;
        let start = Instant::now();
        let period = self.config.polling_period();
        let mut sample_number: u64 = 0;

        while !self.is_stopped() {
            let elapsed = start.elapsed().as_secs_f64();
            let (wait, dropped) = next_slot(&mut sample_number, elapsed, period);
            if dropped > 0 {
                stats.dropped += dropped;
                warn!(
                    sample_number,
                    time = period * sample_number as f64,
                    dropped,
                    "Dropped sample"
                );
            }
            self.sleep(Duration::from_secs_f64(wait));
            if self.is_stopped() {
                break;
            }

            match self.analyzer.status()? {
                AnalyzerStatus::Done => {
                    let ohms = self.analyzer.read_resistance()?;
                    if !self.config.is_valid_reading(ohms) {
                        stats.invalid += 1;
                        debug!(sample_number, ohms, "Rejected reading");
                        continue;
                    }
                    let sample = TimeValueSample::new(period * sample_number as f64, ohms);
                    if self.events.blocking_send(SourceEvent::Sample(sample)).is_err() {
                        debug!("Sample receiver dropped");
                        break;
                    }
                    stats.samples += 1;
                    self.record(&sample);
                }
                AnalyzerStatus::Pending(code) => {
                    stats.pending += 1;
                    warn!(sample_number, status = code, "Measurement not ready");
                }
            }
        }
        Ok(())
    }

    fn record(&mut self, sample: &TimeValueSample) {
        let Some(recording) = self.recording.as_mut() else {
            return;
        };
        if let Err(err) = recording.append(sample) {
            error!(
                path = %recording.path().display(),
                error = %err,
                "Recording failed; continuing without it"
            );
            self.recording = None;
        }
    }
}

/// Advance `sample_number` to the first slot still in the future, given the
/// seconds `elapsed` since the start.
///
/// Returns the seconds to wait for it and how many skipped slots were more
/// than one period late.
fn next_slot(sample_number: &mut u64, elapsed: f64, period: f64) -> (f64, u64) {
    let mut dropped = 0;
    loop {
        *sample_number += 1;
        let wait = period * *sample_number as f64 - elapsed;
        if wait > 0.0 {
            return (wait, dropped);
        }
        if wait < -period {
            dropped += 1;
        }
    }
}
