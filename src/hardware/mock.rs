//! Simulated impedance analyzer.
//!
//! `MockAnalyzer` stands in for an Analog Discovery connected to a subject.
//! Each reading is the waveform below evaluated at the time elapsed since the
//! analysis was configured, so skipped or pending polls do not shift it
//! against the sample times:
//!
//! - 50 Ω baseline
//! - 0.5 Ω respiratory component at 0.25 Hz (15 breaths/min)
//! - 0.05 Ω cardiac component at 1.2 Hz (72 beats/min)
//!
//! Faults can be injected to exercise the polling loop: invalid readings,
//! pending statuses, a failing status query, and a device that only shows up
//! after a few enumerations.

use super::{AnalyzerStatus, DeviceInfo, ImpedanceAnalyzer};
use crate::config::AnalyzerConfig;
use crate::error::{AppResult, ImpedanceError};
use std::f64::consts::PI;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Counters shared with the test or caller that created the mock.
#[derive(Debug, Default)]
pub struct MockCounters {
    enumerations: AtomicU64,
    status_polls: AtomicU64,
    readings: AtomicU64,
    closes: AtomicU64,
}

impl MockCounters {
    pub fn enumerations(&self) -> u64 {
        self.enumerations.load(Ordering::SeqCst)
    }

    pub fn status_polls(&self) -> u64 {
        self.status_polls.load(Ordering::SeqCst)
    }

    pub fn readings(&self) -> u64 {
        self.readings.load(Ordering::SeqCst)
    }

    /// Times an open device was closed.
    pub fn closes(&self) -> u64 {
        self.closes.load(Ordering::SeqCst)
    }
}

// =============================================================================
// MockAnalyzer
// =============================================================================

/// Simulated Analog Discovery with an impedance adapter.
///
/// # Example
///
/// ```rust,ignore
/// let analyzer = MockAnalyzer::new()
///     .with_invalid_every(10)
///     .with_device_after(3);
/// ```
#[derive(Debug)]
pub struct MockAnalyzer {
    baseline_ohms: f64,
    respiration: (f64, f64),
    cardiac: (f64, f64),
    started: Option<Instant>,
    invalid_every: Option<u64>,
    pending_every: Option<u64>,
    fail_status_after: Option<u64>,
    device_after: u64,
    open_failures: u64,
    open: bool,
    running: bool,
    last_error: Option<String>,
    counters: Arc<MockCounters>,
}

impl MockAnalyzer {
    pub fn new() -> Self {
        Self {
            baseline_ohms: 50.0,
            respiration: (0.5, 0.25),
            cardiac: (0.05, 1.2),
            started: None,
            invalid_every: None,
            pending_every: None,
            fail_status_after: None,
            device_after: 0,
            open_failures: 0,
            open: false,
            running: false,
            last_error: None,
            counters: Arc::default(),
        }
    }

    /// Every `n`th reading is out of range (negative).
    pub fn with_invalid_every(mut self, n: u64) -> Self {
        self.invalid_every = Some(n.max(1));
        self
    }

    /// Every `n`th status poll reports a pending measurement.
    pub fn with_pending_every(mut self, n: u64) -> Self {
        self.pending_every = Some(n.max(1));
        self
    }

    /// Status queries fail once `polls` have succeeded.
    pub fn with_status_failure_after(mut self, polls: u64) -> Self {
        self.fail_status_after = Some(polls);
        self
    }

    /// No device is reported until the `n`th enumeration (1-based).
    pub fn with_device_after(mut self, n: u64) -> Self {
        self.device_after = n;
        self
    }

    /// The first `n` open attempts fail.
    pub fn with_open_failures(mut self, n: u64) -> Self {
        self.open_failures = n;
        self
    }

    pub fn counters(&self) -> Arc<MockCounters> {
        Arc::clone(&self.counters)
    }

    /// Simulated chest impedance at time `t` seconds.
    pub fn impedance_at(&self, t: f64) -> f64 {
        let (resp_amp, resp_hz) = self.respiration;
        let (card_amp, card_hz) = self.cardiac;
        self.baseline_ohms
            + resp_amp * (2.0 * PI * resp_hz * t).sin()
            + card_amp * (2.0 * PI * card_hz * t).sin()
    }

    fn device_present(&self) -> bool {
        self.counters.enumerations() >= self.device_after
    }
}

impl Default for MockAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl ImpedanceAnalyzer for MockAnalyzer {
    fn enumerate(&mut self) -> AppResult<Vec<DeviceInfo>> {
        self.counters.enumerations.fetch_add(1, Ordering::SeqCst);
        if !self.device_present() {
            return Ok(Vec::new());
        }
        Ok(vec![DeviceInfo {
            name: "Analog Discovery 2 (simulated)".into(),
            serial_number: "SN:SIMULATED".into(),
            in_use: self.open,
        }])
    }

    fn open_first(&mut self) -> AppResult<bool> {
        if !self.device_present() {
            self.last_error = Some("No device detected".into());
            return Ok(false);
        }
        if self.open_failures > 0 {
            self.open_failures -= 1;
            self.last_error = Some("Device is busy".into());
            return Ok(false);
        }
        self.open = true;
        self.last_error = None;
        Ok(true)
    }

    fn last_error(&mut self) -> Option<String> {
        self.last_error.clone()
    }

    fn configure(&mut self, _config: &AnalyzerConfig) -> AppResult<()> {
        if !self.open {
            return Err(ImpedanceError::Instrument("device is not open".into()));
        }
        self.started = Some(Instant::now());
        self.running = true;
        Ok(())
    }

    fn status(&mut self) -> AppResult<AnalyzerStatus> {
        if !self.running {
            return Err(ImpedanceError::Instrument("analysis not started".into()));
        }
        let polls = self.counters.status_polls.fetch_add(1, Ordering::SeqCst) + 1;
        if matches!(self.fail_status_after, Some(limit) if polls > limit) {
            self.last_error = Some("Device disconnected".into());
            return Err(ImpedanceError::Instrument(
                "FDwfAnalogImpedanceStatus failed: Device disconnected".into(),
            ));
        }
        match self.pending_every {
            Some(n) if polls % n == 0 => Ok(AnalyzerStatus::Pending(1)),
            _ => Ok(AnalyzerStatus::Done),
        }
    }

    fn read_resistance(&mut self) -> AppResult<f64> {
        let index = self.counters.readings.fetch_add(1, Ordering::SeqCst) + 1;
        if matches!(self.invalid_every, Some(n) if index % n == 0) {
            return Ok(-1.0);
        }
        let t = self
            .started
            .map_or(0.0, |started| started.elapsed().as_secs_f64());
        Ok(self.impedance_at(t))
    }

    fn close(&mut self) {
        if self.open {
            self.counters.closes.fetch_add(1, Ordering::SeqCst);
        }
        self.open = false;
        self.running = false;
        self.started = None;
    }
}
