//! Windowed analysis scheduling.
//!
//! The processor keeps the last `analysis_window_secs` of samples and analyses
//! them every `analysis_period_secs` once the window has filled, publishing the
//! intermediate series to a [`GraphicalDebuggingDelegate`].

use super::analysis::{detrend, WindowAnalysis};
use super::sample_queue::TimeValueSampleQueue;
use crate::config::ProcessingConfig;
use crate::core::{GraphicalDebuggingDelegate, TimeValueSample};
use crate::error::AppResult;
use tracing::{debug, info};

/// Trace label of the aligned analysis window.
pub const WINDOW_TRACE: &str = "Analysis window";
/// Trace label of the detrended analysis window.
pub const DETRENDED_TRACE: &str = "Detrended";

pub struct DataProcessor {
    expected_sampling_period: f64,
    config: ProcessingConfig,
    delegate: Box<dyn GraphicalDebuggingDelegate>,
    sample_queue: TimeValueSampleQueue,
    last_analysis_time: Option<f64>,
}

impl DataProcessor {
    pub fn new(
        expected_sampling_period: f64,
        config: ProcessingConfig,
        delegate: Box<dyn GraphicalDebuggingDelegate>,
    ) -> Self {
        Self {
            expected_sampling_period,
            sample_queue: TimeValueSampleQueue::new(config.analysis_window_secs),
            config,
            delegate,
            last_analysis_time: None,
        }
    }

    /// Feed one sample, analysing the window when one is due.
    pub fn on_sample(&mut self, sample: TimeValueSample) -> AppResult<Option<WindowAnalysis>> {
        self.sample_queue.push(sample)?;

        let due = match self.last_analysis_time {
            None => true,
            Some(last) => last + self.config.analysis_period_secs < sample.t,
        };
        if !(self.sample_queue.is_filled() && due) {
            return Ok(None);
        }

        let analysis = self.process_samples()?;
        self.last_analysis_time = Some(sample.t);
        Ok(analysis)
    }

    /// Analyse the current window.
    pub fn process_samples(&mut self) -> AppResult<Option<WindowAnalysis>> {
        let samples = self.sample_queue.samples(
            Some(self.expected_sampling_period),
            self.config.resample_threshold_proportion,
        )?;
        self.delegate
            .graph_intermediate_samples(WINDOW_TRACE, &samples, true);

        let detrended = detrend(&samples);
        self.delegate
            .graph_intermediate_samples(DETRENDED_TRACE, &detrended, true);

        let analysis = WindowAnalysis::compute(
            &samples,
            self.expected_sampling_period,
            self.config.respiratory_band_hz,
        );
        match &analysis {
            Some(a) => info!(
                window_start = a.window_start,
                window_end = a.window_end,
                samples = a.sample_count,
                mean_ohms = a.mean_ohms,
                peak_to_peak_ohms = a.peak_to_peak_ohms,
                respiratory_rate_per_min = a.respiratory_rate_per_min,
                "Analysis window complete"
            ),
            None => debug!("Analysis window empty"),
        }
        Ok(analysis)
    }

    pub fn expected_sampling_period(&self) -> f64 {
        self.expected_sampling_period
    }

    /// Time of the sample that triggered the latest analysis.
    pub fn last_analysis_time(&self) -> Option<f64> {
        self.last_analysis_time
    }
}
