//! A sliding time window of samples with optional alignment to a fixed period.
//!
//! Only the most recent `duration` seconds are kept. When the caller asks for a
//! fixed period, samples that already sit on an (offset) uniform grid are
//! re-timed onto it unchanged; anything else (dropped or extra samples, large
//! jitter) is Fourier-resampled.

use super::resample::fourier_resample;
use crate::core::TimeValueSample;
use crate::error::{AppResult, ImpedanceError};
use std::collections::VecDeque;
use tracing::debug;

/// Default fraction of the period that samples may stray from the grid before
/// resampling is required.
pub const DEFAULT_RESAMPLE_THRESHOLD_PROPORTION: f64 = 0.5;

#[derive(Clone, Debug)]
pub struct TimeValueSampleQueue {
    duration: f64,
    queue: VecDeque<TimeValueSample>,
    evicted: u64,
}

impl TimeValueSampleQueue {
    pub fn new(duration: f64) -> Self {
        Self {
            duration,
            queue: VecDeque::new(),
            evicted: 0,
        }
    }

    /// Append `sample` and drop samples older than the window.
    ///
    /// Samples must arrive in strictly increasing time order.
    pub fn push(&mut self, sample: TimeValueSample) -> AppResult<()> {
        if let Some(last) = self.queue.back() {
            if !(sample.t > last.t) {
                return Err(ImpedanceError::NonMonotonicSample {
                    previous: last.t,
                    next: sample.t,
                });
            }
        }
        self.queue.push_back(sample);

        while self.span() > self.duration {
            self.queue.pop_front();
            self.evicted += 1;
        }
        Ok(())
    }

    /// True once the window has been completely covered, i.e. at least one
    /// sample has aged out of it.
    pub fn is_filled(&self) -> bool {
        self.evicted > 0
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Seconds between the oldest and newest sample.
    pub fn span(&self) -> f64 {
        match (self.queue.front(), self.queue.back()) {
            (Some(first), Some(last)) => last.t - first.t,
            _ => 0.0,
        }
    }

    /// Window duration in seconds.
    pub fn duration(&self) -> f64 {
        self.duration
    }

    /// Copy of the window, optionally aligned to `desired_period`.
    ///
    /// See the module documentation for the alignment rules.
    pub fn samples(
        &self,
        desired_period: Option<f64>,
        resample_threshold_proportion: f64,
    ) -> AppResult<Vec<TimeValueSample>> {
        let period = match desired_period {
            Some(period) if !(period > 0.0) => {
                return Err(ImpedanceError::Processing(format!(
                    "desired period must be positive, got {period}"
                )))
            }
            Some(period) if !self.queue.is_empty() => period,
            _ => return Ok(self.queue.iter().copied().collect()),
        };

        let start = self.queue[0].t;
        let stop = self.queue[self.queue.len() - 1].t;
        let num = ((stop - start) / period).round() as usize + 1;
        let grid = linspace(start, stop, num);

        if num == self.queue.len() {
            let offset = self
                .queue
                .iter()
                .zip(&grid)
                .map(|(sample, g)| sample.t - g)
                .sum::<f64>()
                / num as f64;
            let max_error = self
                .queue
                .iter()
                .zip(&grid)
                .map(|(sample, g)| (sample.t - g - offset).abs())
                .fold(0.0, f64::max);

            if max_error < period * resample_threshold_proportion {
                return Ok(self
                    .queue
                    .iter()
                    .zip(&grid)
                    .map(|(sample, g)| sample.with_time(g + offset))
                    .collect());
            }
        }

        Ok(self.resampled(period, num))
    }

    fn resampled(&self, period: f64, num: usize) -> Vec<TimeValueSample> {
        let n = self.queue.len();
        let values: Vec<f64> = self.queue.iter().map(|s| s.v).collect();
        let resampled = fourier_resample(&values, num);

        let start = self.queue[0].t;
        let mean_dt = if n > 1 { self.span() / (n - 1) as f64 } else { period };
        let step = n as f64 * mean_dt / num as f64;

        let result: Vec<TimeValueSample> = resampled
            .into_iter()
            .enumerate()
            .map(|(j, v)| TimeValueSample::new(start + j as f64 * step, v))
            .collect();

        let extra = count_unmatched(self.queue.iter(), &result, period);
        debug!(
            from = n,
            to = num,
            extra_samples = extra,
            "Resampled window"
        );
        result
    }
}

/// `num` evenly spaced points from `start` to `stop` inclusive.
fn linspace(start: f64, stop: f64, num: usize) -> Vec<f64> {
    match num {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (stop - start) / (num - 1) as f64;
            (0..num)
                .map(|i| if i == num - 1 { stop } else { start + i as f64 * step })
                .collect()
        }
    }
}

/// Input samples that fall within half a period of no output slot (extra samples).
fn count_unmatched<'a>(
    input: impl Iterator<Item = &'a TimeValueSample>,
    output: &[TimeValueSample],
    period: f64,
) -> usize {
    let half = period / 2.0;
    let mut input = input.peekable();
    let mut unmatched = 0;
    for slot in output {
        while let Some(sample) = input.peek() {
            if sample.t < slot.t - half {
                unmatched += 1;
                input.next();
            } else {
                break;
            }
        }
        if matches!(input.peek(), Some(sample) if sample.t < slot.t + half) {
            input.next();
        }
    }
    unmatched + input.count()
}
