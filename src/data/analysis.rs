//! Features extracted from one analysis window.
//!
//! The respiratory rate is taken from the strongest spectral peak inside the
//! configured band: the detrended window is Hann-windowed, transformed with
//! `rustfft`, and the single-sided magnitude spectrum searched bin by bin.

use crate::core::TimeValueSample;
use num_complex::Complex;
use rustfft::FftPlanner;
use serde::{Deserialize, Serialize};

/// Magnitudes at or below this are treated as a flat signal.
const FLAT_MAGNITUDE: f64 = 1e-12;

/// Location and strength of a spectral peak.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrequencyPeak {
    /// Hz
    pub frequency: f64,
    /// Single-sided amplitude, same unit as the input
    pub magnitude: f64,
}

/// Summary of one analysed window.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WindowAnalysis {
    pub window_start: f64,
    pub window_end: f64,
    pub sample_count: usize,
    pub mean_ohms: f64,
    pub peak_to_peak_ohms: f64,
    /// Breaths per minute, when a respiratory peak was found.
    pub respiratory_rate_per_min: Option<f64>,
}

impl WindowAnalysis {
    /// Analyse uniformly spaced `samples`. Returns `None` for an empty window.
    pub fn compute(
        samples: &[TimeValueSample],
        sample_period: f64,
        respiratory_band_hz: [f64; 2],
    ) -> Option<Self> {
        let first = samples.first()?;
        let last = samples.last()?;

        let count = samples.len() as f64;
        let mean_ohms = samples.iter().map(|s| s.v).sum::<f64>() / count;
        let (min, max) = samples
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), s| {
                (lo.min(s.v), hi.max(s.v))
            });

        let detrended: Vec<f64> = detrend(samples).iter().map(|s| s.v).collect();
        let respiratory_rate_per_min =
            dominant_frequency(&detrended, sample_period, respiratory_band_hz)
                .map(|peak| peak.frequency * 60.0);

        Some(Self {
            window_start: first.t,
            window_end: last.t,
            sample_count: samples.len(),
            mean_ohms,
            peak_to_peak_ohms: max - min,
            respiratory_rate_per_min,
        })
    }
}

/// Remove the least-squares linear trend (value against time).
pub fn detrend(samples: &[TimeValueSample]) -> Vec<TimeValueSample> {
    if samples.is_empty() {
        return Vec::new();
    }
    let count = samples.len() as f64;
    let mean_t = samples.iter().map(|s| s.t).sum::<f64>() / count;
    let mean_v = samples.iter().map(|s| s.v).sum::<f64>() / count;

    let (covariance, variance) = samples.iter().fold((0.0, 0.0), |(cov, var), s| {
        let dt = s.t - mean_t;
        (cov + dt * (s.v - mean_v), var + dt * dt)
    });
    let slope = if variance > 0.0 { covariance / variance } else { 0.0 };

    samples
        .iter()
        .map(|s| s.with_value(s.v - (mean_v + slope * (s.t - mean_t))))
        .collect()
}

/// Strongest non-DC spectral peak with a frequency inside `band` (inclusive).
pub fn dominant_frequency(
    values: &[f64],
    sample_period: f64,
    band: [f64; 2],
) -> Option<FrequencyPeak> {
    let n = values.len();
    if n < 2 || !(sample_period > 0.0) {
        return None;
    }

    let hann = (0..n).map(|i| 0.5 * (1.0 - (2.0 * std::f64::consts::PI * i as f64 / (n - 1) as f64).cos()));
    let mut buffer: Vec<Complex<f64>> = values
        .iter()
        .zip(hann)
        .map(|(&v, w)| Complex::new(v * w, 0.0))
        .collect();
    FftPlanner::new().plan_fft_forward(n).process(&mut buffer);

    let resolution = 1.0 / (n as f64 * sample_period);
    let [low, high] = band;

    buffer
        .iter()
        .enumerate()
        .take(n / 2 + 1)
        .skip(1)
        .map(|(k, c)| FrequencyPeak {
            frequency: k as f64 * resolution,
            magnitude: c.norm() * 2.0 / n as f64,
        })
        .filter(|peak| peak.frequency >= low && peak.frequency <= high)
        .filter(|peak| peak.magnitude > FLAT_MAGNITUDE)
        .max_by(|a, b| a.magnitude.total_cmp(&b.magnitude))
}
