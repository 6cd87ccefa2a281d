//! Fourier-domain resampling.
//!
//! The signal is treated as one period of a periodic sequence: its spectrum is
//! zero-padded (upsampling) or truncated (downsampling) to the requested length
//! and transformed back. For even lengths the Nyquist bin is split or joined so
//! that a real input stays real.

use num_complex::Complex;
use rustfft::FftPlanner;

/// Resample `values` to `num` points.
///
/// Returns an empty vector for empty input or `num == 0`, and a copy when
/// the length is unchanged.
pub fn fourier_resample(values: &[f64], num: usize) -> Vec<f64> {
    let n = values.len();
    if n == 0 || num == 0 {
        return Vec::new();
    }
    if n == num {
        return values.to_vec();
    }

    let mut planner = FftPlanner::<f64>::new();

    let mut spectrum: Vec<Complex<f64>> = values.iter().map(|&v| Complex::new(v, 0.0)).collect();
    planner.plan_fft_forward(n).process(&mut spectrum);

    let mut resized = vec![Complex::new(0.0, 0.0); num];
    let kept = n.min(num);
    let positive = kept / 2 + 1;

    // DC and positive frequencies up to and including +kept/2.
    resized[..positive].copy_from_slice(&spectrum[..positive]);
    // Negative frequencies.
    let negative = kept - positive;
    if negative > 0 {
        resized[num - negative..].copy_from_slice(&spectrum[n - negative..]);
    }

    if kept % 2 == 0 {
        let nyquist = kept / 2;
        if num < n {
            // Fold the -kept/2 component of the input onto +kept/2.
            resized[nyquist] += spectrum[n - nyquist];
        } else {
            // Split the Nyquist component between +kept/2 and -kept/2.
            resized[nyquist] *= 0.5;
            resized[num - nyquist] = resized[nyquist];
        }
    }

    planner.plan_fft_inverse(num).process(&mut resized);

    // rustfft does not normalise; the 1/num of the inverse and the num/n rescale combine.
    let scale = 1.0 / n as f64;
    resized.iter().map(|c| c.re * scale).collect()
}
