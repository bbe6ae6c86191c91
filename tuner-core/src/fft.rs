//! # Fast Fourier Transform (FFT) Module
//!
//! Spectral helpers built on RustFFT:
//! - DC removal and Hann windowing before a forward transform
//! - Magnitude spectrum and band-energy ratios (used by the speech estimate)
//! - FFT-based autocorrelation (used by the McLeod estimator)

use rustfft::{FftPlanner, num_complex::Complex};

/// Removes the DC offset from a signal by making its average value zero.
pub(crate) fn remove_dc_offset(signal: &mut [f32]) {
    let len = signal.len();
    if len == 0 {
        return;
    }
    let avg = signal.iter().sum::<f32>() / len as f32;
    if avg.abs() > 1e-6 {
        for sample in signal.iter_mut() {
            *sample -= avg;
        }
    }
}

/// Applies a Hann window in place to reduce spectral leakage.
pub(crate) fn apply_hann_window(buffer: &mut [f32]) {
    let n = buffer.len();
    if n < 2 {
        return;
    }
    let n_minus_1 = (n - 1) as f32;
    for (i, sample) in buffer.iter_mut().enumerate() {
        let multiplier = 0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / n_minus_1).cos());
        *sample *= multiplier;
    }
}

/// Performs a forward FFT on a signal and returns the complex spectrum.
///
/// The signal is DC-corrected and Hann-windowed first. Any length is
/// accepted; an empty signal yields an empty spectrum.
pub fn perform_fft(signal: &[f32]) -> Vec<Complex<f32>> {
    if signal.is_empty() {
        return Vec::new();
    }

    let mut processed_signal = signal.to_vec();
    remove_dc_offset(&mut processed_signal);
    apply_hann_window(&mut processed_signal);

    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(processed_signal.len());

    let mut buffer: Vec<Complex<f32>> = processed_signal
        .into_iter()
        .map(|sample| Complex { re: sample, im: 0.0 })
        .collect();

    fft.process(&mut buffer);
    buffer
}

/// Magnitudes of the positive-frequency half of a spectrum.
pub fn spectrum_to_magnitudes(spectrum: &[Complex<f32>]) -> Vec<f32> {
    spectrum
        .iter()
        .take(spectrum.len() / 2)
        .map(|c| c.norm())
        .collect()
}

/// Fraction of spectral energy between `low_hz` and `high_hz` (inclusive bins).
///
/// `magnitudes` is the half spectrum returned by [`spectrum_to_magnitudes`].
/// Returns 0 for an empty or silent spectrum.
pub fn band_energy_ratio(magnitudes: &[f32], sample_rate: u32, low_hz: f32, high_hz: f32) -> f32 {
    if magnitudes.is_empty() || sample_rate == 0 {
        return 0.0;
    }
    let bin_hz = (sample_rate as f32 / 2.0) / magnitudes.len() as f32;
    let low_bin = (low_hz / bin_hz).floor() as usize;
    let high_bin = (high_hz / bin_hz).floor() as usize;

    let mut total = 0.0f64;
    let mut band = 0.0f64;
    for (bin, &magnitude) in magnitudes.iter().enumerate() {
        let energy = (magnitude as f64) * (magnitude as f64);
        total += energy;
        if bin >= low_bin && bin <= high_bin {
            band += energy;
        }
    }

    if total > 0.0 { (band / total) as f32 } else { 0.0 }
}

/// Linear (non-circular) autocorrelation `r(τ) = Σ x[i]·x[i+τ]` for
/// `τ in 0..signal.len()`, computed through a zero-padded FFT.
pub fn autocorrelation(signal: &[f32]) -> Vec<f32> {
    let n = signal.len();
    if n == 0 {
        return Vec::new();
    }
    let padded_len = (2 * n).next_power_of_two();

    let mut planner = FftPlanner::<f32>::new();
    let forward = planner.plan_fft_forward(padded_len);
    let inverse = planner.plan_fft_inverse(padded_len);

    let mut buffer: Vec<Complex<f32>> = signal
        .iter()
        .map(|&sample| Complex { re: sample, im: 0.0 })
        .chain(std::iter::repeat(Complex { re: 0.0, im: 0.0 }))
        .take(padded_len)
        .collect();

    forward.process(&mut buffer);
    for value in buffer.iter_mut() {
        *value = Complex {
            re: value.norm_sqr(),
            im: 0.0,
        };
    }
    inverse.process(&mut buffer);

    // RustFFT does not normalize the inverse transform.
    let scale = 1.0 / padded_len as f32;
    buffer.iter().take(n).map(|c| c.re * scale).collect()
}
