//! # Pitch Detection Module
//!
//! Fundamental-frequency estimators behind one interface, [`PitchEstimator`].
//!
//! ## Features
//! - [`YinEstimator`]: difference function, cumulative mean normalization,
//!   absolute threshold with a global-minimum fallback, parabolic refinement
//! - [`McLeodEstimator`]: normalized square difference (NSDF) computed from an
//!   FFT autocorrelation, key-maximum peak picking
//!
//! Both reject frequencies outside [`MIN_FREQUENCY_HZ`]..=[`MAX_FREQUENCY_HZ`]
//! and candidates whose confidence is under the caller's minimum.

use serde::Serialize;

use crate::fft;
use crate::settings::PitchAlgorithm;

/// Lowest frequency the tuner reports (just under a drop-D low string).
pub const MIN_FREQUENCY_HZ: f32 = 70.0;

/// Highest frequency the tuner reports (high fretted notes).
pub const MAX_FREQUENCY_HZ: f32 = 2200.0;

/// Bound on the normalized difference for the global-minimum fallback.
const YIN_FALLBACK_BOUND: f32 = 0.8;

/// McLeod picks the first key maximum within this fraction of the highest.
const MCLEOD_CUTOFF: f32 = 0.9;

/// Windows shorter than this cannot be refined and are rejected.
const MIN_WINDOW_LEN: usize = 8;

/// One window's raw estimate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PitchCandidate {
    pub frequency_hz: f32,
    /// 0..=1, higher is more periodic.
    pub confidence: f32,
}

/// Whether `frequency_hz` lies in the physically meaningful instrument range.
pub fn in_detection_range(frequency_hz: f32) -> bool {
    (MIN_FREQUENCY_HZ..=MAX_FREQUENCY_HZ).contains(&frequency_hz)
}

/// A swappable fundamental-frequency estimator.
///
/// Implementations keep scratch buffers between calls but no signal history:
/// the result depends only on `samples` and the configured parameters.
pub trait PitchEstimator: Send {
    fn algorithm(&self) -> PitchAlgorithm;

    /// Estimates the fundamental of `samples`, or `None` when nothing periodic
    /// enough (at least `min_confidence`) is found in range.
    fn estimate(
        &mut self,
        samples: &[f32],
        sample_rate: u32,
        min_confidence: f32,
    ) -> Option<PitchCandidate>;
}

fn accept(frequency_hz: f32, confidence: f32, min_confidence: f32) -> Option<PitchCandidate> {
    if !frequency_hz.is_finite() || !in_detection_range(frequency_hz) {
        return None;
    }
    let confidence = confidence.clamp(0.0, 1.0);
    if confidence < min_confidence {
        return None;
    }
    Some(PitchCandidate {
        frequency_hz,
        confidence,
    })
}

/// Refines an extremum at `index` from its two neighbours.
///
/// Returns the fractional position and the interpolated value. At the buffer
/// edges, or on a flat neighbourhood, the sample itself is returned.
pub fn parabolic_interpolation(values: &[f32], index: usize) -> (f32, f32) {
    if index == 0 || index + 1 >= values.len() {
        return (index as f32, values.get(index).copied().unwrap_or(0.0));
    }
    let (y1, y2, y3) = (values[index - 1], values[index], values[index + 1]);
    let denominator = y1 - 2.0 * y2 + y3;
    if denominator.abs() < f32::EPSILON {
        return (index as f32, y2);
    }
    let shift = ((y1 - y3) / (2.0 * denominator)).clamp(-1.0, 1.0);
    (index as f32 + shift, y2 - 0.25 * (y1 - y3) * shift)
}

/// A robust implementation of the YIN pitch detection algorithm.
#[derive(Debug, Clone)]
pub struct YinEstimator {
    threshold: f32,
    /// Difference function, normalized in place.
    buffer: Vec<f32>,
}

impl YinEstimator {
    pub fn new(threshold: f32) -> Self {
        Self {
            threshold: threshold.clamp(0.01, 0.99),
            buffer: Vec::new(),
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Absolute threshold on the normalized difference (0.01..=0.99).
    pub fn set_threshold(&mut self, threshold: f32) {
        self.threshold = threshold.clamp(0.01, 0.99);
    }

    /// Steps 1 and 2: squared difference over half the window, then
    /// cumulative mean normalization with d'(0) = 1.
    fn normalized_difference(&mut self, signal: &[f32]) {
        let half = signal.len() / 2;
        self.buffer.clear();
        self.buffer.resize(half, 0.0);

        for tau in 1..half {
            let mut diff = 0.0;
            for i in 0..half {
                let delta = signal[i] - signal[i + tau];
                diff += delta * delta;
            }
            self.buffer[tau] = diff;
        }

        let mut running_sum = 0.0;
        self.buffer[0] = 1.0;
        for tau in 1..half {
            running_sum += self.buffer[tau];
            if running_sum > 0.0 {
                self.buffer[tau] *= tau as f32 / running_sum;
            } else {
                self.buffer[tau] = 1.0;
            }
        }
    }

    /// Step 3: first dip under the threshold, followed down to its local
    /// minimum. Falls back to the global minimum when it is still plausible.
    fn absolute_threshold(&self) -> Option<usize> {
        let d = &self.buffer;
        let mut tau = 2;
        while tau < d.len() {
            if d[tau] < self.threshold {
                while tau + 1 < d.len() && d[tau + 1] < d[tau] {
                    tau += 1;
                }
                return Some(tau);
            }
            tau += 1;
        }

        let (tau, &value) = d
            .iter()
            .enumerate()
            .skip(2)
            .min_by(|a, b| a.1.total_cmp(b.1))?;
        (value < YIN_FALLBACK_BOUND).then_some(tau)
    }
}

impl Default for YinEstimator {
    fn default() -> Self {
        Self::new(0.15)
    }
}

impl PitchEstimator for YinEstimator {
    fn algorithm(&self) -> PitchAlgorithm {
        PitchAlgorithm::Yin
    }

    fn estimate(
        &mut self,
        samples: &[f32],
        sample_rate: u32,
        min_confidence: f32,
    ) -> Option<PitchCandidate> {
        if samples.len() < MIN_WINDOW_LEN || sample_rate == 0 {
            return None;
        }

        self.normalized_difference(samples);
        let tau = self.absolute_threshold()?;

        // Step 4: sub-sample refinement.
        let (period, _) = parabolic_interpolation(&self.buffer, tau);
        if period <= 0.0 {
            return None;
        }

        accept(sample_rate as f32 / period, 1.0 - self.buffer[tau], min_confidence)
    }
}

/// McLeod pitch method: peak picking on the normalized square difference.
#[derive(Debug, Clone)]
pub struct McLeodEstimator {
    cutoff: f32,
    nsdf: Vec<f32>,
}

impl McLeodEstimator {
    pub fn new() -> Self {
        Self {
            cutoff: MCLEOD_CUTOFF,
            nsdf: Vec::new(),
        }
    }

    /// `n(τ) = 2·r(τ) / m(τ)` for τ below half the window, with `r` from the
    /// FFT autocorrelation and `m(τ)` updated incrementally.
    fn normalized_square_difference(&mut self, signal: &[f32]) {
        let n = signal.len();
        let max_lag = n / 2;
        let acf = fft::autocorrelation(signal);

        self.nsdf.clear();
        self.nsdf.reserve(max_lag);

        let mut m = 2.0 * acf.first().copied().unwrap_or(0.0);
        for tau in 0..max_lag {
            if tau > 0 {
                m -= signal[tau - 1] * signal[tau - 1] + signal[n - tau] * signal[n - tau];
            }
            let value = if m > 1e-9 { 2.0 * acf[tau] / m } else { 0.0 };
            self.nsdf.push(value);
        }
    }

    /// Highest interior point of every positive lobe after the first
    /// negative-going zero crossing.
    fn key_maxima(&self) -> Vec<usize> {
        let nsdf = &self.nsdf;
        let mut maxima = Vec::new();

        // Skip the lobe around τ = 0.
        let mut tau = 1;
        while tau < nsdf.len() && nsdf[tau] > 0.0 {
            tau += 1;
        }

        let mut current: Option<usize> = None;
        for t in tau.max(1)..nsdf.len() {
            if nsdf[t] > 0.0 {
                if current.is_none_or(|best| nsdf[t] > nsdf[best]) {
                    current = Some(t);
                }
            } else if nsdf[t - 1] > 0.0 {
                maxima.extend(current.take());
            }
        }
        // A lobe cut off by the end of the buffer only counts if it peaked.
        if let Some(best) = current {
            if best + 1 < nsdf.len() {
                maxima.push(best);
            }
        }
        maxima
    }
}

impl Default for McLeodEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl PitchEstimator for McLeodEstimator {
    fn algorithm(&self) -> PitchAlgorithm {
        PitchAlgorithm::McLeod
    }

    fn estimate(
        &mut self,
        samples: &[f32],
        sample_rate: u32,
        min_confidence: f32,
    ) -> Option<PitchCandidate> {
        if samples.len() < MIN_WINDOW_LEN || sample_rate == 0 {
            return None;
        }

        self.normalized_square_difference(samples);
        let maxima = self.key_maxima();
        let highest = maxima
            .iter()
            .map(|&tau| self.nsdf[tau])
            .fold(f32::NEG_INFINITY, f32::max);
        if highest <= 0.0 {
            return None;
        }

        let cutoff = self.cutoff * highest;
        let tau = maxima.into_iter().find(|&tau| self.nsdf[tau] >= cutoff)?;
        let (period, clarity) = parabolic_interpolation(&self.nsdf, tau);
        if period <= 0.0 {
            return None;
        }

        accept(sample_rate as f32 / period, clarity, min_confidence)
    }
}
