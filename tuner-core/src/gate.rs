//! # Noise Gate
//!
//! Decides whether a window carries a playable signal. A one-pole envelope
//! follower runs per sample with separate attack and release times; the gate
//! is open while the envelope sits above [`OPEN_FRACTION`] of full scale, and
//! the decision for a window is the state after its last sample.
//!
//! Samples under the threshold are expanded (attenuated by
//! `(threshold - level) / ratio` dB) instead of muted, so soft onsets keep
//! their shape for the pitch estimator.

use serde::Serialize;

use crate::fft;
use crate::settings::NoiseGateSettings;

/// Level reported for silent input instead of negative infinity.
pub const SILENCE_DB: f32 = -100.0;

/// Envelope value above which the gate counts as open.
pub const OPEN_FRACTION: f32 = 0.1;

/// Band holding most speech energy.
const SPEECH_BAND_HZ: (f32, f32) = (300.0, 3400.0);
const SPEECH_ENERGY_RATIO: f32 = 0.6;

/// Outcome of gating one window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GateDecision {
    pub is_open: bool,
    /// RMS level of the window in dBFS, [`SILENCE_DB`] for silence.
    pub level_db: f32,
    /// Envelope after the last sample, 0..=1.
    pub envelope: f32,
}

/// Snapshot of the gate's memory.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NoiseGateState {
    pub is_open: bool,
    pub envelope_level: f32,
    pub threshold_db: f32,
    pub attack_coeff: f32,
    pub release_coeff: f32,
}

#[derive(Debug, Clone)]
pub struct NoiseGate {
    settings: NoiseGateSettings,
    sample_rate: u32,
    is_open: bool,
    envelope: f32,
    attack_coeff: f32,
    release_coeff: f32,
}

impl NoiseGate {
    pub fn new(sample_rate: u32, settings: NoiseGateSettings) -> Self {
        let mut gate = Self {
            settings,
            sample_rate,
            is_open: false,
            envelope: 0.0,
            attack_coeff: 0.0,
            release_coeff: 0.0,
        };
        gate.update_coefficients();
        gate
    }

    /// Applies new settings without touching the envelope.
    pub fn update_settings(&mut self, settings: NoiseGateSettings) {
        if settings != self.settings {
            self.settings = settings;
            self.update_coefficients();
        }
    }

    pub fn settings(&self) -> &NoiseGateSettings {
        &self.settings
    }

    fn update_coefficients(&mut self) {
        self.attack_coeff = time_to_coeff(self.settings.attack_ms, self.sample_rate);
        self.release_coeff = time_to_coeff(self.settings.release_ms, self.sample_rate);
    }

    /// Runs the follower over `window` and reports the resulting decision.
    pub fn process_window(&mut self, window: &[f32]) -> GateDecision {
        for &sample in window {
            self.step(sample);
        }
        self.decision(window)
    }

    /// Like [`process_window`](Self::process_window), also writing the gated
    /// signal into `output` (cleared first).
    pub fn process(&mut self, input: &[f32], output: &mut Vec<f32>) -> GateDecision {
        output.clear();
        output.reserve(input.len());
        for &sample in input {
            let gain = self.step(sample);
            output.push(sample * gain);
        }
        self.decision(input)
    }

    /// Advances the envelope by one sample and returns the gain for it.
    #[inline]
    fn step(&mut self, sample: f32) -> f32 {
        let level_db = linear_to_db(sample.abs());
        let threshold = self.settings.threshold_db;

        let target = if level_db > threshold { 1.0 } else { 0.0 };
        let coeff = if target > self.envelope {
            self.attack_coeff
        } else {
            self.release_coeff
        };
        self.envelope = target + (self.envelope - target) * coeff;
        self.is_open = self.envelope > OPEN_FRACTION;

        let mut gain = self.envelope;
        if level_db < threshold {
            let reduction = (threshold - level_db) / self.settings.ratio.max(1.0);
            gain *= db_to_linear(-reduction);
        }
        gain
    }

    fn decision(&self, window: &[f32]) -> GateDecision {
        GateDecision {
            is_open: self.is_open,
            level_db: linear_to_db(rms(window)),
            envelope: self.envelope,
        }
    }

    /// Estimates whether `window` is more likely speech than an instrument.
    pub fn detect_voice(&self, window: &[f32]) -> bool {
        speech_band_ratio(window, self.sample_rate) > SPEECH_ENERGY_RATIO
    }

    pub fn is_open(&self) -> bool {
        self.is_open
    }

    pub fn envelope(&self) -> f32 {
        self.envelope
    }

    pub fn state(&self) -> NoiseGateState {
        NoiseGateState {
            is_open: self.is_open,
            envelope_level: self.envelope,
            threshold_db: self.settings.threshold_db,
            attack_coeff: self.attack_coeff,
            release_coeff: self.release_coeff,
        }
    }

    /// Closes the gate and clears the envelope.
    pub fn reset(&mut self) {
        self.is_open = false;
        self.envelope = 0.0;
    }
}

/// `exp(-1 / (time_ms * 0.001 * sample_rate))`; zero time means instant.
pub fn time_to_coeff(time_ms: f32, sample_rate: u32) -> f32 {
    let samples = time_ms * 0.001 * sample_rate as f32;
    if samples > 0.0 && samples.is_finite() {
        (-1.0 / samples).exp()
    } else {
        0.0
    }
}

/// Root-mean-square of a window, 0 for an empty one.
pub fn rms(window: &[f32]) -> f32 {
    if window.is_empty() {
        return 0.0;
    }
    let sum: f64 = window.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum / window.len() as f64).sqrt() as f32
}

pub fn linear_to_db(linear: f32) -> f32 {
    if linear > 0.0 {
        (20.0 * linear.log10()).max(SILENCE_DB)
    } else {
        SILENCE_DB
    }
}

pub fn db_to_linear(db: f32) -> f32 {
    10f32.powf(db / 20.0)
}

/// Share of the window's spectral energy inside the speech band.
pub fn speech_band_ratio(window: &[f32], sample_rate: u32) -> f32 {
    let magnitudes = fft::spectrum_to_magnitudes(&fft::perform_fft(window));
    fft::band_energy_ratio(&magnitudes, sample_rate, SPEECH_BAND_HZ.0, SPEECH_BAND_HZ.1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    const SR: u32 = 48_000;

    fn sine(freq: f32, amplitude: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| amplitude * (2.0 * std::f32::consts::PI * freq * i as f32 / SR as f32).sin())
            .collect()
    }

    fn gate() -> NoiseGate {
        NoiseGate::new(SR, NoiseGateSettings::default())
    }

    #[test]
    fn silence_keeps_the_gate_closed() {
        let mut gate = gate();
        let decision = gate.process_window(&[0.0; 2048]);
        assert!(!decision.is_open);
        assert_eq!(decision.level_db, SILENCE_DB);
        assert_eq!(decision.envelope, 0.0);
    }

    #[test]
    fn a_clear_tone_opens_the_gate() {
        let mut gate = gate();
        let decision = gate.process_window(&sine(110.0, 0.5, 2048));
        assert!(decision.is_open);
        assert!(decision.envelope > 0.9);
        // RMS of a 0.5 sine is about -9 dBFS.
        assert_abs_diff_eq!(decision.level_db, -9.03, epsilon = 0.2);
    }

    #[test]
    fn quiet_noise_below_threshold_stays_closed() {
        let mut gate = gate();
        let decision = gate.process_window(&sine(110.0, 0.005, 2048));
        assert!(!decision.is_open);
    }

    #[test]
    fn release_holds_the_gate_briefly_then_closes() {
        let mut gate = gate();
        gate.process_window(&sine(110.0, 0.5, 2048));

        // 100 ms release: still open after ~21 ms of silence...
        assert!(gate.process_window(&[0.0; 1024]).is_open);

        // ...and closed after half a second.
        let mut decision = gate.process_window(&[0.0; 1024]);
        for _ in 0..24 {
            decision = gate.process_window(&[0.0; 1024]);
        }
        assert!(!decision.is_open);
    }

    #[test]
    fn decision_reflects_the_state_at_window_end() {
        let mut gate = gate();
        let mut window = vec![0.0; 1024];
        window.extend(sine(220.0, 0.5, 1024));
        assert!(gate.process_window(&window).is_open);
    }

    #[test]
    fn below_threshold_samples_are_expanded_not_muted() {
        let mut gate = gate();
        gate.process_window(&sine(110.0, 0.5, 2048));

        // -50 dBFS is 10 dB under the -40 threshold: 10 / 4 = 2.5 dB less gain.
        let quiet = [db_to_linear(-50.0); 4];
        let mut out = Vec::new();
        gate.process(&quiet, &mut out);
        let applied_db = linear_to_db(out[0]) - linear_to_db(quiet[0]);
        assert!(out[0] > 0.0);
        assert_abs_diff_eq!(applied_db, -2.5, epsilon = 0.1);
    }

    #[test]
    fn threshold_changes_apply_without_reset() {
        let mut gate = gate();
        let tone = sine(110.0, 0.02, 2048); // about -34 dBFS peak
        assert!(gate.process_window(&tone).is_open);

        gate.reset();
        gate.update_settings(NoiseGateSettings {
            threshold_db: -20.0,
            ..NoiseGateSettings::default()
        });
        assert!(!gate.process_window(&tone).is_open);
        assert_eq!(gate.state().threshold_db, -20.0);
    }

    #[test]
    fn coefficients_follow_the_time_constants() {
        assert_abs_diff_eq!(time_to_coeff(1.0, SR), (-1.0f32 / 48.0).exp(), epsilon = 1e-6);
        assert_eq!(time_to_coeff(0.0, SR), 0.0);
        let state = gate().state();
        assert!(state.attack_coeff < state.release_coeff);
    }

    #[test]
    fn speech_band_energy_is_flagged() {
        let gate = gate();
        let mut voiced = sine(500.0, 0.3, 2048);
        for (sample, formant) in voiced.iter_mut().zip(sine(1200.0, 0.2, 2048)) {
            *sample += formant;
        }
        assert!(gate.detect_voice(&voiced));
        assert!(!gate.detect_voice(&sine(82.41, 0.5, 2048)));
    }
}
