//! # Signal Synthesis
//!
//! Deterministic test signals ([`SignalSynthesizer`]) and the reference-tone
//! oscillator ([`ReferenceTone`]) used for tuning by ear. Neither feeds the
//! detection pipeline on its own; tests and demos push their output through
//! a [`WindowBuffer`](crate::audio::WindowBuffer) like any other source.

use std::f32::consts::PI;

use serde::{Deserialize, Serialize};

use crate::gate::rms;
use crate::settings::{TunerControl, TuningTarget};

/// Relative amplitudes of the fundamental and first five harmonics of the
/// guitar-like test tone.
pub const GUITAR_HARMONICS: [f32; 6] = [1.0, 0.6, 0.3, 0.2, 0.1, 0.05];

const DEFAULT_SEED: u64 = 0x2545_f491_4f6c_dd1d;

/// Seeded generator for sines, guitar-like tones and noise.
#[derive(Debug, Clone)]
pub struct SignalSynthesizer {
    sample_rate: u32,
    rng: u64,
}

impl SignalSynthesizer {
    pub fn new(sample_rate: u32) -> Self {
        Self::with_seed(sample_rate, DEFAULT_SEED)
    }

    /// Same seed, same noise.
    pub fn with_seed(sample_rate: u32, seed: u64) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            // xorshift must not start at zero
            rng: if seed == 0 { DEFAULT_SEED } else { seed },
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of samples in `seconds` of audio.
    pub fn samples_for(&self, seconds: f32) -> usize {
        (seconds.max(0.0) * self.sample_rate as f32) as usize
    }

    pub fn sine(&self, frequency_hz: f32, len: usize, amplitude: f32) -> Vec<f32> {
        let step = frequency_hz as f64 / self.sample_rate as f64;
        (0..len)
            .map(|i| amplitude * (2.0 * std::f64::consts::PI * step * i as f64).sin() as f32)
            .collect()
    }

    /// Fundamental plus five harmonics, scaled by `amplitude / 6`. Partials
    /// above Nyquist are left out.
    pub fn guitar_like(&self, fundamental_hz: f32, len: usize, amplitude: f32) -> Vec<f32> {
        let nyquist = self.sample_rate as f32 / 2.0;
        let mut buffer = vec![0.0; len];
        for (index, &weight) in GUITAR_HARMONICS.iter().enumerate() {
            let frequency = fundamental_hz * (index + 1) as f32;
            if frequency >= nyquist {
                continue;
            }
            for (sample, partial) in buffer.iter_mut().zip(self.sine(frequency, len, weight)) {
                *sample += partial;
            }
        }
        let scale = amplitude / GUITAR_HARMONICS.len() as f32;
        buffer.iter_mut().for_each(|sample| *sample *= scale);
        buffer
    }

    /// xorshift64*, mapped to [-1, 1).
    fn next_white(&mut self) -> f32 {
        let mut x = self.rng;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.rng = x;
        let bits = x.wrapping_mul(0x2545_f491_4f6c_dd1d) >> 40;
        (bits as f32 / (1u64 << 24) as f32) * 2.0 - 1.0
    }

    pub fn white_noise(&mut self, len: usize, amplitude: f32) -> Vec<f32> {
        (0..len).map(|_| amplitude * self.next_white()).collect()
    }

    /// Pink noise from Paul Kellet's filter bank over white noise.
    pub fn pink_noise(&mut self, len: usize, amplitude: f32) -> Vec<f32> {
        let mut b = [0.0f32; 7];
        (0..len)
            .map(|_| {
                let white = self.next_white();
                b[0] = 0.99886 * b[0] + white * 0.055_517_9;
                b[1] = 0.99332 * b[1] + white * 0.075_075_9;
                b[2] = 0.96900 * b[2] + white * 0.153_852;
                b[3] = 0.86650 * b[3] + white * 0.310_485_6;
                b[4] = 0.55000 * b[4] + white * 0.532_952_2;
                b[5] = -0.7616 * b[5] - white * 0.016_898;
                let pink = b.iter().sum::<f32>() + white * 0.5362;
                b[6] = white * 0.115_926;
                amplitude * pink * 0.11
            })
            .collect()
    }

    /// `signal + noise`, with the noise scaled so the RMS ratio is `snr_db`.
    /// The result is as long as the shorter input.
    pub fn mix_at_snr(signal: &[f32], noise: &[f32], snr_db: f32) -> Vec<f32> {
        let len = signal.len().min(noise.len());
        let (signal, noise) = (&signal[..len], &noise[..len]);
        let noise_rms = rms(noise);
        let scale = if noise_rms > 0.0 {
            rms(signal) / (noise_rms * 10f32.powf(snr_db / 20.0))
        } else {
            0.0
        };
        signal
            .iter()
            .zip(noise)
            .map(|(&s, &n)| s + n * scale)
            .collect()
    }

    /// Linear fades over the first `fade_in` and last `fade_out` samples.
    pub fn apply_fade(samples: &mut [f32], fade_in: usize, fade_out: usize) {
        let len = samples.len();
        let fade_in = fade_in.min(len);
        for (i, sample) in samples.iter_mut().take(fade_in).enumerate() {
            *sample *= i as f32 / fade_in as f32;
        }
        let fade_out = fade_out.min(len);
        for i in len - fade_out..len {
            samples[i] *= (len - 1 - i) as f32 / fade_out as f32;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Waveform {
    #[default]
    Sine,
    Square,
    Sawtooth,
    Triangle,
}

impl Waveform {
    /// One period over `phase` in [0, 1).
    fn sample(self, phase: f32) -> f32 {
        match self {
            Waveform::Sine => (2.0 * PI * phase).sin(),
            Waveform::Square => {
                if phase < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
            Waveform::Sawtooth => 2.0 * phase - 1.0,
            Waveform::Triangle => 1.0 - 4.0 * (phase - 0.5).abs(),
        }
    }
}

/// Ramp applied on start and stop to avoid clicks.
pub const RAMP_SECONDS: f32 = 0.05;

pub const DEFAULT_VOLUME: f32 = 0.1;

/// Oscillator for playing a target note by ear.
#[derive(Debug, Clone)]
pub struct ReferenceTone {
    sample_rate: u32,
    waveform: Waveform,
    volume: f32,
    frequency_hz: Option<f32>,
    phase: f32,
    gain: f32,
    target_gain: f32,
}

impl ReferenceTone {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            waveform: Waveform::Sine,
            volume: DEFAULT_VOLUME,
            frequency_hz: None,
            phase: 0.0,
            gain: 0.0,
            target_gain: 0.0,
        }
    }

    pub fn with_waveform(mut self, waveform: Waveform) -> Self {
        self.waveform = waveform;
        self
    }

    pub fn set_waveform(&mut self, waveform: Waveform) {
        self.waveform = waveform;
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
        if self.target_gain > 0.0 {
            self.target_gain = self.volume;
        }
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    /// Frequency currently sounding (or fading out).
    pub fn frequency(&self) -> Option<f32> {
        self.frequency_hz
    }

    pub fn is_playing(&self) -> bool {
        self.frequency_hz.is_some() && self.target_gain > 0.0
    }

    /// Starts `frequency_hz` from silence with an attack ramp.
    pub fn play(&mut self, frequency_hz: f32) {
        if !(frequency_hz.is_finite() && frequency_hz > 0.0) {
            return;
        }
        self.frequency_hz = Some(frequency_hz);
        self.phase = 0.0;
        self.gain = 0.0;
        self.target_gain = self.volume;
    }

    /// Changes pitch without restarting the envelope.
    pub fn set_frequency(&mut self, frequency_hz: f32) {
        if self.frequency_hz.is_some() && frequency_hz.is_finite() && frequency_hz > 0.0 {
            self.frequency_hz = Some(frequency_hz);
        }
    }

    /// Plays the current String-mode target; returns it, or `None` in Auto
    /// mode (nothing is started).
    pub fn play_target(&mut self, control: &TunerControl) -> Option<TuningTarget> {
        let target = control.target()?;
        self.play(target.frequency_hz);
        Some(target)
    }

    /// Ramps out; the tone goes silent after [`RAMP_SECONDS`].
    pub fn stop(&mut self) {
        self.target_gain = 0.0;
    }

    /// Fills `out` with the next block of the tone (zeros when silent).
    pub fn render(&mut self, out: &mut [f32]) {
        let Some(frequency) = self.frequency_hz else {
            out.fill(0.0);
            return;
        };
        let increment = frequency / self.sample_rate as f32;
        let ramp_step = self.volume.max(f32::EPSILON) / (RAMP_SECONDS * self.sample_rate as f32);

        for sample in out.iter_mut() {
            if self.gain < self.target_gain {
                self.gain = (self.gain + ramp_step).min(self.target_gain);
            } else if self.gain > self.target_gain {
                self.gain = (self.gain - ramp_step).max(self.target_gain);
            }
            *sample = self.gain * self.waveform.sample(self.phase);
            self.phase = (self.phase + increment).fract();
        }

        if self.target_gain == 0.0 && self.gain == 0.0 {
            self.frequency_hz = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    const SR: u32 = 48_000;

    #[test]
    fn guitar_tone_peaks_below_its_amplitude() {
        let synth = SignalSynthesizer::new(SR);
        let tone = synth.guitar_like(110.0, 4800, 0.6);
        let peak = tone.iter().fold(0.0f32, |m, s| m.max(s.abs()));
        assert!(peak > 0.05 && peak <= 0.6 * 2.25 / 6.0 + 1e-6);
    }

    #[test]
    fn noise_is_reproducible_per_seed() {
        let a = SignalSynthesizer::with_seed(SR, 42).pink_noise(256, 1.0);
        let b = SignalSynthesizer::with_seed(SR, 42).pink_noise(256, 1.0);
        let c = SignalSynthesizer::with_seed(SR, 43).pink_noise(256, 1.0);
        assert_eq!(a, b);
        assert_ne!(a, c);

        let white = SignalSynthesizer::new(SR).white_noise(4096, 1.0);
        assert!(white.iter().all(|s| (-1.0..1.0).contains(s)));
        assert_abs_diff_eq!(white.iter().sum::<f32>() / 4096.0, 0.0, epsilon = 0.05);
    }

    #[test]
    fn mixing_hits_the_requested_snr() {
        let mut synth = SignalSynthesizer::new(SR);
        let tone = synth.sine(110.0, 9600, 0.5);
        let noise = synth.pink_noise(9600, 0.3);
        let mixed = SignalSynthesizer::mix_at_snr(&tone, &noise, 20.0);

        let residual: Vec<f32> = mixed.iter().zip(&tone).map(|(m, t)| m - t).collect();
        let snr = 20.0 * (rms(&tone) / rms(&residual)).log10();
        assert_abs_diff_eq!(snr, 20.0, epsilon = 0.01);
    }

    #[test]
    fn fades_start_and_end_at_zero() {
        let mut samples = vec![1.0; 100];
        SignalSynthesizer::apply_fade(&mut samples, 10, 10);
        assert_eq!(samples[0], 0.0);
        assert_eq!(samples[5], 0.5);
        assert_eq!(samples[50], 1.0);
        assert_eq!(samples[99], 0.0);

        let mut short = vec![1.0; 4];
        SignalSynthesizer::apply_fade(&mut short, 10, 10);
        assert_eq!(short[0], 0.0);
    }

    #[test]
    fn reference_tone_ramps_in_and_out() {
        let mut tone = ReferenceTone::new(SR).with_waveform(Waveform::Square);
        tone.play(110.0);
        assert!(tone.is_playing());

        let ramp = (RAMP_SECONDS * SR as f32) as usize;
        let mut block = vec![0.0; ramp * 2];
        tone.render(&mut block);
        assert!(block[0].abs() < 1e-3);
        assert!(block[ramp / 2].abs() < DEFAULT_VOLUME);
        let peak = block[ramp + 10..].iter().fold(0.0f32, |m, s| m.max(s.abs()));
        assert_abs_diff_eq!(peak, DEFAULT_VOLUME, epsilon = 1e-4);

        tone.stop();
        assert!(!tone.is_playing());
        tone.render(&mut block);
        assert!(block[ramp + 10..].iter().all(|&s| s == 0.0));
        assert_eq!(tone.frequency(), None);
    }

    #[test]
    fn reference_tone_follows_the_string_target() {
        let control = TunerControl::default();
        let mut tone = ReferenceTone::new(SR);
        assert_eq!(tone.play_target(&control), None);
        assert!(!tone.is_playing());

        control.set_target_string(1);
        let target = tone.play_target(&control).unwrap();
        assert_eq!(target.note, "A2");
        assert_eq!(tone.frequency(), Some(110.0));
    }

    #[test]
    fn waveforms_span_full_scale() {
        for waveform in [Waveform::Sine, Waveform::Square, Waveform::Sawtooth, Waveform::Triangle] {
            let values: Vec<f32> = (0..100).map(|i| waveform.sample(i as f32 / 100.0)).collect();
            let max = values.iter().cloned().fold(f32::MIN, f32::max);
            let min = values.iter().cloned().fold(f32::MAX, f32::min);
            assert!(max > 0.95 && min < -0.95, "{:?}", waveform);
        }
    }
}
