//! # Harmonic Resolver
//!
//! Corrects octave and harmonic errors. Raw estimators often lock onto the
//! second or third harmonic when the fundamental is weak (wound bass strings
//! in particular). An estimate outside the expected fundamental range is
//! divided by integers until it lands in range, preferring the divisor that
//! lands closest to an open string of the current tuning.

use serde::Serialize;

use crate::tuning::{STRING_COUNT, TuningPreset};

/// Range a guitar fundamental is expected in.
///
/// Anything above it is folded down, including genuine fretted notes: a
/// clean A4 (440 Hz) resolves to A2. In practice the estimator's 2200 Hz
/// ceiling is therefore never what rejects a reading; only values that no
/// divisor brings into range reach the range filter unchanged.
pub const EXPECTED_RANGE_HZ: (f32, f32) = (70.0, 400.0);

/// Largest integer divisor tried.
pub const MAX_DIVISOR: u32 = 500;

/// A candidate within this distance of an open string is a confident match.
pub const MATCH_TOLERANCE_HZ: f32 = 5.0;

/// How a raw frequency was corrected.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum Correction {
    /// Already in range.
    None,
    /// Divided onto (or near) an open string.
    Matched { divisor: u32, target_hz: f32 },
    /// First divisor bringing the value in range; no string nearby.
    InRange { divisor: u32 },
    /// Nothing brought the value in range; returned as-is.
    Unresolved,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Resolution {
    pub frequency_hz: f32,
    pub correction: Correction,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HarmonicResolver {
    targets: [f32; STRING_COUNT],
    range: (f32, f32),
}

impl HarmonicResolver {
    /// Resolver whose targets are `preset`'s open strings at `reference_pitch_hz`.
    pub fn new(preset: &TuningPreset, reference_pitch_hz: f32) -> Self {
        Self {
            targets: preset.scaled_frequencies(reference_pitch_hz),
            range: EXPECTED_RANGE_HZ,
        }
    }

    /// Re-targets after a preset or calibration change.
    pub fn retarget(&mut self, preset: &TuningPreset, reference_pitch_hz: f32) {
        self.targets = preset.scaled_frequencies(reference_pitch_hz);
    }

    pub fn targets(&self) -> &[f32; STRING_COUNT] {
        &self.targets
    }

    fn in_range(&self, frequency_hz: f32) -> bool {
        frequency_hz >= self.range.0 && frequency_hz <= self.range.1
    }

    pub fn resolve(&self, raw_hz: f32) -> f32 {
        self.resolve_detailed(raw_hz).frequency_hz
    }

    pub fn resolve_detailed(&self, raw_hz: f32) -> Resolution {
        if !raw_hz.is_finite() || self.in_range(raw_hz) {
            return Resolution {
                frequency_hz: raw_hz,
                correction: Correction::None,
            };
        }

        let mut first_in_range: Option<(u32, f32)> = None;
        let mut best: Option<(u32, f32, f32, f32)> = None;

        for divisor in 2..=MAX_DIVISOR {
            let candidate = raw_hz / divisor as f32;
            if candidate < self.range.0 {
                break;
            }
            if !self.in_range(candidate) {
                continue;
            }
            first_in_range.get_or_insert((divisor, candidate));

            for &target in &self.targets {
                let error = (candidate - target).abs();
                if best.is_none_or(|(_, _, _, best_error)| error < best_error) {
                    best = Some((divisor, candidate, target, error));
                }
            }
        }

        match (best, first_in_range) {
            (Some((divisor, candidate, target_hz, error)), _) if error < MATCH_TOLERANCE_HZ => {
                Resolution {
                    frequency_hz: candidate,
                    correction: Correction::Matched { divisor, target_hz },
                }
            }
            (_, Some((divisor, candidate))) => Resolution {
                frequency_hz: candidate,
                correction: Correction::InRange { divisor },
            },
            _ => Resolution {
                frequency_hz: raw_hz,
                correction: Correction::Unresolved,
            },
        }
    }
}
