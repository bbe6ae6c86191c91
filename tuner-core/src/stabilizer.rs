//! # Temporal Stabilizer
//!
//! Turns per-window estimates into a reading steady enough for a needle:
//! a short median filter against outliers, exponential smoothing of the
//! frequency and of the cents value, and run-length validation so one stray
//! window cannot drag the display across the fretboard.

use std::collections::VecDeque;

use serde::Serialize;

use crate::tuning::{calculate_cents_deviation, nearest_note_frequency};

/// Raw values the median filter looks at.
pub const MEDIAN_LENGTH: usize = 5;

/// A raw value further than this from the smoothed pitch counts as a jump.
pub const JUMP_CENTS: f32 = 100.0;

/// Consecutive agreeing values needed before a jump is accepted.
pub const CONFIRM_RUN: usize = 3;

/// Travel of the cents needle.
pub const CENTS_LIMIT: f32 = 50.0;

/// What cents are measured against.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CentsReference {
    /// Nearest equal-tempered note at this A4.
    Chromatic { reference_pitch_hz: f32 },
    /// A fixed string target.
    Target { frequency_hz: f32 },
}

impl CentsReference {
    fn frequency_for(&self, frequency_hz: f32) -> Option<f32> {
        match *self {
            CentsReference::Chromatic { reference_pitch_hz } => {
                nearest_note_frequency(frequency_hz, reference_pitch_hz)
            }
            CentsReference::Target { frequency_hz } => {
                (frequency_hz.is_finite() && frequency_hz > 0.0).then_some(frequency_hz)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StabilizedPitch {
    pub smoothed_frequency_hz: f32,
    /// Unclamped; see [`StabilizedPitch::cents`].
    pub smoothed_cents: f32,
    /// Frequency the cents are measured against.
    pub reference_hz: f32,
    pub last_update_timestamp_ms: f64,
    /// The latest raw value was a jump awaiting confirmation; the rest of the
    /// reading is the previous state.
    pub held: bool,
}

impl StabilizedPitch {
    /// Cents as the display receives them, within ±[`CENTS_LIMIT`].
    pub fn cents(&self) -> f32 {
        self.smoothed_cents.clamp(-CENTS_LIMIT, CENTS_LIMIT)
    }
}

#[derive(Debug, Clone)]
pub struct TemporalStabilizer {
    alpha: f32,
    history: VecDeque<f32>,
    /// Jump candidates that agree with each other so far.
    pending: Vec<f32>,
    state: Option<StabilizedPitch>,
}

impl TemporalStabilizer {
    pub fn new(smoothing_factor: f32) -> Self {
        Self {
            alpha: smoothing_factor.clamp(0.01, 1.0),
            history: VecDeque::with_capacity(MEDIAN_LENGTH),
            pending: Vec::with_capacity(CONFIRM_RUN),
            state: None,
        }
    }

    pub fn set_smoothing_factor(&mut self, smoothing_factor: f32) {
        self.alpha = smoothing_factor.clamp(0.01, 1.0);
    }

    pub fn smoothing_factor(&self) -> f32 {
        self.alpha
    }

    pub fn state(&self) -> Option<StabilizedPitch> {
        self.state
    }

    /// Length of the current run of unconfirmed jump values.
    pub fn pending_run(&self) -> usize {
        self.pending.len()
    }

    /// Forgets all history; the next value seeds the smoothers.
    pub fn reset(&mut self) {
        self.history.clear();
        self.pending.clear();
        self.state = None;
    }

    /// Feeds one corrected frequency. Returns `None` only for values that
    /// cannot be measured (non-positive, non-finite).
    pub fn update(
        &mut self,
        raw_hz: f32,
        reference: CentsReference,
        timestamp_ms: f64,
    ) -> Option<StabilizedPitch> {
        if !(raw_hz.is_finite() && raw_hz > 0.0) {
            return None;
        }

        let Some(current) = self.state else {
            return self.seed(raw_hz, reference, timestamp_ms);
        };

        let distance = calculate_cents_deviation(raw_hz, current.smoothed_frequency_hz)?;
        if distance.abs() > JUMP_CENTS {
            let agrees = self
                .pending
                .first()
                .and_then(|&first| calculate_cents_deviation(raw_hz, first))
                .is_none_or(|cents| cents.abs() <= JUMP_CENTS);
            if !agrees {
                self.pending.clear();
            }
            self.pending.push(raw_hz);

            if self.pending.len() < CONFIRM_RUN {
                return Some(StabilizedPitch {
                    held: true,
                    ..current
                });
            }
            self.history.clear();
            self.pending.clear();
            return self.seed(raw_hz, reference, timestamp_ms);
        }
        self.pending.clear();

        if self.history.len() == MEDIAN_LENGTH {
            self.history.pop_front();
        }
        self.history.push_back(raw_hz);
        let filtered = median(&self.history).unwrap_or(raw_hz);

        let alpha = self.alpha;
        let smoothed_frequency_hz = current.smoothed_frequency_hz * (1.0 - alpha) + filtered * alpha;

        // The reference follows the reported frequency, so the note shown for
        // it and the sign of the cents always agree.
        let reference_hz = reference.frequency_for(smoothed_frequency_hz)?;
        let smoothed_cents = if reference_hz == current.reference_hz {
            let cents = calculate_cents_deviation(filtered, reference_hz)?;
            current.smoothed_cents * (1.0 - alpha) + cents * alpha
        } else {
            // New reference note: cents from the old one are meaningless here.
            calculate_cents_deviation(smoothed_frequency_hz, reference_hz)?
        };

        let next = StabilizedPitch {
            smoothed_frequency_hz,
            smoothed_cents,
            reference_hz,
            last_update_timestamp_ms: timestamp_ms,
            held: false,
        };
        self.state = Some(next);
        Some(next)
    }

    fn seed(
        &mut self,
        raw_hz: f32,
        reference: CentsReference,
        timestamp_ms: f64,
    ) -> Option<StabilizedPitch> {
        let reference_hz = reference.frequency_for(raw_hz)?;
        let cents = calculate_cents_deviation(raw_hz, reference_hz)?;
        self.history.clear();
        self.history.push_back(raw_hz);

        let seeded = StabilizedPitch {
            smoothed_frequency_hz: raw_hz,
            smoothed_cents: cents,
            reference_hz,
            last_update_timestamp_ms: timestamp_ms,
            held: false,
        };
        self.state = Some(seeded);
        Some(seeded)
    }
}

impl Default for TemporalStabilizer {
    fn default() -> Self {
        Self::new(0.2)
    }
}

fn median(values: &VecDeque<f32>) -> Option<f32> {
    let mut sorted: Vec<f32> = values.iter().copied().collect();
    sorted.sort_by(f32::total_cmp);
    let mid = sorted.len() / 2;
    match sorted.len() {
        0 => None,
        n if n % 2 == 1 => Some(sorted[mid]),
        _ => Some((sorted[mid - 1] + sorted[mid]) / 2.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    const A440: CentsReference = CentsReference::Chromatic {
        reference_pitch_hz: 440.0,
    };

    #[test]
    fn first_value_seeds_without_ramping_from_zero() {
        let mut stabilizer = TemporalStabilizer::default();
        let pitch = stabilizer.update(110.0, A440, 0.0).unwrap();
        assert_eq!(pitch.smoothed_frequency_hz, 110.0);
        assert_abs_diff_eq!(pitch.smoothed_cents, 0.0, epsilon = 1e-3);
        assert!(!pitch.held);
    }

    #[test]
    fn exponential_smoothing_moves_by_alpha() {
        let mut stabilizer = TemporalStabilizer::new(0.5);
        stabilizer.update(110.0, A440, 0.0);
        // Median of [110, 111] is 110.5; halfway from 110 is 110.25.
        let pitch = stabilizer.update(111.0, A440, 21.3).unwrap();
        assert_abs_diff_eq!(pitch.smoothed_frequency_hz, 110.25, epsilon = 1e-4);
        assert_eq!(pitch.last_update_timestamp_ms, 21.3);
    }

    #[test]
    fn median_filter_drops_single_outliers_inside_the_jump_window() {
        let mut stabilizer = TemporalStabilizer::new(1.0);
        for (i, raw) in [110.0, 110.0, 110.0, 115.0, 110.0].into_iter().enumerate() {
            let pitch = stabilizer.update(raw, A440, i as f64).unwrap();
            assert_eq!(pitch.smoothed_frequency_hz, 110.0);
        }
    }

    #[test]
    fn a_single_jump_is_held() {
        let mut stabilizer = TemporalStabilizer::default();
        stabilizer.update(110.0, A440, 0.0);
        let before = stabilizer.state().unwrap();

        let pitch = stabilizer.update(220.0, A440, 20.0).unwrap();
        assert!(pitch.held);
        assert_eq!(pitch.smoothed_frequency_hz, before.smoothed_frequency_hz);
        assert_eq!(pitch.last_update_timestamp_ms, before.last_update_timestamp_ms);
        assert_eq!(stabilizer.pending_run(), 1);

        // Back on pitch: the stray value is forgotten.
        let pitch = stabilizer.update(110.0, A440, 40.0).unwrap();
        assert!(!pitch.held);
        assert_eq!(stabilizer.pending_run(), 0);
    }

    #[test]
    fn three_agreeing_values_confirm_a_jump() {
        let mut stabilizer = TemporalStabilizer::default();
        stabilizer.update(110.0, A440, 0.0);

        assert!(stabilizer.update(146.8, A440, 1.0).unwrap().held);
        assert!(stabilizer.update(147.0, A440, 2.0).unwrap().held);
        let pitch = stabilizer.update(146.9, A440, 3.0).unwrap();
        assert!(!pitch.held);
        assert_eq!(pitch.smoothed_frequency_hz, 146.9);
    }

    #[test]
    fn disagreeing_jump_values_restart_the_run() {
        let mut stabilizer = TemporalStabilizer::default();
        stabilizer.update(110.0, A440, 0.0);

        stabilizer.update(220.0, A440, 1.0);
        stabilizer.update(330.0, A440, 2.0);
        assert_eq!(stabilizer.pending_run(), 1);
        assert!(stabilizer.update(331.0, A440, 3.0).unwrap().held);
        assert!(!stabilizer.update(330.5, A440, 4.0).unwrap().held);
    }

    #[test]
    fn cents_are_clamped_for_display_only() {
        let mut stabilizer = TemporalStabilizer::default();
        let target = CentsReference::Target {
            frequency_hz: 146.83,
        };
        let pitch = stabilizer.update(112.0, target, 0.0).unwrap();
        assert_abs_diff_eq!(pitch.smoothed_cents, -468.78, epsilon = 0.05);
        assert_eq!(pitch.cents(), -CENTS_LIMIT);
    }

    #[test]
    fn chromatic_note_change_reseeds_cents() {
        let mut stabilizer = TemporalStabilizer::new(0.2);
        // 45 cents under A2, then 55 cents under it (45 over G#2).
        let low = 110.0 * 2f32.powf(-45.0 / 1200.0);
        let high = 110.0 * 2f32.powf(-55.0 / 1200.0);
        let first = stabilizer.update(low, A440, 0.0).unwrap();
        assert_abs_diff_eq!(first.smoothed_cents, -45.0, epsilon = 0.05);

        // Five windows just over the boundary so the median follows.
        let mut pitch = first;
        for i in 1..=5 {
            pitch = stabilizer.update(high, A440, i as f64).unwrap();
        }
        // Now measured from G#2 (+45) without blending in the old -45.
        assert!(pitch.smoothed_cents > 40.0, "{}", pitch.smoothed_cents);
        assert_abs_diff_eq!(pitch.reference_hz, 103.826, epsilon = 0.01);
    }

    #[test]
    fn cents_follow_the_note_of_the_smoothed_frequency() {
        // 112.5 Hz is A2 +38.9; 113.9 Hz is past the midpoint, Bb2 -39.7.
        for alpha in [0.05, 0.2, 0.5] {
            let mut stabilizer = TemporalStabilizer::new(alpha);
            let raws = std::iter::repeat_n(112.5, 6).chain(std::iter::repeat_n(113.9, 40));
            for (i, raw) in raws.enumerate() {
                let pitch = stabilizer.update(raw, A440, i as f64).unwrap();
                let shown = nearest_note_frequency(pitch.smoothed_frequency_hz, 440.0).unwrap();
                let implied =
                    calculate_cents_deviation(pitch.smoothed_frequency_hz, shown).unwrap();
                assert_eq!(pitch.reference_hz, shown, "alpha {} step {}", alpha, i);
                assert!(
                    (implied - pitch.smoothed_cents).abs() < 0.5,
                    "alpha {} step {}: {} Hz reads {} cents, note implies {}",
                    alpha,
                    i,
                    pitch.smoothed_frequency_hz,
                    pitch.smoothed_cents,
                    implied
                );
            }
            let settled = stabilizer.state().unwrap();
            assert_abs_diff_eq!(settled.reference_hz, 116.541, epsilon = 0.01);
        }
    }

    #[test]
    fn reset_forgets_history() {
        let mut stabilizer = TemporalStabilizer::default();
        stabilizer.update(110.0, A440, 0.0);
        stabilizer.update(220.0, A440, 1.0);
        stabilizer.reset();
        assert_eq!(stabilizer.state(), None);
        assert_eq!(stabilizer.pending_run(), 0);
        assert_eq!(stabilizer.update(220.0, A440, 2.0).unwrap().smoothed_frequency_hz, 220.0);
    }

    #[test]
    fn unmeasurable_values_are_ignored() {
        let mut stabilizer = TemporalStabilizer::default();
        assert_eq!(stabilizer.update(0.0, A440, 0.0), None);
        assert_eq!(stabilizer.update(f32::NAN, A440, 0.0), None);
        assert_eq!(
            stabilizer.update(110.0, CentsReference::Target { frequency_hz: 0.0 }, 0.0),
            None
        );
        assert_eq!(stabilizer.state(), None);
    }

    #[test]
    fn median_of_even_and_odd_histories() {
        let odd: VecDeque<f32> = [3.0, 1.0, 2.0].into_iter().collect();
        let even: VecDeque<f32> = [4.0, 1.0, 3.0, 2.0].into_iter().collect();
        assert_eq!(median(&odd), Some(2.0));
        assert_eq!(median(&even), Some(2.5));
        assert_eq!(median(&VecDeque::new()), None);
    }
}
