// tuner-core/src/lib.rs

//! The core logic for the guitar tuner.
//! This crate turns fixed-size audio windows into a stable note, octave and
//! cents reading: noise gating, pitch estimation, harmonic correction,
//! temporal smoothing and note mapping. It is completely headless and
//! contains no UI code; audio capture is optional (feature `capture`).

pub mod audio;
pub mod diagnostics;
pub mod engine;
pub mod error;
pub mod fft;
pub mod gate;
pub mod harmonic;
pub mod pitch;
pub mod settings;
pub mod stabilizer;
pub mod synth;
pub mod tuning;
pub mod worker;

use serde::Serialize;

pub use audio::{AudioSource, AudioWindow, WindowBuffer};
pub use diagnostics::{DiagnosticEvent, DiagnosticSink, Diagnostics};
pub use engine::{EngineState, TunerEngine};
pub use error::{ErrorKind, InputFailure, Result, TunerError};
pub use settings::{PitchAlgorithm, TunerControl, TunerMode, TunerSettings};
pub use worker::AnalysisWorker;

/// Which side of the target the reading is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Detune {
    Flat,
    Sharp,
    In,
}

/// Three-step indicator (in tune, close, off) for an LED-style display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TuningQuality {
    InTune,
    Close,
    Off,
}

impl TuningQuality {
    pub fn from_cents(cents: f32, in_tune_cents: f32, close_cents: f32) -> Self {
        let magnitude = cents.abs();
        if magnitude <= in_tune_cents {
            TuningQuality::InTune
        } else if magnitude <= close_cents {
            TuningQuality::Close
        } else {
            TuningQuality::Off
        }
    }
}

/// The single snapshot handed to the UI for a processed window.
///
/// Always a full replacement. When `is_active` is false the note fields are
/// empty and only the gate, voice and target fields carry information.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TunerOutputState {
    pub note_name: &'static str,
    pub note_name_localized: &'static str,
    pub octave: i32,
    pub frequency_hz: f32,
    /// Clamped to ±50.
    pub cents: f32,
    pub confidence: f32,
    pub is_in_tune: bool,
    pub detune: Detune,
    pub quality: TuningQuality,
    pub reference_pitch_hz: f32,
    pub target_note: Option<&'static str>,
    pub target_frequency_hz: Option<f32>,
    pub is_active: bool,
    pub noise_gate_open: bool,
    pub voice_detected: bool,
    /// Timestamp of the window this snapshot came from.
    pub timestamp_ms: f64,
}

impl TunerOutputState {
    /// A "listening" snapshot: nothing to show for this window.
    pub fn inactive(
        reference_pitch_hz: f32,
        target: Option<settings::TuningTarget>,
        noise_gate_open: bool,
        voice_detected: bool,
        timestamp_ms: f64,
    ) -> Self {
        Self {
            note_name: "",
            note_name_localized: "",
            octave: 0,
            frequency_hz: 0.0,
            cents: 0.0,
            confidence: 0.0,
            is_in_tune: false,
            detune: Detune::In,
            quality: TuningQuality::Off,
            reference_pitch_hz,
            target_note: target.map(|t| t.note),
            target_frequency_hz: target.map(|t| t.frequency_hz),
            is_active: false,
            noise_gate_open,
            voice_detected,
            timestamp_ms,
        }
    }

    /// Note and octave together, e.g. `"A4"`; empty when inactive.
    pub fn note_label(&self) -> String {
        if self.is_active {
            format!("{}{}", self.note_name, self.octave)
        } else {
            String::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quality_bands() {
        assert_eq!(TuningQuality::from_cents(-4.0, 5.0, 15.0), TuningQuality::InTune);
        assert_eq!(TuningQuality::from_cents(5.0, 5.0, 15.0), TuningQuality::InTune);
        assert_eq!(TuningQuality::from_cents(-12.0, 5.0, 15.0), TuningQuality::Close);
        assert_eq!(TuningQuality::from_cents(30.0, 5.0, 15.0), TuningQuality::Off);
    }

    #[test]
    fn inactive_snapshot_serializes_for_the_ui() {
        let state = TunerOutputState::inactive(440.0, None, false, false, 42.0);
        assert!(!state.is_active);
        assert_eq!(state.note_label(), "");

        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["detune"], "in");
        assert_eq!(json["is_active"], false);
        assert_eq!(json["target_note"], serde_json::Value::Null);
    }
}
