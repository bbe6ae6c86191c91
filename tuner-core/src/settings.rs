//! # Settings Module
//!
//! Tuner configuration and the handle used to change it while the pipeline
//! runs.
//!
//! The live configuration ([`TunerConfig`]) sits behind an `ArcSwap`. The
//! pipeline loads one snapshot per window, so a window always sees a whole
//! configuration; [`TunerControl`] setters publish a modified copy. Every
//! numeric field is clamped to its domain on write.

use std::sync::Arc;

use arc_swap::ArcSwap;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::diagnostics::{DiagnosticEvent, Diagnostics};
use crate::error::TunerError;
use crate::tuning::{self, STRING_COUNT, TUNING_PRESETS, TuningPreset};

pub const REFERENCE_PITCH_RANGE: (f32, f32) = (415.0, 466.0);
pub const SENSITIVITY_RANGE: (f32, f32) = (0.1, 0.99);
pub const GATE_THRESHOLD_RANGE: (f32, f32) = (-60.0, 0.0);

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseGateSettings {
    /// Opening threshold in dBFS.
    pub threshold_db: f32,
    pub attack_ms: f32,
    pub release_ms: f32,
    /// Expansion ratio below threshold.
    pub ratio: f32,
}

impl Default for NoiseGateSettings {
    fn default() -> Self {
        Self {
            threshold_db: -40.0,
            attack_ms: 1.0,
            release_ms: 100.0,
            ratio: 4.0,
        }
    }
}

/// Which estimator analyses gated windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PitchAlgorithm {
    #[default]
    Yin,
    McLeod,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunerSettings {
    /// A4 calibration in Hz.
    pub reference_pitch_hz: f32,
    /// Minimum estimator confidence for a pitch to be accepted.
    pub sensitivity: f32,
    pub noise_gate: NoiseGateSettings,
    pub in_tune_threshold_cents: f32,
    /// Boundary between "close" and "off" for the quality indicator.
    pub sharp_flat_threshold_cents: f32,
    /// Exponential smoothing factor; higher is more responsive.
    pub smoothing_factor: f32,
    pub algorithm: PitchAlgorithm,
    /// YIN absolute threshold on the normalized difference.
    pub yin_threshold: f32,
    /// Minimum time between two emitted snapshots.
    pub min_update_interval_ms: f32,
    pub voice_detection: bool,
}

impl Default for TunerSettings {
    fn default() -> Self {
        Self {
            reference_pitch_hz: 440.0,
            sensitivity: 0.8,
            noise_gate: NoiseGateSettings::default(),
            in_tune_threshold_cents: 5.0,
            sharp_flat_threshold_cents: 15.0,
            smoothing_factor: 0.2,
            algorithm: PitchAlgorithm::Yin,
            yin_threshold: 0.15,
            min_update_interval_ms: 16.0,
            voice_detection: true,
        }
    }
}

/// Clamps `requested` into `[min, max]`; non-finite input falls back to
/// `default`. Reports the adjustment when one was needed.
fn clamp_field(
    field: &'static str,
    requested: f32,
    (min, max): (f32, f32),
    default: f32,
) -> (f32, Option<TunerError>) {
    let applied = if requested.is_finite() {
        requested.clamp(min, max)
    } else {
        default
    };
    if applied == requested {
        (applied, None)
    } else {
        let clamp = TunerError::ConfigurationOutOfRange {
            field,
            requested,
            applied,
        };
        (applied, Some(clamp))
    }
}

impl TunerSettings {
    /// Clamps every field into its domain and returns what had to change.
    pub fn sanitize(&mut self) -> Vec<TunerError> {
        let defaults = TunerSettings::default();
        let gate_defaults = NoiseGateSettings::default();
        let mut clamps = Vec::new();
        let mut apply = |field: &'static str, value: &mut f32, range: (f32, f32), default: f32| {
            let (applied, clamp) = clamp_field(field, *value, range, default);
            *value = applied;
            clamps.extend(clamp);
        };

        apply(
            "reference_pitch_hz",
            &mut self.reference_pitch_hz,
            REFERENCE_PITCH_RANGE,
            defaults.reference_pitch_hz,
        );
        apply("sensitivity", &mut self.sensitivity, SENSITIVITY_RANGE, defaults.sensitivity);
        apply(
            "noise_gate.threshold_db",
            &mut self.noise_gate.threshold_db,
            GATE_THRESHOLD_RANGE,
            gate_defaults.threshold_db,
        );
        apply(
            "noise_gate.attack_ms",
            &mut self.noise_gate.attack_ms,
            (0.0, 1000.0),
            gate_defaults.attack_ms,
        );
        apply(
            "noise_gate.release_ms",
            &mut self.noise_gate.release_ms,
            (0.0, 5000.0),
            gate_defaults.release_ms,
        );
        apply("noise_gate.ratio", &mut self.noise_gate.ratio, (1.0, 10.0), gate_defaults.ratio);
        apply(
            "in_tune_threshold_cents",
            &mut self.in_tune_threshold_cents,
            (0.0, 50.0),
            defaults.in_tune_threshold_cents,
        );
        apply(
            "sharp_flat_threshold_cents",
            &mut self.sharp_flat_threshold_cents,
            (0.0, 50.0),
            defaults.sharp_flat_threshold_cents,
        );
        apply(
            "smoothing_factor",
            &mut self.smoothing_factor,
            (0.01, 1.0),
            defaults.smoothing_factor,
        );
        apply("yin_threshold", &mut self.yin_threshold, (0.01, 0.99), defaults.yin_threshold);
        apply(
            "min_update_interval_ms",
            &mut self.min_update_interval_ms,
            (0.0, 1000.0),
            defaults.min_update_interval_ms,
        );
        clamps
    }

    /// Parses a persisted settings document. Missing fields take their
    /// defaults and every value is clamped.
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        let mut settings: TunerSettings = serde_json::from_str(text)?;
        for clamp in settings.sanitize() {
            warn!("Persisted setting adjusted: {}", clamp);
        }
        Ok(settings)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Auto: cents against the nearest chromatic note. String: cents against
/// one string of the current preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TunerMode {
    #[default]
    Auto,
    String { string_index: usize },
}

/// The note a String-mode reading is measured against.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TuningTarget {
    pub note: &'static str,
    pub frequency_hz: f32,
}

/// Everything the pipeline reads per window.
#[derive(Debug, Clone, PartialEq)]
pub struct TunerConfig {
    pub settings: TunerSettings,
    pub mode: TunerMode,
    pub preset_index: usize,
    /// Bumped whenever the cents reference changes meaning (mode, target
    /// string, preset).
    pub reference_epoch: u64,
}

impl TunerConfig {
    pub fn new(mut settings: TunerSettings) -> Self {
        settings.sanitize();
        Self {
            settings,
            mode: TunerMode::Auto,
            preset_index: 0,
            reference_epoch: 0,
        }
    }

    pub fn preset(&self) -> &'static TuningPreset {
        tuning::preset(self.preset_index).unwrap_or(&TUNING_PRESETS[0])
    }

    /// Current String-mode target, scaled to the reference pitch.
    pub fn target(&self) -> Option<TuningTarget> {
        match self.mode {
            TunerMode::Auto => None,
            TunerMode::String { string_index } => {
                let preset = self.preset();
                Some(TuningTarget {
                    note: preset.target_note(string_index)?,
                    frequency_hz: preset
                        .target_frequency(string_index, self.settings.reference_pitch_hz)?,
                })
            }
        }
    }
}

impl Default for TunerConfig {
    fn default() -> Self {
        Self::new(TunerSettings::default())
    }
}

/// Cloneable, thread-safe handle for reading and changing the configuration.
#[derive(Debug, Clone)]
pub struct TunerControl {
    config: Arc<ArcSwap<TunerConfig>>,
    diagnostics: Diagnostics,
}

impl TunerControl {
    /// Out-of-range fields in `settings` are clamped and reported like any
    /// setter's.
    pub fn new(mut settings: TunerSettings, diagnostics: Diagnostics) -> Self {
        let clamps = settings.sanitize();
        let control = Self {
            config: Arc::new(ArcSwap::from_pointee(TunerConfig::new(settings))),
            diagnostics,
        };
        for clamp in clamps {
            control.report(Some(clamp));
        }
        control
    }

    /// The configuration a window should use from start to finish.
    pub fn snapshot(&self) -> Arc<TunerConfig> {
        self.config.load_full()
    }

    pub fn settings(&self) -> TunerSettings {
        self.config.load().settings.clone()
    }

    pub fn mode(&self) -> TunerMode {
        self.config.load().mode
    }

    pub fn preset(&self) -> &'static TuningPreset {
        self.config.load().preset()
    }

    pub fn preset_index(&self) -> usize {
        self.config.load().preset_index
    }

    pub fn target_string_index(&self) -> Option<usize> {
        match self.mode() {
            TunerMode::Auto => None,
            TunerMode::String { string_index } => Some(string_index),
        }
    }

    pub fn target(&self) -> Option<TuningTarget> {
        self.config.load().target()
    }

    fn update(&self, mut change: impl FnMut(&mut TunerConfig)) {
        self.config.rcu(|current| {
            let mut next = TunerConfig::clone(current);
            change(&mut next);
            next
        });
    }

    fn report(&self, clamp: Option<TunerError>) {
        if let Some(TunerError::ConfigurationOutOfRange {
            field,
            requested,
            applied,
        }) = clamp
        {
            warn!("{} = {} out of range, using {}", field, requested, applied);
            self.diagnostics.emit(|| DiagnosticEvent::SettingClamped {
                field,
                requested,
                applied,
            });
        }
    }

    fn set_clamped(
        &self,
        field: &'static str,
        requested: f32,
        range: (f32, f32),
        default: f32,
        write: impl Fn(&mut TunerSettings, f32),
    ) -> f32 {
        let (applied, clamp) = clamp_field(field, requested, range, default);
        self.report(clamp);
        self.update(|config| write(&mut config.settings, applied));
        applied
    }

    /// Sets the A4 reference; returns the value actually stored.
    pub fn set_calibration(&self, reference_pitch_hz: f32) -> f32 {
        self.set_clamped(
            "reference_pitch_hz",
            reference_pitch_hz,
            REFERENCE_PITCH_RANGE,
            440.0,
            |s, v| s.reference_pitch_hz = v,
        )
    }

    pub fn set_sensitivity(&self, sensitivity: f32) -> f32 {
        self.set_clamped("sensitivity", sensitivity, SENSITIVITY_RANGE, 0.8, |s, v| {
            s.sensitivity = v
        })
    }

    pub fn set_noise_gate_threshold(&self, threshold_db: f32) -> f32 {
        self.set_clamped(
            "noise_gate.threshold_db",
            threshold_db,
            GATE_THRESHOLD_RANGE,
            -40.0,
            |s, v| s.noise_gate.threshold_db = v,
        )
    }

    pub fn set_in_tune_threshold(&self, cents: f32) -> f32 {
        self.set_clamped("in_tune_threshold_cents", cents, (0.0, 50.0), 5.0, |s, v| {
            s.in_tune_threshold_cents = v
        })
    }

    pub fn set_sharp_flat_threshold(&self, cents: f32) -> f32 {
        self.set_clamped("sharp_flat_threshold_cents", cents, (0.0, 50.0), 15.0, |s, v| {
            s.sharp_flat_threshold_cents = v
        })
    }

    pub fn set_smoothing_factor(&self, alpha: f32) -> f32 {
        self.set_clamped("smoothing_factor", alpha, (0.01, 1.0), 0.2, |s, v| {
            s.smoothing_factor = v
        })
    }

    pub fn set_algorithm(&self, algorithm: PitchAlgorithm) {
        self.update(|config| config.settings.algorithm = algorithm);
    }

    pub fn set_voice_detection(&self, enabled: bool) {
        self.update(|config| config.settings.voice_detection = enabled);
    }

    /// Replaces the whole settings block, e.g. after loading persisted values.
    pub fn replace_settings(&self, mut settings: TunerSettings) {
        for clamp in settings.sanitize() {
            self.report(Some(clamp));
        }
        self.update(|config| config.settings = settings.clone());
    }

    /// Back to nearest-note tuning.
    pub fn set_auto_mode(&self) {
        debug!("Tuner mode -> auto");
        self.update(|config| {
            config.mode = TunerMode::Auto;
            config.reference_epoch += 1;
        });
    }

    /// Targets one string of the current preset. Out-of-range indices are
    /// ignored and return `false`.
    pub fn set_target_string(&self, string_index: usize) -> bool {
        if string_index >= STRING_COUNT {
            warn!("Ignoring target string {} (preset has {})", string_index, STRING_COUNT);
            return false;
        }
        debug!("Tuner mode -> string {}", string_index);
        self.update(|config| {
            config.mode = TunerMode::String { string_index };
            config.reference_epoch += 1;
        });
        true
    }

    /// Selects a tuning preset; clears any string target.
    pub fn set_tuning_preset(&self, preset_index: usize) -> bool {
        if tuning::preset(preset_index).is_none() {
            warn!("Ignoring unknown tuning preset {}", preset_index);
            return false;
        }
        self.update(|config| {
            config.preset_index = preset_index;
            config.mode = TunerMode::Auto;
            config.reference_epoch += 1;
        });
        true
    }
}

impl Default for TunerControl {
    fn default() -> Self {
        Self::new(TunerSettings::default(), Diagnostics::none())
    }
}
