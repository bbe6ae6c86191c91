//! # Tuner Engine
//!
//! The state machine that owns one run of the pipeline:
//!
//! ```text
//! Idle -> Requesting -> Running -> Idle
//!              \-> Error -> Requesting
//! ```
//!
//! While running, every window goes through the stages strictly in order:
//! gate, estimator, harmonic resolver, range filter, stabilizer, note mapper.
//! Any stage may end the window early with an inactive snapshot. Snapshots
//! are emitted at most once per `min_update_interval_ms` of window time.

use log::{debug, info, warn};
use serde::Serialize;

use crate::audio::{AudioSource, AudioWindow, BUFFER_SIZE};
use crate::diagnostics::{DiagnosticEvent, DiagnosticSink, Diagnostics};
use crate::error::{InputFailure, Result, TunerError};
use crate::gate::{NoiseGate, NoiseGateState};
use crate::harmonic::HarmonicResolver;
use crate::pitch::{McLeodEstimator, PitchEstimator, YinEstimator, in_detection_range};
use crate::settings::{PitchAlgorithm, TunerConfig, TunerControl, TunerSettings};
use crate::stabilizer::{CentsReference, StabilizedPitch, TemporalStabilizer};
use crate::tuning::frequency_to_note;
use crate::{Detune, TunerOutputState, TuningQuality};

use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EngineState {
    Idle,
    /// Waiting for the audio input to be acquired.
    Requesting,
    Running { sample_rate: u32 },
    /// The last start failed; see [`TunerEngine::last_error`].
    Error,
}

pub type UpdateCallback = Box<dyn FnMut(&TunerOutputState) + Send>;
pub type ErrorCallback = Box<dyn FnMut(&TunerError) + Send>;

/// Per-run state, created at the known sample rate and dropped on stop.
struct Pipeline {
    sample_rate: u32,
    gate: NoiseGate,
    yin: YinEstimator,
    mcleod: McLeodEstimator,
    resolver: HarmonicResolver,
    stabilizer: TemporalStabilizer,
    gated: Vec<f32>,
    epoch: u64,
    last_emit_ms: Option<f64>,
}

impl Pipeline {
    fn new(sample_rate: u32, config: &TunerConfig) -> Self {
        let settings = &config.settings;
        Self {
            sample_rate,
            gate: NoiseGate::new(sample_rate, settings.noise_gate),
            yin: YinEstimator::new(settings.yin_threshold),
            mcleod: McLeodEstimator::new(),
            resolver: HarmonicResolver::new(config.preset(), settings.reference_pitch_hz),
            stabilizer: TemporalStabilizer::new(settings.smoothing_factor),
            gated: Vec::with_capacity(BUFFER_SIZE),
            epoch: config.reference_epoch,
            last_emit_ms: None,
        }
    }

    /// Pushes the window's settings snapshot into the stages.
    fn configure(&mut self, config: &TunerConfig, diagnostics: &Diagnostics) {
        let settings = &config.settings;
        self.gate.update_settings(settings.noise_gate);
        self.yin.set_threshold(settings.yin_threshold);
        self.stabilizer.set_smoothing_factor(settings.smoothing_factor);
        self.resolver.retarget(config.preset(), settings.reference_pitch_hz);

        if config.reference_epoch != self.epoch {
            debug!("Tuning reference changed, resetting stabilizer");
            self.epoch = config.reference_epoch;
            self.stabilizer.reset();
            diagnostics.emit(|| DiagnosticEvent::StabilizerReset);
        }
    }

    fn estimator(&mut self, algorithm: PitchAlgorithm) -> &mut dyn PitchEstimator {
        match algorithm {
            PitchAlgorithm::Yin => &mut self.yin,
            PitchAlgorithm::McLeod => &mut self.mcleod,
        }
    }

    fn should_emit(&self, timestamp_ms: f64, interval_ms: f32) -> bool {
        match self.last_emit_ms {
            None => true,
            // A clock that went backwards restarts the cadence.
            Some(last) if timestamp_ms < last => true,
            Some(last) => timestamp_ms - last >= interval_ms as f64,
        }
    }
}

pub struct TunerEngine {
    control: TunerControl,
    diagnostics: Diagnostics,
    window_size: usize,
    state: EngineState,
    pipeline: Option<Pipeline>,
    on_update: Option<UpdateCallback>,
    on_error: Option<ErrorCallback>,
    last_error: Option<TunerError>,
}

impl TunerEngine {
    pub fn new(settings: TunerSettings) -> Self {
        Self::with_diagnostics_handle(settings, Diagnostics::none())
    }

    /// Engine reporting pipeline decisions to `sink`.
    pub fn with_diagnostics(settings: TunerSettings, sink: Arc<dyn DiagnosticSink>) -> Self {
        Self::with_diagnostics_handle(settings, Diagnostics::new(sink))
    }

    fn with_diagnostics_handle(settings: TunerSettings, diagnostics: Diagnostics) -> Self {
        Self {
            control: TunerControl::new(settings, diagnostics.clone()),
            diagnostics,
            window_size: BUFFER_SIZE,
            state: EngineState::Idle,
            pipeline: None,
            on_update: None,
            on_error: None,
            last_error: None,
        }
    }

    /// Expected samples per window; other lengths are rejected.
    pub fn with_window_size(mut self, window_size: usize) -> Self {
        self.window_size = window_size.max(1);
        self
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Handle for changing settings, from any thread.
    pub fn control(&self) -> TunerControl {
        self.control.clone()
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, EngineState::Running { .. })
    }

    pub fn last_error(&self) -> Option<&TunerError> {
        self.last_error.as_ref()
    }

    /// Registers the consumer of emitted snapshots.
    pub fn on_update(&mut self, callback: impl FnMut(&TunerOutputState) + Send + 'static) {
        self.on_update = Some(Box::new(callback));
    }

    /// Registers the consumer of fatal errors (input unavailable only).
    pub fn on_error(&mut self, callback: impl FnMut(&TunerError) + Send + 'static) {
        self.on_error = Some(Box::new(callback));
    }

    /// Current smoothed reading, if any.
    pub fn stabilized_pitch(&self) -> Option<StabilizedPitch> {
        self.pipeline.as_ref().and_then(|p| p.stabilizer.state())
    }

    pub fn gate_state(&self) -> Option<NoiseGateState> {
        self.pipeline.as_ref().map(|p| p.gate.state())
    }

    fn transition(&mut self, to: EngineState) {
        let from = self.state;
        if from == to {
            return;
        }
        info!("Tuner engine: {:?} -> {:?}", from, to);
        self.state = to;
        self.diagnostics.emit(|| DiagnosticEvent::StateChanged { from, to });
    }

    /// Idle (or Error) -> Requesting. Returns false in any other state.
    pub fn request_start(&mut self) -> bool {
        match self.state {
            EngineState::Idle | EngineState::Error => {
                self.last_error = None;
                self.transition(EngineState::Requesting);
                true
            }
            _ => false,
        }
    }

    /// Requesting -> Running, building the per-run state at `sample_rate`.
    pub fn input_acquired(&mut self, sample_rate: u32) -> Result<()> {
        if self.state != EngineState::Requesting {
            return Err(TunerError::InternalInvariantViolation(format!(
                "input acquired while {:?}",
                self.state
            )));
        }
        if sample_rate == 0 {
            let err = TunerError::input_unavailable(InputFailure::Unsupported, "sample rate is 0");
            self.input_failed(err.clone());
            return Err(err);
        }

        let config = self.control.snapshot();
        self.pipeline = Some(Pipeline::new(sample_rate, &config));
        self.transition(EngineState::Running { sample_rate });
        Ok(())
    }

    /// Requesting -> Error; the error callback receives `error`.
    pub fn input_failed(&mut self, error: TunerError) {
        warn!("Audio input failed: {}", error);
        self.pipeline = None;
        self.transition(EngineState::Error);
        if error.is_fatal() {
            if let Some(callback) = self.on_error.as_mut() {
                callback(&error);
            }
        }
        self.last_error = Some(error);
    }

    /// Runs the whole start sequence against `source`; returns the sample rate.
    pub fn start(&mut self, source: &mut impl AudioSource) -> Result<u32> {
        if let EngineState::Running { sample_rate } = self.state {
            return Ok(sample_rate);
        }
        if !self.request_start() {
            return Err(TunerError::InternalInvariantViolation(format!(
                "cannot start while {:?}",
                self.state
            )));
        }

        match source.open() {
            Ok(sample_rate) => {
                self.input_acquired(sample_rate)?;
                Ok(sample_rate)
            }
            Err(error) => {
                let error = match error {
                    TunerError::InputUnavailable { .. } => error,
                    other => TunerError::input_unavailable(InputFailure::Other, other.to_string()),
                };
                self.input_failed(error.clone());
                Err(error)
            }
        }
    }

    /// Back to Idle from any state; per-run state is discarded.
    pub fn stop(&mut self) {
        self.pipeline = None;
        self.transition(EngineState::Idle);
    }

    /// Like [`stop`](Self::stop), also closing `source`.
    pub fn stop_source(&mut self, source: &mut impl AudioSource) {
        source.close();
        self.stop();
    }

    /// Processes one window. Returns the snapshot if one was emitted (the
    /// update callback has already received it).
    ///
    /// Windows arriving while not running are discarded.
    pub fn process_window(&mut self, window: &AudioWindow) -> Option<TunerOutputState> {
        let config = self.control.snapshot();
        let window_size = self.window_size;
        let diagnostics = self.diagnostics.clone();
        let pipeline = self.pipeline.as_mut()?;

        pipeline.configure(&config, &diagnostics);
        let snapshot = analyse(pipeline, &config, window, window_size, &diagnostics);

        let interval = config.settings.min_update_interval_ms;
        if !pipeline.should_emit(window.timestamp_ms, interval) {
            return None;
        }
        pipeline.last_emit_ms = Some(window.timestamp_ms);

        if let Some(callback) = self.on_update.as_mut() {
            callback(&snapshot);
        }
        Some(snapshot)
    }
}

impl std::fmt::Debug for TunerEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunerEngine")
            .field("state", &self.state)
            .field("window_size", &self.window_size)
            .field("diagnostics", &self.diagnostics)
            .finish_non_exhaustive()
    }
}

/// Why a window cannot be analysed, if it cannot.
fn validate(window: &AudioWindow, window_size: usize, sample_rate: u32) -> Option<String> {
    if window.len() != window_size {
        return Some(format!("expected {} samples, got {}", window_size, window.len()));
    }
    if window.sample_rate != sample_rate {
        return Some(format!(
            "sample rate {} Hz, stream runs at {} Hz",
            window.sample_rate, sample_rate
        ));
    }
    if window.samples.iter().any(|s| !s.is_finite()) {
        return Some("non-finite samples".to_string());
    }
    None
}

/// One window through the pipeline. Never fails: every early exit becomes an
/// inactive snapshot.
fn analyse(
    pipeline: &mut Pipeline,
    config: &TunerConfig,
    window: &AudioWindow,
    window_size: usize,
    diagnostics: &Diagnostics,
) -> TunerOutputState {
    let settings = &config.settings;
    let target = config.target();
    let inactive = |gate_open: bool, voice: bool| {
        TunerOutputState::inactive(
            settings.reference_pitch_hz,
            target,
            gate_open,
            voice,
            window.timestamp_ms,
        )
    };

    if let Some(reason) = validate(window, window_size, pipeline.sample_rate) {
        debug!("Rejected window: {}", reason);
        diagnostics.emit(|| DiagnosticEvent::WindowRejected { reason });
        return inactive(false, false);
    }

    let samples = &window.samples[..];
    if samples.iter().all(|&s| s == 0.0) {
        // Silence still drives the envelope down.
        pipeline.gate.process_window(samples);
        diagnostics.emit(|| DiagnosticEvent::WindowRejected {
            reason: "all samples are zero".to_string(),
        });
        return inactive(false, false);
    }

    // Reported whether or not the gate opens.
    let voice = settings.voice_detection && pipeline.gate.detect_voice(samples);

    // 1. Gate
    let decision = pipeline.gate.process(samples, &mut pipeline.gated);
    if !decision.is_open {
        diagnostics.emit(|| DiagnosticEvent::GateClosed {
            level_db: decision.level_db,
            envelope: decision.envelope,
        });
        return inactive(false, voice);
    }

    // 2. Estimate
    let algorithm = settings.algorithm;
    let sample_rate = pipeline.sample_rate;
    let gated = std::mem::take(&mut pipeline.gated);
    let candidate = pipeline
        .estimator(algorithm)
        .estimate(&gated, sample_rate, settings.sensitivity);
    pipeline.gated = gated;
    let Some(candidate) = candidate else {
        diagnostics.emit(|| DiagnosticEvent::NoPitch { algorithm });
        return inactive(true, voice);
    };

    // 3. Harmonic correction, then the range filter
    let corrected = pipeline.resolver.resolve(candidate.frequency_hz);
    diagnostics.emit(|| DiagnosticEvent::PitchResolved {
        algorithm,
        raw_hz: candidate.frequency_hz,
        corrected_hz: corrected,
        confidence: candidate.confidence,
    });
    if !in_detection_range(corrected) {
        diagnostics.emit(|| DiagnosticEvent::OutOfRange {
            frequency_hz: corrected,
        });
        return inactive(true, voice);
    }

    // 4. Stabilize
    let reference = match target {
        Some(target) => CentsReference::Target {
            frequency_hz: target.frequency_hz,
        },
        None => CentsReference::Chromatic {
            reference_pitch_hz: settings.reference_pitch_hz,
        },
    };
    let Some(pitch) = pipeline
        .stabilizer
        .update(corrected, reference, window.timestamp_ms)
    else {
        return inactive(true, voice);
    };
    if pitch.held {
        let run = pipeline.stabilizer.pending_run();
        diagnostics.emit(|| DiagnosticEvent::JumpHeld {
            raw_hz: corrected,
            smoothed_hz: pitch.smoothed_frequency_hz,
            run,
        });
    }

    // 5. Map to a note
    let Some(note) = frequency_to_note(pitch.smoothed_frequency_hz, settings.reference_pitch_hz)
    else {
        return inactive(true, voice);
    };

    let cents = pitch.cents();
    let is_in_tune = cents.abs() <= settings.in_tune_threshold_cents;
    let detune = if is_in_tune {
        Detune::In
    } else if cents < 0.0 {
        Detune::Flat
    } else {
        Detune::Sharp
    };

    TunerOutputState {
        note_name: note.name,
        note_name_localized: note.name_localized,
        octave: note.octave,
        frequency_hz: pitch.smoothed_frequency_hz,
        cents,
        confidence: candidate.confidence,
        is_in_tune,
        detune,
        quality: TuningQuality::from_cents(
            cents,
            settings.in_tune_threshold_cents,
            settings.sharp_flat_threshold_cents,
        ),
        reference_pitch_hz: settings.reference_pitch_hz,
        target_note: target.map(|t| t.note),
        target_frequency_hz: target.map(|t| t.frequency_hz),
        is_active: true,
        noise_gate_open: true,
        voice_detected: voice,
        timestamp_ms: window.timestamp_ms,
    }
}
