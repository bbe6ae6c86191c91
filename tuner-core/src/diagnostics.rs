//! # Diagnostics
//!
//! Structured events describing what the pipeline decided for each window.
//! The host injects a [`DiagnosticSink`] if it wants them; without one every
//! call is a no-op. Nothing here is global.

use std::fmt;
use std::sync::Arc;

use crate::engine::EngineState;
use crate::settings::PitchAlgorithm;

#[derive(Debug, Clone, PartialEq)]
pub enum DiagnosticEvent {
    /// The engine moved between lifecycle states.
    StateChanged { from: EngineState, to: EngineState },
    /// A window was unusable (wrong length, NaN, all zeros).
    WindowRejected { reason: String },
    /// The gate stayed closed for this window.
    GateClosed { level_db: f32, envelope: f32 },
    /// The estimator found no periodicity it trusts.
    NoPitch { algorithm: PitchAlgorithm },
    /// A raw estimate went through the harmonic resolver.
    PitchResolved {
        algorithm: PitchAlgorithm,
        raw_hz: f32,
        corrected_hz: f32,
        confidence: f32,
    },
    /// The corrected frequency fell outside the instrument range.
    OutOfRange { frequency_hz: f32 },
    /// The stabilizer is holding a large jump until it is confirmed.
    JumpHeld { raw_hz: f32, smoothed_hz: f32, run: usize },
    /// Smoothing history was discarded.
    StabilizerReset,
    /// A setter received a value outside its domain.
    SettingClamped {
        field: &'static str,
        requested: f32,
        applied: f32,
    },
}

/// Receiver for [`DiagnosticEvent`]s. Any `Fn(&DiagnosticEvent)` closure works.
pub trait DiagnosticSink: Send + Sync {
    fn record(&self, event: &DiagnosticEvent);
}

impl<F> DiagnosticSink for F
where
    F: Fn(&DiagnosticEvent) + Send + Sync,
{
    fn record(&self, event: &DiagnosticEvent) {
        self(event)
    }
}

/// Optional, cheaply cloneable handle to a sink.
#[derive(Clone, Default)]
pub struct Diagnostics {
    sink: Option<Arc<dyn DiagnosticSink>>,
}

impl Diagnostics {
    pub fn none() -> Self {
        Self { sink: None }
    }

    pub fn new(sink: Arc<dyn DiagnosticSink>) -> Self {
        Self { sink: Some(sink) }
    }

    pub fn is_enabled(&self) -> bool {
        self.sink.is_some()
    }

    /// Events are built lazily so a missing sink costs nothing.
    #[inline]
    pub fn emit(&self, event: impl FnOnce() -> DiagnosticEvent) {
        if let Some(sink) = &self.sink {
            sink.record(&event());
        }
    }
}

impl fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Diagnostics")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}
