//! # Error Taxonomy
//!
//! Only [`TunerError::InputUnavailable`] ever reaches the host's error
//! callback. Every other kind is absorbed by the pipeline: a bad window or a
//! failed estimate becomes an inactive snapshot, an out-of-range setting is
//! clamped. The variants still exist so diagnostics and tests can name them.

use thiserror::Error;

/// Classified failure kinds, carried to the error callback next to the detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum ErrorKind {
    InputUnavailable,
    InvalidWindow,
    EstimationFailure,
    ConfigurationOutOfRange,
    InternalInvariantViolation,
}

/// Why an audio input could not be acquired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum InputFailure {
    PermissionDenied,
    NoDevice,
    Unsupported,
    Other,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TunerError {
    #[error("Audio input unavailable ({cause:?}): {detail}")]
    InputUnavailable { cause: InputFailure, detail: String },

    #[error("Invalid audio window: {0}")]
    InvalidWindow(String),

    #[error("No pitch could be estimated: {0}")]
    EstimationFailure(String),

    #[error("{field} = {requested} is out of range, clamped to {applied}")]
    ConfigurationOutOfRange {
        field: &'static str,
        requested: f32,
        applied: f32,
    },

    #[error("Internal invariant violated: {0}")]
    InternalInvariantViolation(String),
}

impl TunerError {
    pub fn input_unavailable(cause: InputFailure, detail: impl Into<String>) -> Self {
        TunerError::InputUnavailable {
            cause,
            detail: detail.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            TunerError::InputUnavailable { .. } => ErrorKind::InputUnavailable,
            TunerError::InvalidWindow(_) => ErrorKind::InvalidWindow,
            TunerError::EstimationFailure(_) => ErrorKind::EstimationFailure,
            TunerError::ConfigurationOutOfRange { .. } => ErrorKind::ConfigurationOutOfRange,
            TunerError::InternalInvariantViolation(_) => ErrorKind::InternalInvariantViolation,
        }
    }

    /// Whether this error is fatal to the current run and must be surfaced.
    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::InputUnavailable
    }
}

pub type Result<T> = std::result::Result<T, TunerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_input_unavailable_is_fatal() {
        let err = TunerError::input_unavailable(InputFailure::PermissionDenied, "denied by user");
        assert!(err.is_fatal());
        assert_eq!(err.kind(), ErrorKind::InputUnavailable);

        assert!(!TunerError::InvalidWindow("nan".into()).is_fatal());
        assert!(!TunerError::EstimationFailure("silence".into()).is_fatal());
    }

    #[test]
    fn clamping_message_names_the_field() {
        let err = TunerError::ConfigurationOutOfRange {
            field: "reference_pitch_hz",
            requested: 500.0,
            applied: 466.0,
        };
        assert_eq!(
            err.to_string(),
            "reference_pitch_hz = 500 is out of range, clamped to 466"
        );
    }
}
