use thiserror::Error;

pub type Result<T> = std::result::Result<T, RecorderError>;

#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("Platform bridge error: {0}")]
    Bridge(String),

    #[error("Generic Error: {0}")]
    Generic(String),

    #[error("Failed to Start the Recording Process, reason: {0}")]
    FailedToStart(String),

    #[error("Failed to acquire {kind}: {reason}")]
    Acquisition { kind: &'static str, reason: String },

    #[error("Failed to Finalize the Recording: {0}")]
    Finalization(String),

    #[error("Called to Stop when the Recorder is Already Stopped")]
    RecorderAlreadyStopped,

    #[error("Recording is already in progress")]
    RecorderAlreadyStarted,

    #[error("Timed out after {0:?} waiting for {1}")]
    Timeout(std::time::Duration, &'static str),

    #[error("No capture source found for display {0}")]
    NoSourceForDisplay(String),
}

impl RecorderError {
    /// Acquisition-class failures are fatal to `start` and surfaced verbatim;
    /// everything mid-session is either self-healed or absorbed.
    pub fn acquisition(kind: &'static str, reason: impl Into<String>) -> Self {
        RecorderError::Acquisition {
            kind,
            reason: reason.into(),
        }
    }
}
