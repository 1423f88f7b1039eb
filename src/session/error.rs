use crate::storage::FinalizeError;
use std::path::PathBuf;
use thiserror::Error;

/// Everything that can end a session in `Error`
///
/// The `Display` text is what observers see as `error_message`.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("device not resolvable: {0}")]
    Resolution(String),

    #[error("failed to start capture pipeline: {0}")]
    Spawn(String),

    #[error("no data captured")]
    NoData,

    #[error("capture pipeline exited unexpectedly (code {code:?})")]
    PipelineExited { code: Option<i32>, saved: Option<PathBuf> },

    #[error("failed to save recording: {0}")]
    Finalize(String),

    #[error("recording task failed: {0}")]
    Crashed(String),
}

impl From<FinalizeError> for SessionError {
    fn from(err: FinalizeError) -> Self {
        match err {
            FinalizeError::Missing(_) | FinalizeError::Empty(_) => SessionError::NoData,
            other => SessionError::Finalize(other.to_string()),
        }
    }
}

/// How a session ended
#[derive(Debug)]
pub enum SessionOutcome {
    Completed {
        filename: String,
        path: PathBuf,
        bytes: u64,
        duration_seconds: u64,
    },
    Failed(SessionError),
}

impl SessionOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, SessionOutcome::Completed { .. })
    }
}
