//! Error types.
//!
//! Conflicts between updates are not errors: the resolver reports them as a
//! normal [`crate::resolver::Decision`]. Only misuse of the drag API and
//! persistence failures surface as `Err`.

use crate::drag::SessionId;

/// Misuse of the drag session API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DragError {
    #[error("drag session {0} already in progress")]
    AlreadyDragging(SessionId),
    #[error("no drag session in progress")]
    NotDragging,
    #[error("annotation index {index} out of range (len {len})")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("drag session is moving index {expected}, got {got}")]
    WrongIndex { expected: usize, got: usize },
}

/// Failure reported by the persistence collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PersistError {
    #[error("persistence rejected: {0}")]
    Rejected(String),
    #[error("persistence transport failed: {0}")]
    Transport(String),
}

impl PersistError {
    /// Stable machine-readable code for the user-facing error channel.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Rejected(_) => "E_PERSIST_REJECTED",
            Self::Transport(_) => "E_PERSIST_TRANSPORT",
        }
    }
}

/// Failure to reach the sync service task.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    #[error("sync service has shut down")]
    Closed,
    #[error(transparent)]
    Drag(#[from] DragError),
}
