use crate::core::catalog::TaskKey;
use crate::core::state::{OverallStatus, SessionId, TaskStatus};

/// The generation collaborator failed or returned unusable data.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("generation request failed: {0}")]
    Request(String),

    #[error("generation API error: {0}")]
    Api(String),

    #[error("generation returned no image (finish reason: {0})")]
    NoImage(String),

    #[error("generation returned unusable data: {0}")]
    InvalidData(String),
}

/// Background removal could not produce an image.
#[derive(Debug, thiserror::Error)]
pub enum ProcessingError {
    #[error("failed to decode image: {0}")]
    Decode(String),

    #[error("failed to encode image: {0}")]
    Encode(String),

    #[error("background removal worker failed: {0}")]
    Worker(String),

    #[error("background removal failed (chroma key: {chroma}; white key: {white})")]
    Exhausted { chroma: String, white: String },
}

/// A caller asked for a transition the session does not allow.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    #[error("session {0} already has a reference sheet")]
    ReferenceAlreadySet(SessionId),

    #[error("session {0} has no reference sheet")]
    MissingReference(SessionId),

    #[error("session {id} is {status}, expected {expected}")]
    InvalidSessionStatus {
        id: SessionId,
        status: OverallStatus,
        expected: &'static str,
    },

    #[error("task {key} cannot move from {from} to {to}")]
    InvalidTaskTransition {
        key: TaskKey,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("task {key} is {status}, only failed tasks can be retried")]
    NotRetryable { key: TaskKey, status: TaskStatus },

    #[error("character attributes can only be edited before a session starts")]
    AttributesLocked,

    #[error("unknown task {0}")]
    UnknownTask(TaskKey),

    #[error("session {0} is no longer current")]
    StaleSession(SessionId),

    #[error("task catalog is empty")]
    EmptyCatalog,

    #[error("concurrency must be at least 1")]
    ZeroConcurrency,
}

#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("reference sheet generation failed: {0}")]
    Reference(#[source] GenerationError),

    #[error(transparent)]
    State(#[from] StateError),
}
