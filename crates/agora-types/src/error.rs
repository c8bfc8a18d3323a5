use thiserror::Error;

/// Rejections at the event publish boundary.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("unknown event type: '{0}'")]
    UnknownEventType(String),

    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("field must not be empty: {0}")]
    EmptyField(&'static str),
}

/// Errors in the approval protocol.
#[derive(Debug, Error)]
pub enum ApprovalError {
    #[error("no open approval for id '{0}'")]
    UnknownApproval(String),

    #[error("approval '{0}' already resolved")]
    AlreadyResolved(String),

    #[error("malformed approval request: {0}")]
    MalformedRequest(String),
}

/// Failures from the tool executor collaborator.
#[derive(Debug, Error)]
pub enum ToolExecutionError {
    #[error("tool not found: '{0}'")]
    NotFound(String),

    #[error("tool timed out after {0}s")]
    Timeout(u64),

    #[error("failed to spawn tool: {0}")]
    Spawn(String),

    #[error("tool io error: {0}")]
    Io(String),
}

/// Errors from repository operations (used by trait definitions in agora-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),
}
