use thiserror::Error;

/// Domain error taxonomy shared by the REST and realtime paths.
///
/// `Unauthorized` closes the connection in the realtime path and maps to
/// 401 in REST. `NotFound` and `Validation` are client errors that leave
/// the connection open. `Dependency` covers best-effort collaborators
/// (push provider, attachment resolution) and is logged, never surfaced.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Validation(String),

    #[error("dependency failure: {0}")]
    Dependency(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for ChatError {
    fn from(err: anyhow::Error) -> Self {
        ChatError::Internal(err.to_string())
    }
}
