use thiserror::Error;

/// Error taxonomy for the escalation service.
///
/// `Validation` and `NotFound` are local and terminal — surfaced to the
/// caller, never retried. `Upstream` (embedding provider or store
/// unavailable) and `Conflict` (optimistic-concurrency failure) are safe for
/// the caller to retry whole: every multi-record write is transactional, so
/// neither leaves partial state behind.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("upstream failure: {0}")]
    Upstream(String),

    #[error("internal: {0}")]
    Internal(#[from] anyhow::Error),
}

impl RelayError {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::NotFound(_) => 404,
            Self::Conflict(_) => 409,
            Self::Upstream(_) => 500,
            Self::Internal(_) => 500,
        }
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;
