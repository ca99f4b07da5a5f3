use thiserror::Error;

pub type RevisitResult<T> = Result<T, RevisitError>;

#[derive(Error, Debug)]
pub enum RevisitError {
    #[error("Guest is not authenticated")]
    Unauthenticated,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Venue not found: {0}")]
    VenueNotFound(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Too soon to redeem again, retry in {retry_after_secs}s")]
    TooSoon { retry_after_secs: u64 },

    #[error("Concurrent write conflict: {0}")]
    TransientConflict(String),

    #[error("Invalid state transition: {0}")]
    InvalidTransition(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl RevisitError {
    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RevisitError::Storage(_) | RevisitError::TransientConflict(_)
        )
    }

    /// Stable machine-readable code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            RevisitError::Unauthenticated => "unauthenticated",
            RevisitError::InvalidRequest(_) => "invalid_request",
            RevisitError::VenueNotFound(_) => "venue_not_found",
            RevisitError::NotFound(_) => "not_found",
            RevisitError::AccessDenied(_) => "access_denied",
            RevisitError::TooSoon { .. } => "too_soon",
            RevisitError::TransientConflict(_) => "transient_conflict",
            RevisitError::InvalidTransition(_) => "invalid_transition",
            RevisitError::Storage(_) => "storage",
            RevisitError::Config(_) => "config",
            RevisitError::Serialization(_) => "serialization",
            RevisitError::Internal(_) => "internal",
        }
    }
}
