use std::time::Duration;

use thiserror::Error;

/// Typed source adapter failures. Adapters must never surface generic errors;
/// the scheduler applies differentiated handling per variant.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("source rejected credentials")]
    Auth,

    #[error("source rate limited{}", retry_after.map(|d| format!(", retry after {}s", d.as_secs())).unwrap_or_default())]
    RateLimited { retry_after: Option<Duration> },

    #[error("transient source failure: {0}")]
    Transient(String),

    #[error("permanent source failure: {0}")]
    Permanent(String),
}

impl SourceError {
    /// Only transient failures are worth retrying within a tick.
    pub fn is_retriable(&self) -> bool {
        matches!(self, SourceError::Transient(_))
    }
}

/// Persistence collaborator failures. Retried with backoff; exhausted writes
/// go to the dead-letter list rather than being lost.
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("storage write failed: {0}")]
    Write(String),

    #[error("storage query failed: {0}")]
    Query(String),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl PersistenceError {
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            PersistenceError::Write(_) | PersistenceError::Unavailable(_)
        )
    }
}
