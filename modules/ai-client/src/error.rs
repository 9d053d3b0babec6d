use thiserror::Error;

/// Typed failures from the inference capability. Callers retry once with a
/// relaxed strategy, then fall back to deterministic synthesis; none of these
/// variants should ever crash an attempt.
#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("inference call exceeded the declared {limit_secs}s timeout")]
    Timeout { limit_secs: u64 },

    #[error("inference output did not match the declared schema: {0}")]
    MalformedOutput(String),

    #[error("inference capacity exceeded")]
    CapacityExceeded,

    #[error("inference capability unavailable: {0}")]
    Unavailable(String),
}

impl InferenceError {
    /// Capacity and timeout failures may clear on a retry; malformed output
    /// only clears with a different prompt strategy.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            InferenceError::Timeout { .. } | InferenceError::CapacityExceeded
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_and_capacity_retry() {
        assert!(InferenceError::Timeout { limit_secs: 60 }.is_retriable());
        assert!(InferenceError::CapacityExceeded.is_retriable());
        assert!(!InferenceError::MalformedOutput("bad".into()).is_retriable());
        assert!(!InferenceError::Unavailable("down".into()).is_retriable());
    }
}
