//! Error types for chain validation and organization

use thiserror::Error;

/// Why a block or transaction was refused.
///
/// Rejections are ordinary results, never raised: the caller decides what
/// to do with the originating peer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    #[error("Malformed: {0}")]
    Malformed(String),

    #[error("Insufficient proof: {0}")]
    InsufficientProof(String),

    #[error("Contextually invalid: {0}")]
    ContextualInvalid(String),

    #[error("Double spend: {0}")]
    DoubleSpend(String),

    #[error("Script failure: {0}")]
    ScriptFailure(String),

    #[error("Checkpoint mismatch at height {0}")]
    CheckpointMismatch(u64),

    #[error("Policy violation: {0}")]
    PolicyViolation(String),

    #[error("Capacity: {0}")]
    Capacity(String),

    #[error("Duplicate: {0}")]
    Duplicate(String),
}

impl Rejection {
    /// Whether the data itself is at fault, so the sender may be penalized.
    pub fn penalizes_origin(&self) -> bool {
        !matches!(
            self,
            Rejection::PolicyViolation(_) | Rejection::Capacity(_) | Rejection::Duplicate(_)
        )
    }

    /// Whether resubmitting the same data can never succeed.
    pub fn is_permanent(&self) -> bool {
        !matches!(self, Rejection::Capacity(_) | Rejection::PolicyViolation(_))
    }
}

/// Unrecoverable conditions: the operation is aborted.
#[derive(Error, Debug)]
pub enum ChainError {
    #[error("Storage failure: {0}")]
    Storage(String),

    #[error("Invariant violated: {0}")]
    Invariant(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ChainError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_and_capacity_do_not_penalize() {
        assert!(!Rejection::PolicyViolation("low fee".into()).penalizes_origin());
        assert!(!Rejection::Capacity("pool full".into()).penalizes_origin());
        assert!(!Rejection::Duplicate("seen".into()).penalizes_origin());
        assert!(Rejection::DoubleSpend("spent".into()).penalizes_origin());
        assert!(Rejection::CheckpointMismatch(11).penalizes_origin());
    }

    #[test]
    fn test_capacity_is_transient() {
        assert!(!Rejection::Capacity("pool full".into()).is_permanent());
        assert!(Rejection::Malformed("empty".into()).is_permanent());
    }

    #[test]
    fn test_display() {
        let rejection = Rejection::CheckpointMismatch(42);
        assert_eq!(rejection.to_string(), "Checkpoint mismatch at height 42");
    }
}
