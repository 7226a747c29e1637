use crate::types::H256;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, VoteError>;

#[derive(Error, Debug)]
pub enum VoteError {
    /// Malformed or missing caller input.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A field exceeds its declared byte bound.
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// An on-chain buffer is inconsistent with the record layout.
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Cryptographic mismatch: {0}")]
    CryptographicMismatch(String),

    #[error("Operation `{operation}` is not allowed in stage {stage}")]
    WorkflowState { operation: String, stage: String },

    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: u64, available: u64 },

    #[error("Transaction already committed as {0}")]
    AlreadyCommitted(H256),

    #[error("Crypto capability failed: {0}")]
    Crypto(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl VoteError {
    pub(crate) fn workflow(operation: &str, stage: impl std::fmt::Display) -> Self {
        VoteError::WorkflowState {
            operation: operation.to_string(),
            stage: stage.to_string(),
        }
    }
}

impl From<reqwest::Error> for VoteError {
    fn from(e: reqwest::Error) -> Self {
        VoteError::Network(e.to_string())
    }
}

impl From<tokio::task::JoinError> for VoteError {
    fn from(e: tokio::task::JoinError) -> Self {
        VoteError::Crypto(format!("worker task failed: {}", e))
    }
}
