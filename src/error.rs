//! Error types for ConsentChain

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ChainError {
    #[error("Merkle tree is empty; no proofs can be derived")]
    EmptyTree,
    #[error("Record not found in Merkle tree")]
    RecordNotFound,
    #[error("Ledger already holds a genesis block")]
    AlreadyInitialized,
    #[error("Chain link error: {0}")]
    ChainLink(String),
    #[error("Invalid chain: {0}")]
    InvalidChain(String),
    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),
    #[error("Invalid transaction batch: {0}")]
    InvalidTransactionBatch(String),
    #[error("No pending proposal for block {0}")]
    ProposalNotFound(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("IO error: {0}")]
    Io(String),
    #[error("Internal invariant violated: {0}")]
    Internal(String),
}

impl From<std::io::Error> for ChainError {
    fn from(err: std::io::Error) -> Self {
        ChainError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for ChainError {
    fn from(err: serde_json::Error) -> Self {
        ChainError::Serialization(err.to_string())
    }
}

/// Convenience alias used across the crate
pub type Result<T> = std::result::Result<T, ChainError>;
