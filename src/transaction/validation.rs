//! Structural admission checks for transactions.
//!
//! Only shape is checked here: required fields present, endpoints non-empty,
//! anchor digests well-formed. Semantic rules (consent policy, authorization)
//! belong to the collaborators that submit transactions.

use crate::error::{ChainError, Result};
use crate::transaction::types::{Transaction, TxPayload};

pub fn validate_structure(tx: &Transaction) -> Result<()> {
    if tx.id.trim().is_empty() {
        return Err(ChainError::InvalidTransaction(
            "transaction id must not be empty".to_string(),
        ));
    }
    if tx.from.trim().is_empty() {
        return Err(ChainError::InvalidTransaction(
            "sender (from) must not be empty".to_string(),
        ));
    }
    if tx.to.trim().is_empty() {
        return Err(ChainError::InvalidTransaction(
            "recipient (to) must not be empty".to_string(),
        ));
    }

    if let TxPayload::MerkleAnchor { root, .. } = &tx.data {
        let decoded = hex::decode(root)
            .map_err(|_| ChainError::InvalidTransaction("anchor root is not hex".to_string()))?;
        if decoded.len() != 32 {
            return Err(ChainError::InvalidTransaction(format!(
                "anchor root must be a 32-byte digest, got {} bytes",
                decoded.len()
            )));
        }
    }

    Ok(())
}

pub fn is_valid(tx: &Transaction) -> bool {
    validate_structure(tx).is_ok()
}
