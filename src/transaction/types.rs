/// Transaction types for ConsentChain
use crate::crypto::{self, Sha256Hash};
use crate::error::Result;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Structured transaction payload.
///
/// Each variant canonical-encodes through the shared stable-key JSON writer,
/// so leaf hashes are identical across nodes regardless of how the payload
/// was assembled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TxPayload {
    /// A subject granting or revoking access to a data scope.
    ConsentChange {
        subject: String,
        scope: String,
        granted: bool,
    },
    /// An audit-trail entry recording who did what to which resource.
    AuditEntry {
        actor: String,
        action: String,
        resource: String,
    },
    /// Anchors an external Merkle root (hex digest) into the chain.
    MerkleAnchor { root: String, record_count: u64 },
    /// Escape hatch for payloads no dedicated variant covers yet.
    Generic { value: serde_json::Value },
}

/// An admitted ledger record. Immutable once included in a block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub from: String,
    pub to: String,
    pub data: TxPayload,
    pub timestamp: u64,
}

impl Transaction {
    /// Create a transaction with a random id and the current wall-clock
    /// timestamp (milliseconds).
    pub fn new(from: String, to: String, data: TxPayload) -> Self {
        let id_bytes: [u8; 16] = rand::thread_rng().gen();
        Transaction {
            id: hex::encode(id_bytes),
            from,
            to,
            data,
            timestamp: chrono::Utc::now().timestamp_millis() as u64,
        }
    }

    /// SHA-256 over the canonical encoding of the whole transaction.
    pub fn hash(&self) -> Result<Sha256Hash> {
        crypto::hash_record(self)
    }

    pub fn hash_str(&self) -> Result<String> {
        Ok(hex::encode(self.hash()?))
    }
}
