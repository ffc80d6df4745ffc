//! Merkle tree integrity layer.
//!
//! A binary SHA-256 hash tree over an ordered list of records. The tree is
//! used standalone for record verification and by the ledger to commit each
//! block's transaction set.
//!
//! Odd-node rule: when a level has odd cardinality, the trailing node is
//! paired with itself. The proof path reproduces the identical rule, so
//! proofs for the duplicated leaf fold back to the same root. Changing one
//! side without the other silently breaks verification, which is why the
//! tests pin sizes 1, 2, 3, 5 and 8.

use crate::crypto::{self, empty_hash, hash_pair, Sha256Hash};
use crate::error::{ChainError, Result};
use serde::{Deserialize, Serialize};

/// One level of a proof path: the sibling digest and which side it sits on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProofStep {
    #[serde(with = "crate::crypto::hex_hash")]
    pub sibling: Sha256Hash,
    pub sibling_on_left: bool,
}

/// Self-contained inclusion proof, verifiable without the original tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MerkleProof {
    #[serde(with = "crate::crypto::hex_hash")]
    pub leaf: Sha256Hash,
    pub path: Vec<ProofStep>,
    #[serde(with = "crate::crypto::hex_hash")]
    pub root: Sha256Hash,
}

/// One entry of a batch verification request.
pub struct BatchEntry<'a, T> {
    pub record: &'a T,
    pub proof: &'a MerkleProof,
    pub root: Sha256Hash,
}

/// Immutable hash tree built from a snapshot of records.
#[derive(Debug, Clone)]
pub struct MerkleTree {
    leaves: Vec<Sha256Hash>,
    /// Bottom-up hash layers; `levels[0]` is the leaf layer, the last level
    /// holds exactly the root. Empty for a zero-record tree.
    levels: Vec<Vec<Sha256Hash>>,
    root: Sha256Hash,
}

impl MerkleTree {
    /// Build a tree over the canonical encodings of `records`, preserving
    /// insertion order. Zero records is allowed and yields `root = H("")`;
    /// only proof derivation fails on such a tree.
    pub fn build<T: Serialize>(records: &[T]) -> Result<Self> {
        let mut leaves = Vec::with_capacity(records.len());
        for record in records {
            leaves.push(crypto::hash_record(record)?);
        }

        if leaves.is_empty() {
            return Ok(MerkleTree {
                leaves,
                levels: Vec::new(),
                root: empty_hash(),
            });
        }

        let mut levels = Vec::new();
        let mut current = leaves.clone();
        levels.push(current.clone());

        while current.len() > 1 {
            let mut next = Vec::with_capacity(current.len().div_ceil(2));
            for pair in current.chunks(2) {
                let left = pair[0];
                // Unpaired trailing node is combined with itself.
                let right = if pair.len() == 2 { pair[1] } else { pair[0] };
                next.push(hash_pair(&left, &right));
            }
            levels.push(next.clone());
            current = next;
        }

        let root = current[0];
        Ok(MerkleTree {
            leaves,
            levels,
            root,
        })
    }

    pub fn root(&self) -> Sha256Hash {
        self.root
    }

    pub fn root_str(&self) -> String {
        hex::encode(self.root)
    }

    pub fn leaf_count(&self) -> usize {
        self.leaves.len()
    }

    /// Derive an inclusion proof for `record`, located by exact hash match of
    /// its canonical encoding.
    pub fn proof<T: Serialize>(&self, record: &T) -> Result<MerkleProof> {
        if self.leaves.is_empty() {
            return Err(ChainError::EmptyTree);
        }

        let leaf = crypto::hash_record(record)?;
        let mut index = self
            .leaves
            .iter()
            .position(|candidate| *candidate == leaf)
            .ok_or(ChainError::RecordNotFound)?;

        let mut path = Vec::with_capacity(self.levels.len().saturating_sub(1));
        for level in &self.levels[..self.levels.len() - 1] {
            let step = if index % 2 == 0 {
                // Last unpaired node at a level is its own sibling.
                let sibling = if index + 1 < level.len() {
                    level[index + 1]
                } else {
                    level[index]
                };
                ProofStep {
                    sibling,
                    sibling_on_left: false,
                }
            } else {
                ProofStep {
                    sibling: level[index - 1],
                    sibling_on_left: true,
                }
            };
            path.push(step);
            index /= 2;
        }

        Ok(MerkleProof {
            leaf,
            path,
            root: self.root,
        })
    }

    /// Predicate: does `proof` bind `record` to `expected_root` (or to the
    /// proof's own embedded root when none is given)? Never errors;
    /// structurally invalid proofs simply verify false.
    pub fn verify<T: Serialize>(
        record: &T,
        proof: &MerkleProof,
        expected_root: Option<&Sha256Hash>,
    ) -> bool {
        let leaf = match crypto::hash_record(record) {
            Ok(hash) => hash,
            Err(_) => return false,
        };
        if leaf != proof.leaf {
            return false;
        }

        let mut current = leaf;
        for step in &proof.path {
            current = if step.sibling_on_left {
                hash_pair(&step.sibling, &current)
            } else {
                hash_pair(&current, &step.sibling)
            };
        }

        current == *expected_root.unwrap_or(&proof.root)
    }

    /// True iff every entry verifies. An empty batch is invalid, not
    /// vacuously true; a zero-proof "verified" batch must never happen by
    /// accident.
    pub fn verify_batch<T: Serialize>(entries: &[BatchEntry<'_, T>]) -> bool {
        if entries.is_empty() {
            return false;
        }
        entries
            .iter()
            .all(|entry| Self::verify(entry.record, entry.proof, Some(&entry.root)))
    }
}
