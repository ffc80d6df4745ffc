//! Append-only, hash-linked ledger of blocks.
//!
//! The ledger owns transaction admission checks, block-hash computation and
//! transaction search. Blocks enter the chain through exactly two doors:
//! `append_block` (one block, link-checked against the head) and
//! `replace_chain` (wholesale swap for a strictly longer, fully re-validated
//! chain during synchronization).

use crate::crypto::{Sha256Hash, GENESIS_PREVIOUS_HASH};
use crate::error::{ChainError, Result};
use crate::merkle::MerkleTree;
use crate::persistence::{InMemoryPersistence, Persistence};
use crate::transaction::validation;
use crate::transaction::Transaction;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

/// Timestamp baked into every genesis block so that all nodes derive the
/// identical genesis hash (2024-01-01T00:00:00Z, milliseconds).
pub const GENESIS_TIMESTAMP: u64 = 1_704_067_200_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub index: u64,
    pub timestamp: u64,
    pub transactions: Vec<Transaction>,
    #[serde(with = "crate::crypto::hex_hash")]
    pub previous_hash: Sha256Hash,
    #[serde(with = "crate::crypto::hex_hash")]
    pub merkle_root: Sha256Hash,
    #[serde(with = "crate::crypto::hex_hash")]
    pub hash: Sha256Hash,
    pub nonce: u64,
}

impl Block {
    pub fn hash_str(&self) -> String {
        hex::encode(self.hash)
    }
}

/// A search hit: the transaction plus where it lives in the chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub transaction: Transaction,
    pub block_index: u64,
    #[serde(with = "crate::crypto::hex_hash")]
    pub block_hash: Sha256Hash,
}

pub struct Ledger {
    blocks: Vec<Block>,
    persistence: Box<dyn Persistence>,
}

impl Ledger {
    /// Create an empty ledger backed by in-memory persistence.
    pub fn new() -> Self {
        Self::with_persistence(Box::new(InMemoryPersistence::new()))
    }

    pub fn with_persistence(persistence: Box<dyn Persistence>) -> Self {
        Ledger {
            blocks: Vec::new(),
            persistence,
        }
    }

    /// Restore a ledger from its persistence backend, re-validating the
    /// stored chain. An empty backend yields an empty ledger.
    pub fn restore(persistence: Box<dyn Persistence>) -> Result<Self> {
        let mut ledger = Ledger {
            blocks: Vec::new(),
            persistence,
        };
        if let Some(blocks) = ledger.persistence.load_chain()? {
            Self::validate_chain(&blocks)?;
            ledger.blocks = blocks;
        }
        Ok(ledger)
    }

    /// Seed the chain with the genesis block. Fails with
    /// `AlreadyInitialized` on a non-empty chain.
    pub fn create_genesis_block(&mut self) -> Result<Block> {
        if !self.blocks.is_empty() {
            return Err(ChainError::AlreadyInitialized);
        }

        let transactions = Vec::new();
        let merkle_root = Self::calculate_merkle_root(&transactions)?;
        let hash = Self::calculate_block_hash(
            0,
            GENESIS_TIMESTAMP,
            &transactions,
            &GENESIS_PREVIOUS_HASH,
            &merkle_root,
            0,
        )?;

        let genesis = Block {
            index: 0,
            timestamp: GENESIS_TIMESTAMP,
            transactions,
            previous_hash: GENESIS_PREVIOUS_HASH,
            merkle_root,
            hash,
            nonce: 0,
        };

        self.blocks.push(genesis.clone());
        self.persist();
        info!(hash = %genesis.hash_str(), "genesis block created");
        Ok(genesis)
    }

    /// Structural admission check; semantic rules live with the submitter.
    pub fn is_valid_transaction(tx: &Transaction) -> bool {
        validation::is_valid(tx)
    }

    pub fn calculate_merkle_root(transactions: &[Transaction]) -> Result<Sha256Hash> {
        Ok(MerkleTree::build(transactions)?.root())
    }

    /// Deterministic block hash. The preimage is consensus-critical and must
    /// never change shape:
    ///
    /// `index LE || timestamp LE || tx.hash() for each tx in order ||
    ///  previous_hash || merkle_root || nonce LE`
    pub fn calculate_block_hash(
        index: u64,
        timestamp: u64,
        transactions: &[Transaction],
        previous_hash: &Sha256Hash,
        merkle_root: &Sha256Hash,
        nonce: u64,
    ) -> Result<Sha256Hash> {
        let mut hasher = Sha256::new();
        hasher.update(index.to_le_bytes());
        hasher.update(timestamp.to_le_bytes());
        for tx in transactions {
            hasher.update(tx.hash()?);
        }
        hasher.update(previous_hash);
        hasher.update(merkle_root);
        hasher.update(nonce.to_le_bytes());
        Ok(hasher.finalize().into())
    }

    /// Re-derive a block's hash from its own fields.
    pub fn block_hash_of(block: &Block) -> Result<Sha256Hash> {
        Self::calculate_block_hash(
            block.index,
            block.timestamp,
            &block.transactions,
            &block.previous_hash,
            &block.merkle_root,
            block.nonce,
        )
    }

    /// Append one block to the head. The only single-block mutation path.
    pub fn append_block(&mut self, block: Block) -> Result<()> {
        let head = self.blocks.last().ok_or_else(|| {
            ChainError::ChainLink("cannot append to an empty chain; create genesis first".to_string())
        })?;

        if block.index != head.index + 1 {
            return Err(ChainError::ChainLink(format!(
                "expected index {}, got {}",
                head.index + 1,
                block.index
            )));
        }
        if block.previous_hash != head.hash {
            return Err(ChainError::ChainLink(format!(
                "previous hash {} does not match head {}",
                hex::encode(block.previous_hash),
                head.hash_str()
            )));
        }

        Self::validate_block_content(&block)?;

        self.blocks.push(block);
        self.persist();
        Ok(())
    }

    /// Replace the whole chain with a strictly longer, fully valid one.
    pub fn replace_chain(&mut self, new_chain: Vec<Block>) -> Result<()> {
        Self::validate_chain(&new_chain)?;
        if new_chain.len() <= self.blocks.len() {
            return Err(ChainError::InvalidChain(format!(
                "candidate length {} does not exceed local length {}",
                new_chain.len(),
                self.blocks.len()
            )));
        }

        info!(
            from = self.blocks.len(),
            to = new_chain.len(),
            "replacing local chain"
        );
        self.blocks = new_chain;
        self.persist();
        Ok(())
    }

    /// Full re-validation of a candidate chain: index sequence from 0,
    /// genesis sentinel, hash links, Merkle roots, block hashes, and
    /// structural transaction validity. Trusts nothing about the source.
    pub fn validate_chain(blocks: &[Block]) -> Result<()> {
        let first = blocks
            .first()
            .ok_or_else(|| ChainError::InvalidChain("chain is empty".to_string()))?;

        if first.index != 0 {
            return Err(ChainError::InvalidChain(format!(
                "genesis index must be 0, got {}",
                first.index
            )));
        }
        if first.previous_hash != GENESIS_PREVIOUS_HASH {
            return Err(ChainError::InvalidChain(
                "genesis previous hash must be the zero sentinel".to_string(),
            ));
        }

        for (i, block) in blocks.iter().enumerate() {
            if block.index != i as u64 {
                return Err(ChainError::InvalidChain(format!(
                    "index gap at position {}: found {}",
                    i, block.index
                )));
            }
            if i > 0 && block.previous_hash != blocks[i - 1].hash {
                return Err(ChainError::InvalidChain(format!(
                    "broken hash link at index {}",
                    block.index
                )));
            }
            Self::validate_block_content(block)?;
        }

        Ok(())
    }

    /// Re-derive a single block's commitments (no link checks).
    fn validate_block_content(block: &Block) -> Result<()> {
        for tx in &block.transactions {
            validation::validate_structure(tx)?;
        }

        let merkle_root = Self::calculate_merkle_root(&block.transactions)?;
        if merkle_root != block.merkle_root {
            return Err(ChainError::InvalidChain(format!(
                "merkle root mismatch at index {}: expected {}, got {}",
                block.index,
                hex::encode(merkle_root),
                hex::encode(block.merkle_root)
            )));
        }

        let hash = Self::block_hash_of(block)?;
        if hash != block.hash {
            return Err(ChainError::InvalidChain(format!(
                "block hash mismatch at index {}",
                block.index
            )));
        }

        Ok(())
    }

    /// Linear scan with a caller-supplied filter; read-only.
    pub fn search_transactions<F>(&self, predicate: F) -> Vec<TransactionRecord>
    where
        F: Fn(&Transaction) -> bool,
    {
        let mut hits = Vec::new();
        for block in &self.blocks {
            for tx in &block.transactions {
                if predicate(tx) {
                    hits.push(TransactionRecord {
                        transaction: tx.clone(),
                        block_index: block.index,
                        block_hash: block.hash,
                    });
                }
            }
        }
        hits
    }

    pub fn latest_block(&self) -> Option<&Block> {
        self.blocks.last()
    }

    pub fn chain_length(&self) -> usize {
        self.blocks.len()
    }

    pub fn total_transactions(&self) -> usize {
        self.blocks.iter().map(|b| b.transactions.len()).sum()
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    fn persist(&self) {
        if let Err(err) = self.persistence.save_chain(&self.blocks) {
            warn!(%err, "failed to persist chain snapshot");
        }
    }
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::TxPayload;

    fn tx(from: &str, to: &str) -> Transaction {
        Transaction::new(
            from.to_string(),
            to.to_string(),
            TxPayload::AuditEntry {
                actor: from.to_string(),
                action: "read".to_string(),
                resource: "chart-7".to_string(),
            },
        )
    }

    fn next_block(ledger: &Ledger, transactions: Vec<Transaction>) -> Block {
        let head = ledger.latest_block().expect("chain has a head");
        let index = head.index + 1;
        let timestamp = head.timestamp + 1_000;
        let merkle_root = Ledger::calculate_merkle_root(&transactions).unwrap();
        let hash = Ledger::calculate_block_hash(
            index,
            timestamp,
            &transactions,
            &head.hash,
            &merkle_root,
            0,
        )
        .unwrap();
        Block {
            index,
            timestamp,
            transactions,
            previous_hash: head.hash,
            merkle_root,
            hash,
            nonce: 0,
        }
    }

    #[test]
    fn test_genesis_only_on_empty_chain() {
        let mut ledger = Ledger::new();
        let genesis = ledger.create_genesis_block().unwrap();
        assert_eq!(genesis.index, 0);
        assert_eq!(genesis.previous_hash, GENESIS_PREVIOUS_HASH);
        assert!(genesis.transactions.is_empty());

        assert!(matches!(
            ledger.create_genesis_block(),
            Err(ChainError::AlreadyInitialized)
        ));
    }

    #[test]
    fn test_block_hash_round_trips_from_own_fields() {
        let mut ledger = Ledger::new();
        ledger.create_genesis_block().unwrap();
        let block = next_block(&ledger, vec![tx("a", "b"), tx("c", "d")]);

        assert_eq!(Ledger::block_hash_of(&block).unwrap(), block.hash);
        assert_eq!(
            Ledger::calculate_merkle_root(&block.transactions).unwrap(),
            block.merkle_root
        );
    }

    #[test]
    fn test_append_rejects_previous_hash_mismatch() {
        let mut ledger = Ledger::new();
        ledger.create_genesis_block().unwrap();

        let mut block = next_block(&ledger, vec![tx("a", "b")]);
        // Internally consistent block pointing at the wrong predecessor.
        block.previous_hash = crate::crypto::sha256(b"someone else's head");
        block.hash = Ledger::block_hash_of(&block).unwrap();

        assert!(matches!(
            ledger.append_block(block),
            Err(ChainError::ChainLink(_))
        ));
        assert_eq!(ledger.chain_length(), 1);
    }

    #[test]
    fn test_append_rejects_index_gap() {
        let mut ledger = Ledger::new();
        ledger.create_genesis_block().unwrap();

        let mut block = next_block(&ledger, vec![tx("a", "b")]);
        block.index += 1;
        block.hash = Ledger::block_hash_of(&block).unwrap();

        assert!(matches!(
            ledger.append_block(block),
            Err(ChainError::ChainLink(_))
        ));
    }

    #[test]
    fn test_append_rejects_tampered_merkle_root() {
        let mut ledger = Ledger::new();
        ledger.create_genesis_block().unwrap();

        let mut block = next_block(&ledger, vec![tx("a", "b")]);
        block.merkle_root = crate::crypto::sha256(b"tampered");
        block.hash = Ledger::block_hash_of(&block).unwrap();

        assert!(ledger.append_block(block).is_err());
    }

    #[test]
    fn test_append_extends_chain() {
        let mut ledger = Ledger::new();
        ledger.create_genesis_block().unwrap();
        let block = next_block(&ledger, vec![tx("a", "b"), tx("c", "d")]);

        ledger.append_block(block).unwrap();
        assert_eq!(ledger.chain_length(), 2);
        assert_eq!(ledger.total_transactions(), 2);
    }

    #[test]
    fn test_replace_chain_requires_strictly_longer() {
        let mut ledger = Ledger::new();
        ledger.create_genesis_block().unwrap();
        ledger
            .append_block(next_block(&ledger, vec![tx("a", "b")]))
            .unwrap();

        // Same-length valid chain: local wins the tie.
        let same_length = ledger.blocks().to_vec();
        assert!(ledger.replace_chain(same_length).is_err());
        assert_eq!(ledger.chain_length(), 2);
    }

    #[test]
    fn test_replace_chain_adopts_longer_valid_chain() {
        let mut local = Ledger::new();
        local.create_genesis_block().unwrap();

        let mut remote = Ledger::new();
        remote.create_genesis_block().unwrap();
        remote
            .append_block(next_block(&remote, vec![tx("a", "b")]))
            .unwrap();
        remote
            .append_block(next_block(&remote, vec![tx("c", "d")]))
            .unwrap();

        local.replace_chain(remote.blocks().to_vec()).unwrap();
        assert_eq!(local.chain_length(), 3);
    }

    #[test]
    fn test_replace_chain_rejects_corrupted_chain() {
        let mut local = Ledger::new();
        local.create_genesis_block().unwrap();

        let mut remote = Ledger::new();
        remote.create_genesis_block().unwrap();
        remote
            .append_block(next_block(&remote, vec![tx("a", "b")]))
            .unwrap();
        remote
            .append_block(next_block(&remote, vec![tx("c", "d")]))
            .unwrap();

        let mut corrupted = remote.blocks().to_vec();
        // Flip one transaction without re-sealing the block.
        corrupted[1].transactions[0].to = "attacker".to_string();

        assert!(matches!(
            local.replace_chain(corrupted),
            Err(ChainError::InvalidChain(_))
        ));
        assert_eq!(local.chain_length(), 1);
    }

    #[test]
    fn test_search_transactions_reports_location() {
        let mut ledger = Ledger::new();
        ledger.create_genesis_block().unwrap();
        ledger
            .append_block(next_block(&ledger, vec![tx("clinic-a", "registry")]))
            .unwrap();
        ledger
            .append_block(next_block(&ledger, vec![tx("clinic-b", "registry")]))
            .unwrap();

        let hits = ledger.search_transactions(|tx| tx.from == "clinic-b");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].block_index, 2);
        assert_eq!(hits[0].block_hash, ledger.latest_block().unwrap().hash);

        let all = ledger.search_transactions(|tx| tx.to == "registry");
        assert_eq!(all.len(), 2);
    }
}
