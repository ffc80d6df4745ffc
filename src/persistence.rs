//! Persistence layer for ConsentChain.
//!
//! The chain is small enough to snapshot whole; blocks serialize as canonical
//! JSON with hex digests and round-trip through the block-hash computation
//! unchanged.

use crate::error::{ChainError, Result};
use crate::ledger::Block;
use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};

/// Abstraction for persistence backends. Implementations must save and load
/// the full chain atomically.
pub trait Persistence: Send + Sync {
    fn save_chain(&self, blocks: &[Block]) -> Result<()>;
    fn load_chain(&self) -> Result<Option<Vec<Block>>>;
}

/// Keeps the snapshot in memory; the default backend and the one tests use.
pub struct InMemoryPersistence {
    chain: Mutex<Option<Vec<Block>>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        InMemoryPersistence {
            chain: Mutex::new(None),
        }
    }
}

impl Default for InMemoryPersistence {
    fn default() -> Self {
        Self::new()
    }
}

impl Persistence for InMemoryPersistence {
    fn save_chain(&self, blocks: &[Block]) -> Result<()> {
        *self.chain.lock() = Some(blocks.to_vec());
        Ok(())
    }

    fn load_chain(&self) -> Result<Option<Vec<Block>>> {
        Ok(self.chain.lock().clone())
    }
}

/// Durable JSON snapshot on disk. Writes go through a sibling temp file and
/// an atomic rename so a crash never leaves a torn snapshot.
pub struct JsonFilePersistence {
    path: PathBuf,
}

impl JsonFilePersistence {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        Ok(JsonFilePersistence { path })
    }
}

impl Persistence for JsonFilePersistence {
    fn save_chain(&self, blocks: &[Block]) -> Result<()> {
        let encoded = serde_json::to_vec_pretty(blocks)?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, encoded)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn load_chain(&self) -> Result<Option<Vec<Block>>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&self.path)?;
        let blocks: Vec<Block> = serde_json::from_slice(&bytes)
            .map_err(|e| ChainError::Serialization(format!("corrupt chain snapshot: {}", e)))?;
        Ok(Some(blocks))
    }
}
