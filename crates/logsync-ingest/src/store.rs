//! Durable event and checkpoint storage on sled
//!
//! Events live in the default tree under `<sequence>-<log index>` keys.
//! Scan checkpoints live in their own tree, keyed by contract and topic, so
//! they never collide with event keys.

use std::path::Path;

use alloy_primitives::{Address, B256};
use logsync_core::{Error, EventKey, EventRecord, Result};
use serde::{Deserialize, Serialize};

const CHECKPOINT_TREE: &[u8] = b"scan_checkpoints";

/// Key-value persistence of encoded event records
pub trait EventStore: Send + Sync {
    /// Write `record` under `key`, replacing any previous value
    fn put(&self, key: &EventKey, record: &EventRecord) -> Result<()>;

    /// Read the record under `key`; [`Error::RecordNotFound`] if absent
    fn get(&self, key: &EventKey) -> Result<EventRecord>;
}

/// Where a scan left off, saved after every completed chunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanCheckpoint {
    pub contract: Address,
    pub topic: B256,
    pub deployment_block: u64,
    /// First block not yet scanned
    pub next_block: u64,
    /// Sequence number the next stored event gets
    pub next_sequence: u64,
}

pub trait CheckpointStore: Send + Sync {
    fn load_checkpoint(&self, contract: Address, topic: B256) -> Result<Option<ScanCheckpoint>>;

    fn save_checkpoint(&self, checkpoint: &ScanCheckpoint) -> Result<()>;

    fn clear_checkpoint(&self, contract: Address, topic: B256) -> Result<()>;
}

fn checkpoint_key(contract: Address, topic: B256) -> String {
    format!("{contract:#x}/{topic:#x}")
}

fn storage_err(e: sled::Error) -> Error {
    Error::Storage(e.to_string())
}

/// sled-backed [`EventStore`] and [`CheckpointStore`]
#[derive(Clone)]
pub struct SledStore {
    db: sled::Db,
    checkpoints: sled::Tree,
}

impl SledStore {
    /// Open or create the database at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let db = sled::open(path)
            .map_err(|e| Error::Construction(format!("failed to open store at {}: {e}", path.display())))?;
        let checkpoints = db
            .open_tree(CHECKPOINT_TREE)
            .map_err(|e| Error::Construction(format!("failed to open checkpoint tree: {e}")))?;
        Ok(Self { db, checkpoints })
    }

    /// Number of stored events
    pub fn len(&self) -> usize {
        self.db.len()
    }

    pub fn is_empty(&self) -> bool {
        self.db.is_empty()
    }

    /// Block until all writes are on disk
    pub fn flush(&self) -> Result<()> {
        self.db.flush().map_err(storage_err)?;
        self.checkpoints.flush().map_err(storage_err)?;
        Ok(())
    }
}

impl EventStore for SledStore {
    fn put(&self, key: &EventKey, record: &EventRecord) -> Result<()> {
        let bytes = record.encode()?;
        self.db.insert(key.to_bytes(), bytes).map_err(storage_err)?;
        Ok(())
    }

    fn get(&self, key: &EventKey) -> Result<EventRecord> {
        match self.db.get(key.to_bytes()).map_err(storage_err)? {
            Some(bytes) => EventRecord::decode(&bytes),
            None => Err(Error::RecordNotFound(*key)),
        }
    }
}

impl CheckpointStore for SledStore {
    fn load_checkpoint(&self, contract: Address, topic: B256) -> Result<Option<ScanCheckpoint>> {
        let Some(bytes) = self
            .checkpoints
            .get(checkpoint_key(contract, topic))
            .map_err(storage_err)?
        else {
            return Ok(None);
        };
        let checkpoint = bincode::deserialize(&bytes)
            .map_err(|e| Error::serialization("scan checkpoint", e))?;
        Ok(Some(checkpoint))
    }

    fn save_checkpoint(&self, checkpoint: &ScanCheckpoint) -> Result<()> {
        let bytes = bincode::serialize(checkpoint)
            .map_err(|e| Error::serialization("scan checkpoint", e))?;
        self.checkpoints
            .insert(checkpoint_key(checkpoint.contract, checkpoint.topic), bytes)
            .map_err(storage_err)?;
        Ok(())
    }

    fn clear_checkpoint(&self, contract: Address, topic: B256) -> Result<()> {
        self.checkpoints
            .remove(checkpoint_key(contract, topic))
            .map_err(storage_err)?;
        Ok(())
    }
}
