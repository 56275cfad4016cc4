//! Persisted event record and its storage key
//!
//! Records are written as one format-version byte followed by a bincode
//! payload, so the layout can change without misreading old databases.

use std::fmt;
use std::str::FromStr;

use alloy_primitives::B256;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Current on-disk record layout
pub const RECORD_FORMAT_VERSION: u8 = 1;

/// Normalized unit written once per matching log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Raw log data, lowercase hex with 0x prefix
    pub topic_payload_hex: String,
    /// Timestamp of the block containing the log (unix seconds)
    pub block_timestamp: u64,
    /// Hash of the block preceding the one containing the log
    pub parent_block_hash: String,
}

impl EventRecord {
    pub fn new(data: &[u8], block_timestamp: u64, parent_hash: B256) -> Self {
        Self {
            topic_payload_hex: format!("0x{}", hex::encode(data)),
            block_timestamp,
            parent_block_hash: format!("0x{}", hex::encode(parent_hash.as_slice())),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let payload = bincode::serialize(self)
            .map_err(|e| Error::serialization("event record encode", e))?;
        let mut out = Vec::with_capacity(payload.len() + 1);
        out.push(RECORD_FORMAT_VERSION);
        out.extend_from_slice(&payload);
        Ok(out)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let (&version, payload) = bytes
            .split_first()
            .ok_or_else(|| Error::serialization("event record decode", "empty value"))?;
        if version != RECORD_FORMAT_VERSION {
            return Err(Error::UnsupportedRecordVersion {
                found: version,
                expected: RECORD_FORMAT_VERSION,
            });
        }
        bincode::deserialize(payload).map_err(|e| Error::serialization("event record decode", e))
    }
}

/// Composite key `<sequence>-<log_index>`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventKey {
    /// Run-wide counter, one per processed log
    pub sequence: u64,
    /// Index of the log within its block
    pub log_index: u64,
}

impl EventKey {
    pub fn new(sequence: u64, log_index: u64) -> Self {
        Self {
            sequence,
            log_index,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.sequence, self.log_index)
    }
}

impl FromStr for EventKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidConfig(format!("event key must look like 12-3, got {s:?}"));
        let (sequence, log_index) = s.split_once('-').ok_or_else(invalid)?;
        Ok(Self {
            sequence: sequence.parse().map_err(|_| invalid())?,
            log_index: log_index.parse().map_err(|_| invalid())?,
        })
    }
}
