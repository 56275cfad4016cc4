//! Transport-neutral shapes of the chain data the pipeline consumes

use alloy_primitives::{Address, Bytes, B256};
use serde::{Deserialize, Serialize};

use crate::range::ScanRange;

/// A log entry as returned by a log filter query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub block_number: u64,
    /// Position of the log within its block
    pub log_index: u64,
    pub tx_hash: Option<B256>,
}

/// The parts of a block header the pipeline keeps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSummary {
    pub number: u64,
    pub timestamp: u64,
    pub parent_hash: B256,
}

/// Address + topic0 + block range log query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogFilter {
    pub address: Address,
    pub topic: B256,
    pub range: ScanRange,
}

impl LogFilter {
    pub fn new(address: Address, topic: B256, range: ScanRange) -> Self {
        Self {
            address,
            topic,
            range,
        }
    }

    pub fn matches(&self, log: &RawLog) -> bool {
        log.address == self.address
            && log.topics.first() == Some(&self.topic)
            && self.range.contains(log.block_number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log(address: Address, topic: B256, block: u64) -> RawLog {
        RawLog {
            address,
            topics: vec![topic, B256::repeat_byte(0xee)],
            data: Bytes::from_static(&[1, 2, 3]),
            block_number: block,
            log_index: 0,
            tx_hash: None,
        }
    }

    #[test]
    fn test_filter_matches_address_topic0_and_range() {
        let address = Address::repeat_byte(0x11);
        let topic = B256::repeat_byte(0x22);
        let filter = LogFilter::new(address, topic, ScanRange::new(10, 20));

        assert!(filter.matches(&log(address, topic, 10)));
        assert!(filter.matches(&log(address, topic, 20)));
        assert!(!filter.matches(&log(address, topic, 21)));
        assert!(!filter.matches(&log(Address::repeat_byte(0x12), topic, 15)));
        // only topic0 is filtered on
        assert!(!filter.matches(&log(address, B256::repeat_byte(0xee), 15)));
    }
}
