//! In-memory chain for tests
//!
//! Blocks are synthetic: block `n` has timestamp `GENESIS_TIMESTAMP + 12n`
//! and a hash derived from `n`, so parent hashes can be predicted.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Address, Bytes, B256};
use async_trait::async_trait;
use logsync_core::{BlockSummary, Error, LogFilter, RawLog, Result};

use crate::rpc::ChainRpc;

pub const GENESIS_TIMESTAMP: u64 = 1_700_000_000;
const BLOCK_TIME_SECS: u64 = 12;

/// Scriptable [`ChainRpc`] with injectable latency and failures
pub struct MockChain {
    url: String,
    head: AtomicU64,
    contract: Option<(Address, u64)>,
    logs: Vec<RawLog>,
    latency: Duration,
    failing: AtomicBool,
    calls: AtomicUsize,
    code_calls: AtomicUsize,
}

impl MockChain {
    pub fn new(url: impl Into<String>, head: u64) -> Self {
        Self {
            url: url.into(),
            head: AtomicU64::new(head),
            contract: None,
            logs: Vec::new(),
            latency: Duration::ZERO,
            failing: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
            code_calls: AtomicUsize::new(0),
        }
    }

    pub fn shared(url: impl Into<String>, head: u64) -> Arc<Self> {
        Arc::new(Self::new(url, head))
    }

    /// Contract code exists at `address` from `block` onwards
    pub fn with_contract(mut self, address: Address, block: u64) -> Self {
        self.contract = Some((address, block));
        self
    }

    pub fn with_log(mut self, log: RawLog) -> Self {
        self.logs.push(log);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn failing(self) -> Self {
        self.failing.store(true, Ordering::SeqCst);
        self
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_head(&self, head: u64) {
        self.head.store(head, Ordering::SeqCst);
    }

    /// Calls received, failed ones included
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn code_calls(&self) -> usize {
        self.code_calls.load(Ordering::SeqCst)
    }

    pub fn block_hash(number: u64) -> B256 {
        B256::left_padding_from(&(number + 1).to_be_bytes())
    }

    pub fn block_timestamp(number: u64) -> u64 {
        GENESIS_TIMESTAMP + number * BLOCK_TIME_SECS
    }

    /// A log with `topic` as topic0
    pub fn log(address: Address, topic: B256, block: u64, log_index: u64, data: &[u8]) -> RawLog {
        RawLog {
            address,
            topics: vec![topic],
            data: Bytes::copy_from_slice(data),
            block_number: block,
            log_index,
            tx_hash: Some(B256::left_padding_from(&(block * 1_000 + log_index).to_be_bytes())),
        }
    }

    async fn enter(&self, method: &'static str) -> Result<u64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::EndpointUnavailable {
                url: self.url.clone(),
                method,
                reason: "mock endpoint is down".into(),
            });
        }
        Ok(self.head.load(Ordering::SeqCst))
    }
}

#[async_trait]
impl ChainRpc for MockChain {
    fn url(&self) -> &str {
        &self.url
    }

    async fn chain_head(&self) -> Result<u64> {
        self.enter("eth_blockNumber").await
    }

    async fn code_at(&self, address: Address, block: u64) -> Result<Bytes> {
        self.code_calls.fetch_add(1, Ordering::SeqCst);
        let head = self.enter("eth_getCode").await?;
        let deployed = matches!(
            self.contract,
            Some((contract, from)) if contract == address && block >= from && block <= head
        );
        Ok(if deployed {
            Bytes::from_static(&[0x60, 0x80, 0x60, 0x40])
        } else {
            Bytes::new()
        })
    }

    async fn filter_logs(&self, filter: &LogFilter) -> Result<Vec<RawLog>> {
        let head = self.enter("eth_getLogs").await?;
        let mut logs: Vec<RawLog> = self
            .logs
            .iter()
            .filter(|log| log.block_number <= head && filter.matches(log))
            .cloned()
            .collect();
        logs.sort_by_key(|log| (log.block_number, log.log_index));
        Ok(logs)
    }

    async fn block_by_number(&self, number: u64) -> Result<BlockSummary> {
        let head = self.enter("eth_getBlockByNumber").await?;
        if number > head {
            return Err(Error::EndpointUnavailable {
                url: self.url.clone(),
                method: "eth_getBlockByNumber",
                reason: format!("block {number} not found"),
            });
        }
        Ok(BlockSummary {
            number,
            timestamp: Self::block_timestamp(number),
            parent_hash: if number == 0 {
                B256::ZERO
            } else {
                Self::block_hash(number - 1)
            },
        })
    }
}
