//! Chunked log scan from the deployment block to the chain head
//!
//! Each chunk is one `eth_getLogs` query. The distinct blocks that carry
//! matching logs are fetched concurrently, then every log is written in
//! query order under `<sequence>-<log index>`. The checkpoint is saved
//! after each chunk, so a stopped scan resumes at the first unfinished
//! chunk with the same sequence numbering.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use alloy_primitives::{Address, B256};
use logsync_core::{
    plan_chunks, BlockSummary, Error, EventKey, EventRecord, LogFilter, RawLog, Result, ScanRange,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::balancer::LoadBalancer;
use crate::metrics;
use crate::store::{CheckpointStore, EventStore, ScanCheckpoint};

/// Outcome of one scan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub deployment_block: u64,
    /// Chain head the scan ran up to
    pub head: u64,
    pub chunks: u64,
    pub events_stored: u64,
    /// Where the next scan would start
    pub next_block: u64,
    pub next_sequence: u64,
}

async fn until_cancelled<T>(
    cancel: &CancellationToken,
    work: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        result = work => result,
    }
}

pub struct LogScanner<S> {
    balancer: Arc<LoadBalancer>,
    store: Arc<S>,
    contract: Address,
    topic: B256,
    chunk_width: u64,
}

impl<S> LogScanner<S>
where
    S: EventStore + CheckpointStore,
{
    pub fn new(
        balancer: Arc<LoadBalancer>,
        store: Arc<S>,
        contract: Address,
        topic: B256,
        chunk_width: u64,
    ) -> Self {
        Self {
            balancer,
            store,
            contract,
            topic,
            chunk_width: chunk_width.max(1),
        }
    }

    /// Checkpoint for a scan that has not stored anything yet
    pub fn fresh_checkpoint(&self, deployment_block: u64) -> ScanCheckpoint {
        ScanCheckpoint {
            contract: self.contract,
            topic: self.topic,
            deployment_block,
            next_block: deployment_block,
            next_sequence: 0,
        }
    }

    /// Scan from `checkpoint` up to the current head
    ///
    /// Any RPC or storage failure aborts the scan; chunks finished before it
    /// stay stored and checkpointed.
    pub async fn scan(
        &self,
        mut checkpoint: ScanCheckpoint,
        cancel: &CancellationToken,
    ) -> Result<ScanSummary> {
        let head = until_cancelled(cancel, self.balancer.chain_head()).await?;
        info!(
            contract = %self.contract,
            from = checkpoint.next_block,
            head,
            sequence = checkpoint.next_sequence,
            "Starting log scan"
        );

        let mut summary = ScanSummary {
            deployment_block: checkpoint.deployment_block,
            head,
            ..Default::default()
        };

        for range in plan_chunks(checkpoint.next_block, head, self.chunk_width) {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let stored = until_cancelled(cancel, self.scan_chunk(range, checkpoint.next_sequence)).await?;

            checkpoint.next_sequence += stored;
            checkpoint.next_block = range.to + 1;
            self.store.save_checkpoint(&checkpoint)?;

            summary.chunks += 1;
            summary.events_stored += stored;
            metrics::set_scan_block(range.to);
        }

        summary.next_block = checkpoint.next_block;
        summary.next_sequence = checkpoint.next_sequence;
        info!(
            chunks = summary.chunks,
            events = summary.events_stored,
            next_block = summary.next_block,
            "Log scan complete"
        );
        Ok(summary)
    }

    /// Store every matching log in `range`; returns how many were stored
    async fn scan_chunk(&self, range: ScanRange, first_sequence: u64) -> Result<u64> {
        let filter = LogFilter::new(self.contract, self.topic, range);
        let logs = self.balancer.filter_logs(&filter).await?;
        info!(range = %range, logs = logs.len(), "Queried logs");
        if logs.is_empty() {
            return Ok(0);
        }

        let blocks = self.fetch_log_blocks(&logs).await?;

        let mut sequence = first_sequence;
        for log in &logs {
            let block = blocks.get(&log.block_number).ok_or_else(|| {
                Error::Storage(format!("block {} missing from fetched batch", log.block_number))
            })?;
            let record = EventRecord::new(&log.data, block.timestamp, block.parent_hash);
            let key = EventKey::new(sequence, log.log_index);
            self.store.put(&key, &record)?;
            debug!(
                key = %key,
                block = log.block_number,
                tx = ?log.tx_hash,
                "Stored event"
            );
            sequence += 1;
        }

        let stored = sequence - first_sequence;
        metrics::record_events_stored(stored);
        Ok(stored)
    }

    async fn fetch_log_blocks(
        &self,
        logs: &[RawLog],
    ) -> Result<HashMap<u64, BlockSummary>> {
        let mut numbers: Vec<u64> = logs.iter().map(|log| log.block_number).collect();
        numbers.sort_unstable();
        numbers.dedup();

        let blocks = self.balancer.fetch_blocks(&numbers).await?;
        Ok(numbers.into_iter().zip(blocks).collect())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::balancer::BalancerSettings;
    use crate::mock::MockChain;
    use crate::rpc::ChainRpc;
    use crate::store::SledStore;

    const CONTRACT: Address = Address::new([0x42; 20]);
    const TOPIC: B256 = B256::new([0x01; 32]);

    fn scanner<S: EventStore + CheckpointStore>(
        mock: Arc<MockChain>,
        store: Arc<S>,
        width: u64,
    ) -> LogScanner<S> {
        let balancer = LoadBalancer::new(vec![mock as Arc<dyn ChainRpc>], BalancerSettings::default())
            .unwrap();
        LogScanner::new(Arc::new(balancer), store, CONTRACT, TOPIC, width)
    }

    /// Sled store whose `fail_on`-th put fails once
    struct FlakyStore {
        inner: SledStore,
        fail_on: usize,
        puts: AtomicUsize,
    }

    impl EventStore for FlakyStore {
        fn put(&self, key: &EventKey, record: &EventRecord) -> Result<()> {
            if self.puts.fetch_add(1, Ordering::SeqCst) + 1 == self.fail_on {
                return Err(Error::Storage(format!("write of {key} failed")));
            }
            self.inner.put(key, record)
        }

        fn get(&self, key: &EventKey) -> Result<EventRecord> {
            self.inner.get(key)
        }
    }

    impl CheckpointStore for FlakyStore {
        fn load_checkpoint(&self, contract: Address, topic: B256) -> Result<Option<ScanCheckpoint>> {
            self.inner.load_checkpoint(contract, topic)
        }

        fn save_checkpoint(&self, checkpoint: &ScanCheckpoint) -> Result<()> {
            self.inner.save_checkpoint(checkpoint)
        }

        fn clear_checkpoint(&self, contract: Address, topic: B256) -> Result<()> {
            self.inner.clear_checkpoint(contract, topic)
        }
    }

    fn chain() -> MockChain {
        MockChain::new("http://a", 1_000)
            .with_contract(CONTRACT, 777)
            .with_log(MockChain::log(CONTRACT, TOPIC, 780, 0, &[0xaa; 32]))
            .with_log(MockChain::log(CONTRACT, TOPIC, 790, 1, &[0xbb; 32]))
            // other topic and other contract are ignored
            .with_log(MockChain::log(CONTRACT, B256::repeat_byte(0x02), 785, 0, &[0xcc]))
            .with_log(MockChain::log(Address::repeat_byte(0x43), TOPIC, 786, 0, &[0xdd]))
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_stores_events_with_sequence_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SledStore::open(dir.path()).unwrap());
        let scanner = scanner(Arc::new(chain()), store.clone(), 10_000);

        let summary = scanner
            .scan(scanner.fresh_checkpoint(777), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.chunks, 1);
        assert_eq!(summary.events_stored, 2);
        assert_eq!(summary.next_block, 1_001);
        assert_eq!(summary.next_sequence, 2);
        assert_eq!(store.len(), 2);

        let first = store.get(&EventKey::new(0, 0)).unwrap();
        assert_eq!(first.topic_payload_hex, format!("0x{}", "aa".repeat(32)));
        assert_eq!(first.block_timestamp, MockChain::block_timestamp(780));
        assert_eq!(first.parent_block_hash, format!("{:#x}", MockChain::block_hash(779)));

        let second = store.get(&EventKey::new(1, 1)).unwrap();
        assert_eq!(second.block_timestamp, MockChain::block_timestamp(790));
        assert!(matches!(store.get(&EventKey::new(1, 0)), Err(Error::RecordNotFound(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_saves_checkpoint_per_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SledStore::open(dir.path()).unwrap());
        let scanner = scanner(Arc::new(chain()), store.clone(), 5);

        let summary = scanner
            .scan(scanner.fresh_checkpoint(777), &CancellationToken::new())
            .await
            .unwrap();
        // [777, 1000] in chunks of 5
        assert_eq!(summary.chunks, 45);
        assert_eq!(summary.events_stored, 2);

        let checkpoint = store.load_checkpoint(CONTRACT, TOPIC).unwrap().unwrap();
        assert_eq!(checkpoint.deployment_block, 777);
        assert_eq!(checkpoint.next_block, 1_001);
        assert_eq!(checkpoint.next_sequence, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_past_head_does_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SledStore::open(dir.path()).unwrap());
        let mock = Arc::new(chain());
        let scanner = scanner(mock.clone(), store.clone(), 100);

        let mut checkpoint = scanner.fresh_checkpoint(777);
        checkpoint.next_block = 1_001;
        checkpoint.next_sequence = 2;
        let summary = scanner.scan(checkpoint, &CancellationToken::new()).await.unwrap();

        assert_eq!(summary.chunks, 0);
        assert_eq!(summary.next_block, 1_001);
        assert_eq!(summary.next_sequence, 2);
        // only the head lookup
        assert_eq!(mock.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_stops_on_cancel_with_consistent_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SledStore::open(dir.path()).unwrap());
        let mock = Arc::new(
            MockChain::new("http://a", 999)
                .with_contract(CONTRACT, 0)
                .with_latency(Duration::from_secs(1)),
        );
        let scanner = Arc::new(scanner(mock, store.clone(), 100));
        let cancel = CancellationToken::new();

        let task = {
            let scanner = scanner.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { scanner.scan(scanner.fresh_checkpoint(0), &cancel).await })
        };

        // head lookup at 1s, then a head check and a log query per chunk
        tokio::time::sleep(Duration::from_millis(7_500)).await;
        cancel.cancel();
        assert!(matches!(task.await.unwrap(), Err(Error::Cancelled)));

        let checkpoint = store.load_checkpoint(CONTRACT, TOPIC).unwrap().unwrap();
        assert_eq!(checkpoint.next_block, 300);

        let summary = scanner.scan(checkpoint, &CancellationToken::new()).await.unwrap();
        assert_eq!(summary.chunks, 7);
        assert_eq!(summary.next_block, 1_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_fails_when_all_endpoints_are_down() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SledStore::open(dir.path()).unwrap());
        let scanner = scanner(Arc::new(chain().failing()), store.clone(), 100);

        let err = scanner
            .scan(scanner.fresh_checkpoint(777), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::FailoverExhausted { .. }));
        assert!(store.is_empty());
        assert_eq!(store.load_checkpoint(CONTRACT, TOPIC).unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_write_keeps_sequence_and_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FlakyStore {
            inner: SledStore::open(dir.path()).unwrap(),
            fail_on: 2,
            puts: AtomicUsize::new(0),
        });
        // chunks [777, 786] and [787, 796] hold one log each
        let scanner = scanner(Arc::new(chain()), store.clone(), 10);

        let err = scanner
            .scan(scanner.fresh_checkpoint(777), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Storage(_)));

        // only the first chunk is checkpointed
        let checkpoint = store.load_checkpoint(CONTRACT, TOPIC).unwrap().unwrap();
        assert_eq!(checkpoint.next_block, 787);
        assert_eq!(checkpoint.next_sequence, 1);
        assert!(store.get(&EventKey::new(0, 0)).is_ok());
        assert!(matches!(store.get(&EventKey::new(1, 1)), Err(Error::RecordNotFound(_))));

        let summary = scanner.scan(checkpoint, &CancellationToken::new()).await.unwrap();
        assert_eq!(summary.events_stored, 1);
        assert_eq!(summary.next_sequence, 2);
        assert_eq!(
            store.get(&EventKey::new(1, 1)).unwrap().block_timestamp,
            MockChain::block_timestamp(790)
        );
        assert_eq!(store.inner.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lagging_endpoint_does_not_drop_logs() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SledStore::open(dir.path()).unwrap());
        let lagging = Arc::new(chain());
        lagging.set_head(785);
        let synced = Arc::new(chain());
        let balancer = Arc::new(
            LoadBalancer::new(
                vec![lagging.clone() as Arc<dyn ChainRpc>, synced as Arc<dyn ChainRpc>],
                BalancerSettings::default(),
            )
            .unwrap(),
        );

        // stamp the lagging endpoint so the synced one answers the head lookup
        // and the lagging one is first in line for the log query
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(balancer.select_endpoint().await.url(), "http://a");

        let scanner = LogScanner::new(balancer, store.clone(), CONTRACT, TOPIC, 10_000);
        let summary = scanner
            .scan(scanner.fresh_checkpoint(777), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.head, 1_000);
        assert_eq!(summary.events_stored, 2);
        assert_eq!(summary.next_block, 1_001);
        assert_eq!(
            store.get(&EventKey::new(1, 1)).unwrap().block_timestamp,
            MockChain::block_timestamp(790)
        );
        assert!(lagging.calls() >= 1);
    }
}
