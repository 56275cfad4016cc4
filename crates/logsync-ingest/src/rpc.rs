use alloy_primitives::{Address, Bytes, B256, U64};
use alloy_rpc_client::{ClientBuilder, RpcClient};
use alloy_rpc_types::{BlockNumberOrTag, Filter, Log};
use async_trait::async_trait;
use logsync_core::{BlockSummary, Error, LogFilter, RawLog, Result};
use serde::{Deserialize, Serialize};

/// Chain capabilities the pipeline needs from one endpoint
///
/// Implementations must be safe for concurrent independent calls; the load
/// balancer adds no locking around them.
#[async_trait]
pub trait ChainRpc: Send + Sync {
    /// Identity of the endpoint
    fn url(&self) -> &str;

    /// Current chain height
    async fn chain_head(&self) -> Result<u64>;

    /// Contract bytecode at `address` as of `block` (empty if none)
    async fn code_at(&self, address: Address, block: u64) -> Result<Bytes>;

    /// Logs matching address, topic0 and the inclusive block range
    async fn filter_logs(&self, filter: &LogFilter) -> Result<Vec<RawLog>>;

    /// Header fields of block `number`
    async fn block_by_number(&self, number: u64) -> Result<BlockSummary>;
}

/// Header fields read from eth_getBlockByNumber
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockHeaderResponse {
    pub number: U64,
    pub timestamp: U64,
    pub parent_hash: B256,
}

/// JSON-RPC endpoint backed by alloy's RPC client
pub struct AlloyRpcEndpoint {
    url: String,
    client: RpcClient,
}

impl AlloyRpcEndpoint {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = ClientBuilder::default()
            .connect(url)
            .await
            .map_err(|e| Error::Construction(format!("failed to connect to {url}: {e}")))?;
        Ok(Self {
            url: url.to_string(),
            client,
        })
    }

    fn unavailable(&self, method: &'static str, reason: impl ToString) -> Error {
        Error::EndpointUnavailable {
            url: self.url.clone(),
            method,
            reason: reason.to_string(),
        }
    }

    fn to_raw_log(&self, log: Log) -> Result<RawLog> {
        let block_number = log
            .block_number
            .ok_or_else(|| self.unavailable("eth_getLogs", "log without block number"))?;
        let log_index = log
            .log_index
            .ok_or_else(|| self.unavailable("eth_getLogs", "log without log index"))?;
        Ok(RawLog {
            address: log.inner.address,
            topics: log.inner.data.topics().to_vec(),
            data: log.inner.data.data.clone(),
            block_number,
            log_index,
            tx_hash: log.transaction_hash,
        })
    }
}

#[async_trait]
impl ChainRpc for AlloyRpcEndpoint {
    fn url(&self) -> &str {
        &self.url
    }

    async fn chain_head(&self) -> Result<u64> {
        let block: U64 = self
            .client
            .request_noparams("eth_blockNumber")
            .await
            .map_err(|e| self.unavailable("eth_blockNumber", e))?;
        Ok(block.to::<u64>())
    }

    async fn code_at(&self, address: Address, block: u64) -> Result<Bytes> {
        self.client
            .request("eth_getCode", (address, BlockNumberOrTag::Number(block)))
            .await
            .map_err(|e| self.unavailable("eth_getCode", e))
    }

    async fn filter_logs(&self, filter: &LogFilter) -> Result<Vec<RawLog>> {
        let query = Filter::new()
            .address(filter.address)
            .event_signature(filter.topic)
            .from_block(filter.range.from)
            .to_block(filter.range.to);

        let logs: Vec<Log> = self
            .client
            .request("eth_getLogs", (query,))
            .await
            .map_err(|e| self.unavailable("eth_getLogs", e))?;

        logs.into_iter().map(|log| self.to_raw_log(log)).collect()
    }

    async fn block_by_number(&self, number: u64) -> Result<BlockSummary> {
        let header: Option<BlockHeaderResponse> = self
            .client
            .request(
                "eth_getBlockByNumber",
                (BlockNumberOrTag::Number(number), false),
            )
            .await
            .map_err(|e| self.unavailable("eth_getBlockByNumber", e))?;

        let header = header.ok_or_else(|| {
            self.unavailable("eth_getBlockByNumber", format!("block {number} not found"))
        })?;

        Ok(BlockSummary {
            number: header.number.to::<u64>(),
            timestamp: header.timestamp.to::<u64>(),
            parent_hash: header.parent_hash,
        })
    }
}
