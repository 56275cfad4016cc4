//! Collector configuration

use std::path::{Path, PathBuf};
use std::time::Duration;

use alloy_primitives::{Address, B256};
use serde::{Deserialize, Serialize};

use crate::range::DEFAULT_BLOCK_RANGE_SIZE;
use crate::{Error, Result};

/// Configuration for one ingestion run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectorConfig {
    /// JSON-RPC endpoints; any of them can serve any call
    pub rpc_urls: Vec<String>,
    /// Directory of the local event database
    pub data_dir: PathBuf,
    /// Contract whose logs are collected
    pub contract: Address,
    /// topic0 to filter on
    pub topic: B256,
    /// Max blocks per log query
    #[serde(default = "default_block_range_size")]
    pub block_range_size: u64,
    /// Seconds between endpoint probe cycles
    #[serde(default = "default_probe_interval_secs")]
    pub probe_interval_secs: u64,
    /// Per-endpoint probe timeout (milliseconds)
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    /// Per-call timeout for locator and scanner requests (milliseconds)
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
    /// Bound on the whole deployment block search (seconds)
    #[serde(default = "default_deployment_timeout_secs")]
    pub deployment_timeout_secs: u64,
    /// Endpoints tried per logical call before giving up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    /// Concurrent block header fetches per chunk
    #[serde(default = "default_block_fetch_concurrency")]
    pub block_fetch_concurrency: usize,
    /// Skip the deployment search and start here
    #[serde(default)]
    pub start_block: Option<u64>,
    /// Continue from the saved checkpoint when one matches
    #[serde(default = "default_resume")]
    pub resume: bool,
}

fn default_block_range_size() -> u64 {
    DEFAULT_BLOCK_RANGE_SIZE
}

fn default_probe_interval_secs() -> u64 {
    5 * 60
}

fn default_probe_timeout_ms() -> u64 {
    10_000
}

fn default_call_timeout_ms() -> u64 {
    30_000
}

fn default_deployment_timeout_secs() -> u64 {
    5 * 60
}

fn default_max_attempts() -> usize {
    3
}

fn default_block_fetch_concurrency() -> usize {
    8
}

fn default_resume() -> bool {
    true
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            rpc_urls: Vec::new(),
            data_dir: PathBuf::from("./logsync-data"),
            contract: Address::ZERO,
            topic: B256::ZERO,
            block_range_size: default_block_range_size(),
            probe_interval_secs: default_probe_interval_secs(),
            probe_timeout_ms: default_probe_timeout_ms(),
            call_timeout_ms: default_call_timeout_ms(),
            deployment_timeout_secs: default_deployment_timeout_secs(),
            max_attempts: default_max_attempts(),
            block_fetch_concurrency: default_block_fetch_concurrency(),
            start_block: None,
            resume: default_resume(),
        }
    }
}

impl CollectorConfig {
    /// Load configuration from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a JSON file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.rpc_urls.iter().all(|url| url.trim().is_empty()) {
            return Err(Error::InvalidConfig("at least one RPC URL is required".into()));
        }
        if self.contract == Address::ZERO {
            return Err(Error::InvalidConfig("contract address is required".into()));
        }
        if self.topic == B256::ZERO {
            return Err(Error::InvalidConfig("topic hash is required".into()));
        }
        if self.block_range_size == 0 {
            return Err(Error::InvalidConfig("block_range_size must be positive".into()));
        }
        if self.max_attempts == 0 {
            return Err(Error::InvalidConfig("max_attempts must be positive".into()));
        }
        if self.block_fetch_concurrency == 0 {
            return Err(Error::InvalidConfig(
                "block_fetch_concurrency must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Non-empty, trimmed endpoint URLs in configured order
    pub fn endpoint_urls(&self) -> Vec<String> {
        self.rpc_urls
            .iter()
            .map(|url| url.trim())
            .filter(|url| !url.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn deployment_timeout(&self) -> Duration {
        Duration::from_secs(self.deployment_timeout_secs)
    }
}
