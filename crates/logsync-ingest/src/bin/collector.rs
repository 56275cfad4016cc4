//! Collector CLI binary
//!
//! Run with:
//! ```bash
//! RPC_URLS=https://rpc-a,https://rpc-b \
//! CONTRACT_ADDRESS=0x... TOPIC_HASH=0x... \
//! cargo run -p logsync-ingest --bin collector -- --data-dir ./logsync-data
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;

use alloy_primitives::{Address, B256};
use anyhow::Context;
use clap::Parser;
use logsync_core::{CollectorConfig, Error, EventKey};
use logsync_ingest::{CollectorService, EventStore, SledStore};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "collector")]
#[command(about = "Collect a contract's logs for one topic into a local database")]
struct Args {
    /// JSON config file; flags and env vars override its fields
    #[arg(long)]
    config: Option<PathBuf>,

    /// Comma-separated JSON-RPC endpoint URLs
    #[arg(long, env = "RPC_URLS", value_delimiter = ',')]
    rpc_urls: Vec<String>,

    /// Database directory (falls back to LEVELDB_PATH)
    #[arg(long, env = "DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Contract to collect logs from
    #[arg(long, env = "CONTRACT_ADDRESS")]
    contract: Option<Address>,

    /// topic0 of the event to collect
    #[arg(long, env = "TOPIC_HASH")]
    topic: Option<B256>,

    /// Blocks per log query
    #[arg(long)]
    block_range_size: Option<u64>,

    /// Seconds between endpoint probe cycles
    #[arg(long)]
    probe_interval_secs: Option<u64>,

    /// Skip the deployment search and start at this block
    #[arg(long)]
    start_block: Option<u64>,

    /// Ignore any saved checkpoint and rescan from the start
    #[arg(long)]
    fresh: bool,

    /// Probe every endpoint, print the ranking and exit
    #[arg(long)]
    check: bool,

    /// Print the stored record for a key like 12-3 and exit
    #[arg(long)]
    get: Option<EventKey>,

    /// Serve Prometheus metrics on this address
    #[arg(long, env = "METRICS_ADDR")]
    metrics_addr: Option<SocketAddr>,
}

impl Args {
    fn into_config(self) -> anyhow::Result<CollectorConfig> {
        let mut config = match &self.config {
            Some(path) => CollectorConfig::load(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => CollectorConfig::default(),
        };

        if !self.rpc_urls.is_empty() {
            config.rpc_urls = self.rpc_urls;
        }
        if let Some(data_dir) = self
            .data_dir
            .or_else(|| std::env::var_os("LEVELDB_PATH").map(PathBuf::from))
        {
            config.data_dir = data_dir;
        }
        if let Some(contract) = self.contract {
            config.contract = contract;
        }
        if let Some(topic) = self.topic {
            config.topic = topic;
        }
        if let Some(size) = self.block_range_size {
            config.block_range_size = size;
        }
        if let Some(secs) = self.probe_interval_secs {
            config.probe_interval_secs = secs;
        }
        if self.start_block.is_some() {
            config.start_block = self.start_block;
        }
        if self.fresh {
            config.resume = false;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("logsync_ingest=info".parse()?)
                .add_directive("collector=info".parse()?),
        )
        .init();

    let args = Args::parse();
    let check = args.check;
    let get = args.get;
    let metrics_addr = args.metrics_addr;
    let config = args.into_config()?;

    if let Some(key) = get {
        let store = SledStore::open(&config.data_dir).context("opening event store")?;
        let record = store
            .get(&key)
            .with_context(|| format!("reading event {key}"))?;
        println!("{}", serde_json::to_string_pretty(&record)?);
        return Ok(());
    }

    if let Some(addr) = metrics_addr {
        logsync_ingest::metrics::install_prometheus_exporter(addr)
            .context("installing Prometheus exporter")?;
        info!(%addr, "Serving Prometheus metrics");
    }

    let service = CollectorService::new(config)
        .await
        .context("starting collector")?;

    if check {
        for (rank, status) in service.check().await.iter().enumerate() {
            let latency = match status.health.latency() {
                Some(latency) => format!("{} ms", latency.as_millis()),
                None => format!("{:?}", status.health),
            };
            println!("{:>2}. {} weight={} latency={}", rank + 1, status.url, status.weight, latency);
        }
        return Ok(());
    }

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, stopping");
                cancel.cancel();
            }
        });
    }

    match service.run(cancel).await {
        Ok(summary) => {
            println!(
                "[OK] Stored {} events in {} chunks (deployment block {}, head {})",
                summary.events_stored, summary.chunks, summary.deployment_block, summary.head
            );
            Ok(())
        }
        Err(Error::Cancelled) => {
            info!("Stopped; progress up to the last finished chunk is saved");
            Ok(())
        }
        Err(e) => Err(anyhow::Error::new(e).context("collector run failed")),
    }
}
