//! Contract log collector
//!
//! Ingests every log a contract emitted for one topic into a local sled
//! database:
//! 1. Ranks the configured RPC endpoints by probe latency and keeps the
//!    ranking fresh in the background
//! 2. Finds the contract's deployment block by binary search on code
//! 3. Scans fixed-width block chunks up to the head, storing one record
//!    per log under `<sequence>-<log index>`
//!
//! ## Usage
//!
//! ```no_run
//! use logsync_core::CollectorConfig;
//! use logsync_ingest::CollectorService;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = CollectorConfig::load("collector.json")?;
//!     let service = CollectorService::new(config).await?;
//!     let summary = service.run(CancellationToken::new()).await?;
//!     println!("stored {} events", summary.events_stored);
//!     Ok(())
//! }
//! ```

mod balancer;
mod locator;
pub mod metrics;
#[cfg(any(test, feature = "test-utils"))]
pub mod mock;
mod rpc;
mod scanner;
mod service;
mod store;

pub use balancer::{
    rank_weights, BalancerSettings, EndpointHealth, EndpointPool, EndpointStatus, LoadBalancer,
    TOTAL_WEIGHT,
};
pub use locator::DeploymentLocator;
pub use rpc::{AlloyRpcEndpoint, BlockHeaderResponse, ChainRpc};
pub use scanner::{LogScanner, ScanSummary};
pub use service::CollectorService;
pub use store::{CheckpointStore, EventStore, ScanCheckpoint, SledStore};
