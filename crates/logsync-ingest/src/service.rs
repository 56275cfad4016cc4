use std::sync::Arc;

use logsync_core::{CollectorConfig, Error, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::balancer::{BalancerSettings, EndpointStatus, LoadBalancer};
use crate::locator::DeploymentLocator;
use crate::metrics;
use crate::scanner::{LogScanner, ScanSummary};
use crate::store::{CheckpointStore, ScanCheckpoint, SledStore};

/// Main collector service: rank endpoints, find the start block, scan
pub struct CollectorService {
    config: CollectorConfig,
    balancer: Arc<LoadBalancer>,
    store: Arc<SledStore>,
}

impl CollectorService {
    /// Validate `config`, connect every endpoint and open the store
    pub async fn new(config: CollectorConfig) -> Result<Self> {
        config.validate()?;
        let balancer =
            LoadBalancer::connect(&config.endpoint_urls(), BalancerSettings::from(&config)).await?;
        let store = SledStore::open(&config.data_dir)?;
        Ok(Self::with_parts(config, Arc::new(balancer), Arc::new(store)))
    }

    pub fn with_parts(
        config: CollectorConfig,
        balancer: Arc<LoadBalancer>,
        store: Arc<SledStore>,
    ) -> Self {
        Self {
            config,
            balancer,
            store,
        }
    }

    pub fn store(&self) -> &Arc<SledStore> {
        &self.store
    }

    pub fn balancer(&self) -> &Arc<LoadBalancer> {
        &self.balancer
    }

    /// Probe every endpoint once and report the resulting ranking
    pub async fn check(&self) -> Vec<EndpointStatus> {
        self.balancer.probe_all().await;
        self.balancer.statuses().await
    }

    /// Collect every matching log up to the current head
    ///
    /// Endpoints are re-probed in the background for the whole run. Returns
    /// [`logsync_core::Error::Cancelled`] once `cancel` fires; progress up
    /// to the last finished chunk is kept.
    pub async fn run(&self, cancel: CancellationToken) -> Result<ScanSummary> {
        info!(
            endpoints = self.balancer.endpoint_count().await,
            contract = %self.config.contract,
            topic = %self.config.topic,
            data_dir = %self.config.data_dir.display(),
            "Starting collector"
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            _ = self.balancer.probe_all() => {}
        }

        let probe_cancel = cancel.child_token();
        let probe_loop = self
            .balancer
            .spawn_probe_loop(self.config.probe_interval(), probe_cancel.clone());

        let result = self.collect(&cancel).await;

        probe_cancel.cancel();
        if let Err(e) = probe_loop.await {
            warn!(error = %e, "Probe loop task failed");
        }
        settle(result, self.store.flush())
    }

    async fn collect(&self, cancel: &CancellationToken) -> Result<ScanSummary> {
        let scanner = LogScanner::new(
            self.balancer.clone(),
            self.store.clone(),
            self.config.contract,
            self.config.topic,
            self.config.block_range_size,
        );

        let checkpoint = self.starting_point(&scanner, cancel).await?;
        metrics::set_deployment_block(checkpoint.deployment_block);
        scanner.scan(checkpoint, cancel).await
    }

    /// Checkpoint to scan from
    ///
    /// A saved checkpoint is resumed unless `resume` is off or a configured
    /// `start_block` disagrees with where that checkpoint began.
    async fn starting_point(
        &self,
        scanner: &LogScanner<SledStore>,
        cancel: &CancellationToken,
    ) -> Result<ScanCheckpoint> {
        let (contract, topic) = (self.config.contract, self.config.topic);

        if self.config.resume {
            if let Some(checkpoint) = self.store.load_checkpoint(contract, topic)? {
                if let Some(block) = self
                    .config
                    .start_block
                    .filter(|block| *block != checkpoint.deployment_block)
                {
                    warn!(
                        start_block = block,
                        checkpoint_start = checkpoint.deployment_block,
                        "Configured start block differs from checkpoint, rescanning"
                    );
                    self.store.clear_checkpoint(contract, topic)?;
                    return Ok(scanner.fresh_checkpoint(block));
                }
                info!(
                    deployment_block = checkpoint.deployment_block,
                    next_block = checkpoint.next_block,
                    next_sequence = checkpoint.next_sequence,
                    "Resuming from checkpoint"
                );
                return Ok(checkpoint);
            }
        } else {
            self.store.clear_checkpoint(contract, topic)?;
        }

        let deployment_block = match self.config.start_block {
            Some(block) => {
                info!(block, "Using configured start block");
                block
            }
            None => {
                DeploymentLocator::new(self.balancer.clone(), self.config.deployment_timeout())
                    .locate(contract, cancel)
                    .await?
            }
        };
        Ok(scanner.fresh_checkpoint(deployment_block))
    }
}

/// A failed run keeps its own error; a flush failure only surfaces on success
fn settle(result: Result<ScanSummary>, flushed: Result<()>) -> Result<ScanSummary> {
    match result {
        Ok(summary) => flushed.map(|()| summary),
        Err(e) => {
            if let Err(flush_error) = flushed {
                warn!(error = %flush_error, "Store flush failed after an unsuccessful run");
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settle_keeps_run_error_over_flush_error() {
        let result = settle(Err(Error::Cancelled), Err(Error::Storage("flush".into())));
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[test]
    fn test_settle_reports_flush_error_after_success() {
        let summary = ScanSummary {
            chunks: 1,
            ..Default::default()
        };
        let result = settle(Ok(summary.clone()), Err(Error::Storage("flush".into())));
        assert!(matches!(result, Err(Error::Storage(_))));
        assert_eq!(settle(Ok(summary.clone()), Ok(())).unwrap(), summary);
    }
}
