//! Contract deployment block search

use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::Address;
use logsync_core::{Error, Result};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::balancer::LoadBalancer;

/// Finds the first block at which a contract has code
///
/// Binary search over `[0, head]`, one `eth_getCode` per step through the
/// balancer. Assumes code, once present, stays present.
pub struct DeploymentLocator {
    balancer: Arc<LoadBalancer>,
    timeout: Duration,
}

impl DeploymentLocator {
    pub fn new(balancer: Arc<LoadBalancer>, timeout: Duration) -> Self {
        Self { balancer, timeout }
    }

    /// Lowest block with code at `address`
    pub async fn locate(&self, address: Address, cancel: &CancellationToken) -> Result<u64> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            result = timeout(self.timeout, self.search(address)) => match result {
                Ok(found) => found,
                Err(_) => Err(Error::Timeout {
                    operation: format!("deployment search for {address}"),
                    after: self.timeout,
                }),
            },
        }
    }

    async fn search(&self, address: Address) -> Result<u64> {
        let head = self.balancer.chain_head().await?;
        let mut low = 0u64;
        let mut high = head;
        let mut found = None;
        let mut probes = 0u32;

        while low <= high {
            let mid = low + (high - low) / 2;
            probes += 1;
            if self.balancer.has_code(address, mid).await? {
                found = Some(mid);
                if mid == 0 {
                    break;
                }
                high = mid - 1;
            } else {
                low = mid + 1;
            }
            debug!(address = %address, block = mid, low, high, "Deployment search step");
        }

        let block = found.ok_or(Error::DeploymentNotFound { address, head })?;
        info!(address = %address, block, head, probes, "Found contract deployment block");
        Ok(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balancer::BalancerSettings;
    use crate::mock::MockChain;
    use crate::rpc::ChainRpc;

    const CONTRACT: Address = Address::new([0x42; 20]);

    fn locator(mock: Arc<MockChain>, deadline: Duration) -> DeploymentLocator {
        let balancer = LoadBalancer::new(vec![mock as Arc<dyn ChainRpc>], BalancerSettings::default())
            .unwrap();
        DeploymentLocator::new(Arc::new(balancer), deadline)
    }

    #[tokio::test(start_paused = true)]
    async fn test_locate_finds_first_block_with_code() {
        for deployed in [0, 1, 500, 777, 999, 1_000] {
            let mock = Arc::new(MockChain::new("http://a", 1_000).with_contract(CONTRACT, deployed));
            let found = locator(mock.clone(), Duration::from_secs(300))
                .locate(CONTRACT, &CancellationToken::new())
                .await
                .unwrap();
            assert_eq!(found, deployed);
            // ceil(log2(1001)) + 1
            assert!(mock.code_calls() <= 11, "{} probes for {deployed}", mock.code_calls());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_locate_single_block_chain() {
        let mock = Arc::new(MockChain::new("http://a", 0).with_contract(CONTRACT, 0));
        let found = locator(mock, Duration::from_secs(300))
            .locate(CONTRACT, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(found, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_locate_without_code_is_not_found() {
        let mock = Arc::new(MockChain::new("http://a", 1_000));
        let err = locator(mock, Duration::from_secs(300))
            .locate(CONTRACT, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DeploymentNotFound { address, head: 1_000 } if address == CONTRACT));
    }

    #[tokio::test(start_paused = true)]
    async fn test_locate_times_out() {
        let mock = Arc::new(
            MockChain::new("http://a", 1_000_000)
                .with_contract(CONTRACT, 12_345)
                .with_latency(Duration::from_secs(1)),
        );
        let err = locator(mock, Duration::from_secs(3))
            .locate(CONTRACT, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout { after, .. } if after == Duration::from_secs(3)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_locate_honors_cancellation() {
        let mock = Arc::new(MockChain::new("http://a", 1_000).with_contract(CONTRACT, 10));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = locator(mock.clone(), Duration::from_secs(300))
            .locate(CONTRACT, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert_eq!(mock.calls(), 0);
    }
}
