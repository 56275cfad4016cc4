//! Latency-ranked RPC endpoint selection
//!
//! Every probe cycle measures each endpoint's round trip in parallel, then
//! re-sorts the pool and recomputes percentage weights inside one critical
//! section. Selection scores each endpoint as
//! `weight * (1 + minutes since last use)`, so a slow endpoint still gets
//! picked once it has been idle long enough.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::Address;
use futures::future::join_all;
use futures::stream::{self, StreamExt, TryStreamExt};
use logsync_core::{BlockSummary, CollectorConfig, Error, LogFilter, RawLog, Result};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::metrics;
use crate::rpc::{AlloyRpcEndpoint, ChainRpc};

/// Weights of all endpoints in a pool add up to (roughly) this
pub const TOTAL_WEIGHT: u32 = 100;

/// Outcome of the most recent probe of an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointHealth {
    /// Not probed yet
    Unprobed,
    /// Answered the last probe after this round trip
    Healthy(Duration),
    /// Failed or timed out on the last probe
    Unreachable,
}

impl EndpointHealth {
    pub fn is_reachable(&self) -> bool {
        !matches!(self, EndpointHealth::Unreachable)
    }

    pub fn latency(&self) -> Option<Duration> {
        match self {
            EndpointHealth::Healthy(latency) => Some(*latency),
            _ => None,
        }
    }

    /// Healthy by latency, then unprobed, then unreachable
    fn rank_key(&self) -> (u8, Duration) {
        match self {
            EndpointHealth::Healthy(latency) => (0, *latency),
            EndpointHealth::Unprobed => (1, Duration::ZERO),
            EndpointHealth::Unreachable => (2, Duration::ZERO),
        }
    }
}

/// Percentage weights for endpoints already sorted by rank
///
/// Reachable endpoints get raw weight `reachable - rank`, unreachable ones 0,
/// then each raw weight is scaled to a rounded share of [`TOTAL_WEIGHT`]
/// with a floor of 1 for reachable endpoints. When nothing is reachable all
/// endpoints share the total evenly.
pub fn rank_weights(ranked: &[EndpointHealth]) -> Vec<u32> {
    let reachable = ranked.iter().filter(|h| h.is_reachable()).count();
    if reachable == 0 {
        let even = (TOTAL_WEIGHT / ranked.len().max(1) as u32).max(1);
        return vec![even; ranked.len()];
    }

    let raw: Vec<u64> = ranked
        .iter()
        .enumerate()
        .map(|(rank, health)| {
            if health.is_reachable() {
                reachable.saturating_sub(rank) as u64
            } else {
                0
            }
        })
        .collect();
    let total: u64 = raw.iter().sum();

    raw.iter()
        .zip(ranked)
        .map(|(&raw, health)| {
            if !health.is_reachable() {
                return 0;
            }
            let share = (raw * TOTAL_WEIGHT as u64 + total / 2) / total.max(1);
            (share as u32).max(1)
        })
        .collect()
}

/// One remote provider and its ranking state
pub struct RpcEndpoint {
    /// Position in the configured list; stable across re-sorts
    id: usize,
    url: String,
    client: Arc<dyn ChainRpc>,
    health: EndpointHealth,
    weight: u32,
    last_used: Instant,
}

impl RpcEndpoint {
    /// Selection score at `now`
    fn score(&self, now: Instant) -> f64 {
        let idle_minutes = now.saturating_duration_since(self.last_used).as_secs_f64() / 60.0;
        self.weight as f64 * (1.0 + idle_minutes)
    }
}

/// Read-only view of an endpoint's ranking state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointStatus {
    pub url: String,
    pub health: EndpointHealth,
    pub weight: u32,
}

/// Ordered endpoint set; all mutation goes through the balancer's lock
pub struct EndpointPool {
    endpoints: Vec<RpcEndpoint>,
}

impl EndpointPool {
    pub fn new(clients: Vec<Arc<dyn ChainRpc>>, now: Instant) -> Result<Self> {
        if clients.is_empty() {
            return Err(Error::Construction("endpoint pool needs at least one RPC endpoint".into()));
        }
        let even = (TOTAL_WEIGHT / clients.len() as u32).max(1);
        let endpoints = clients
            .into_iter()
            .enumerate()
            .map(|(id, client)| RpcEndpoint {
                id,
                url: client.url().to_string(),
                client,
                health: EndpointHealth::Unprobed,
                weight: even,
                last_used: now,
            })
            .collect();
        Ok(Self { endpoints })
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Apply one probe cycle's results, re-sort and re-weight
    fn rerank(&mut self, results: &[(usize, EndpointHealth)]) {
        for endpoint in &mut self.endpoints {
            if let Some((_, health)) = results.iter().find(|(id, _)| *id == endpoint.id) {
                endpoint.health = *health;
            }
        }

        self.endpoints.sort_by_key(|e| e.health.rank_key());

        let ranked: Vec<EndpointHealth> = self.endpoints.iter().map(|e| e.health).collect();
        for (endpoint, weight) in self.endpoints.iter_mut().zip(rank_weights(&ranked)) {
            endpoint.weight = weight;
        }
    }

    /// Highest-scoring endpoint not in `exclude`; the first one wins ties
    fn best_index(&self, now: Instant, exclude: &[usize]) -> Option<usize> {
        let mut best: Option<(usize, f64)> = None;
        for (index, endpoint) in self.endpoints.iter().enumerate() {
            if exclude.contains(&endpoint.id) {
                continue;
            }
            let score = endpoint.score(now);
            if best.map_or(true, |(_, max)| score > max) {
                best = Some((index, score));
            }
        }
        best.map(|(index, _)| index)
    }

    /// Pick the best endpoint and stamp its last use
    fn select(&mut self, now: Instant, exclude: &[usize]) -> Option<(usize, Arc<dyn ChainRpc>)> {
        let index = self.best_index(now, exclude)?;
        let endpoint = &mut self.endpoints[index];
        endpoint.last_used = now;
        Some((endpoint.id, endpoint.client.clone()))
    }

    fn clients(&self) -> Vec<(usize, Arc<dyn ChainRpc>)> {
        self.endpoints.iter().map(|e| (e.id, e.client.clone())).collect()
    }

    pub fn statuses(&self) -> Vec<EndpointStatus> {
        self.endpoints
            .iter()
            .map(|e| EndpointStatus {
                url: e.url.clone(),
                health: e.health,
                weight: e.weight,
            })
            .collect()
    }
}

/// Timeouts and limits for the balancer
#[derive(Debug, Clone)]
pub struct BalancerSettings {
    pub probe_timeout: Duration,
    pub call_timeout: Duration,
    /// Endpoints tried per logical call
    pub max_attempts: usize,
    pub block_fetch_concurrency: usize,
}

impl Default for BalancerSettings {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_secs(10),
            call_timeout: Duration::from_secs(30),
            max_attempts: 3,
            block_fetch_concurrency: 8,
        }
    }
}

impl From<&CollectorConfig> for BalancerSettings {
    fn from(config: &CollectorConfig) -> Self {
        Self {
            probe_timeout: config.probe_timeout(),
            call_timeout: config.call_timeout(),
            max_attempts: config.max_attempts,
            block_fetch_concurrency: config.block_fetch_concurrency,
        }
    }
}

/// Hands out the best endpoint per call and keeps the ranking fresh
pub struct LoadBalancer {
    pool: Mutex<EndpointPool>,
    settings: BalancerSettings,
}

impl LoadBalancer {
    pub fn new(clients: Vec<Arc<dyn ChainRpc>>, settings: BalancerSettings) -> Result<Self> {
        let pool = EndpointPool::new(clients, Instant::now())?;
        Ok(Self {
            pool: Mutex::new(pool),
            settings,
        })
    }

    /// Connect to every URL, skipping the ones that cannot be set up
    pub async fn connect(urls: &[String], settings: BalancerSettings) -> Result<Self> {
        let mut clients: Vec<Arc<dyn ChainRpc>> = Vec::with_capacity(urls.len());
        for url in urls {
            match AlloyRpcEndpoint::connect(url).await {
                Ok(endpoint) => clients.push(Arc::new(endpoint)),
                Err(e) => warn!(url = %url, error = %e, "Skipping RPC endpoint"),
            }
        }
        if clients.is_empty() {
            return Err(Error::Construction(format!(
                "none of the {} configured RPC endpoints could be set up",
                urls.len()
            )));
        }
        Self::new(clients, settings)
    }

    pub fn settings(&self) -> &BalancerSettings {
        &self.settings
    }

    pub async fn endpoint_count(&self) -> usize {
        self.pool.lock().await.len()
    }

    pub async fn statuses(&self) -> Vec<EndpointStatus> {
        self.pool.lock().await.statuses()
    }

    /// Measure every endpoint concurrently, then re-rank the pool
    ///
    /// Never fails: an endpoint that errors or exceeds the probe timeout is
    /// marked unreachable and stays in the pool.
    pub async fn probe_all(&self) {
        let clients = self.pool.lock().await.clients();
        let probe_timeout = self.settings.probe_timeout;

        let results = join_all(clients.into_iter().map(|(id, client)| async move {
            let started = Instant::now();
            let health = match timeout(probe_timeout, client.chain_head()).await {
                Ok(Ok(head)) => {
                    let latency = started.elapsed();
                    debug!(url = client.url(), head, latency_ms = latency.as_millis() as u64, "Probe ok");
                    EndpointHealth::Healthy(latency)
                }
                Ok(Err(e)) => {
                    debug!(url = client.url(), error = %e, "Probe failed");
                    EndpointHealth::Unreachable
                }
                Err(_) => {
                    debug!(url = client.url(), timeout_ms = probe_timeout.as_millis() as u64, "Probe timed out");
                    EndpointHealth::Unreachable
                }
            };
            (id, health)
        }))
        .await;

        let statuses = {
            let mut pool = self.pool.lock().await;
            pool.rerank(&results);
            pool.statuses()
        };

        for status in &statuses {
            metrics::set_endpoint_status(&status.url, status.weight, status.health.latency());
        }
        let reachable = statuses.iter().filter(|s| s.health.is_reachable()).count();
        info!(
            endpoints = statuses.len(),
            reachable,
            best = statuses.first().map(|s| s.url.as_str()).unwrap_or_default(),
            "Endpoint probe cycle complete"
        );
    }

    /// Best endpoint right now
    pub async fn select_endpoint(&self) -> Arc<dyn ChainRpc> {
        self.select_endpoint_at(Instant::now()).await
    }

    /// Best endpoint as scored at `now`; stamps its last use with `now`
    pub async fn select_endpoint_at(&self, now: Instant) -> Arc<dyn ChainRpc> {
        let mut pool = self.pool.lock().await;
        // the pool is never empty, so index 0 is only a formality
        let index = pool.best_index(now, &[]).unwrap_or(0);
        let endpoint = &mut pool.endpoints[index];
        endpoint.last_used = now;
        endpoint.client.clone()
    }

    async fn select_excluding(&self, exclude: &[usize]) -> Option<(usize, Arc<dyn ChainRpc>)> {
        self.pool.lock().await.select(Instant::now(), exclude)
    }

    /// Run `f` against the selected endpoint, failing over to others
    ///
    /// Each attempt is bounded by the call timeout. Only endpoint failures
    /// trigger another attempt; any other error is returned as is.
    pub async fn call<T, F, Fut>(&self, method: &'static str, context: &str, f: F) -> Result<T>
    where
        F: Fn(Arc<dyn ChainRpc>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let budget = self
            .settings
            .max_attempts
            .min(self.endpoint_count().await)
            .max(1);
        let mut tried: Vec<usize> = Vec::with_capacity(budget);
        let mut last_error = None;

        while tried.len() < budget {
            let Some((id, client)) = self.select_excluding(&tried).await else {
                break;
            };
            let url = client.url().to_string();

            let outcome = match timeout(self.settings.call_timeout, f(client)).await {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout {
                    operation: format!("{method} {context} on {url}"),
                    after: self.settings.call_timeout,
                }),
            };

            match outcome {
                Ok(value) => {
                    metrics::record_rpc_call(method, metrics::OUTCOME_OK);
                    return Ok(value);
                }
                Err(e) if e.is_endpoint_failure() => {
                    metrics::record_rpc_call(method, metrics::OUTCOME_ERROR);
                    warn!(url = %url, method, context, attempt = tried.len() + 1, error = %e, "RPC call failed");
                    tried.push(id);
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        metrics::record_failover_exhausted(method);
        let source = last_error
            .unwrap_or_else(|| Error::Construction("endpoint pool is empty".into()));
        Err(Error::FailoverExhausted {
            operation: format!("{method} {context}").trim_end().to_string(),
            attempts: tried.len(),
            source: Box::new(source),
        })
    }

    pub async fn chain_head(&self) -> Result<u64> {
        self.call("eth_blockNumber", "", |client| async move { client.chain_head().await })
            .await
    }

    pub async fn has_code(&self, address: Address, block: u64) -> Result<bool> {
        let context = format!("block {block}");
        let code = self
            .call("eth_getCode", &context, move |client| async move {
                client.code_at(address, block).await
            })
            .await?;
        Ok(!code.is_empty())
    }

    /// Logs matching `filter`, served by an endpoint that has reached the
    /// end of its range
    ///
    /// An endpoint whose head is still below `filter.range.to` would answer
    /// with a partial result, so it counts as a failed attempt.
    pub async fn filter_logs(&self, filter: &LogFilter) -> Result<Vec<RawLog>> {
        let filter = *filter;
        let context = format!("blocks {}", filter.range);
        self.call("eth_getLogs", &context, move |client| async move {
            let head = client.chain_head().await?;
            if head < filter.range.to {
                return Err(Error::EndpointUnavailable {
                    url: client.url().to_string(),
                    method: "eth_getLogs",
                    reason: format!("head {head} is behind block {}", filter.range.to),
                });
            }
            client.filter_logs(&filter).await
        })
        .await
    }

    pub async fn block_by_number(&self, number: u64) -> Result<BlockSummary> {
        let context = format!("block {number}");
        self.call("eth_getBlockByNumber", &context, move |client| async move {
            client.block_by_number(number).await
        })
        .await
    }

    /// Fetch many blocks concurrently, each on its own selected endpoint
    ///
    /// Results come back in input order; the first failure fails the batch.
    pub async fn fetch_blocks(&self, numbers: &[u64]) -> Result<Vec<BlockSummary>> {
        stream::iter(numbers.iter().copied())
            .map(|number| self.block_by_number(number))
            .buffered(self.settings.block_fetch_concurrency.max(1))
            .try_collect()
            .await
    }

    /// Re-probe every `every` until `cancel` fires
    ///
    /// The first cycle runs one interval from now; call [`probe_all`]
    /// directly for an immediate ranking.
    ///
    /// [`probe_all`]: LoadBalancer::probe_all
    pub fn spawn_probe_loop(
        self: &Arc<Self>,
        every: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let balancer = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + every, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = balancer.probe_all() => {}
                }
            }
            debug!("Probe loop stopped");
        })
    }
}
