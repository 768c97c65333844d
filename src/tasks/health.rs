use crate::{constants::PROBE_TIMEOUT, metrics::LoadMetrics, rpc::ChainRpc};
use init4_bin_base::deps::tracing::{debug, info, warn};
use std::{sync::Arc, time::Duration};
use tokio::time::{sleep, timeout};

/// Errors raised while establishing connectivity.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthError {
    /// The endpoint did not answer within the startup attempt budget.
    #[error("endpoint unavailable after {attempts} attempts")]
    ConnectionUnavailable {
        /// Number of probes attempted.
        attempts: usize,
    },
}

/// Probes the endpoint for liveness and reports into the connectivity gauge.
#[derive(Debug)]
pub struct HealthMonitor<R> {
    rpc: Arc<R>,
    metrics: Arc<LoadMetrics>,
    probe_timeout: Duration,
}

impl<R> Clone for HealthMonitor<R> {
    fn clone(&self) -> Self {
        Self {
            rpc: self.rpc.clone(),
            metrics: self.metrics.clone(),
            probe_timeout: self.probe_timeout,
        }
    }
}

impl<R: ChainRpc> HealthMonitor<R> {
    /// Create a monitor with the default probe timeout.
    pub const fn new(rpc: Arc<R>, metrics: Arc<LoadMetrics>) -> Self {
        Self { rpc, metrics, probe_timeout: PROBE_TIMEOUT }
    }

    /// Set the timeout applied to each probe.
    pub fn with_probe_timeout(mut self, probe_timeout: Duration) -> Self {
        self.probe_timeout = probe_timeout;
        self
    }

    /// Fetch the block number as a liveness probe. Never fails: any probe
    /// error is logged and reported as `false`.
    pub async fn check(&self) -> bool {
        let up = match timeout(self.probe_timeout, self.rpc.block_number()).await {
            Ok(Ok(block_number)) => {
                debug!(block_number, "connectivity probe succeeded");
                true
            }
            Ok(Err(error)) => {
                warn!(%error, "connectivity probe failed");
                false
            }
            Err(_) => {
                warn!(timeout = ?self.probe_timeout, "connectivity probe timed out");
                false
            }
        };
        self.metrics.set_connected(up);
        up
    }

    /// Probe every `delay` until the endpoint answers, at most `max_attempts`
    /// times.
    pub async fn wait_until_ready(
        &self,
        max_attempts: usize,
        delay: Duration,
    ) -> Result<(), HealthError> {
        for attempt in 1..=max_attempts {
            if self.check().await {
                info!(attempt, "connection established");
                return Ok(());
            }
            if attempt < max_attempts {
                info!(attempt, max_attempts, "waiting for node");
                sleep(delay).await;
            }
        }
        Err(HealthError::ConnectionUnavailable { attempts: max_attempts })
    }
}
