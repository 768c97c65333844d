use crate::{
    config::{LoadTestConfig, RunMode},
    constants::{
        CONFIRMATION_TIMEOUT, INTER_SUBMISSION_DELAY, SHUTDOWN_GRACE, STARTUP_ATTEMPTS,
        STARTUP_RETRY_DELAY,
    },
    identity::IdentityPool,
    metrics::{LoadMetrics, MetricsSnapshot},
    pending::PendingSet,
    rpc::ChainRpc,
    tasks::{
        confirm::{ConfirmationTracker, DrainReport, TrackerSet},
        fund::{Funder, FundingReport, FundingSource},
        health::HealthMonitor,
        submit::{SenderThrottle, SubmitError, Submitter, TransferParams},
    },
};
use init4_bin_base::deps::tracing::{Instrument, debug, error, info, info_span, warn};
use rand::{SeedableRng, rngs::StdRng};
use std::{sync::Arc, time::Duration};
use tokio::{select, time::sleep};
use tokio_util::sync::CancellationToken;

/// Lifecycle of a [`BatchScheduler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Not started.
    Idle,
    /// Funding the identity pool.
    Funding,
    /// Issuing rounds.
    Running {
        /// The round in progress, starting at 1.
        round: u64,
    },
    /// Finished, either by exhausting the round budget or by cancellation.
    Stopped,
}

/// Counts from one round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoundReport {
    /// Transfers broadcast successfully.
    pub submitted: usize,
    /// Submission attempts that failed.
    pub failed: usize,
}

/// Summary of a finished run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    /// Rounds started.
    pub rounds: u64,
    /// Funding outcome.
    pub funding: FundingReport,
    /// Counters after all trackers resolved.
    pub metrics: MetricsSnapshot,
    /// How the outstanding trackers ended.
    pub drained: DrainReport,
}

/// Drives the load test: startup, funding, then rounds of transfers until the
/// round budget is spent or the run is cancelled.
#[derive(Debug)]
pub struct BatchScheduler<R> {
    config: LoadTestConfig,
    rpc: Arc<R>,
    metrics: Arc<LoadMetrics>,
    pending: Arc<PendingSet>,
    health: HealthMonitor<R>,
    cancel: CancellationToken,
    rng: StdRng,
    state: SchedulerState,
    confirm_timeout: Duration,
    startup_attempts: usize,
    startup_delay: Duration,
}

impl<R: ChainRpc> BatchScheduler<R> {
    /// Create a scheduler. Nothing happens until [`Self::run`].
    pub fn new(
        config: LoadTestConfig,
        rpc: Arc<R>,
        metrics: Arc<LoadMetrics>,
        cancel: CancellationToken,
    ) -> Self {
        let health = HealthMonitor::new(rpc.clone(), metrics.clone());
        Self {
            config,
            rpc,
            metrics,
            pending: Arc::new(PendingSet::new()),
            health,
            cancel,
            rng: StdRng::from_os_rng(),
            state: SchedulerState::Idle,
            confirm_timeout: CONFIRMATION_TIMEOUT,
            startup_attempts: STARTUP_ATTEMPTS,
            startup_delay: STARTUP_RETRY_DELAY,
        }
    }

    /// Use a specific rng for pair selection.
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    /// Set the confirmation timeout for funding and load transfers.
    pub fn with_confirm_timeout(mut self, confirm_timeout: Duration) -> Self {
        self.confirm_timeout = confirm_timeout;
        self
    }

    /// Set the startup connectivity budget.
    pub fn with_startup_retry(mut self, attempts: usize, delay: Duration) -> Self {
        self.startup_attempts = attempts;
        self.startup_delay = delay;
        self
    }

    /// Current lifecycle state.
    pub const fn state(&self) -> SchedulerState {
        self.state
    }

    /// The pending set shared with confirmation trackers.
    pub const fn pending(&self) -> &Arc<PendingSet> {
        &self.pending
    }

    fn transition(&mut self, next: SchedulerState) {
        debug!(from = ?self.state, to = ?next, "scheduler state change");
        self.state = next;
    }

    /// Run the load test to completion.
    ///
    /// Fails only if the endpoint never becomes reachable, the chain id cannot
    /// be read, or the pool is too small for distinct pairs. A stop signal
    /// during startup ends the run with an empty summary.
    pub async fn run(&mut self) -> eyre::Result<RunSummary> {
        let init_span = info_span!("load test initialization");

        let cancel = self.cancel.clone();
        let started = select! {
            biased;
            _ = cancel.cancelled() => None,
            started = self.start().instrument(init_span.clone()) => Some(started?),
        };
        let Some((pool, chain_id)) = started else {
            info!("stop signal received during startup");
            self.transition(SchedulerState::Stopped);
            return Ok(RunSummary {
                rounds: 0,
                funding: FundingReport::default(),
                metrics: self.metrics.snapshot(),
                drained: DrainReport::default(),
            });
        };

        self.transition(SchedulerState::Funding);
        let funding = self.fund(&pool, chain_id).instrument(init_span).await;

        let tracker = ConfirmationTracker::new(
            self.rpc.clone(),
            self.metrics.clone(),
            self.pending.clone(),
        )
        .with_timeout(self.confirm_timeout);
        let submitter = Submitter::new(
            self.rpc.clone(),
            self.metrics.clone(),
            self.health.clone(),
            tracker,
            TransferParams {
                chain_id,
                value: self.config.tx_value(),
                gas_limit: self.config.gas_limit,
            },
            self.cancel.clone(),
        );
        let mut trackers = TrackerSet::new();

        info!(run_mode = ?self.config.run_mode(), "starting load test");
        let mut rounds = 0;
        loop {
            if self.cancel.is_cancelled() {
                info!(rounds, "stop signal received");
                break;
            }
            if self.budget_spent(rounds) {
                break;
            }

            rounds += 1;
            self.transition(SchedulerState::Running { round: rounds });

            let span = info_span!("round", round = rounds);
            let report =
                self.run_round(&pool, &submitter, &mut trackers).instrument(span.clone()).await;
            trackers.reap();
            select! {
                biased;
                _ = self.cancel.cancelled() => {}
                _ = self.refresh_gauges(&pool).instrument(span) => {}
            }
            self.metrics.record_round();

            info!(
                round = rounds,
                successful = report.submitted,
                failed = report.failed,
                pending = self.pending.len(),
                "batch completed"
            );

            if self.budget_spent(rounds) {
                info!(rounds, "completed all batches, stopping");
                break;
            }

            select! {
                _ = self.cancel.cancelled() => {
                    info!(rounds, "stop signal received");
                    break;
                }
                _ = sleep(self.config.batch_interval()) => {}
            }
        }

        self.transition(SchedulerState::Stopped);

        let grace = if self.cancel.is_cancelled() {
            SHUTDOWN_GRACE
        } else {
            self.confirm_timeout + SHUTDOWN_GRACE
        };
        info!(in_flight = trackers.len(), ?grace, "waiting for outstanding confirmations");
        let drained = trackers.drain(grace).await;

        Ok(RunSummary { rounds, funding, metrics: self.metrics.snapshot(), drained })
    }

    /// Connect, read the chain id and create the pool.
    async fn start(&mut self) -> eyre::Result<(IdentityPool, u64)> {
        self.health.wait_until_ready(self.startup_attempts, self.startup_delay).await?;

        let chain_id = self.rpc.chain_id().await?;
        info!(chain_id, "connected to endpoint");

        info!(num_accounts = self.config.num_accounts, "creating accounts");
        let pool = IdentityPool::create_validated(self.config.num_accounts)?;
        for (index, identity) in pool.iter().enumerate() {
            debug!(account = index + 1, address = %identity.address(), "created account");
        }
        self.metrics.set_pool_size(pool.len());

        Ok((pool, chain_id))
    }

    /// Fund the pool. Never fails: an unfunded account only makes its later
    /// submissions fail.
    async fn fund(&self, pool: &IdentityPool, chain_id: u64) -> FundingReport {
        let source =
            match FundingSource::resolve(self.rpc.as_ref(), self.config.funder_key.as_deref())
                .await
            {
                Ok(source) => source,
                Err(error) => {
                    error!(%error, "no funding source, continuing with unfunded accounts");
                    return FundingReport { funded: 0, failed: pool.len() };
                }
            };

        Funder::new(
            self.rpc.clone(),
            self.metrics.clone(),
            source,
            self.config.fund_amount(),
            chain_id,
        )
        .with_confirm_timeout(self.confirm_timeout)
        .fund_all(pool, &self.cancel)
        .await
    }

    fn budget_spent(&self, rounds: u64) -> bool {
        match self.config.run_mode() {
            RunMode::Bounded(total) => rounds >= total,
            RunMode::Continuous => false,
        }
    }

    /// Issue one round of submissions, one at a time.
    async fn run_round(
        &mut self,
        pool: &IdentityPool,
        submitter: &Submitter<R>,
        trackers: &mut TrackerSet,
    ) -> RoundReport {
        info!(batch_size = self.config.txs_per_batch, "sending batch");
        let mut throttle = SenderThrottle::new();
        let mut report = RoundReport::default();

        for _ in 0..self.config.txs_per_batch {
            if self.cancel.is_cancelled() {
                break;
            }

            let (sender, receiver) = match pool.pick_distinct_pair(&mut self.rng) {
                Ok(pair) => pair,
                Err(error) => {
                    error!(%error, "cannot pick a sender and receiver");
                    break;
                }
            };

            match submitter.submit(sender, receiver, &mut throttle, trackers).await {
                Ok(_) => report.submitted += 1,
                Err(SubmitError::Cancelled) => break,
                Err(_) => report.failed += 1,
            }

            select! {
                _ = self.cancel.cancelled() => break,
                _ = sleep(INTER_SUBMISSION_DELAY) => {}
            }
        }

        report
    }

    /// Refresh endpoint-level gauges after a round.
    async fn refresh_gauges(&self, pool: &IdentityPool) {
        if !self.health.check().await {
            warn!("cannot update metrics, endpoint not connected");
            return;
        }

        match self.rpc.gas_price().await {
            Ok(gas_price) => self.metrics.set_gas_price(gas_price),
            Err(error) => warn!(%error, "failed to fetch gas price"),
        }

        match self.rpc.block_number().await {
            Ok(block_number) => self.metrics.set_block_number(block_number),
            Err(error) => warn!(%error, "failed to fetch block number"),
        }

        for identity in pool.iter() {
            let address = identity.address();
            match self.rpc.balance(address).await {
                Ok(balance) => self.metrics.set_balance(address, balance),
                Err(error) => warn!(%error, %address, "failed to fetch balance"),
            }
        }
    }
}
