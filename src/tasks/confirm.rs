use crate::{
    constants::CONFIRMATION_TIMEOUT,
    metrics::LoadMetrics,
    pending::PendingSet,
    rpc::{ChainRpc, RpcError},
    tasks::submit::SubmissionHandle,
};
use alloy::primitives::TxHash;
use init4_bin_base::deps::tracing::{debug, error, info, warn};
use std::{sync::Arc, time::Duration};
use tokio::{
    task::{JoinError, JoinSet},
    time::{Instant, timeout, timeout_at},
};

/// Terminal outcome of one tracked submission.
#[derive(Debug)]
pub enum TrackOutcome {
    /// Included with a success status.
    Confirmed {
        /// Time from broadcast to confirmation.
        latency: Duration,
    },
    /// Included with a failed status.
    Reverted,
    /// No receipt within the confirmation timeout.
    TimedOut,
    /// The receipt lookup failed.
    QueryFailed(RpcError),
}

impl TrackOutcome {
    /// True if the transaction was confirmed successfully.
    pub const fn is_confirmed(&self) -> bool {
        matches!(self, Self::Confirmed { .. })
    }
}

/// Owns one pending-set entry. Dropping the guard removes the entry; if no
/// outcome was recorded first, the transaction is counted as failed.
#[derive(Debug)]
struct PendingGuard {
    pending: Arc<PendingSet>,
    metrics: Arc<LoadMetrics>,
    tx_hash: TxHash,
    resolved: bool,
}

impl PendingGuard {
    fn insert(pending: Arc<PendingSet>, metrics: Arc<LoadMetrics>, tx_hash: TxHash) -> Self {
        if !pending.insert(tx_hash) {
            warn!(%tx_hash, "transaction already pending");
        }
        Self { pending, metrics, tx_hash, resolved: false }
    }

    fn resolve(mut self) {
        self.resolved = true;
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if !self.resolved {
            warn!(tx_hash = %self.tx_hash, "confirmation tracker abandoned");
            self.metrics.record_abandoned();
            self.metrics.record_failed();
        }
        self.pending.remove(&self.tx_hash);
    }
}

/// Awaits the outcome of submitted transactions and records it.
#[derive(Debug)]
pub struct ConfirmationTracker<R> {
    rpc: Arc<R>,
    metrics: Arc<LoadMetrics>,
    pending: Arc<PendingSet>,
    timeout: Duration,
}

impl<R> Clone for ConfirmationTracker<R> {
    fn clone(&self) -> Self {
        Self {
            rpc: self.rpc.clone(),
            metrics: self.metrics.clone(),
            pending: self.pending.clone(),
            timeout: self.timeout,
        }
    }
}

impl<R: ChainRpc> ConfirmationTracker<R> {
    /// Create a tracker with the default confirmation timeout.
    pub const fn new(rpc: Arc<R>, metrics: Arc<LoadMetrics>, pending: Arc<PendingSet>) -> Self {
        Self { rpc, metrics, pending, timeout: CONFIRMATION_TIMEOUT }
    }

    /// Set the confirmation timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The pending set this tracker maintains.
    pub const fn pending(&self) -> &Arc<PendingSet> {
        &self.pending
    }

    /// Insert the handle into the pending set and wait for its outcome on the
    /// current task.
    pub async fn track(&self, handle: SubmissionHandle) -> TrackOutcome {
        let guard =
            PendingGuard::insert(self.pending.clone(), self.metrics.clone(), handle.tx_hash);
        self.await_outcome(handle, guard).await
    }

    async fn await_outcome(&self, handle: SubmissionHandle, guard: PendingGuard) -> TrackOutcome {
        let wait = self.rpc.wait_for_confirmation(handle.tx_hash, self.timeout);
        let outcome = match timeout(self.timeout, wait).await {
            Ok(Ok(confirmation)) if confirmation.success => {
                TrackOutcome::Confirmed { latency: handle.started.elapsed() }
            }
            Ok(Ok(_)) => TrackOutcome::Reverted,
            Ok(Err(RpcError::Timeout(_))) | Err(_) => TrackOutcome::TimedOut,
            Ok(Err(error)) => TrackOutcome::QueryFailed(error),
        };
        self.record(&handle, &outcome);
        guard.resolve();
        outcome
    }

    fn record(&self, handle: &SubmissionHandle, outcome: &TrackOutcome) {
        let tx_hash = handle.tx_hash;
        match outcome {
            TrackOutcome::Confirmed { latency } => {
                self.metrics.record_succeeded(*latency);
                debug!(%tx_hash, latency_ms = latency.as_millis() as u64, "tx confirmed");
            }
            TrackOutcome::Reverted => {
                self.metrics.record_reverted();
                self.metrics.record_failed();
                error!(%tx_hash, sender = %handle.sender, "tx reverted");
            }
            TrackOutcome::TimedOut => {
                self.metrics.record_not_mined();
                self.metrics.record_failed();
                error!(%tx_hash, timeout = ?self.timeout, "timeout waiting for tx receipt");
            }
            TrackOutcome::QueryFailed(error) => {
                self.metrics.record_not_mined();
                self.metrics.record_failed();
                error!(%tx_hash, %error, "failed to get tx receipt");
            }
        }
    }
}

/// Counts from draining a [`TrackerSet`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Trackers that finished on their own.
    pub completed: usize,
    /// Trackers aborted once the grace period ran out.
    pub abandoned: usize,
}

/// Supervises the confirmation tracker tasks spawned during a run.
#[derive(Debug, Default)]
pub struct TrackerSet {
    tasks: JoinSet<TrackOutcome>,
}

impl TrackerSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert the handle into the pending set and spawn a task awaiting its
    /// outcome.
    ///
    /// The pending entry is claimed before the task is spawned, so a task
    /// aborted before its first poll still releases it.
    pub fn spawn<R: ChainRpc>(&mut self, tracker: &ConfirmationTracker<R>, handle: SubmissionHandle) {
        let guard = PendingGuard::insert(
            tracker.pending.clone(),
            tracker.metrics.clone(),
            handle.tx_hash,
        );
        let tracker = tracker.clone();
        self.tasks.spawn(async move { tracker.await_outcome(handle, guard).await });
    }

    /// Number of trackers not yet reaped.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// True if no trackers remain.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Collect trackers that have already finished. Returns how many were
    /// collected.
    pub fn reap(&mut self) -> usize {
        let mut reaped = 0;
        while let Some(result) = self.tasks.try_join_next() {
            log_join(result);
            reaped += 1;
        }
        reaped
    }

    /// Wait up to `grace` for the remaining trackers, then abort the rest.
    pub async fn drain(&mut self, grace: Duration) -> DrainReport {
        let deadline = Instant::now() + grace;
        let mut report = DrainReport::default();

        while !self.tasks.is_empty() {
            match timeout_at(deadline, self.tasks.join_next()).await {
                Ok(Some(result)) => {
                    log_join(result);
                    report.completed += 1;
                }
                Ok(None) | Err(_) => break,
            }
        }

        report.abandoned = self.tasks.len();
        if report.abandoned > 0 {
            info!(abandoned = report.abandoned, "aborting outstanding confirmation trackers");
            self.tasks.abort_all();
            while self.tasks.join_next().await.is_some() {}
        }
        report
    }
}

fn log_join(result: Result<TrackOutcome, JoinError>) {
    if let Err(error) = result {
        if error.is_panic() {
            error!(%error, "confirmation tracker panicked");
        }
    }
}
