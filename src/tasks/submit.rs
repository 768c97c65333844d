use crate::{
    constants::COLLISION_WINDOW,
    identity::{Identity, TransferFields},
    metrics::LoadMetrics,
    rpc::{ChainRpc, RpcError},
    tasks::{
        confirm::{ConfirmationTracker, TrackerSet},
        health::HealthMonitor,
    },
};
use alloy::primitives::{Address, TxHash, U256};
use init4_bin_base::deps::tracing::{debug, error, warn};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::{
    select,
    time::{Instant, sleep},
};
use tokio_util::sync::CancellationToken;

/// One broadcast transaction awaiting its outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmissionHandle {
    /// Hash returned by the endpoint.
    pub tx_hash: TxHash,
    /// Address of the sending identity.
    pub sender: Address,
    /// When the transaction was handed to the endpoint.
    pub started: Instant,
}

/// Errors that can occur while submitting a transfer.
#[derive(thiserror::Error, Debug)]
pub enum SubmitError {
    /// The connectivity probe failed before submission.
    #[error("endpoint disconnected")]
    Disconnected,

    /// Another transaction from the same sender already holds the sequence
    /// number.
    #[error("sequence number {nonce} of {sender} already taken")]
    SequenceCollision {
        /// The sender.
        sender: Address,
        /// The contested sequence number.
        nonce: u64,
    },

    /// The endpoint failed or refused the submission.
    #[error("submission failed: {0}")]
    Submission(#[from] RpcError),

    /// The transaction could not be signed.
    #[error("failed to sign transaction: {0}")]
    Signing(#[from] alloy::signers::Error),

    /// The run was cancelled before the endpoint answered.
    #[error("cancelled before dispatch")]
    Cancelled,
}

impl SubmitError {
    /// True for the benign sequence number contention case.
    pub const fn is_collision(&self) -> bool {
        matches!(self, Self::SequenceCollision { .. })
    }
}

/// Round-scoped record of when each sender last dispatched a transfer.
///
/// Holds a sender back until [`COLLISION_WINDOW`] has passed since its
/// previous dispatch, so back-to-back transfers from one sender do not race
/// for the same sequence number. Best effort only.
#[derive(Debug)]
pub struct SenderThrottle {
    window: Duration,
    last_used: HashMap<Address, Instant>,
}

impl Default for SenderThrottle {
    fn default() -> Self {
        Self::new()
    }
}

impl SenderThrottle {
    /// Create a throttle with the default window.
    pub fn new() -> Self {
        Self { window: COLLISION_WINDOW, last_used: HashMap::new() }
    }

    /// Wait out the rest of the window for `sender`.
    pub async fn wait(&self, sender: Address) {
        let Some(last) = self.last_used.get(&sender) else { return };
        let elapsed = last.elapsed();
        if elapsed < self.window {
            let remaining = self.window - elapsed;
            debug!(%sender, ?remaining, "sender used recently, throttling");
            sleep(remaining).await;
        }
    }

    /// Start a new window for `sender`. Called once its transfer has been
    /// handed to the endpoint.
    pub fn mark(&mut self, sender: Address) {
        self.last_used.insert(sender, Instant::now());
    }
}

/// Fixed fields of every load transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferParams {
    /// EIP-155 chain id.
    pub chain_id: u64,
    /// Value of each transfer in wei.
    pub value: U256,
    /// Gas limit of each transfer.
    pub gas_limit: u64,
}

/// Builds, signs and broadcasts transfers, handing each broadcast to a
/// confirmation tracker.
#[derive(Debug)]
pub struct Submitter<R> {
    rpc: Arc<R>,
    metrics: Arc<LoadMetrics>,
    health: HealthMonitor<R>,
    tracker: ConfirmationTracker<R>,
    params: TransferParams,
    cancel: CancellationToken,
}

impl<R: ChainRpc> Submitter<R> {
    /// Create a submitter.
    pub const fn new(
        rpc: Arc<R>,
        metrics: Arc<LoadMetrics>,
        health: HealthMonitor<R>,
        tracker: ConfirmationTracker<R>,
        params: TransferParams,
        cancel: CancellationToken,
    ) -> Self {
        Self { rpc, metrics, health, tracker, params, cancel }
    }

    /// Submit one transfer from `sender` to `receiver`.
    ///
    /// On success the transaction is counted as sent and a tracker is spawned
    /// onto `trackers`. Every other outcome except cancellation counts as sent
    /// and failed. No error is fatal to the caller.
    ///
    /// Every step is abandoned as soon as the run is cancelled.
    pub async fn submit(
        &self,
        sender: &Identity,
        receiver: &Identity,
        throttle: &mut SenderThrottle,
        trackers: &mut TrackerSet,
    ) -> Result<SubmissionHandle, SubmitError> {
        let result = select! {
            biased;
            _ = self.cancel.cancelled() => Err(SubmitError::Cancelled),
            result = self.dispatch(sender, receiver, throttle) => result,
        };

        match &result {
            Ok(handle) => {
                self.metrics.record_sent();
                trackers.spawn(&self.tracker, *handle);
                debug!(tx_hash = %handle.tx_hash, sender = %handle.sender, "sent tx");
            }
            Err(SubmitError::Cancelled) => {}
            Err(err) => {
                match err {
                    SubmitError::SequenceCollision { .. } => {
                        self.metrics.record_collision();
                        warn!(%err, "sequence collision, skipping");
                    }
                    SubmitError::Disconnected => {
                        self.metrics.record_disconnected();
                        warn!(sender = %sender.address(), "connection lost, skipping");
                    }
                    _ => error!(%err, sender = %sender.address(), "error sending transaction"),
                }
                self.metrics.record_sent();
                self.metrics.record_failed();
            }
        }

        result
    }

    async fn dispatch(
        &self,
        sender: &Identity,
        receiver: &Identity,
        throttle: &mut SenderThrottle,
    ) -> Result<SubmissionHandle, SubmitError> {
        if !self.health.check().await {
            return Err(SubmitError::Disconnected);
        }

        let from = sender.address();
        throttle.wait(from).await;

        // read fresh each time, the pool may hold our previous transfers
        let nonce = self.rpc.sequence_number(from, true).await?;
        let gas_price = self.rpc.gas_price().await?;

        let signed = sender.sign_transfer(TransferFields {
            to: receiver.address(),
            value: self.params.value,
            nonce,
            gas_price,
            gas_limit: self.params.gas_limit,
            chain_id: self.params.chain_id,
        })?;

        let started = Instant::now();
        let submitted = self.rpc.submit(&signed).await;
        throttle.mark(from);
        match submitted {
            Ok(tx_hash) => Ok(SubmissionHandle { tx_hash, sender: from, started }),
            Err(error) => Err(self.classify(from, nonce, error).await),
        }
    }

    /// A rejected transfer collided if the sender's pending sequence number
    /// has moved past the one it was signed with.
    async fn classify(&self, sender: Address, nonce: u64, error: RpcError) -> SubmitError {
        if !error.is_rejection() {
            return error.into();
        }
        match self.rpc.sequence_number(sender, true).await {
            Ok(next) if next > nonce => SubmitError::SequenceCollision { sender, nonce },
            _ => error.into(),
        }
    }
}
