//! Test utilities for testing load tester tasks
use crate::{
    config::LoadTestConfig,
    identity::SignedTransfer,
    rpc::{ChainRpc, Confirmation, RpcError, RpcResult},
};
use alloy::{
    primitives::{Address, TxHash, U256, address, keccak256},
    transports::TransportErrorKind,
};
use init4_bin_base::deps::tracing_subscriber::{
    EnvFilter, Layer, fmt, layer::SubscriberExt, registry, util::SubscriberInitExt,
};
use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{
        Mutex,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};
use tokio::time::{Instant, sleep};

/// Chain id reported by [`MockRpc`].
pub const MOCK_CHAIN_ID: u64 = 31337;
/// Gas price reported by [`MockRpc`].
pub const MOCK_GAS_PRICE: u128 = 1_000_000_000;
/// Unlocked account reported by [`MockRpc`].
pub const MOCK_FUNDER: Address = address!("0xfafafafafafafafafafafafafafafafafafafafa");

/// Returns a bounded test configuration: 3 accounts, 5 transactions per batch,
/// 2 batches, 10ms between batches.
pub fn test_config() -> LoadTestConfig {
    LoadTestConfig {
        rpc_url: "http://localhost:8545".parse().unwrap(),
        num_accounts: 3,
        txs_per_batch: 5,
        batch_interval_ms: 10,
        tx_value_wei: 1_000_000_000_000_000,
        gas_limit: 21_000,
        total_batches: Some(2),
        fund_amount_wei: 1_000_000_000_000_000_000,
        metrics_port: 9000,
        funder_key: None,
        healthcheck_port: None,
    }
}

/// Initializes a logger that prints during testing
pub fn setup_logging() {
    // Initialize logging
    let filter = EnvFilter::from_default_env();
    let fmt = fmt::layer().with_filter(filter);
    let registry = registry().with(fmt);
    let _ = registry.try_init();
}

/// One call to [`MockRpc::submit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitAttempt {
    /// Sender of the transfer.
    pub sender: Address,
    /// Sequence number the transfer was signed with.
    pub nonce: u64,
    /// When the attempt reached the mock.
    pub at: Instant,
    /// Whether the mock accepted it.
    pub accepted: bool,
}

/// An in-memory [`ChainRpc`] with scriptable failures.
///
/// Sequence numbers are tracked per sender and a submission is accepted only
/// if it carries the sender's next sequence number. Accepted transfers
/// confirm after a fixed latency.
#[derive(Debug)]
pub struct MockRpc {
    confirm_latency: Duration,
    revert: AtomicBool,
    stall_gas_price: AtomicBool,
    block_number: AtomicU64,
    funding_counter: AtomicU64,
    probe_script: Mutex<VecDeque<bool>>,
    nonce_delays: Mutex<VecDeque<Duration>>,
    failing_senders: Mutex<HashSet<Address>>,
    collide_next: Mutex<HashSet<Address>>,
    nonces: Mutex<HashMap<Address, u64>>,
    attempts: Mutex<Vec<SubmitAttempt>>,
    funded: Mutex<Vec<Address>>,
    fail_funded: Mutex<Option<usize>>,
}

impl Default for MockRpc {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRpc {
    /// A mock that accepts everything and confirms after 50ms.
    pub fn new() -> Self {
        Self {
            confirm_latency: Duration::from_millis(50),
            revert: AtomicBool::new(false),
            stall_gas_price: AtomicBool::new(false),
            block_number: AtomicU64::new(1),
            funding_counter: AtomicU64::new(0),
            probe_script: Mutex::new(VecDeque::new()),
            nonce_delays: Mutex::new(VecDeque::new()),
            failing_senders: Mutex::new(HashSet::new()),
            collide_next: Mutex::new(HashSet::new()),
            nonces: Mutex::new(HashMap::new()),
            attempts: Mutex::new(Vec::new()),
            funded: Mutex::new(Vec::new()),
            fail_funded: Mutex::new(None),
        }
    }

    /// Set how long confirmations take.
    pub fn with_confirm_latency(mut self, confirm_latency: Duration) -> Self {
        self.confirm_latency = confirm_latency;
        self
    }

    /// Script the next block number lookups: `false` makes a lookup fail.
    /// Lookups past the end of the script succeed.
    pub fn with_probe_script(self, script: impl IntoIterator<Item = bool>) -> Self {
        self.probe_script.lock().unwrap().extend(script);
        self
    }

    /// Delay the next sequence number lookups, one entry per lookup.
    /// Lookups past the end of the script answer immediately.
    pub fn with_nonce_delays(self, delays: impl IntoIterator<Item = Duration>) -> Self {
        self.nonce_delays.lock().unwrap().extend(delays);
        self
    }

    /// Make gas price lookups hang forever, like an endpoint that accepts the
    /// connection and never answers.
    pub fn stall_gas_price(&self) {
        self.stall_gas_price.store(true, Ordering::Relaxed);
    }

    /// Reject every submission from `sender`.
    pub fn fail_sender(&self, sender: Address) {
        self.failing_senders.lock().unwrap().insert(sender);
    }

    /// Reject every submission from the `index`th funded account, counting
    /// from zero. Useful when the accounts are created inside the code under
    /// test.
    pub fn fail_funded_account(&self, index: usize) {
        *self.fail_funded.lock().unwrap() = Some(index);
    }

    /// Let another transaction take `sender`'s next sequence number just
    /// before its next submission lands.
    pub fn collide_next(&self, sender: Address) {
        self.collide_next.lock().unwrap().insert(sender);
    }

    /// Make confirmed transactions report a failed status.
    pub fn set_revert(&self, revert: bool) {
        self.revert.store(revert, Ordering::Relaxed);
    }

    /// All submission attempts so far.
    pub fn attempts(&self) -> Vec<SubmitAttempt> {
        self.attempts.lock().unwrap().clone()
    }

    /// Number of submission attempts from `sender`.
    pub fn attempts_from(&self, sender: Address) -> usize {
        self.attempts.lock().unwrap().iter().filter(|a| a.sender == sender).count()
    }

    /// Addresses funded through the unlocked account, in order.
    pub fn funded(&self) -> Vec<Address> {
        self.funded.lock().unwrap().clone()
    }
}

impl ChainRpc for MockRpc {
    async fn chain_id(&self) -> RpcResult<u64> {
        Ok(MOCK_CHAIN_ID)
    }

    async fn block_number(&self) -> RpcResult<u64> {
        let up = self.probe_script.lock().unwrap().pop_front().unwrap_or(true);
        if !up {
            return Err(TransportErrorKind::custom_str("connection refused").into());
        }
        Ok(self.block_number.fetch_add(1, Ordering::Relaxed))
    }

    async fn gas_price(&self) -> RpcResult<u128> {
        if self.stall_gas_price.load(Ordering::Relaxed) {
            std::future::pending::<()>().await;
        }
        Ok(MOCK_GAS_PRICE)
    }

    async fn balance(&self, _address: Address) -> RpcResult<U256> {
        Ok(U256::from(1_000_000_000_000_000_000u128))
    }

    async fn sequence_number(&self, address: Address, _include_pending: bool) -> RpcResult<u64> {
        let delay = self.nonce_delays.lock().unwrap().pop_front();
        if let Some(delay) = delay {
            sleep(delay).await;
        }
        Ok(self.nonces.lock().unwrap().get(&address).copied().unwrap_or_default())
    }

    async fn submit(&self, tx: &SignedTransfer) -> RpcResult<TxHash> {
        let at = Instant::now();
        let result = if self.failing_senders.lock().unwrap().contains(&tx.from) {
            Err(RpcError::Rejected {
                code: -32000,
                message: "insufficient funds for gas * price + value".into(),
            })
        } else {
            let mut nonces = self.nonces.lock().unwrap();
            let next = nonces.entry(tx.from).or_default();
            if self.collide_next.lock().unwrap().remove(&tx.from) {
                *next += 1;
            }
            if tx.nonce == *next {
                *next += 1;
                Ok(tx.tx_hash())
            } else {
                Err(RpcError::Rejected { code: -32000, message: "nonce too low".into() })
            }
        };

        self.attempts.lock().unwrap().push(SubmitAttempt {
            sender: tx.from,
            nonce: tx.nonce,
            at,
            accepted: result.is_ok(),
        });
        result
    }

    async fn wait_for_confirmation(
        &self,
        tx_hash: TxHash,
        timeout: Duration,
    ) -> RpcResult<Confirmation> {
        if self.confirm_latency > timeout {
            sleep(timeout).await;
            return Err(RpcError::Timeout(timeout));
        }
        sleep(self.confirm_latency).await;
        Ok(Confirmation {
            tx_hash,
            success: !self.revert.load(Ordering::Relaxed),
            block_number: Some(self.block_number.load(Ordering::Relaxed)),
        })
    }

    async fn unlocked_accounts(&self) -> RpcResult<Vec<Address>> {
        Ok(vec![MOCK_FUNDER])
    }

    async fn send_from_unlocked(
        &self,
        _from: Address,
        to: Address,
        _value: U256,
        _gas_limit: u64,
    ) -> RpcResult<TxHash> {
        let index = {
            let mut funded = self.funded.lock().unwrap();
            funded.push(to);
            funded.len() - 1
        };
        if *self.fail_funded.lock().unwrap() == Some(index) {
            self.fail_sender(to);
        }
        let count = self.funding_counter.fetch_add(1, Ordering::Relaxed);
        Ok(keccak256(count.to_be_bytes()))
    }
}
