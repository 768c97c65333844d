//! Load tester metrics definitions
//!
//! This module centralizes all metric definitions for the load tester, and
//! the [`LoadMetrics`] registry that every component records into.
//!
//! ## Counters
//! - Transactions sent, succeeded, failed
//! - Failure breakdown (sequence collisions, disconnected, reverted, not
//!   mined, abandoned)
//! - Connectivity probe failures
//! - Completed rounds
//!
//! ## Gauges
//! - Pending transactions
//! - Pool size and per-address balances
//! - Gas price, block number, connectivity
//!
//! ## Histograms
//! - Transaction confirmation time

use alloy::primitives::{Address, U256};
use init4_bin_base::deps::metrics::{
    Counter, Gauge, Histogram, counter, describe_counter, describe_gauge, describe_histogram,
    gauge, histogram,
};
use serde::Serialize;
use std::{
    sync::{
        LazyLock,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

// -- Transaction Outcomes --
const TX_SENT: &str = "loadtest.tx_sent";
const TX_SENT_HELP: &str = "Number of transaction submission attempts";

const TX_SUCCEEDED: &str = "loadtest.tx_succeeded";
const TX_SUCCEEDED_HELP: &str = "Number of transactions confirmed with a success status";

const TX_FAILED: &str = "loadtest.tx_failed";
const TX_FAILED_HELP: &str = "Number of transactions that failed at submission or confirmation";

const TX_PENDING: &str = "loadtest.tx_pending";
const TX_PENDING_HELP: &str = "Number of transactions awaiting confirmation";

const TX_CONFIRM_TIME_MS: &str = "loadtest.tx_confirm_time_ms";
const TX_CONFIRM_TIME_MS_HELP: &str = "Time from broadcast to confirmation in milliseconds";

// -- Failure Breakdown --
const TX_SEQUENCE_COLLISIONS: &str = "loadtest.tx_sequence_collisions";
const TX_SEQUENCE_COLLISIONS_HELP: &str =
    "Number of submissions rejected because the sender's sequence number was already taken";

const TX_DISCONNECTED: &str = "loadtest.tx_disconnected";
const TX_DISCONNECTED_HELP: &str = "Number of submissions skipped because the endpoint was down";

const TX_REVERTED: &str = "loadtest.tx_reverted";
const TX_REVERTED_HELP: &str = "Number of transactions included with a failed status";

const TX_NOT_MINED: &str = "loadtest.tx_not_mined";
const TX_NOT_MINED_HELP: &str = "Number of transactions that timed out or errored while awaiting a receipt";

const TX_ABANDONED: &str = "loadtest.tx_abandoned";
const TX_ABANDONED_HELP: &str = "Number of confirmation trackers abandoned at shutdown";

// -- Endpoint --
const ACCOUNTS: &str = "loadtest.accounts";
const ACCOUNTS_HELP: &str = "Number of accounts in the identity pool";

const ACCOUNT_BALANCE_WEI: &str = "loadtest.account_balance_wei";
const ACCOUNT_BALANCE_WEI_HELP: &str = "Balance of a pool account in wei";

const GAS_PRICE_GWEI: &str = "loadtest.gas_price_gwei";
const GAS_PRICE_GWEI_HELP: &str = "Current gas price in gwei";

const BLOCK_NUMBER: &str = "loadtest.block_number";
const BLOCK_NUMBER_HELP: &str = "Current block number of the endpoint";

const CONNECTED: &str = "loadtest.connected";
const CONNECTED_HELP: &str = "Connection status (1=connected, 0=disconnected)";

const PROBE_FAILURES: &str = "loadtest.probe_failures";
const PROBE_FAILURES_HELP: &str = "Number of failed connectivity probes";

const ROUNDS: &str = "loadtest.rounds";
const ROUNDS_HELP: &str = "Number of completed batch rounds";

static DESCRIBE: LazyLock<()> = LazyLock::new(|| {
    // Transaction outcomes
    describe_counter!(TX_SENT, TX_SENT_HELP);
    describe_counter!(TX_SUCCEEDED, TX_SUCCEEDED_HELP);
    describe_counter!(TX_FAILED, TX_FAILED_HELP);
    describe_gauge!(TX_PENDING, TX_PENDING_HELP);
    describe_histogram!(TX_CONFIRM_TIME_MS, TX_CONFIRM_TIME_MS_HELP);

    // Failure breakdown
    describe_counter!(TX_SEQUENCE_COLLISIONS, TX_SEQUENCE_COLLISIONS_HELP);
    describe_counter!(TX_DISCONNECTED, TX_DISCONNECTED_HELP);
    describe_counter!(TX_REVERTED, TX_REVERTED_HELP);
    describe_counter!(TX_NOT_MINED, TX_NOT_MINED_HELP);
    describe_counter!(TX_ABANDONED, TX_ABANDONED_HELP);

    // Endpoint
    describe_gauge!(ACCOUNTS, ACCOUNTS_HELP);
    describe_gauge!(ACCOUNT_BALANCE_WEI, ACCOUNT_BALANCE_WEI_HELP);
    describe_gauge!(GAS_PRICE_GWEI, GAS_PRICE_GWEI_HELP);
    describe_gauge!(BLOCK_NUMBER, BLOCK_NUMBER_HELP);
    describe_gauge!(CONNECTED, CONNECTED_HELP);
    describe_counter!(PROBE_FAILURES, PROBE_FAILURES_HELP);
    describe_counter!(ROUNDS, ROUNDS_HELP);
});

// -- Transaction Outcomes --

/// Counter for transaction submission attempts.
pub fn tx_sent() -> Counter {
    LazyLock::force(&DESCRIBE);
    counter!(TX_SENT)
}

/// Counter for transactions that succeeded.
pub fn tx_succeeded() -> Counter {
    LazyLock::force(&DESCRIBE);
    counter!(TX_SUCCEEDED)
}

/// Counter for transactions that failed.
pub fn tx_failed() -> Counter {
    LazyLock::force(&DESCRIBE);
    counter!(TX_FAILED)
}

/// Gauge for transactions awaiting confirmation.
pub fn tx_pending() -> Gauge {
    LazyLock::force(&DESCRIBE);
    gauge!(TX_PENDING)
}

/// Histogram for transaction confirmation time in milliseconds.
pub fn tx_confirm_time_ms() -> Histogram {
    LazyLock::force(&DESCRIBE);
    histogram!(TX_CONFIRM_TIME_MS)
}

// -- Failure Breakdown --

/// Counter for sequence number collisions.
pub fn tx_sequence_collisions() -> Counter {
    LazyLock::force(&DESCRIBE);
    counter!(TX_SEQUENCE_COLLISIONS)
}

/// Counter for submissions skipped while disconnected.
pub fn tx_disconnected() -> Counter {
    LazyLock::force(&DESCRIBE);
    counter!(TX_DISCONNECTED)
}

/// Counter for transactions that reverted.
pub fn tx_reverted() -> Counter {
    LazyLock::force(&DESCRIBE);
    counter!(TX_REVERTED)
}

/// Counter for transactions that were never confirmed.
pub fn tx_not_mined() -> Counter {
    LazyLock::force(&DESCRIBE);
    counter!(TX_NOT_MINED)
}

/// Counter for trackers abandoned at shutdown.
pub fn tx_abandoned() -> Counter {
    LazyLock::force(&DESCRIBE);
    counter!(TX_ABANDONED)
}

// -- Endpoint --

/// Gauge for the identity pool size.
pub fn accounts() -> Gauge {
    LazyLock::force(&DESCRIBE);
    gauge!(ACCOUNTS)
}

/// Gauge for the balance of one pool account.
pub fn account_balance_wei(address: Address) -> Gauge {
    LazyLock::force(&DESCRIBE);
    gauge!(ACCOUNT_BALANCE_WEI, "address" => address.to_string())
}

/// Gauge for the gas price in gwei.
pub fn gas_price_gwei() -> Gauge {
    LazyLock::force(&DESCRIBE);
    gauge!(GAS_PRICE_GWEI)
}

/// Gauge for the endpoint's block number.
pub fn block_number() -> Gauge {
    LazyLock::force(&DESCRIBE);
    gauge!(BLOCK_NUMBER)
}

/// Gauge for connectivity.
pub fn connected() -> Gauge {
    LazyLock::force(&DESCRIBE);
    gauge!(CONNECTED)
}

/// Counter for failed connectivity probes.
pub fn probe_failures() -> Counter {
    LazyLock::force(&DESCRIBE);
    counter!(PROBE_FAILURES)
}

/// Counter for completed rounds.
pub fn rounds() -> Counter {
    LazyLock::force(&DESCRIBE);
    counter!(ROUNDS)
}

/// A point-in-time copy of the [`LoadMetrics`] counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    /// Submission attempts.
    pub sent: u64,
    /// Confirmed successes.
    pub succeeded: u64,
    /// Failures of any kind.
    pub failed: u64,
    /// Sequence number collisions, included in `failed`.
    pub collisions: u64,
    /// Submissions skipped while disconnected, included in `failed`.
    pub disconnected: u64,
    /// Trackers abandoned at shutdown, included in `failed`.
    pub abandoned: u64,
    /// Failed connectivity probes.
    pub probe_failures: u64,
    /// Whether the last connectivity probe succeeded.
    pub connected: bool,
}

impl MetricsSnapshot {
    /// Number of sends that have not yet resolved to a success or failure.
    pub const fn unresolved(&self) -> u64 {
        self.sent.saturating_sub(self.succeeded + self.failed)
    }
}

/// Process-wide metrics registry.
///
/// Every record goes to the `metrics` facade, and counters are mirrored into
/// local atomics so the run can be inspected without a recorder installed.
#[derive(Debug, Default)]
pub struct LoadMetrics {
    sent: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    collisions: AtomicU64,
    disconnected: AtomicU64,
    abandoned: AtomicU64,
    probe_failures: AtomicU64,
    connected: AtomicBool,
}

impl LoadMetrics {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a submission attempt.
    pub fn record_sent(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
        tx_sent().increment(1);
    }

    /// Record a confirmed success and its confirmation latency.
    pub fn record_succeeded(&self, latency: Duration) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
        tx_succeeded().increment(1);
        tx_confirm_time_ms().record(latency.as_millis() as f64);
    }

    /// Record a failure of any kind.
    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        tx_failed().increment(1);
    }

    /// Record a sequence number collision. Does not count the failure itself.
    pub fn record_collision(&self) {
        self.collisions.fetch_add(1, Ordering::Relaxed);
        tx_sequence_collisions().increment(1);
    }

    /// Record a submission skipped while disconnected. Does not count the
    /// failure itself.
    pub fn record_disconnected(&self) {
        self.disconnected.fetch_add(1, Ordering::Relaxed);
        tx_disconnected().increment(1);
    }

    /// Record a reverted transaction. Does not count the failure itself.
    pub fn record_reverted(&self) {
        tx_reverted().increment(1);
    }

    /// Record a transaction that was never confirmed. Does not count the
    /// failure itself.
    pub fn record_not_mined(&self) {
        tx_not_mined().increment(1);
    }

    /// Record an abandoned tracker. Does not count the failure itself.
    pub fn record_abandoned(&self) {
        self.abandoned.fetch_add(1, Ordering::Relaxed);
        tx_abandoned().increment(1);
    }

    /// Record the outcome of a connectivity probe.
    pub fn set_connected(&self, up: bool) {
        self.connected.store(up, Ordering::Relaxed);
        connected().set(if up { 1.0 } else { 0.0 });
        if !up {
            self.probe_failures.fetch_add(1, Ordering::Relaxed);
            probe_failures().increment(1);
        }
    }

    /// Whether the last connectivity probe succeeded.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Record the identity pool size.
    pub fn set_pool_size(&self, size: usize) {
        accounts().set(size as f64);
    }

    /// Record the gas price.
    pub fn set_gas_price(&self, wei: u128) {
        gas_price_gwei().set(crate::utils::wei_to_gwei(wei));
    }

    /// Record the block number.
    pub fn set_block_number(&self, number: u64) {
        block_number().set(number as f64);
    }

    /// Record the balance of a pool account.
    pub fn set_balance(&self, address: Address, balance: U256) {
        account_balance_wei(address).set(crate::utils::u256_to_f64(balance));
    }

    /// Record a completed round.
    pub fn record_round(&self) {
        rounds().increment(1);
    }

    /// Copy the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            sent: self.sent.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            collisions: self.collisions.load(Ordering::Relaxed),
            disconnected: self.disconnected.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
            probe_failures: self.probe_failures.load(Ordering::Relaxed),
            connected: self.connected.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn breakdown_counters_do_not_double_count() {
        let metrics = LoadMetrics::new();
        metrics.record_sent();
        metrics.record_collision();
        metrics.record_failed();
        metrics.record_sent();
        metrics.record_succeeded(Duration::from_millis(40));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.sent, 2);
        assert_eq!(snapshot.failed, 1);
        assert_eq!(snapshot.succeeded, 1);
        assert_eq!(snapshot.collisions, 1);
        assert_eq!(snapshot.unresolved(), 0);
    }

    #[test]
    fn probe_failures_follow_connectivity() {
        let metrics = LoadMetrics::new();
        metrics.set_connected(true);
        metrics.set_connected(false);
        metrics.set_connected(false);
        assert!(!metrics.is_connected());
        assert_eq!(metrics.snapshot().probe_failures, 2);
    }

    #[test]
    fn concurrent_increments_are_not_lost() {
        let metrics = Arc::new(LoadMetrics::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let metrics = metrics.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        metrics.record_sent();
                        metrics.record_failed();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.sent, 8000);
        assert_eq!(snapshot.failed, 8000);
    }
}
