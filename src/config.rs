use crate::rpc::AlloyRpc;
use alloy::{network::Ethereum, primitives::U256, providers::RootProvider};
use init4_bin_base::{deps::tracing::info, utils::from_env::FromEnv};
use std::time::Duration;

/// How long the scheduler keeps issuing rounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Run until the cancellation token fires.
    Continuous,
    /// Stop after the given number of rounds.
    Bounded(u64),
}

/// Configuration for a load test against a single RPC endpoint.
#[derive(Debug, Clone, FromEnv)]
pub struct LoadTestConfig {
    /// URL of the RPC endpoint under test.
    #[from_env(
        var = "RPC_URL",
        desc = "URL of the RPC endpoint under test. This MUST be a valid HTTP url starting with http:// or https://"
    )]
    pub rpc_url: url::Url,

    /// Number of identities generated for the run.
    #[from_env(var = "NUM_ACCOUNTS", desc = "Number of accounts to create and fund", default = 10)]
    pub num_accounts: usize,

    /// Number of submission attempts per round.
    #[from_env(var = "TXS_PER_BATCH", desc = "Number of transactions per batch", default = 50)]
    pub txs_per_batch: usize,

    /// Pause between two rounds, in milliseconds.
    #[from_env(
        var = "BATCH_INTERVAL_MS",
        desc = "Milliseconds to wait between batches",
        default = 10000
    )]
    pub batch_interval_ms: u64,

    /// Value carried by each load transaction, in wei.
    #[from_env(
        var = "TX_VALUE_WEI",
        desc = "Value of each transaction in wei",
        default = 1_000_000_000_000_000
    )]
    pub tx_value_wei: u128,

    /// Gas limit of each load transaction.
    #[from_env(var = "GAS_LIMIT", desc = "Gas limit of each transaction", default = 21000)]
    pub gas_limit: u64,

    /// Number of rounds to run. Unset means the run is continuous.
    #[from_env(
        var = "TOTAL_BATCHES",
        desc = "Number of batches to send before stopping. Leave unset to run until interrupted"
    )]
    pub total_batches: Option<u64>,

    /// Amount sent to each identity during funding, in wei.
    #[from_env(
        var = "FUND_AMOUNT_WEI",
        desc = "Amount of wei sent to each account during funding",
        default = 1_000_000_000_000_000_000
    )]
    pub fund_amount_wei: u128,

    /// Port of the prometheus exporter. The exporter itself is installed by
    /// `init4_bin_base::init4`, which reads the same variable.
    #[from_env(var = "METRICS_PORT", desc = "Port for the prometheus exporter", default = 9000)]
    pub metrics_port: u16,

    /// Private key of the funding source. When unset, the node's first
    /// unlocked account funds the pool.
    #[from_env(
        var = "FUNDER_KEY",
        desc = "Hex private key of the account that funds the pool. Unset to use the node's first unlocked account",
        infallible,
        optional
    )]
    pub funder_key: Option<String>,

    /// Port for the healthcheck server. No server is started when unset.
    #[from_env(var = "HEALTHCHECK_PORT", desc = "Port for the healthcheck and status server")]
    pub healthcheck_port: Option<u16>,
}

impl LoadTestConfig {
    /// Returns the run mode encoded by `TOTAL_BATCHES`.
    pub const fn run_mode(&self) -> RunMode {
        match self.total_batches {
            Some(total) => RunMode::Bounded(total),
            None => RunMode::Continuous,
        }
    }

    /// Pause between two rounds.
    pub const fn batch_interval(&self) -> Duration {
        Duration::from_millis(self.batch_interval_ms)
    }

    /// Value of each load transaction.
    pub fn tx_value(&self) -> U256 {
        U256::from(self.tx_value_wei)
    }

    /// Amount sent to each identity during funding.
    pub fn fund_amount(&self) -> U256 {
        U256::from(self.fund_amount_wei)
    }

    /// Connect an [`AlloyRpc`] to the configured endpoint.
    pub fn connect_rpc(&self) -> AlloyRpc {
        AlloyRpc::new(RootProvider::<Ethereum>::new_http(self.rpc_url.clone()))
    }

    /// Log the configuration, one field per line.
    pub fn log_summary(&self) {
        info!(rpc_url = %self.rpc_url, "configuration loaded");
        info!(num_accounts = self.num_accounts, txs_per_batch = self.txs_per_batch, "pool");
        info!(batch_interval_ms = self.batch_interval_ms, run_mode = ?self.run_mode(), "schedule");
        info!(tx_value_wei = self.tx_value_wei, gas_limit = self.gas_limit, "transfers");
        let funder = if self.funder_key.is_some() { "key" } else { "unlocked" };
        info!(fund_amount_wei = self.fund_amount_wei, funder, "funding");
        info!(metrics_port = self.metrics_port, healthcheck_port = ?self.healthcheck_port, "ports");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::test_config;

    #[test]
    fn total_batches_selects_run_mode() {
        let mut config = test_config();
        config.total_batches = Some(3);
        assert_eq!(config.run_mode(), RunMode::Bounded(3));

        config.total_batches = None;
        assert_eq!(config.run_mode(), RunMode::Continuous);
    }

    #[test]
    fn amounts_convert_to_wei() {
        let config = test_config();
        assert_eq!(config.tx_value(), U256::from(config.tx_value_wei));
        assert_eq!(config.fund_amount(), U256::from(config.fund_amount_wei));
        assert_eq!(config.batch_interval(), Duration::from_millis(config.batch_interval_ms));
    }
}
