use crate::{
    constants::{CONFIRMATION_TIMEOUT, FUNDING_GAS_LIMIT},
    identity::{Identity, IdentityPool, TransferFields},
    metrics::LoadMetrics,
    rpc::{ChainRpc, RpcError},
};
use alloy::{
    primitives::{Address, TxHash, U256},
    signers::local::LocalSignerError,
};
use init4_bin_base::deps::tracing::{error, info};
use std::{sync::Arc, time::Duration};
use tokio::select;
use tokio_util::sync::CancellationToken;

/// Errors that can occur while funding the pool.
#[derive(thiserror::Error, Debug)]
pub enum FundingError {
    /// No key was configured and the node signs for no account.
    #[error("no unlocked account available to fund the pool")]
    NoFundingAccount,

    /// The configured funder key could not be parsed.
    #[error("invalid funder key: {0}")]
    InvalidKey(#[from] LocalSignerError),

    /// An RPC call failed.
    #[error(transparent)]
    Rpc(#[from] RpcError),

    /// The funding transfer could not be signed.
    #[error("failed to sign funding transfer: {0}")]
    Signing(#[from] alloy::signers::Error),

    /// The funding transfer was included but failed.
    #[error("funding transfer {0} reverted")]
    Reverted(TxHash),
}

/// Where funding transfers come from.
#[derive(Debug, Clone)]
pub enum FundingSource {
    /// A locally held key signs raw transfers.
    Key(Identity),
    /// The node signs on behalf of one of its unlocked accounts.
    Unlocked(Address),
}

impl FundingSource {
    /// Use `funder_key` if given, otherwise the node's first unlocked account.
    pub async fn resolve<R: ChainRpc>(
        rpc: &R,
        funder_key: Option<&str>,
    ) -> Result<Self, FundingError> {
        if let Some(key) = funder_key {
            return Ok(Self::Key(Identity::from_key(key)?));
        }
        let accounts = rpc.unlocked_accounts().await?;
        accounts.first().copied().map(Self::Unlocked).ok_or(FundingError::NoFundingAccount)
    }

    /// The funding account's address.
    pub fn address(&self) -> Address {
        match self {
            Self::Key(identity) => identity.address(),
            Self::Unlocked(address) => *address,
        }
    }
}

/// Outcome counts of a funding pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FundingReport {
    /// Accounts whose funding transfer confirmed.
    pub funded: usize,
    /// Accounts whose funding transfer failed.
    pub failed: usize,
}

/// Funds pool identities one at a time, waiting for each transfer to
/// confirm before sending the next.
#[derive(Debug)]
pub struct Funder<R> {
    rpc: Arc<R>,
    metrics: Arc<LoadMetrics>,
    source: FundingSource,
    amount: U256,
    chain_id: u64,
    confirm_timeout: Duration,
}

impl<R: ChainRpc> Funder<R> {
    /// Create a funder.
    pub const fn new(
        rpc: Arc<R>,
        metrics: Arc<LoadMetrics>,
        source: FundingSource,
        amount: U256,
        chain_id: u64,
    ) -> Self {
        Self { rpc, metrics, source, amount, chain_id, confirm_timeout: CONFIRMATION_TIMEOUT }
    }

    /// Set the timeout for each funding confirmation.
    pub fn with_confirm_timeout(mut self, confirm_timeout: Duration) -> Self {
        self.confirm_timeout = confirm_timeout;
        self
    }

    /// Fund every identity in `pool`. Failures are logged and counted, never
    /// returned. Stops early if `cancel` fires.
    pub async fn fund_all(&self, pool: &IdentityPool, cancel: &CancellationToken) -> FundingReport {
        info!(funder = %self.source.address(), accounts = pool.len(), "funding accounts");
        let mut report = FundingReport::default();

        for (index, identity) in pool.iter().enumerate() {
            let address = identity.address();
            let result = select! {
                _ = cancel.cancelled() => {
                    info!(funded = report.funded, "funding cancelled");
                    break;
                }
                result = self.fund_one(address) => result,
            };

            match result {
                Ok(balance) => {
                    report.funded += 1;
                    info!(account = index + 1, %address, %balance, "funded account");
                }
                Err(error) => {
                    report.failed += 1;
                    error!(%error, %address, "error funding account");
                }
            }
        }

        report
    }

    async fn fund_one(&self, to: Address) -> Result<U256, FundingError> {
        let tx_hash = match &self.source {
            FundingSource::Key(identity) => {
                let nonce = self.rpc.sequence_number(identity.address(), true).await?;
                let gas_price = self.rpc.gas_price().await?;
                let signed = identity.sign_transfer(TransferFields {
                    to,
                    value: self.amount,
                    nonce,
                    gas_price,
                    gas_limit: FUNDING_GAS_LIMIT,
                    chain_id: self.chain_id,
                })?;
                self.rpc.submit(&signed).await?
            }
            FundingSource::Unlocked(from) => {
                self.rpc.send_from_unlocked(*from, to, self.amount, FUNDING_GAS_LIMIT).await?
            }
        };

        let confirmation = self.rpc.wait_for_confirmation(tx_hash, self.confirm_timeout).await?;
        if !confirmation.success {
            return Err(FundingError::Reverted(tx_hash));
        }

        let balance = self.rpc.balance(to).await?;
        self.metrics.set_balance(to, balance);
        Ok(balance)
    }
}
