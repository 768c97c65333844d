//! The RPC surface the load tester consumes, and its alloy binding.

use crate::identity::SignedTransfer;
use alloy::{
    eips::eip2718::Encodable2718,
    network::{Ethereum, TransactionBuilder},
    primitives::{Address, TxHash, U256},
    providers::{Provider as _, RootProvider},
    rpc::types::eth::TransactionRequest,
    transports::TransportError,
};
use std::time::Duration;

/// Result alias for [`ChainRpc`] calls.
pub type RpcResult<T> = Result<T, RpcError>;

/// Default interval between two receipt lookups.
pub const RECEIPT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Default upper bound on a single request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors returned by a [`ChainRpc`].
#[derive(thiserror::Error, Debug)]
pub enum RpcError {
    /// The endpoint answered with a JSON-RPC error.
    #[error("endpoint rejected request: code {code}: {message}")]
    Rejected {
        /// JSON-RPC error code.
        code: i64,
        /// JSON-RPC error message.
        message: String,
    },

    /// The request never got an answer.
    #[error("transport error: {0}")]
    Transport(TransportError),

    /// No answer within the allotted time.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

impl From<TransportError> for RpcError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::ErrorResp(payload) => {
                Self::Rejected { code: payload.code, message: payload.message.to_string() }
            }
            other => Self::Transport(other),
        }
    }
}

impl RpcError {
    /// True if the endpoint received and refused the request.
    pub const fn is_rejection(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }
}

/// Terminal status of an included transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Confirmation {
    /// Hash of the included transaction.
    pub tx_hash: TxHash,
    /// Whether execution succeeded.
    pub success: bool,
    /// Block the transaction was included in.
    pub block_number: Option<u64>,
}

/// The chain operations used to generate and observe load.
///
/// Every call may fail. Callers treat failures as recoverable except while
/// waiting for the endpoint at startup.
pub trait ChainRpc: Send + Sync + 'static {
    /// Chain id for EIP-155 signing.
    fn chain_id(&self) -> impl Future<Output = RpcResult<u64>> + Send;

    /// Current block number.
    fn block_number(&self) -> impl Future<Output = RpcResult<u64>> + Send;

    /// Current gas price in wei.
    fn gas_price(&self) -> impl Future<Output = RpcResult<u128>> + Send;

    /// Balance of `address` in wei.
    fn balance(&self, address: Address) -> impl Future<Output = RpcResult<U256>> + Send;

    /// Next sequence number for `address`, optionally counting transactions
    /// still in the pool.
    fn sequence_number(
        &self,
        address: Address,
        include_pending: bool,
    ) -> impl Future<Output = RpcResult<u64>> + Send;

    /// Broadcast a signed transfer.
    fn submit(&self, tx: &SignedTransfer) -> impl Future<Output = RpcResult<TxHash>> + Send;

    /// Wait until `tx_hash` is included, at most `timeout`.
    fn wait_for_confirmation(
        &self,
        tx_hash: TxHash,
        timeout: Duration,
    ) -> impl Future<Output = RpcResult<Confirmation>> + Send;

    /// Accounts the node signs for.
    fn unlocked_accounts(&self) -> impl Future<Output = RpcResult<Vec<Address>>> + Send;

    /// Send a transfer signed by the node on behalf of an unlocked account.
    fn send_from_unlocked(
        &self,
        from: Address,
        to: Address,
        value: U256,
        gas_limit: u64,
    ) -> impl Future<Output = RpcResult<TxHash>> + Send;
}

/// [`ChainRpc`] over an alloy HTTP provider.
///
/// Every request is bounded by the request timeout, so a stalled endpoint
/// surfaces as [`RpcError::Timeout`]. Receipt lookups are bounded by the
/// confirmation timeout instead.
#[derive(Debug, Clone)]
pub struct AlloyRpc {
    provider: RootProvider<Ethereum>,
    poll_interval: Duration,
    request_timeout: Duration,
}

impl AlloyRpc {
    /// Wrap a provider.
    pub const fn new(provider: RootProvider<Ethereum>) -> Self {
        Self {
            provider,
            poll_interval: RECEIPT_POLL_INTERVAL,
            request_timeout: REQUEST_TIMEOUT,
        }
    }

    /// Set the interval between two receipt lookups.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Set the upper bound on a single request.
    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    async fn bounded<F, T>(&self, request: F) -> RpcResult<T>
    where
        F: IntoFuture<Output = Result<T, TransportError>>,
    {
        match tokio::time::timeout(self.request_timeout, request).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(RpcError::Timeout(self.request_timeout)),
        }
    }

    async fn poll_receipt(&self, tx_hash: TxHash) -> RpcResult<Confirmation> {
        loop {
            if let Some(receipt) = self.provider.get_transaction_receipt(tx_hash).await? {
                return Ok(Confirmation {
                    tx_hash,
                    success: receipt.status(),
                    block_number: receipt.block_number,
                });
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

impl ChainRpc for AlloyRpc {
    async fn chain_id(&self) -> RpcResult<u64> {
        self.bounded(self.provider.get_chain_id()).await
    }

    async fn block_number(&self) -> RpcResult<u64> {
        self.bounded(self.provider.get_block_number()).await
    }

    async fn gas_price(&self) -> RpcResult<u128> {
        self.bounded(self.provider.get_gas_price()).await
    }

    async fn balance(&self, address: Address) -> RpcResult<U256> {
        self.bounded(self.provider.get_balance(address)).await
    }

    async fn sequence_number(&self, address: Address, include_pending: bool) -> RpcResult<u64> {
        let request = self.provider.get_transaction_count(address);
        if include_pending {
            self.bounded(request.pending()).await
        } else {
            self.bounded(request.latest()).await
        }
    }

    async fn submit(&self, tx: &SignedTransfer) -> RpcResult<TxHash> {
        let raw = tx.envelope.encoded_2718();
        let pending = self.bounded(self.provider.send_raw_transaction(&raw)).await?;
        Ok(*pending.tx_hash())
    }

    async fn wait_for_confirmation(
        &self,
        tx_hash: TxHash,
        timeout: Duration,
    ) -> RpcResult<Confirmation> {
        tokio::time::timeout(timeout, self.poll_receipt(tx_hash))
            .await
            .map_err(|_| RpcError::Timeout(timeout))?
    }

    async fn unlocked_accounts(&self) -> RpcResult<Vec<Address>> {
        self.bounded(self.provider.get_accounts()).await
    }

    async fn send_from_unlocked(
        &self,
        from: Address,
        to: Address,
        value: U256,
        gas_limit: u64,
    ) -> RpcResult<TxHash> {
        let tx = TransactionRequest::default()
            .with_from(from)
            .with_to(to)
            .with_value(value)
            .with_gas_limit(gas_limit);
        let pending = self.bounded(self.provider.send_transaction(tx)).await?;
        Ok(*pending.tx_hash())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::rpc::json_rpc::ErrorPayload;

    #[test]
    fn error_responses_become_rejections() {
        let payload = ErrorPayload {
            code: -32000,
            message: "replacement transaction underpriced".into(),
            data: None,
        };
        let err = RpcError::from(TransportError::ErrorResp(payload));
        assert!(err.is_rejection());
        assert!(matches!(err, RpcError::Rejected { code: -32000, .. }));
    }

    #[test]
    fn timeouts_are_not_rejections() {
        assert!(!RpcError::Timeout(Duration::from_secs(1)).is_rejection());
    }
}
