use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use alloy::{
    eips::{BlockId, BlockNumberOrTag},
    network::{BlockResponse, Ethereum, Network, ReceiptResponse, primitives::HeaderResponse},
    primitives::{Address, B256, BlockHash, Bytes, StorageValue, TxHash, U64, U256},
    providers::{Provider, RootProvider},
    pubsub::Subscription,
    rpc::types::{FeeHistory, Filter, Log, SyncStatus},
};
use tokio::time::{Instant, sleep, timeout};
use tokio_util::sync::CancellationToken;

use crate::robust_provider::{Error, ErrorClassifier, ProviderRing, RetryPolicy};

/// Callback invoked after every attempt with the endpoint label and the method name.
pub type CallObserver = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Multi-endpoint JSON-RPC client with classified retries and failover.
///
/// Every call runs against the ring's current endpoint. A failed attempt rotates the ring and
/// is retried with exponential backoff until it succeeds, is classified as permanent, the
/// call's time budget runs out, or the cancellation token fires.
///
/// Clones share the ring, the runtime-tunable retry interval and the cancellation token.
#[derive(Clone)]
pub struct RobustProvider<N: Network = Ethereum> {
    pub(crate) ring: Arc<ProviderRing<N>>,
    pub(crate) classifier: ErrorClassifier,
    pub(crate) call_policy: RetryPolicy,
    pub(crate) not_found_policy: RetryPolicy,
    pub(crate) retry_interval: Arc<AtomicU64>,
    pub(crate) trace_max_elapsed: Duration,
    pub(crate) cancel: CancellationToken,
    pub(crate) observer: Option<CallObserver>,
}

impl<N: Network> fmt::Debug for RobustProvider<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RobustProvider")
            .field("ring", &self.ring)
            .field("classifier", &self.classifier)
            .field("call_policy", &self.call_policy)
            .field("not_found_policy", &self.not_found_policy)
            .field("retry_interval", &self.retry_interval())
            .field("trace_max_elapsed", &self.trace_max_elapsed)
            .field("observer", &self.observer.is_some())
            .finish_non_exhaustive()
    }
}

impl<N: Network> RobustProvider<N> {
    /// Returns the endpoint rotation.
    #[must_use]
    pub fn ring(&self) -> &ProviderRing<N> {
        &self.ring
    }

    /// Returns the provider of the currently active endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Closed`] once the provider has been closed.
    pub fn current(&self) -> Result<RootProvider<N>, Error> {
        Ok(self.ring.current()?.provider().clone())
    }

    /// Interval used between attempts of calls that wait for chain data to appear.
    #[must_use]
    pub fn retry_interval(&self) -> Duration {
        Duration::from_nanos(self.retry_interval.load(Ordering::Relaxed))
    }

    /// Changes the availability retry interval for this provider and all of its clones.
    pub fn set_retry_interval(&self, interval: Duration) {
        let nanos = u64::try_from(interval.as_nanos()).unwrap_or(u64::MAX);
        self.retry_interval.store(nanos, Ordering::Relaxed);
        debug!(retry_interval_ms = interval.as_millis(), "Retry interval updated");
    }

    /// Returns a clone whose calls are governed by `token` instead of the provider's own
    /// cancellation token.
    #[must_use]
    pub fn with_cancellation(&self, token: CancellationToken) -> Self {
        Self { cancel: token, ..self.clone() }
    }

    /// The cancellation token observed by this provider's calls.
    #[must_use]
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Closes every endpoint. Subsequent calls on this provider or any clone fail with
    /// [`Error::Closed`].
    pub fn close(&self) {
        info!("Closing RobustProvider");
        self.ring.close();
    }

    /// Default policy for ordinary calls.
    #[must_use]
    pub fn call_policy(&self) -> RetryPolicy {
        self.call_policy
    }

    /// Fixed-interval policy for calls that poll until chain data becomes available.
    #[must_use]
    pub fn availability_policy(&self, max_elapsed_time: Duration) -> RetryPolicy {
        RetryPolicy::fixed_interval(self.retry_interval())
            .attempt_timeout(self.call_policy.attempt_timeout)
            .max_elapsed_time(max_elapsed_time)
    }

    pub(crate) fn block_availability_policy(&self) -> RetryPolicy {
        self.availability_policy(self.not_found_policy.max_elapsed_time)
    }

    pub(crate) fn trace_policy(&self) -> RetryPolicy {
        self.availability_policy(self.trace_max_elapsed)
    }

    /// Fetch the chain id with retry and failover.
    ///
    /// # Errors
    ///
    /// See [retry errors](#retry-errors).
    pub async fn get_chain_id(&self) -> Result<u64, Error> {
        self.retry("eth_chainId", self.call_policy, |provider| async move {
            provider.get_chain_id().await
        })
        .await
    }

    /// Fetch the network id reported by `net_version`.
    ///
    /// # Errors
    ///
    /// See [retry errors](#retry-errors).
    pub async fn get_net_version(&self) -> Result<u64, Error> {
        self.retry("net_version", self.call_policy, |provider| async move {
            provider.get_net_version().await
        })
        .await
    }

    /// Fetch the number of peers the current endpoint is connected to.
    ///
    /// # Errors
    ///
    /// See [retry errors](#retry-errors).
    pub async fn get_peer_count(&self) -> Result<u64, Error> {
        self.retry("net_peerCount", self.call_policy, |provider| async move {
            provider.raw_request::<_, U64>("net_peerCount".into(), ()).await.map(|n| n.to::<u64>())
        })
        .await
    }

    /// Fetch the sync status of the current endpoint.
    ///
    /// # Errors
    ///
    /// See [retry errors](#retry-errors).
    pub async fn syncing(&self) -> Result<SyncStatus, Error> {
        self.retry("eth_syncing", self.call_policy, |provider| async move {
            provider.syncing().await
        })
        .await
    }

    /// Fetch the latest block number with retry and failover.
    ///
    /// # Errors
    ///
    /// See [retry errors](#retry-errors).
    pub async fn get_block_number(&self) -> Result<u64, Error> {
        self.retry("eth_blockNumber", self.call_policy, |provider| async move {
            provider.get_block_number().await
        })
        .await
    }

    /// Fetch a block by [`BlockNumberOrTag`], waiting for it to become available.
    ///
    /// A missing block, or one reported with an empty hash, is retried at the
    /// [retry interval](Self::retry_interval) until the not-found budget runs out.
    ///
    /// # Errors
    ///
    /// See [retry errors](#retry-errors).
    pub async fn get_block_by_number(
        &self,
        number: BlockNumberOrTag,
    ) -> Result<N::BlockResponse, Error> {
        self.retry("eth_getBlockByNumber", self.block_availability_policy(), move |provider| {
            async move { present_block::<N>(provider.get_block_by_number(number).await?, number) }
        })
        .await
    }

    /// Fetch a block by [`BlockId`], waiting for it to become available.
    ///
    /// # Errors
    ///
    /// See [retry errors](#retry-errors).
    pub async fn get_block(&self, id: BlockId) -> Result<N::BlockResponse, Error> {
        self.retry("eth_getBlock", self.block_availability_policy(), move |provider| async move {
            present_block::<N>(provider.get_block(id).await?, id)
        })
        .await
    }

    /// Fetch only the header of a block by number.
    ///
    /// # Errors
    ///
    /// See [retry errors](#retry-errors).
    pub async fn get_header_by_number(
        &self,
        number: BlockNumberOrTag,
    ) -> Result<N::HeaderResponse, Error> {
        let block = self.get_block_by_number(number).await?;
        Ok(block.header().clone())
    }

    /// Fetch a block by [`BlockHash`], waiting for it to become available.
    ///
    /// # Errors
    ///
    /// See [retry errors](#retry-errors).
    pub async fn get_block_by_hash(&self, hash: BlockHash) -> Result<N::BlockResponse, Error> {
        self.retry("eth_getBlockByHash", self.not_found_policy, move |provider| async move {
            present_block::<N>(provider.get_block_by_hash(hash).await?, hash)
        })
        .await
    }

    /// Fetch a transaction receipt, waiting for it to become available.
    ///
    /// # Errors
    ///
    /// See [retry errors](#retry-errors).
    pub async fn get_transaction_receipt(
        &self,
        hash: TxHash,
    ) -> Result<N::ReceiptResponse, Error> {
        self.retry("eth_getTransactionReceipt", self.not_found_policy, move |provider| {
            async move {
                match provider.get_transaction_receipt(hash).await? {
                    Some(receipt) if !receipt.transaction_hash().is_zero() => Ok(receipt),
                    _ => Err(Error::ReceiptNotFound(hash)),
                }
            }
        })
        .await
    }

    /// Fetch all receipts of a block. `None` means the node does not know the block.
    ///
    /// # Errors
    ///
    /// See [retry errors](#retry-errors).
    pub async fn get_block_receipts(
        &self,
        block: BlockId,
    ) -> Result<Option<Vec<N::ReceiptResponse>>, Error> {
        self.retry("eth_getBlockReceipts", self.call_policy, move |provider| async move {
            provider.get_block_receipts(block).await
        })
        .await
    }

    /// Fetch a transaction by hash. `None` means the node does not know the transaction.
    ///
    /// # Errors
    ///
    /// See [retry errors](#retry-errors).
    pub async fn get_transaction_by_hash(
        &self,
        hash: TxHash,
    ) -> Result<Option<N::TransactionResponse>, Error> {
        self.retry("eth_getTransactionByHash", self.call_policy, move |provider| async move {
            provider.get_transaction_by_hash(hash).await
        })
        .await
    }

    /// Broadcast a signed, encoded transaction and return its hash.
    ///
    /// # Errors
    ///
    /// See [retry errors](#retry-errors).
    pub async fn send_raw_transaction(&self, encoded: &[u8]) -> Result<TxHash, Error> {
        self.retry("eth_sendRawTransaction", self.call_policy, move |provider| async move {
            let pending = provider.send_raw_transaction(encoded).await?;
            Ok::<_, Error>(*pending.tx_hash())
        })
        .await
    }

    /// Fetch the balance of `address` at `block`.
    ///
    /// # Errors
    ///
    /// See [retry errors](#retry-errors).
    pub async fn get_balance(&self, address: Address, block: BlockId) -> Result<U256, Error> {
        self.retry("eth_getBalance", self.call_policy, move |provider| async move {
            provider.get_balance(address).block_id(block).await
        })
        .await
    }

    /// Fetch the code deployed at `address` at `block`.
    ///
    /// # Errors
    ///
    /// See [retry errors](#retry-errors).
    pub async fn get_code_at(&self, address: Address, block: BlockId) -> Result<Bytes, Error> {
        self.retry("eth_getCode", self.call_policy, move |provider| async move {
            provider.get_code_at(address).block_id(block).await
        })
        .await
    }

    /// Fetch one storage slot of `address` at `block`.
    ///
    /// # Errors
    ///
    /// See [retry errors](#retry-errors).
    pub async fn get_storage_at(
        &self,
        address: Address,
        slot: U256,
        block: BlockId,
    ) -> Result<StorageValue, Error> {
        self.retry("eth_getStorageAt", self.call_policy, move |provider| async move {
            provider.get_storage_at(address, slot).block_id(block).await
        })
        .await
    }

    /// Fetch the nonce of `address` at `block`.
    ///
    /// # Errors
    ///
    /// See [retry errors](#retry-errors).
    pub async fn get_transaction_count(
        &self,
        address: Address,
        block: BlockId,
    ) -> Result<u64, Error> {
        let policy = self.availability_policy(self.call_policy.max_elapsed_time);
        self.retry("eth_getTransactionCount", policy, move |provider| async move {
            provider.get_transaction_count(address).block_id(block).await
        })
        .await
    }

    /// Fetch logs for the given [`Filter`] with retry and failover.
    ///
    /// # Errors
    ///
    /// See [retry errors](#retry-errors).
    pub async fn get_logs(&self, filter: &Filter) -> Result<Vec<Log>, Error> {
        let policy = self.availability_policy(self.call_policy.max_elapsed_time);
        self.retry("eth_getLogs", policy, move |provider| async move {
            provider.get_logs(filter).await
        })
        .await
    }

    /// Execute a read-only call of `tx` at `block`.
    ///
    /// # Errors
    ///
    /// See [retry errors](#retry-errors).
    pub async fn call(&self, tx: &N::TransactionRequest, block: BlockId) -> Result<Bytes, Error> {
        self.retry("eth_call", self.call_policy, move |provider| {
            let tx = tx.clone();
            async move { provider.call(tx).block(block).await }
        })
        .await
    }

    /// Estimate the gas `tx` would use at `block`.
    ///
    /// # Errors
    ///
    /// See [retry errors](#retry-errors).
    pub async fn estimate_gas(
        &self,
        tx: &N::TransactionRequest,
        block: BlockId,
    ) -> Result<u64, Error> {
        self.retry("eth_estimateGas", self.call_policy, move |provider| {
            let tx = tx.clone();
            async move { provider.estimate_gas(tx).block(block).await }
        })
        .await
    }

    /// Fetch the current gas price.
    ///
    /// # Errors
    ///
    /// See [retry errors](#retry-errors).
    pub async fn get_gas_price(&self) -> Result<u128, Error> {
        self.retry("eth_gasPrice", self.call_policy, |provider| async move {
            provider.get_gas_price().await
        })
        .await
    }

    /// Fetch the suggested priority fee.
    ///
    /// # Errors
    ///
    /// See [retry errors](#retry-errors).
    pub async fn get_max_priority_fee_per_gas(&self) -> Result<u128, Error> {
        self.retry("eth_maxPriorityFeePerGas", self.call_policy, |provider| async move {
            provider.get_max_priority_fee_per_gas().await
        })
        .await
    }

    /// Fetch fee history for `block_count` blocks ending at `last_block`.
    ///
    /// # Errors
    ///
    /// See [retry errors](#retry-errors).
    pub async fn get_fee_history(
        &self,
        block_count: u64,
        last_block: BlockNumberOrTag,
        reward_percentiles: &[f64],
    ) -> Result<FeeHistory, Error> {
        self.retry("eth_feeHistory", self.call_policy, move |provider| async move {
            provider.get_fee_history(block_count, last_block, reward_percentiles).await
        })
        .await
    }

    /// Subscribe to new block headers.
    ///
    /// Only establishing the subscription is retried. Endpoints without pub/sub support fail
    /// the attempt and the next endpoint is tried.
    ///
    /// # Errors
    ///
    /// See [retry errors](#retry-errors).
    pub async fn subscribe_blocks(&self) -> Result<Subscription<N::HeaderResponse>, Error> {
        self.retry("eth_subscribe", self.call_policy, |provider| async move {
            provider.subscribe_blocks().await
        })
        .await
    }

    /// Subscribe to logs matching `filter`.
    ///
    /// # Errors
    ///
    /// See [retry errors](#retry-errors).
    pub async fn subscribe_logs(&self, filter: &Filter) -> Result<Subscription<Log>, Error> {
        self.retry("eth_subscribe", self.call_policy, move |provider| async move {
            provider.subscribe_logs(filter).await
        })
        .await
    }

    /// Run `operation` against the ring until it succeeds or the retry policy gives up.
    ///
    /// Each attempt is bounded by `policy.attempt_timeout` and raced against the cancellation
    /// token. After a failed attempt the ring advances, so the next attempt hits the next
    /// endpoint.
    ///
    /// # Errors
    /// <a name="retry-errors"></a>
    ///
    /// * [`Error::Cancelled`] if the token fires before or during the call. No attempt is made
    ///   when it was already cancelled.
    /// * Errors that are not retryable, or that the [`ErrorClassifier`] marks permanent, are
    ///   returned after a single attempt.
    /// * Otherwise the last attempt's error once the next backoff delay would exceed
    ///   `policy.max_elapsed_time`. [`Error::Timeout`] is what a timed-out attempt reports.
    /// * [`Error::Closed`] if the provider has been closed.
    pub(crate) async fn retry<T, E, F, Fut>(
        &self,
        method: &'static str,
        policy: RetryPolicy,
        operation: F,
    ) -> Result<T, Error>
    where
        F: Fn(RootProvider<N>) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<Error>,
    {
        if self.cancel.is_cancelled() {
            error!(method = method, "Call cancelled before first attempt");
            return Err(Error::Cancelled);
        }

        let started = Instant::now();
        let mut delays = policy.backoff();
        let mut attempt: usize = 0;

        loop {
            attempt += 1;
            let endpoint = self.ring.current()?;
            trace!(method = method, endpoint = endpoint.label(), attempt = attempt, "RPC attempt");

            let result = tokio::select! {
                biased;
                () = self.cancel.cancelled() => Err(Error::Cancelled),
                res = timeout(policy.attempt_timeout, operation(endpoint.provider().clone())) => {
                    match res {
                        Ok(inner) => inner.map_err(Into::into),
                        Err(elapsed) => Err(elapsed.into()),
                    }
                }
            };

            if let Some(observer) = &self.observer {
                observer(endpoint.label(), method);
            }

            let err = match result {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(
                            method = method,
                            endpoint = endpoint.label(),
                            attempt = attempt,
                            "RPC call succeeded after retry"
                        );
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if err.is_cancelled() || self.cancel.is_cancelled() {
                error!(method = method, attempt = attempt, "RPC call cancelled");
                return Err(Error::Cancelled);
            }

            if !err.is_retryable() || self.classifier.is_permanent(&err) {
                error!(
                    method = method,
                    endpoint = endpoint.label(),
                    error = %err,
                    "RPC call failed with permanent error"
                );
                return Err(err);
            }

            self.ring.advance();

            let delay = delays.next().unwrap_or(policy.max_interval);
            if policy.max_elapsed_time.is_zero() ||
                started.elapsed() + delay > policy.max_elapsed_time
            {
                error!(
                    method = method,
                    attempts = attempt,
                    error = %err,
                    "RPC call failed, retry budget exhausted"
                );
                return Err(err);
            }

            warn!(
                method = method,
                endpoint = endpoint.label(),
                attempt = attempt,
                error = %err,
                "RPC call failed, retrying after {:?}",
                delay
            );

            tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    error!(method = method, attempt = attempt, "RPC call cancelled during backoff");
                    return Err(Error::Cancelled);
                }
                () = sleep(delay) => {}
            }
        }
    }
}

/// Maps an absent block, or one carrying the zero hash, to [`Error::BlockNotFound`].
fn present_block<N: Network>(
    block: Option<N::BlockResponse>,
    id: impl Into<BlockId>,
) -> Result<N::BlockResponse, Error> {
    match block {
        Some(block) if block.header().hash() != B256::ZERO => Ok(block),
        _ => Err(Error::BlockNotFound(id.into())),
    }
}
