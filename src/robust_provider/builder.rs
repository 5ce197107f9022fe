use std::{
    pin::Pin,
    sync::{Arc, atomic::AtomicU64},
    time::Duration,
};

use alloy::network::{Ethereum, Network};
use tokio_util::sync::CancellationToken;

use crate::robust_provider::{
    CallObserver, Endpoint, Error, ErrorClassifier, IntoEndpoint, ProviderRing, RetryPolicy,
    RobustProvider,
};

type BoxedEndpointFuture<N> = Pin<Box<dyn Future<Output = Result<Endpoint<N>, Error>> + Send>>;

/// Default wait between attempts of calls that poll for chain data to appear.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(1);
/// Default total budget for calls waiting on not-yet-available blocks and receipts.
pub const DEFAULT_NOT_FOUND_MAX_ELAPSED: Duration = Duration::from_secs(12 * 60 * 60);
/// Default first delay for hash lookups that may not be indexed yet.
pub const DEFAULT_NOT_FOUND_MIN_DELAY: Duration = Duration::from_secs(5);
/// Default delay cap for hash lookups that may not be indexed yet.
pub const DEFAULT_NOT_FOUND_MAX_DELAY: Duration = Duration::from_secs(15);
/// Default total budget for `debug_trace*` calls.
pub const DEFAULT_TRACE_MAX_ELAPSED: Duration = Duration::from_secs(60);

/// Builder for constructing a [`RobustProvider`].
///
/// Endpoints are tried in the order they are added. Any type implementing [`IntoEndpoint`]
/// can be added, from URL strings to already configured Alloy providers.
pub struct RobustProviderBuilder<N: Network = Ethereum> {
    endpoints: Vec<BoxedEndpointFuture<N>>,
    call_policy: RetryPolicy,
    not_found_policy: RetryPolicy,
    retry_interval: Duration,
    trace_max_elapsed: Duration,
    classifier: ErrorClassifier,
    cancel: CancellationToken,
    observer: Option<CallObserver>,
}

impl<N: Network> Default for RobustProviderBuilder<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<N: Network> RobustProviderBuilder<N> {
    /// Create a builder with default settings and no endpoints.
    #[must_use]
    pub fn new() -> Self {
        Self {
            endpoints: vec![],
            call_policy: RetryPolicy::default(),
            not_found_policy: RetryPolicy::default()
                .initial_interval(DEFAULT_NOT_FOUND_MIN_DELAY)
                .max_interval(DEFAULT_NOT_FOUND_MAX_DELAY)
                .max_elapsed_time(DEFAULT_NOT_FOUND_MAX_ELAPSED),
            retry_interval: DEFAULT_RETRY_INTERVAL,
            trace_max_elapsed: DEFAULT_TRACE_MAX_ELAPSED,
            classifier: ErrorClassifier::default(),
            cancel: CancellationToken::new(),
            observer: None,
        }
    }

    /// Append an endpoint to the rotation.
    #[must_use]
    pub fn endpoint<E: IntoEndpoint<N> + Send + 'static>(mut self, endpoint: E) -> Self {
        let position = self.endpoints.len();
        self.endpoints.push(Box::pin(endpoint.into_endpoint(position)));
        self
    }

    /// Append several endpoints, keeping their order.
    #[must_use]
    pub fn endpoints<I>(self, endpoints: I) -> Self
    where
        I: IntoIterator,
        I::Item: IntoEndpoint<N> + Send + 'static,
    {
        endpoints.into_iter().fold(self, Self::endpoint)
    }

    /// Replace the policy used by ordinary calls.
    #[must_use]
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.call_policy = policy;
        self
    }

    /// Disable retries for ordinary calls: a single attempt, bounded by the attempt timeout.
    #[must_use]
    pub fn fragile(mut self) -> Self {
        self.call_policy =
            RetryPolicy::fragile().attempt_timeout(self.call_policy.attempt_timeout);
        self
    }

    /// Set the timeout of a single attempt.
    #[must_use]
    pub fn attempt_timeout(mut self, timeout: Duration) -> Self {
        self.call_policy.attempt_timeout = timeout;
        self.not_found_policy.attempt_timeout = timeout;
        self
    }

    /// Set the total time budget of ordinary calls.
    #[must_use]
    pub fn max_elapsed_time(mut self, budget: Duration) -> Self {
        self.call_policy.max_elapsed_time = budget;
        self
    }

    /// Set the first backoff delay of ordinary calls.
    #[must_use]
    pub fn min_delay(mut self, min_delay: Duration) -> Self {
        self.call_policy.initial_interval = min_delay;
        self
    }

    /// Set the backoff delay cap of ordinary calls.
    #[must_use]
    pub fn max_delay(mut self, max_delay: Duration) -> Self {
        self.call_policy.max_interval = max_delay;
        self
    }

    /// Set the initial retry interval of availability-sensitive calls.
    ///
    /// It can be changed later with [`RobustProvider::set_retry_interval`].
    #[must_use]
    pub fn retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Set how long calls keep waiting for a block or receipt that is not available yet.
    #[must_use]
    pub fn not_found_max_elapsed(mut self, budget: Duration) -> Self {
        self.not_found_policy.max_elapsed_time = budget;
        self
    }

    /// Set the backoff bounds of hash lookups that keep reporting "not found".
    #[must_use]
    pub fn not_found_delays(mut self, min_delay: Duration, max_delay: Duration) -> Self {
        self.not_found_policy.initial_interval = min_delay;
        self.not_found_policy.max_interval = max_delay;
        self
    }

    /// Set the total time budget of `debug_trace*` calls.
    #[must_use]
    pub fn trace_max_elapsed(mut self, budget: Duration) -> Self {
        self.trace_max_elapsed = budget;
        self
    }

    /// Replace the permanent-error classifier.
    #[must_use]
    pub fn classifier(mut self, classifier: ErrorClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// Mark errors whose message contains `pattern` as permanent, on top of the current set.
    #[must_use]
    pub fn permanent_error(mut self, pattern: impl AsRef<str>) -> Self {
        self.classifier = self.classifier.with_pattern(pattern);
        self
    }

    /// Cancel every retry loop of the built provider when `token` fires.
    #[must_use]
    pub fn cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Invoke `observer` with `(endpoint label, method)` after every attempt.
    #[must_use]
    pub fn call_observer<F>(mut self, observer: F) -> Self
    where
        F: Fn(&str, &str) + Send + Sync + 'static,
    {
        self.observer = Some(Arc::new(observer));
        self
    }

    /// Build the `RobustProvider`.
    ///
    /// Final builder method: connects every endpoint in order and returns the built
    /// [`RobustProvider`].
    ///
    /// # Errors
    ///
    /// * [`Error::NoEndpoints`] if no endpoint was added.
    /// * Any error produced while connecting an endpoint.
    pub async fn build(self) -> Result<RobustProvider<N>, Error> {
        debug!(
            endpoint_count = self.endpoints.len(),
            attempt_timeout_ms = self.call_policy.attempt_timeout.as_millis(),
            max_elapsed_ms = self.call_policy.max_elapsed_time.as_millis(),
            retry_interval_ms = self.retry_interval.as_millis(),
            "Building RobustProvider"
        );

        if self.endpoints.is_empty() {
            return Err(Error::NoEndpoints);
        }

        let mut endpoints = Vec::with_capacity(self.endpoints.len());
        for (idx, endpoint) in self.endpoints.into_iter().enumerate() {
            let endpoint = endpoint.await?;
            trace!(endpoint_index = idx, endpoint = endpoint.label(), "Endpoint connected");
            endpoints.push(endpoint);
        }

        let provider = RobustProvider {
            ring: Arc::new(ProviderRing::new(endpoints)?),
            classifier: self.classifier,
            call_policy: self.call_policy,
            not_found_policy: self.not_found_policy,
            retry_interval: Arc::new(AtomicU64::new(duration_nanos(self.retry_interval))),
            trace_max_elapsed: self.trace_max_elapsed,
            cancel: self.cancel,
            observer: self.observer,
        };

        info!(endpoints = ?provider.ring.labels(), "RobustProvider initialized");
        Ok(provider)
    }
}

impl<N: Network> RobustProvider<N> {
    /// Connect to every URL in `urls`, in order, with default settings.
    ///
    /// # Errors
    ///
    /// Fails if `urls` is empty or any endpoint cannot be connected.
    pub async fn dial<I, S>(urls: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let urls: Vec<String> = urls.into_iter().map(|u| u.as_ref().to_owned()).collect();
        RobustProviderBuilder::new().endpoints(urls).build().await
    }

    /// Build a provider from already connected endpoints without any I/O.
    ///
    /// Every setting other than `call_policy` takes its default.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoEndpoints`] if `endpoints` is empty.
    pub fn from_endpoints(
        endpoints: Vec<Endpoint<N>>,
        call_policy: RetryPolicy,
    ) -> Result<Self, Error> {
        let defaults = RobustProviderBuilder::<N>::new();
        Ok(RobustProvider {
            ring: Arc::new(ProviderRing::new(endpoints)?),
            classifier: defaults.classifier,
            call_policy,
            not_found_policy: defaults
                .not_found_policy
                .attempt_timeout(call_policy.attempt_timeout),
            retry_interval: Arc::new(AtomicU64::new(duration_nanos(defaults.retry_interval))),
            trace_max_elapsed: defaults.trace_max_elapsed,
            cancel: defaults.cancel,
            observer: None,
        })
    }
}

fn duration_nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::{
        providers::{ProviderBuilder, RootProvider, mock::Asserter},
        rpc::client::RpcClient,
    };

    fn mocked() -> RootProvider {
        RootProvider::new(RpcClient::mocked(Asserter::new()))
    }

    #[tokio::test]
    async fn build_without_endpoints_fails() {
        let result = RobustProviderBuilder::<Ethereum>::new().build().await;
        assert!(matches!(result, Err(Error::NoEndpoints)));
    }

    #[tokio::test]
    async fn endpoints_keep_insertion_order() -> anyhow::Result<()> {
        let filled = ProviderBuilder::new().connect_mocked_client(Asserter::new());

        let robust = RobustProviderBuilder::new()
            .endpoint(mocked())
            .endpoint(filled)
            .endpoint(Endpoint::new("archive", mocked()))
            .build()
            .await?;

        assert_eq!(robust.ring().labels(), vec!["endpoint-0", "endpoint-1", "archive"]);
        assert_eq!(robust.ring().index(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn url_endpoints_are_labelled_by_host() -> anyhow::Result<()> {
        let robust: RobustProvider =
            RobustProvider::dial(["http://node-a.example:8545", "http://node-b.example/rpc"])
                .await?;

        assert_eq!(robust.ring().labels(), vec!["node-a.example", "node-b.example"]);
        Ok(())
    }

    #[tokio::test]
    async fn settings_reach_the_provider() -> anyhow::Result<()> {
        let robust = RobustProviderBuilder::new()
            .endpoint(mocked())
            .attempt_timeout(Duration::from_secs(5))
            .max_elapsed_time(Duration::from_secs(30))
            .retry_interval(Duration::from_millis(300))
            .not_found_max_elapsed(Duration::from_secs(90))
            .permanent_error("execution reverted")
            .build()
            .await?;

        assert_eq!(robust.call_policy().attempt_timeout, Duration::from_secs(5));
        assert_eq!(robust.call_policy().max_elapsed_time, Duration::from_secs(30));
        assert_eq!(robust.retry_interval(), Duration::from_millis(300));
        assert_eq!(robust.block_availability_policy().max_elapsed_time, Duration::from_secs(90));
        assert!(robust.classifier.is_permanent(&"execution reverted: 0x"));
        assert!(robust.classifier.is_permanent(&"invalid host"));
        Ok(())
    }

    #[tokio::test]
    async fn fragile_gives_up_after_one_attempt() -> anyhow::Result<()> {
        let (a, b) = (Asserter::new(), Asserter::new());
        a.push_failure_msg("connection reset");
        b.push_success(&alloy::primitives::U64::from(1));

        let robust = RobustProviderBuilder::new()
            .endpoint(RootProvider::<Ethereum>::new(RpcClient::mocked(a)))
            .endpoint(RootProvider::<Ethereum>::new(RpcClient::mocked(b)))
            .fragile()
            .build()
            .await?;

        assert!(robust.get_chain_id().await.is_err());
        // the failed attempt still rotated the ring
        assert_eq!(robust.ring().index(), 1);
        Ok(())
    }
}
