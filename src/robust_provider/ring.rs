use std::{
    fmt,
    sync::{
        Arc, RwLock,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use alloy::{network::Network, providers::RootProvider};

use crate::robust_provider::Error;

/// One connected backing node.
#[derive(Clone)]
pub struct Endpoint<N: Network> {
    label: Arc<str>,
    provider: RootProvider<N>,
}

impl<N: Network> Endpoint<N> {
    /// Wraps a connected provider under the given label.
    pub fn new(label: impl Into<Arc<str>>, provider: RootProvider<N>) -> Self {
        Self { label: label.into(), provider }
    }

    /// Name used in logs and call observation, usually the endpoint host.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[must_use]
    pub fn provider(&self) -> &RootProvider<N> {
        &self.provider
    }
}

impl<N: Network> fmt::Debug for Endpoint<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint").field("label", &self.label).finish_non_exhaustive()
    }
}

/// Round-robin rotation over a fixed, ordered set of endpoints.
///
/// The ring has no notion of endpoint health: [`advance`](Self::advance) blindly moves to the
/// next endpoint and wraps after the last one. Callers advance only after a failed attempt, so
/// a healthy endpoint keeps serving until it fails.
///
/// The index is atomic, so concurrent callers may each observe and advance the ring without
/// further locking. The endpoint list itself is only written by [`close`](Self::close).
pub struct ProviderRing<N: Network> {
    endpoints: RwLock<Vec<Endpoint<N>>>,
    index: AtomicUsize,
    closed: AtomicBool,
}

impl<N: Network> ProviderRing<N> {
    /// Creates a ring positioned at the first endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoEndpoints`] if `endpoints` is empty.
    pub fn new(endpoints: Vec<Endpoint<N>>) -> Result<Self, Error> {
        if endpoints.is_empty() {
            return Err(Error::NoEndpoints);
        }
        Ok(Self {
            endpoints: RwLock::new(endpoints),
            index: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        })
    }

    /// Returns the endpoint at the active index.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Closed`] once [`close`](Self::close) has been called.
    pub fn current(&self) -> Result<Endpoint<N>, Error> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        let endpoints = self.endpoints.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        if endpoints.is_empty() {
            return Err(Error::Closed);
        }
        let idx = self.index.load(Ordering::Acquire) % endpoints.len();
        Ok(endpoints[idx].clone())
    }

    /// Moves the active index to the next endpoint, wrapping to the first after the last.
    ///
    /// Returns the new index.
    pub fn advance(&self) -> usize {
        let len = self.len().max(1);
        let previous = self
            .index
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |i| Some((i + 1) % len))
            .unwrap_or_else(|i| i);
        let next = (previous + 1) % len;
        trace!(from = previous, to = next, "Provider ring advanced");
        next
    }

    /// Drops every endpoint handle. Safe to call more than once.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let drained: Vec<_> = self
            .endpoints
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .drain(..)
            .collect();
        debug!(endpoints = drained.len(), "Provider ring closed");
    }

    /// Active index, in `0..len()`.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.endpoints.read().unwrap_or_else(std::sync::PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Labels of all endpoints in rotation order.
    #[must_use]
    pub fn labels(&self) -> Vec<String> {
        self.endpoints
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .map(|e| e.label().to_owned())
            .collect()
    }
}

impl<N: Network> fmt::Debug for ProviderRing<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRing")
            .field("endpoints", &self.labels())
            .field("index", &self.index())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::{
        network::Ethereum,
        providers::mock::Asserter,
        rpc::client::RpcClient,
    };

    fn ring(n: usize) -> ProviderRing<Ethereum> {
        let endpoints = (0..n)
            .map(|i| {
                Endpoint::new(
                    format!("endpoint-{i}"),
                    RootProvider::new(RpcClient::mocked(Asserter::new())),
                )
            })
            .collect();
        ProviderRing::new(endpoints).unwrap()
    }

    #[test]
    fn empty_ring_is_rejected() {
        let result = ProviderRing::<Ethereum>::new(vec![]);
        assert!(matches!(result, Err(Error::NoEndpoints)));
    }

    #[test]
    fn current_starts_at_first_endpoint() {
        let ring = ring(3);
        assert_eq!(ring.index(), 0);
        assert_eq!(ring.current().unwrap().label(), "endpoint-0");
    }

    #[test]
    fn advance_wraps_after_full_cycle() {
        let ring = ring(3);

        assert_eq!(ring.advance(), 1);
        assert_eq!(ring.current().unwrap().label(), "endpoint-1");
        assert_eq!(ring.advance(), 2);
        assert_eq!(ring.advance(), 0);

        assert_eq!(ring.index(), 0);
        assert_eq!(ring.current().unwrap().label(), "endpoint-0");
    }

    #[test]
    fn single_endpoint_ring_stays_put() {
        let ring = ring(1);
        for _ in 0..5 {
            assert_eq!(ring.advance(), 0);
        }
        assert_eq!(ring.current().unwrap().label(), "endpoint-0");
    }

    #[test]
    fn close_is_idempotent_and_fails_current() {
        let ring = ring(2);
        ring.close();
        ring.close();

        assert!(ring.is_closed());
        assert!(ring.is_empty());
        assert!(matches!(ring.current(), Err(Error::Closed)));
    }
}
