use alloy::{
    network::{Ethereum, Network},
    providers::{
        DynProvider, Provider, RootProvider,
        fillers::{FillProvider, TxFiller},
        layers::{CacheProvider, CallBatchProvider},
    },
    transports::http::reqwest::Url,
};

use crate::robust_provider::{Endpoint, Error, RobustProvider, RobustProviderBuilder};

/// Conversion trait for types that can be turned into a ring [`Endpoint`].
///
/// URL-like values are connected and labelled by host. Already built providers are labelled
/// `endpoint-{position}`, where `position` is their place in the rotation.
pub trait IntoEndpoint<N: Network = Ethereum> {
    /// Convert `self` into an [`Endpoint`].
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying provider cannot be constructed or connected.
    fn into_endpoint(self, position: usize)
    -> impl Future<Output = Result<Endpoint<N>, Error>> + Send;
}

fn positional_label(position: usize) -> String {
    format!("endpoint-{position}")
}

fn host_label(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_owned))
        .unwrap_or_else(|| url.to_owned())
}

impl<N: Network> IntoEndpoint<N> for Endpoint<N> {
    async fn into_endpoint(self, _position: usize) -> Result<Endpoint<N>, Error> {
        Ok(self)
    }
}

impl<N: Network> IntoEndpoint<N> for RootProvider<N> {
    async fn into_endpoint(self, position: usize) -> Result<Endpoint<N>, Error> {
        Ok(Endpoint::new(positional_label(position), self))
    }
}

impl<N: Network> IntoEndpoint<N> for &str {
    async fn into_endpoint(self, _position: usize) -> Result<Endpoint<N>, Error> {
        let provider = RootProvider::connect(self).await?;
        Ok(Endpoint::new(host_label(self), provider))
    }
}

impl<N: Network> IntoEndpoint<N> for String {
    async fn into_endpoint(self, _position: usize) -> Result<Endpoint<N>, Error> {
        let provider = RootProvider::connect(&self).await?;
        Ok(Endpoint::new(host_label(&self), provider))
    }
}

impl<N: Network> IntoEndpoint<N> for Url {
    async fn into_endpoint(self, _position: usize) -> Result<Endpoint<N>, Error> {
        let provider = RootProvider::connect(self.as_str()).await?;
        Ok(Endpoint::new(host_label(self.as_str()), provider))
    }
}

impl<F, P, N> IntoEndpoint<N> for FillProvider<F, P, N>
where
    F: TxFiller<N>,
    P: Provider<N>,
    N: Network,
{
    async fn into_endpoint(self, position: usize) -> Result<Endpoint<N>, Error> {
        Ok(Endpoint::new(positional_label(position), self.root().to_owned()))
    }
}

impl<P, N> IntoEndpoint<N> for CacheProvider<P, N>
where
    P: Provider<N>,
    N: Network,
{
    async fn into_endpoint(self, position: usize) -> Result<Endpoint<N>, Error> {
        Ok(Endpoint::new(positional_label(position), self.root().to_owned()))
    }
}

impl<N: Network> IntoEndpoint<N> for DynProvider<N> {
    async fn into_endpoint(self, position: usize) -> Result<Endpoint<N>, Error> {
        Ok(Endpoint::new(positional_label(position), self.root().to_owned()))
    }
}

impl<P, N> IntoEndpoint<N> for CallBatchProvider<P, N>
where
    P: Provider<N> + 'static,
    N: Network,
{
    async fn into_endpoint(self, position: usize) -> Result<Endpoint<N>, Error> {
        Ok(Endpoint::new(positional_label(position), self.root().to_owned()))
    }
}

/// Conversion trait for types that can be turned into a single-endpoint [`RobustProvider`].
pub trait IntoRobustProvider<N: Network = Ethereum> {
    /// Convert `self` into a [`RobustProvider`] with default settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint fails to connect.
    fn into_robust_provider(self) -> impl Future<Output = Result<RobustProvider<N>, Error>> + Send;
}

impl<N: Network, E: IntoEndpoint<N> + Send + 'static> IntoRobustProvider<N> for E {
    async fn into_robust_provider(self) -> Result<RobustProvider<N>, Error> {
        RobustProviderBuilder::new().endpoint(self).build().await
    }
}
