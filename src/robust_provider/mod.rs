//! Multi-endpoint, retrying wrapper around Alloy providers.
//!
//! This module exposes [`RobustProvider`], which spreads calls over an ordered ring of
//! [`RootProvider`](alloy::providers::RootProvider) endpoints and adds:
//! * a per-attempt timeout
//! * exponential backoff bounded by a total time budget
//! * rotation to the next endpoint after every failed attempt
//! * classification of permanent errors, which are never retried
//! * "not found" handling for blocks and receipts that are not indexed yet
//! * cooperative cancellation through a [`CancellationToken`](tokio_util::sync::CancellationToken)
//!
//! Use [`RobustProviderBuilder`] to construct a provider, or implement [`IntoEndpoint`] to
//! plug in custom providers.
//!
//! # How it works
//!
//! Each call is a loop around one logical operation. An attempt runs against the ring's
//! current endpoint. If it fails with an error the [`ErrorClassifier`] considers transient, the
//! ring advances and the call sleeps for the next backoff delay before trying again. The loop
//! ends on success, on a permanent error, on cancellation, or once the next delay would
//! overrun the call's [`RetryPolicy::max_elapsed_time`].
//!
//! # Examples
//!
//! ```rust,no_run
//! use chain_feed::robust_provider::{RobustProvider, RobustProviderBuilder};
//! use std::time::Duration;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let robust: RobustProvider = RobustProviderBuilder::new()
//!     .endpoint("https://eth.node-a.example")
//!     .endpoint("https://eth.node-b.example")
//!     .attempt_timeout(Duration::from_secs(10))
//!     .permanent_error("execution reverted")
//!     .build()
//!     .await?;
//!
//! let block_number = robust.get_block_number().await?;
//! println!("Current block: {block_number}");
//!
//! // wait longer between "not found" retries while the chain is congested
//! robust.set_retry_interval(Duration::from_secs(3));
//! # Ok(()) }
//! ```

pub mod builder;
pub mod classifier;
pub mod debug;
pub mod error;
pub mod provider;
pub mod provider_conversion;
pub mod raw;
pub mod retry;
pub mod ring;

pub use builder::*;
pub use classifier::{DEFAULT_PERMANENT_ERRORS, ErrorClassifier};
pub use debug::{
    BlockSelector, BlockTraceTx, TraceCallConfig, TracedBlock, TracedCall, TracedLog,
    TracerConfig,
};
pub use error::Error;
pub use provider::{CallObserver, RobustProvider};
pub use provider_conversion::{IntoEndpoint, IntoRobustProvider};
pub use retry::{
    DEFAULT_ATTEMPT_TIMEOUT, DEFAULT_MAX_DELAY, DEFAULT_MAX_ELAPSED_TIME, DEFAULT_MIN_DELAY,
    RetryPolicy,
};
pub use ring::{Endpoint, ProviderRing};
