//! Chain-Feed is a library for reading EVM chains through several JSON-RPC endpoints at once
//! and streaming their event logs block by block.
//!
//! It has two layers:
//!
//! * [`robust_provider`] wraps an ordered ring of endpoints in a
//!   [`RobustProvider`](robust_provider::RobustProvider). Every call gets a per-attempt timeout,
//!   exponential backoff bounded by a time budget and failover to the next endpoint. Errors the
//!   node will never recover from are classified as permanent and returned at once.
//! * [`LogFeed`] walks heights in ascending order on top of a robust provider and hands every
//!   log matching an address set and a topic matrix to a caller handler.
//!
//! # Ordering
//!
//! For a single feed, blocks are processed in ascending order and the logs of one block are
//! delivered in the order the node returned them. The block completion handler runs after the
//! last log of its block and before the first log of the next one.
//!
//! # Finality
//!
//! A feed does not detect reorganizations. Use [`LogFeedConfig::offset`] to process blocks a
//! fixed distance behind the cursor, and make handlers idempotent (for example keyed by
//! transaction hash and log index) if the same block may be seen again after a restart.
//!
//! # Cancellation
//!
//! A single [`CancellationToken`](tokio_util::sync::CancellationToken) stops a running feed and
//! every pending provider call made on its behalf, including calls sleeping in backoff.
//!
//! # Examples
//!
//! ```rust,no_run
//! use chain_feed::{LogFeed, LogFeedConfig, robust_provider::RobustProvider};
//! use std::{convert::Infallible, time::Duration};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let provider: RobustProvider =
//!     RobustProvider::dial(["https://eth.node-a.example", "https://eth.node-b.example"]).await?;
//!
//! let feed = LogFeed::new(
//!     provider,
//!     LogFeedConfig::new()
//!         .address("0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48")
//!         .topic(["0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef"])
//!         .offset(6),
//! )?;
//!
//! feed.for_each_log_polling(
//!     Duration::from_secs(12),
//!     |block, log| {
//!         println!("block {} log {:?}", block.number, log.log_index);
//!         Ok::<_, Infallible>(())
//!     },
//!     |_| Ok::<_, Infallible>(()),
//! )
//! .await?;
//! # Ok(()) }
//! ```

#[macro_use]
mod logging;

pub mod log_feed;
pub mod robust_provider;

mod error;

pub use error::{FeedError, HandlerError};

pub use log_feed::{
    DEFAULT_POLL_INTERVAL, LogFeed, LogFeedConfig, LogFilter, MAX_TOPIC_POSITIONS, TopicMatrix,
};
pub use robust_provider::raw::Block;
