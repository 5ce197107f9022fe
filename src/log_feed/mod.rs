//! Block-by-block log delivery on top of a [`RobustProvider`].
//!
//! A [`LogFeed`] walks heights in ascending order. For every height it fetches the block and the
//! logs matching the feed's address set and topic matrix, hands each log to a handler and then
//! signals the end of the block to a completion handler. It runs in one of two modes:
//!
//! * [`LogFeed::for_each_log`] walks continuously, waiting on the provider for blocks that are
//!   not mined yet. With an end block it is a bounded historical scan.
//! * [`LogFeed::for_each_log_polling`] wakes up on a fixed interval, asks for the chain tip and
//!   catches up to it. A block or log set the node reports as not found ends the current
//!   catch-up without failing; the same height is retried on the next tick.
//!
//! # Offset
//!
//! With a non-zero `offset` the cursor still advances one height at a time, but the block
//! fetched and the logs queried for cursor `h` are those of height `h - offset`. Heights
//! where `h < offset` have nothing to deliver and are skipped.
//!
//! # Progress
//!
//! The cursor is not persisted. [`LogFeed::progress`] publishes the last fully processed cursor
//! height so callers can store it and resume with [`LogFeedConfig::start_block`].

mod config;
mod filter;

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use alloy::{
    eips::BlockNumberOrTag,
    network::{Ethereum, Network},
    primitives::Address,
    rpc::types::Log,
};
use tokio::{
    sync::watch,
    time::{Instant, MissedTickBehavior, interval_at},
};
use tokio_util::{sync::CancellationToken, task::AbortOnDropHandle};

pub use config::LogFeedConfig;
pub use filter::{LogFilter, MAX_TOPIC_POSITIONS, TopicMatrix};

use crate::{
    FeedError,
    robust_provider::{Error as ProviderError, RobustProvider, raw::Block},
};

/// Tick used by [`LogFeed::poll_with_default_interval`].
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(12);

/// Streams the logs of consecutive blocks to caller handlers.
///
/// Cloning is cheap and clones share the address set, the progress channel and the
/// single-walker guard.
#[derive(Clone, Debug)]
pub struct LogFeed<N: Network = Ethereum> {
    inner: Arc<Inner<N>>,
}

#[derive(Debug)]
struct Inner<N: Network> {
    provider: RobustProvider<N>,
    filter: LogFilter,
    start_block: Option<u64>,
    end_block: Option<u64>,
    offset: u64,
    cancel: CancellationToken,
    progress: watch::Sender<Option<u64>>,
    running: AtomicBool,
}

/// How a walk over the current tip ended.
enum Walk {
    /// Every height up to the tip was delivered.
    CaughtUp,
    /// The end block was passed.
    Finished,
    /// The node did not have the data for this height yet.
    Stalled(u64),
}

struct WalkerGuard<N: Network>(Arc<Inner<N>>);

impl<N: Network> Drop for WalkerGuard<N> {
    fn drop(&mut self) {
        self.0.running.store(false, Ordering::Release);
    }
}

impl<N: Network> LogFeed<N> {
    /// Creates a feed over `provider`.
    ///
    /// Calls made by the feed observe the config's cancellation token, or a child of the
    /// provider's token when the config has none. Cancelling the provider stops the feed;
    /// cancelling the feed leaves the provider and other feeds on it running.
    ///
    /// # Errors
    ///
    /// * [`FeedError::NegativeOffset`] if `config.offset < 0`.
    /// * [`FeedError::InvalidAddress`], [`FeedError::InvalidTopic`] or
    ///   [`FeedError::TooManyTopics`] for a malformed filter.
    pub fn new(provider: RobustProvider<N>, config: LogFeedConfig) -> Result<Self, FeedError> {
        let offset =
            u64::try_from(config.offset).map_err(|_| FeedError::NegativeOffset(config.offset))?;
        let topics = TopicMatrix::from_wire(&config.topics)?;
        let filter = LogFilter::new(&config.addresses, topics)?;

        let cancel = config
            .cancellation_token
            .unwrap_or_else(|| provider.cancellation_token().child_token());
        let provider = provider.with_cancellation(cancel.clone());
        let (progress, _) = watch::channel(None);

        Ok(Self {
            inner: Arc::new(Inner {
                provider,
                filter,
                start_block: config.start_block,
                end_block: config.end_block,
                offset,
                cancel,
                progress,
                running: AtomicBool::new(false),
            }),
        })
    }

    /// Adds an address to the filter unless it is already present, ignoring letter case.
    ///
    /// Safe to call while a walk is running; the address applies from the next queried height.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::InvalidAddress`] for an address that does not parse.
    pub fn add_address(&self, address: &str) -> Result<bool, FeedError> {
        let added = self.inner.filter.add_address(address)?;
        if added {
            debug!(address = address, "Address added to log feed");
        }
        Ok(added)
    }

    /// Snapshot of the address set.
    #[must_use]
    pub fn addresses(&self) -> Vec<Address> {
        self.inner.filter.addresses()
    }

    #[must_use]
    pub fn topics(&self) -> &TopicMatrix {
        self.inner.filter.topics()
    }

    #[must_use]
    pub fn provider(&self) -> &RobustProvider<N> {
        &self.inner.provider
    }

    /// Receiver of the last fully processed cursor height, `None` until a block completes.
    #[must_use]
    pub fn progress(&self) -> watch::Receiver<Option<u64>> {
        self.inner.progress.subscribe()
    }

    /// Stops any running walk and pending call of this feed.
    pub fn cancel(&self) {
        self.inner.cancel.cancel();
    }

    /// Fetches the logs matching the filter in `start..=end`.
    ///
    /// # Errors
    ///
    /// See [retry errors](RobustProvider#retry-errors).
    pub async fn get_logs_for_range(&self, start: u64, end: u64) -> Result<Vec<Log>, FeedError> {
        let query = self.inner.filter.query(start, end);
        Ok(self.inner.provider.get_logs(&query).await?)
    }

    /// Fetches the logs matching the filter in the last `blocks_ago` blocks up to the tip,
    /// both ends inclusive.
    ///
    /// # Errors
    ///
    /// See [retry errors](RobustProvider#retry-errors).
    pub async fn get_logs_for_last_blocks(&self, blocks_ago: u64) -> Result<Vec<Log>, FeedError> {
        let tip = self.inner.provider.get_block_number().await?;
        self.get_logs_for_range(tip.saturating_sub(blocks_ago), tip).await
    }

    /// Walks heights from the start block (or the tip) and delivers every matching log.
    ///
    /// For each height, `handler` is called once per log in the order the node returned
    /// them, then `finish` is called once for the block. The walk runs on its own task and
    /// this future resolves when it ends: `Ok(())` after the end block, or the first error.
    /// Dropping the future aborts the walk.
    ///
    /// # Errors
    ///
    /// * [`FeedError::Handler`] if either handler fails.
    /// * [`FeedError::Provider`] if a chain call fails after retries or the feed is cancelled.
    /// * [`FeedError::AlreadyRunning`] if another walk of this feed is in progress.
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip_all))]
    pub async fn for_each_log<H, F, HE, FE>(&self, handler: H, finish: F) -> Result<(), FeedError>
    where
        H: FnMut(&Block, &Log) -> Result<(), HE> + Send + 'static,
        F: FnMut(&Block) -> Result<(), FE> + Send + 'static,
        HE: Into<Box<dyn std::error::Error + Send + Sync>> + 'static,
        FE: Into<Box<dyn std::error::Error + Send + Sync>> + 'static,
    {
        let guard = self.acquire()?;
        let inner = Arc::clone(&self.inner);

        let walker = AbortOnDropHandle::new(tokio::spawn(async move {
            inner.stream(handler, finish).await
        }));

        let result = walker.await?;
        drop(guard);
        log_outcome("streaming", &result);
        result
    }

    /// Polls the chain tip every `interval` and delivers the logs of every new height.
    ///
    /// The first tick fires one `interval` after the call. On each tick the feed catches up
    /// from its cursor to the current tip, calling `handler` and `finish` like
    /// [`for_each_log`](Self::for_each_log). A not-found reply for a block or its logs ends the
    /// catch-up, and that height is retried first on the next tick.
    ///
    /// # Errors
    ///
    /// * [`FeedError::InvalidPollInterval`] if `interval` is zero.
    /// * Otherwise as [`for_each_log`](Self::for_each_log).
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip_all))]
    pub async fn for_each_log_polling<H, F, HE, FE>(
        &self,
        interval: Duration,
        handler: H,
        finish: F,
    ) -> Result<(), FeedError>
    where
        H: FnMut(&Block, &Log) -> Result<(), HE> + Send + 'static,
        F: FnMut(&Block) -> Result<(), FE> + Send + 'static,
        HE: Into<Box<dyn std::error::Error + Send + Sync>> + 'static,
        FE: Into<Box<dyn std::error::Error + Send + Sync>> + 'static,
    {
        if interval.is_zero() {
            return Err(FeedError::InvalidPollInterval);
        }
        let guard = self.acquire()?;
        let inner = Arc::clone(&self.inner);

        let walker = AbortOnDropHandle::new(tokio::spawn(async move {
            inner.poll(interval, handler, finish).await
        }));

        let result = walker.await?;
        drop(guard);
        log_outcome("polling", &result);
        result
    }

    /// [`for_each_log_polling`](Self::for_each_log_polling) with [`DEFAULT_POLL_INTERVAL`].
    ///
    /// # Errors
    ///
    /// As [`for_each_log_polling`](Self::for_each_log_polling).
    pub async fn poll_with_default_interval<H, F, HE, FE>(
        &self,
        handler: H,
        finish: F,
    ) -> Result<(), FeedError>
    where
        H: FnMut(&Block, &Log) -> Result<(), HE> + Send + 'static,
        F: FnMut(&Block) -> Result<(), FE> + Send + 'static,
        HE: Into<Box<dyn std::error::Error + Send + Sync>> + 'static,
        FE: Into<Box<dyn std::error::Error + Send + Sync>> + 'static,
    {
        self.for_each_log_polling(DEFAULT_POLL_INTERVAL, handler, finish).await
    }

    fn acquire(&self) -> Result<WalkerGuard<N>, FeedError> {
        if self.inner.running.swap(true, Ordering::AcqRel) {
            return Err(FeedError::AlreadyRunning);
        }
        Ok(WalkerGuard(Arc::clone(&self.inner)))
    }
}

fn log_outcome(mode: &'static str, result: &Result<(), FeedError>) {
    match result {
        Ok(()) => info!(mode = mode, "Log feed completed (end block reached)"),
        Err(err) if err.is_cancelled() => info!(mode = mode, "Log feed cancelled"),
        Err(err) => error!(mode = mode, error = %err, "Log feed stopped"),
    }
}

impl<N: Network> Inner<N> {
    async fn stream<H, F, HE, FE>(&self, mut handler: H, mut finish: F) -> Result<(), FeedError>
    where
        H: FnMut(&Block, &Log) -> Result<(), HE>,
        F: FnMut(&Block) -> Result<(), FE>,
        HE: Into<Box<dyn std::error::Error + Send + Sync>>,
        FE: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let mut cursor = match self.start_block {
            Some(start) => start,
            None => self.provider.get_block_number().await?,
        };
        info!(
            cursor = cursor,
            end_block = ?self.end_block,
            offset = self.offset,
            addresses = ?self.filter.addresses(),
            "Streaming logs"
        );

        loop {
            if self.cancel.is_cancelled() {
                return Err(ProviderError::Cancelled.into());
            }
            if self.past_end(cursor) {
                return Ok(());
            }

            self.deliver(cursor, &mut handler, &mut finish).await?;
            self.progress.send_replace(Some(cursor));
            cursor += 1;
        }
    }

    async fn poll<H, F, HE, FE>(
        &self,
        period: Duration,
        mut handler: H,
        mut finish: F,
    ) -> Result<(), FeedError>
    where
        H: FnMut(&Block, &Log) -> Result<(), HE>,
        F: FnMut(&Block) -> Result<(), FE>,
        HE: Into<Box<dyn std::error::Error + Send + Sync>>,
        FE: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut cursor: Option<u64> = None;

        info!(
            start_block = ?self.start_block,
            end_block = ?self.end_block,
            offset = self.offset,
            interval_ms = period.as_millis(),
            "Polling logs"
        );

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Err(ProviderError::Cancelled.into()),
                _ = ticker.tick() => {}
            }

            if cursor.is_some_and(|c| self.past_end(c)) {
                return Ok(());
            }

            let tip = self.provider.get_block_number().await?;
            let from = *cursor.get_or_insert(self.start_block.unwrap_or(tip));
            if from > tip {
                trace!(cursor = from, tip = tip, "No new blocks");
                continue;
            }

            match self.catch_up(from, tip, &mut handler, &mut finish).await? {
                Walk::Finished => return Ok(()),
                Walk::CaughtUp => cursor = Some(tip + 1),
                Walk::Stalled(height) => cursor = Some(height),
            }
        }
    }

    async fn catch_up<H, F, HE, FE>(
        &self,
        from: u64,
        tip: u64,
        handler: &mut H,
        finish: &mut F,
    ) -> Result<Walk, FeedError>
    where
        H: FnMut(&Block, &Log) -> Result<(), HE>,
        F: FnMut(&Block) -> Result<(), FE>,
        HE: Into<Box<dyn std::error::Error + Send + Sync>>,
        FE: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        debug!(from = from, tip = tip, "Catching up to tip");
        for height in from..=tip {
            if self.past_end(height) {
                return Ok(Walk::Finished);
            }
            match self.deliver(height, handler, finish).await {
                Ok(()) => {
                    self.progress.send_replace(Some(height));
                }
                Err(FeedError::Provider(err))
                    if err.is_not_found() && !self.provider.classifier.is_permanent(&err) =>
                {
                    warn!(height = height, error = %err, "Data not available, retrying next tick");
                    return Ok(Walk::Stalled(height));
                }
                Err(err) => return Err(err),
            }
        }
        if self.past_end(tip + 1) {
            return Ok(Walk::Finished);
        }
        Ok(Walk::CaughtUp)
    }

    /// Delivers the logs of the height `offset` blocks behind `cursor`.
    async fn deliver<H, F, HE, FE>(
        &self,
        cursor: u64,
        handler: &mut H,
        finish: &mut F,
    ) -> Result<(), FeedError>
    where
        H: FnMut(&Block, &Log) -> Result<(), HE>,
        F: FnMut(&Block) -> Result<(), FE>,
        HE: Into<Box<dyn std::error::Error + Send + Sync>>,
        FE: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let Some(height) = cursor.checked_sub(self.offset) else {
            trace!(cursor = cursor, offset = self.offset, "Cursor below offset, skipping");
            return Ok(());
        };

        let block = self.provider.get_block_by_number_raw(BlockNumberOrTag::Number(height)).await?;
        let logs = self.provider.get_logs(&self.filter.query(height, height)).await?;
        trace!(cursor = cursor, height = height, logs = logs.len(), "Delivering block");

        for log in &logs {
            handler(&block, log).map_err(FeedError::handler)?;
        }
        finish(&block).map_err(FeedError::handler)?;
        Ok(())
    }

    fn past_end(&self, height: u64) -> bool {
        self.end_block.is_some_and(|end| height > end)
    }
}
