use std::sync::Arc;

use thiserror::Error;
use tokio::task::JoinError;

use crate::robust_provider::Error as ProviderError;

/// Error produced by a caller-supplied log or block handler.
pub type HandlerError = Arc<dyn std::error::Error + Send + Sync>;

/// Errors emitted by a [`LogFeed`](crate::LogFeed).
///
/// Construction errors are returned by [`LogFeed::new`](crate::LogFeed::new). Every error
/// returned by a running feed is terminal: the walk stops and the cursor stays at the last
/// fully processed block.
#[derive(Error, Debug, Clone)]
pub enum FeedError {
    /// A chain call failed after the provider's retries.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// A log or block handler returned an error.
    #[error("Handler failed: {0}")]
    Handler(HandlerError),

    /// The configured finality offset is negative.
    #[error("Offset cannot be below zero: offset={0}")]
    NegativeOffset(i64),

    /// An address could not be parsed.
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// A topic could not be parsed as a 32-byte hash.
    #[error("Invalid topic: {0}")]
    InvalidTopic(String),

    /// More topic positions than the four an EVM log can carry.
    #[error("At most 4 topic positions are supported, got {0}")]
    TooManyTopics(usize),

    /// The polling interval must be greater than zero.
    #[error("Poll interval must be greater than 0")]
    InvalidPollInterval,

    /// Another walk of the same feed is still running.
    #[error("Log feed is already running")]
    AlreadyRunning,

    /// The walker task panicked or was aborted.
    #[error("Log feed walker failed: {0}")]
    Walker(Arc<JoinError>),
}

impl FeedError {
    pub(crate) fn handler<E>(err: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        FeedError::Handler(Arc::from(err.into()))
    }

    /// Returns `true` if the feed stopped because it was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, FeedError::Provider(err) if err.is_cancelled())
    }

    /// Returns `true` if the feed stopped on chain data that is not available yet.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, FeedError::Provider(err) if err.is_not_found())
    }
}

impl From<JoinError> for FeedError {
    fn from(err: JoinError) -> Self {
        FeedError::Walker(Arc::new(err))
    }
}

impl From<alloy::transports::RpcError<alloy::transports::TransportErrorKind>> for FeedError {
    fn from(err: alloy::transports::RpcError<alloy::transports::TransportErrorKind>) -> Self {
        FeedError::Provider(err.into())
    }
}
