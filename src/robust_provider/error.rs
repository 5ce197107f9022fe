use std::sync::Arc;

use alloy::{
    eips::BlockId,
    primitives::TxHash,
    transports::{RpcError, TransportErrorKind},
};
use thiserror::Error;
use tokio::time::error::Elapsed;

/// Errors returned by [`RobustProvider`](super::RobustProvider) operations.
///
/// The value is cheap to clone: transport and decode sources are shared behind an [`Arc`].
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// A single attempt exceeded the per-attempt timeout.
    #[error("Operation timed out")]
    Timeout,

    /// The underlying RPC transport returned an error.
    #[error("RPC error: {0}")]
    RpcError(Arc<RpcError<TransportErrorKind>>),

    /// The node returned no block (or a block with an empty hash) for the given id.
    #[error("Block not found, Block Id: {0}")]
    BlockNotFound(BlockId),

    /// The node returned no receipt (or a receipt with an empty hash) for the transaction.
    #[error("Receipt not found, tx hash: {0}")]
    ReceiptNotFound(TxHash),

    /// The call was cancelled through its cancellation token.
    #[error("Operation cancelled")]
    Cancelled,

    /// The caller passed a block selector the node would not understand.
    #[error("Invalid block selector: {0}")]
    InvalidBlockSelector(String),

    /// A response was received but could not be decoded into the requested shape.
    #[error("Failed to decode {0} response: {1}")]
    Decode(&'static str, Arc<serde_json::Error>),

    /// The provider ring has been closed.
    #[error("Provider is closed")]
    Closed,

    /// The provider was built without any endpoint.
    #[error("At least one endpoint is required")]
    NoEndpoints,
}

impl Error {
    /// Returns `true` if the error means the requested chain data is not (yet) available.
    ///
    /// Besides the dedicated variants, node replies whose message contains `not found` count too.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::BlockNotFound(_) | Error::ReceiptNotFound(_) => true,
            Error::RpcError(err) => err.to_string().to_lowercase().contains("not found"),
            _ => false,
        }
    }

    /// Returns `true` if the error was caused by cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// Returns `false` for errors that no amount of retrying can fix.
    ///
    /// Classifier-driven permanence is decided separately by the retry loop.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Cancelled |
            Error::InvalidBlockSelector(_) |
            Error::Decode(..) |
            Error::Closed |
            Error::NoEndpoints => false,
            Error::RpcError(err) => !matches!(
                err.as_ref(),
                RpcError::DeserError { .. } |
                    RpcError::SerError(_) |
                    RpcError::UnsupportedFeature(_)
            ),
            Error::Timeout | Error::BlockNotFound(_) | Error::ReceiptNotFound(_) => true,
        }
    }
}

impl From<RpcError<TransportErrorKind>> for Error {
    fn from(err: RpcError<TransportErrorKind>) -> Self {
        Error::RpcError(Arc::new(err))
    }
}

impl From<Elapsed> for Error {
    fn from(_: Elapsed) -> Self {
        Error::Timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::eips::BlockNumberOrTag;

    #[test]
    fn not_found_covers_variants_and_node_messages() {
        assert!(Error::BlockNotFound(BlockNumberOrTag::Number(7).into()).is_not_found());
        assert!(Error::ReceiptNotFound(TxHash::ZERO).is_not_found());

        let node: Error = TransportErrorKind::custom_str("header for hash not found").into();
        assert!(node.is_not_found());

        let other: Error = TransportErrorKind::custom_str("connection reset").into();
        assert!(!other.is_not_found());
        assert!(!Error::Timeout.is_not_found());
    }

    #[test]
    fn usage_and_decode_errors_are_not_retryable() {
        assert!(!Error::InvalidBlockSelector("soon".into()).is_retryable());
        assert!(!Error::Cancelled.is_retryable());
        assert!(!Error::Closed.is_retryable());

        let decode = serde_json::from_str::<u64>("\"x\"").unwrap_err();
        assert!(!Error::Decode("block", Arc::new(decode)).is_retryable());

        assert!(Error::Timeout.is_retryable());
        assert!(Error::BlockNotFound(BlockNumberOrTag::Latest.into()).is_retryable());
        let transient: Error = TransportErrorKind::backend_gone().into();
        assert!(transient.is_retryable());
    }
}
