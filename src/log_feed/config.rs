use tokio_util::sync::CancellationToken;

/// Configuration of a [`LogFeed`](super::LogFeed).
///
/// Addresses and topics are given in their hex wire form and validated when the feed is
/// created. Each inner vector of `topics` is one position of the topic matrix: a log matches a
/// position if its topic equals any entry, and an empty position matches everything.
#[derive(Clone, Debug, Default)]
pub struct LogFeedConfig {
    pub topics: Vec<Vec<String>>,
    pub addresses: Vec<String>,
    /// First height to process. When unset the feed starts at the chain tip.
    pub start_block: Option<u64>,
    /// Last height to process, inclusive. When unset the feed never finishes on its own.
    pub end_block: Option<u64>,
    /// Number of blocks the processed height lags behind the cursor.
    pub offset: i64,
    /// Token that stops the feed. Defaults to the provider's token.
    pub cancellation_token: Option<CancellationToken>,
}

impl LogFeedConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one topic position.
    #[must_use]
    pub fn topic<I, S>(mut self, alternatives: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.topics.push(alternatives.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.addresses.push(address.into());
        self
    }

    #[must_use]
    pub fn start_block(mut self, block: u64) -> Self {
        self.start_block = Some(block);
        self
    }

    #[must_use]
    pub fn end_block(mut self, block: u64) -> Self {
        self.end_block = Some(block);
        self
    }

    #[must_use]
    pub fn offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }

    #[must_use]
    pub fn cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = Some(token);
        self
    }
}
