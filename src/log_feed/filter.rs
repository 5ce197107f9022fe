use std::sync::{PoisonError, RwLock};

use alloy::{
    primitives::{Address, B256},
    rpc::types::Filter,
};

use crate::FeedError;

/// Maximum number of indexed topic positions of an EVM log.
pub const MAX_TOPIC_POSITIONS: usize = 4;

/// Positional OR-groups of topics.
///
/// Position `i` matches a log whose `i`-th topic equals any hash of the group. An empty group
/// matches any topic.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TopicMatrix(Vec<Vec<B256>>);

impl TopicMatrix {
    /// Parses the hex wire form, one inner vector per position.
    ///
    /// # Errors
    ///
    /// * [`FeedError::TooManyTopics`] for more than [`MAX_TOPIC_POSITIONS`] positions.
    /// * [`FeedError::InvalidTopic`] for a string that is not a 32-byte hex hash.
    pub fn from_wire<P, S>(positions: &[P]) -> Result<Self, FeedError>
    where
        P: AsRef<[S]>,
        S: AsRef<str>,
    {
        if positions.len() > MAX_TOPIC_POSITIONS {
            return Err(FeedError::TooManyTopics(positions.len()));
        }
        positions
            .iter()
            .map(|group| {
                group
                    .as_ref()
                    .iter()
                    .map(|topic| {
                        let topic = topic.as_ref();
                        topic.parse::<B256>().map_err(|_| FeedError::InvalidTopic(topic.to_owned()))
                    })
                    .collect::<Result<Vec<_>, _>>()
            })
            .collect::<Result<Vec<_>, _>>()
            .map(TopicMatrix)
    }

    /// Renders the matrix back into its hex wire form, keeping the order of every position.
    #[must_use]
    pub fn to_wire(&self) -> Vec<Vec<String>> {
        self.0.iter().map(|group| group.iter().map(ToString::to_string).collect()).collect()
    }

    #[must_use]
    pub fn positions(&self) -> &[Vec<B256>] {
        &self.0
    }
}

/// Address set and topic matrix applied to every log query of a feed.
///
/// The address set may grow while a walk is running. Each query takes a snapshot, so a newly
/// added address applies from the next queried height on. The topic matrix never changes.
#[derive(Debug)]
pub struct LogFilter {
    addresses: RwLock<Vec<Address>>,
    topics: TopicMatrix,
}

impl LogFilter {
    /// # Errors
    ///
    /// Returns [`FeedError::InvalidAddress`] for an address that does not parse.
    pub fn new<S: AsRef<str>>(addresses: &[S], topics: TopicMatrix) -> Result<Self, FeedError> {
        let filter = Self { addresses: RwLock::new(Vec::with_capacity(addresses.len())), topics };
        for address in addresses {
            filter.add_address(address.as_ref())?;
        }
        Ok(filter)
    }

    /// Adds `address` unless it is already present, ignoring letter case.
    ///
    /// Returns `true` if the address was added.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::InvalidAddress`] for an address that does not parse.
    pub fn add_address(&self, address: &str) -> Result<bool, FeedError> {
        let parsed = parse_address(address)?;
        let mut addresses = self.addresses.write().unwrap_or_else(PoisonError::into_inner);
        if addresses.contains(&parsed) {
            return Ok(false);
        }
        addresses.push(parsed);
        Ok(true)
    }

    /// Snapshot of the current address set, in insertion order.
    #[must_use]
    pub fn addresses(&self) -> Vec<Address> {
        self.addresses.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    #[must_use]
    pub fn topics(&self) -> &TopicMatrix {
        &self.topics
    }

    /// Builds the `eth_getLogs` filter for `from..=to` with the current address set.
    #[must_use]
    pub fn query(&self, from: u64, to: u64) -> Filter {
        let mut filter = Filter::new().from_block(from).to_block(to).address(self.addresses());
        for (slot, group) in filter.topics.iter_mut().zip(self.topics.positions()) {
            *slot = group.clone().into();
        }
        filter
    }
}

/// Parses an address case-insensitively; mixed-case input is not checksum-validated.
fn parse_address(raw: &str) -> Result<Address, FeedError> {
    raw.trim()
        .to_ascii_lowercase()
        .parse::<Address>()
        .map_err(|_| FeedError::InvalidAddress(raw.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;

    const TRANSFER: &str = "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";
    const APPROVAL: &str = "0x8c5be1e5ebec7d5bd14f71427d1e84f3dd0314c0f7b2291e5b200ac8c7c3b925";
    const HOLDER: &str = "0x000000000000000000000000000000000000000000000000000000000000beef";

    #[test]
    fn topic_matrix_round_trips_in_order() {
        let wire = vec![vec![APPROVAL.to_string(), TRANSFER.to_string()], vec![], vec![
            HOLDER.to_string(),
        ]];

        let matrix = TopicMatrix::from_wire(&wire).unwrap();

        assert_eq!(matrix.to_wire(), wire);
        assert_eq!(TopicMatrix::from_wire(&matrix.to_wire()).unwrap(), matrix);
    }

    #[test]
    fn topic_matrix_rejects_bad_input() {
        let five = vec![Vec::<String>::new(); 5];
        assert!(matches!(TopicMatrix::from_wire(&five), Err(FeedError::TooManyTopics(5))));

        let bad = vec![vec!["0x1234"]];
        assert!(matches!(
            TopicMatrix::from_wire(&bad),
            Err(FeedError::InvalidTopic(t)) if t == "0x1234"
        ));
    }

    #[test]
    fn addresses_are_deduplicated_ignoring_case() {
        let filter = LogFilter::new::<&str>(&[], TopicMatrix::default()).unwrap();

        assert!(filter.add_address("0xAbCdEf0000000000000000000000000000000001").unwrap());
        assert!(!filter.add_address("0xabcdef0000000000000000000000000000000001").unwrap());
        assert!(!filter.add_address("0xABCDEF0000000000000000000000000000000001").unwrap());

        assert_eq!(filter.addresses(), vec![address!("abcdef0000000000000000000000000000000001")]);
        assert!(matches!(filter.add_address("0xnope"), Err(FeedError::InvalidAddress(_))));
    }

    #[test]
    fn query_covers_exactly_the_requested_range() {
        let topics = TopicMatrix::from_wire(&[vec![TRANSFER], vec![]]).unwrap();
        let filter =
            LogFilter::new(&["0x0000000000000000000000000000000000000001"], topics).unwrap();
        filter.add_address("0x0000000000000000000000000000000000000002").unwrap();

        let query = filter.query(10, 20);

        assert_eq!(query.get_from_block(), Some(10));
        assert_eq!(query.get_to_block(), Some(20));
        assert_eq!(query.address.len(), 2);
        let first: Vec<B256> = query.topics[0].iter().copied().collect();
        assert_eq!(first, vec![TRANSFER.parse::<B256>().unwrap()]);
        assert!(query.topics[1].is_empty());
        assert!(query.topics[2].is_empty());
    }
}
