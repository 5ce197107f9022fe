//! Loosely typed block fetches.
//!
//! Nodes of different chains and clients disagree on block and transaction fields. The DTOs in
//! this module keep numeric fields as the hex strings the node sent and only require the
//! handful of fields every EVM node returns, so a rollup block decodes as well as an Ethereum
//! one.

use std::{fmt, sync::Arc};

use alloy::{
    eips::{BlockId, BlockNumberOrTag},
    network::Network,
    primitives::{B256, BlockHash},
    providers::Provider,
};
use serde::{Deserialize, Deserializer, Serialize, Serializer, de::DeserializeOwned};

use crate::robust_provider::{Error, RobustProvider};

/// Block as returned by `eth_getBlockBy*` with full transactions.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub hash: String,
    pub number: String,
    pub parent_hash: String,
    pub timestamp: String,
    #[serde(default)]
    pub base_fee_per_gas: Option<String>,
    #[serde(default)]
    pub blob_gas_used: Option<String>,
    #[serde(default)]
    pub difficulty: Option<String>,
    #[serde(default)]
    pub excess_blob_gas: Option<String>,
    #[serde(default)]
    pub extra_data: Option<String>,
    #[serde(default)]
    pub gas_limit: Option<String>,
    #[serde(default)]
    pub gas_used: Option<String>,
    #[serde(default)]
    pub logs_bloom: Option<String>,
    #[serde(default)]
    pub miner: Option<String>,
    #[serde(default)]
    pub mix_hash: Option<String>,
    #[serde(default)]
    pub nonce: Option<String>,
    #[serde(default)]
    pub parent_beacon_block_root: Option<String>,
    #[serde(default)]
    pub receipts_root: Option<String>,
    #[serde(default)]
    pub sha3_uncles: Option<String>,
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub state_root: Option<String>,
    #[serde(default)]
    pub total_difficulty: Option<String>,
    #[serde(default)]
    pub transactions: Vec<Transaction>,
    #[serde(default)]
    pub transactions_root: Option<String>,
    #[serde(default)]
    pub uncles: Vec<String>,
    #[serde(default)]
    pub withdrawals: Vec<Withdrawal>,
    #[serde(default)]
    pub withdrawals_root: Option<String>,
}

impl Block {
    /// Block height decoded from its hex representation.
    #[must_use]
    pub fn number_u64(&self) -> Option<u64> {
        parse_hex_u64(&self.number)
    }

    /// Block timestamp in seconds.
    #[must_use]
    pub fn timestamp_u64(&self) -> Option<u64> {
        parse_hex_u64(&self.timestamp)
    }
}

/// Transaction as embedded in a full [`Block`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub hash: String,
    #[serde(default)]
    pub block_hash: Option<String>,
    #[serde(default)]
    pub block_number: Option<String>,
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub gas: Option<String>,
    #[serde(default)]
    pub gas_price: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_priority_fee_per_gas: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_fee_per_gas: Option<String>,
    #[serde(default)]
    pub input: Option<String>,
    #[serde(default)]
    pub nonce: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub transaction_index: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(rename = "type", default)]
    pub tx_type: TxType,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub access_list: Vec<AccessListItem>,
    #[serde(default)]
    pub chain_id: Option<String>,
    #[serde(default)]
    pub v: Option<String>,
    #[serde(default)]
    pub r: Option<String>,
    #[serde(default)]
    pub s: Option<String>,
    #[serde(default)]
    pub y_parity: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessListItem {
    pub address: String,
    #[serde(default)]
    pub storage_keys: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Withdrawal {
    pub index: String,
    pub validator_index: String,
    pub address: String,
    pub amount: String,
}

/// Transaction type tag, carried on the wire as a hex quantity such as `"0x7e"`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TxType(pub u64);

impl TxType {
    pub const LEGACY: TxType = TxType(0x00);
    pub const ACCESS_LIST: TxType = TxType(0x01);
    pub const DYNAMIC_FEE: TxType = TxType(0x02);
    pub const BLOB: TxType = TxType(0x03);
    pub const SET_CODE: TxType = TxType(0x04);

    pub const OPTIMISM_DEPOSIT: TxType = TxType(0x7E);

    pub const ARBITRUM_DEPOSIT: TxType = TxType(0x64);
    pub const ARBITRUM_UNSIGNED: TxType = TxType(0x65);
    pub const ARBITRUM_CONTRACT: TxType = TxType(0x66);
    pub const ARBITRUM_RETRY: TxType = TxType(0x68);
    pub const ARBITRUM_SUBMIT_RETRYABLE: TxType = TxType(0x69);
    pub const ARBITRUM_INTERNAL: TxType = TxType(0x6A);
    pub const ARBITRUM_LEGACY: TxType = TxType(0x78);

    /// Human readable name, `unknownTx` for tags this crate does not know.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            TxType::LEGACY => "legacyTx",
            TxType::ACCESS_LIST => "accessListTx",
            TxType::DYNAMIC_FEE => "dynamicFeeTx",
            TxType::BLOB => "blobTx",
            TxType::SET_CODE => "setCodeTx",
            TxType::OPTIMISM_DEPOSIT => "optimismDepositTx",
            TxType::ARBITRUM_DEPOSIT => "arbitrumDepositTx",
            TxType::ARBITRUM_UNSIGNED => "arbitrumUnsignedTx",
            TxType::ARBITRUM_CONTRACT => "arbitrumContractTx",
            TxType::ARBITRUM_RETRY => "arbitrumRetryTx",
            TxType::ARBITRUM_SUBMIT_RETRYABLE => "arbitrumSubmitRetryableTx",
            TxType::ARBITRUM_INTERNAL => "arbitrumInternalTx",
            TxType::ARBITRUM_LEGACY => "arbitrumLegacyTx",
            _ => "unknownTx",
        }
    }
}

impl fmt::Display for TxType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for TxType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{:#x}", self.0))
    }
}

impl<'de> Deserialize<'de> for TxType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse_hex_u64(&raw)
            .map(TxType)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid tx type: {raw}")))
    }
}

/// Transaction subset returned by [`RobustProvider::get_block_transactions`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockTx {
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub nonce: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub input: Option<String>,
    pub hash: String,
    #[serde(rename = "type", default)]
    pub tx_type: TxType,
}

#[derive(Deserialize)]
struct BlockTransactions {
    #[serde(default)]
    transactions: Vec<BlockTx>,
}

fn parse_hex_u64(raw: &str) -> Option<u64> {
    let digits = raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X"))?;
    if digits.is_empty() {
        return Some(0);
    }
    u64::from_str_radix(digits, 16).ok()
}

/// `true` when the node answered with a block object that has a real hash.
fn has_block_hash(value: &serde_json::Value) -> bool {
    value
        .get("hash")
        .and_then(serde_json::Value::as_str)
        .and_then(|h| h.parse::<B256>().ok())
        .is_some_and(|h| !h.is_zero())
}

fn decode<T: DeserializeOwned>(what: &'static str, value: serde_json::Value) -> Result<T, Error> {
    serde_json::from_value(value).map_err(|err| {
        error!(what = what, error = %err, "Failed to decode response");
        Error::Decode(what, Arc::new(err))
    })
}

impl<N: Network> RobustProvider<N> {
    /// Fetch a block with full transactions as a loosely typed [`Block`].
    ///
    /// An absent block or an empty hash is retried at the retry interval until the not-found
    /// budget runs out. Decoding happens once the node has answered, so a malformed block is
    /// reported immediately as [`Error::Decode`].
    ///
    /// # Errors
    ///
    /// See [retry errors](Self#retry-errors).
    pub async fn get_block_by_number_raw(&self, number: BlockNumberOrTag) -> Result<Block, Error> {
        let value = self.fetch_block_value(number.into(), self.block_availability_policy()).await?;
        decode("block", value)
    }

    /// Fetch a block by hash as a loosely typed [`Block`].
    ///
    /// # Errors
    ///
    /// See [retry errors](Self#retry-errors).
    pub async fn get_block_by_hash_raw(&self, hash: BlockHash) -> Result<Block, Error> {
        let value = self.fetch_block_value(hash.into(), self.not_found_policy).await?;
        decode("block", value)
    }

    /// Fetch the transactions of a block as [`BlockTx`] values, in block order.
    ///
    /// # Errors
    ///
    /// See [retry errors](Self#retry-errors).
    pub async fn get_block_transactions(
        &self,
        number: BlockNumberOrTag,
    ) -> Result<Vec<BlockTx>, Error> {
        let value = self.fetch_block_value(number.into(), self.block_availability_policy()).await?;
        let block: BlockTransactions = decode("block transactions", value)?;
        Ok(block.transactions)
    }

    async fn fetch_block_value(
        &self,
        id: BlockId,
        policy: crate::robust_provider::RetryPolicy,
    ) -> Result<serde_json::Value, Error> {
        let method = match id {
            BlockId::Hash(_) => "eth_getBlockByHash",
            BlockId::Number(_) => "eth_getBlockByNumber",
        };

        self.retry(method, policy, move |provider| async move {
            let value: serde_json::Value = match id {
                BlockId::Hash(hash) => {
                    provider.raw_request(method.into(), (hash.block_hash, true)).await?
                }
                BlockId::Number(number) => {
                    provider.raw_request(method.into(), (number, true)).await?
                }
            };
            if has_block_hash(&value) { Ok(value) } else { Err(Error::BlockNotFound(id)) }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::robust_provider::{Endpoint, RetryPolicy};
    use alloy::{
        providers::{RootProvider, mock::Asserter},
        rpc::client::RpcClient,
    };
    use serde_json::json;
    use std::time::Duration;

    fn mocked(asserter: Asserter) -> RobustProvider {
        let endpoint = Endpoint::new("node", RootProvider::new(RpcClient::mocked(asserter)));
        let provider =
            RobustProvider::from_endpoints(vec![endpoint], RetryPolicy::default()).unwrap();
        provider.set_retry_interval(Duration::from_millis(1));
        provider
    }

    fn raw_block(number: u64, hash: &str) -> serde_json::Value {
        json!({
            "hash": hash,
            "number": format!("{number:#x}"),
            "parentHash": format!("{:#066x}", 0),
            "timestamp": "0x65f0a1b2",
            "baseFeePerGas": "0x7",
            "transactions": [{
                "hash": format!("{:#066x}", 0xaa),
                "from": "0x0000000000000000000000000000000000000001",
                "type": "0x7e",
                "nonce": "0x0"
            }]
        })
    }

    #[test]
    fn tx_type_round_trips_hex_form() {
        let ty: TxType = serde_json::from_str("\"0x7e\"").unwrap();
        assert_eq!(ty, TxType::OPTIMISM_DEPOSIT);
        assert_eq!(ty.to_string(), "optimismDepositTx");
        assert_eq!(serde_json::to_string(&ty).unwrap(), "\"0x7e\"");

        assert_eq!(serde_json::to_string(&TxType::LEGACY).unwrap(), "\"0x0\"");
        assert_eq!(TxType(0x99).name(), "unknownTx");
        assert!(serde_json::from_str::<TxType>("\"seven\"").is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn raw_block_waits_for_a_real_hash() -> anyhow::Result<()> {
        let asserter = Asserter::new();
        asserter.push_success(&serde_json::Value::Null);
        asserter.push_success(&raw_block(100, &format!("{:#066x}", 0)));
        asserter.push_success(&raw_block(100, &format!("{:#066x}", 0xbeef)));
        let provider = mocked(asserter);

        let block = provider.get_block_by_number_raw(BlockNumberOrTag::Number(100)).await?;

        assert_eq!(block.number_u64(), Some(100));
        assert_eq!(block.transactions.len(), 1);
        assert_eq!(block.transactions[0].tx_type, TxType::OPTIMISM_DEPOSIT);
        Ok(())
    }

    #[tokio::test]
    async fn malformed_block_is_a_decode_error() {
        let asserter = Asserter::new();
        asserter.push_success(&json!({ "hash": format!("{:#066x}", 1), "number": 5 }));
        let provider = mocked(asserter);

        let result = provider.get_block_by_number_raw(BlockNumberOrTag::Number(5)).await;

        assert!(matches!(result, Err(Error::Decode("block", _))));
    }

    #[tokio::test]
    async fn block_transactions_are_returned_in_order() -> anyhow::Result<()> {
        let asserter = Asserter::new();
        asserter.push_success(&json!({
            "hash": format!("{:#066x}", 3),
            "transactions": [
                { "hash": "0x01", "from": "0xa", "type": "0x2" },
                { "hash": "0x02", "from": "0xb", "type": "0x0" }
            ]
        }));
        let provider = mocked(asserter);

        let txs = provider.get_block_transactions(BlockNumberOrTag::Number(3)).await?;

        assert_eq!(txs.iter().map(|t| t.hash.as_str()).collect::<Vec<_>>(), ["0x01", "0x02"]);
        assert_eq!(txs[0].tx_type, TxType::DYNAMIC_FEE);
        Ok(())
    }

    #[tokio::test]
    async fn empty_hash_gives_up_as_not_found() {
        let asserter = Asserter::new();
        asserter.push_success(&json!({ "hash": "" }));
        let provider = mocked(asserter);
        let provider = RobustProvider {
            not_found_policy: provider.not_found_policy.max_elapsed_time(Duration::ZERO),
            ..provider
        };

        let result = provider.get_block_by_number_raw(BlockNumberOrTag::Number(1)).await;

        assert!(matches!(result, Err(ref e) if e.is_not_found()));
    }
}
