//! `debug_trace*` calls.
//!
//! The tracer and its configuration are passed through to the node untouched and the response
//! is decoded into whatever type the caller asks for. [`TracedCall`] and [`TracedBlock`] cover
//! the common `callTracer` shape.

use std::{collections::BTreeMap, fmt, str::FromStr};

use alloy::{
    eips::{BlockId, BlockNumberOrTag},
    network::Network,
    primitives::{Address, B256, Bytes, TxHash, U256},
    providers::Provider,
    rpc::json_rpc::RpcRecv,
};
use serde::{Deserialize, Serialize};

use crate::robust_provider::{Error, RobustProvider};

/// Tracer selection for `debug_trace*` calls.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceCallConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracer_config: Option<TracerConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_overrides: Option<BTreeMap<String, serde_json::Value>>,
}

impl TraceCallConfig {
    /// `callTracer` with the given options.
    #[must_use]
    pub fn call_tracer(with_log: bool, only_top_call: bool) -> Self {
        Self {
            tracer: Some("callTracer".into()),
            tracer_config: Some(TracerConfig { with_log, only_top_call }),
            state_overrides: None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TracerConfig {
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub with_log: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub only_top_call: bool,
}

/// One frame of a `callTracer` result.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TracedCall {
    pub from: Address,
    #[serde(default)]
    pub to: Option<Address>,
    #[serde(rename = "type")]
    pub call_type: String,
    #[serde(default)]
    pub gas_used: Option<U256>,
    #[serde(default)]
    pub input: Bytes,
    #[serde(default)]
    pub output: Option<Bytes>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub calls: Vec<TracedCall>,
    #[serde(default)]
    pub logs: Vec<TracedLog>,
    #[serde(default)]
    pub value: Option<U256>,
}

/// A log emitted inside a traced call.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TracedLog {
    #[serde(default)]
    pub index: u64,
    pub address: Address,
    #[serde(default)]
    pub topics: Vec<B256>,
    #[serde(default)]
    pub data: Bytes,
}

/// Per-transaction entry of a `debug_traceBlockByNumber` result.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockTraceTx {
    #[serde(default)]
    pub tx_hash: Option<TxHash>,
    #[serde(default)]
    pub result: Option<TracedCall>,
}

pub type TracedBlock = Vec<BlockTraceTx>;

/// Block argument of a trace call: a named tag or number string, or a typed [`BlockId`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BlockSelector {
    Tag(String),
    Id(BlockId),
}

impl BlockSelector {
    /// Checks that the node will understand the selector.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidBlockSelector`] if a tag is neither a known block tag nor a
    /// block number.
    pub fn validate(&self) -> Result<(), Error> {
        match self {
            BlockSelector::Id(_) => Ok(()),
            BlockSelector::Tag(tag) => BlockNumberOrTag::from_str(tag)
                .map(|_| ())
                .map_err(|_| Error::InvalidBlockSelector(tag.clone())),
        }
    }
}

impl fmt::Display for BlockSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockSelector::Tag(tag) => f.write_str(tag),
            BlockSelector::Id(id) => write!(f, "{id}"),
        }
    }
}

impl Serialize for BlockSelector {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            BlockSelector::Tag(tag) => serializer.serialize_str(tag),
            BlockSelector::Id(id) => id.serialize(serializer),
        }
    }
}

impl From<&str> for BlockSelector {
    fn from(tag: &str) -> Self {
        BlockSelector::Tag(tag.to_owned())
    }
}

impl From<String> for BlockSelector {
    fn from(tag: String) -> Self {
        BlockSelector::Tag(tag)
    }
}

impl From<BlockId> for BlockSelector {
    fn from(id: BlockId) -> Self {
        BlockSelector::Id(id)
    }
}

impl From<BlockNumberOrTag> for BlockSelector {
    fn from(number: BlockNumberOrTag) -> Self {
        BlockSelector::Id(number.into())
    }
}

impl<N: Network> RobustProvider<N> {
    /// Simulate `tx` on top of `block` and return the tracer output.
    ///
    /// The selector is validated before any request is sent.
    ///
    /// # Errors
    ///
    /// * [`Error::InvalidBlockSelector`] for an unparseable block tag.
    /// * Otherwise see [retry errors](Self#retry-errors).
    pub async fn debug_trace_call<R: RpcRecv>(
        &self,
        tx: &N::TransactionRequest,
        block: impl Into<BlockSelector>,
        config: &TraceCallConfig,
    ) -> Result<R, Error> {
        let block = block.into();
        if let Err(err) = block.validate() {
            error!(method = "debug_traceCall", error = %err, "Rejected trace call");
            return Err(err);
        }

        self.retry("debug_traceCall", self.trace_policy(), move |provider| {
            let params = (tx.clone(), block.clone(), config.clone());
            async move { provider.raw_request::<_, R>("debug_traceCall".into(), params).await }
        })
        .await
    }

    /// Re-execute a mined transaction and return the tracer output.
    ///
    /// # Errors
    ///
    /// See [retry errors](Self#retry-errors).
    pub async fn debug_trace_transaction<R: RpcRecv>(
        &self,
        hash: TxHash,
        config: &TraceCallConfig,
    ) -> Result<R, Error> {
        self.retry("debug_traceTransaction", self.trace_policy(), move |provider| {
            let params = (hash, config.clone());
            async move {
                provider.raw_request::<_, R>("debug_traceTransaction".into(), params).await
            }
        })
        .await
    }

    /// Trace every transaction of a block. `BlockNumberOrTag::Latest` traces the tip.
    ///
    /// # Errors
    ///
    /// See [retry errors](Self#retry-errors).
    pub async fn debug_trace_block_by_number<R: RpcRecv>(
        &self,
        number: BlockNumberOrTag,
        config: &TraceCallConfig,
    ) -> Result<R, Error> {
        self.retry("debug_traceBlockByNumber", self.trace_policy(), move |provider| {
            let params = (number, config.clone());
            async move {
                provider.raw_request::<_, R>("debug_traceBlockByNumber".into(), params).await
            }
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
        rpc::{client::RpcClient, types::TransactionRequest},
    };
    use serde_json::json;

    fn mocked(asserter: Asserter) -> RobustProvider {
        let endpoint = Endpoint::new("node", RootProvider::new(RpcClient::mocked(asserter)));
        RobustProvider::from_endpoints(vec![endpoint], RetryPolicy::default()).unwrap()
    }

    #[test]
    fn trace_config_uses_node_field_names() {
        let config = TraceCallConfig::call_tracer(true, false);
        assert_eq!(
            serde_json::to_value(&config).unwrap(),
            json!({ "tracer": "callTracer", "tracerConfig": { "withLog": true } })
        );
        assert_eq!(serde_json::to_value(TraceCallConfig::default()).unwrap(), json!({}));
    }

    #[test]
    fn selectors_validate_tags() {
        assert!(BlockSelector::from("latest").validate().is_ok());
        assert!(BlockSelector::from("0x10").validate().is_ok());
        assert!(BlockSelector::from(BlockNumberOrTag::Safe).validate().is_ok());
        assert!(matches!(
            BlockSelector::from("tomorrow").validate(),
            Err(Error::InvalidBlockSelector(tag)) if tag == "tomorrow"
        ));
    }

    #[tokio::test]
    async fn invalid_selector_is_rejected_without_a_request() -> anyhow::Result<()> {
        let asserter = Asserter::new();
        asserter.push_success(&json!({ "from": Address::ZERO, "type": "CALL" }));
        let provider = mocked(asserter);
        let config = TraceCallConfig::call_tracer(false, true);

        let result = provider
            .debug_trace_call::<TracedCall>(&TransactionRequest::default(), "someday", &config)
            .await;
        assert!(matches!(result, Err(Error::InvalidBlockSelector(_))));

        // the queued response is still there for the next valid call
        let trace: TracedCall =
            provider.debug_trace_call(&TransactionRequest::default(), "latest", &config).await?;
        assert_eq!(trace.call_type, "CALL");
        Ok(())
    }

    #[tokio::test]
    async fn trace_call_decodes_call_tracer_output() -> anyhow::Result<()> {
        let asserter = Asserter::new();
        asserter.push_success(&json!({
            "from": "0x0000000000000000000000000000000000000001",
            "to": "0x0000000000000000000000000000000000000002",
            "type": "CALL",
            "gasUsed": "0x5208",
            "input": "0x",
            "calls": [{
                "from": "0x0000000000000000000000000000000000000002",
                "type": "STATICCALL",
                "input": "0x01"
            }],
            "logs": [{
                "address": "0x0000000000000000000000000000000000000002",
                "topics": [],
                "data": "0x"
            }]
        }));
        let provider = mocked(asserter);

        let trace: TracedCall = provider
            .debug_trace_call(
                &TransactionRequest::default(),
                BlockNumberOrTag::Latest,
                &TraceCallConfig::call_tracer(true, false),
            )
            .await?;

        assert_eq!(trace.call_type, "CALL");
        assert_eq!(trace.gas_used, Some(U256::from(21_000)));
        assert_eq!(trace.calls.len(), 1);
        assert_eq!(trace.calls[0].call_type, "STATICCALL");
        assert_eq!(trace.logs.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn trace_block_returns_per_transaction_results() -> anyhow::Result<()> {
        let asserter = Asserter::new();
        asserter.push_success(&json!([
            {
                "txHash": TxHash::with_last_byte(1),
                "result": { "from": Address::ZERO, "type": "CALL" }
            },
            {
                "txHash": TxHash::with_last_byte(2),
                "result": { "from": Address::ZERO, "type": "CREATE" }
            }
        ]));
        let provider = mocked(asserter);

        let traces: TracedBlock = provider
            .debug_trace_block_by_number(BlockNumberOrTag::Number(5), &TraceCallConfig::default())
            .await?;

        assert_eq!(traces.len(), 2);
        assert_eq!(traces[1].result.as_ref().map(|r| r.call_type.as_str()), Some("CREATE"));
        Ok(())
    }
}
