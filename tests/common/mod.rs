#![allow(dead_code)]

use std::time::Duration;

use alloy::{
    providers::{RootProvider, mock::Asserter},
    rpc::client::RpcClient,
};
use chain_feed::robust_provider::{Endpoint, RetryPolicy, RobustProvider};
use serde_json::{Value, json};

pub const EMITTER: &str = "0x00000000000000000000000000000000000000e1";
pub const TRANSFER: &str = "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";

/// Retry policy short enough for tests, with a budget that still allows a few attempts.
pub fn quick_policy() -> RetryPolicy {
    RetryPolicy::default()
        .initial_interval(Duration::from_millis(10))
        .max_interval(Duration::from_millis(40))
        .max_elapsed_time(Duration::from_secs(1))
        .attempt_timeout(Duration::from_millis(500))
}

/// One mocked endpoint per asserter, labelled `node-0`, `node-1`, ...
pub fn mocked_ring(asserters: &[Asserter]) -> anyhow::Result<RobustProvider> {
    let endpoints = asserters
        .iter()
        .enumerate()
        .map(|(i, asserter)| {
            Endpoint::new(
                format!("node-{i}"),
                RootProvider::new(RpcClient::mocked(asserter.clone())),
            )
        })
        .collect();
    let provider = RobustProvider::from_endpoints(endpoints, quick_policy())?;
    provider.set_retry_interval(Duration::from_millis(5));
    Ok(provider)
}

pub fn raw_block(number: u64) -> Value {
    json!({
        "hash": format!("{:#066x}", 0x1000 + number),
        "number": format!("{number:#x}"),
        "parentHash": format!("{:#066x}", 0x0fff + number),
        "timestamp": format!("{:#x}", 1_700_000_000 + number * 12),
        "transactions": []
    })
}

pub fn log_json(number: u64, index: u64) -> Value {
    json!({
        "address": EMITTER,
        "topics": [TRANSFER],
        "data": "0x",
        "blockHash": format!("{:#066x}", 0x1000 + number),
        "blockNumber": format!("{number:#x}"),
        "transactionHash": format!("{:#066x}", 0xaa00 + number),
        "transactionIndex": "0x0",
        "logIndex": format!("{index:#x}"),
        "removed": false
    })
}

/// Queue the block and its `logs` matching logs for one delivered height.
pub fn push_height(asserter: &Asserter, number: u64, logs: u64) {
    asserter.push_success(&raw_block(number));
    let logs: Vec<_> = (0..logs).map(|i| log_json(number, i)).collect();
    asserter.push_success(&logs);
}
