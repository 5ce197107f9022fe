//! Tails ERC-20 `Transfer` logs of one token across several RPC endpoints.
//!
//! ```text
//! RUST_LOG=chain_feed=debug,tail_logs=info \
//! RPC_URLS=https://node-a.example,https://node-b.example \
//! TOKEN=0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48 \
//!     cargo run --example tail_logs
//! ```

use std::{convert::Infallible, time::Duration};

use alloy::{rpc::types::Log, sol, sol_types::SolEvent};
use chain_feed::{
    Block, LogFeed, LogFeedConfig,
    robust_provider::{RobustProvider, RobustProviderBuilder},
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

sol! {
    event Transfer(address indexed from, address indexed to, uint256 value);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).try_init();

    let urls = std::env::var("RPC_URLS").unwrap_or_else(|_| "http://localhost:8545".to_owned());
    let token_address = std::env::var("TOKEN")
        .unwrap_or_else(|_| "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48".to_owned());

    let cancel = CancellationToken::new();
    let provider: RobustProvider = RobustProviderBuilder::new()
        .endpoints(urls.split(',').map(str::trim).map(str::to_owned))
        .attempt_timeout(Duration::from_secs(10))
        .max_elapsed_time(Duration::from_secs(120))
        .cancellation_token(cancel.clone())
        .build()
        .await?;

    let feed = LogFeed::new(
        provider,
        LogFeedConfig::new()
            .address(token_address)
            .topic([Transfer::SIGNATURE_HASH.to_string()])
            .offset(3),
    )?;

    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let result = feed
        .for_each_log_polling(
            Duration::from_secs(4),
            |block: &Block, log: &Log| {
                match Transfer::decode_log_data(log.data()) {
                    Ok(transfer) => info!(
                        block = %block.number,
                        from = %transfer.from,
                        to = %transfer.to,
                        value = %transfer.value,
                        "Transfer"
                    ),
                    Err(err) => error!(error = %err, "Undecodable log"),
                }
                Ok::<_, Infallible>(())
            },
            |block: &Block| {
                info!(block = %block.number, txs = block.transactions.len(), "Block done");
                Ok::<_, Infallible>(())
            },
        )
        .await;

    match result {
        Err(err) if err.is_cancelled() => info!("Stopped"),
        other => other?,
    }
    Ok(())
}
