mod common;

use std::{
    convert::Infallible,
    sync::{Arc, Mutex},
};

use alloy::{providers::mock::Asserter, rpc::types::Log};
use chain_feed::{Block, FeedError, LogFeed, LogFeedConfig};

use crate::common::{EMITTER, TRANSFER, mocked_ring, push_height, raw_block};

fn config() -> LogFeedConfig {
    LogFeedConfig::new().address(EMITTER).topic([TRANSFER])
}

fn log_recorder(
    seen: &Arc<Mutex<Vec<u64>>>,
) -> impl FnMut(&Block, &Log) -> Result<(), Infallible> + Send + 'static {
    let seen = Arc::clone(seen);
    move |_, log| {
        seen.lock().unwrap().push(log.block_number.unwrap_or_default());
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn feed_survives_endpoint_failure_mid_walk() -> anyhow::Result<()> {
    let (a, b) = (Asserter::new(), Asserter::new());
    a.push_success(&raw_block(100));
    a.push_failure_msg("timeout");
    b.push_success(&vec![common::log_json(100, 0)]);
    push_height(&b, 101, 2);

    let feed = LogFeed::new(mocked_ring(&[a, b])?, config().start_block(100).end_block(101))?;
    let seen = Arc::new(Mutex::new(Vec::new()));

    feed.for_each_log(log_recorder(&seen), |_: &Block| Ok::<_, Infallible>(())).await?;

    assert_eq!(*seen.lock().unwrap(), [100, 101, 101]);
    assert_eq!(feed.provider().ring().index(), 1);
    Ok(())
}

#[tokio::test]
async fn progress_allows_resuming_where_the_feed_stopped() -> anyhow::Result<()> {
    let asserter = Asserter::new();
    push_height(&asserter, 10, 1);
    push_height(&asserter, 11, 1);
    push_height(&asserter, 12, 1);
    let provider = mocked_ring(std::slice::from_ref(&asserter))?;

    let first = LogFeed::new(provider.clone(), config().start_block(10).end_block(11))?;
    let progress = first.progress();
    let seen = Arc::new(Mutex::new(Vec::new()));
    first.for_each_log(log_recorder(&seen), |_: &Block| Ok::<_, Infallible>(())).await?;

    let resume_at = progress.borrow().map(|h| h + 1).unwrap_or_default();
    let second = LogFeed::new(provider, config().start_block(resume_at).end_block(12))?;
    second.for_each_log(log_recorder(&seen), |_: &Block| Ok::<_, Infallible>(())).await?;

    assert_eq!(resume_at, 12);
    assert_eq!(*seen.lock().unwrap(), [10, 11, 12]);
    Ok(())
}

#[tokio::test]
async fn address_added_by_handler_is_visible_to_the_feed() -> anyhow::Result<()> {
    let asserter = Asserter::new();
    push_height(&asserter, 1, 1);
    push_height(&asserter, 2, 0);
    let feed = LogFeed::new(mocked_ring(&[asserter])?, config().start_block(1).end_block(2))?;

    let handle = feed.clone();
    feed.for_each_log(
        move |_: &Block, _: &Log| {
            handle.add_address("0x00000000000000000000000000000000000000f2").map(|_| ())
        },
        |_: &Block| Ok::<_, Infallible>(()),
    )
    .await?;

    assert_eq!(feed.addresses().len(), 2);
    Ok(())
}

#[tokio::test]
async fn block_handler_error_is_returned() -> anyhow::Result<()> {
    let asserter = Asserter::new();
    push_height(&asserter, 3, 0);
    let feed = LogFeed::new(mocked_ring(&[asserter])?, config().start_block(3))?;

    let result = feed
        .for_each_log(
            |_: &Block, _: &Log| Ok::<_, Infallible>(()),
            |block: &Block| Err(format!("cannot store block {}", block.number)),
        )
        .await;

    assert!(matches!(result, Err(FeedError::Handler(ref e)) if e.to_string().contains("0x3")));
    Ok(())
}
