use chain_query::{QueryClientConfig, QueryEvent, ReadOptions, StaleTime};
use chain_query_test_utils::{
    fixtures::{balance_of, total_supply},
    BlockFeed, EventLog, MockProvider,
};
use serde_json::json;

use crate::common::test_client;

fn block_scoped() -> ReadOptions {
    ReadOptions {
        block_scoped: true,
        ..ReadOptions::default()
    }
}

fn watched() -> ReadOptions {
    ReadOptions {
        watch: true,
        ..ReadOptions::default()
    }
}

#[tokio::test]
async fn next_block_marks_entries_stale() -> anyhow::Result<()> {
    let (client, provider, time) =
        test_client(MockProvider::counting(), QueryClientConfig::default());
    let key = balance_of(1).cache_key();

    client.on_block(100);
    client.fetch(&balance_of(1), &block_scoped()).await?;

    // Wall-clock time doesn't affect block-scoped entries.
    time.set_millis(1_000_000);
    assert!(!client.state(&key).expect("cached").is_stale);

    assert!(client.on_block(100).is_empty());
    assert!(client.on_block(99).is_empty());
    assert!(!client.state(&key).expect("cached").is_stale);

    assert_eq!(client.on_block(101), vec![key.clone()]);
    let state = client.state(&key).expect("cached");
    assert!(state.is_stale);
    assert_eq!(state.data, Some(json!(1)));

    // Stale data is replaced by the next read.
    assert_eq!(client.fetch(&balance_of(1), &block_scoped()).await?, json!(2));
    assert_eq!(provider.call_count(), 2);

    Ok(())
}

#[tokio::test]
async fn time_scoped_entries_ignore_blocks() -> anyhow::Result<()> {
    let (client, _provider, _time) =
        test_client(MockProvider::counting(), QueryClientConfig::default());
    let options = ReadOptions {
        stale_time: Some(StaleTime::Never),
        ..ReadOptions::default()
    };

    client.fetch(&total_supply(), &options).await?;

    assert!(client.on_block(1).is_empty());
    assert!(
        !client
            .state(&total_supply().cache_key())
            .expect("cached")
            .is_stale
    );

    Ok(())
}

#[tokio::test]
async fn block_during_fetch_outdates_its_result() -> anyhow::Result<()> {
    let (provider, gate) = MockProvider::counting().gated();
    let (client, _provider, _time) = test_client(provider, QueryClientConfig::default());
    let key = balance_of(1).cache_key();

    client.on_block(5);
    let log = EventLog::new();
    let _subscription = client.read(&balance_of(1), &block_scoped(), log.callback());
    let waiter = client.refetch(&key)?;

    // The call started at block 5 and is still running.
    client.on_block(6);
    gate.open();
    assert_eq!(waiter.wait().await?, json!(1));

    let state = client.state(&key).expect("cached");
    assert!(state.is_stale);
    assert_eq!(state.data, Some(json!(1)));

    Ok(())
}

#[tokio::test]
async fn watched_query_refetches_on_new_block() {
    let (client, provider, _time) =
        test_client(MockProvider::counting(), QueryClientConfig::default());
    let (feed, blocks) = BlockFeed::channel();
    let _watcher = client.watch_blocks(blocks);

    let log = EventLog::new();
    let subscription = client.read(
        &balance_of(1),
        &ReadOptions {
            watch: true,
            ..ReadOptions::default()
        },
        log.callback(),
    );
    log.wait_for(2).await;

    assert!(feed.push(1));
    log.wait_for(5).await;

    assert_eq!(
        log.events(),
        vec![
            QueryEvent::Fetching,
            QueryEvent::Success(json!(1)),
            QueryEvent::Stale,
            QueryEvent::Fetching,
            QueryEvent::Success(json!(2)),
        ]
    );
    assert_eq!(client.latest_block(), Some(1));

    // Unobserved queries are only flagged.
    client.unsubscribe(subscription);
    assert_eq!(client.on_block(2), vec![balance_of(1).cache_key()]);
    assert_eq!(provider.call_count(), 2);
}

#[tokio::test]
async fn unwatched_query_is_only_flagged() {
    let (client, provider, _time) =
        test_client(MockProvider::counting(), QueryClientConfig::default());

    let log = EventLog::new();
    let _subscription = client.read(&balance_of(1), &block_scoped(), log.callback());
    log.wait_for(2).await;

    client.on_block(1);

    assert_eq!(
        log.events(),
        vec![
            QueryEvent::Fetching,
            QueryEvent::Success(json!(1)),
            QueryEvent::Stale,
        ]
    );
    assert_eq!(provider.call_count(), 1);
}

#[tokio::test]
async fn one_shot_fetch_keeps_a_watched_query_refetching() -> anyhow::Result<()> {
    let (client, provider, _time) =
        test_client(MockProvider::counting(), QueryClientConfig::default());
    let key = balance_of(1).cache_key();

    let log = EventLog::new();
    let _subscription = client.read(&balance_of(1), &watched(), log.callback());
    log.wait_for(2).await;

    // Fresh until the next block, even for a time-scoped consumer.
    assert_eq!(
        client.fetch(&balance_of(1), &ReadOptions::default()).await?,
        json!(1)
    );
    assert_eq!(provider.call_count(), 1);

    assert_eq!(client.on_block(2), vec![key]);
    log.wait_for(5).await;

    assert_eq!(
        log.events(),
        vec![
            QueryEvent::Fetching,
            QueryEvent::Success(json!(1)),
            QueryEvent::Stale,
            QueryEvent::Fetching,
            QueryEvent::Success(json!(2)),
        ]
    );
    assert_eq!(provider.call_count(), 2);

    Ok(())
}

#[tokio::test]
async fn time_scoped_fetch_keeps_an_observed_entry_block_scoped() -> anyhow::Result<()> {
    let (client, provider, time) =
        test_client(MockProvider::counting(), QueryClientConfig::default());
    let key = balance_of(1).cache_key();

    let log = EventLog::new();
    let _subscription = client.read(&balance_of(1), &block_scoped(), log.callback());
    log.wait_for(2).await;

    time.set_millis(10_000);
    let time_scoped = ReadOptions {
        stale_time: Some(StaleTime::Millis(1_000)),
        ..ReadOptions::default()
    };
    assert_eq!(client.fetch(&balance_of(1), &time_scoped).await?, json!(1));
    assert_eq!(provider.call_count(), 1);

    assert_eq!(client.on_block(1), vec![key.clone()]);
    assert!(client.state(&key).expect("cached").is_stale);
    assert_eq!(
        log.events(),
        vec![
            QueryEvent::Fetching,
            QueryEvent::Success(json!(1)),
            QueryEvent::Stale,
        ]
    );

    Ok(())
}

#[tokio::test]
async fn disabled_reader_does_not_silence_a_watcher() {
    let (client, provider, _time) =
        test_client(MockProvider::counting(), QueryClientConfig::default());

    let log = EventLog::new();
    let _watcher = client.read(&balance_of(1), &watched(), log.callback());
    log.wait_for(2).await;

    let passive = EventLog::new();
    let _passive = client.read(
        &balance_of(1),
        &ReadOptions {
            enabled: false,
            ..ReadOptions::default()
        },
        passive.callback(),
    );

    client.on_block(1);
    log.wait_for(5).await;
    passive.wait_for(4).await;

    assert_eq!(provider.call_count(), 2);
    assert_eq!(
        passive.events(),
        vec![
            QueryEvent::Success(json!(1)),
            QueryEvent::Stale,
            QueryEvent::Fetching,
            QueryEvent::Success(json!(2)),
        ]
    );
}

#[tokio::test]
async fn watch_stops_with_the_last_watching_subscription() {
    let (client, provider, _time) =
        test_client(MockProvider::counting(), QueryClientConfig::default());

    let log = EventLog::new();
    let watcher = client.read(&balance_of(1), &watched(), log.callback());
    log.wait_for(2).await;

    let _reader = client.read(&balance_of(1), &block_scoped(), EventLog::new().callback());
    client.unsubscribe(watcher);

    assert_eq!(client.on_block(1), vec![balance_of(1).cache_key()]);
    assert_eq!(provider.call_count(), 1);
}
