use std::time::Duration;

use chain_query::{QueryClientConfig, ReadOptions, StaleTime, ValidationError};
use chain_query_test_utils::{
    fixtures::{balance_of, total_supply},
    EventLog, MockProvider,
};

use crate::common::test_client;

fn config(cache_time_ms: u64) -> QueryClientConfig {
    QueryClientConfig {
        default_cache_time_ms: cache_time_ms,
        ..QueryClientConfig::default()
    }
}

#[tokio::test]
async fn unobserved_entries_are_evicted_after_cache_time() -> anyhow::Result<()> {
    let (client, provider, time) = test_client(MockProvider::counting(), config(1_000));
    let key = total_supply().cache_key();

    client.fetch(&total_supply(), &ReadOptions::default()).await?;

    time.set_millis(999);
    assert!(client.gc().is_empty());
    assert!(client.state(&key).is_some());

    time.set_millis(1_000);
    assert_eq!(client.gc(), vec![key.clone()]);
    assert_eq!(client.state(&key), None);

    // The registration is gone with the entry.
    assert_eq!(
        client.refetch(&key).expect_err("evicted"),
        ValidationError::UnknownKey(key)
    );

    // A later read starts over.
    client.fetch(&total_supply(), &ReadOptions::default()).await?;
    assert_eq!(provider.call_count(), 2);

    Ok(())
}

#[tokio::test]
async fn reads_extend_retention() -> anyhow::Result<()> {
    let (client, _provider, time) = test_client(MockProvider::counting(), config(1_000));
    let options = ReadOptions {
        stale_time: Some(StaleTime::Never),
        ..ReadOptions::default()
    };

    client.fetch(&total_supply(), &options).await?;

    time.set_millis(800);
    client.fetch(&total_supply(), &options).await?;

    time.set_millis(1_500);
    assert!(client.gc().is_empty());

    time.set_millis(1_800);
    assert_eq!(client.gc(), vec![total_supply().cache_key()]);

    Ok(())
}

#[tokio::test]
async fn observed_entries_are_retained() {
    let (client, _provider, time) = test_client(MockProvider::counting(), config(1_000));
    let key = balance_of(1).cache_key();

    let log = EventLog::new();
    let subscription = client.read(&balance_of(1), &ReadOptions::default(), log.callback());
    log.wait_for(2).await;

    time.set_millis(10_000);
    assert!(client.gc().is_empty());

    drop(subscription);
    assert_eq!(client.gc(), vec![key]);
}

#[tokio::test]
async fn per_query_cache_time_overrides_the_default() -> anyhow::Result<()> {
    let (client, _provider, time) = test_client(MockProvider::counting(), config(1_000));

    client
        .fetch(
            &balance_of(1),
            &ReadOptions {
                cache_time_ms: Some(100),
                ..ReadOptions::default()
            },
        )
        .await?;
    client.fetch(&balance_of(2), &ReadOptions::default()).await?;

    time.set_millis(100);
    assert_eq!(client.gc(), vec![balance_of(1).cache_key()]);

    Ok(())
}

#[tokio::test]
async fn background_collector_sweeps_periodically() -> anyhow::Result<()> {
    let (client, _provider, _time) = test_client(
        MockProvider::counting(),
        QueryClientConfig {
            default_cache_time_ms: 0,
            gc_interval_ms: Some(10),
            ..QueryClientConfig::default()
        },
    );
    let key = total_supply().cache_key();

    assert!(client.is_collecting());
    client.fetch(&total_supply(), &ReadOptions::default()).await?;

    let swept = tokio::time::timeout(Duration::from_secs(5), async {
        while client.state(&key).is_some() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(swept.is_ok(), "entry wasn't swept");

    Ok(())
}

#[tokio::test]
async fn collection_requires_an_interval() {
    let (client, _provider, _time) = test_client(MockProvider::counting(), config(1_000));

    assert!(!client.is_collecting());
}
