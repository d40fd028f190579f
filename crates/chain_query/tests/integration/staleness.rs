use chain_query::{QueryClientConfig, QueryEvent, ReadOptions, StaleTime};
use chain_query_test_utils::{fixtures::total_supply, EventLog, MockProvider};
use serde_json::json;

use crate::common::test_client;

fn stale_after(millis: u64) -> ReadOptions {
    ReadOptions {
        stale_time: Some(StaleTime::Millis(millis)),
        ..ReadOptions::default()
    }
}

#[tokio::test]
async fn fresh_data_is_served_until_stale_time_elapses() -> anyhow::Result<()> {
    let (client, provider, time) =
        test_client(MockProvider::returning(json!(42)), QueryClientConfig::default());
    let options = stale_after(2_000);

    assert_eq!(client.fetch(&total_supply(), &options).await?, json!(42));
    assert_eq!(provider.call_count(), 1);

    time.set_millis(500);
    assert_eq!(client.fetch(&total_supply(), &options).await?, json!(42));
    assert_eq!(provider.call_count(), 1);

    time.set_millis(2_500);
    assert_eq!(client.fetch(&total_supply(), &options).await?, json!(42));
    assert_eq!(provider.call_count(), 2);

    Ok(())
}

#[tokio::test]
async fn stale_time_boundary_triggers_a_fetch() -> anyhow::Result<()> {
    let (client, provider, time) =
        test_client(MockProvider::counting(), QueryClientConfig::default());
    let options = stale_after(1_000);

    client.fetch(&total_supply(), &options).await?;

    time.set_millis(999);
    assert_eq!(client.fetch(&total_supply(), &options).await?, json!(1));

    time.set_millis(1_000);
    assert_eq!(client.fetch(&total_supply(), &options).await?, json!(2));
    assert_eq!(provider.call_count(), 2);

    Ok(())
}

#[tokio::test]
async fn read_replays_fresh_data_without_a_call() -> anyhow::Result<()> {
    let (client, provider, time) =
        test_client(MockProvider::counting(), QueryClientConfig::default());
    let options = stale_after(2_000);

    client.fetch(&total_supply(), &options).await?;

    time.set_millis(500);
    let log = EventLog::new();
    let _subscription = client.read(&total_supply(), &options, log.callback());

    // Delivered before `read` returns.
    assert_eq!(log.events(), vec![QueryEvent::Success(json!(1))]);
    assert_eq!(provider.call_count(), 1);

    Ok(())
}

#[tokio::test]
async fn read_of_stale_data_serves_it_and_refetches() -> anyhow::Result<()> {
    let (client, provider, time) =
        test_client(MockProvider::counting(), QueryClientConfig::default());
    let options = stale_after(2_000);

    client.fetch(&total_supply(), &options).await?;

    time.set_millis(2_500);
    let log = EventLog::new();
    let _subscription = client.read(&total_supply(), &options, log.callback());

    log.wait_for(3).await;
    assert_eq!(
        log.events(),
        vec![
            QueryEvent::Success(json!(1)),
            QueryEvent::Fetching,
            QueryEvent::Success(json!(2)),
        ]
    );
    assert_eq!(provider.call_count(), 2);

    Ok(())
}

#[tokio::test]
async fn never_stale_data_is_only_refreshed_by_invalidation() -> anyhow::Result<()> {
    let (client, provider, time) =
        test_client(MockProvider::counting(), QueryClientConfig::default());
    let options = ReadOptions {
        stale_time: Some(StaleTime::Never),
        ..ReadOptions::default()
    };

    client.fetch(&total_supply(), &options).await?;

    time.set_millis(u64::MAX / 2);
    assert_eq!(client.fetch(&total_supply(), &options).await?, json!(1));

    assert!(client.invalidate(&total_supply().cache_key()));
    assert_eq!(client.fetch(&total_supply(), &options).await?, json!(2));
    assert_eq!(provider.call_count(), 2);

    Ok(())
}

#[tokio::test]
async fn client_default_stale_time_applies() -> anyhow::Result<()> {
    let config = QueryClientConfig {
        default_stale_time: StaleTime::Millis(100),
        ..QueryClientConfig::default()
    };
    let (client, provider, time) = test_client(MockProvider::counting(), config);

    client.fetch(&total_supply(), &ReadOptions::default()).await?;
    time.set_millis(50);
    client.fetch(&total_supply(), &ReadOptions::default()).await?;
    assert_eq!(provider.call_count(), 1);

    time.set_millis(100);
    client.fetch(&total_supply(), &ReadOptions::default()).await?;
    assert_eq!(provider.call_count(), 2);

    Ok(())
}
