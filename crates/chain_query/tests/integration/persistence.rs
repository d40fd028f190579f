use chain_query::{ProviderError, QueryClientConfig, QueryEvent, ReadOptions, StaleTime};
use chain_query_test_utils::{
    fixtures::{balance_of, total_supply},
    EventLog, MockProvider,
};
use serde_json::json;

use crate::common::test_client;

fn stale_after(millis: u64) -> ReadOptions {
    ReadOptions {
        stale_time: Some(StaleTime::Millis(millis)),
        ..ReadOptions::default()
    }
}

#[tokio::test]
async fn restored_entries_keep_their_age() -> anyhow::Result<()> {
    let directory = tempfile::tempdir()?;
    let path = directory.path().join("cache").join("queries.json");

    let (client, _provider, time) =
        test_client(MockProvider::returning(json!("1000")), QueryClientConfig::default());
    client.fetch(&balance_of(1), &stale_after(1_000)).await?;
    time.set_millis(200);
    client.fetch(&total_supply(), &stale_after(1_000)).await?;
    assert_eq!(client.persist(&path).await?, 2);

    let (restored, provider, time) =
        test_client(MockProvider::returning(json!("2000")), QueryClientConfig::default());
    time.set_millis(600);
    assert_eq!(restored.restore(&path).await?, 2);

    let log = EventLog::new();
    let _subscription = restored.read(&balance_of(1), &stale_after(1_000), log.callback());
    assert_eq!(log.events(), vec![QueryEvent::Success(json!("1000"))]);
    assert_eq!(provider.call_count(), 0);

    // Stale relative to when it was originally fetched.
    time.set_millis(1_000);
    assert_eq!(
        restored.fetch(&balance_of(1), &stale_after(1_000)).await?,
        json!("2000")
    );
    assert_eq!(
        restored.fetch(&total_supply(), &stale_after(1_000)).await?,
        json!("1000")
    );
    assert_eq!(provider.call_count(), 1);

    Ok(())
}

#[tokio::test]
async fn errors_without_data_are_not_persisted() -> anyhow::Result<()> {
    let directory = tempfile::tempdir()?;
    let path = directory.path().join("queries.json");

    let (client, _provider, _time) = test_client(
        MockProvider::new(|_, _| {
            Err(ProviderError::Other {
                message: "unavailable".to_string(),
            })
        }),
        QueryClientConfig::default(),
    );
    assert!(
        client
            .fetch(&total_supply(), &ReadOptions::default())
            .await
            .is_err()
    );

    assert_eq!(client.persist(&path).await?, 0);

    Ok(())
}

#[tokio::test]
async fn restore_keeps_cached_entries() -> anyhow::Result<()> {
    let directory = tempfile::tempdir()?;
    let path = directory.path().join("queries.json");

    let (client, _provider, _time) =
        test_client(MockProvider::returning(json!("old")), QueryClientConfig::default());
    client.fetch(&balance_of(1), &ReadOptions::default()).await?;
    client.fetch(&balance_of(2), &ReadOptions::default()).await?;
    client.persist(&path).await?;

    let (restored, _provider, _time) =
        test_client(MockProvider::returning(json!("new")), QueryClientConfig::default());
    restored.fetch(&balance_of(1), &ReadOptions::default()).await?;

    assert_eq!(restored.restore(&path).await?, 1);

    let state = |owner| {
        restored
            .state(&balance_of(owner).cache_key())
            .and_then(|state| state.data)
    };
    assert_eq!(state(1), Some(json!("new")));
    assert_eq!(state(2), Some(json!("old")));

    Ok(())
}

#[tokio::test]
async fn missing_snapshot_restores_nothing() -> anyhow::Result<()> {
    let directory = tempfile::tempdir()?;
    let (client, _provider, _time) =
        test_client(MockProvider::counting(), QueryClientConfig::default());

    assert_eq!(client.restore(directory.path().join("absent.json")).await?, 0);

    Ok(())
}

#[tokio::test]
async fn unreadable_snapshots_restore_nothing() -> anyhow::Result<()> {
    let directory = tempfile::tempdir()?;
    let (client, _provider, _time) =
        test_client(MockProvider::counting(), QueryClientConfig::default());

    let corrupt = directory.path().join("corrupt.json");
    std::fs::write(&corrupt, "{ not json")?;
    assert_eq!(client.restore(&corrupt).await?, 0);

    let incompatible = directory.path().join("incompatible.json");
    std::fs::write(&incompatible, r#"{"version":99,"entries":{}}"#)?;
    assert_eq!(client.restore(&incompatible).await?, 0);

    Ok(())
}
