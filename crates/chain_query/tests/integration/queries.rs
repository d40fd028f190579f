use std::sync::Arc;

use chain_query::{
    ProviderError, QueryCallbacks, QueryClientConfig, QueryEvent, QueryStatus, ReadOptions,
    StaleTime,
};
use chain_query_test_utils::{
    fixtures::{balance_of, total_supply},
    EventLog, MockProvider,
};
use parking_lot::Mutex;
use serde_json::json;

use crate::common::test_client;

#[tokio::test]
async fn read_fetches_missing_data() {
    let (client, provider, _time) =
        test_client(MockProvider::returning(json!("1000")), QueryClientConfig::default());

    let log = EventLog::new();
    let subscription = client.read(&balance_of(1), &ReadOptions::default(), log.callback());
    assert_eq!(subscription.key(), &balance_of(1).cache_key());

    log.wait_for(2).await;
    assert_eq!(
        log.events(),
        vec![QueryEvent::Fetching, QueryEvent::Success(json!("1000"))]
    );
    assert_eq!(provider.received(), vec![balance_of(1)]);

    let state = client.state(subscription.key()).expect("cached");
    assert_eq!(state.status, QueryStatus::Success);
    assert_eq!(state.data, Some(json!("1000")));
    assert_eq!(state.last_updated, Some(0));
    assert!(!state.is_fetching);
}

#[tokio::test]
async fn state_reflects_the_fetch_in_flight() -> anyhow::Result<()> {
    let (provider, gate) = MockProvider::counting().gated();
    let (client, _provider, _time) = test_client(provider, QueryClientConfig::default());
    let key = total_supply().cache_key();

    assert_eq!(client.state(&key), None);

    let log = EventLog::new();
    let _subscription = client.read(&total_supply(), &ReadOptions::default(), log.callback());

    let state = client.state(&key).expect("registered by the read");
    assert_eq!(state.status, QueryStatus::Fetching);
    assert!(state.is_fetching);
    assert_eq!(state.data, None);

    gate.open();
    client.refetch(&key)?.wait().await?;

    let state = client.state(&key).expect("cached");
    assert_eq!(state.status, QueryStatus::Success);
    assert!(!state.is_fetching);

    Ok(())
}

#[tokio::test]
async fn disabled_read_serves_cache_only() -> anyhow::Result<()> {
    let (client, provider, _time) =
        test_client(MockProvider::counting(), QueryClientConfig::default());
    let disabled = ReadOptions {
        enabled: false,
        ..ReadOptions::default()
    };

    let log = EventLog::new();
    let _subscription = client.read(&total_supply(), &disabled, log.callback());
    assert!(log.is_empty());
    assert_eq!(provider.call_count(), 0);

    let state = client.state(&total_supply().cache_key()).expect("registered");
    assert_eq!(state.status, QueryStatus::Idle);

    // Data fetched by an enabled consumer reaches the disabled one.
    client.fetch(&total_supply(), &ReadOptions::default()).await?;
    assert_eq!(
        log.events(),
        vec![QueryEvent::Fetching, QueryEvent::Success(json!(1))]
    );

    // Invalidation doesn't refetch a disabled query.
    let _disabled_again = client.read(&total_supply(), &disabled, EventLog::new().callback());
    assert!(client.invalidate(&total_supply().cache_key()));
    assert_eq!(provider.call_count(), 1);

    Ok(())
}

#[tokio::test]
async fn invalidate_refetches_observed_queries() {
    let (client, provider, _time) =
        test_client(MockProvider::counting(), QueryClientConfig::default());
    let options = ReadOptions {
        stale_time: Some(StaleTime::Never),
        ..ReadOptions::default()
    };

    let log = EventLog::new();
    let _subscription = client.read(&balance_of(1), &options, log.callback());
    log.wait_for(2).await;

    assert!(client.invalidate(&balance_of(1).cache_key()));
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

    // Unknown keys have nothing to invalidate.
    assert!(!client.invalidate(&balance_of(2).cache_key()));
}

#[tokio::test]
async fn invalidate_only_flags_unobserved_queries() -> anyhow::Result<()> {
    let (client, provider, _time) =
        test_client(MockProvider::counting(), QueryClientConfig::default());
    let options = ReadOptions {
        stale_time: Some(StaleTime::Never),
        ..ReadOptions::default()
    };

    client.fetch(&balance_of(1), &options).await?;
    assert!(client.invalidate(&balance_of(1).cache_key()));

    // Already stale.
    assert!(!client.invalidate(&balance_of(1).cache_key()));
    assert_eq!(provider.call_count(), 1);

    let state = client.state(&balance_of(1).cache_key()).expect("cached");
    assert!(state.is_stale);
    assert_eq!(state.data, Some(json!(1)));

    Ok(())
}

#[tokio::test]
async fn unsubscribed_consumers_receive_nothing() -> anyhow::Result<()> {
    let (client, _provider, _time) =
        test_client(MockProvider::counting(), QueryClientConfig::default());
    let key = balance_of(1).cache_key();

    let kept = EventLog::new();
    let _kept = client.read(&balance_of(1), &ReadOptions::default(), kept.callback());
    kept.wait_for(2).await;

    let removed = EventLog::new();
    let subscription = client.read(&balance_of(1), &ReadOptions::default(), removed.callback());
    kept.wait_for(4).await;
    let received = removed.len();

    client.unsubscribe(subscription);
    client.refetch(&key)?.wait().await?;

    assert_eq!(kept.len(), 6);
    assert_eq!(removed.len(), received);

    Ok(())
}

#[tokio::test]
async fn lifecycle_callbacks_follow_outcomes() {
    let provider = MockProvider::new(|_, index| {
        if index == 0 {
            Ok(json!("1000"))
        } else {
            Err(ProviderError::JsonRpc {
                code: -32000,
                message: "header not found".to_string(),
            })
        }
    });
    let (client, _provider, _time) = test_client(provider, QueryClientConfig::default());

    let calls = Arc::new(Mutex::new(Vec::new()));
    let callbacks = QueryCallbacks::new()
        .on_success({
            let calls = Arc::clone(&calls);
            move |data| calls.lock().push(format!("success {data}"))
        })
        .on_error({
            let calls = Arc::clone(&calls);
            move |error| calls.lock().push(format!("error {error}"))
        })
        .on_settled({
            let calls = Arc::clone(&calls);
            move |data, error| {
                calls
                    .lock()
                    .push(format!("settled {} {}", data.is_some(), error.is_some()));
            }
        });

    let log = EventLog::new();
    let _log = client.read(&total_supply(), &ReadOptions::default(), log.callback());
    let _callbacks = client.read(
        &total_supply(),
        &ReadOptions::default(),
        callbacks.into_subscriber(),
    );
    log.wait_for(2).await;

    assert!(
        client
            .fetch(&total_supply(), &ReadOptions::default())
            .await
            .is_err()
    );
    log.wait_for(4).await;

    assert_eq!(
        *calls.lock(),
        vec![
            "success \"1000\"".to_string(),
            "settled true false".to_string(),
            "error JSON-RPC error -32000: header not found".to_string(),
            "settled false true".to_string(),
        ]
    );
}
