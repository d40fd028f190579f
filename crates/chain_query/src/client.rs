use core::fmt;
use std::{path::Path, sync::Arc, time::Duration};

use chain_query_key::{CacheKey, CallDescriptor};
use futures::Stream;
use serde::Serialize;
use tokio::runtime;

use crate::{
    config::{QueryClientConfig, ReadOptions},
    executor::{QueryExecutor, RegisteredQuery},
    gc::GarbageCollector,
    inflight::Waiter,
    invalidator::BlockWatcher,
    mutation::Mutation,
    persist::{read_snapshot, write_snapshot, Snapshot},
    subscribe::{Interest, SubscriptionHandle, SubscriptionId, SyncSubscriberCallback},
    time::{CurrentTime, TimeSinceEpoch},
    Payload, PersistenceError, Provider, ProviderError, QueryError, ValidationError,
};

/// The shared query cache of an application.
///
/// Cloning is cheap; clones share the same cache, in-flight requests and
/// subscriptions.
pub struct QueryClient<ProviderT: Provider, TimerT: TimeSinceEpoch = CurrentTime> {
    executor: Arc<QueryExecutor<ProviderT, TimerT>>,
    config: Arc<QueryClientConfig>,
    collector: Option<Arc<GarbageCollector>>,
}

impl<ProviderT: Provider> QueryClient<ProviderT, CurrentTime> {
    /// Constructs a client that uses the system clock.
    pub fn new(runtime: runtime::Handle, provider: ProviderT, config: QueryClientConfig) -> Self {
        Self::with_timer(runtime, provider, config, CurrentTime)
    }
}

impl<ProviderT: Provider, TimerT: TimeSinceEpoch> QueryClient<ProviderT, TimerT> {
    /// Constructs a client that uses the provided clock.
    pub fn with_timer(
        runtime: runtime::Handle,
        provider: ProviderT,
        config: QueryClientConfig,
        timer: TimerT,
    ) -> Self {
        let executor = Arc::new(QueryExecutor::new(runtime.clone(), provider, timer));

        let collector = config.gc_interval_ms.map(|interval_ms| {
            Arc::new(GarbageCollector::new(
                &runtime,
                Duration::from_millis(interval_ms),
                Arc::downgrade(&executor),
            ))
        });

        Self {
            executor,
            config: Arc::new(config),
            collector,
        }
    }

    /// The client's configuration.
    pub fn config(&self) -> &QueryClientConfig {
        &self.config
    }

    /// Whether unobserved entries are swept in the background.
    pub fn is_collecting(&self) -> bool {
        self.collector
            .as_ref()
            .is_some_and(|collector| !collector.is_finished())
    }

    /// The underlying executor.
    pub fn executor(&self) -> &Arc<QueryExecutor<ProviderT, TimerT>> {
        &self.executor
    }

    /// Subscribes to the query of `descriptor`.
    ///
    /// Cached data is delivered to the new subscription right away. If it's
    /// stale or absent and the query is enabled, a fetch is started, or the
    /// subscription shares the one in flight.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
    pub fn read(
        &self,
        descriptor: &CallDescriptor,
        options: &ReadOptions,
        callback: impl SyncSubscriberCallback + 'static,
    ) -> QuerySubscription {
        let key = descriptor.cache_key();
        let requested = self.config.resolve_policy(options);

        self.executor.register(
            key.clone(),
            RegisteredQuery {
                descriptor: descriptor.clone(),
                policy: requested,
            },
        );

        let interest = Interest {
            enabled: options.enabled,
            watch: options.watch,
            policy: requested,
        };
        let handle = self
            .executor
            .bus()
            .subscribe_with(key.clone(), interest, callback);

        // Includes the new subscription.
        let policy = self.executor.effective_policy(&key, requested);
        let now = self.executor.now();
        let entry = self
            .executor
            .store()
            .observe(&key, handle.id(), policy, now);

        if !options.enabled {
            log::trace!("Query for '{key}' is disabled");
        } else if entry.is_stale(now) {
            // The subscription receives the outcome through the bus.
            drop(self.executor.start(descriptor, &key, policy));
        } else {
            log::trace!("Cache hit for '{key}'");
        }

        QuerySubscription { handle }
    }

    /// Returns fresh cached data for `descriptor`, or fetches it.
    pub async fn fetch(
        &self,
        descriptor: &CallDescriptor,
        options: &ReadOptions,
    ) -> Result<Payload, QueryError> {
        if !options.enabled {
            return Err(ValidationError::Disabled.into());
        }

        let key = descriptor.cache_key();
        let policy = self.config.resolve_policy(options);

        self.executor.register(
            key.clone(),
            RegisteredQuery {
                descriptor: descriptor.clone(),
                policy,
            },
        );

        self.executor.fetch(descriptor, &key, policy).await
    }

    /// Fetches the query of `key` regardless of its freshness. Shares a fetch
    /// that is already in flight.
    ///
    /// The returned waiter resolves to the outcome; dropping it doesn't
    /// cancel the fetch.
    pub fn refetch(&self, key: &CacheKey) -> Result<Waiter, ValidationError> {
        self.executor.refetch(key)
    }

    /// Marks the entry of `key` stale and refetches it if it's observed.
    /// Returns whether the entry transitioned to stale.
    pub fn invalidate(&self, key: &CacheKey) -> bool {
        let is_staled = self.executor.store().mark_stale(key);
        if is_staled {
            self.executor.refetch_if_observed(key);
        }

        is_staled
    }

    /// Returns the observable state of the query of `key`, if it's cached.
    pub fn state(&self, key: &CacheKey) -> Option<QueryState> {
        let entry = self.executor.store().get(key)?;
        let is_fetching = self.executor.tracker().is_in_flight(key);

        let status = if is_fetching {
            QueryStatus::Fetching
        } else if entry.error.is_some() {
            QueryStatus::Error
        } else if entry.data.is_some() {
            QueryStatus::Success
        } else {
            QueryStatus::Idle
        };

        Some(QueryState {
            status,
            is_stale: entry.is_stale(self.executor.now()),
            data: entry.data,
            error: entry.error,
            last_updated: entry.last_updated,
            is_fetching,
        })
    }

    /// Removes a subscription. Equivalent to dropping it.
    pub fn unsubscribe(&self, subscription: QuerySubscription) {
        drop(subscription);
    }

    /// Applies a block notification. Returns the keys that became stale.
    ///
    /// Watched queries that became stale and are observed are refetched.
    pub fn on_block(&self, block_number: u64) -> Vec<CacheKey> {
        self.executor.on_block(block_number)
    }

    /// The highest block number observed so far.
    pub fn latest_block(&self) -> Option<u64> {
        self.executor.invalidator().latest_block()
    }

    /// Applies every block number emitted by `blocks` on a background task,
    /// until the returned watcher is dropped.
    pub fn watch_blocks(
        &self,
        blocks: impl Stream<Item = u64> + Send + 'static,
    ) -> BlockWatcher {
        let executor = Arc::downgrade(&self.executor);
        BlockWatcher::new(self.executor.runtime(), blocks, move |block_number| {
            if let Some(executor) = executor.upgrade() {
                executor.on_block(block_number);
            }
        })
    }

    /// Evicts unobserved entries whose retention elapsed. Returns the evicted
    /// keys.
    pub fn gc(&self) -> Vec<CacheKey> {
        self.executor.sweep()
    }

    /// Writes all cached data to `path`. Returns the number of written
    /// entries.
    pub async fn persist(&self, path: impl AsRef<Path>) -> Result<usize, PersistenceError> {
        let snapshot = Snapshot::new(self.executor.store().snapshot());
        write_snapshot(path.as_ref(), &snapshot).await?;

        Ok(snapshot.entries.len())
    }

    /// Loads entries that were written by [`QueryClient::persist`]. Entries
    /// keep their original timestamps and never replace cached ones. Returns
    /// the number of restored entries.
    ///
    /// A missing, corrupt or incompatible snapshot restores nothing.
    pub async fn restore(&self, path: impl AsRef<Path>) -> Result<usize, PersistenceError> {
        let path = path.as_ref();

        let snapshot = match read_snapshot(path).await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return Ok(0),
            Err(
                error @ (PersistenceError::Json(_) | PersistenceError::UnsupportedVersion { .. }),
            ) => {
                log::error!(
                    "Ignoring unreadable cache snapshot '{}': {error}",
                    path.display()
                );
                return Ok(0);
            }
            Err(error) => return Err(error),
        };

        let restored = self
            .executor
            .store()
            .restore(snapshot.entries, self.executor.now());

        log::debug!(
            "Restored {restored} cache entries from '{}'",
            path.display()
        );

        Ok(restored)
    }

    /// Constructs a mutation that submits calls through the client's
    /// provider.
    pub fn mutation(&self) -> Mutation<ProviderT, TimerT> {
        Mutation::new(Arc::clone(&self.executor))
    }
}

impl<ProviderT: Provider, TimerT: TimeSinceEpoch> Clone for QueryClient<ProviderT, TimerT> {
    fn clone(&self) -> Self {
        Self {
            executor: Arc::clone(&self.executor),
            config: Arc::clone(&self.config),
            collector: self.collector.clone(),
        }
    }
}

impl<ProviderT: Provider, TimerT: TimeSinceEpoch> fmt::Debug for QueryClient<ProviderT, TimerT> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// A consumer's subscription to a query. Dropping it unsubscribes.
#[derive(Debug)]
pub struct QuerySubscription {
    handle: SubscriptionHandle,
}

impl QuerySubscription {
    /// The subscription's identifier.
    pub fn id(&self) -> SubscriptionId {
        self.handle.id()
    }

    /// The key of the observed query.
    pub fn key(&self) -> &CacheKey {
        self.handle.key()
    }
}

/// Request-lifecycle status of a query.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum QueryStatus {
    /// No data was fetched yet and no fetch is in progress.
    Idle,
    /// A fetch is in progress.
    Fetching,
    /// The last fetch succeeded.
    Success,
    /// The last fetch failed.
    Error,
}

/// The observable state of a query.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryState {
    pub status: QueryStatus,
    /// The payload of the last successful fetch, retained across failures
    pub data: Option<Payload>,
    pub error: Option<ProviderError>,
    /// When `data` was fetched, in milliseconds since the UNIX epoch
    pub last_updated: Option<u64>,
    pub is_stale: bool,
    pub is_fetching: bool,
}
