use std::{collections::HashMap, sync::Arc};

use chain_query_key::{CacheKey, CallDescriptor};
use parking_lot::Mutex;
use tokio::runtime;

use crate::{
    config::CachePolicy,
    inflight::{InFlightGuard, InFlightTracker, Outcome, Waiter},
    invalidator::BlockInvalidator,
    store::{ResultCacheStore, Settlement},
    subscribe::{Interest, NotificationBus, QueryEvent},
    time::TimeSinceEpoch,
    Provider, ValidationError,
};

/// A query that a consumer has read at least once, so it can be refetched
/// by its key.
///
/// Whether a refetch is wanted is decided by the live subscriptions of the
/// key, not by the registration.
#[derive(Clone, Debug)]
pub struct RegisteredQuery {
    /// The call that produces the query's data
    pub descriptor: CallDescriptor,
    /// The policy of the latest read, used while the key has no subscribers
    pub policy: CachePolicy,
}

/// Bookkeeping of a fetch at the moment it started.
#[derive(Clone, Copy, Debug)]
struct Started {
    sequence: u64,
    /// The latest block known when the fetch started
    block_number: Option<u64>,
}

/// Orchestrates fetches: serves fresh data from the store, de-duplicates
/// concurrent requests and writes outcomes back to the store.
///
/// Each fetch makes exactly one external call. Failures are recorded and
/// surfaced, never retried.
pub struct QueryExecutor<ProviderT: Provider, TimerT: TimeSinceEpoch> {
    store: Arc<ResultCacheStore>,
    tracker: Arc<InFlightTracker>,
    bus: Arc<NotificationBus>,
    invalidator: BlockInvalidator,
    queries: Mutex<HashMap<CacheKey, RegisteredQuery>>,
    provider: ProviderT,
    timer: TimerT,
    runtime: runtime::Handle,
}

impl<ProviderT: Provider, TimerT: TimeSinceEpoch> QueryExecutor<ProviderT, TimerT> {
    /// Constructs an executor with an empty cache.
    pub fn new(runtime: runtime::Handle, provider: ProviderT, timer: TimerT) -> Self {
        let bus = Arc::new(NotificationBus::new());
        let store = Arc::new(ResultCacheStore::new(Arc::clone(&bus)));
        let invalidator = BlockInvalidator::new(Arc::clone(&store));

        Self {
            store,
            tracker: Arc::new(InFlightTracker::new()),
            bus,
            invalidator,
            queries: Mutex::new(HashMap::new()),
            provider,
            timer,
            runtime,
        }
    }

    /// The result cache.
    pub fn store(&self) -> &Arc<ResultCacheStore> {
        &self.store
    }

    /// The in-flight request tracker.
    pub fn tracker(&self) -> &Arc<InFlightTracker> {
        &self.tracker
    }

    /// The notification bus.
    pub fn bus(&self) -> &Arc<NotificationBus> {
        &self.bus
    }

    /// The block invalidator.
    pub fn invalidator(&self) -> &BlockInvalidator {
        &self.invalidator
    }

    /// The provider used for external calls.
    pub fn provider(&self) -> &ProviderT {
        &self.provider
    }

    /// The current time in milliseconds since the UNIX epoch.
    pub fn now(&self) -> u64 {
        self.timer.since_epoch_millis()
    }

    /// The runtime that fetches are spawned on.
    pub fn runtime(&self) -> &runtime::Handle {
        &self.runtime
    }

    /// Records the descriptor and policy of a query under its key. Later
    /// registrations of the same key replace earlier ones.
    pub fn register(&self, key: CacheKey, query: RegisteredQuery) {
        self.queries.lock().insert(key, query);
    }

    /// Returns the registration of `key`, if any.
    pub fn registered(&self, key: &CacheKey) -> Option<RegisteredQuery> {
        self.queries.lock().get(key).cloned()
    }

    /// Forgets the registrations of the provided keys.
    pub fn forget<'key>(&self, keys: impl IntoIterator<Item = &'key CacheKey>) {
        let mut queries = self.queries.lock();
        for key in keys {
            queries.remove(key);
        }
    }

    /// Combines `requested` with the policies of the live subscriptions of
    /// `key`, so that a one-shot read never loosens an observed entry.
    pub fn effective_policy(&self, key: &CacheKey, requested: CachePolicy) -> CachePolicy {
        self.bus
            .merged_policy(key)
            .map_or(requested, |observed| observed.merge(requested))
    }

    /// Evicts unobserved entries whose retention elapsed and forgets their
    /// registrations. Returns the evicted keys.
    pub fn sweep(&self) -> Vec<CacheKey> {
        let evicted = self.store.sweep(self.now());
        self.forget(&evicted);
        evicted
    }

    /// Returns fresh cached data, or fetches it.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all, fields(key = %key)))]
    pub async fn fetch(
        self: &Arc<Self>,
        descriptor: &CallDescriptor,
        key: &CacheKey,
        policy: CachePolicy,
    ) -> Outcome {
        let policy = self.effective_policy(key, policy);
        let now = self.now();
        let entry = self.store.touch(key, policy, now);

        if !entry.is_stale(now) {
            if let Some(data) = entry.data {
                log::trace!("Cache hit for '{key}'");
                return Ok(data);
            }
        }

        self.start(descriptor, key, policy).wait().await
    }

    /// Starts a fetch for `key` unless one is already in flight, in which
    /// case the returned waiter attaches to it.
    ///
    /// Dropping the waiter doesn't cancel the fetch; its outcome is still
    /// written to the cache.
    pub fn start(
        self: &Arc<Self>,
        descriptor: &CallDescriptor,
        key: &CacheKey,
        policy: CachePolicy,
    ) -> Waiter {
        let acquisition = self.tracker.acquire(key);
        if !acquisition.is_new {
            log::trace!("Attached to in-flight fetch of '{key}'");
            return acquisition.waiter;
        }

        let policy = self.effective_policy(key, policy);

        log::debug!("Fetching '{key}'");
        self.bus.publish(key, QueryEvent::Fetching);

        let guard = InFlightGuard::new(
            Arc::clone(&self.tracker),
            key.clone(),
            acquisition.sequence,
        );
        let started = Started {
            sequence: acquisition.sequence,
            block_number: self.invalidator.latest_block(),
        };

        let this = Arc::clone(self);
        let descriptor = descriptor.clone();
        let key = key.clone();
        self.runtime.spawn(async move {
            this.run_fetch(descriptor, key, policy, started, guard).await;
        });

        acquisition.waiter
    }

    /// Starts a fetch for a registered query.
    pub fn refetch(self: &Arc<Self>, key: &CacheKey) -> Result<Waiter, ValidationError> {
        let query = self
            .registered(key)
            .ok_or_else(|| ValidationError::UnknownKey(key.clone()))?;

        let policy = self.bus.merged_policy(key).unwrap_or(query.policy);
        Ok(self.start(&query.descriptor, key, policy))
    }

    /// Applies a block notification and refetches the watched queries it
    /// invalidated. Returns the keys that became stale.
    pub fn on_block(self: &Arc<Self>, block_number: u64) -> Vec<CacheKey> {
        let staled = self.invalidator.on_block(block_number);
        for key in &staled {
            self.refetch_if_watched(key);
        }

        staled
    }

    /// Refetches `key` if one of its live subscriptions is enabled and
    /// watching.
    pub fn refetch_if_watched(self: &Arc<Self>, key: &CacheKey) -> bool {
        self.refetch_if(key, |interest| interest.watch)
    }

    /// Refetches `key` if one of its live subscriptions is enabled.
    pub fn refetch_if_observed(self: &Arc<Self>, key: &CacheKey) -> bool {
        self.refetch_if(key, |_| true)
    }

    fn refetch_if(
        self: &Arc<Self>,
        key: &CacheKey,
        predicate: impl Fn(&Interest) -> bool,
    ) -> bool {
        let Some(query) = self.registered(key) else {
            return false;
        };

        if !self
            .bus
            .has_interest(key, |interest| interest.enabled && predicate(interest))
        {
            return false;
        }

        let policy = self.bus.merged_policy(key).unwrap_or(query.policy);
        // Observers receive the outcome through the bus.
        drop(self.start(&query.descriptor, key, policy));
        true
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all, fields(key = %key)))]
    async fn run_fetch(
        self: Arc<Self>,
        descriptor: CallDescriptor,
        key: CacheKey,
        policy: CachePolicy,
        started: Started,
        guard: InFlightGuard,
    ) {
        let Started {
            sequence,
            block_number,
        } = started;

        let outcome = self.provider.call(&descriptor).await;

        match &outcome {
            Ok(_) => log::debug!("Fetch #{sequence} for '{key}' succeeded"),
            Err(error) => log::debug!("Fetch #{sequence} for '{key}' failed: {error}"),
        }

        // Subscriptions made while the call was running count too.
        let policy = self.effective_policy(&key, policy);
        let settlement = Settlement {
            sequence,
            timestamp: self.now(),
            block_number,
        };
        self.store.set(&key, outcome.clone(), settlement, policy);

        let notified = guard.release(outcome.map_err(Into::into));
        log::trace!("Fetch #{sequence} for '{key}' settled {notified} waiters");

        // A block that arrived while the call was running outdates its result.
        // Its notification may have found this request still in flight, so
        // the refetch is started here, after the release.
        if let Some(latest_block) = self.invalidator.latest_block() {
            let is_outdated = block_number.is_none_or(|fetched_at| fetched_at < latest_block);
            if policy.block_scoped && is_outdated {
                self.store.mark_stale_before(&key, latest_block);
                self.refetch_if_watched(&key);
            }
        }
    }
}
