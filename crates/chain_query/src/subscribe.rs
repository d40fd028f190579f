use core::fmt;
use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Weak,
    },
};

use chain_query_key::CacheKey;
use parking_lot::Mutex;

use crate::{config::CachePolicy, Payload, ProviderError};

/// A state transition of a query.
#[derive(Clone, Debug, PartialEq)]
pub enum QueryEvent {
    /// A fetch started.
    Fetching,
    /// A fetch succeeded.
    Success(Payload),
    /// A fetch failed. Previously fetched data, if any, is retained.
    Error(ProviderError),
    /// The cached data became stale.
    Stale,
}

/// Identifier of a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Subscription event.
#[derive(Clone, Debug, PartialEq)]
pub struct SubscriptionEvent {
    pub subscription_id: SubscriptionId,
    pub key: CacheKey,
    pub event: QueryEvent,
}

/// Supertrait for subscription callbacks.
pub trait SyncSubscriberCallback: Fn(SubscriptionEvent) + Send + Sync {}

impl<F> SyncSubscriberCallback for F where F: Fn(SubscriptionEvent) + Send + Sync {}

/// What a subscription expects of the query it observes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Interest {
    /// Whether the subscriber allows the query to fetch
    pub enabled: bool,
    /// Whether the subscriber wants the query refetched when a block
    /// invalidates it
    pub watch: bool,
    /// The subscriber's caching policy
    pub policy: CachePolicy,
}

impl Interest {
    /// An enabled, unwatched interest with the default policy.
    pub fn passive() -> Self {
        Self {
            enabled: true,
            ..Self::default()
        }
    }
}

struct Subscriber {
    id: SubscriptionId,
    interest: Interest,
    // The bus never keeps a callback alive; the consumer's handle owns it.
    callback: Weak<dyn SyncSubscriberCallback>,
}

struct Pending {
    /// Restricts delivery to a single subscription.
    target: Option<SubscriptionId>,
    event: QueryEvent,
}

#[derive(Default)]
struct Topic {
    subscribers: Vec<Subscriber>,
    pending: VecDeque<Pending>,
    is_draining: bool,
}

impl Topic {
    fn is_unused(&self) -> bool {
        self.subscribers.is_empty() && self.pending.is_empty() && !self.is_draining
    }
}

/// Delivers query events to the subscribers of a key.
///
/// Events of a key are delivered in the order they were published. Callbacks
/// are invoked without holding any lock, so they may publish, subscribe or
/// unsubscribe themselves; events they publish for the same key are queued and
/// delivered after the current one.
#[derive(Default)]
pub struct NotificationBus {
    topics: Mutex<HashMap<CacheKey, Topic>>,
    next_id: AtomicU64,
}

impl NotificationBus {
    /// Constructs an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a callback for the events of `key`. The subscription lasts
    /// until the returned handle is dropped.
    pub fn subscribe(
        self: &Arc<Self>,
        key: CacheKey,
        callback: impl SyncSubscriberCallback + 'static,
    ) -> SubscriptionHandle {
        self.subscribe_with(key, Interest::passive(), callback)
    }

    /// Registers a callback for the events of `key` together with what the
    /// subscriber expects of the query.
    pub fn subscribe_with(
        self: &Arc<Self>,
        key: CacheKey,
        interest: Interest,
        callback: impl SyncSubscriberCallback + 'static,
    ) -> SubscriptionHandle {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let callback: Arc<dyn SyncSubscriberCallback> = Arc::new(callback);

        self.topics
            .lock()
            .entry(key.clone())
            .or_default()
            .subscribers
            .push(Subscriber {
                id,
                interest,
                callback: Arc::downgrade(&callback),
            });

        log::trace!("Subscription {id} registered for '{key}'");

        SubscriptionHandle {
            id,
            key,
            _callback: callback,
            bus: Arc::downgrade(self),
        }
    }

    /// Removes a subscription. Equivalent to dropping the handle.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) {
        drop(handle);
    }

    /// Publishes an event to all subscribers of `key`.
    pub fn publish(&self, key: &CacheKey, event: QueryEvent) {
        if self.enqueue(key, event) {
            self.drain(key);
        }
    }

    /// Returns the number of live subscriptions for `key`.
    pub fn subscriber_count(&self, key: &CacheKey) -> usize {
        self.topics.lock().get(key).map_or(0, |topic| {
            topic
                .subscribers
                .iter()
                .filter(|subscriber| subscriber.callback.strong_count() > 0)
                .count()
        })
    }

    /// Whether `key` has at least one live subscription.
    pub fn has_subscribers(&self, key: &CacheKey) -> bool {
        self.subscriber_count(key) > 0
    }

    /// Whether any live subscription of `key` has an interest that satisfies
    /// `predicate`.
    pub fn has_interest(&self, key: &CacheKey, predicate: impl Fn(&Interest) -> bool) -> bool {
        self.topics.lock().get(key).is_some_and(|topic| {
            topic.subscribers.iter().any(|subscriber| {
                subscriber.callback.strong_count() > 0 && predicate(&subscriber.interest)
            })
        })
    }

    /// Returns the strictest policy among the live subscriptions of `key`, if
    /// it has any.
    pub fn merged_policy(&self, key: &CacheKey) -> Option<CachePolicy> {
        let topics = self.topics.lock();
        let topic = topics.get(key)?;

        topic
            .subscribers
            .iter()
            .filter(|subscriber| subscriber.callback.strong_count() > 0)
            .map(|subscriber| subscriber.interest.policy)
            .reduce(CachePolicy::merge)
    }

    /// Queues an event. Returns whether the caller is responsible for
    /// draining the queue by calling [`NotificationBus::drain`].
    ///
    /// Splitting enqueueing from delivery allows the cache store to enqueue
    /// while it holds its own lock, which fixes the delivery order to the
    /// order of mutation, and deliver after releasing it.
    pub(crate) fn enqueue(&self, key: &CacheKey, event: QueryEvent) -> bool {
        self.push_pending(key, None, event)
    }

    /// Queues an event for a single subscription. See
    /// [`NotificationBus::enqueue`].
    pub(crate) fn enqueue_to(
        &self,
        key: &CacheKey,
        subscription_id: SubscriptionId,
        event: QueryEvent,
    ) -> bool {
        self.push_pending(key, Some(subscription_id), event)
    }

    fn push_pending(
        &self,
        key: &CacheKey,
        target: Option<SubscriptionId>,
        event: QueryEvent,
    ) -> bool {
        let mut topics = self.topics.lock();
        let Some(topic) = topics.get_mut(key) else {
            return false;
        };

        topic.pending.push_back(Pending { target, event });
        if topic.is_draining {
            false
        } else {
            topic.is_draining = true;
            true
        }
    }

    /// Delivers queued events until the queue of `key` is empty.
    pub(crate) fn drain(&self, key: &CacheKey) {
        let mut guard = DrainGuard {
            bus: self,
            key,
            is_done: false,
        };

        loop {
            let (event, callbacks) = {
                let mut topics = self.topics.lock();
                let Some(topic) = topics.get_mut(key) else {
                    guard.is_done = true;
                    return;
                };

                let Some(Pending { target, event }) = topic.pending.pop_front() else {
                    topic.is_draining = false;
                    if topic.is_unused() {
                        topics.remove(key);
                    }

                    guard.is_done = true;
                    return;
                };

                topic
                    .subscribers
                    .retain(|subscriber| subscriber.callback.strong_count() > 0);

                let callbacks = topic
                    .subscribers
                    .iter()
                    .filter(|subscriber| target.is_none_or(|target| target == subscriber.id))
                    .filter_map(|subscriber| {
                        subscriber
                            .callback
                            .upgrade()
                            .map(|callback| (subscriber.id, callback))
                    })
                    .collect::<Vec<_>>();

                (event, callbacks)
            };

            for (subscription_id, callback) in callbacks {
                callback(SubscriptionEvent {
                    subscription_id,
                    key: key.clone(),
                    event: event.clone(),
                });
            }
        }
    }

    fn remove_subscriber(&self, key: &CacheKey, id: SubscriptionId) {
        let mut topics = self.topics.lock();
        if let Some(topic) = topics.get_mut(key) {
            topic.subscribers.retain(|subscriber| subscriber.id != id);
            if topic.is_unused() {
                topics.remove(key);
            }
        }

        log::trace!("Subscription {id} for '{key}' removed");
    }
}

/// Resets the draining flag if a callback panics, so later events of the key
/// are still delivered.
struct DrainGuard<'a> {
    bus: &'a NotificationBus,
    key: &'a CacheKey,
    is_done: bool,
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        if !self.is_done {
            let mut topics = self.bus.topics.lock();
            if let Some(topic) = topics.get_mut(self.key) {
                topic.is_draining = false;
                topic.pending.clear();
            }
        }
    }
}

/// A registered subscription. Dropping it unsubscribes.
pub struct SubscriptionHandle {
    id: SubscriptionId,
    key: CacheKey,
    // Owns the callback; the bus only holds a weak reference.
    _callback: Arc<dyn SyncSubscriberCallback>,
    bus: Weak<NotificationBus>,
}

impl SubscriptionHandle {
    /// The subscription's identifier.
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// The key the subscription observes.
    pub fn key(&self) -> &CacheKey {
        &self.key
    }
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.id)
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.remove_subscriber(&self.key, self.id);
        }
    }
}

/// Lifecycle callbacks of a query, as an alternative to handling
/// [`QueryEvent`]s directly.
#[derive(Default)]
pub struct QueryCallbacks {
    on_success: Option<Box<dyn Fn(&Payload) + Send + Sync>>,
    on_error: Option<Box<dyn Fn(&ProviderError) + Send + Sync>>,
    on_settled: Option<Box<dyn Fn(Option<&Payload>, Option<&ProviderError>) + Send + Sync>>,
}

impl QueryCallbacks {
    /// Constructs an instance without callbacks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Called when a fetch succeeds or fresh data is served from the cache.
    #[must_use]
    pub fn on_success(mut self, callback: impl Fn(&Payload) + Send + Sync + 'static) -> Self {
        self.on_success = Some(Box::new(callback));
        self
    }

    /// Called when a fetch fails.
    #[must_use]
    pub fn on_error(mut self, callback: impl Fn(&ProviderError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Box::new(callback));
        self
    }

    /// Called after either `on_success` or `on_error`.
    #[must_use]
    pub fn on_settled(
        mut self,
        callback: impl Fn(Option<&Payload>, Option<&ProviderError>) + Send + Sync + 'static,
    ) -> Self {
        self.on_settled = Some(Box::new(callback));
        self
    }

    /// Converts the callbacks into a subscriber callback.
    pub fn into_subscriber(self) -> impl SyncSubscriberCallback + 'static {
        move |event: SubscriptionEvent| match &event.event {
            QueryEvent::Success(data) => {
                if let Some(on_success) = &self.on_success {
                    on_success(data);
                }
                if let Some(on_settled) = &self.on_settled {
                    on_settled(Some(data), None);
                }
            }
            QueryEvent::Error(error) => {
                if let Some(on_error) = &self.on_error {
                    on_error(error);
                }
                if let Some(on_settled) = &self.on_settled {
                    on_settled(None, Some(error));
                }
            }
            QueryEvent::Fetching | QueryEvent::Stale => {}
        }
    }
}
