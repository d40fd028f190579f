use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Weak,
    },
};

use chain_query_key::CacheKey;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::{Payload, QueryError};

/// The shared outcome of a fetch.
pub type Outcome = Result<Payload, QueryError>;

struct InFlightRequest {
    sequence: u64,
    waiters: HashMap<u64, oneshot::Sender<Outcome>>,
}

/// De-duplicates concurrent fetches of the same key.
///
/// At most one request is in flight per key. Callers that arrive while a
/// request is in flight attach to it and receive its outcome.
pub struct InFlightTracker {
    requests: Mutex<HashMap<CacheKey, InFlightRequest>>,
    next_sequence: AtomicU64,
    next_waiter_id: AtomicU64,
}

/// The result of [`InFlightTracker::acquire`].
#[derive(Debug)]
pub struct Acquisition {
    /// Whether the caller started a new request and is responsible for
    /// performing the external call and releasing the request.
    pub is_new: bool,
    /// The sequence number of the in-flight request.
    pub sequence: u64,
    /// Resolves to the request's outcome.
    pub waiter: Waiter,
}

impl InFlightTracker {
    /// Constructs an empty tracker.
    pub fn new() -> Self {
        Self {
            requests: Mutex::new(HashMap::new()),
            // Zero is reserved for entries that were not written by a fetch.
            next_sequence: AtomicU64::new(1),
            next_waiter_id: AtomicU64::new(0),
        }
    }

    /// Attaches to the request that is in flight for `key`, or starts a new
    /// one if there is none.
    pub fn acquire(self: &Arc<Self>, key: &CacheKey) -> Acquisition {
        let mut requests = self.requests.lock();

        let is_new = !requests.contains_key(key);
        let request = requests
            .entry(key.clone())
            .or_insert_with(|| InFlightRequest {
                sequence: self.next_sequence.fetch_add(1, Ordering::SeqCst),
                waiters: HashMap::new(),
            });

        let sequence = request.sequence;
        let waiter = self.register_waiter(key, request);

        Acquisition {
            is_new,
            sequence,
            waiter,
        }
    }

    /// Attaches to the request that is in flight for `key`, if any.
    pub fn attach(self: &Arc<Self>, key: &CacheKey) -> Option<Waiter> {
        let mut requests = self.requests.lock();
        let request = requests.get_mut(key)?;

        Some(self.register_waiter(key, request))
    }

    /// Settles all waiters of the request for `key` with the provided outcome
    /// and removes the request. Returns the number of notified waiters.
    ///
    /// Has no effect if the request in flight has a different sequence number.
    pub fn release(&self, key: &CacheKey, sequence: u64, outcome: Outcome) -> usize {
        let request = {
            let mut requests = self.requests.lock();
            match requests.get(key) {
                Some(request) if request.sequence == sequence => requests.remove(key),
                _ => None,
            }
        };

        let Some(request) = request else {
            log::warn!("Released request #{sequence} for '{key}' that is not in flight");
            return 0;
        };

        request
            .waiters
            .into_values()
            .map(|sender| sender.send(outcome.clone()).is_ok())
            .filter(|is_delivered| *is_delivered)
            .count()
    }

    /// Whether a request is in flight for `key`.
    pub fn is_in_flight(&self, key: &CacheKey) -> bool {
        self.requests.lock().contains_key(key)
    }

    /// Returns the number of waiters attached to the request for `key`.
    pub fn waiter_count(&self, key: &CacheKey) -> usize {
        self.requests
            .lock()
            .get(key)
            .map_or(0, |request| request.waiters.len())
    }

    fn register_waiter(
        self: &Arc<Self>,
        key: &CacheKey,
        request: &mut InFlightRequest,
    ) -> Waiter {
        let id = self.next_waiter_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = oneshot::channel();
        request.waiters.insert(id, sender);

        Waiter {
            id,
            key: key.clone(),
            receiver,
            tracker: Arc::downgrade(self),
        }
    }

    fn detach(&self, key: &CacheKey, id: u64) {
        // The request keeps running without waiters; its result still
        // populates the cache.
        if let Some(request) = self.requests.lock().get_mut(key) {
            request.waiters.remove(&id);
        }
    }
}

impl Default for InFlightTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// A handle to the eventual outcome of an in-flight request. Dropping it
/// detaches from the request without cancelling it.
#[derive(Debug)]
pub struct Waiter {
    id: u64,
    key: CacheKey,
    receiver: oneshot::Receiver<Outcome>,
    tracker: Weak<InFlightTracker>,
}

impl Waiter {
    /// The key of the request.
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Waits for the request to settle.
    pub async fn wait(mut self) -> Outcome {
        match (&mut self.receiver).await {
            Ok(outcome) => outcome,
            Err(_) => Err(QueryError::Abandoned(self.key.clone())),
        }
    }
}

impl Drop for Waiter {
    fn drop(&mut self) {
        if let Some(tracker) = self.tracker.upgrade() {
            tracker.detach(&self.key, self.id);
        }
    }
}

/// Releases an acquired request when dropped, so its waiters never hang if
/// the fetch ends without settling.
pub struct InFlightGuard {
    tracker: Arc<InFlightTracker>,
    key: CacheKey,
    sequence: u64,
    is_released: bool,
}

impl InFlightGuard {
    /// Constructs a guard for a request that was acquired as new.
    pub fn new(tracker: Arc<InFlightTracker>, key: CacheKey, sequence: u64) -> Self {
        Self {
            tracker,
            key,
            sequence,
            is_released: false,
        }
    }

    /// Settles the request's waiters. Returns the number of notified waiters.
    pub fn release(mut self, outcome: Outcome) -> usize {
        self.is_released = true;
        self.tracker.release(&self.key, self.sequence, outcome)
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if !self.is_released {
            log::warn!(
                "Fetch #{} for '{}' ended without settling",
                self.sequence,
                self.key
            );

            self.tracker.release(
                &self.key,
                self.sequence,
                Err(QueryError::Abandoned(self.key.clone())),
            );
        }
    }
}
