use std::{collections::HashMap, sync::Arc};

use chain_query_key::CacheKey;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::{
    config::CachePolicy,
    subscribe::{NotificationBus, QueryEvent, SubscriptionId},
    Payload, ProviderError,
};

/// The cached state of a single query.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    /// The payload of the last successful fetch
    pub data: Option<Payload>,
    /// The error of the last fetch, if it failed
    pub error: Option<ProviderError>,
    /// When `data` was fetched, in milliseconds since the UNIX epoch
    pub last_updated: Option<u64>,
    /// The latest block known when `data` was fetched
    pub block_number: Option<u64>,
    /// The caching policy of the query
    pub policy: CachePolicy,
    /// Whether the entry was explicitly invalidated since `data` was fetched
    pub is_invalidated: bool,
    /// Sequence number of the fetch that last wrote the entry
    #[serde(skip)]
    pub sequence: u64,
    /// When the entry was last read or written, in milliseconds since the
    /// UNIX epoch
    #[serde(skip)]
    pub last_accessed: u64,
}

impl CacheEntry {
    fn empty(policy: CachePolicy, now: u64) -> Self {
        Self {
            data: None,
            error: None,
            last_updated: None,
            block_number: None,
            policy,
            is_invalidated: false,
            sequence: 0,
            last_accessed: now,
        }
    }

    /// Whether the entry's data needs to be refetched at the provided time.
    ///
    /// Stale data remains servable.
    pub fn is_stale(&self, now: u64) -> bool {
        if self.data.is_none() || self.is_invalidated {
            return true;
        }

        // Block-scoped entries only become stale through invalidation.
        if self.policy.block_scoped {
            return false;
        }

        self.last_updated.is_none_or(|last_updated| {
            self.policy
                .stale_time
                .is_elapsed(now.saturating_sub(last_updated))
        })
    }

    /// Invalidates a block-scoped entry whose data predates `block_number`.
    fn invalidate_before(&mut self, block_number: u64) -> bool {
        let is_outdated = self
            .block_number
            .is_none_or(|fetched_at| fetched_at < block_number);

        if !self.policy.block_scoped
            || self.data.is_none()
            || self.is_invalidated
            || !is_outdated
        {
            return false;
        }

        self.is_invalidated = true;
        true
    }
}

/// Metadata of a completed fetch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Settlement {
    /// Sequence number assigned when the fetch started
    pub sequence: u64,
    /// Completion time in milliseconds since the UNIX epoch
    pub timestamp: u64,
    /// The latest block known when the fetch started
    pub block_number: Option<u64>,
}

/// Keyed storage of query results.
///
/// Every mutation that changes what a consumer would observe is published to
/// the [`NotificationBus`]. Events are queued while the store's lock is held,
/// so subscribers observe them in mutation order.
pub struct ResultCacheStore {
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
    bus: Arc<NotificationBus>,
}

impl ResultCacheStore {
    /// Constructs an empty store that publishes to the provided bus.
    pub fn new(bus: Arc<NotificationBus>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            bus,
        }
    }

    /// Returns a copy of the entry for `key`, if any.
    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.entries.lock().get(key).cloned()
    }

    /// Registers a read of `key`, creating an empty entry if needed, and
    /// returns a copy of the entry.
    pub fn touch(&self, key: &CacheKey, policy: CachePolicy, now: u64) -> CacheEntry {
        let mut entries = self.entries.lock();
        let entry = entries
            .entry(key.clone())
            .or_insert_with(|| CacheEntry::empty(policy, now));

        entry.policy = policy;
        entry.last_accessed = now;
        entry.clone()
    }

    /// Registers a read of `key` by a new subscription and replays the cached
    /// data, if any, to that subscription only. Returns a copy of the entry.
    ///
    /// The replayed event is ordered with respect to all other events of the
    /// key, so the subscription never observes an older result after a newer
    /// one.
    pub fn observe(
        &self,
        key: &CacheKey,
        subscription_id: SubscriptionId,
        policy: CachePolicy,
        now: u64,
    ) -> CacheEntry {
        let (entry, should_drain) = {
            let mut entries = self.entries.lock();
            let entry = entries
                .entry(key.clone())
                .or_insert_with(|| CacheEntry::empty(policy, now));

            entry.policy = policy;
            entry.last_accessed = now;

            let should_drain = entry.data.clone().is_some_and(|data| {
                self.bus
                    .enqueue_to(key, subscription_id, QueryEvent::Success(data))
            });

            (entry.clone(), should_drain)
        };

        if should_drain {
            self.bus.drain(key);
        }

        entry
    }

    /// Writes the outcome of a fetch. Returns whether it was applied.
    ///
    /// A completion whose sequence number is lower than that of the entry's
    /// last writer is discarded. A failure retains previously fetched data.
    pub fn set(
        &self,
        key: &CacheKey,
        outcome: Result<Payload, ProviderError>,
        settlement: Settlement,
        policy: CachePolicy,
    ) -> bool {
        let should_drain = {
            let mut entries = self.entries.lock();
            let entry = entries
                .entry(key.clone())
                .or_insert_with(|| CacheEntry::empty(policy, settlement.timestamp));

            if settlement.sequence < entry.sequence {
                log::debug!(
                    "Discarding completion #{} for '{key}', entry was written by #{}",
                    settlement.sequence,
                    entry.sequence
                );
                return false;
            }

            entry.sequence = settlement.sequence;
            entry.policy = policy;
            entry.last_accessed = settlement.timestamp;

            let event = match outcome {
                Ok(data) => {
                    entry.data = Some(data.clone());
                    entry.error = None;
                    entry.last_updated = Some(settlement.timestamp);
                    entry.block_number = settlement.block_number;
                    entry.is_invalidated = false;

                    QueryEvent::Success(data)
                }
                Err(error) => {
                    entry.error = Some(error.clone());

                    QueryEvent::Error(error)
                }
            };

            self.bus.enqueue(key, event)
        };

        if should_drain {
            self.bus.drain(key);
        }

        true
    }

    /// Flags the entry for `key` as stale without removing its data. Returns
    /// whether the entry transitioned to stale.
    pub fn mark_stale(&self, key: &CacheKey) -> bool {
        let should_drain = {
            let mut entries = self.entries.lock();
            let Some(entry) = entries.get_mut(key) else {
                return false;
            };

            if entry.is_invalidated {
                return false;
            }

            entry.is_invalidated = true;
            self.bus.enqueue(key, QueryEvent::Stale)
        };

        if should_drain {
            self.bus.drain(key);
        }

        true
    }

    /// Flags all block-scoped entries that were fetched before
    /// `block_number` as stale. Returns the keys that transitioned.
    pub fn mark_block_stale(&self, block_number: u64) -> Vec<CacheKey> {
        let mut staled = Vec::new();
        let mut to_drain = Vec::new();

        {
            let mut entries = self.entries.lock();
            for (key, entry) in entries.iter_mut() {
                if !entry.invalidate_before(block_number) {
                    continue;
                }

                if self.bus.enqueue(key, QueryEvent::Stale) {
                    to_drain.push(key.clone());
                }
                staled.push(key.clone());
            }
        }

        for key in &to_drain {
            self.bus.drain(key);
        }

        staled
    }

    /// Flags the entry for `key` as stale if it's block-scoped and was
    /// fetched before `block_number`. Returns whether the entry transitioned.
    pub fn mark_stale_before(&self, key: &CacheKey, block_number: u64) -> bool {
        let should_drain = {
            let mut entries = self.entries.lock();
            let Some(entry) = entries.get_mut(key) else {
                return false;
            };

            if !entry.invalidate_before(block_number) {
                return false;
            }

            self.bus.enqueue(key, QueryEvent::Stale)
        };

        if should_drain {
            self.bus.drain(key);
        }

        true
    }

    /// Whether the entry for `key` needs to be refetched. Absent entries are
    /// stale.
    pub fn is_stale(&self, key: &CacheKey, now: u64) -> bool {
        self.entries
            .lock()
            .get(key)
            .is_none_or(|entry| entry.is_stale(now))
    }

    /// Removes the entry for `key`.
    pub fn evict(&self, key: &CacheKey) -> Option<CacheEntry> {
        let evicted = self.entries.lock().remove(key);
        if evicted.is_some() {
            log::debug!("Evicted '{key}'");
        }
        evicted
    }

    /// Evicts all entries without subscribers whose retention elapsed.
    /// Returns the evicted keys.
    pub fn sweep(&self, now: u64) -> Vec<CacheKey> {
        let mut evicted = Vec::new();

        self.entries.lock().retain(|key, entry| {
            let is_expired =
                now.saturating_sub(entry.last_accessed) >= entry.policy.cache_time_ms;

            if is_expired && !self.bus.has_subscribers(key) {
                evicted.push(key.clone());
                false
            } else {
                true
            }
        });

        if !evicted.is_empty() {
            log::debug!("Swept {} unobserved cache entries", evicted.len());
        }

        evicted
    }

    /// Returns copies of all entries that hold data.
    pub fn snapshot(&self) -> Vec<(CacheKey, CacheEntry)> {
        self.entries
            .lock()
            .iter()
            .filter(|(_, entry)| entry.data.is_some())
            .map(|(key, entry)| (key.clone(), entry.clone()))
            .collect()
    }

    /// Inserts previously persisted entries. Entries that are already present
    /// are left untouched. Returns the number of inserted entries.
    pub fn restore(
        &self,
        restored: impl IntoIterator<Item = (CacheKey, CacheEntry)>,
        now: u64,
    ) -> usize {
        let mut entries = self.entries.lock();

        let mut inserted = 0;
        for (key, mut entry) in restored {
            if entries.contains_key(&key) {
                continue;
            }

            // Any fetch of this process supersedes a persisted result.
            entry.sequence = 0;
            entry.last_accessed = now;

            entries.insert(key, entry);
            inserted += 1;
        }

        inserted
    }

    /// Returns the keys of all entries.
    pub fn keys(&self) -> Vec<CacheKey> {
        self.entries.lock().keys().cloned().collect()
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
