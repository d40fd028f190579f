use core::fmt;
use std::sync::Arc;

use chain_query_key::{CacheKey, CallDescriptor};
use parking_lot::Mutex;
use serde::Serialize;

use crate::{
    executor::QueryExecutor, time::TimeSinceEpoch, Provider, ProviderError, TransactionHandle,
};

/// Request-lifecycle status of a mutation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum MutationStatus {
    /// Nothing was sent yet, or the mutation was reset.
    #[default]
    Idle,
    /// A send is in progress.
    Loading,
    /// The last send succeeded.
    Success,
    /// The last send failed.
    Error,
}

/// A state transition of a mutation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MutationEvent {
    /// A send started.
    Loading,
    /// A send succeeded.
    Success(TransactionHandle),
    /// A send failed.
    Error(ProviderError),
}

/// The observable state of a mutation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MutationState {
    pub status: MutationStatus,
    pub data: Option<TransactionHandle>,
    pub error: Option<ProviderError>,
}

impl MutationState {
    pub fn is_idle(&self) -> bool {
        self.status == MutationStatus::Idle
    }

    pub fn is_loading(&self) -> bool {
        self.status == MutationStatus::Loading
    }

    pub fn is_success(&self) -> bool {
        self.status == MutationStatus::Success
    }

    pub fn is_error(&self) -> bool {
        self.status == MutationStatus::Error
    }
}

type MutationListener = Box<dyn Fn(&MutationEvent) + Send + Sync>;

struct Tracked {
    state: MutationState,
    /// Incremented by every send and reset, so only the latest send settles
    /// the state.
    generation: u64,
}

/// A state-changing call with request-lifecycle tracking.
///
/// Writes are neither cached nor de-duplicated: every [`Mutation::send`] is
/// one external operation.
pub struct Mutation<ProviderT: Provider, TimerT: TimeSinceEpoch> {
    executor: Arc<QueryExecutor<ProviderT, TimerT>>,
    tracked: Mutex<Tracked>,
    invalidates: Vec<CacheKey>,
    listeners: Vec<MutationListener>,
}

impl<ProviderT: Provider, TimerT: TimeSinceEpoch> Mutation<ProviderT, TimerT> {
    pub(crate) fn new(executor: Arc<QueryExecutor<ProviderT, TimerT>>) -> Self {
        Self {
            executor,
            tracked: Mutex::new(Tracked {
                state: MutationState::default(),
                generation: 0,
            }),
            invalidates: Vec::new(),
            listeners: Vec::new(),
        }
    }

    /// Cache keys that are invalidated, and refetched if observed, after a
    /// successful send.
    #[must_use]
    pub fn invalidates(mut self, keys: impl IntoIterator<Item = CacheKey>) -> Self {
        self.invalidates.extend(keys);
        self
    }

    /// Registers a listener for the mutation's events.
    #[must_use]
    pub fn on_event(mut self, listener: impl Fn(&MutationEvent) + Send + Sync + 'static) -> Self {
        self.listeners.push(Box::new(listener));
        self
    }

    /// Returns a copy of the current state.
    pub fn state(&self) -> MutationState {
        self.tracked.lock().state.clone()
    }

    /// Submits the call.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
    pub async fn send(
        &self,
        descriptor: &CallDescriptor,
    ) -> Result<TransactionHandle, ProviderError> {
        let generation = {
            let mut tracked = self.tracked.lock();
            tracked.generation += 1;
            tracked.state = MutationState {
                status: MutationStatus::Loading,
                data: None,
                error: None,
            };
            tracked.generation
        };
        self.emit(&MutationEvent::Loading);

        let result = self.executor.provider().send(descriptor).await;

        let is_latest = {
            let mut tracked = self.tracked.lock();
            let is_latest = tracked.generation == generation;
            if is_latest {
                tracked.state = match &result {
                    Ok(handle) => MutationState {
                        status: MutationStatus::Success,
                        data: Some(*handle),
                        error: None,
                    },
                    Err(error) => MutationState {
                        status: MutationStatus::Error,
                        data: None,
                        error: Some(error.clone()),
                    },
                };
            }
            is_latest
        };

        match &result {
            Ok(handle) => {
                log::debug!("Sent transaction {}", handle.hash);

                for key in &self.invalidates {
                    self.executor.store().mark_stale(key);
                    self.executor.refetch_if_observed(key);
                }
            }
            Err(error) => log::debug!("Failed to send transaction: {error}"),
        }

        // Listeners observe superseded sends as well; only the state is
        // restricted to the latest one.
        self.emit(&match &result {
            Ok(handle) => MutationEvent::Success(*handle),
            Err(error) => MutationEvent::Error(error.clone()),
        });

        if !is_latest {
            log::trace!("Mutation was reset or resent before the send settled");
        }

        result
    }

    /// Returns the mutation to [`MutationStatus::Idle`]. A send that is in
    /// progress no longer affects the state when it settles.
    pub fn reset(&self) {
        let mut tracked = self.tracked.lock();
        tracked.generation += 1;
        tracked.state = MutationState::default();
    }

    fn emit(&self, event: &MutationEvent) {
        for listener in &self.listeners {
            listener(event);
        }
    }
}

impl<ProviderT: Provider, TimerT: TimeSinceEpoch> fmt::Debug for Mutation<ProviderT, TimerT> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutation")
            .field("state", &self.tracked.lock().state)
            .field("invalidates", &self.invalidates)
            .finish_non_exhaustive()
    }
}
