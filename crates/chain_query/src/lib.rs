//! An asynchronous cache of contract call results.
//!
//! Consumers read queries through a [`QueryClient`]. Concurrent reads of the
//! same call share a single external request, cached results are served until
//! they become stale by the passage of time or by the arrival of a new block,
//! and every state transition of a query is delivered to its subscribers in
//! order.

mod client;
/// Types for configuring the cache.
pub mod config;
mod error;
/// Types for orchestrating fetches.
pub mod executor;
mod gc;
/// Types for de-duplicating concurrent requests.
pub mod inflight;
/// Types for block-driven invalidation.
pub mod invalidator;
mod mutation;
/// Types for persisting the cache.
pub mod persist;
mod provider;
/// Types for storing query results.
pub mod store;
/// Types for observing queries.
pub mod subscribe;
/// Types for reporting time.
pub mod time;

pub use chain_query_key::{CacheKey, CallArg, CallDescriptor, CallOverrides};

pub use self::{
    client::{QueryClient, QueryState, QueryStatus, QuerySubscription},
    config::{QueryClientConfig, ReadOptions, StaleTime},
    error::{PersistenceError, ProviderError, QueryError, ValidationError},
    inflight::Waiter,
    invalidator::BlockWatcher,
    mutation::{Mutation, MutationEvent, MutationState, MutationStatus},
    provider::{Payload, Provider, TransactionHandle},
    subscribe::{QueryCallbacks, QueryEvent, SubscriptionEvent, SubscriptionId},
};
