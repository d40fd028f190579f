//! Utilities for testing the query cache.

mod block_source;
mod events;
/// Call descriptors of a token contract.
pub mod fixtures;
mod provider;

pub use self::{
    block_source::BlockFeed,
    events::EventLog,
    provider::{Gate, MockProvider},
};
