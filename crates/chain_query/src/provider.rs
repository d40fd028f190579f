use core::future::Future;
use std::sync::Arc;

use alloy_primitives::B256;
use chain_query_key::{CallDescriptor, ChainId};
use serde::{Deserialize, Serialize};

use crate::ProviderError;

/// The opaque result of a read call.
pub type Payload = serde_json::Value;

/// Identifies a transaction that was submitted by [`Provider::send`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionHandle {
    /// The transaction hash
    pub hash: B256,
    /// The chain the transaction was submitted to
    pub chain_id: ChainId,
}

/// The host's connection to a chain.
///
/// Encoding, signing and transport are the provider's concern; the cache only
/// observes success or failure and an opaque payload.
pub trait Provider: Send + Sync + 'static {
    /// Executes a read call.
    fn call(
        &self,
        descriptor: &CallDescriptor,
    ) -> impl Future<Output = Result<Payload, ProviderError>> + Send;

    /// Submits a state-changing call.
    fn send(
        &self,
        descriptor: &CallDescriptor,
    ) -> impl Future<Output = Result<TransactionHandle, ProviderError>> + Send;
}

impl<ProviderT: Provider> Provider for Arc<ProviderT> {
    fn call(
        &self,
        descriptor: &CallDescriptor,
    ) -> impl Future<Output = Result<Payload, ProviderError>> + Send {
        self.as_ref().call(descriptor)
    }

    fn send(
        &self,
        descriptor: &CallDescriptor,
    ) -> impl Future<Output = Result<TransactionHandle, ProviderError>> + Send {
        self.as_ref().send(descriptor)
    }
}
