use std::io;

use chain_query_key::{CacheKey, DescriptorError};
use serde::{Deserialize, Serialize};

/// Error that is returned before any external call is made.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// The call descriptor is malformed.
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
    /// The query is disabled, so it cannot be fetched.
    #[error("Query is disabled")]
    Disabled,
    /// No consumer ever registered a query for the key, so the call it
    /// represents is unknown.
    #[error("No query is registered for cache key '{0}'")]
    UnknownKey(CacheKey),
}

/// Error reported by the external provider.
///
/// Cloneable, since a single outcome is shared by all consumers waiting on the
/// same fetch, and serializable, since it is recorded on the cache entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum ProviderError {
    /// The request could not be delivered or the response was lost.
    #[error("Network error: {message}")]
    Network {
        /// Description of the failure
        message: String,
    },
    /// The node returned a JSON-RPC error.
    #[error("JSON-RPC error {code}: {message}")]
    JsonRpc {
        /// The JSON-RPC error code
        code: i64,
        /// The JSON-RPC error message
        message: String,
    },
    /// The call reverted.
    #[error("Execution reverted: {reason}")]
    Reverted {
        /// The decoded revert reason
        reason: String,
        /// The raw revert data, if any
        data: Option<alloy_primitives::Bytes>,
    },
    /// Any other provider failure.
    #[error("{message}")]
    Other {
        /// Description of the failure
        message: String,
    },
}

/// Error returned by a query.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    /// The query was rejected before any external call was made.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// The external call failed.
    #[error(transparent)]
    Provider(#[from] ProviderError),
    /// The fetch ended without settling, e.g. because the runtime shut down.
    #[error("The fetch for cache key '{0}' ended without a result")]
    Abandoned(CacheKey),
}

impl From<DescriptorError> for QueryError {
    fn from(value: DescriptorError) -> Self {
        Self::Validation(ValidationError::Descriptor(value))
    }
}

/// Wrapper for IO and JSON errors specific to persisting the cache.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    /// An IO error
    #[error(transparent)]
    Io(#[from] io::Error),
    /// A JSON (de)serialization error
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    /// The snapshot was written by an incompatible version.
    #[error("Unsupported cache snapshot version {found}, expected {expected}")]
    UnsupportedVersion {
        /// Version found in the snapshot
        found: u32,
        /// Version supported by this build
        expected: u32,
    },
}
