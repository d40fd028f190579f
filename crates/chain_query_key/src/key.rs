use core::fmt;

use serde::{Deserialize, Serialize};

use crate::{CallDescriptor, KeyHasher};

/// Bumped whenever the hashing scheme changes, so keys persisted by an older
/// version never collide with keys derived by this one.
const KEY_VERSION: u8 = 1;

/// Trait for retrieving the unique id of an enum variant.
// This could be replaced by the unstable
// [`core::intrinsics::discriminant_value`](https://dev-doc.rust-lang.org/beta/core/intrinsics/fn.discriminant_value.html)
// function once it becomes stable.
pub trait CacheKeyVariant {
    /// Returns the variant marker that is hashed before the variant's values.
    fn cache_key_variant(&self) -> u8;
}

impl<T> CacheKeyVariant for Option<T> {
    fn cache_key_variant(&self) -> u8 {
        match self {
            None => 0,
            Some(_) => 1,
        }
    }
}

/// An opaque key that identifies a cached call result.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct CacheKey(String);

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derives the cache key of a call descriptor.
///
/// Deterministic and order-sensitive: equal descriptors produce equal keys and
/// any difference in chain, address, function, arguments, overrides or scope
/// produces a different key.
pub fn derive_key(descriptor: &CallDescriptor) -> CacheKey {
    let scope_key = descriptor.scope_key();

    let mut hasher = KeyHasher::new()
        .hash_u8(KEY_VERSION)
        .hash_u64(descriptor.chain_id())
        .hash_address(descriptor.address())
        .hash_str(&descriptor.function().canonical())
        .hash_call_args(descriptor.args())
        .hash_overrides(descriptor.overrides())
        .hash_u8(scope_key.cache_key_variant());

    if let Some(scope_key) = scope_key {
        hasher = hasher.hash_str(scope_key);
    }

    CacheKey(hasher.finalize())
}
