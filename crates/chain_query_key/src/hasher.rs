use alloy_primitives::{Address, I256, U256};
use sha3::{digest::FixedOutput, Digest, Sha3_256};

use crate::{key::CacheKeyVariant, BlockTag, BlockTarget, CallArg, CallOverrides};

/// Incrementally hashes the fields of a call descriptor into a cache key.
#[derive(Debug, Clone)]
pub struct KeyHasher {
    hasher: Sha3_256,
}

// The methods take `mut self` instead of `&mut self` so a hasher can be
// threaded through a chain of calls and finalized exactly once.
//
// Before variants of an enum are hashed, a variant marker is hashed before
// hashing the values of the variants to distinguish between them. E.g. the hash
// of `CallArg::Uint(1)` should not equal the hash of `CallArg::Int(1)`, since
// these are not logically equivalent.
//
// Instead of ignoring `None` values, the same pattern is followed for Options
// in order to let us distinguish between `{ from: None, gas: Some(1) }` and
// `{ from: Some(..), gas: None }`.
//
// Sequences and strings are prefixed with their length to avoid [prefix
// collisions](https://doc.rust-lang.org/std/hash/trait.Hash.html#prefix-collisions).
impl KeyHasher {
    /// Constructs a new hasher.
    pub fn new() -> Self {
        Self {
            hasher: Sha3_256::new(),
        }
    }

    /// Hashes raw bytes without a length prefix.
    pub fn hash_bytes(mut self, bytes: impl AsRef<[u8]>) -> Self {
        self.hasher.update(bytes);

        self
    }

    /// Hashes a length-prefixed byte sequence.
    pub fn hash_byte_sequence(self, bytes: &[u8]) -> Self {
        self.hash_u64(bytes.len() as u64).hash_bytes(bytes)
    }

    /// Hashes a length-prefixed UTF-8 string.
    pub fn hash_str(self, value: &str) -> Self {
        self.hash_byte_sequence(value.as_bytes())
    }

    /// Hashes a single byte.
    pub fn hash_u8(self, value: u8) -> Self {
        self.hash_bytes(value.to_le_bytes())
    }

    /// Hashes a boolean as a single byte.
    pub fn hash_bool(self, value: bool) -> Self {
        self.hash_u8(u8::from(value))
    }

    /// Hashes a `u64` in little-endian byte order.
    pub fn hash_u64(self, value: u64) -> Self {
        self.hash_bytes(value.to_le_bytes())
    }

    /// Hashes the 20 bytes of an address.
    pub fn hash_address(self, address: &Address) -> Self {
        self.hash_bytes(address)
    }

    /// Hashes a `U256` in little-endian byte order.
    pub fn hash_u256(self, value: &U256) -> Self {
        self.hash_bytes(value.as_le_bytes())
    }

    /// Hashes the two's complement representation of an `I256`.
    pub fn hash_i256(self, value: &I256) -> Self {
        self.hash_u256(&value.into_raw())
    }

    /// Hashes a call argument, recursing into arrays and tuples.
    pub fn hash_call_arg(self, arg: &CallArg) -> Self {
        let this = self.hash_u8(arg.cache_key_variant());

        match arg {
            CallArg::Address(address) => this.hash_address(address),
            CallArg::Bool(value) => this.hash_bool(*value),
            CallArg::Uint(value) => this.hash_u256(value),
            CallArg::Int(value) => this.hash_i256(value),
            CallArg::FixedBytes(bytes) | CallArg::Bytes(bytes) => this.hash_byte_sequence(bytes),
            CallArg::String(value) => this.hash_str(value),
            CallArg::Array(elements) | CallArg::Tuple(elements) => this.hash_call_args(elements),
        }
    }

    /// Hashes a length-prefixed sequence of call arguments.
    pub fn hash_call_args(self, args: &[CallArg]) -> Self {
        let mut this = self.hash_u64(args.len() as u64);
        for arg in args {
            this = this.hash_call_arg(arg);
        }
        this
    }

    /// Hashes the block a call is executed against.
    pub fn hash_block_target(self, block: &BlockTarget) -> Self {
        let this = self.hash_u8(block.cache_key_variant());

        match block {
            BlockTarget::Number(block_number) => this.hash_u64(*block_number),
            BlockTarget::Tag(tag) => this.hash_u8(tag.cache_key_variant()),
        }
    }

    /// Hashes call overrides, prefixing each field with whether it's set.
    pub fn hash_overrides(self, overrides: &CallOverrides) -> Self {
        // Destructuring to make sure we get a compiler error here if the fields change.
        let CallOverrides {
            from,
            value,
            gas,
            block,
        } = overrides;

        let mut this = self.hash_u8(from.cache_key_variant());
        if let Some(from) = from {
            this = this.hash_address(from);
        }

        this = this.hash_u8(value.cache_key_variant());
        if let Some(value) = value {
            this = this.hash_u256(value);
        }

        this = this.hash_u8(gas.cache_key_variant());
        if let Some(gas) = gas {
            this = this.hash_u64(*gas);
        }

        this = this.hash_u8(block.cache_key_variant());
        if let Some(block) = block {
            this = this.hash_block_target(block);
        }

        this
    }

    /// Finalizes the hash and returns it as a hex-encoded string.
    pub fn finalize(self) -> String {
        hex::encode(self.hasher.finalize_fixed())
    }
}

impl Default for KeyHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheKeyVariant for CallArg {
    fn cache_key_variant(&self) -> u8 {
        match self {
            CallArg::Address(_) => 0,
            CallArg::Bool(_) => 1,
            CallArg::Uint(_) => 2,
            CallArg::Int(_) => 3,
            CallArg::FixedBytes(_) => 4,
            CallArg::Bytes(_) => 5,
            CallArg::String(_) => 6,
            CallArg::Array(_) => 7,
            CallArg::Tuple(_) => 8,
        }
    }
}

impl CacheKeyVariant for BlockTarget {
    fn cache_key_variant(&self) -> u8 {
        match self {
            BlockTarget::Number(_) => 0,
            BlockTarget::Tag(_) => 1,
        }
    }
}

impl CacheKeyVariant for BlockTag {
    fn cache_key_variant(&self) -> u8 {
        match self {
            BlockTag::Earliest => 0,
            BlockTag::Latest => 1,
            BlockTag::Pending => 2,
            BlockTag::Safe => 3,
            BlockTag::Finalized => 4,
        }
    }
}
