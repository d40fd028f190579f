#![warn(missing_docs)]

//! Derivation of stable cache keys for contract calls.
//!
//! A [`CallDescriptor`] identifies one external call: the contract address,
//! the function being called, its arguments, the chain and any call
//! overrides. Two descriptors that describe the same call, regardless of how
//! the caller spelled the signature or encoded the numbers, produce the same
//! [`CacheKey`].

mod args;
mod descriptor;
mod error;
mod hasher;
/// Types for indexing the cache.
pub mod key;
mod signature;

pub use alloy_primitives::{Address, Bytes, ChainId, I256, U256};

pub use self::{
    args::CallArg,
    descriptor::{BlockTag, BlockTarget, CallDescriptor, CallOverrides},
    error::DescriptorError,
    hasher::KeyHasher,
    key::{derive_key, CacheKey},
    signature::{FunctionSignature, ParamType},
};
