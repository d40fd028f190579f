use alloy_primitives::{Address, ChainId, U256};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{derive_key, CacheKey, CallArg, DescriptorError, FunctionSignature};

/// A symbolic block tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BlockTag {
    /// The genesis block
    Earliest,
    /// The most recent block
    Latest,
    /// The pending block
    Pending,
    /// The most recent block that is safe from reorgs under honest majority
    Safe,
    /// The most recent finalized block
    Finalized,
}

/// The block at which a call is executed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BlockTarget {
    /// Block number
    Number(u64),
    /// Block tag
    Tag(BlockTag),
}

/// Overrides that are passed along with a call.
///
/// Any difference in overrides results in a different cache key.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallOverrides {
    /// The sender of the call
    pub from: Option<Address>,
    /// The value sent along with the call
    pub value: Option<U256>,
    /// The gas limit of the call
    pub gas: Option<u64>,
    /// The block at which the call is executed
    pub block: Option<BlockTarget>,
}

/// The full set of parameters identifying one external call.
///
/// Immutable once constructed; the `with_*` methods return a new
/// descriptor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallDescriptor {
    address: Address,
    #[serde(serialize_with = "serialize_signature")]
    function: FunctionSignature,
    args: Vec<CallArg>,
    chain_id: ChainId,
    overrides: CallOverrides,
    scope_key: Option<String>,
}

impl CallDescriptor {
    /// Constructs a descriptor from typed arguments, validating them against
    /// the function signature.
    pub fn new(
        address: Address,
        signature: &str,
        args: Vec<CallArg>,
        chain_id: ChainId,
    ) -> Result<Self, DescriptorError> {
        if chain_id == 0 {
            return Err(DescriptorError::ZeroChainId);
        }

        let function = FunctionSignature::parse(signature)?;
        if function.inputs().len() != args.len() {
            return Err(DescriptorError::ArgumentCount {
                expected: function.inputs().len(),
                actual: args.len(),
            });
        }

        for (index, (arg, param_type)) in args.iter().zip(function.inputs()).enumerate() {
            arg.type_check(param_type)
                .map_err(|reason| DescriptorError::ArgumentMismatch {
                    index,
                    expected: param_type.to_string(),
                    reason,
                })?;
        }

        Ok(Self {
            address,
            function,
            args,
            chain_id,
            overrides: CallOverrides::default(),
            scope_key: None,
        })
    }

    /// Constructs a descriptor from JSON literals, parsing each literal
    /// according to the corresponding parameter type of the signature.
    pub fn from_json_args(
        address: Address,
        signature: &str,
        args: &[Value],
        chain_id: ChainId,
    ) -> Result<Self, DescriptorError> {
        let function = FunctionSignature::parse(signature)?;
        if function.inputs().len() != args.len() {
            return Err(DescriptorError::ArgumentCount {
                expected: function.inputs().len(),
                actual: args.len(),
            });
        }

        let args = function
            .inputs()
            .iter()
            .zip(args)
            .map(|(param_type, value)| CallArg::from_json(param_type, value))
            .collect::<Result<Vec<_>, _>>()?;

        Self::new(address, signature, args, chain_id)
    }

    /// Returns a copy of the descriptor with the provided overrides.
    #[must_use]
    pub fn with_overrides(mut self, overrides: CallOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    /// Returns a copy of the descriptor in the provided scope.
    #[must_use]
    pub fn with_scope_key(mut self, scope_key: impl Into<String>) -> Self {
        self.scope_key = Some(scope_key.into());
        self
    }

    /// The contract address.
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// The parsed function signature.
    pub fn function(&self) -> &FunctionSignature {
        &self.function
    }

    /// The call arguments.
    pub fn args(&self) -> &[CallArg] {
        &self.args
    }

    /// The chain ID.
    pub fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    /// The call overrides.
    pub fn overrides(&self) -> &CallOverrides {
        &self.overrides
    }

    /// The scope key, if any.
    pub fn scope_key(&self) -> Option<&str> {
        self.scope_key.as_deref()
    }

    /// Derives the descriptor's cache key.
    pub fn cache_key(&self) -> CacheKey {
        derive_key(self)
    }
}

fn serialize_signature<S: serde::Serializer>(
    signature: &FunctionSignature,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&signature.canonical())
}
