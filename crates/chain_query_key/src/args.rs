use core::str::FromStr;

use alloy_primitives::{Address, Bytes, I256, Sign, U256};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{signature::is_bit_width, DescriptorError, ParamType};

/// A typed call argument.
///
/// Numbers are stored by value, so the textual representation a caller used
/// (decimal, hexadecimal, leading zeros) doesn't leak into the cache key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum CallArg {
    /// An address
    Address(Address),
    /// A boolean
    Bool(bool),
    /// An unsigned integer
    Uint(U256),
    /// A signed integer
    Int(I256),
    /// A fixed-size byte array
    FixedBytes(Bytes),
    /// A dynamically-sized byte array
    Bytes(Bytes),
    /// A UTF-8 string
    String(String),
    /// An array; used for both fixed-size and dynamically-sized arrays
    Array(Vec<CallArg>),
    /// A tuple
    Tuple(Vec<CallArg>),
}

impl CallArg {
    /// Parses a JSON literal as a value of the provided parameter type.
    ///
    /// Integers can be provided as JSON numbers or as decimal or
    /// `0x`-prefixed hexadecimal strings. Byte arrays are `0x`-prefixed hex
    /// strings. Arrays and tuples are JSON arrays.
    pub fn from_json(param_type: &ParamType, value: &Value) -> Result<Self, DescriptorError> {
        let invalid = || DescriptorError::InvalidLiteral {
            literal: value.to_string(),
            expected: param_type.to_string(),
        };

        let arg = match (param_type, value) {
            (ParamType::Address, Value::String(literal)) => {
                Address::from_str(literal.trim()).map(Self::Address).map_err(|_| invalid())?
            }
            (ParamType::Bool, Value::Bool(value)) => Self::Bool(*value),
            (ParamType::Bool, Value::String(literal)) => match literal.trim() {
                "true" => Self::Bool(true),
                "false" => Self::Bool(false),
                _ => return Err(invalid()),
            },
            (ParamType::Uint(_), Value::Number(number)) => {
                number.as_u64().map(|value| Self::Uint(U256::from(value))).ok_or_else(invalid)?
            }
            (ParamType::Uint(_), Value::String(literal)) => {
                parse_uint_literal(literal).map(Self::Uint).ok_or_else(invalid)?
            }
            (ParamType::Int(_), Value::Number(number)) => number
                .as_i64()
                .and_then(|value| I256::try_from(value).ok())
                .map(Self::Int)
                .ok_or_else(invalid)?,
            (ParamType::Int(_), Value::String(literal)) => {
                parse_int_literal(literal).map(Self::Int).ok_or_else(invalid)?
            }
            (ParamType::FixedBytes(_), Value::String(literal)) => {
                parse_bytes_literal(literal).map(Self::FixedBytes).ok_or_else(invalid)?
            }
            (ParamType::Bytes, Value::String(literal)) => {
                parse_bytes_literal(literal).map(Self::Bytes).ok_or_else(invalid)?
            }
            (ParamType::String, Value::String(literal)) => Self::String(literal.clone()),
            (
                ParamType::Array(element_type) | ParamType::FixedArray(element_type, _),
                Value::Array(elements),
            ) => elements
                .iter()
                .map(|element| Self::from_json(element_type, element))
                .collect::<Result<Vec<_>, _>>()
                .map(Self::Array)?,
            (ParamType::Tuple(component_types), Value::Array(components))
                if component_types.len() == components.len() =>
            {
                component_types
                    .iter()
                    .zip(components)
                    .map(|(component_type, component)| Self::from_json(component_type, component))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Self::Tuple)?
            }
            _ => return Err(invalid()),
        };

        arg.type_check(param_type).map_err(|_| invalid())?;
        Ok(arg)
    }

    /// Verifies that the argument is a valid value of the provided parameter
    /// type, returning a description of the mismatch otherwise.
    pub fn type_check(&self, param_type: &ParamType) -> Result<(), String> {
        match (self, param_type) {
            (Self::Address(_), ParamType::Address)
            | (Self::Bool(_), ParamType::Bool)
            | (Self::Bytes(_), ParamType::Bytes)
            | (Self::String(_), ParamType::String) => Ok(()),
            (Self::Uint(_) | Self::Int(_), ParamType::Uint(bits) | ParamType::Int(bits))
                if !is_bit_width(*bits) =>
            {
                Err(format!("unsupported integer width {bits}"))
            }
            (Self::Uint(value), ParamType::Uint(bits)) => {
                if value.bit_len() <= *bits {
                    Ok(())
                } else {
                    Err(format!("{value} exceeds {bits} bits"))
                }
            }
            (Self::Int(value), ParamType::Int(bits)) => {
                if *bits == 256 {
                    return Ok(());
                }

                let bound = U256::from(1u8) << (bits - 1);
                let abs = value.unsigned_abs();
                let in_range = if value.is_negative() {
                    abs <= bound
                } else {
                    abs < bound
                };

                if in_range {
                    Ok(())
                } else {
                    Err(format!("{value} exceeds {bits} bits"))
                }
            }
            (Self::FixedBytes(bytes), ParamType::FixedBytes(size)) => {
                if bytes.len() == *size {
                    Ok(())
                } else {
                    Err(format!("expected {size} bytes, found {}", bytes.len()))
                }
            }
            (Self::Array(elements), ParamType::Array(element_type)) => elements
                .iter()
                .try_for_each(|element| element.type_check(element_type)),
            (Self::Array(elements), ParamType::FixedArray(element_type, size)) => {
                if elements.len() != *size {
                    return Err(format!(
                        "expected {size} elements, found {}",
                        elements.len()
                    ));
                }

                elements
                    .iter()
                    .try_for_each(|element| element.type_check(element_type))
            }
            (Self::Tuple(components), ParamType::Tuple(component_types)) => {
                if components.len() != component_types.len() {
                    return Err(format!(
                        "expected {} components, found {}",
                        component_types.len(),
                        components.len()
                    ));
                }

                components
                    .iter()
                    .zip(component_types)
                    .try_for_each(|(component, component_type)| {
                        component.type_check(component_type)
                    })
            }
            _ => Err(format!("found {}", self.kind())),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Address(_) => "address",
            Self::Bool(_) => "bool",
            Self::Uint(_) => "unsigned integer",
            Self::Int(_) => "signed integer",
            Self::FixedBytes(_) => "fixed bytes",
            Self::Bytes(_) => "bytes",
            Self::String(_) => "string",
            Self::Array(_) => "array",
            Self::Tuple(_) => "tuple",
        }
    }
}

impl From<Address> for CallArg {
    fn from(value: Address) -> Self {
        Self::Address(value)
    }
}

impl From<bool> for CallArg {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<U256> for CallArg {
    fn from(value: U256) -> Self {
        Self::Uint(value)
    }
}

impl From<u64> for CallArg {
    fn from(value: u64) -> Self {
        Self::Uint(U256::from(value))
    }
}

impl From<I256> for CallArg {
    fn from(value: I256) -> Self {
        Self::Int(value)
    }
}

impl From<Bytes> for CallArg {
    fn from(value: Bytes) -> Self {
        Self::Bytes(value)
    }
}

impl From<&str> for CallArg {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

fn parse_uint_literal(literal: &str) -> Option<U256> {
    let literal = literal.trim();
    if let Some(hex) = literal
        .strip_prefix("0x")
        .or_else(|| literal.strip_prefix("0X"))
    {
        if hex.is_empty() {
            return None;
        }
        U256::from_str_radix(hex, 16).ok()
    } else if !literal.is_empty() && literal.bytes().all(|byte| byte.is_ascii_digit()) {
        U256::from_str_radix(literal, 10).ok()
    } else {
        None
    }
}

fn parse_int_literal(literal: &str) -> Option<I256> {
    let literal = literal.trim();
    let (sign, abs) = match literal.strip_prefix('-') {
        Some(abs) => (Sign::Negative, abs),
        None => (Sign::Positive, literal),
    };

    let abs = parse_uint_literal(abs)?;
    I256::checked_from_sign_and_abs(sign, abs)
}

fn parse_bytes_literal(literal: &str) -> Option<Bytes> {
    let digits = literal.trim().strip_prefix("0x")?;
    hex::decode(digits).ok().map(Bytes::from)
}
