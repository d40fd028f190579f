use core::fmt;

use crate::DescriptorError;

/// The type of a function parameter.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ParamType {
    /// `address`
    Address,
    /// `bool`
    Bool,
    /// `uintN`
    Uint(usize),
    /// `intN`
    Int(usize),
    /// `bytesN`
    FixedBytes(usize),
    /// `bytes`
    Bytes,
    /// `string`
    String,
    /// `T[]`
    Array(Box<ParamType>),
    /// `T[k]`
    FixedArray(Box<ParamType>, usize),
    /// `(T1,T2,...)`
    Tuple(Vec<ParamType>),
}

impl ParamType {
    /// Parses a parameter type, stripping parameter names and data locations
    /// and expanding aliases such as `uint` to `uint256`.
    pub fn parse(input: &str) -> Result<Self, DescriptorError> {
        let input = strip_param_name(input.trim());
        let invalid = || DescriptorError::InvalidParamType(input.to_string());

        if let Some(without_bracket) = input.strip_suffix(']') {
            let open = without_bracket.rfind('[').ok_or_else(invalid)?;
            let inner = Self::parse(&without_bracket[..open])?;
            let size = without_bracket[open + 1..].trim();

            return if size.is_empty() {
                Ok(Self::Array(Box::new(inner)))
            } else {
                match size.parse::<usize>() {
                    Ok(size) if size > 0 => Ok(Self::FixedArray(Box::new(inner), size)),
                    _ => Err(invalid()),
                }
            };
        }

        if let Some(components) = input
            .strip_prefix('(')
            .and_then(|rest| rest.strip_suffix(')'))
        {
            let components = split_top_level(components).ok_or_else(invalid)?;
            return components
                .into_iter()
                .map(Self::parse)
                .collect::<Result<Vec<_>, _>>()
                .map(Self::Tuple);
        }

        match input {
            "address" => Ok(Self::Address),
            "bool" => Ok(Self::Bool),
            "string" => Ok(Self::String),
            "bytes" => Ok(Self::Bytes),
            "byte" => Ok(Self::FixedBytes(1)),
            "uint" => Ok(Self::Uint(256)),
            "int" => Ok(Self::Int(256)),
            _ => {
                if let Some(bits) = input.strip_prefix("uint") {
                    parse_bit_width(bits).map(Self::Uint).ok_or_else(invalid)
                } else if let Some(bits) = input.strip_prefix("int") {
                    parse_bit_width(bits).map(Self::Int).ok_or_else(invalid)
                } else if let Some(size) = input.strip_prefix("bytes") {
                    match size.parse::<usize>() {
                        Ok(size) if (1..=32).contains(&size) => Ok(Self::FixedBytes(size)),
                        _ => Err(invalid()),
                    }
                } else {
                    Err(invalid())
                }
            }
        }
    }

    /// Whether the type has dynamic length.
    pub fn is_dynamic(&self) -> bool {
        match self {
            Self::Bytes | Self::String | Self::Array(_) => true,
            Self::FixedArray(inner, _) => inner.is_dynamic(),
            Self::Tuple(components) => components.iter().any(Self::is_dynamic),
            Self::Address | Self::Bool | Self::Uint(_) | Self::Int(_) | Self::FixedBytes(_) => {
                false
            }
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Address => f.write_str("address"),
            Self::Bool => f.write_str("bool"),
            Self::Uint(bits) => write!(f, "uint{bits}"),
            Self::Int(bits) => write!(f, "int{bits}"),
            Self::FixedBytes(size) => write!(f, "bytes{size}"),
            Self::Bytes => f.write_str("bytes"),
            Self::String => f.write_str("string"),
            Self::Array(inner) => write!(f, "{inner}[]"),
            Self::FixedArray(inner, size) => write!(f, "{inner}[{size}]"),
            Self::Tuple(components) => {
                f.write_str("(")?;
                for (index, component) in components.iter().enumerate() {
                    if index > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{component}")?;
                }
                f.write_str(")")
            }
        }
    }
}

/// A parsed function signature, e.g. `balanceOf(address)`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FunctionSignature {
    name: String,
    inputs: Vec<ParamType>,
}

impl FunctionSignature {
    /// Parses a human-readable function signature.
    ///
    /// Accepts whitespace, parameter names, data locations and a trailing
    /// mutability and returns clause, e.g.
    /// `function transfer(address to, uint amount) returns (bool)` parses to
    /// `transfer(address,uint256)`.
    pub fn parse(signature: &str) -> Result<Self, DescriptorError> {
        let invalid = |reason| DescriptorError::InvalidSignature {
            signature: signature.to_string(),
            reason,
        };

        let trimmed = signature.trim();
        let trimmed = trimmed.strip_prefix("function ").unwrap_or(trimmed);

        let open = trimmed
            .find('(')
            .ok_or_else(|| invalid("missing parameter list"))?;
        let name = trimmed[..open].trim();
        if !is_identifier(name) {
            return Err(invalid("invalid function name"));
        }

        let close = matching_paren(trimmed, open)
            .ok_or_else(|| invalid("unterminated parameter list"))?;
        if !is_trailer(&trimmed[close + 1..]) {
            return Err(invalid("unexpected tokens after parameter list"));
        }

        let params = &trimmed[open + 1..close];

        let params = split_top_level(params).ok_or_else(|| invalid("unbalanced brackets"))?;
        let inputs = params
            .into_iter()
            .map(ParamType::parse)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            name: name.to_string(),
            inputs,
        })
    }

    /// The function's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The function's parameter types.
    pub fn inputs(&self) -> &[ParamType] {
        &self.inputs
    }

    /// Returns the canonical form of the signature.
    pub fn canonical(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for FunctionSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.name, ParamType::Tuple(self.inputs.clone()))
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|first| first.is_ascii_alphabetic() || first == '_' || first == '$')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

fn parse_bit_width(bits: &str) -> Option<usize> {
    bits.parse::<usize>().ok().filter(|bits| is_bit_width(*bits))
}

/// Whether `bits` is the width of a Solidity integer type.
pub(crate) fn is_bit_width(bits: usize) -> bool {
    bits > 0 && bits <= 256 && bits % 8 == 0
}

/// Strips a trailing parameter name and data location, e.g.
/// `uint256[] memory amounts` becomes `uint256[]`.
fn strip_param_name(param: &str) -> &str {
    let mut depth = 0usize;
    for (index, c) in param.char_indices() {
        match c {
            '(' | '[' => depth += 1,
            ')' | ']' => depth = depth.saturating_sub(1),
            c if c.is_whitespace() && depth == 0 => {
                // Whitespace between a type and its array suffix, e.g.
                // `uint256 []`, is not a name separator.
                let rest = param[index..].trim_start();
                if rest.starts_with('[') {
                    continue;
                }
                return &param[..index];
            }
            _ => {}
        }
    }
    param
}

/// Returns the index of the parenthesis that closes the one at `open`.
fn matching_paren(input: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (index, c) in input.char_indices().skip_while(|(index, _)| *index < open) {
        match c {
            '(' => depth += 1,
            ')' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(index);
                }
            }
            _ => {}
        }
    }

    None
}

const MODIFIERS: [&str; 6] = ["external", "public", "view", "pure", "payable", "nonpayable"];

/// Whether the text following a parameter list only consists of modifiers
/// and an optional returns clause.
fn is_trailer(trailer: &str) -> bool {
    let (modifiers, returns) = match trailer.find("returns") {
        Some(index) => (
            &trailer[..index],
            Some(trailer[index + "returns".len()..].trim()),
        ),
        None => (trailer, None),
    };

    modifiers
        .split_whitespace()
        .all(|modifier| MODIFIERS.contains(&modifier))
        && returns.is_none_or(|returns| {
            returns.starts_with('(')
                && matching_paren(returns, 0) == Some(returns.len() - 1)
        })
}

/// Splits a comma-separated list on commas that aren't nested in brackets.
/// Returns `None` if the brackets are unbalanced or a component is empty.
fn split_top_level(list: &str) -> Option<Vec<&str>> {
    if list.trim().is_empty() {
        return Some(Vec::new());
    }

    let mut components = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (index, c) in list.char_indices() {
        match c {
            '(' | '[' => depth += 1,
            ')' | ']' => depth = depth.checked_sub(1)?,
            ',' if depth == 0 => {
                components.push(list[start..index].trim());
                start = index + 1;
            }
            _ => {}
        }
    }

    if depth != 0 {
        return None;
    }
    components.push(list[start..].trim());

    if components.iter().any(|component| component.is_empty()) {
        None
    } else {
        Some(components)
    }
}
