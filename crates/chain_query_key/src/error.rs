/// Error that occurs when a [`CallDescriptor`](crate::CallDescriptor) cannot
/// be constructed.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DescriptorError {
    /// The function signature is malformed.
    #[error("Invalid function signature '{signature}': {reason}")]
    InvalidSignature {
        /// The signature as provided by the caller
        signature: String,
        /// Why the signature was rejected
        reason: &'static str,
    },
    /// A parameter type is unknown or has an invalid size.
    #[error("Unsupported parameter type '{0}'")]
    InvalidParamType(String),
    /// The number of arguments doesn't match the function signature.
    #[error("Expected {expected} arguments, but {actual} were provided")]
    ArgumentCount {
        /// Number of parameters in the signature
        expected: usize,
        /// Number of provided arguments
        actual: usize,
    },
    /// An argument doesn't match its parameter type.
    #[error("Argument {index} does not match parameter type '{expected}': {reason}")]
    ArgumentMismatch {
        /// Position of the argument
        index: usize,
        /// The canonical parameter type
        expected: String,
        /// Description of the mismatch
        reason: String,
    },
    /// A literal could not be parsed as a value of its parameter type.
    #[error("Invalid literal '{literal}' for parameter type '{expected}'")]
    InvalidLiteral {
        /// The literal as provided by the caller
        literal: String,
        /// The canonical parameter type
        expected: String,
    },
    /// Chain ID zero doesn't identify a chain.
    #[error("Chain ID must be non-zero")]
    ZeroChainId,
}
