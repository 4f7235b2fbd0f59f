//! Serialization error types.

use thiserror::Error;

/// Errors raised while encoding or decoding a Hessian object graph.
#[derive(Debug, Error)]
pub enum HessianError {
    #[error("type mismatch: expected {expected}, got {found}")]
    TypeMismatch { expected: String, found: &'static str },

    #[error("value {value} out of range for {target}")]
    OutOfRange { value: String, target: &'static str },

    #[error("invalid date string: {0}")]
    InvalidDate(String),

    #[error("unexpected end of input at offset {offset}: need {needed} more bytes")]
    UnexpectedEof { offset: usize, needed: usize },

    #[error("unknown tag {tag:#04x} at offset {offset}")]
    UnknownTag { tag: u8, offset: usize },

    #[error("invalid UTF-8 in string at offset {0}")]
    InvalidUtf8(usize),

    #[error("reference #{0} is not resolved")]
    UnresolvedReference(u32),

    #[error("unknown class definition #{0}")]
    UnknownClassDefinition(u32),

    #[error("unknown type reference #{0}")]
    UnknownTypeReference(u32),

    #[error("length {0} exceeds the wire limit")]
    LengthOverflow(usize),

    #[error("nesting exceeds the depth limit of {0}")]
    DepthLimitExceeded(usize),

    #[error("map key must be a string for object class {0}")]
    NonStringFieldName(String),
}

pub type Result<T> = std::result::Result<T, HessianError>;
