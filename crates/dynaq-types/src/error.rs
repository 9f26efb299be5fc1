//! Conversion error types.

use thiserror::Error;

use crate::convert::SemanticType;
use crate::value::Value;

/// Errors raised while converting runtime values.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConversionError {
    /// The value cannot be represented in the target type.
    #[error("cannot convert {kind} value '{value}' to {target}")]
    Unsupported {
        /// Kind of the source value.
        kind: &'static str,
        /// Rendered source value.
        value: String,
        /// Requested type.
        target: SemanticType,
    },

    /// The type name does not resolve to a known semantic type.
    #[error("unknown type '{0}'")]
    UnknownType(String),
}

impl ConversionError {
    /// Create an unsupported conversion error for a value.
    pub fn unsupported(value: &Value, target: SemanticType) -> Self {
        let mut rendered = value.to_string();
        if rendered.len() > 64 {
            let cut = (0..=64).rev().find(|i| rendered.is_char_boundary(*i)).unwrap_or(0);
            rendered.truncate(cut);
            rendered.push_str("...");
        }
        Self::Unsupported {
            kind: value.kind(),
            value: rendered,
            target,
        }
    }
}
