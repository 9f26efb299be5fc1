//! dynaq runtime types.
//!
//! This crate defines the values shared by the template language, the querier
//! builder and the execution engine:
//!
//! - [`value`] - Dynamically typed runtime values and result rows
//! - [`convert`] - Semantic types and value conversion
//! - [`error`] - Conversion error types

pub mod convert;
pub mod error;
pub mod value;

pub use convert::{convert, SemanticType};
pub use error::ConversionError;
pub use value::{row_lookup, Row, Value};

/// Build a [`Row`] from `(field, value)` pairs.
///
/// ```rust
/// use dynaq_types::{row, Value};
///
/// let r = row! { "id" => 1, "name" => "Alice" };
/// assert_eq!(r.get("id"), Some(&Value::Int(1)));
/// ```
#[macro_export]
macro_rules! row {
    () => { $crate::Row::new() };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut row = $crate::Row::new();
        $( row.insert(::std::string::String::from($key), $crate::Value::from($value)); )+
        row
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_macro() {
        let r = row! { "id" => 1, "tags" => vec!["a", "b"] };
        assert_eq!(r.len(), 2);
        assert_eq!(r.get("tags"), Some(&Value::from(vec!["a", "b"])));
        assert!(row!().is_empty());
    }

    #[test]
    fn test_unsupported_message_truncates() {
        let long = Value::from("x".repeat(200));
        let err = ConversionError::unsupported(&long, SemanticType::Int);
        let message = err.to_string();
        assert!(message.contains("string value"));
        assert!(message.len() < 120);
    }
}
