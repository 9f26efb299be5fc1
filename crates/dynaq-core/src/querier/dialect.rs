//! Backend dialects: placeholder text and parameter normalisation.

use dynaq_types::Value;

/// Marker substituted with the 1-based parameter position in placeholder
/// patterns, e.g. `${n}` renders `$1`, `$2`, ...
pub const POSITION_MARKER: &str = "{n}";

/// How a backend spells bound parameters.
pub trait Dialect: Send + Sync {
    /// Placeholder for the parameter at 1-based `position`.
    fn placeholder(&self, position: usize) -> String;

    /// Separator between the placeholders of an expanded list.
    fn separator(&self) -> &str {
        ","
    }

    /// Canonical backend representation of a bound value.
    fn normalize(&self, value: Value) -> Value {
        value
    }
}

/// SQL-style dialect: `?` placeholders by default, `,` separated.
///
/// Enum constants bind as their variant name and calendar dates as midnight
/// UTC timestamps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlDialect {
    placeholder: String,
    separator: String,
}

impl Default for SqlDialect {
    fn default() -> Self {
        Self {
            placeholder: "?".to_string(),
            separator: ",".to_string(),
        }
    }
}

impl SqlDialect {
    /// Create a dialect with `?` placeholders.
    pub fn new() -> Self {
        Self::default()
    }

    /// Numbered placeholders such as `$1` (`prefix` = `"$"`).
    pub fn numbered(prefix: &str) -> Self {
        Self::default().with_placeholder(format!("{}{}", prefix, POSITION_MARKER))
    }

    /// Set the placeholder pattern; [`POSITION_MARKER`] is replaced by the position.
    pub fn with_placeholder(mut self, placeholder: impl Into<String>) -> Self {
        self.placeholder = placeholder.into();
        self
    }

    /// Set the list separator.
    pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }
}

impl Dialect for SqlDialect {
    fn placeholder(&self, position: usize) -> String {
        if self.placeholder.contains(POSITION_MARKER) {
            self.placeholder
                .replace(POSITION_MARKER, &position.to_string())
        } else {
            self.placeholder.clone()
        }
    }

    fn separator(&self) -> &str {
        &self.separator
    }

    fn normalize(&self, value: Value) -> Value {
        match value {
            Value::Enum { variant, .. } => Value::String(variant),
            Value::Date(date) => match date.and_hms_opt(0, 0, 0) {
                Some(naive) => Value::Timestamp(naive.and_utc()),
                None => Value::Date(date),
            },
            Value::List(items) => {
                Value::List(items.into_iter().map(|v| self.normalize(v)).collect())
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone, Utc};

    #[test]
    fn test_placeholders() {
        let dialect = SqlDialect::new();
        assert_eq!(dialect.placeholder(3), "?");
        assert_eq!(dialect.separator(), ",");

        let dialect = SqlDialect::numbered("$").with_separator(", ");
        assert_eq!(dialect.placeholder(1), "$1");
        assert_eq!(dialect.placeholder(12), "$12");
        assert_eq!(dialect.separator(), ", ");
    }

    #[test]
    fn test_normalize() {
        let dialect = SqlDialect::new();
        assert_eq!(
            dialect.normalize(Value::enumeration("Status", "ACTIVE")),
            Value::from("ACTIVE")
        );

        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert_eq!(
            dialect.normalize(Value::Date(date)),
            Value::Timestamp(Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(dialect.normalize(Value::Int(4)), Value::Int(4));
    }
}
