//! Semantic types and value conversion.
//!
//! Mappings declare parameter types and hints declare target field types by
//! name; both resolve to a [`SemanticType`], and [`convert`] coerces a runtime
//! [`Value`] into that type. Conversion is idempotent: converting a value that
//! already has the target type returns it unchanged.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ConversionError;
use crate::value::Value;

/// Semantic type of a declared parameter or converted field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SemanticType {
    /// UTF-8 text.
    String,
    /// 64-bit signed integer.
    Int,
    /// 64-bit floating point.
    Float,
    /// Boolean.
    Bool,
    /// Calendar date.
    Date,
    /// Instant in UTC.
    Timestamp,
    /// Binary data (hex on the text side).
    Bytes,
}

impl SemanticType {
    /// Canonical name of the type.
    pub fn name(&self) -> &'static str {
        match self {
            SemanticType::String => "String",
            SemanticType::Int => "Int",
            SemanticType::Float => "Float",
            SemanticType::Bool => "Bool",
            SemanticType::Date => "Date",
            SemanticType::Timestamp => "Timestamp",
            SemanticType::Bytes => "Bytes",
        }
    }
}

impl fmt::Display for SemanticType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SemanticType {
    type Err = ConversionError;

    /// Parse a type name. Qualified names (`java.lang.Long`) resolve by their
    /// last segment and matching is case-insensitive.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let simple = s.trim().rsplit('.').next().unwrap_or_default();
        let ty = match simple.to_ascii_lowercase().as_str() {
            "string" | "str" | "text" | "char" => SemanticType::String,
            "int" | "integer" | "long" | "short" | "i32" | "i64" | "biginteger" => {
                SemanticType::Int
            }
            "float" | "double" | "decimal" | "bigdecimal" | "number" | "f32" | "f64" => {
                SemanticType::Float
            }
            "bool" | "boolean" => SemanticType::Bool,
            "date" | "localdate" => SemanticType::Date,
            "timestamp" | "datetime" | "instant" | "localdatetime" | "zoneddatetime" => {
                SemanticType::Timestamp
            }
            "bytes" | "binary" | "blob" => SemanticType::Bytes,
            _ => return Err(ConversionError::UnknownType(s.to_string())),
        };
        Ok(ty)
    }
}

impl TryFrom<String> for SemanticType {
    type Error = ConversionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SemanticType> for String {
    fn from(ty: SemanticType) -> Self {
        ty.name().to_string()
    }
}

/// Convert a value to the given semantic type.
///
/// Nulls stay null and lists are converted element by element, so a declared
/// `Int` parameter accepts both a scalar and a list of ids.
pub fn convert(value: Value, target: SemanticType) -> Result<Value, ConversionError> {
    match value {
        Value::Null => Ok(Value::Null),
        Value::List(items) => items
            .into_iter()
            .map(|item| convert(item, target))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::List),
        value => convert_scalar(value, target),
    }
}

fn convert_scalar(value: Value, target: SemanticType) -> Result<Value, ConversionError> {
    let converted = match (target, &value) {
        (_, Value::Map(_)) => None,

        (SemanticType::String, Value::String(_)) => return Ok(value),
        (SemanticType::String, _) => Some(Value::String(value.to_string())),

        (SemanticType::Int, Value::Int(_)) => return Ok(value),
        (SemanticType::Int, Value::Float(f)) => float_to_int(*f).map(Value::Int),
        (SemanticType::Int, Value::Bool(b)) => Some(Value::Int(i64::from(*b))),
        (SemanticType::Int, Value::String(s)) => parse_int(s).map(Value::Int),
        (SemanticType::Int, Value::Timestamp(t)) => Some(Value::Int(t.timestamp_millis())),

        (SemanticType::Float, Value::Float(_)) => return Ok(value),
        (SemanticType::Float, Value::Int(i)) => Some(Value::Float(*i as f64)),
        (SemanticType::Float, Value::String(s)) => s.trim().parse().ok().map(Value::Float),

        (SemanticType::Bool, Value::Bool(_)) => return Ok(value),
        (SemanticType::Bool, Value::Int(i)) => Some(Value::Bool(*i != 0)),
        (SemanticType::Bool, Value::String(s)) => parse_bool(s).map(Value::Bool),

        (SemanticType::Date, Value::Date(_)) => return Ok(value),
        (SemanticType::Date, Value::Timestamp(t)) => Some(Value::Date(t.date_naive())),
        (SemanticType::Date, Value::String(s)) => parse_date(s).map(Value::Date),

        (SemanticType::Timestamp, Value::Timestamp(_)) => return Ok(value),
        (SemanticType::Timestamp, Value::Date(d)) => d
            .and_hms_opt(0, 0, 0)
            .map(|naive| Value::Timestamp(naive.and_utc())),
        (SemanticType::Timestamp, Value::Int(millis)) => {
            Utc.timestamp_millis_opt(*millis).single().map(Value::Timestamp)
        }
        (SemanticType::Timestamp, Value::String(s)) => parse_timestamp(s).map(Value::Timestamp),

        (SemanticType::Bytes, Value::Bytes(_)) => return Ok(value),
        (SemanticType::Bytes, Value::String(s)) => hex::decode(s.trim()).ok().map(Value::Bytes),

        _ => None,
    };

    converted.ok_or_else(|| ConversionError::unsupported(&value, target))
}

fn parse_int(s: &str) -> Option<i64> {
    let s = s.trim();
    s.parse::<i64>()
        .ok()
        .or_else(|| s.parse::<f64>().ok().and_then(float_to_int))
}

/// Whole floats inside the `i64` range; `as` would saturate the rest.
fn float_to_int(f: f64) -> Option<i64> {
    const LIMIT: f64 = 9_223_372_036_854_775_808.0; // 2^63
    (f.fract() == 0.0 && (-LIMIT..LIMIT).contains(&f)).then_some(f as i64)
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "y" | "on" => Some(true),
        "false" | "0" | "no" | "n" | "off" => Some(false),
        _ => None,
    }
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .or_else(|| parse_timestamp(s).map(|t| t.date_naive()))
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Some(t.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_type_names() {
        assert_eq!("Long".parse::<SemanticType>().unwrap(), SemanticType::Int);
        assert_eq!(
            "java.lang.Double".parse::<SemanticType>().unwrap(),
            SemanticType::Float
        );
        assert_eq!(
            "instant".parse::<SemanticType>().unwrap(),
            SemanticType::Timestamp
        );
        assert!(matches!(
            "Widget".parse::<SemanticType>(),
            Err(ConversionError::UnknownType(_))
        ));
    }

    #[test]
    fn test_convert_scalars() {
        assert_eq!(
            convert(Value::from("42"), SemanticType::Int).unwrap(),
            Value::Int(42)
        );
        assert_eq!(
            convert(Value::Int(3), SemanticType::Float).unwrap(),
            Value::Float(3.0)
        );
        assert_eq!(
            convert(Value::from("yes"), SemanticType::Bool).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            convert(Value::Int(7), SemanticType::String).unwrap(),
            Value::from("7")
        );
    }

    #[test]
    fn test_convert_is_idempotent() {
        let once = convert(Value::from("2024-01-02"), SemanticType::Date).unwrap();
        let twice = convert(once.clone(), SemanticType::Date).unwrap();
        assert_eq!(once, twice);
        assert_eq!(
            once,
            Value::Date(NaiveDate::from_ymd_opt(2024, 1, 2).unwrap())
        );
    }

    #[test]
    fn test_convert_list_elementwise() {
        let value = Value::from(vec!["1", "2", "3"]);
        assert_eq!(
            convert(value, SemanticType::Int).unwrap(),
            Value::from(vec![1, 2, 3])
        );
    }

    #[test]
    fn test_convert_timestamps() {
        let ts = convert(Value::from("2024-05-01T10:00:00Z"), SemanticType::Timestamp).unwrap();
        let millis = convert(ts.clone(), SemanticType::Int).unwrap();
        assert_eq!(
            convert(millis, SemanticType::Timestamp).unwrap(),
            ts
        );

        let midnight = convert(Value::from("2024-05-01"), SemanticType::Timestamp).unwrap();
        assert_eq!(midnight.to_string(), "2024-05-01T00:00:00Z");
    }

    #[test]
    fn test_convert_failures() {
        assert!(convert(Value::from("abc"), SemanticType::Int).is_err());
        assert!(convert(Value::Float(1.5), SemanticType::Int).is_err());
        assert!(convert(Value::Map(Default::default()), SemanticType::String).is_err());
        assert_eq!(convert(Value::Null, SemanticType::Int).unwrap(), Value::Null);
    }

    #[test]
    fn test_out_of_range_int_rejected() {
        assert!(convert(Value::Float(1e19), SemanticType::Int).is_err());
        assert!(convert(Value::Float(-1e19), SemanticType::Int).is_err());
        assert!(convert(Value::from("1e19"), SemanticType::Int).is_err());
        assert!(convert(Value::Float(f64::INFINITY), SemanticType::Int).is_err());
        assert_eq!(
            convert(Value::from("1e3"), SemanticType::Int).unwrap(),
            Value::Int(1000)
        );
        assert_eq!(
            convert(Value::Float(-9.223372036854775808e18), SemanticType::Int).unwrap(),
            Value::Int(i64::MIN)
        );
    }
}
