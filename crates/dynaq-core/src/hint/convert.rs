//! Field conversion hint.

use std::str::FromStr;
use std::sync::Arc;

use dynaq_types::{convert, Row, SemanticType, Value};
use tracing::warn;

use super::{AppliedHint, HintError, HintHandler};
use crate::mapping::{QueryHint, ResultShape};
use crate::querier::QueryParameter;

/// Hint key of the field-convert family.
pub const FIELD_CONVERT_KEY: &str = "result-field-convert";

const FIELD_NAME: &str = "field-name";
const TARGET_TYPE: &str = "target-type";

/// Converts the values at dotted field paths to a target type.
///
/// Paths cross nested maps and lists of maps. Missing paths are skipped and
/// values that fail to convert are kept as they were.
pub struct FieldConvertHandler;

impl HintHandler for FieldConvertHandler {
    fn can_handle(&self, _shape: &ResultShape, hint: &QueryHint) -> bool {
        hint.key == FIELD_CONVERT_KEY
    }

    fn resolve(&self, hint: &QueryHint) -> Result<Arc<dyn AppliedHint>, HintError> {
        let fields = hint.values(FIELD_NAME);
        if fields.is_empty() {
            return Err(HintError::missing(hint, FIELD_NAME));
        }
        let target = hint
            .first(TARGET_TYPE)
            .ok_or_else(|| HintError::missing(hint, TARGET_TYPE))?;
        let target =
            SemanticType::from_str(target).map_err(|e| HintError::invalid(hint, TARGET_TYPE, e))?;

        let mut paths = Vec::with_capacity(fields.len());
        for field in fields {
            let path: Vec<String> = field.split('.').map(str::to_string).collect();
            if path.iter().any(String::is_empty) {
                return Err(HintError::invalid(
                    hint,
                    FIELD_NAME,
                    format!("'{}' is not a field path", field),
                ));
            }
            paths.push(path);
        }

        Ok(Arc::new(FieldConvert { paths, target }))
    }
}

struct FieldConvert {
    paths: Vec<Vec<String>>,
    target: SemanticType,
}

impl FieldConvert {
    fn convert_in_row(&self, row: &mut Row, path: &[String]) {
        let Some((head, rest)) = path.split_first() else {
            return;
        };
        let Some(value) = row.get_mut(head) else {
            return;
        };
        if rest.is_empty() {
            self.convert_value(value, head);
        } else {
            self.descend(value, rest);
        }
    }

    fn descend(&self, value: &mut Value, path: &[String]) {
        match value {
            Value::Map(map) => self.convert_in_row(map, path),
            Value::List(items) => {
                for item in items {
                    self.descend(item, path);
                }
            }
            _ => {}
        }
    }

    fn convert_value(&self, value: &mut Value, field: &str) {
        match convert(value.clone(), self.target) {
            Ok(converted) => *value = converted,
            Err(error) => warn!(
                field,
                target = %self.target,
                error = %error,
                "field conversion failed; keeping original value"
            ),
        }
    }
}

impl AppliedHint for FieldConvert {
    fn apply(&self, _param: &QueryParameter, rows: &mut [Row]) -> Result<(), String> {
        for row in rows {
            for path in &self.paths {
                self.convert_in_row(row, path);
            }
        }
        Ok(())
    }
}
