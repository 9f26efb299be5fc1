//! Map-reduce hint: nests flat columns under one field.

use std::sync::Arc;

use dynaq_types::{Row, Value};

use super::{AppliedHint, HintError, HintHandler};
use crate::mapping::{QueryHint, ResultShape};
use crate::querier::QueryParameter;

/// Hint key of the map-reduce family.
pub const MAP_REDUCE_KEY: &str = "result-map-reduce";

const FIELDS: &str = "fields";
const INTO: &str = "into";

/// Moves the `fields` of each map row into a nested map under `into`.
///
/// `fields` may repeat or hold a comma separated list. Only map-shaped
/// results are accepted.
pub struct MapReduceHandler;

impl HintHandler for MapReduceHandler {
    fn can_handle(&self, shape: &ResultShape, hint: &QueryHint) -> bool {
        hint.key == MAP_REDUCE_KEY && *shape == ResultShape::Map
    }

    fn resolve(&self, hint: &QueryHint) -> Result<Arc<dyn AppliedHint>, HintError> {
        let fields: Vec<String> = hint
            .values(FIELDS)
            .into_iter()
            .flat_map(|value| value.split(','))
            .map(str::trim)
            .filter(|field| !field.is_empty())
            .map(str::to_string)
            .collect();
        if fields.is_empty() {
            return Err(HintError::missing(hint, FIELDS));
        }

        let into = hint
            .first(INTO)
            .map(str::trim)
            .filter(|into| !into.is_empty())
            .ok_or_else(|| HintError::missing(hint, INTO))?;
        if fields.iter().any(|field| field == into) {
            return Err(HintError::invalid(
                hint,
                INTO,
                format!("'{}' is also listed in '{}'", into, FIELDS),
            ));
        }

        Ok(Arc::new(MapReduce {
            fields,
            into: into.to_string(),
        }))
    }
}

struct MapReduce {
    fields: Vec<String>,
    into: String,
}

impl AppliedHint for MapReduce {
    fn apply(&self, _param: &QueryParameter, rows: &mut [Row]) -> Result<(), String> {
        for row in rows {
            let nested: Row = self
                .fields
                .iter()
                .filter_map(|field| row.remove_entry(field))
                .collect();
            row.insert(self.into.clone(), Value::Map(nested));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dynaq_types::row;

    #[test]
    fn test_reduce_fields() {
        let hint = QueryHint::new(MAP_REDUCE_KEY)
            .with_parameter(FIELDS, "street, city")
            .with_parameter(FIELDS, "zip")
            .with_parameter(INTO, "address");
        let applied = MapReduceHandler.resolve(&hint).unwrap();

        let mut rows = vec![row! { "id" => 1, "street" => "Main", "city" => "Oslo" }];
        applied.apply(&QueryParameter::new(), &mut rows).unwrap();

        assert_eq!(
            rows[0],
            row! {
                "id" => 1,
                "address" => row! { "street" => "Main", "city" => "Oslo" },
            }
        );
    }

    #[test]
    fn test_map_shape_only() {
        let hint = QueryHint::new(MAP_REDUCE_KEY);
        assert!(MapReduceHandler.can_handle(&ResultShape::Map, &hint));
        assert!(!MapReduceHandler.can_handle(&ResultShape::Named("User".into()), &hint));
    }

    #[test]
    fn test_missing_into() {
        let hint = QueryHint::new(MAP_REDUCE_KEY).with_parameter(FIELDS, "a");
        assert!(matches!(
            MapReduceHandler.resolve(&hint),
            Err(HintError::MissingParameter { .. })
        ));
    }
}
