//! Row mapper hints: registered functions and embedded scripts.

use std::sync::Arc;

use dashmap::DashMap;
use dynaq_lang::{compile_template, CompiledTemplate, Environment};
use dynaq_types::{Row, Value};

use super::{AppliedHint, HintError, HintHandler};
use crate::mapping::{QueryHint, ResultShape};
use crate::querier::QueryParameter;

/// Hint key of the bean-mapper family.
pub const BEAN_MAPPER_KEY: &str = "result-bean-mapper";
/// Hint key of the script-mapper family.
pub const SCRIPT_MAPPER_KEY: &str = "result-script-mapper";

const MAPPER_NAME: &str = "mapper-name";

/// Script variable holding the invocation criteria.
const CRITERIA_VARIABLE: &str = "criteria";
/// Script variable holding the invocation context.
const CONTEXT_VARIABLE: &str = "context";

/// Mutates a result row, given the invocation parameters.
pub trait RowMapper: Send + Sync {
    fn map(&self, row: &mut Row, param: &QueryParameter) -> Result<(), String>;
}

impl<F> RowMapper for F
where
    F: Fn(&mut Row, &QueryParameter) -> Result<(), String> + Send + Sync,
{
    fn map(&self, row: &mut Row, param: &QueryParameter) -> Result<(), String> {
        self(row, param)
    }
}

/// Named row mappers.
#[derive(Default)]
pub struct MapperRegistry {
    mappers: DashMap<String, Arc<dyn RowMapper>>,
}

impl MapperRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a mapper.
    pub fn register(&self, name: impl Into<String>, mapper: impl RowMapper + 'static) {
        self.mappers.insert(name.into(), Arc::new(mapper));
    }

    /// Look up a mapper.
    pub fn get(&self, name: &str) -> Option<Arc<dyn RowMapper>> {
        self.mappers.get(name).map(|m| m.clone())
    }

    /// Number of registered mappers.
    pub fn len(&self) -> usize {
        self.mappers.len()
    }

    /// Check if no mapper is registered.
    pub fn is_empty(&self) -> bool {
        self.mappers.is_empty()
    }
}

/// Hands every row to a mapper registered under `mapper-name`.
///
/// The mapper is looked up when the hint is first resolved; a hint naming an
/// unregistered mapper is broken for good.
pub struct BeanMapperHandler {
    mappers: Arc<MapperRegistry>,
}

impl BeanMapperHandler {
    /// Create a handler over `mappers`.
    pub fn new(mappers: Arc<MapperRegistry>) -> Self {
        Self { mappers }
    }
}

impl HintHandler for BeanMapperHandler {
    fn can_handle(&self, _shape: &ResultShape, hint: &QueryHint) -> bool {
        hint.key == BEAN_MAPPER_KEY
    }

    fn resolve(&self, hint: &QueryHint) -> Result<Arc<dyn AppliedHint>, HintError> {
        let name = hint
            .first(MAPPER_NAME)
            .ok_or_else(|| HintError::missing(hint, MAPPER_NAME))?;
        let mapper = self
            .mappers
            .get(name)
            .ok_or_else(|| HintError::UnknownMapper(name.to_string()))?;
        Ok(Arc::new(BeanMapper { mapper }))
    }
}

struct BeanMapper {
    mapper: Arc<dyn RowMapper>,
}

impl AppliedHint for BeanMapper {
    fn apply(&self, param: &QueryParameter, rows: &mut [Row]) -> Result<(), String> {
        rows.iter_mut()
            .try_for_each(|row| self.mapper.map(row, param))
    }
}

/// Renders the hint's script once per row and writes the script's top-level
/// `set` assignments back into the row.
///
/// Row fields are bound by name, next to `criteria` and `context` maps of the
/// invocation; a row field of the same name shadows them.
pub struct ScriptMapperHandler;

impl HintHandler for ScriptMapperHandler {
    fn can_handle(&self, _shape: &ResultShape, hint: &QueryHint) -> bool {
        hint.key == SCRIPT_MAPPER_KEY
    }

    fn resolve(&self, hint: &QueryHint) -> Result<Arc<dyn AppliedHint>, HintError> {
        let script = hint
            .script
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| HintError::missing(hint, "script"))?;
        let template = compile_template(script).map_err(|e| HintError::Script {
            key: hint.key.clone(),
            message: e.format_with_source(script),
        })?;
        Ok(Arc::new(ScriptMapper { template }))
    }
}

struct ScriptMapper {
    template: CompiledTemplate,
}

impl AppliedHint for ScriptMapper {
    fn apply(&self, param: &QueryParameter, rows: &mut [Row]) -> Result<(), String> {
        let criteria = Value::Map(param.criteria.clone());
        let context = Value::Map(param.context.clone());

        for row in rows {
            let mut env = Environment::new();
            env.insert(CRITERIA_VARIABLE, criteria.clone());
            env.insert(CONTEXT_VARIABLE, context.clone());
            for (name, value) in row.iter() {
                env.insert(name.clone(), value.clone());
            }

            let rendered = self
                .template
                .render(&env)
                .map_err(|e| e.format_with_source(self.template.source()))?;
            row.extend(rendered.assigned);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dynaq_types::row;

    #[test]
    fn test_bean_mapper() {
        let mappers = Arc::new(MapperRegistry::new());
        mappers.register("upper-name", |row: &mut Row, _: &QueryParameter| -> Result<(), String> {
            if let Some(Value::String(name)) = row.get_mut("name") {
                *name = name.to_uppercase();
            }
            Ok(())
        });
        let handler = BeanMapperHandler::new(mappers);

        let hint = QueryHint::new(BEAN_MAPPER_KEY).with_parameter(MAPPER_NAME, "upper-name");
        let applied = handler.resolve(&hint).unwrap();
        let mut rows = vec![row! { "name" => "ann" }];
        applied.apply(&QueryParameter::new(), &mut rows).unwrap();
        assert_eq!(rows[0]["name"], Value::from("ANN"));

        let unknown = QueryHint::new(BEAN_MAPPER_KEY).with_parameter(MAPPER_NAME, "nope");
        assert!(matches!(
            handler.resolve(&unknown),
            Err(HintError::UnknownMapper(name)) if name == "nope"
        ));
    }

    #[test]
    fn test_mapper_error_propagates() {
        let mappers = Arc::new(MapperRegistry::new());
        mappers.register("fail", |_: &mut Row, _: &QueryParameter| -> Result<(), String> {
            Err("bad row".to_string())
        });
        let hint = QueryHint::new(BEAN_MAPPER_KEY).with_parameter(MAPPER_NAME, "fail");
        let applied = BeanMapperHandler::new(mappers).resolve(&hint).unwrap();

        let mut rows = vec![row! { "id" => 1 }];
        assert_eq!(
            applied.apply(&QueryParameter::new(), &mut rows),
            Err("bad row".to_string())
        );
    }

    #[test]
    fn test_script_mapper() {
        let hint = QueryHint::new(SCRIPT_MAPPER_KEY).with_script(
            "{% set display = first + \" \" + last %}\
             {% set owned = id == criteria.owner %}",
        );
        let applied = ScriptMapperHandler.resolve(&hint).unwrap();

        let mut rows = vec![
            row! { "id" => 1, "first" => "Ada", "last" => "Lovelace" },
            row! { "id" => 2, "first" => "Alan", "last" => "Turing" },
        ];
        applied
            .apply(&QueryParameter::new().with_criteria("owner", 2), &mut rows)
            .unwrap();

        assert_eq!(rows[0]["display"], Value::from("Ada Lovelace"));
        assert_eq!(rows[0]["owned"], Value::Bool(false));
        assert_eq!(rows[1]["owned"], Value::Bool(true));
    }

    #[test]
    fn test_script_mapper_requires_valid_script() {
        let missing = QueryHint::new(SCRIPT_MAPPER_KEY);
        assert!(matches!(
            ScriptMapperHandler.resolve(&missing),
            Err(HintError::MissingParameter { .. })
        ));

        let broken = QueryHint::new(SCRIPT_MAPPER_KEY).with_script("{% if x %}");
        assert!(matches!(
            ScriptMapperHandler.resolve(&broken),
            Err(HintError::Script { .. })
        ));
    }
}
