//! Querier builder: renders a query's template against one invocation.

use std::cell::RefCell;
use std::str::FromStr;
use std::sync::Arc;

use dynaq_lang::{Environment, TemplateFunction};
use dynaq_types::{convert, SemanticType, Value};
use tracing::debug;

use super::dialect::{Dialect, SqlDialect};
use super::{Querier, QueryParameter};
use crate::config::{ConfigSource, MapConfigSource};
use crate::error::{Error, Result};
use crate::mapping::Query;
use crate::template::TemplateCache;

/// Template name of the parameter-extraction function.
pub const PARAMETER_FUNCTION: &str = "P";
/// Template name of the config-lookup function.
pub const CONFIG_FUNCTION: &str = "CM";
/// Template variable carrying the invocation limit.
pub const LIMIT_VARIABLE: &str = "limit";
/// Template variable carrying the invocation offset.
pub const OFFSET_VARIABLE: &str = "offset";

fn semantic_type(arg: Option<&Value>) -> std::result::Result<Option<SemanticType>, String> {
    match arg {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(name)) => SemanticType::from_str(name)
            .map(Some)
            .map_err(|e| e.to_string()),
        Some(other) => Err(format!("type argument must be a string, got {}", other.kind())),
    }
}

/// `P(value [, "Type"])`: records bound values and emits placeholders.
///
/// Lists expand to one placeholder per element; an empty list binds a single
/// null so `IN (...)` stays syntactically valid.
struct ParameterExtractor<'d> {
    dialect: &'d dyn Dialect,
    values: RefCell<Vec<Value>>,
}

impl<'d> ParameterExtractor<'d> {
    fn new(dialect: &'d dyn Dialect) -> Self {
        Self {
            dialect,
            values: RefCell::new(Vec::new()),
        }
    }

    fn push(&self, value: Value) -> String {
        let mut values = self.values.borrow_mut();
        values.push(self.dialect.normalize(value));
        self.dialect.placeholder(values.len())
    }

    fn take(&self) -> Vec<Value> {
        self.values.take()
    }
}

impl TemplateFunction for ParameterExtractor<'_> {
    fn call(&self, args: Vec<Value>) -> std::result::Result<Value, String> {
        if args.is_empty() || args.len() > 2 {
            return Err(format!(
                "{}() takes a value and an optional type, got {} argument(s)",
                PARAMETER_FUNCTION,
                args.len()
            ));
        }
        let mut args = args.into_iter();
        let value = args.next().unwrap_or_default();
        let value = match semantic_type(args.next().as_ref())? {
            Some(ty) => convert(value, ty).map_err(|e| e.to_string())?,
            None => value,
        };

        let text = match value {
            Value::List(items) if items.is_empty() => self.push(Value::Null),
            Value::List(items) => items
                .into_iter()
                .map(|item| self.push(item))
                .collect::<Vec<_>>()
                .join(self.dialect.separator()),
            scalar => self.push(scalar),
        };
        Ok(Value::String(text))
    }
}

/// `CM("name" [, default [, "Type"]])`: read-only configuration lookup.
struct ConfigLookup<'c> {
    source: &'c dyn ConfigSource,
}

impl TemplateFunction for ConfigLookup<'_> {
    fn call(&self, args: Vec<Value>) -> std::result::Result<Value, String> {
        let name = match args.first() {
            Some(Value::String(name)) => name,
            _ => return Err(format!("{}() expects a configuration name", CONFIG_FUNCTION)),
        };
        if args.len() > 3 {
            return Err(format!(
                "{}() takes at most 3 arguments, got {}",
                CONFIG_FUNCTION,
                args.len()
            ));
        }

        let value = self
            .source
            .get(name)
            .or_else(|| args.get(1).cloned())
            .unwrap_or_default();
        match semantic_type(args.get(2))? {
            Some(ty) => convert(value, ty).map_err(|e| e.to_string()),
            None => Ok(value),
        }
    }
}

/// Builds [`Querier`]s from queries and invocation parameters.
#[derive(Clone)]
pub struct QuerierBuilder {
    cache: Arc<TemplateCache>,
    dialect: Arc<dyn Dialect>,
    config: Arc<dyn ConfigSource>,
    cache_enabled: bool,
}

impl QuerierBuilder {
    /// Create a builder over `cache` with the SQL dialect and no configuration.
    pub fn new(cache: Arc<TemplateCache>) -> Self {
        Self {
            cache,
            dialect: Arc::new(SqlDialect::default()),
            config: Arc::new(MapConfigSource::new()),
            cache_enabled: true,
        }
    }

    /// Set the dialect.
    pub fn with_dialect(mut self, dialect: Arc<dyn Dialect>) -> Self {
        self.dialect = dialect;
        self
    }

    /// Set the configuration source behind `CM(...)`.
    pub fn with_config_source(mut self, config: Arc<dyn ConfigSource>) -> Self {
        self.config = config;
        self
    }

    /// Enable or disable the template cache.
    pub fn with_cache_enabled(mut self, enabled: bool) -> Self {
        self.cache_enabled = enabled;
        self
    }

    /// Template cache in use.
    pub fn cache(&self) -> &Arc<TemplateCache> {
        &self.cache
    }

    /// Render `query` for one invocation.
    pub fn build(&self, query: &Arc<Query>, param: &QueryParameter) -> Result<Querier> {
        let name = query.versioned_name();
        let template = if self.cache_enabled && query.cache {
            self.cache.resolve(query)?
        } else {
            self.cache.compile(query)?
        };

        let extractor = ParameterExtractor::new(self.dialect.as_ref());
        let lookup = ConfigLookup {
            source: self.config.as_ref(),
        };

        let mut env = Environment::new();
        let conflict = |binding: &str| Error::NameConflict {
            query: name.clone(),
            name: binding.to_string(),
        };

        env.bind_function(PARAMETER_FUNCTION, &extractor)
            .map_err(|_| conflict(PARAMETER_FUNCTION))?;
        env.bind_function(CONFIG_FUNCTION, &lookup)
            .map_err(|_| conflict(CONFIG_FUNCTION))?;

        for (key, value) in &param.criteria {
            let value = match query.parameter_type(key) {
                Some(ty) => convert(value.clone(), ty)
                    .map_err(|e| Error::conversion(&name, key, e))?,
                None => value.clone(),
            };
            env.bind_value(key.as_str(), value)
                .map_err(|_| conflict(key))?;
        }

        let paging = [(LIMIT_VARIABLE, param.limit), (OFFSET_VARIABLE, param.offset)];
        for (variable, value) in paging {
            if let Some(value) = value {
                if !template.defines(variable) {
                    env.bind_value(variable, value)
                        .map_err(|_| conflict(variable))?;
                }
            }
        }

        for (key, value) in &param.context {
            env.bind_value(key.as_str(), value.clone())
                .map_err(|_| conflict(key))?;
        }

        let rendered = template
            .render(&env)
            .map_err(|e| Error::evaluation(&name, e, &query.script))?;
        let script = rendered.text.replace("\r\n", " ").replace('\n', " ");
        let parameters = extractor.take();

        debug!(
            query = %name,
            script = %script,
            parameters = parameters.len(),
            "built querier"
        );

        Ok(Querier::new(query.clone(), script, parameters))
    }
}
