//! Result hint pipeline.
//!
//! Each [`QueryHint`] of an executed query is resolved to at most one
//! [`HintHandler`] (the first whose `can_handle` accepts it) and applied to
//! every result row. Resolutions are cached by `(shape, hint)`. A hint that
//! fails to resolve is logged once, marked broken and skipped from then on.

mod convert;
mod mapper;
mod reduce;

pub use convert::{FieldConvertHandler, FIELD_CONVERT_KEY};
pub use mapper::{
    BeanMapperHandler, MapperRegistry, RowMapper, ScriptMapperHandler, BEAN_MAPPER_KEY,
    SCRIPT_MAPPER_KEY,
};
pub use reduce::{MapReduceHandler, MAP_REDUCE_KEY};

use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use dynaq_types::Row;
use thiserror::Error;
use tracing::warn;

use crate::error::{Error, Result};
use crate::mapping::{Query, QueryHint, ResultShape};
use crate::querier::QueryParameter;

/// Why a hint could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HintError {
    #[error("no handler accepts hint '{key}'")]
    NoHandler { key: String },

    #[error("hint '{key}' is missing parameter '{parameter}'")]
    MissingParameter { key: String, parameter: String },

    #[error("hint '{key}' has invalid parameter '{parameter}': {message}")]
    InvalidParameter {
        key: String,
        parameter: String,
        message: String,
    },

    #[error("no row mapper registered as '{0}'")]
    UnknownMapper(String),

    #[error("hint '{key}' script does not compile: {message}")]
    Script { key: String, message: String },
}

impl HintError {
    pub(crate) fn missing(hint: &QueryHint, parameter: &str) -> Self {
        HintError::MissingParameter {
            key: hint.key.clone(),
            parameter: parameter.to_string(),
        }
    }

    pub(crate) fn invalid(hint: &QueryHint, parameter: &str, message: impl ToString) -> Self {
        HintError::InvalidParameter {
            key: hint.key.clone(),
            parameter: parameter.to_string(),
            message: message.to_string(),
        }
    }
}

/// A resolved hint, ready to transform rows.
pub trait AppliedHint: Send + Sync {
    /// Transform `rows` in place.
    fn apply(&self, param: &QueryParameter, rows: &mut [Row]) -> std::result::Result<(), String>;
}

/// A family of hints.
pub trait HintHandler: Send + Sync {
    /// Whether this handler accepts `hint` for results of `shape`.
    fn can_handle(&self, shape: &ResultShape, hint: &QueryHint) -> bool;

    /// Validate the hint's parameters and build the transformation.
    fn resolve(&self, hint: &QueryHint) -> std::result::Result<Arc<dyn AppliedHint>, HintError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct HintKey {
    shape: ResultShape,
    hint: QueryHint,
}

/// Ordered chain of hint handlers with resolution caching.
pub struct HintPipeline {
    handlers: Vec<Arc<dyn HintHandler>>,
    mappers: Arc<MapperRegistry>,
    resolved: DashMap<HintKey, Arc<dyn AppliedHint>>,
    broken: DashSet<HintKey>,
}

impl Default for HintPipeline {
    fn default() -> Self {
        Self::standard()
    }
}

impl HintPipeline {
    /// Pipeline with no handlers.
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
            mappers: Arc::new(MapperRegistry::new()),
            resolved: DashMap::new(),
            broken: DashSet::new(),
        }
    }

    /// Pipeline with the built-in handlers: field-convert, map-reduce,
    /// bean-mapper (over [`HintPipeline::mappers`]) and script-mapper.
    pub fn standard() -> Self {
        let pipeline = Self::new();
        let mappers = pipeline.mappers.clone();
        pipeline
            .with_handler(Arc::new(FieldConvertHandler))
            .with_handler(Arc::new(MapReduceHandler))
            .with_handler(Arc::new(BeanMapperHandler::new(mappers)))
            .with_handler(Arc::new(ScriptMapperHandler))
    }

    /// Append a handler.
    pub fn with_handler(mut self, handler: Arc<dyn HintHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    /// Row mappers available to the bean-mapper handler.
    pub fn mappers(&self) -> &Arc<MapperRegistry> {
        &self.mappers
    }

    /// Whether `hint` has been marked broken for `shape`.
    pub fn is_broken(&self, shape: &ResultShape, hint: &QueryHint) -> bool {
        self.broken.contains(&HintKey {
            shape: shape.clone(),
            hint: hint.clone(),
        })
    }

    /// Apply every hint of `query` to `rows`, in declaration order.
    pub fn apply(&self, query: &Query, param: &QueryParameter, rows: &mut [Row]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        for hint in &query.hints {
            let Some(applied) = self.resolve(query, hint) else {
                continue;
            };
            applied
                .apply(param, rows)
                .map_err(|message| Error::HintApplication {
                    query: query.versioned_name(),
                    key: hint.key.clone(),
                    message,
                })?;
        }
        Ok(())
    }

    fn resolve(&self, query: &Query, hint: &QueryHint) -> Option<Arc<dyn AppliedHint>> {
        let shape = query.shape();
        let key = HintKey {
            shape: shape.clone(),
            hint: hint.clone(),
        };
        if self.broken.contains(&key) {
            return None;
        }
        if let Some(applied) = self.resolved.get(&key) {
            return Some(applied.clone());
        }

        let resolution = self
            .handlers
            .iter()
            .find(|handler| handler.can_handle(shape, hint))
            .ok_or_else(|| HintError::NoHandler {
                key: hint.key.clone(),
            })
            .and_then(|handler| handler.resolve(hint));

        match resolution {
            Ok(applied) => {
                self.resolved.insert(key, applied.clone());
                Some(applied)
            }
            Err(error) => {
                if self.broken.insert(key) {
                    warn!(
                        query = %query.versioned_name(),
                        hint = %hint.key,
                        error = %error,
                        "hint cannot be resolved; skipping it from now on"
                    );
                }
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dynaq_types::{row, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        resolutions: AtomicUsize,
    }

    struct Tag;

    impl AppliedHint for Tag {
        fn apply(&self, _param: &QueryParameter, rows: &mut [Row]) -> std::result::Result<(), String> {
            for row in rows {
                row.insert("tagged".to_string(), Value::Bool(true));
            }
            Ok(())
        }
    }

    impl HintHandler for Counting {
        fn can_handle(&self, _shape: &ResultShape, hint: &QueryHint) -> bool {
            hint.key == "tag"
        }

        fn resolve(&self, hint: &QueryHint) -> std::result::Result<Arc<dyn AppliedHint>, HintError> {
            self.resolutions.fetch_add(1, Ordering::SeqCst);
            match hint.first("fail") {
                Some(_) => Err(HintError::missing(hint, "x")),
                None => Ok(Arc::new(Tag)),
            }
        }
    }

    fn pipeline() -> (HintPipeline, Arc<Counting>) {
        let counting = Arc::new(Counting {
            resolutions: AtomicUsize::new(0),
        });
        (HintPipeline::new().with_handler(counting.clone()), counting)
    }

    #[test]
    fn test_resolution_cached() {
        let (pipeline, counting) = pipeline();
        let query = Query::new("A", "x").with_hint(QueryHint::new("tag"));

        for _ in 0..3 {
            let mut rows = vec![row! { "id" => 1 }];
            pipeline.apply(&query, &QueryParameter::new(), &mut rows).unwrap();
            assert_eq!(rows[0]["tagged"], Value::Bool(true));
        }
        assert_eq!(counting.resolutions.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_broken_hint_skipped_and_not_retried() {
        let (pipeline, counting) = pipeline();
        let hint = QueryHint::new("tag").with_parameter("fail", "yes");
        let query = Query::new("A", "x").with_hint(hint.clone());

        for _ in 0..3 {
            let mut rows = vec![row! { "id" => 1 }];
            pipeline.apply(&query, &QueryParameter::new(), &mut rows).unwrap();
            assert!(!rows[0].contains_key("tagged"));
        }
        assert_eq!(counting.resolutions.load(Ordering::SeqCst), 1);
        assert!(pipeline.is_broken(&ResultShape::Map, &hint));
    }

    #[test]
    fn test_unhandled_hint_is_broken() {
        let pipeline = HintPipeline::new();
        let hint = QueryHint::new("unknown");
        let query = Query::new("A", "x").with_hint(hint.clone());
        let mut rows = vec![row! { "id" => 1 }];
        pipeline.apply(&query, &QueryParameter::new(), &mut rows).unwrap();
        assert!(pipeline.is_broken(&ResultShape::Map, &hint));
    }
}
