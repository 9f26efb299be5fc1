//! Engine configuration and template config lookup.

use std::collections::HashMap;

use dynaq_types::Value;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default maximum rows returned by `select`.
pub const DEFAULT_MAX_SELECT_SIZE: usize = 128;

/// Default maximum rows fetched for a multi-valued fetch query.
pub const DEFAULT_FETCH_MAX_SIZE: usize = 1024;

/// Default page size when an invocation carries no limit.
pub const DEFAULT_PAGE_LIMIT: usize = 16;

/// Default upper bound on cursor page fetches per call.
pub const DEFAULT_MAX_CURSOR_ITERATIONS: usize = 10_000;

/// Execution engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum rows `select` may return before failing.
    pub max_select_size: usize,
    /// Fetch query size used when a multi-valued fetch declares none.
    pub default_fetch_max_size: usize,
    /// Page size used by `page`/`forward` when the invocation has no limit.
    pub default_page_limit: usize,
    /// Upper bound on page fetches in the cursor paging loop.
    pub max_cursor_iterations: usize,
    /// Whether compiled templates are cached.
    pub template_cache_enabled: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_select_size: DEFAULT_MAX_SELECT_SIZE,
            default_fetch_max_size: DEFAULT_FETCH_MAX_SIZE,
            default_page_limit: DEFAULT_PAGE_LIMIT,
            max_cursor_iterations: DEFAULT_MAX_CURSOR_ITERATIONS,
            template_cache_enabled: true,
        }
    }
}

impl EngineConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum `select` size.
    pub fn with_max_select_size(mut self, size: usize) -> Self {
        self.max_select_size = size;
        self
    }

    /// Set the default fetch query size.
    pub fn with_default_fetch_max_size(mut self, size: usize) -> Self {
        self.default_fetch_max_size = size;
        self
    }

    /// Set the default page size.
    pub fn with_default_page_limit(mut self, limit: usize) -> Self {
        self.default_page_limit = limit;
        self
    }

    /// Set the cursor paging iteration bound.
    pub fn with_max_cursor_iterations(mut self, iterations: usize) -> Self {
        self.max_cursor_iterations = iterations;
        self
    }

    /// Enable or disable the template cache.
    pub fn with_template_cache(mut self, enabled: bool) -> Self {
        self.template_cache_enabled = enabled;
        self
    }
}

/// Source of values for the template `CM(...)` config lookup.
pub trait ConfigSource: Send + Sync {
    /// Look up a configuration value by name.
    fn get(&self, name: &str) -> Option<Value>;
}

/// In-memory [`ConfigSource`].
///
/// Dotted names resolve into nested maps when no exact key matches, so
/// `{"db": {"schema": "app"}}` answers both `db` and `db.schema`.
#[derive(Debug, Clone, Default)]
pub struct MapConfigSource {
    values: HashMap<String, Value>,
}

impl MapConfigSource {
    /// Create an empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a value.
    pub fn with_value(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    /// Insert or replace a value.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(name.into(), value.into());
    }

    /// Load from a JSON object.
    pub fn from_json(text: &str) -> Result<Self> {
        let json: serde_json::Value =
            serde_json::from_str(text).map_err(|e| Error::MappingSource {
                source_id: "config".to_string(),
                message: e.to_string(),
            })?;
        match json {
            serde_json::Value::Object(map) => Ok(Self {
                values: map.into_iter().map(|(k, v)| (k, Value::from(v))).collect(),
            }),
            other => Err(Error::MappingSource {
                source_id: "config".to_string(),
                message: format!("expected a JSON object, found {}", other),
            }),
        }
    }

    /// Number of top-level entries.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if the source is empty.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl ConfigSource for MapConfigSource {
    fn get(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.values.get(name) {
            return Some(value.clone());
        }
        let (head, rest) = name.split_once('.')?;
        self.values.get(head)?.lookup(rest).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_config_builder() {
        let config = EngineConfig::new()
            .with_max_select_size(10)
            .with_max_cursor_iterations(5)
            .with_template_cache(false);

        assert_eq!(config.max_select_size, 10);
        assert_eq!(config.max_cursor_iterations, 5);
        assert!(!config.template_cache_enabled);
        assert_eq!(config.default_fetch_max_size, DEFAULT_FETCH_MAX_SIZE);
    }

    #[test]
    fn test_engine_config_partial_json() {
        let config: EngineConfig = serde_json::from_str(r#"{"max_select_size": 5}"#).unwrap();
        assert_eq!(config.max_select_size, 5);
        assert_eq!(config.default_page_limit, DEFAULT_PAGE_LIMIT);
    }

    #[test]
    fn test_map_config_dotted_lookup() {
        let source = MapConfigSource::from_json(r#"{"db": {"schema": "app"}, "limit": 3}"#).unwrap();
        assert_eq!(source.get("limit"), Some(Value::Int(3)));
        assert_eq!(source.get("db.schema"), Some(Value::from("app")));
        assert_eq!(source.get("db.missing"), None);
        assert_eq!(source.get("nothing"), None);
    }

    #[test]
    fn test_map_config_rejects_non_object() {
        assert!(MapConfigSource::from_json("[1, 2]").is_err());
    }
}
