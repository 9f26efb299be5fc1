//! Query definitions.

use std::collections::BTreeMap;

use dynaq_types::SemanticType;
use serde::{Deserialize, Serialize};

use super::fetch::FetchQuery;
use super::hint::QueryHint;

/// Separator between name and version in a versioned name.
pub const VERSION_SEPARATOR: char = ':';

/// Shape of the rows a query produces.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultShape {
    /// Plain field maps.
    Map,
    /// Rows that map onto a named record type.
    Named(String),
}

static MAP_SHAPE: ResultShape = ResultShape::Map;

/// A declarative, versioned query definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    /// Query name (e.g. `Users.search`).
    pub name: String,
    /// Optional version; empty when unversioned.
    #[serde(default)]
    pub version: String,
    /// Result shape descriptor.
    #[serde(default, rename = "result")]
    pub result_shape: Option<ResultShape>,
    /// Whether the compiled script may be cached.
    #[serde(default = "default_true")]
    pub cache: bool,
    /// Whether backends may cache result metadata.
    #[serde(default)]
    pub cache_result_metadata: bool,
    /// Raw script template.
    #[serde(default)]
    pub script: String,
    /// Sub-queries expanded into each result row.
    #[serde(default)]
    pub fetch_queries: Vec<FetchQuery>,
    /// Result hints, applied in order.
    #[serde(default)]
    pub hints: Vec<QueryHint>,
    /// Declared criteria types.
    #[serde(default)]
    pub parameter_types: BTreeMap<String, SemanticType>,
    /// Free-form properties passed through to backends.
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

fn default_true() -> bool {
    true
}

impl Query {
    /// Create an unversioned query producing maps.
    pub fn new(name: impl Into<String>, script: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: String::new(),
            result_shape: Some(ResultShape::Map),
            cache: true,
            cache_result_metadata: false,
            script: script.into(),
            fetch_queries: Vec::new(),
            hints: Vec::new(),
            parameter_types: BTreeMap::new(),
            properties: BTreeMap::new(),
        }
    }

    /// Set the version.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Set the result shape.
    pub fn with_result_shape(mut self, shape: ResultShape) -> Self {
        self.result_shape = Some(shape);
        self
    }

    /// Add a fetch query.
    pub fn with_fetch_query(mut self, fetch: FetchQuery) -> Self {
        self.fetch_queries.push(fetch);
        self
    }

    /// Add a hint.
    pub fn with_hint(mut self, hint: QueryHint) -> Self {
        self.hints.push(hint);
        self
    }

    /// Declare a criteria type.
    pub fn with_parameter_type(mut self, name: impl Into<String>, ty: SemanticType) -> Self {
        self.parameter_types.insert(name.into(), ty);
        self
    }

    /// Disable template caching for this query.
    pub fn without_cache(mut self) -> Self {
        self.cache = false;
        self
    }

    /// Add a property.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Globally unique key: `name:version`, or `name` when unversioned.
    pub fn versioned_name(&self) -> String {
        versioned_name(&self.name, &self.version)
    }

    /// Result shape, defaulting to maps.
    pub fn shape(&self) -> &ResultShape {
        self.result_shape.as_ref().unwrap_or(&MAP_SHAPE)
    }

    /// Declared type of a criteria entry.
    pub fn parameter_type(&self, name: &str) -> Option<SemanticType> {
        self.parameter_types.get(name).copied()
    }
}

/// Combine a name and version into a versioned name.
pub fn versioned_name(name: &str, version: &str) -> String {
    if version.is_empty() {
        name.to_string()
    } else {
        format!("{}{}{}", name, VERSION_SEPARATOR, version)
    }
}
