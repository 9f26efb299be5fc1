//! In-memory mapping model: queries, fetch queries and hints, grouped into
//! mappings loaded from sources.

mod fetch;
mod hint;
mod query;
mod source;

pub use fetch::{FetchQuery, FetchQueryParameter, ParameterSource};
pub use hint::{HintParameter, QueryHint};
pub use query::{versioned_name, Query, ResultShape, VERSION_SEPARATOR};
pub use source::{DirectoryMappingSource, JsonMappingSource, MappingSource};

use dynaq_types::SemanticType;
use serde::{Deserialize, Serialize};

/// A parameter type declaration shared by every query of a mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterMapping {
    pub name: String,
    #[serde(rename = "type")]
    pub semantic_type: SemanticType,
}

/// A named group of queries with shared parameter declarations.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct QueryMapping {
    /// Identifier of the source this mapping was read from.
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub parameters: Vec<ParameterMapping>,
    #[serde(default)]
    pub queries: Vec<Query>,
}

impl QueryMapping {
    /// Create an empty mapping for `source`.
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            ..Default::default()
        }
    }

    /// Add a query.
    pub fn with_query(mut self, query: Query) -> Self {
        self.queries.push(query);
        self
    }

    /// Add a shared parameter declaration.
    pub fn with_parameter(mut self, name: impl Into<String>, ty: SemanticType) -> Self {
        self.parameters.push(ParameterMapping {
            name: name.into(),
            semantic_type: ty,
        });
        self
    }

    /// Merge shared parameter declarations into each query; a query's own
    /// declaration wins.
    pub fn merge_parameters(&mut self) {
        for query in &mut self.queries {
            for param in &self.parameters {
                query
                    .parameter_types
                    .entry(param.name.clone())
                    .or_insert(param.semantic_type);
            }
        }
    }
}
