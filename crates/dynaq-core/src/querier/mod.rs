//! Per-invocation parameters and the rendered unit of work ([`Querier`]).

mod builder;
mod dialect;

pub use builder::{
    QuerierBuilder, CONFIG_FUNCTION, LIMIT_VARIABLE, OFFSET_VARIABLE, PARAMETER_FUNCTION,
};
pub use dialect::{Dialect, SqlDialect, POSITION_MARKER};

use std::sync::Arc;

use dynaq_types::{Row, Value};
use serde::{Deserialize, Serialize};

use crate::mapping::Query;

/// Runtime parameters of one invocation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryParameter {
    /// Caller-supplied values.
    pub criteria: Row,
    /// Ambient values (tenant, locale, ...).
    pub context: Row,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl QueryParameter {
    /// Create empty parameters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create parameters from a criteria row.
    pub fn from_criteria(criteria: Row) -> Self {
        Self {
            criteria,
            ..Default::default()
        }
    }

    /// Add a criteria value.
    pub fn with_criteria(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.criteria.insert(name.into(), value.into());
        self
    }

    /// Add a context value.
    pub fn with_context(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(name.into(), value.into());
        self
    }

    /// Set the limit.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Set the offset.
    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }
}

/// A query rendered for one invocation: backend script plus bound values in
/// placeholder order.
#[derive(Debug, Clone)]
pub struct Querier {
    query: Arc<Query>,
    script: String,
    parameters: Vec<Value>,
}

impl Querier {
    /// Package a rendered script.
    pub fn new(query: Arc<Query>, script: String, parameters: Vec<Value>) -> Self {
        Self {
            query,
            script,
            parameters,
        }
    }

    /// Source query.
    pub fn query(&self) -> &Arc<Query> {
        &self.query
    }

    /// Versioned name of the source query.
    pub fn name(&self) -> String {
        self.query.versioned_name()
    }

    /// Rendered backend script.
    pub fn script(&self) -> &str {
        &self.script
    }

    /// Bound values, in placeholder order.
    pub fn parameters(&self) -> &[Value] {
        &self.parameters
    }
}
