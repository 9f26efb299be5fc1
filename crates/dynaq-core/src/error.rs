//! Core error types.

use dynaq_lang::{EvalError, LangError};
use dynaq_types::ConversionError;
use thiserror::Error;

use crate::execution::Operation;
use crate::registry::ValidationErrors;

/// Failure reported by a backend executor.
pub type BackendError = Box<dyn std::error::Error + Send + Sync>;

/// Result alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced to callers of the engine.
#[derive(Debug, Error)]
pub enum Error {
    /// Mapping validation failed; the registry was not installed.
    #[error("mapping validation failed: {0}")]
    Validation(#[from] ValidationErrors),

    /// A mapping source could not be read or parsed.
    #[error("mapping source '{source_id}': {message}")]
    MappingSource { source_id: String, message: String },

    /// Script compilation or evaluation failed.
    #[error("template error in query '{query}': {message}\n{excerpt}")]
    Template {
        query: String,
        message: String,
        /// Line-annotated script excerpt.
        excerpt: String,
    },

    /// A name was bound twice into the template environment.
    #[error("name '{name}' is bound more than once while building query '{query}'")]
    NameConflict { query: String, name: String },

    /// Backend failure during execution.
    #[error("{operation} failed for query '{query}': {source}")]
    Execution {
        query: String,
        operation: Operation,
        source: BackendError,
    },

    /// `select` returned more rows than allowed.
    #[error("query '{query}' returned more than {max} rows")]
    ResultSizeExceeded { query: String, max: usize },

    /// No query with the given versioned name is registered.
    #[error("query not found: {0}")]
    QueryNotFound(String),

    /// A resolved hint failed while transforming results.
    #[error("hint '{key}' failed on query '{query}': {message}")]
    HintApplication {
        query: String,
        key: String,
        message: String,
    },

    /// A parameter could not be converted to its declared type.
    #[error("cannot convert parameter '{parameter}' of query '{query}': {source}")]
    Conversion {
        query: String,
        parameter: String,
        source: ConversionError,
    },

    /// Rows could not be decoded into the requested type.
    #[error("cannot decode result of query '{query}': {message}")]
    Decode { query: String, message: String },
}

impl Error {
    /// Wrap a template language error with the script excerpt.
    pub fn template(query: &str, error: &LangError, script: &str) -> Self {
        Error::Template {
            query: query.to_string(),
            message: error.to_string(),
            excerpt: error.format_with_source(script),
        }
    }

    /// Wrap an evaluation error raised while rendering `script`.
    pub fn evaluation(query: &str, error: EvalError, script: &str) -> Self {
        Self::template(query, &LangError::Eval(error), script)
    }

    /// Wrap a failed parameter conversion.
    pub fn conversion(query: &str, parameter: &str, source: ConversionError) -> Self {
        Error::Conversion {
            query: query.to_string(),
            parameter: parameter.to_string(),
            source,
        }
    }

    /// Wrap a backend failure.
    pub fn execution(query: &str, operation: Operation, source: BackendError) -> Self {
        Error::Execution {
            query: query.to_string(),
            operation,
            source,
        }
    }
}
