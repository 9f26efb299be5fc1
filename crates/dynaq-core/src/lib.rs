//! dynaq core - declarative query execution.
//!
//! Queries are declared in mappings (a script template plus fetch queries and
//! result hints), validated into a generation-stamped registry, rendered per
//! invocation into a [`Querier`] and run against a pluggable [`QueryExecutor`].
//!
//! ```rust
//! use std::sync::Arc;
//! use dynaq_core::{MappingRegistry, MemoryExecutor, Query, QueryMapping, QueryParameter, QueryService};
//! use dynaq_types::row;
//!
//! let registry = Arc::new(MappingRegistry::new());
//! registry
//!     .install(vec![QueryMapping::new("inline").with_query(Query::new(
//!         "Users.byIds",
//!         "SELECT * FROM users WHERE id IN (${ P(ids) })",
//!     ))])
//!     .unwrap();
//!
//! let executor = MemoryExecutor::new().with_rows("Users.byIds", vec![row! { "id" => 1 }]);
//! let service = QueryService::new(registry, Arc::new(executor));
//!
//! let param = QueryParameter::new().with_criteria("ids", vec![1, 2, 3]);
//! let querier = service.querier("Users.byIds", &param).unwrap();
//! assert_eq!(querier.script(), "SELECT * FROM users WHERE id IN (?,?,?)");
//! assert_eq!(service.select("Users.byIds", &param).unwrap().len(), 1);
//! ```

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

pub mod config;
pub mod error;
pub mod execution;
pub mod hint;
pub mod mapping;
pub mod metrics;
pub mod querier;
pub mod registry;
pub mod template;

pub use config::{ConfigSource, EngineConfig, MapConfigSource};
pub use error::{BackendError, Error, Result};
pub use execution::{
    CursorBackend, CursorPage, CursorPagingExecutor, Forwarding, MemoryCursorBackend,
    MemoryExecutor, Operation, Paging, QueryExecutor, QueryService,
};
pub use hint::{AppliedHint, HintError, HintHandler, HintPipeline, MapperRegistry, RowMapper};
pub use mapping::{
    DirectoryMappingSource, FetchQuery, FetchQueryParameter, JsonMappingSource, MappingSource,
    ParameterSource, Query, QueryHint, QueryMapping, ResultShape,
};
pub use metrics::{ExecutionMetrics, MetricsSnapshot};
pub use querier::{Dialect, Querier, QuerierBuilder, QueryParameter, SqlDialect};
pub use registry::{MappingRegistry, MappingSnapshot, ReloadListener, ValidationError};
pub use template::TemplateCache;

/// Re-export runtime value types.
pub use dynaq_types as types;
