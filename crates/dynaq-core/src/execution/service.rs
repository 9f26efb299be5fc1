//! The query execution service.

use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use dynaq_lang::{compile_expression, CompiledExpression, Environment};
use dynaq_types::{convert, row_lookup, Row, Value};
use serde::de::DeserializeOwned;
use tracing::debug;

use super::{Forwarding, Operation, Paging, QueryExecutor};
use crate::config::{ConfigSource, EngineConfig};
use crate::error::{Error, Result};
use crate::hint::HintPipeline;
use crate::mapping::{FetchQuery, ParameterSource, Query};
use crate::metrics::ExecutionMetrics;
use crate::querier::{Dialect, Querier, QuerierBuilder, QueryParameter};
use crate::registry::{MappingRegistry, MappingSnapshot, ReloadListener};
use crate::template::TemplateCache;

/// Runs registered queries against a backend executor.
///
/// Every call resolves its query and all fetched sub-queries from a single
/// registry snapshot, so a concurrent reload never mixes generations within
/// one result.
pub struct QueryService {
    registry: Arc<MappingRegistry>,
    builder: QuerierBuilder,
    executor: Arc<dyn QueryExecutor>,
    hints: Arc<HintPipeline>,
    config: EngineConfig,
    metrics: Arc<ExecutionMetrics>,
    predicates: Arc<PredicateCache>,
}

/// Compiled fetch predicates by source text, cleared on every reload.
#[derive(Default)]
struct PredicateCache {
    compiled: DashMap<String, Arc<CompiledExpression>>,
}

impl ReloadListener for PredicateCache {
    fn after_reload(&self, _generation: u64) {
        self.compiled.clear();
    }
}

impl QueryService {
    /// Create a service over `registry` and `executor`.
    ///
    /// The service's template and predicate caches are registered as reload
    /// listeners for the lifetime of the service.
    pub fn new(registry: Arc<MappingRegistry>, executor: Arc<dyn QueryExecutor>) -> Self {
        let cache = Arc::new(TemplateCache::new());
        let predicates = Arc::new(PredicateCache::default());
        registry.add_listener(&cache);
        registry.add_listener(&predicates);
        Self {
            registry,
            builder: QuerierBuilder::new(cache),
            executor,
            hints: Arc::new(HintPipeline::standard()),
            config: EngineConfig::default(),
            metrics: Arc::new(ExecutionMetrics::new()),
            predicates,
        }
    }

    /// Set the engine configuration.
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.builder = self
            .builder
            .with_cache_enabled(config.template_cache_enabled);
        self.config = config;
        self
    }

    /// Set the backend dialect.
    pub fn with_dialect(mut self, dialect: Arc<dyn Dialect>) -> Self {
        self.builder = self.builder.with_dialect(dialect);
        self
    }

    /// Set the configuration source behind `CM(...)`.
    pub fn with_config_source(mut self, config: Arc<dyn ConfigSource>) -> Self {
        self.builder = self.builder.with_config_source(config);
        self
    }

    /// Set the hint pipeline.
    pub fn with_hints(mut self, hints: Arc<HintPipeline>) -> Self {
        self.hints = hints;
        self
    }

    /// Mapping registry.
    pub fn registry(&self) -> &Arc<MappingRegistry> {
        &self.registry
    }

    /// Hint pipeline.
    pub fn hints(&self) -> &Arc<HintPipeline> {
        &self.hints
    }

    /// Template cache.
    pub fn template_cache(&self) -> &Arc<TemplateCache> {
        self.builder.cache()
    }

    /// Execution metrics.
    pub fn metrics(&self) -> &Arc<ExecutionMetrics> {
        &self.metrics
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Render `name` for `param` without executing it.
    pub fn querier(&self, name: &str, param: &QueryParameter) -> Result<Querier> {
        let query = lookup(&self.registry.snapshot(), name)?;
        self.builder.build(&query, param)
    }

    /// First row, expanded and hinted.
    pub fn get(&self, name: &str, param: &QueryParameter) -> Result<Option<Row>> {
        self.timed(
            Operation::Get,
            || {
                let snapshot = self.registry.snapshot();
                let query = lookup(&snapshot, name)?;
                let querier = self.builder.build(&query, param)?;
                let row = self
                    .executor
                    .get(&querier)
                    .map_err(|e| Error::execution(&querier.name(), Operation::Get, e))?;

                let mut rows: Vec<Row> = row.into_iter().collect();
                self.complete(&snapshot, &query, param, &mut rows)?;
                Ok(rows.pop())
            },
            |row| usize::from(row.is_some()),
        )
    }

    /// All rows, failing when there are more than `max_select_size`.
    pub fn select(&self, name: &str, param: &QueryParameter) -> Result<Vec<Row>> {
        self.timed(
            Operation::Select,
            || {
                let snapshot = self.registry.snapshot();
                let query = lookup(&snapshot, name)?;
                let querier = self.builder.build(&query, param)?;
                let max = self.config.max_select_size;

                let mut rows = self
                    .executor
                    .select(&querier, max.saturating_add(1))
                    .map_err(|e| Error::execution(&querier.name(), Operation::Select, e))?;
                if rows.len() > max {
                    return Err(Error::ResultSizeExceeded {
                        query: querier.name(),
                        max,
                    });
                }

                self.complete(&snapshot, &query, param, &mut rows)?;
                Ok(rows)
            },
            Vec::len,
        )
    }

    /// One page at the invocation's offset and limit, with the total count.
    pub fn page(&self, name: &str, param: &QueryParameter) -> Result<Paging> {
        self.timed(
            Operation::Page,
            || {
                let snapshot = self.registry.snapshot();
                let query = lookup(&snapshot, name)?;
                let querier = self.builder.build(&query, param)?;
                let (offset, limit) = self.window(param);

                let mut rows = self
                    .executor
                    .page(&querier, offset, limit)
                    .map_err(|e| Error::execution(&querier.name(), Operation::Page, e))?;

                let size = rows.len();
                let total = if size > 0 && size < limit {
                    // A short page ends the data.
                    offset + size
                } else if size == 0 && offset == 0 && limit > 0 {
                    0
                } else {
                    self.executor
                        .total(&querier)
                        .map_err(|e| Error::execution(&querier.name(), Operation::Total, e))?
                };

                self.complete(&snapshot, &query, param, &mut rows)?;
                Ok(Paging {
                    offset,
                    limit,
                    total,
                    results: rows,
                })
            },
            |paging| paging.results.len(),
        )
    }

    /// One window at the invocation's offset and limit, and whether more rows
    /// follow. No count query is issued.
    pub fn forward(&self, name: &str, param: &QueryParameter) -> Result<Forwarding> {
        self.timed(
            Operation::Forward,
            || {
                let snapshot = self.registry.snapshot();
                let query = lookup(&snapshot, name)?;
                let querier = self.builder.build(&query, param)?;
                let (offset, limit) = self.window(param);

                let mut rows = self
                    .executor
                    .page(&querier, offset, limit.saturating_add(1))
                    .map_err(|e| Error::execution(&querier.name(), Operation::Forward, e))?;
                let has_next = rows.len() > limit;
                rows.truncate(limit);

                self.complete(&snapshot, &query, param, &mut rows)?;
                Ok(Forwarding {
                    has_next,
                    results: rows,
                })
            },
            |forwarding| forwarding.results.len(),
        )
    }

    /// Total row count.
    pub fn total(&self, name: &str, param: &QueryParameter) -> Result<usize> {
        self.timed(
            Operation::Total,
            || {
                let querier = self.querier(name, param)?;
                self.executor
                    .total(&querier)
                    .map_err(|e| Error::execution(&querier.name(), Operation::Total, e))
            },
            |_| 0,
        )
    }

    /// [`QueryService::get`] decoded into `T`.
    pub fn get_as<T: DeserializeOwned>(&self, name: &str, param: &QueryParameter) -> Result<Option<T>> {
        self.get(name, param)?
            .map(|row| decode(name, row))
            .transpose()
    }

    /// [`QueryService::select`] decoded into `T`.
    pub fn select_as<T: DeserializeOwned>(&self, name: &str, param: &QueryParameter) -> Result<Vec<T>> {
        self.select(name, param)?
            .into_iter()
            .map(|row| decode(name, row))
            .collect()
    }

    /// [`QueryService::page`] decoded into `T`.
    pub fn page_as<T: DeserializeOwned>(&self, name: &str, param: &QueryParameter) -> Result<Paging<T>> {
        self.page(name, param)?
            .try_map_results(|row| decode(name, row))
    }

    /// [`QueryService::forward`] decoded into `T`.
    pub fn forward_as<T: DeserializeOwned>(
        &self,
        name: &str,
        param: &QueryParameter,
    ) -> Result<Forwarding<T>> {
        self.forward(name, param)?
            .try_map_results(|row| decode(name, row))
    }

    fn window(&self, param: &QueryParameter) -> (usize, usize) {
        (
            param.offset.unwrap_or(0),
            param.limit.unwrap_or(self.config.default_page_limit),
        )
    }

    fn timed<T>(
        &self,
        operation: Operation,
        call: impl FnOnce() -> Result<T>,
        rows: impl Fn(&T) -> usize,
    ) -> Result<T> {
        let started = Instant::now();
        let result = call();
        let count = result.as_ref().map(rows).unwrap_or(0);
        self.metrics
            .record_call(operation, started.elapsed(), count, result.is_ok());
        result
    }

    /// Expand fetch queries into `rows`, then apply hints.
    fn complete(
        &self,
        snapshot: &MappingSnapshot,
        query: &Query,
        param: &QueryParameter,
        rows: &mut [Row],
    ) -> Result<()> {
        for fetch in &query.fetch_queries {
            self.expand(snapshot, query, fetch, param, rows)?;
        }
        self.hints.apply(query, param, rows)
    }

    fn expand(
        &self,
        snapshot: &MappingSnapshot,
        parent: &Query,
        fetch: &FetchQuery,
        param: &QueryParameter,
        rows: &mut [Row],
    ) -> Result<()> {
        let child = lookup(snapshot, &fetch.reference)?;
        let predicate = match &fetch.predicate {
            Some(source) => Some(self.predicate(parent, source)?),
            None => None,
        };
        let max = fetch.effective_max_size(self.config.default_fetch_max_size);

        for row in rows.iter_mut() {
            if let Some(predicate) = &predicate {
                let env = Environment::from_row(row);
                let selected = predicate
                    .evaluate(&env)
                    .map_err(|e| Error::evaluation(&parent.versioned_name(), e, predicate.source()))?
                    .is_truthy();
                if !selected {
                    let empty = if fetch.multi_records {
                        Value::List(Vec::new())
                    } else {
                        Value::Null
                    };
                    row.insert(fetch.inject_property_name.clone(), empty);
                    continue;
                }
            }

            let child_param = fetch_parameter(&child.versioned_name(), fetch, param, row)?;
            let querier = self.builder.build(&child, &child_param)?;
            let mut fetched = self
                .executor
                .select(&querier, max)
                .map_err(|e| Error::execution(&querier.name(), Operation::Select, e))?;
            fetched.truncate(max);

            self.complete(snapshot, &child, &child_param, &mut fetched)?;
            self.metrics.record_fetch_expansion();
            debug!(
                query = %parent.versioned_name(),
                fetch = %fetch.reference,
                property = %fetch.inject_property_name,
                rows = fetched.len(),
                "fetch expanded"
            );

            let value = if fetch.multi_records {
                Value::List(fetched.into_iter().map(Value::Map).collect())
            } else {
                fetched.into_iter().next().map(Value::Map).unwrap_or_default()
            };
            row.insert(fetch.inject_property_name.clone(), value);
        }
        Ok(())
    }

    fn predicate(&self, parent: &Query, source: &str) -> Result<Arc<CompiledExpression>> {
        if let Some(compiled) = self.predicates.compiled.get(source) {
            return Ok(compiled.clone());
        }
        let compiled = compile_expression(source)
            .map(Arc::new)
            .map_err(|e| Error::template(&parent.versioned_name(), &e, source))?;
        self.predicates
            .compiled
            .insert(source.to_string(), compiled.clone());
        Ok(compiled)
    }
}

fn lookup(snapshot: &MappingSnapshot, name: &str) -> Result<Arc<Query>> {
    snapshot
        .get(name)
        .cloned()
        .ok_or_else(|| Error::QueryNotFound(name.to_string()))
}

/// Invocation parameters of a fetched query for one parent row.
fn fetch_parameter(
    child: &str,
    fetch: &FetchQuery,
    param: &QueryParameter,
    row: &Row,
) -> Result<QueryParameter> {
    let mut criteria = Row::new();
    for binding in &fetch.parameters {
        let key = binding.source_key();
        let value = match binding.source {
            Some(ParameterSource::Criteria) => param.criteria.get(key).cloned(),
            Some(ParameterSource::Result) => row_lookup(row, key).cloned(),
            Some(ParameterSource::Context) => param.context.get(key).cloned(),
            Some(ParameterSource::Constant) => binding.value.clone(),
            None => None,
        }
        .unwrap_or_default();

        let value = match binding.semantic_type {
            Some(ty) => {
                convert(value, ty).map_err(|e| Error::conversion(child, &binding.name, e))?
            }
            None => value,
        };
        criteria.insert(binding.name.clone(), value);
    }

    Ok(QueryParameter {
        criteria,
        context: param.context.clone(),
        limit: None,
        offset: None,
    })
}

fn decode<T: DeserializeOwned>(query: &str, row: Row) -> Result<T> {
    serde_json::from_value(Value::Map(row).to_json()).map_err(|e| Error::Decode {
        query: query.to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::MemoryExecutor;
    use crate::mapping::{FetchQueryParameter, QueryMapping};
    use dynaq_types::row;
    use serde::Deserialize;

    fn service(queries: Vec<Query>, executor: MemoryExecutor) -> QueryService {
        let registry = Arc::new(MappingRegistry::new());
        let mut mapping = QueryMapping::new("test");
        mapping.queries = queries;
        registry.install(vec![mapping]).unwrap();
        QueryService::new(registry, Arc::new(executor))
    }

    fn numbers(n: usize) -> Vec<Row> {
        (0..n).map(|i| row! { "id" => i }).collect()
    }

    #[test]
    fn test_select_size_policy() {
        let service = service(
            vec![Query::new("Items.all", "SELECT * FROM items")],
            MemoryExecutor::new().with_rows("Items.all", numbers(6)),
        )
        .with_config(EngineConfig::new().with_max_select_size(5));

        let err = service.select("Items.all", &QueryParameter::new()).unwrap_err();
        assert!(matches!(err, Error::ResultSizeExceeded { max: 5, .. }));

        let service = service.with_config(EngineConfig::new().with_max_select_size(6));
        assert_eq!(service.select("Items.all", &QueryParameter::new()).unwrap().len(), 6);
    }

    #[test]
    fn test_page_total_shortcut_and_count() {
        let service = service(
            vec![Query::new("Items.all", "x")],
            MemoryExecutor::new().with_rows("Items.all", numbers(12)),
        );

        let short = service
            .page("Items.all", &QueryParameter::new().with_offset(10).with_limit(5))
            .unwrap();
        assert_eq!(short.total, 12);
        assert_eq!(short.results.len(), 2);

        let full = service
            .page("Items.all", &QueryParameter::new().with_offset(0).with_limit(5))
            .unwrap();
        assert_eq!(full.total, 12);
        assert_eq!(full.limit, 5);
    }

    #[test]
    fn test_page_defaults() {
        let service = service(
            vec![Query::new("Items.all", "x")],
            MemoryExecutor::new().with_rows("Items.all", numbers(3)),
        )
        .with_config(EngineConfig::new().with_default_page_limit(2));

        let paging = service.page("Items.all", &QueryParameter::new()).unwrap();
        assert_eq!((paging.offset, paging.limit, paging.total), (0, 2, 3));
    }

    #[test]
    fn test_get_and_total() {
        let service = service(
            vec![Query::new("Items.all", "x")],
            MemoryExecutor::new().with_rows("Items.all", numbers(4)),
        );
        let row = service.get("Items.all", &QueryParameter::new()).unwrap();
        assert_eq!(row, Some(row! { "id" => 0 }));
        assert_eq!(service.total("Items.all", &QueryParameter::new()).unwrap(), 4);
        assert_eq!(service.metrics().calls(Operation::Get), 1);
    }

    #[test]
    fn test_unknown_query() {
        let service = service(vec![], MemoryExecutor::new());
        let err = service.get("Nope", &QueryParameter::new()).unwrap_err();
        assert!(matches!(err, Error::QueryNotFound(name) if name == "Nope"));
        assert_eq!(service.metrics().failures(Operation::Get), 1);
    }

    #[test]
    fn test_backend_failure_wrapped() {
        let service = service(
            vec![Query::new("Items.all", "x")],
            MemoryExecutor::new().with_source("Items.all", |_: &Querier| {
                Err("connection reset".into())
            }),
        );
        let err = service.select("Items.all", &QueryParameter::new()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "select failed for query 'Items.all': connection reset"
        );
    }

    #[test]
    fn test_single_fetch_with_predicate_and_constant() {
        let users = Query::new("Users.all", "x").with_fetch_query(
            FetchQuery::single("Profiles.get", "profile")
                .with_predicate("active")
                .with_parameter(FetchQueryParameter::from_result("userId", "id"))
                .with_parameter(FetchQueryParameter::constant("kind", "public")),
        );
        let profiles = Query::new("Profiles.get", "WHERE user = ${ P(userId) } AND kind = ${ P(kind) }");
        let executor = MemoryExecutor::new()
            .with_rows(
                "Users.all",
                vec![
                    row! { "id" => 1, "active" => true },
                    row! { "id" => 2, "active" => false },
                ],
            )
            .with_source("Profiles.get", |querier: &Querier| {
                Ok(vec![row! {
                    "user" => querier.parameters()[0].clone(),
                    "kind" => querier.parameters()[1].clone(),
                }])
            });
        let service = service(vec![users, profiles], executor);

        let rows = service.select("Users.all", &QueryParameter::new()).unwrap();
        assert_eq!(
            rows[0]["profile"],
            Value::Map(row! { "user" => 1, "kind" => "public" })
        );
        assert_eq!(rows[1]["profile"], Value::Null);
        assert_eq!(service.metrics().fetch_expansions(), 1);
    }

    #[test]
    fn test_fetch_conversion_failure_names_fetched_query() {
        let users = Query::new("Users.all", "x").with_fetch_query(
            FetchQuery::multi("Orders.byUser", "orders").with_parameter(
                FetchQueryParameter::from_result("userId", "id")
                    .with_type(dynaq_types::SemanticType::Int),
            ),
        );
        let orders = Query::new("Orders.byUser", "WHERE user_id = ${ P(userId) }");
        let service = service(
            vec![users, orders],
            MemoryExecutor::new().with_rows("Users.all", vec![row! { "id" => "u-1" }]),
        );

        let err = service.select("Users.all", &QueryParameter::new()).unwrap_err();
        assert!(matches!(
            &err,
            Error::Conversion { query, parameter, .. }
                if query == "Orders.byUser" && parameter == "userId"
        ));
        assert!(err.to_string().contains("'Orders.byUser'"));
    }

    #[test]
    fn test_reload_clears_predicates() {
        let users = Query::new("Users.all", "x").with_fetch_query(
            FetchQuery::single("Profiles.get", "profile").with_predicate("active"),
        );
        let profiles = Query::new("Profiles.get", "y");
        let service = service(
            vec![users.clone(), profiles.clone()],
            MemoryExecutor::new()
                .with_rows("Users.all", vec![row! { "id" => 1, "active" => true }])
                .with_rows("Profiles.get", vec![row! { "id" => 9 }]),
        );

        service.select("Users.all", &QueryParameter::new()).unwrap();
        assert_eq!(service.predicates.compiled.len(), 1);

        let mut mapping = QueryMapping::new("reloaded");
        mapping.queries = vec![users, profiles];
        service.registry().install(vec![mapping]).unwrap();
        assert!(service.predicates.compiled.is_empty());
    }

    #[test]
    fn test_dropped_service_stops_listening() {
        let registry = Arc::new(MappingRegistry::new());
        let service = QueryService::new(registry.clone(), Arc::new(MemoryExecutor::new()));
        let cache = service.template_cache().clone();
        assert_eq!(registry.listener_count(), 2);

        drop(service);
        assert_eq!(Arc::strong_count(&cache), 1);
        assert_eq!(registry.listener_count(), 0);

        registry.install(vec![QueryMapping::new("later")]).unwrap();
        assert_eq!(cache.stats().invalidations(), 0);
    }

    #[test]
    fn test_typed_results() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct Item {
            id: i64,
        }

        let service = service(
            vec![Query::new("Items.all", "x")],
            MemoryExecutor::new().with_rows("Items.all", numbers(3)),
        );
        let items: Vec<Item> = service.select_as("Items.all", &QueryParameter::new()).unwrap();
        assert_eq!(items, vec![Item { id: 0 }, Item { id: 1 }, Item { id: 2 }]);

        #[derive(Debug, Deserialize)]
        #[allow(dead_code)]
        struct Named {
            name: String,
        }
        let err = service
            .get_as::<Named>("Items.all", &QueryParameter::new())
            .unwrap_err();
        assert!(matches!(err, Error::Decode { .. }));
    }
}
