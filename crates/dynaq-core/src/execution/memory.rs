//! In-memory executors over per-query row sources.

use std::collections::HashMap;
use std::sync::Arc;

use dynaq_types::Row;

use super::cursor::{CursorBackend, CursorPage};
use super::QueryExecutor;
use crate::error::BackendError;
use crate::querier::Querier;

/// Produces the full result of a querier.
pub type RowSource = Arc<dyn Fn(&Querier) -> Result<Vec<Row>, BackendError> + Send + Sync>;

/// Native-offset executor answering from in-memory row sources keyed by
/// versioned query name.
#[derive(Clone, Default)]
pub struct MemoryExecutor {
    sources: HashMap<String, RowSource>,
}

impl MemoryExecutor {
    /// Create an executor with no sources.
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `rows` for every invocation of `query`.
    pub fn with_rows(self, query: impl Into<String>, rows: Vec<Row>) -> Self {
        let rows = Arc::new(rows);
        self.with_source(query, move |_: &Querier| Ok(rows.as_ref().clone()))
    }

    /// Serve the rows whose `key` field equals one of the querier's bound
    /// parameters.
    pub fn with_keyed_rows(
        self,
        query: impl Into<String>,
        key: impl Into<String>,
        rows: Vec<Row>,
    ) -> Self {
        let key = key.into();
        let rows = Arc::new(rows);
        self.with_source(query, move |querier: &Querier| {
            Ok(rows
                .iter()
                .filter(|row| {
                    row.get(&key)
                        .is_some_and(|value| querier.parameters().contains(value))
                })
                .cloned()
                .collect())
        })
    }

    /// Serve `query` from a function of the querier.
    pub fn with_source<F>(mut self, query: impl Into<String>, source: F) -> Self
    where
        F: Fn(&Querier) -> Result<Vec<Row>, BackendError> + Send + Sync + 'static,
    {
        self.sources.insert(query.into(), Arc::new(source));
        self
    }

    /// Full result of `querier`.
    pub fn rows(&self, querier: &Querier) -> Result<Vec<Row>, BackendError> {
        let name = querier.name();
        match self.sources.get(&name) {
            Some(source) => source(querier),
            None => Err(format!("no rows registered for query '{}'", name).into()),
        }
    }
}

impl QueryExecutor for MemoryExecutor {
    fn select(&self, querier: &Querier, max_rows: usize) -> Result<Vec<Row>, BackendError> {
        let mut rows = self.rows(querier)?;
        rows.truncate(max_rows);
        Ok(rows)
    }

    fn page(
        &self,
        querier: &Querier,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Row>, BackendError> {
        Ok(self
            .rows(querier)?
            .into_iter()
            .skip(offset)
            .take(limit)
            .collect())
    }

    fn total(&self, querier: &Querier) -> Result<usize, BackendError> {
        Ok(self.rows(querier)?.len())
    }
}

/// Cursor backend over a [`MemoryExecutor`]; tokens are row indices.
#[derive(Clone, Default)]
pub struct MemoryCursorBackend {
    rows: MemoryExecutor,
}

impl MemoryCursorBackend {
    /// Page through `rows`.
    pub fn new(rows: MemoryExecutor) -> Self {
        Self { rows }
    }
}

impl CursorBackend for MemoryCursorBackend {
    fn fetch(
        &self,
        querier: &Querier,
        token: Option<&str>,
        page_size: usize,
    ) -> Result<CursorPage, BackendError> {
        let start = match token {
            Some(token) => token
                .parse::<usize>()
                .map_err(|e| format!("invalid continuation token '{}': {}", token, e))?,
            None => 0,
        };
        let all = self.rows.rows(querier)?;
        let end = start.saturating_add(page_size).min(all.len());
        let rows = all.get(start..end).map(<[Row]>::to_vec).unwrap_or_default();
        let next = (end < all.len()).then(|| end.to_string());
        Ok(CursorPage { rows, next })
    }

    fn count(&self, querier: &Querier) -> Result<usize, BackendError> {
        Ok(self.rows.rows(querier)?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::Query;
    use dynaq_types::{row, Value};

    fn querier(name: &str, parameters: Vec<Value>) -> Querier {
        Querier::new(Arc::new(Query::new(name, "x")), "x".to_string(), parameters)
    }

    #[test]
    fn test_native_paging() {
        let rows = (0..10).map(|i| row! { "id" => i }).collect();
        let executor = MemoryExecutor::new().with_rows("Items.all", rows);
        let q = querier("Items.all", vec![]);

        assert_eq!(executor.page(&q, 8, 5).unwrap().len(), 2);
        assert_eq!(executor.select(&q, 3).unwrap().len(), 3);
        assert_eq!(executor.total(&q).unwrap(), 10);
        assert_eq!(executor.get(&q).unwrap(), Some(row! { "id" => 0 }));
    }

    #[test]
    fn test_keyed_rows() {
        let executor = MemoryExecutor::new().with_keyed_rows(
            "Orders.byUser",
            "user_id",
            vec![
                row! { "id" => 1, "user_id" => 1 },
                row! { "id" => 2, "user_id" => 2 },
                row! { "id" => 3, "user_id" => 1 },
            ],
        );
        let rows = executor
            .rows(&querier("Orders.byUser", vec![Value::Int(1)]))
            .unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_unknown_query() {
        let err = MemoryExecutor::new()
            .rows(&querier("Missing", vec![]))
            .unwrap_err();
        assert_eq!(err.to_string(), "no rows registered for query 'Missing'");
    }

    #[test]
    fn test_cursor_tokens() {
        let rows = (0..5).map(|i| row! { "id" => i }).collect();
        let backend = MemoryCursorBackend::new(MemoryExecutor::new().with_rows("Items.all", rows));
        let q = querier("Items.all", vec![]);

        let first = backend.fetch(&q, None, 3).unwrap();
        assert_eq!(first.rows.len(), 3);
        assert_eq!(first.next.as_deref(), Some("3"));

        let last = backend.fetch(&q, first.next.as_deref(), 3).unwrap();
        assert_eq!(last.rows.len(), 2);
        assert_eq!(last.next, None);

        assert!(backend.fetch(&q, Some("x"), 3).is_err());
    }
}
