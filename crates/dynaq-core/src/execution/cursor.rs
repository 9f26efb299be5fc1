//! Offset paging emulated over continuation-token backends.

use dynaq_types::Row;
use thiserror::Error;
use tracing::debug;

use super::QueryExecutor;
use crate::config::DEFAULT_MAX_CURSOR_ITERATIONS;
use crate::error::BackendError;
use crate::querier::Querier;

/// One page from a cursor backend.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CursorPage {
    pub rows: Vec<Row>,
    /// Continuation token; `None` or empty at end of data.
    pub next: Option<String>,
}

/// A store without native OFFSET that pages by continuation token.
pub trait CursorBackend: Send + Sync {
    /// Fetch up to `page_size` rows starting at `token` (`None` = first page).
    fn fetch(
        &self,
        querier: &Querier,
        token: Option<&str>,
        page_size: usize,
    ) -> Result<CursorPage, BackendError>;

    /// Total row count.
    fn count(&self, querier: &Querier) -> Result<usize, BackendError>;
}

/// The cursor loop hit its iteration bound.
#[derive(Debug, Error)]
#[error("cursor paging did not reach the end of the window within {0} page fetches")]
pub struct IterationLimitExceeded(pub usize);

/// [`QueryExecutor`] that emulates `page(offset, limit)` by walking pages of
/// `limit` rows, skipping to `offset` and collecting from there.
pub struct CursorPagingExecutor<B> {
    backend: B,
    max_iterations: usize,
}

impl<B: CursorBackend> CursorPagingExecutor<B> {
    /// Wrap `backend` with the default iteration bound.
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            max_iterations: DEFAULT_MAX_CURSOR_ITERATIONS,
        }
    }

    /// Set the upper bound on page fetches per call.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// The wrapped backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }
}

impl<B: CursorBackend> QueryExecutor for CursorPagingExecutor<B> {
    fn select(&self, querier: &Querier, max_rows: usize) -> Result<Vec<Row>, BackendError> {
        self.page(querier, 0, max_rows)
    }

    fn page(
        &self,
        querier: &Querier,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Row>, BackendError> {
        let mut results = Vec::new();
        if limit == 0 {
            return Ok(results);
        }

        let mut token: Option<String> = None;
        let mut accumulated = 0usize;
        let mut iterations = 0usize;

        loop {
            if iterations == self.max_iterations {
                return Err(IterationLimitExceeded(self.max_iterations).into());
            }
            iterations += 1;

            let page = self.backend.fetch(querier, token.as_deref(), limit)?;
            let available = page.rows.len();

            if accumulated + available > offset {
                // Window contains the cursor position: skip up to it, then collect.
                let skip = offset.saturating_sub(accumulated);
                let wanted = limit - results.len();
                results.extend(page.rows.into_iter().skip(skip).take(wanted));
            }
            accumulated += available;

            if results.len() == limit {
                break;
            }
            match page.next {
                Some(next) if !next.is_empty() => token = Some(next),
                _ => break,
            }
        }

        debug!(
            query = %querier.name(),
            offset,
            limit,
            pages = iterations,
            rows = results.len(),
            "cursor page"
        );
        Ok(results)
    }

    fn total(&self, querier: &Querier) -> Result<usize, BackendError> {
        self.backend.count(querier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::{MemoryCursorBackend, MemoryExecutor};
    use crate::mapping::Query;
    use dynaq_types::row;
    use std::sync::Arc;

    fn querier() -> Querier {
        Querier::new(Arc::new(Query::new("Items.all", "x")), "x".to_string(), vec![])
    }

    fn executor(rows: usize) -> CursorPagingExecutor<MemoryCursorBackend> {
        let rows = (0..rows).map(|i| row! { "id" => i }).collect();
        CursorPagingExecutor::new(MemoryCursorBackend::new(
            MemoryExecutor::new().with_rows("Items.all", rows),
        ))
    }

    fn ids(rows: &[Row]) -> Vec<i64> {
        rows.iter().filter_map(|r| r["id"].as_i64()).collect()
    }

    #[test]
    fn test_page_across_windows() {
        let executor = executor(20);
        assert_eq!(ids(&executor.page(&querier(), 7, 5).unwrap()), vec![7, 8, 9, 10, 11]);
        assert_eq!(ids(&executor.page(&querier(), 0, 3).unwrap()), vec![0, 1, 2]);
        assert_eq!(ids(&executor.page(&querier(), 10, 5).unwrap()), vec![10, 11, 12, 13, 14]);
    }

    #[test]
    fn test_page_past_end_returns_fewer_rows() {
        let executor = executor(9);
        assert_eq!(ids(&executor.page(&querier(), 7, 5).unwrap()), vec![7, 8]);
        assert!(executor.page(&querier(), 30, 5).unwrap().is_empty());
        assert_eq!(executor.total(&querier()).unwrap(), 9);
    }

    #[test]
    fn test_iteration_bound() {
        let executor = executor(100).with_max_iterations(3);
        let err = executor.page(&querier(), 50, 5).unwrap_err();
        assert!(err.downcast_ref::<IterationLimitExceeded>().is_some());
    }

    #[test]
    fn test_empty_token_ends_loop() {
        struct EndlessEmpty;

        impl CursorBackend for EndlessEmpty {
            fn fetch(
                &self,
                _querier: &Querier,
                _token: Option<&str>,
                _page_size: usize,
            ) -> Result<CursorPage, BackendError> {
                Ok(CursorPage {
                    rows: vec![row! { "id" => 1 }],
                    next: Some(String::new()),
                })
            }

            fn count(&self, _querier: &Querier) -> Result<usize, BackendError> {
                Ok(1)
            }
        }

        let executor = CursorPagingExecutor::new(EndlessEmpty);
        assert!(executor.page(&querier(), 4, 2).unwrap().is_empty());
    }
}
