//! Query execution: backend executors, paging strategies and the service that
//! orchestrates get/select/page/forward with fetch expansion and hints.

mod cursor;
mod memory;
mod service;

pub use cursor::{CursorBackend, CursorPage, CursorPagingExecutor, IterationLimitExceeded};
pub use memory::{MemoryCursorBackend, MemoryExecutor, RowSource};
pub use service::QueryService;

use std::fmt;

use dynaq_types::Row;
use serde::{Deserialize, Serialize};

use crate::error::BackendError;
use crate::querier::Querier;

/// An execution mode, reported in errors and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Get,
    Select,
    Page,
    Forward,
    Total,
}

impl Operation {
    /// Every operation, in declaration order.
    pub const ALL: [Operation; 5] = [
        Operation::Get,
        Operation::Select,
        Operation::Page,
        Operation::Forward,
        Operation::Total,
    ];

    /// Lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Get => "get",
            Operation::Select => "select",
            Operation::Page => "page",
            Operation::Forward => "forward",
            Operation::Total => "total",
        }
    }

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Backend that runs rendered queriers and returns raw rows.
pub trait QueryExecutor: Send + Sync {
    /// First row of the querier's result.
    fn get(&self, querier: &Querier) -> Result<Option<Row>, BackendError> {
        Ok(self.page(querier, 0, 1)?.into_iter().next())
    }

    /// At most `max_rows` rows.
    fn select(&self, querier: &Querier, max_rows: usize) -> Result<Vec<Row>, BackendError>;

    /// The rows in `[offset, offset + limit)`.
    fn page(&self, querier: &Querier, offset: usize, limit: usize)
        -> Result<Vec<Row>, BackendError>;

    /// Total row count of the querier's result.
    fn total(&self, querier: &Querier) -> Result<usize, BackendError>;
}

/// One page of results with its total count.
///
/// `total` is derived from a short page without a count query, so under
/// concurrent writes it is approximate rather than snapshot-consistent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paging<T = Row> {
    pub offset: usize,
    pub limit: usize,
    pub total: usize,
    pub results: Vec<T>,
}

impl<T> Paging<T> {
    /// Convert every result, keeping the paging metadata.
    pub fn try_map_results<U, E>(
        self,
        f: impl FnMut(T) -> Result<U, E>,
    ) -> Result<Paging<U>, E> {
        Ok(Paging {
            offset: self.offset,
            limit: self.limit,
            total: self.total,
            results: self.results.into_iter().map(f).collect::<Result<_, _>>()?,
        })
    }
}

/// A forward-only window: results plus whether more rows follow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forwarding<T = Row> {
    pub has_next: bool,
    pub results: Vec<T>,
}

impl<T> Forwarding<T> {
    /// Convert every result, keeping `has_next`.
    pub fn try_map_results<U, E>(
        self,
        f: impl FnMut(T) -> Result<U, E>,
    ) -> Result<Forwarding<U>, E> {
        Ok(Forwarding {
            has_next: self.has_next,
            results: self.results.into_iter().map(f).collect::<Result<_, _>>()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dynaq_types::{row, Value};

    #[test]
    fn test_operation_names() {
        let names: Vec<String> = Operation::ALL.iter().map(|op| op.to_string()).collect();
        assert_eq!(names, vec!["get", "select", "page", "forward", "total"]);
        assert_eq!(Operation::Total.index(), 4);
    }

    #[test]
    fn test_paging_map_results() {
        let paging = Paging {
            offset: 2,
            limit: 2,
            total: 9,
            results: vec![row! { "id" => 3 }, row! { "id" => 4 }],
        };
        let ids: Paging<i64> = paging
            .try_map_results(|r| r["id"].as_i64().ok_or("no id"))
            .unwrap();
        assert_eq!(ids.results, vec![3, 4]);
        assert_eq!(ids.total, 9);

        let forwarding = Forwarding {
            has_next: true,
            results: vec![row! { "id" => Value::Null }],
        };
        let mapped: Result<Forwarding<i64>, &str> =
            forwarding.try_map_results(|r| r["id"].as_i64().ok_or("no id"));
        assert_eq!(mapped, Err("no id"));
    }
}
