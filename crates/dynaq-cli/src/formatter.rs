//! Output formatters for command results.

use std::collections::BTreeSet;

use clap::ValueEnum;
use comfy_table::{Cell, Table};
use dynaq_core::{Forwarding, MappingSnapshot, MetricsSnapshot, Paging, Querier};
use dynaq_types::{Row, Value};
use serde_json::json;

/// Output format for results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// ASCII table format
    Table,
    /// JSON format
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Table => write!(f, "table"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

/// Trait for formatting output.
pub trait Formatter: Send + Sync {
    /// Format plain rows.
    fn format_rows(&self, rows: &[Row]) -> String;

    /// Format a page with its total.
    fn format_paging(&self, paging: &Paging) -> String;

    /// Format a forward window.
    fn format_forwarding(&self, forwarding: &Forwarding) -> String;

    /// Format a rendered querier.
    fn format_querier(&self, querier: &Querier) -> String;

    /// Format the queries of a registry snapshot.
    fn format_queries(&self, snapshot: &MappingSnapshot) -> String;

    /// Format execution metrics.
    fn format_metrics(&self, metrics: &MetricsSnapshot) -> String;

    /// Format a simple message.
    fn format_message(&self, message: &str) -> String;
}

/// Create a formatter for the given output format.
pub fn create_formatter(format: OutputFormat) -> Box<dyn Formatter> {
    match format {
        OutputFormat::Table => Box::new(TableFormatter),
        OutputFormat::Json => Box::new(JsonFormatter),
    }
}

/// Table formatter using comfy-table.
pub struct TableFormatter;

impl Formatter for TableFormatter {
    fn format_rows(&self, rows: &[Row]) -> String {
        if rows.is_empty() {
            return "No results".to_string();
        }
        format!("{}\n{} row(s)", rows_table(rows), rows.len())
    }

    fn format_paging(&self, paging: &Paging) -> String {
        format!(
            "{}\noffset {}, limit {}, total {}",
            self.format_rows(&paging.results),
            paging.offset,
            paging.limit,
            paging.total
        )
    }

    fn format_forwarding(&self, forwarding: &Forwarding) -> String {
        format!(
            "{}\nhas next: {}",
            self.format_rows(&forwarding.results),
            forwarding.has_next
        )
    }

    fn format_querier(&self, querier: &Querier) -> String {
        let mut table = Table::new();
        table.set_header(vec!["#", "Kind", "Value"]);
        for (i, value) in querier.parameters().iter().enumerate() {
            table.add_row(vec![
                Cell::new(i + 1),
                Cell::new(value.kind()),
                Cell::new(format_value(value)),
            ]);
        }
        format!("{}\n\n{}", querier.script(), table)
    }

    fn format_queries(&self, snapshot: &MappingSnapshot) -> String {
        let mut table = Table::new();
        table.set_header(vec!["Query", "Fetch", "Hints", "Cached", "Source"]);

        for name in snapshot.names() {
            let Some(query) = snapshot.get(name) else {
                continue;
            };
            table.add_row(vec![
                Cell::new(name),
                Cell::new(query.fetch_queries.len()),
                Cell::new(query.hints.len()),
                Cell::new(query.cache),
                Cell::new(snapshot.origin(name).unwrap_or("")),
            ]);
        }

        format!("{}\n{} query(ies)", table, snapshot.len())
    }

    fn format_metrics(&self, metrics: &MetricsSnapshot) -> String {
        let mut table = Table::new();
        table.set_header(vec!["Operation", "Calls", "Failures"]);
        for (operation, counts) in &metrics.operations {
            if counts.calls > 0 {
                table.add_row(vec![
                    Cell::new(operation),
                    Cell::new(counts.calls),
                    Cell::new(counts.failures),
                ]);
            }
        }
        format!(
            "{}\nrows: {}, fetch expansions: {}, mean latency: {}us",
            table, metrics.rows, metrics.fetch_expansions, metrics.latency.mean_us
        )
    }

    fn format_message(&self, message: &str) -> String {
        message.to_string()
    }
}

/// JSON formatter.
pub struct JsonFormatter;

impl JsonFormatter {
    fn pretty(value: &serde_json::Value) -> String {
        serde_json::to_string_pretty(value).unwrap_or_else(|_| "null".to_string())
    }
}

impl Formatter for JsonFormatter {
    fn format_rows(&self, rows: &[Row]) -> String {
        Self::pretty(&rows_to_json(rows))
    }

    fn format_paging(&self, paging: &Paging) -> String {
        Self::pretty(&json!({
            "offset": paging.offset,
            "limit": paging.limit,
            "total": paging.total,
            "results": rows_to_json(&paging.results),
        }))
    }

    fn format_forwarding(&self, forwarding: &Forwarding) -> String {
        Self::pretty(&json!({
            "has_next": forwarding.has_next,
            "results": rows_to_json(&forwarding.results),
        }))
    }

    fn format_querier(&self, querier: &Querier) -> String {
        let parameters: Vec<serde_json::Value> =
            querier.parameters().iter().map(Value::to_json).collect();
        Self::pretty(&json!({
            "query": querier.name(),
            "script": querier.script(),
            "parameters": parameters,
        }))
    }

    fn format_queries(&self, snapshot: &MappingSnapshot) -> String {
        let queries: Vec<serde_json::Value> = snapshot
            .names()
            .into_iter()
            .filter_map(|name| {
                let query = snapshot.get(name)?;
                Some(json!({
                    "name": name,
                    "fetch_queries": query.fetch_queries.len(),
                    "hints": query.hints.len(),
                    "cache": query.cache,
                    "source": snapshot.origin(name),
                }))
            })
            .collect();
        Self::pretty(&serde_json::Value::Array(queries))
    }

    fn format_metrics(&self, metrics: &MetricsSnapshot) -> String {
        serde_json::to_string_pretty(metrics).unwrap_or_else(|_| "{}".to_string())
    }

    fn format_message(&self, message: &str) -> String {
        json!({ "message": message }).to_string()
    }
}

/// Build a table whose columns are the union of all row fields.
fn rows_table(rows: &[Row]) -> Table {
    let columns: BTreeSet<&str> = rows
        .iter()
        .flat_map(|row| row.keys().map(String::as_str))
        .collect();

    let mut table = Table::new();
    table.set_header(columns.iter().map(Cell::new).collect::<Vec<_>>());
    for row in rows {
        table.add_row(
            columns
                .iter()
                .map(|column| Cell::new(row.get(*column).map(format_value).unwrap_or_default()))
                .collect::<Vec<_>>(),
        );
    }
    table
}

fn rows_to_json(rows: &[Row]) -> serde_json::Value {
    serde_json::Value::Array(
        rows.iter()
            .map(|row| Value::Map(row.clone()).to_json())
            .collect(),
    )
}

/// Format a Value as a display string.
fn format_value(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::String(s) => s.clone(),
        Value::List(_) | Value::Map(_) => value.to_json().to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dynaq_types::row;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_table_columns_are_union_of_fields() {
        let rows = vec![row! { "id" => 1 }, row! { "id" => 2, "name" => "Ada" }];
        let output = TableFormatter.format_rows(&rows);

        assert!(output.contains("name"));
        assert!(output.contains("Ada"));
        assert!(output.ends_with("2 row(s)"));
        assert_eq!(TableFormatter.format_rows(&[]), "No results");
    }

    #[test]
    fn test_json_forwarding() {
        let forwarding = Forwarding {
            has_next: true,
            results: vec![row! { "id" => 1 }],
        };
        let output: serde_json::Value =
            serde_json::from_str(&JsonFormatter.format_forwarding(&forwarding)).unwrap();
        assert_eq!(output, json!({ "has_next": true, "results": [{ "id": 1 }] }));
    }

    #[test]
    fn test_format_value() {
        assert_eq!(format_value(&Value::Null), "NULL");
        assert_eq!(format_value(&Value::from(vec![1, 2])), "[1,2]");
        assert_eq!(format_value(&Value::from("x")), "x");
    }
}
