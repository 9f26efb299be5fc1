//! Subcommand handlers.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use clap::ValueEnum;
use dynaq_core::{
    CursorPagingExecutor, DirectoryMappingSource, EngineConfig, MapConfigSource, MappingRegistry,
    MemoryCursorBackend, MemoryExecutor, QueryExecutor, QueryParameter, QueryService,
};
use dynaq_types::{Row, Value};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::formatter::Formatter;

/// Errors reported by the CLI.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Engine(#[from] dynaq_core::Error),

    #[error("cannot read '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("invalid JSON in {what}: {source}")]
    Json {
        what: String,
        source: serde_json::Error,
    },
}

/// Execution mode of the `run` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    Get,
    Select,
    Page,
    Forward,
}

/// Invocation parameters shared by `render` and `run`.
#[derive(Debug, Clone, Default)]
pub struct Invocation {
    pub criteria: Option<String>,
    pub context: Option<String>,
    pub config: Option<String>,
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

/// Rows served for one query, optionally filtered by a key field.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Fixture {
    Rows(Vec<Row>),
    Keyed { key: String, rows: Vec<Row> },
}

/// Load every mapping under `dir` into a fresh registry.
fn load_registry(dir: &Path) -> Result<Arc<MappingRegistry>, CliError> {
    let sources = DirectoryMappingSource::new(dir).sources()?;
    let registry = Arc::new(MappingRegistry::new());
    let generation = registry.load(&sources)?;
    debug!(dir = %dir.display(), sources = sources.len(), generation, "mappings loaded");
    Ok(registry)
}

fn read_file(path: &Path) -> Result<String, CliError> {
    std::fs::read_to_string(path).map_err(|source| CliError::Io {
        path: path.display().to_string(),
        source,
    })
}

fn parse_json<T: serde::de::DeserializeOwned>(what: &str, text: &str) -> Result<T, CliError> {
    serde_json::from_str(text).map_err(|source| CliError::Json {
        what: what.to_string(),
        source,
    })
}

fn parse_map(what: &str, text: Option<&str>) -> Result<BTreeMap<String, Value>, CliError> {
    match text {
        Some(text) => parse_json(what, text),
        None => Ok(BTreeMap::new()),
    }
}

impl Invocation {
    fn parameter(&self) -> Result<QueryParameter, CliError> {
        Ok(QueryParameter {
            criteria: parse_map("--criteria", self.criteria.as_deref())?,
            context: parse_map("--context", self.context.as_deref())?,
            limit: self.limit,
            offset: self.offset,
        })
    }

    fn service(
        &self,
        registry: Arc<MappingRegistry>,
        executor: Arc<dyn QueryExecutor>,
        engine: EngineConfig,
    ) -> Result<QueryService, CliError> {
        let mut service = QueryService::new(registry, executor).with_config(engine);
        if let Some(path) = &self.config {
            let source = MapConfigSource::from_json(&read_file(Path::new(path))?)?;
            service = service.with_config_source(Arc::new(source));
        }
        Ok(service)
    }
}

/// Check that the mappings under `dir` load cleanly.
pub fn validate(dir: &Path, formatter: &dyn Formatter) -> Result<String, CliError> {
    let registry = load_registry(dir)?;
    let count = registry.snapshot().len();
    info!(dir = %dir.display(), queries = count, "mappings valid");
    Ok(formatter.format_message(&format!("{} query(ies) valid", count)))
}

/// List the queries defined under `dir`.
pub fn list(dir: &Path, formatter: &dyn Formatter) -> Result<String, CliError> {
    let registry = load_registry(dir)?;
    Ok(formatter.format_queries(&registry.snapshot()))
}

/// Render one query into its backend script and bound values.
pub fn render(
    dir: &Path,
    query: &str,
    invocation: &Invocation,
    formatter: &dyn Formatter,
) -> Result<String, CliError> {
    let registry = load_registry(dir)?;
    let service = invocation.service(
        registry,
        Arc::new(MemoryExecutor::new()),
        EngineConfig::default(),
    )?;
    let querier = service.querier(query, &invocation.parameter()?)?;
    Ok(formatter.format_querier(&querier))
}

/// Options of the `run` command beyond the invocation itself.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub mode: Mode,
    pub cursor: bool,
    pub max_select_size: Option<usize>,
    pub metrics: bool,
}

/// Run one query against the rows of a fixtures file.
pub fn run(
    dir: &Path,
    query: &str,
    fixtures: &Path,
    invocation: &Invocation,
    options: &RunOptions,
    formatter: &dyn Formatter,
) -> Result<String, CliError> {
    let registry = load_registry(dir)?;
    let executor = fixture_executor(fixtures)?;

    let mut engine = EngineConfig::default();
    if let Some(max) = options.max_select_size {
        engine = engine.with_max_select_size(max);
    }
    let executor: Arc<dyn QueryExecutor> = if options.cursor {
        Arc::new(
            CursorPagingExecutor::new(MemoryCursorBackend::new(executor))
                .with_max_iterations(engine.max_cursor_iterations),
        )
    } else {
        Arc::new(executor)
    };

    let service = invocation.service(registry, executor, engine)?;
    let param = invocation.parameter()?;
    let mut output = match options.mode {
        Mode::Get => {
            let rows: Vec<Row> = service.get(query, &param)?.into_iter().collect();
            formatter.format_rows(&rows)
        }
        Mode::Select => formatter.format_rows(&service.select(query, &param)?),
        Mode::Page => formatter.format_paging(&service.page(query, &param)?),
        Mode::Forward => formatter.format_forwarding(&service.forward(query, &param)?),
    };

    if options.metrics {
        output.push_str("\n\n");
        output.push_str(&formatter.format_metrics(&service.metrics().snapshot()));
    }
    Ok(output)
}

/// Build an in-memory executor from a JSON object of query name to rows.
///
/// A fixture is either an array of rows or `{"key": field, "rows": [...]}`,
/// which serves only the rows whose `field` is among the bound parameters.
fn fixture_executor(path: &Path) -> Result<MemoryExecutor, CliError> {
    let fixtures: BTreeMap<String, Fixture> =
        parse_json(&path.display().to_string(), &read_file(path)?)?;

    let executor = fixtures
        .into_iter()
        .fold(MemoryExecutor::new(), |executor, (query, fixture)| match fixture {
            Fixture::Rows(rows) => executor.with_rows(query, rows),
            Fixture::Keyed { key, rows } => executor.with_keyed_rows(query, key, rows),
        });
    Ok(executor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formatter::JsonFormatter;
    use pretty_assertions::assert_eq;
    use std::fs;

    const MAPPING: &str = r#"{
        "queries": [
            {
                "name": "Users.byIds",
                "result": "map",
                "parameter_types": {"ids": "Int"},
                "script": "SELECT * FROM users WHERE id IN (${ P(ids) })"
            }
        ]
    }"#;

    const FIXTURES: &str = r#"{
        "Users.byIds": [
            {"id": 1, "name": "Ada"},
            {"id": 2, "name": "Alan"},
            {"id": 3, "name": "Grace"}
        ]
    }"#;

    fn workspace() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("mappings")).unwrap();
        fs::write(dir.path().join("mappings/users.json"), MAPPING).unwrap();
        fs::write(dir.path().join("fixtures.json"), FIXTURES).unwrap();
        dir
    }

    fn json(output: &str) -> serde_json::Value {
        serde_json::from_str(output).unwrap()
    }

    #[test]
    fn test_render_expands_list() {
        let dir = workspace();
        let invocation = Invocation {
            criteria: Some(r#"{"ids": ["4", "8"]}"#.to_string()),
            ..Default::default()
        };

        let output = render(
            &dir.path().join("mappings"),
            "Users.byIds",
            &invocation,
            &JsonFormatter,
        )
        .unwrap();
        assert_eq!(
            json(&output),
            serde_json::json!({
                "query": "Users.byIds",
                "script": "SELECT * FROM users WHERE id IN (?,?)",
                "parameters": [4, 8],
            })
        );
    }

    #[test]
    fn test_run_page_over_cursor_backend() {
        let dir = workspace();
        let invocation = Invocation {
            criteria: Some(r#"{"ids": [1, 2, 3]}"#.to_string()),
            offset: Some(1),
            limit: Some(1),
            ..Default::default()
        };
        let options = RunOptions {
            mode: Mode::Page,
            cursor: true,
            max_select_size: None,
            metrics: false,
        };

        let output = run(
            &dir.path().join("mappings"),
            "Users.byIds",
            &dir.path().join("fixtures.json"),
            &invocation,
            &options,
            &JsonFormatter,
        )
        .unwrap();
        let page = json(&output);
        assert_eq!(page["total"], 3);
        assert_eq!(page["results"][0]["name"], "Alan");
    }

    #[test]
    fn test_run_select_size_exceeded() {
        let dir = workspace();
        let options = RunOptions {
            mode: Mode::Select,
            cursor: false,
            max_select_size: Some(2),
            metrics: false,
        };

        let err = run(
            &dir.path().join("mappings"),
            "Users.byIds",
            &dir.path().join("fixtures.json"),
            &Invocation::default(),
            &options,
            &JsonFormatter,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            CliError::Engine(dynaq_core::Error::ResultSizeExceeded { max: 2, .. })
        ));
    }

    #[test]
    fn test_invalid_criteria() {
        let invocation = Invocation {
            criteria: Some("[1, 2".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            invocation.parameter(),
            Err(CliError::Json { what, .. }) if what == "--criteria"
        ));
    }
}
