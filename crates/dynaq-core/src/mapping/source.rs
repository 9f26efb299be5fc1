//! Mapping sources: where query mappings are read from.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::QueryMapping;
use crate::error::{Error, Result};

/// A source of one query mapping.
pub trait MappingSource: Send + Sync {
    /// Identifier used in diagnostics (file path, resource name).
    fn identifier(&self) -> String;

    /// Read and parse the mapping.
    fn load(&self) -> Result<QueryMapping>;
}

enum JsonContent {
    Text(String),
    File(PathBuf),
}

/// A mapping serialised as JSON, held in memory or read from a file.
pub struct JsonMappingSource {
    identifier: String,
    content: JsonContent,
}

impl JsonMappingSource {
    /// Mapping from JSON text.
    pub fn from_text(identifier: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            content: JsonContent::Text(text.into()),
        }
    }

    /// Mapping read from a JSON file when loaded.
    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            identifier: path.display().to_string(),
            content: JsonContent::File(path),
        }
    }

    fn error(&self, message: impl ToString) -> Error {
        Error::MappingSource {
            source_id: self.identifier.clone(),
            message: message.to_string(),
        }
    }
}

impl MappingSource for JsonMappingSource {
    fn identifier(&self) -> String {
        self.identifier.clone()
    }

    fn load(&self) -> Result<QueryMapping> {
        let text = match &self.content {
            JsonContent::Text(text) => text.clone(),
            JsonContent::File(path) => fs::read_to_string(path).map_err(|e| self.error(e))?,
        };
        let mut mapping: QueryMapping = serde_json::from_str(&text).map_err(|e| self.error(e))?;
        mapping.source = self.identifier.clone();
        debug!(
            source = %self.identifier,
            queries = mapping.queries.len(),
            "loaded mapping"
        );
        Ok(mapping)
    }
}

/// Discovers `*.json` mapping files below a directory.
#[derive(Debug, Clone)]
pub struct DirectoryMappingSource {
    root: PathBuf,
}

impl DirectoryMappingSource {
    /// Create a source rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// All mapping files below the root, sorted by path.
    pub fn discover(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let entries = fs::read_dir(&dir).map_err(|e| Error::MappingSource {
                source_id: dir.display().to_string(),
                message: e.to_string(),
            })?;
            for entry in entries {
                let path = entry
                    .map_err(|e| Error::MappingSource {
                        source_id: dir.display().to_string(),
                        message: e.to_string(),
                    })?
                    .path();
                if path.is_dir() {
                    pending.push(path);
                } else if path.extension().is_some_and(|ext| ext == "json") {
                    files.push(path);
                }
            }
        }

        files.sort();
        Ok(files)
    }

    /// One [`JsonMappingSource`] per discovered file.
    pub fn sources(&self) -> Result<Vec<Box<dyn MappingSource>>> {
        Ok(self
            .discover()?
            .into_iter()
            .map(|path| Box::new(JsonMappingSource::from_file(path)) as Box<dyn MappingSource>)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const USERS: &str = r#"{
        "queries": [{"name": "Users.get", "result": "map", "script": "SELECT 1"}]
    }"#;

    #[test]
    fn test_json_text_source() {
        let source = JsonMappingSource::from_text("inline", USERS);
        let mapping = source.load().unwrap();
        assert_eq!(mapping.source, "inline");
        assert_eq!(mapping.queries[0].name, "Users.get");
    }

    #[test]
    fn test_invalid_json_names_source() {
        let err = JsonMappingSource::from_text("broken", "{").load().unwrap_err();
        match err {
            Error::MappingSource { source_id, .. } => assert_eq!(source_id, "broken"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_directory_discovery_sorted() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("b.json"), USERS).unwrap();
        fs::write(dir.path().join("a.json"), USERS).unwrap();
        fs::write(dir.path().join("nested").join("c.json"), USERS).unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let source = DirectoryMappingSource::new(dir.path());
        let files = source.discover().unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.json", "b.json", "nested/c.json"]);
        assert_eq!(source.sources().unwrap().len(), 3);
    }
}
