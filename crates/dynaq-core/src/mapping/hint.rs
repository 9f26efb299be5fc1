//! Query result hints.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One value of a hint parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HintParameter {
    pub name: String,
    pub value: String,
    #[serde(default, rename = "type")]
    pub type_name: Option<String>,
}

/// A result hint: selects a handler family by `key` and configures it.
///
/// Equality and hashing are structural; resolved handlers are cached by hint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryHint {
    pub key: String,
    /// Multi-valued parameters, in declaration order per name.
    #[serde(default)]
    pub parameters: BTreeMap<String, Vec<HintParameter>>,
    #[serde(default)]
    pub script: Option<String>,
}

impl QueryHint {
    /// Create a hint with no parameters.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            parameters: BTreeMap::new(),
            script: None,
        }
    }

    /// Append a parameter value.
    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        self.parameters
            .entry(name.clone())
            .or_default()
            .push(HintParameter {
                name,
                value: value.into(),
                type_name: None,
            });
        self
    }

    /// Set the embedded script.
    pub fn with_script(mut self, script: impl Into<String>) -> Self {
        self.script = Some(script.into());
        self
    }

    /// All values of a parameter, in order.
    pub fn values(&self, name: &str) -> Vec<&str> {
        self.parameters
            .get(name)
            .map(|values| values.iter().map(|p| p.value.as_str()).collect())
            .unwrap_or_default()
    }

    /// First value of a parameter.
    pub fn first(&self, name: &str) -> Option<&str> {
        self.parameters
            .get(name)
            .and_then(|values| values.first())
            .map(|p| p.value.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_structural_identity() {
        let a = QueryHint::new("result-field-convert")
            .with_parameter("field-name", "createdAt")
            .with_parameter("target-type", "Timestamp");
        let b = QueryHint::new("result-field-convert")
            .with_parameter("field-name", "createdAt")
            .with_parameter("target-type", "Timestamp");
        let c = b.clone().with_parameter("field-name", "updatedAt");

        let mut set = HashSet::new();
        set.insert(a.clone());
        assert!(set.contains(&b));
        assert!(!set.contains(&c));
        assert_eq!(c.values("field-name"), vec!["createdAt", "updatedAt"]);
        assert_eq!(a.first("target-type"), Some("Timestamp"));
        assert_eq!(a.first("missing"), None);
    }
}
