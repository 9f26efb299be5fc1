//! Fetch query definitions: sub-queries whose results are injected into
//! each parent row.

use dynaq_types::{SemanticType, Value};
use serde::{Deserialize, Serialize};

/// Where a fetch query parameter takes its value from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterSource {
    /// A criteria entry of the parent invocation.
    #[serde(alias = "parameter")]
    Criteria,
    /// A field of the parent result row (dotted paths allowed).
    Result,
    /// A context entry of the parent invocation.
    Context,
    /// The literal `value` of the binding.
    Constant,
}

/// A parameter binding of a [`FetchQuery`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchQueryParameter {
    /// Criteria name in the fetched query.
    pub name: String,
    /// Value source.
    #[serde(default)]
    pub source: Option<ParameterSource>,
    /// Name in the source; defaults to `name`.
    #[serde(default)]
    pub source_name: Option<String>,
    /// Literal value for [`ParameterSource::Constant`].
    #[serde(default)]
    pub value: Option<Value>,
    /// Optional conversion applied to the resolved value.
    #[serde(default, rename = "type")]
    pub semantic_type: Option<SemanticType>,
}

impl FetchQueryParameter {
    fn with_source(name: impl Into<String>, source: ParameterSource) -> Self {
        Self {
            name: name.into(),
            source: Some(source),
            source_name: None,
            value: None,
            semantic_type: None,
        }
    }

    /// Bind from a field of the parent row.
    pub fn from_result(name: impl Into<String>, field: impl Into<String>) -> Self {
        Self::with_source(name, ParameterSource::Result).with_source_name(field)
    }

    /// Bind from a criteria entry of the parent invocation.
    pub fn from_criteria(name: impl Into<String>, criteria: impl Into<String>) -> Self {
        Self::with_source(name, ParameterSource::Criteria).with_source_name(criteria)
    }

    /// Bind from a context entry of the parent invocation.
    pub fn from_context(name: impl Into<String>, key: impl Into<String>) -> Self {
        Self::with_source(name, ParameterSource::Context).with_source_name(key)
    }

    /// Bind a literal value.
    pub fn constant(name: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut param = Self::with_source(name, ParameterSource::Constant);
        param.value = Some(value.into());
        param
    }

    /// Set the source name.
    pub fn with_source_name(mut self, source_name: impl Into<String>) -> Self {
        self.source_name = Some(source_name.into());
        self
    }

    /// Convert the resolved value to `ty`.
    pub fn with_type(mut self, ty: SemanticType) -> Self {
        self.semantic_type = Some(ty);
        self
    }

    /// Name to read from the source.
    pub fn source_key(&self) -> &str {
        self.source_name.as_deref().unwrap_or(&self.name)
    }
}

/// A sub-query expanded into a property of each parent row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchQuery {
    /// Versioned name of the fetched query.
    #[serde(default)]
    pub reference: String,
    /// Row property receiving the fetched result.
    #[serde(default, rename = "property")]
    pub inject_property_name: String,
    /// List of rows (`true`) or a single row (`false`).
    #[serde(default)]
    pub multi_records: bool,
    /// Maximum rows fetched; the engine default applies when absent.
    #[serde(default)]
    pub max_size: Option<usize>,
    /// Parameter bindings.
    #[serde(default)]
    pub parameters: Vec<FetchQueryParameter>,
    /// Expression over the parent row; falsy rows are not expanded.
    #[serde(default)]
    pub predicate: Option<String>,
}

impl FetchQuery {
    /// Fetch a single row of `reference` into `property`.
    pub fn single(reference: impl Into<String>, property: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            inject_property_name: property.into(),
            multi_records: false,
            max_size: None,
            parameters: Vec::new(),
            predicate: None,
        }
    }

    /// Fetch a list of rows of `reference` into `property`.
    pub fn multi(reference: impl Into<String>, property: impl Into<String>) -> Self {
        Self {
            multi_records: true,
            ..Self::single(reference, property)
        }
    }

    /// Limit the number of fetched rows.
    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = Some(max_size);
        self
    }

    /// Add a parameter binding.
    pub fn with_parameter(mut self, parameter: FetchQueryParameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    /// Only expand rows for which `predicate` is truthy.
    pub fn with_predicate(mut self, predicate: impl Into<String>) -> Self {
        self.predicate = Some(predicate.into());
        self
    }

    /// Effective row limit: 1 for single fetches, else `max_size` or `default`.
    pub fn effective_max_size(&self, default: usize) -> usize {
        if self.multi_records {
            self.max_size.unwrap_or(default)
        } else {
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_max_size() {
        assert_eq!(FetchQuery::single("A", "a").with_max_size(9).effective_max_size(100), 1);
        assert_eq!(FetchQuery::multi("A", "a").effective_max_size(100), 100);
        assert_eq!(FetchQuery::multi("A", "a").with_max_size(5).effective_max_size(100), 5);
    }

    #[test]
    fn test_parameter_json() {
        let fetch: FetchQuery = serde_json::from_str(
            r#"{
                "reference": "Orders.byUser",
                "property": "orders",
                "multi_records": true,
                "parameters": [
                    {"name": "userId", "source": "result", "source_name": "id", "type": "Long"},
                    {"name": "status", "source": "parameter"},
                    {"name": "kind", "source": "constant", "value": "retail"}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(fetch.inject_property_name, "orders");
        assert_eq!(fetch.parameters[0].source_key(), "id");
        assert_eq!(fetch.parameters[0].semantic_type, Some(SemanticType::Int));
        assert_eq!(fetch.parameters[1].source, Some(ParameterSource::Criteria));
        assert_eq!(fetch.parameters[1].source_key(), "status");
        assert_eq!(fetch.parameters[2].value, Some(Value::from("retail")));
    }
}
