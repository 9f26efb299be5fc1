//! Mapping validation: uniqueness, reference resolution, fetch cycles and
//! mandatory fields.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::mapping::{ParameterSource, Query, QueryMapping};

/// A single validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("duplicate query '{name}' in '{second_source}' (first defined in '{first_source}')")]
    DuplicateName {
        name: String,
        first_source: String,
        second_source: String,
    },

    #[error("query '{query}' fetches unknown query '{reference}'")]
    DanglingReference { query: String, reference: String },

    #[error("fetch reference cycle: {}", .path.join(" -> "))]
    Cycle { path: Vec<String> },

    #[error("query '{query}' injects more than one fetch into property '{property}'")]
    DuplicateInjectProperty { query: String, property: String },

    #[error("query '{query}' is missing {field}")]
    MissingField { query: String, field: &'static str },
}

/// All validation failures of one load.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ValidationErrors(Vec<ValidationError>);

impl ValidationErrors {
    /// Number of failures.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if there are no failures.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over failures.
    pub fn iter(&self) -> impl Iterator<Item = &ValidationError> {
        self.0.iter()
    }

    /// Consume into the failure list.
    pub fn into_inner(self) -> Vec<ValidationError> {
        self.0
    }

    fn push(&mut self, error: ValidationError) {
        self.0.push(error);
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error(s)", self.0.len())?;
        for error in &self.0 {
            write!(f, "\n  - {}", error)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

/// Validated queries keyed by versioned name.
#[derive(Debug, Default)]
pub struct ValidatedMappings {
    pub queries: HashMap<String, Arc<Query>>,
    /// Source identifier of each query.
    pub origins: HashMap<String, String>,
}

/// Validate a set of mappings as one registry.
pub fn validate(mappings: Vec<QueryMapping>) -> Result<ValidatedMappings, ValidationErrors> {
    let mut errors = ValidationErrors::default();
    let mut validated = ValidatedMappings::default();

    for mut mapping in mappings {
        mapping.merge_parameters();
        let source = mapping.source.clone();

        for query in mapping.queries {
            let name = query.versioned_name();
            check_fields(&query, &mut errors);

            if let Some(first) = validated.origins.get(&name) {
                errors.push(ValidationError::DuplicateName {
                    name,
                    first_source: first.clone(),
                    second_source: source.clone(),
                });
                continue;
            }
            validated.origins.insert(name.clone(), source.clone());
            validated.queries.insert(name, Arc::new(query));
        }
    }

    let mut names: Vec<&String> = validated.queries.keys().collect();
    names.sort();

    for name in &names {
        for fetch in &validated.queries[*name].fetch_queries {
            if !fetch.reference.is_empty() && !validated.queries.contains_key(&fetch.reference) {
                errors.push(ValidationError::DanglingReference {
                    query: (*name).clone(),
                    reference: fetch.reference.clone(),
                });
            }
        }
    }

    let mut detector = CycleDetector::new(&validated.queries);
    for name in &names {
        if let Some(path) = detector.check(name) {
            errors.push(ValidationError::Cycle { path });
        }
    }

    if errors.is_empty() {
        Ok(validated)
    } else {
        Err(errors)
    }
}

fn check_fields(query: &Query, errors: &mut ValidationErrors) {
    let name = query.versioned_name();
    let missing = |errors: &mut ValidationErrors, field: &'static str| {
        errors.push(ValidationError::MissingField {
            query: name.clone(),
            field,
        })
    };

    if query.name.trim().is_empty() {
        missing(errors, "a name");
    }
    if query.result_shape.is_none() {
        missing(errors, "a result shape");
    }
    if query.script.trim().is_empty() {
        missing(errors, "a script");
    }

    let mut properties = HashSet::new();
    for fetch in &query.fetch_queries {
        if fetch.reference.is_empty() {
            missing(errors, "a fetch query reference");
        }
        if fetch.inject_property_name.is_empty() {
            missing(errors, "a fetch query inject property");
        } else if !properties.insert(fetch.inject_property_name.as_str()) {
            errors.push(ValidationError::DuplicateInjectProperty {
                query: name.clone(),
                property: fetch.inject_property_name.clone(),
            });
        }
        for param in &fetch.parameters {
            if param.name.is_empty() {
                missing(errors, "a fetch parameter name");
            }
            match param.source {
                None => missing(errors, "a fetch parameter source"),
                Some(ParameterSource::Constant) if param.value.is_none() => {
                    missing(errors, "a constant fetch parameter value")
                }
                Some(_) => {}
            }
        }
    }
}

/// Depth-first search over fetch references.
struct CycleDetector<'a> {
    queries: &'a HashMap<String, Arc<Query>>,
    /// Queries whose reachable graph is known to be acyclic.
    acyclic: HashSet<String>,
    /// Cycles already reported, rotated to start at their smallest member.
    reported: HashSet<Vec<String>>,
}

impl<'a> CycleDetector<'a> {
    fn new(queries: &'a HashMap<String, Arc<Query>>) -> Self {
        Self {
            queries,
            acyclic: HashSet::new(),
            reported: HashSet::new(),
        }
    }

    /// Return the first new cycle reachable from `start`, as a closed path.
    fn check(&mut self, start: &str) -> Option<Vec<String>> {
        let mut path = Vec::new();
        let cycle = self.visit(start, &mut path)?;
        self.record(&cycle).then_some(cycle)
    }

    /// Remember a closed path; false if a rotation of it was seen before.
    fn record(&mut self, cycle: &[String]) -> bool {
        let open = &cycle[..cycle.len().saturating_sub(1)];
        let Some(first) = open
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.cmp(b.1))
            .map(|(i, _)| i)
        else {
            return false;
        };
        let mut rotated = open.to_vec();
        rotated.rotate_left(first);
        self.reported.insert(rotated)
    }

    fn visit(&mut self, name: &str, path: &mut Vec<String>) -> Option<Vec<String>> {
        if let Some(pos) = path.iter().position(|n| n == name) {
            let mut cycle = path[pos..].to_vec();
            cycle.push(name.to_string());
            return Some(cycle);
        }
        if self.acyclic.contains(name) {
            return None;
        }
        let queries = self.queries;
        let query = queries.get(name)?;

        path.push(name.to_string());
        for fetch in &query.fetch_queries {
            if let Some(cycle) = self.visit(&fetch.reference, path) {
                return Some(cycle);
            }
        }
        path.pop();
        self.acyclic.insert(name.to_string());
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{FetchQuery, FetchQueryParameter};

    fn mapping(source: &str, queries: Vec<Query>) -> QueryMapping {
        QueryMapping {
            source: source.to_string(),
            parameters: Vec::new(),
            queries,
        }
    }

    fn fetching(name: &str, reference: &str) -> Query {
        Query::new(name, "SELECT 1").with_fetch_query(FetchQuery::multi(reference, "children"))
    }

    #[test]
    fn test_valid_mapping() {
        let validated = validate(vec![mapping(
            "a.json",
            vec![fetching("A", "B"), Query::new("B", "SELECT 2")],
        )])
        .unwrap();
        assert_eq!(validated.queries.len(), 2);
        assert_eq!(validated.origins["B"], "a.json");
    }

    #[test]
    fn test_duplicate_name_names_both_sources() {
        let errors = validate(vec![
            mapping("a.json", vec![Query::new("Users.get", "SELECT 1")]),
            mapping("b.json", vec![Query::new("Users.get", "SELECT 2")]),
        ])
        .unwrap_err();

        assert_eq!(
            errors.into_inner(),
            vec![ValidationError::DuplicateName {
                name: "Users.get".to_string(),
                first_source: "a.json".to_string(),
                second_source: "b.json".to_string(),
            }]
        );
    }

    #[test]
    fn test_versions_are_distinct() {
        let validated = validate(vec![mapping(
            "a.json",
            vec![
                Query::new("Users.get", "SELECT 1"),
                Query::new("Users.get", "SELECT 2").with_version("v2"),
            ],
        )])
        .unwrap();
        assert!(validated.queries.contains_key("Users.get:v2"));
    }

    #[test]
    fn test_dangling_reference() {
        let errors = validate(vec![mapping("a.json", vec![fetching("A", "Missing")])]).unwrap_err();
        assert!(errors.iter().any(|e| matches!(
            e,
            ValidationError::DanglingReference { reference, .. } if reference == "Missing"
        )));
    }

    #[test]
    fn test_cycle_reported_once_with_path() {
        let errors = validate(vec![mapping("a.json", vec![fetching("A", "B"), fetching("B", "A")])])
            .unwrap_err();
        let cycles: Vec<_> = errors
            .iter()
            .filter(|e| matches!(e, ValidationError::Cycle { .. }))
            .collect();
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].to_string(), "fetch reference cycle: A -> B -> A");
    }

    #[test]
    fn test_cycles_deduplicated_by_direction() {
        let queries = HashMap::new();
        let mut detector = CycleDetector::new(&queries);
        let path = |names: &[&str]| names.iter().map(|n| n.to_string()).collect::<Vec<_>>();

        assert!(detector.record(&path(&["A", "B", "C", "A"])));
        assert!(!detector.record(&path(&["B", "C", "A", "B"])));
        assert!(!detector.record(&path(&["C", "A", "B", "C"])));
        assert!(detector.record(&path(&["A", "C", "B", "A"])));
        assert!(detector.record(&path(&["A", "B", "A"])));
    }

    #[test]
    fn test_self_reference_is_cycle() {
        let errors = validate(vec![mapping("a.json", vec![fetching("A", "A")])]).unwrap_err();
        assert_eq!(
            errors.iter().next().map(|e| e.to_string()),
            Some("fetch reference cycle: A -> A".to_string())
        );
    }

    #[test]
    fn test_diamond_is_not_a_cycle() {
        let a = Query::new("A", "x")
            .with_fetch_query(FetchQuery::multi("B", "b"))
            .with_fetch_query(FetchQuery::multi("C", "c"));
        let b = fetching("B", "D");
        let c = fetching("C", "D");
        let d = Query::new("D", "x");
        assert!(validate(vec![mapping("a.json", vec![a, b, c, d])]).is_ok());
    }

    #[test]
    fn test_missing_fields_and_duplicate_property() {
        let mut query = Query::new("A", "  ")
            .with_fetch_query(FetchQuery::multi("B", "items"))
            .with_fetch_query(
                FetchQuery::single("B", "items").with_parameter(FetchQueryParameter {
                    name: "id".to_string(),
                    source: None,
                    source_name: None,
                    value: None,
                    semantic_type: None,
                }),
            );
        query.result_shape = None;

        let errors = validate(vec![mapping(
            "a.json",
            vec![query, Query::new("B", "SELECT 1")],
        )])
        .unwrap_err();
        let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();

        assert!(messages.contains(&"query 'A' is missing a script".to_string()));
        assert!(messages.contains(&"query 'A' is missing a result shape".to_string()));
        assert!(messages.contains(&"query 'A' is missing a fetch parameter source".to_string()));
        assert!(messages
            .contains(&"query 'A' injects more than one fetch into property 'items'".to_string()));
    }
}
