//! Mapping registry: the validated, generation-stamped set of queries.
//!
//! Readers take an `Arc` snapshot and never observe a partially loaded
//! registry. Reloads are serialised, validated as a whole and installed in one
//! step; on any validation error the previous snapshot stays authoritative.

mod validator;

pub use validator::{validate, ValidatedMappings, ValidationError, ValidationErrors};

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::mapping::{MappingSource, Query, QueryMapping};

/// Observer of registry reloads.
pub trait ReloadListener: Send + Sync {
    /// Called before a validated registry is installed.
    fn before_reload(&self, _next_generation: u64) {}

    /// Called once after `generation` is installed.
    fn after_reload(&self, generation: u64);
}

/// An immutable view of the registry at one generation.
#[derive(Debug, Default)]
pub struct MappingSnapshot {
    generation: u64,
    queries: HashMap<String, Arc<Query>>,
    origins: HashMap<String, String>,
}

impl MappingSnapshot {
    /// Generation this snapshot was installed at (0 = empty registry).
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Look up a query by versioned name.
    pub fn get(&self, versioned_name: &str) -> Option<&Arc<Query>> {
        self.queries.get(versioned_name)
    }

    /// Source identifier a query was loaded from.
    pub fn origin(&self, versioned_name: &str) -> Option<&str> {
        self.origins.get(versioned_name).map(String::as_str)
    }

    /// Versioned names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.queries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Number of queries.
    pub fn len(&self) -> usize {
        self.queries.len()
    }

    /// Check if the snapshot holds no queries.
    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }
}

/// The mapping registry.
pub struct MappingRegistry {
    current: RwLock<Arc<MappingSnapshot>>,
    generation: AtomicU64,
    /// Serialises reloads.
    reload_lock: Mutex<()>,
    /// Held weakly; listeners dropped by their owner are pruned on reload.
    listeners: RwLock<Vec<Weak<dyn ReloadListener>>>,
}

impl Default for MappingRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MappingRegistry {
    /// Create an empty registry at generation 0.
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Arc::new(MappingSnapshot::default())),
            generation: AtomicU64::new(0),
            reload_lock: Mutex::new(()),
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Register a reload listener for as long as its owner keeps it alive.
    pub fn add_listener<L: ReloadListener + 'static>(&self, listener: &Arc<L>) {
        let listener: Weak<dyn ReloadListener> = Arc::<L>::downgrade(listener);
        self.listeners.write().push(listener);
    }

    /// Number of registered listeners that are still alive.
    pub fn listener_count(&self) -> usize {
        self.listeners
            .read()
            .iter()
            .filter(|listener| listener.strong_count() > 0)
            .count()
    }

    /// Current generation.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> Arc<MappingSnapshot> {
        self.current.read().clone()
    }

    /// Look up a query in the current snapshot.
    pub fn get(&self, versioned_name: &str) -> Result<Arc<Query>> {
        self.current
            .read()
            .get(versioned_name)
            .cloned()
            .ok_or_else(|| Error::QueryNotFound(versioned_name.to_string()))
    }

    /// Read every source and install the result. Returns the new generation.
    pub fn load(&self, sources: &[Box<dyn MappingSource>]) -> Result<u64> {
        let mappings = sources
            .iter()
            .map(|source| source.load())
            .collect::<Result<Vec<_>>>()?;
        self.install(mappings)
    }

    /// Validate and install mappings. Returns the new generation.
    pub fn install(&self, mappings: Vec<QueryMapping>) -> Result<u64> {
        let _guard = self.reload_lock.lock();

        let validated = validate(mappings).map_err(|errors| {
            warn!(
                errors = errors.len(),
                generation = self.generation(),
                "mapping validation failed; keeping current registry"
            );
            Error::Validation(errors)
        })?;

        let next = self.generation() + 1;
        let listeners: Vec<Arc<dyn ReloadListener>> = {
            let mut registered = self.listeners.write();
            registered.retain(|listener| listener.strong_count() > 0);
            registered.iter().filter_map(Weak::upgrade).collect()
        };
        for listener in &listeners {
            listener.before_reload(next);
        }

        let snapshot = Arc::new(MappingSnapshot {
            generation: next,
            queries: validated.queries,
            origins: validated.origins,
        });
        let count = snapshot.len();
        *self.current.write() = snapshot;
        self.generation.store(next, Ordering::SeqCst);

        for listener in &listeners {
            listener.after_reload(next);
        }

        info!(generation = next, queries = count, "mapping registry reloaded");
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{FetchQuery, JsonMappingSource};
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct Recorder {
        events: StdMutex<Vec<String>>,
    }

    impl ReloadListener for Recorder {
        fn before_reload(&self, next_generation: u64) {
            self.events
                .lock()
                .unwrap()
                .push(format!("before {}", next_generation));
        }

        fn after_reload(&self, generation: u64) {
            self.events
                .lock()
                .unwrap()
                .push(format!("after {}", generation));
        }
    }

    fn mapping(queries: Vec<Query>) -> QueryMapping {
        QueryMapping {
            source: "test".to_string(),
            parameters: Vec::new(),
            queries,
        }
    }

    #[test]
    fn test_install_bumps_generation() {
        let registry = MappingRegistry::new();
        assert_eq!(registry.generation(), 0);
        assert!(registry.snapshot().is_empty());

        let generation = registry
            .install(vec![mapping(vec![Query::new("Users.get", "SELECT 1")])])
            .unwrap();
        assert_eq!(generation, 1);
        assert_eq!(registry.snapshot().generation(), 1);
        assert_eq!(registry.get("Users.get").unwrap().script, "SELECT 1");
        assert_eq!(registry.snapshot().origin("Users.get"), Some("test"));
    }

    #[test]
    fn test_failed_install_keeps_previous_snapshot() {
        let registry = MappingRegistry::new();
        registry
            .install(vec![mapping(vec![Query::new("Users.get", "SELECT 1")])])
            .unwrap();

        let broken = Query::new("A", "SELECT 1").with_fetch_query(FetchQuery::single("A", "self"));
        let err = registry.install(vec![mapping(vec![broken])]).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        assert_eq!(registry.generation(), 1);
        assert!(registry.get("Users.get").is_ok());
        assert!(matches!(registry.get("A"), Err(Error::QueryNotFound(_))));
    }

    #[test]
    fn test_listeners_notified_once_per_reload() {
        let registry = MappingRegistry::new();
        let recorder = Arc::new(Recorder::default());
        registry.add_listener(&recorder);

        registry.install(vec![mapping(vec![])]).unwrap();
        registry.install(vec![mapping(vec![])]).unwrap();
        let _ = registry.install(vec![mapping(vec![Query::new("", "")])]);

        assert_eq!(
            *recorder.events.lock().unwrap(),
            vec!["before 1", "after 1", "before 2", "after 2"]
        );
    }

    #[test]
    fn test_dropped_listener_is_pruned() {
        let registry = MappingRegistry::new();
        let kept = Arc::new(Recorder::default());
        let dropped = Arc::new(Recorder::default());
        registry.add_listener(&kept);
        registry.add_listener(&dropped);
        assert_eq!(registry.listener_count(), 2);
        assert_eq!(Arc::strong_count(&dropped), 1);

        drop(dropped);
        assert_eq!(registry.listener_count(), 1);
        registry.install(vec![mapping(vec![])]).unwrap();

        assert_eq!(registry.listeners.read().len(), 1);
        assert_eq!(*kept.events.lock().unwrap(), vec!["before 1", "after 1"]);
    }

    #[test]
    fn test_load_from_sources() {
        let registry = MappingRegistry::new();
        let sources: Vec<Box<dyn MappingSource>> = vec![
            Box::new(JsonMappingSource::from_text(
                "users",
                r#"{"queries": [{"name": "Users.get", "result": "map", "script": "SELECT 1"}]}"#,
            )),
            Box::new(JsonMappingSource::from_text(
                "orders",
                r#"{"queries": [{"name": "Orders.get", "version": "v1", "result": "map", "script": "SELECT 2"}]}"#,
            )),
        ];
        registry.load(&sources).unwrap();
        assert_eq!(registry.snapshot().names(), vec!["Orders.get:v1", "Users.get"]);
    }
}
