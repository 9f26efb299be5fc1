//! Template cache keyed by script identity.
//!
//! Entries are stamped with the registry generation they were compiled under.
//! A hit is only trusted when its stamp matches the current generation, so a
//! reader racing a reload either sees the old entry rejected or compiles anew.
//! Concurrent first compiles of one script may both run; the last insert wins.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use dynaq_lang::{compile_template, CompiledTemplate};
use tracing::debug;

use crate::error::{Error, Result};
use crate::mapping::Query;
use crate::registry::ReloadListener;

/// Content identity of a script (blake3 digest).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScriptId([u8; 32]);

impl ScriptId {
    /// Identity of `script`.
    pub fn of(script: &str) -> Self {
        Self(*blake3::hash(script.as_bytes()).as_bytes())
    }

    /// Hex form, for logs.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for ScriptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ScriptId({})", &self.to_hex()[..16])
    }
}

/// A cached compiled template with the generation it belongs to.
#[derive(Debug, Clone)]
pub struct CachedTemplate {
    pub template: Arc<CompiledTemplate>,
    pub generation: u64,
}

/// Cache statistics.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    compilations: AtomicU64,
    invalidations: AtomicU64,
}

impl CacheStats {
    /// Get hit count.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Get miss count.
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Number of compilations, cached or not.
    pub fn compilations(&self) -> u64 {
        self.compilations.load(Ordering::Relaxed)
    }

    /// Number of wholesale invalidations.
    pub fn invalidations(&self) -> u64 {
        self.invalidations.load(Ordering::Relaxed)
    }

    /// Calculate hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits() as f64;
        let total = hits + self.misses() as f64;
        if total > 0.0 {
            hits / total
        } else {
            0.0
        }
    }
}

/// Compiled template cache.
#[derive(Debug, Default)]
pub struct TemplateCache {
    entries: DashMap<ScriptId, CachedTemplate>,
    /// Generation entries must carry to be served.
    generation: AtomicU64,
    stats: CacheStats,
}

impl TemplateCache {
    /// Create an empty cache at generation 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Compiled template for `query`, from cache when valid.
    pub fn resolve(&self, query: &Query) -> Result<Arc<CompiledTemplate>> {
        let id = ScriptId::of(&query.script);
        let generation = self.generation();

        if let Some(cached) = self.entries.get(&id) {
            if cached.generation == generation {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(cached.template.clone());
            }
        }
        self.stats.misses.fetch_add(1, Ordering::Relaxed);

        let template = self.compile(query)?;
        // Skip the insert if a reload happened while compiling.
        if self.generation() == generation {
            self.entries.insert(
                id,
                CachedTemplate {
                    template: template.clone(),
                    generation,
                },
            );
        }
        Ok(template)
    }

    /// Compile `query`'s script without touching the cache.
    pub fn compile(&self, query: &Query) -> Result<Arc<CompiledTemplate>> {
        let name = query.versioned_name();
        self.stats.compilations.fetch_add(1, Ordering::Relaxed);
        debug!(query = %name, script = ?ScriptId::of(&query.script), "compiling template");

        compile_template(&query.script)
            .map(Arc::new)
            .map_err(|e| Error::template(&name, &e, &query.script))
    }

    /// Drop every entry and move to `generation`.
    pub fn invalidate(&self, generation: u64) {
        self.generation.store(generation, Ordering::SeqCst);
        self.entries.clear();
        self.stats.invalidations.fetch_add(1, Ordering::Relaxed);
        debug!(generation, "template cache invalidated");
    }

    /// Generation currently served.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get cache statistics.
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }
}

impl ReloadListener for TemplateCache {
    fn after_reload(&self, generation: u64) {
        self.invalidate(generation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_after_first_compile() {
        let cache = TemplateCache::new();
        let query = Query::new("Users.get", "SELECT * FROM users WHERE id = ${ P(id) }");

        let first = cache.resolve(&query).unwrap();
        let second = cache.resolve(&query).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.stats().hits(), 1);
        assert_eq!(cache.stats().misses(), 1);
        assert_eq!(cache.stats().compilations(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_same_script_shares_entry() {
        let cache = TemplateCache::new();
        cache.resolve(&Query::new("A", "SELECT 1")).unwrap();
        cache.resolve(&Query::new("B", "SELECT 1")).unwrap();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().hits(), 1);
    }

    #[test]
    fn test_reload_invalidates() {
        let cache = TemplateCache::new();
        let query = Query::new("Users.get", "SELECT 1");
        let before = cache.resolve(&query).unwrap();

        cache.after_reload(1);
        assert!(cache.is_empty());
        assert_eq!(cache.generation(), 1);

        let after = cache.resolve(&query).unwrap();
        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(cache.stats().invalidations(), 1);
        assert_eq!(cache.stats().compilations(), 2);
    }

    #[test]
    fn test_compile_error_names_query() {
        let cache = TemplateCache::new();
        let query = Query::new("Users.broken", "SELECT *\n{% if x %}");
        match cache.resolve(&query).unwrap_err() {
            Error::Template { query, excerpt, .. } => {
                assert_eq!(query, "Users.broken");
                assert!(excerpt.contains("2 |"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(cache.is_empty());
    }

    #[test]
    fn test_script_id_hex() {
        let id = ScriptId::of("SELECT 1");
        assert_eq!(id, ScriptId::of("SELECT 1"));
        assert_ne!(id, ScriptId::of("SELECT 2"));
        assert_eq!(id.to_hex().len(), 64);
    }
}
