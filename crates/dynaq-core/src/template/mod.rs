//! Compiled script templates and their generation-scoped cache.

mod cache;

pub use cache::{CacheStats, CachedTemplate, ScriptId, TemplateCache};
