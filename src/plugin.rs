//! Engine plugins
//!
//! A plugin receives the engine once, when it is added, and may install a
//! cache, enable extensions or register fragment operations.

use std::sync::Arc;
use std::time::Duration;

use crate::cache::Cache;
use crate::engine::{Engine, DEFAULT_TTL};

pub trait Plugin {
    fn init(&self, engine: &mut Engine);
}

/// Installs a cache backend
pub struct CachePlugin {
    pub cache: Arc<dyn Cache>,
    pub ttl: Duration,
}

impl CachePlugin {
    pub fn new(cache: Arc<dyn Cache>) -> Self {
        Self {
            cache,
            ttl: DEFAULT_TTL,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }
}

impl Plugin for CachePlugin {
    fn init(&self, engine: &mut Engine) {
        engine.set_cache(Arc::clone(&self.cache), self.ttl);
    }
}

/// Enables Markdown blocks
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkdownPlugin;

impl Plugin for MarkdownPlugin {
    fn init(&self, engine: &mut Engine) {
        engine.enable_markdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;

    #[test]
    fn test_cache_plugin_installs_cache() {
        let mut engine = Engine::new();
        assert!(engine.cache().is_none());
        engine.add_plugin(&CachePlugin::new(Arc::new(MemoryCache::new())).with_ttl(Duration::from_secs(5)));
        assert!(engine.cache().is_some());
        assert_eq!(engine.ttl(), Duration::from_secs(5));
    }

    #[test]
    fn test_markdown_plugin() {
        let mut engine = Engine::new();
        engine.add_plugin(&MarkdownPlugin);
        assert!(engine.markdown_enabled());
    }
}
