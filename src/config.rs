//! Engine configuration loaded from TOML
//!
//! ```toml
//! paths = ["templates"]
//! max_depth = 32
//! markdown = true
//!
//! [namespaces]
//! admin = ["admin/templates"]
//!
//! [globals]
//! site = "example.org"
//!
//! [cache]
//! dir = "/var/cache/strata"
//! ttl = 600
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::engine::{DEFAULT_MAX_DEPTH, DEFAULT_TTL};

/// Errors that can occur when loading configuration or building an engine from it
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse config TOML: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Failed to open cache directory {}: {source}", .dir.display())]
    Cache {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Default template search paths
    pub paths: Vec<PathBuf>,
    /// Search paths per namespace, for `namespace:name` lookups
    pub namespaces: BTreeMap<String, Vec<PathBuf>>,
    /// Variables bound in every render that asks for globals
    pub globals: BTreeMap<String, Value>,
    pub cache: CacheConfig,
    /// Limit on nested extends and includes
    pub max_depth: usize,
    /// Enable the Markdown block kind
    pub markdown: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Directory of the file cache; no cache when unset
    pub dir: Option<PathBuf>,
    /// Ttl in seconds
    pub ttl: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            paths: Vec::new(),
            namespaces: BTreeMap::new(),
            globals: BTreeMap::new(),
            cache: CacheConfig::default(),
            max_depth: DEFAULT_MAX_DEPTH,
            markdown: false,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: None,
            ttl: DEFAULT_TTL.as_secs(),
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse configuration from a TOML string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.paths.push(path.into());
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>, paths: Vec<PathBuf>) -> Self {
        self.namespaces.insert(namespace.into(), paths);
        self
    }

    pub fn with_global(mut self, name: impl Into<String>, value: Value) -> Self {
        self.globals.insert(name.into(), value);
        self
    }

    /// Use a file cache in `dir`
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache.dir = Some(dir.into());
        self
    }

    pub fn with_ttl(mut self, secs: u64) -> Self {
        self.cache.ttl = secs;
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_markdown(mut self, enabled: bool) -> Self {
        self.markdown = enabled;
        self
    }
}
