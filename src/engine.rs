//! Engine entry point
//!
//! The [`Engine`] owns the search paths, global variables, loader, executor,
//! fragment registry and optional cache. Each [`Engine::render`] call builds
//! a fresh [`Template`] tree for the request.
//!
//! With a cache configured, whole-template output is cached according to the
//! template's final [`CacheMode`]:
//!
//! - `static`: the fully resolved output is stored and returned verbatim on
//!   later requests.
//! - `dynamic`: the output with deferred fragment tags still in place is
//!   stored; tags are resolved on every request.
//! - `disabled`: nothing is stored.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::cache::{Cache, CacheMode, FileCache};
use crate::config::{ConfigError, EngineConfig};
use crate::deferred::{FragmentError, FragmentRegistry};
use crate::error::RenderError;
use crate::plugin::Plugin;
use crate::syntax::DirectiveExecutor;
use crate::template::{Context, Executor, FileLoader, Loader, Resolver, Template, Variables};

/// Default ttl for cached output
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

/// Default limit on nested extends and includes
pub const DEFAULT_MAX_DEPTH: usize = 64;

pub struct Engine {
    resolver: Resolver,
    loader: Box<dyn Loader>,
    executor: Box<dyn Executor>,
    globals: Variables,
    cache: Option<Arc<dyn Cache>>,
    ttl: Duration,
    fragments: FragmentRegistry,
    markdown: bool,
    max_depth: usize,
}

impl Default for Engine {
    fn default() -> Self {
        Self {
            resolver: Resolver::default(),
            loader: Box::new(FileLoader),
            executor: Box::new(DirectiveExecutor),
            globals: Variables::new(),
            cache: None,
            ttl: DEFAULT_TTL,
            fragments: FragmentRegistry::default(),
            markdown: false,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl Engine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an engine from configuration
    ///
    /// A file cache is installed when the configuration names a cache directory.
    pub fn from_config(config: &EngineConfig) -> Result<Self, ConfigError> {
        let mut engine = Self::new().with_paths(config.paths.clone());
        for (namespace, paths) in &config.namespaces {
            engine.add_namespace(namespace.clone(), paths.clone());
        }
        for (name, value) in &config.globals {
            engine.add_global(name.clone(), value.clone());
        }
        if let Some(dir) = &config.cache.dir {
            let cache = FileCache::new(dir).map_err(|source| ConfigError::Cache {
                dir: dir.clone(),
                source,
            })?;
            engine.set_cache(Arc::new(cache), Duration::from_secs(config.cache.ttl));
        }
        if config.markdown {
            engine.enable_markdown();
        }
        engine.set_max_depth(config.max_depth);
        Ok(engine)
    }

    /// Add default search paths, builder style
    pub fn with_paths(mut self, paths: Vec<PathBuf>) -> Self {
        for path in paths {
            self.resolver.add_path(path);
        }
        self
    }

    pub fn with_loader(mut self, loader: impl Loader + 'static) -> Self {
        self.loader = Box::new(loader);
        self
    }

    pub fn with_executor(mut self, executor: impl Executor + 'static) -> Self {
        self.executor = Box::new(executor);
        self
    }

    pub fn add_path(&mut self, path: impl Into<PathBuf>) {
        self.resolver.add_path(path);
    }

    pub fn add_namespace(&mut self, namespace: impl Into<String>, paths: Vec<PathBuf>) {
        self.resolver.add_namespace(namespace, paths);
    }

    /// Bind a variable visible to every render that asks for globals
    pub fn add_global(&mut self, name: impl Into<String>, value: Value) {
        self.globals.insert(name.into(), value);
    }

    pub fn globals(&self) -> &Variables {
        &self.globals
    }

    pub fn add_plugin(&mut self, plugin: &dyn Plugin) {
        plugin.init(self);
    }

    /// Install a cache; `ttl` applies to whole-template entries and is the
    /// default for cacheable blocks and cached includes
    pub fn set_cache(&mut self, cache: Arc<dyn Cache>, ttl: Duration) {
        self.cache = Some(cache);
        self.ttl = ttl;
    }

    pub fn cache(&self) -> Option<&Arc<dyn Cache>> {
        self.cache.as_ref()
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Register a deferred fragment operation
    pub fn add_fragment<F>(&mut self, op: impl Into<String>, f: F)
    where
        F: Fn(&[Value], &Variables) -> Result<String, FragmentError> + Send + Sync + 'static,
    {
        self.fragments.register(op, f);
    }

    pub fn fragments(&self) -> &FragmentRegistry {
        &self.fragments
    }

    pub fn enable_markdown(&mut self) {
        self.markdown = true;
    }

    pub fn markdown_enabled(&self) -> bool {
        self.markdown
    }

    pub fn set_max_depth(&mut self, max_depth: usize) {
        self.max_depth = max_depth;
    }

    fn context(&self) -> Context<'_> {
        Context {
            resolver: &self.resolver,
            loader: self.loader.as_ref(),
            executor: self.executor.as_ref(),
            cache: self.cache.as_deref(),
            fragments: &self.fragments,
            ttl: self.ttl,
            markdown: self.markdown,
            max_depth: self.max_depth,
        }
    }

    /// Render template `name`
    ///
    /// `paths` are searched after the engine's own search paths. With
    /// `use_globals`, the engine's global variables are bound first and `vars`
    /// are layered on top of them.
    pub fn render(
        &self,
        name: &str,
        vars: Variables,
        paths: &[PathBuf],
        use_globals: bool,
    ) -> Result<String, RenderError> {
        let path = self.resolver.resolve(name, paths, self.loader.as_ref())?;
        let mut bindings = if use_globals {
            self.globals.clone()
        } else {
            Variables::new()
        };
        bindings.extend(vars);

        let cx = self.context();
        let mut template = Template::new(path, bindings.clone(), &cx);

        let Some(cache) = cx.cache else {
            let output = template.render()?;
            return Ok(self.fragments.resolve(&output, &bindings)?);
        };

        let final_key = template.id().as_str().to_string();
        let compiled_key = template.id().compiled_key();

        if let Some(compiled) = fetch(cache, &compiled_key) {
            tracing::debug!(template = name, "compiled output cache hit");
            return Ok(self.fragments.resolve(&compiled, &bindings)?);
        }
        if let Some(output) = fetch(cache, &final_key) {
            tracing::debug!(template = name, "output cache hit");
            return Ok(output);
        }

        let output = template.render()?;
        let mode = template.cache_mode();
        tracing::debug!(template = name, mode = %mode, "rendered");

        match mode {
            CacheMode::Static => {
                let resolved = self.fragments.resolve(&output, &bindings)?;
                store(cache, &final_key, &resolved, self.ttl);
                Ok(resolved)
            }
            CacheMode::Dynamic => {
                store(cache, &compiled_key, &output, self.ttl);
                Ok(self.fragments.resolve(&output, &bindings)?)
            }
            CacheMode::Disabled => Ok(self.fragments.resolve(&output, &bindings)?),
        }
    }
}

fn fetch(cache: &dyn Cache, key: &str) -> Option<String> {
    if !cache.has(key) {
        return None;
    }
    match cache.get(key) {
        Ok(payload) => Some(payload),
        Err(err) => {
            tracing::warn!(key, error = %err, "discarding cached output");
            None
        }
    }
}

fn store(cache: &dyn Cache, key: &str, content: &str, ttl: Duration) {
    if let Err(err) = cache.put(key, content, ttl) {
        tracing::warn!(key, error = %err, "failed to cache output");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::template::MemoryLoader;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn engine(templates: &[(&str, &str)]) -> Engine {
        let loader = MemoryLoader::new();
        for (path, source) in templates {
            loader.insert(*path, *source);
        }
        Engine::new().with_loader(loader)
    }

    fn counting(engine: &mut Engine) -> Arc<AtomicUsize> {
        let counter = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&counter);
        engine.add_fragment("count", move |_, _| {
            Ok(seen.fetch_add(1, Ordering::SeqCst).to_string())
        });
        counter
    }

    #[test]
    fn test_render_without_cache() {
        let engine = engine(&[("page", "Hi {{ name }}")]);
        let mut vars = Variables::new();
        vars.insert("name".into(), json!("Ada"));
        assert_eq!(engine.render("page", vars, &[], true).unwrap(), "Hi Ada");
    }

    #[test]
    fn test_globals_are_optional() {
        let mut engine = engine(&[("page", "{{ site }}")]);
        engine.add_global("site", json!("strata"));
        assert_eq!(
            engine.render("page", Variables::new(), &[], true).unwrap(),
            "strata"
        );
        assert!(matches!(
            engine.render("page", Variables::new(), &[], false),
            Err(RenderError::UndefinedVariable { .. })
        ));
    }

    #[test]
    fn test_request_vars_override_globals() {
        let mut engine = engine(&[("page", "{{ site }}")]);
        engine.add_global("site", json!("global"));
        let mut vars = Variables::new();
        vars.insert("site".into(), json!("local"));
        assert_eq!(engine.render("page", vars, &[], true).unwrap(), "local");
    }

    #[test]
    fn test_dynamic_output_resolved_without_cache() {
        let mut engine = engine(&[("page", "[{% defer count %}]")]);
        counting(&mut engine);
        assert_eq!(engine.render("page", Variables::new(), &[], true).unwrap(), "[0]");
        assert_eq!(engine.render("page", Variables::new(), &[], true).unwrap(), "[1]");
    }

    #[test]
    fn test_static_output_is_cached() {
        let mut engine = engine(&[("page", "A{% begin x %}1{% end %}B")]);
        let cache = Arc::new(MemoryCache::new());
        engine.set_cache(cache.clone(), Duration::from_secs(60));

        assert_eq!(engine.render("page", Variables::new(), &[], true).unwrap(), "A1B");
        assert_eq!(engine.render("page", Variables::new(), &[], true).unwrap(), "A1B");
        assert_eq!(cache.total_writes(), 1);
    }

    #[test]
    fn test_dynamic_output_resolves_every_time() {
        let mut engine = engine(&[("page", "[{% defer count %}]")]);
        let counter = counting(&mut engine);
        let cache = Arc::new(MemoryCache::new());
        engine.set_cache(cache.clone(), Duration::from_secs(60));

        assert_eq!(engine.render("page", Variables::new(), &[], true).unwrap(), "[0]");
        assert_eq!(engine.render("page", Variables::new(), &[], true).unwrap(), "[1]");
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        // Only the compiled output was stored, once
        assert_eq!(cache.total_writes(), 1);
    }

    #[test]
    fn test_disabled_output_is_not_cached() {
        let mut engine = engine(&[("page", "{% opt cachemode \"disabled\" %}x")]);
        let cache = Arc::new(MemoryCache::new());
        engine.set_cache(cache.clone(), Duration::from_secs(60));

        assert_eq!(engine.render("page", Variables::new(), &[], true).unwrap(), "x");
        assert!(cache.is_empty());
    }

    #[test]
    fn test_different_vars_are_cached_separately() {
        let mut engine = engine(&[("page", "{{ n }}")]);
        engine.set_cache(Arc::new(MemoryCache::new()), Duration::from_secs(60));

        for n in [1, 2, 1] {
            let mut vars = Variables::new();
            vars.insert("n".into(), json!(n));
            assert_eq!(
                engine.render("page", vars, &[], true).unwrap(),
                n.to_string()
            );
        }
    }

    #[test]
    fn test_included_output_does_not_shadow_template() {
        let mut engine = engine(&[
            ("page", "[{% cinclude \"widget\" %}]"),
            ("widget", "w{% defer count %}"),
        ]);
        counting(&mut engine);
        engine.set_cache(Arc::new(MemoryCache::new()), Duration::from_secs(60));

        assert_eq!(engine.render("page", Variables::new(), &[], true).unwrap(), "[w0]");
        assert_eq!(engine.render("widget", Variables::new(), &[], true).unwrap(), "w1");
    }

    #[test]
    fn test_interpolated_tags_are_not_evaluated() {
        let mut engine = engine(&[("page", "comment: {{ comment }}")]);
        let counter = counting(&mut engine);
        let tag = crate::deferred::compile(&crate::deferred::FragmentCall {
            op: "count".into(),
            args: vec![],
        })
        .unwrap();

        for cache in [None, Some(Arc::new(MemoryCache::new()))] {
            if let Some(cache) = cache {
                engine.set_cache(cache, Duration::from_secs(60));
            }
            for text in [tag.as_str(), "use {%! to open", "{%! !%}"] {
                let mut vars = Variables::new();
                vars.insert("comment".into(), json!(text));
                assert_eq!(
                    engine.render("page", vars.clone(), &[], true).unwrap(),
                    format!("comment: {text}")
                );
                // A cache hit returns the same text
                assert_eq!(
                    engine.render("page", vars, &[], true).unwrap(),
                    format!("comment: {text}")
                );
            }
        }
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_extra_search_paths() {
        let engine = engine(&[("themes/page", "themed")]);
        let paths = [PathBuf::from("themes")];
        assert_eq!(
            engine.render("page", Variables::new(), &paths, true).unwrap(),
            "themed"
        );
        assert!(matches!(
            engine.render("page", Variables::new(), &[], true),
            Err(RenderError::TemplateNotFound { .. })
        ));
    }
}
