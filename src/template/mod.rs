//! Template orchestration
//!
//! A [`Template`] is one unit of rendering: it hands its source to an
//! [`Executor`], which calls back into the template to write text, open and
//! close blocks, extend a base template or include other templates. The
//! template keeps the stack of open blocks and their captured output, and
//! finally renders its block tree.
//!
//! # Inheritance
//!
//! ```text
//! page:   A{% begin x %}1{% end %}B
//! child:  {% extend "page" %}{% append x %}2{% end %}
//! ```
//!
//! Rendering `child` executes `page` once to build its block tree, adopts
//! that tree, and then lets `child` re-open `x` in append mode, producing
//! `A12B`.

mod resolver;

pub use resolver::{FileLoader, Loader, MemoryLoader, Resolver};

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::Value;

use crate::block::{hex_digest, markdown_to_html, placeholder, ApplyMode, BlockHandle, BlockKind, BlockRegistry, ROOT_NAME};
use crate::cache::{Cache, CacheMode};
use crate::deferred::{self, FragmentCall, FragmentError, FragmentRegistry};
use crate::error::RenderError;

/// Variable bindings of a template, ordered so their serialization is deterministic
pub type Variables = BTreeMap<String, Value>;

/// Executes template source against a [`Template`]
///
/// The executor writes literal output with [`Template::write`] and reports
/// block declarations, extends and includes through the template's methods.
pub trait Executor: Send + Sync {
    fn execute(&self, source: &str, template: &mut Template<'_>) -> Result<(), RenderError>;
}

/// Everything a render request needs from its surroundings
///
/// Built by the engine for each request and shared by every template
/// (bases and includes) created while serving it.
pub struct Context<'e> {
    pub resolver: &'e Resolver,
    pub loader: &'e dyn Loader,
    pub executor: &'e dyn Executor,
    pub cache: Option<&'e dyn Cache>,
    pub fragments: &'e FragmentRegistry,
    /// Default ttl for cacheable blocks and cached includes
    pub ttl: Duration,
    /// Whether Markdown blocks may be declared
    pub markdown: bool,
    /// Maximum nesting of extends and includes
    pub max_depth: usize,
}

/// Template identity, derived from its location and variable bindings
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TemplateId(String);

impl TemplateId {
    pub fn derive(path: &Path, vars: &Variables) -> Self {
        // Serializing string-keyed JSON values cannot fail
        let serialized = serde_json::to_vec(vars).unwrap_or_default();
        Self(hex_digest(&[
            path.to_string_lossy().as_bytes(),
            &serialized,
        ]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Cache key of the compiled (deferred-fragment) output of this template
    pub fn compiled_key(&self) -> String {
        hex_digest(&[self.0.as_bytes(), b"compiled"])
    }

    /// Cache key of this template's output when pulled in by a cached include
    ///
    /// Kept apart from the whole-template keys: included output may still
    /// hold unresolved fragment tags.
    pub fn include_key(&self) -> String {
        hex_digest(&[self.0.as_bytes(), b"include"])
    }

    /// Cache key of an external resource fetched by this template
    pub fn fetch_key(&self, source: &str) -> String {
        hex_digest(&[self.0.as_bytes(), source.as_bytes()])
    }
}

impl fmt::Display for TemplateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Text form of a variable value as written into output
pub fn display_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// An open block and the output captured since it was opened
#[derive(Debug)]
struct Frame {
    block: BlockHandle,
    capture: String,
}

impl Frame {
    fn new(block: BlockHandle) -> Self {
        Self {
            block,
            capture: String::new(),
        }
    }
}

/// One template unit being rendered
pub struct Template<'e> {
    id: TemplateId,
    path: PathBuf,
    vars: Variables,
    blocks: BlockRegistry,
    /// Open blocks, innermost last; the root frame is always at the bottom
    stack: Vec<Frame>,
    cache_mode: CacheMode,
    extends: Option<String>,
    /// Locations of the extend chain leading to this template, itself included
    lineage: Vec<PathBuf>,
    depth: usize,
    cx: &'e Context<'e>,
}

impl<'e> Template<'e> {
    /// Create a top-level template for the already resolved `path`
    pub fn new(path: PathBuf, vars: Variables, cx: &'e Context<'e>) -> Self {
        let lineage = vec![path.clone()];
        Self::nested(path, vars, cx, lineage, 0)
    }

    fn nested(
        path: PathBuf,
        vars: Variables,
        cx: &'e Context<'e>,
        lineage: Vec<PathBuf>,
        depth: usize,
    ) -> Self {
        let id = TemplateId::derive(&path, &vars);
        let blocks = BlockRegistry::new(&id);
        let stack = vec![Frame::new(blocks.root())];
        Self {
            id,
            path,
            vars,
            blocks,
            stack,
            cache_mode: CacheMode::default(),
            extends: None,
            lineage,
            depth,
            cx,
        }
    }

    pub fn id(&self) -> &TemplateId {
        &self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn variables(&self) -> &Variables {
        &self.vars
    }

    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    pub fn set_variable(&mut self, name: impl Into<String>, value: Value) {
        self.vars.insert(name.into(), value);
    }

    pub fn blocks(&self) -> &BlockRegistry {
        &self.blocks
    }

    pub fn cache_mode(&self) -> CacheMode {
        self.cache_mode
    }

    pub fn set_cache_mode(&mut self, mode: CacheMode) {
        self.cache_mode = mode;
    }

    /// Name of the template this one extends, once `extend` has run
    pub fn extends(&self) -> Option<&str> {
        self.extends.as_deref()
    }

    /// Default ttl for cacheable blocks and cached includes
    pub fn default_ttl(&self) -> Duration {
        self.cx.ttl
    }

    /// The innermost open block
    pub fn current_block(&self) -> BlockHandle {
        self.stack
            .last()
            .map(|frame| frame.block)
            .unwrap_or_else(|| self.blocks.root())
    }

    /// Apply a template option; only `cachemode` is recognised
    pub fn set_option(&mut self, option: &str, value: &Value) -> Result<(), RenderError> {
        match option {
            "cachemode" => {
                let mode = match value {
                    Value::String(s) => s.parse()?,
                    other => {
                        return Err(RenderError::InvalidCacheMode {
                            value: other.to_string(),
                        })
                    }
                };
                self.cache_mode = mode;
                Ok(())
            }
            other => Err(RenderError::InvalidOption {
                path: self.path.clone(),
                option: other.to_string(),
            }),
        }
    }

    /// Append literal output to the innermost open block's capture
    pub fn write(&mut self, text: &str) {
        if let Some(frame) = self.stack.last_mut() {
            frame.capture.push_str(text);
        }
    }

    /// Open block `name` in replace mode
    pub fn begin(&mut self, name: &str) -> Result<(), RenderError> {
        self.open(name, ApplyMode::Replace, None)
    }

    /// Open block `name` in prepend mode
    pub fn prepend(&mut self, name: &str) -> Result<(), RenderError> {
        self.open(name, ApplyMode::Prepend, None)
    }

    /// Open block `name` in append mode
    pub fn append(&mut self, name: &str) -> Result<(), RenderError> {
        self.open(name, ApplyMode::Append, None)
    }

    /// Open block `name` with an explicit kind
    ///
    /// Overriding an existing block requires the same kind; anything else is
    /// a [`RenderError::BlockTypeMismatch`].
    pub fn add_block(&mut self, name: &str, kind: BlockKind) -> Result<(), RenderError> {
        match kind {
            BlockKind::Cacheable { .. } if self.cx.cache.is_none() => {
                return Err(RenderError::CacheUnavailable {
                    path: self.path.clone(),
                })
            }
            BlockKind::Markdown if !self.cx.markdown => {
                return Err(RenderError::ExtensionDisabled {
                    path: self.path.clone(),
                    extension: "markdown",
                })
            }
            _ => {}
        }
        self.open(name, ApplyMode::Replace, Some(kind))
    }

    fn open(
        &mut self,
        name: &str,
        mode: ApplyMode,
        kind: Option<BlockKind>,
    ) -> Result<(), RenderError> {
        if name == ROOT_NAME {
            return Err(RenderError::ReservedBlockName {
                path: self.path.clone(),
                name: name.to_string(),
            });
        }

        let handle = match self.blocks.get(name) {
            Some(existing) => {
                let block = self.blocks.block_mut(existing);
                if let Some(kind) = &kind {
                    if !block.kind().same_kind(kind) {
                        return Err(RenderError::BlockTypeMismatch {
                            path: self.path.clone(),
                            block: name.to_string(),
                            existing: block.kind().name(),
                            conflicting: kind.name(),
                        });
                    }
                }
                tracing::debug!(template = %self.path.display(), block = name, "overriding block");
                block.set_extended(true);
                existing
            }
            None => {
                let parent = self.current_block();
                self.blocks
                    .create_child(parent, name, kind.unwrap_or(BlockKind::Plain), &self.id)
            }
        };

        self.blocks.block_mut(handle).set_mode(mode);
        self.stack.push(Frame::new(handle));
        Ok(())
    }

    /// Close the innermost open block
    ///
    /// The captured output is merged into the block. A block that was claimed
    /// by an override leaves no placeholder behind: its parent already holds
    /// one from the original declaration.
    pub fn end(&mut self) -> Result<(), RenderError> {
        if self.stack.len() <= 1 {
            return Err(RenderError::UnbalancedEnd {
                path: self.path.clone(),
            });
        }
        let Some(frame) = self.stack.pop() else {
            return Err(RenderError::UnbalancedEnd {
                path: self.path.clone(),
            });
        };

        let block = self.blocks.block_mut(frame.block);
        block.set_content(&frame.capture);
        if !block.is_extended() {
            let token = placeholder::encode(block.id());
            self.write(&token);
        }
        Ok(())
    }

    /// Render block `name` of this template, or nothing if it is undeclared
    ///
    /// The block is rendered from its current content; cached block entries
    /// are only read and written by the final render.
    pub fn content(&self, name: &str) -> String {
        self.blocks
            .get(name)
            .map(|handle| self.blocks.render_live(handle))
            .unwrap_or_default()
    }

    /// Render the existing content of the innermost open block
    ///
    /// Inside an override this is the content inherited from the base.
    pub fn parent(&self) -> String {
        self.blocks.render_live(self.current_block())
    }

    /// Create a fresh template for `name`, searched beside this one
    pub fn new_template(&self, name: &str, vars: Variables) -> Result<Template<'e>, RenderError> {
        let path = self.resolve(name)?;
        self.check_depth()?;
        let lineage = vec![path.clone()];
        Ok(Template::nested(
            path,
            self.layered(vars),
            self.cx,
            lineage,
            self.depth + 1,
        ))
    }

    fn resolve(&self, name: &str) -> Result<PathBuf, RenderError> {
        let extra: Vec<PathBuf> = self
            .path
            .parent()
            .map(|dir| vec![dir.to_path_buf()])
            .unwrap_or_default();
        self.cx
            .resolver
            .resolve(name, &extra, self.cx.loader)
            .map_err(|err| match err {
                RenderError::TemplateNotFound { name, .. } => RenderError::TemplateNotFound {
                    name,
                    from: Some(self.path.clone()),
                },
                other => other,
            })
    }

    fn check_depth(&self) -> Result<(), RenderError> {
        if self.depth + 1 > self.cx.max_depth {
            return Err(RenderError::NestingTooDeep {
                path: self.path.clone(),
                limit: self.cx.max_depth,
            });
        }
        Ok(())
    }

    /// This template's bindings with `vars` layered on top
    fn layered(&self, vars: Variables) -> Variables {
        let mut merged = self.vars.clone();
        merged.extend(vars);
        merged
    }

    /// Extend the base template `name`
    ///
    /// The base is executed once to build its block tree, which then replaces
    /// this template's tree. Output written so far outside any block is
    /// discarded; from here on this template only overrides inherited blocks.
    pub fn extend(&mut self, name: &str) -> Result<(), RenderError> {
        if self.stack.len() > 1 {
            return Err(RenderError::ExtendInsideBlock {
                path: self.path.clone(),
            });
        }

        let path = self.resolve(name)?;
        if self.lineage.contains(&path) {
            let mut chain = self.lineage.clone();
            chain.push(path);
            return Err(RenderError::ExtendCycle { chain });
        }
        self.check_depth()?;

        tracing::debug!(template = %self.path.display(), base = %path.display(), "extending");

        let mut lineage = self.lineage.clone();
        lineage.push(path.clone());
        let mut base = Template::nested(
            path,
            self.layered(Variables::new()),
            self.cx,
            lineage,
            self.depth + 1,
        );
        base.cache_mode = self.cache_mode;
        base.prepare()?;

        let Template {
            vars: base_vars,
            blocks,
            cache_mode,
            ..
        } = base;

        let own = std::mem::take(&mut self.vars);
        self.vars = base_vars;
        self.vars.extend(own);

        self.blocks = blocks;
        let root = self.blocks.root();
        self.blocks.block_mut(root).set_extended(true);
        self.stack = vec![Frame::new(root)];
        // The base started from our mode, so any difference came from its own directives
        self.cache_mode = cache_mode;
        self.extends = Some(name.to_string());
        Ok(())
    }

    /// Render template `name` with `vars` layered over this template's bindings
    pub fn include(&mut self, name: &str, vars: Variables) -> Result<String, RenderError> {
        let mut included = self.new_template(name, vars)?;
        let output = included.render()?;
        self.cache_mode = self.cache_mode.nest(included.cache_mode);
        Ok(output)
    }

    /// Like [`include`](Self::include), memoized in the cache under the
    /// included template's [`include_key`](TemplateId::include_key)
    pub fn cached_include(
        &mut self,
        name: &str,
        vars: Variables,
        ttl: Duration,
    ) -> Result<String, RenderError> {
        let cache = self.cx.cache.ok_or_else(|| RenderError::CacheUnavailable {
            path: self.path.clone(),
        })?;
        let mut included = self.new_template(name, vars)?;
        let key = included.id().include_key();

        if cache.has(&key) {
            match cache.get(&key) {
                Ok(output) => {
                    tracing::debug!(template = %included.path.display(), "include cache hit");
                    if deferred::contains_tags(&output) {
                        self.cache_mode = self.cache_mode.nest(CacheMode::Dynamic);
                    }
                    return Ok(output);
                }
                Err(err) => {
                    tracing::warn!(template = %included.path.display(), error = %err, "discarding cached include");
                }
            }
        }

        let output = included.render()?;
        self.cache_mode = self.cache_mode.nest(included.cache_mode);
        if included.cache_mode != CacheMode::Disabled {
            if let Err(err) = cache.put(&key, &output, ttl) {
                tracing::warn!(template = %included.path.display(), error = %err, "failed to cache include");
            }
        }
        Ok(output)
    }

    /// Read `source` through the cache, keyed by this template and `source`
    ///
    /// A miss, or an entry that cannot be read back, reads the resource again
    /// and stores it for `ttl`.
    pub fn cached_fetch(&self, source: &str, ttl: Duration) -> Result<String, RenderError> {
        let cache = self.cx.cache.ok_or_else(|| RenderError::CacheUnavailable {
            path: self.path.clone(),
        })?;
        let key = self.id.fetch_key(source);

        if cache.has(&key) {
            match cache.get(&key) {
                Ok(content) => {
                    tracing::debug!(template = %self.path.display(), source, "fetch cache hit");
                    return Ok(content);
                }
                Err(err) => {
                    tracing::warn!(template = %self.path.display(), source, error = %err, "discarding cached fetch");
                }
            }
        }

        let content = fs::read_to_string(source).map_err(|err| RenderError::Io {
            path: PathBuf::from(source),
            source: err,
        })?;
        if let Err(err) = cache.put(&key, &content, ttl) {
            tracing::warn!(template = %self.path.display(), source, error = %err, "failed to cache fetch");
        }
        Ok(content)
    }

    /// Convert Markdown `text` to HTML
    pub fn markdown(&self, text: &str) -> Result<String, RenderError> {
        if !self.cx.markdown {
            return Err(RenderError::ExtensionDisabled {
                path: self.path.clone(),
                extension: "markdown",
            });
        }
        Ok(markdown_to_html(text))
    }

    /// Encode a deferred call to `op`, to be evaluated on every render
    ///
    /// Switches this template to [`CacheMode::Dynamic`] unless caching is
    /// already disabled.
    pub fn defer(&mut self, op: &str, args: Vec<Value>) -> Result<String, RenderError> {
        if !self.cx.fragments.contains(op) {
            return Err(FragmentError::UnknownOperation { op: op.to_string() }.into());
        }
        self.cache_mode = self.cache_mode.nest(CacheMode::Dynamic);
        let call = FragmentCall {
            op: op.to_string(),
            args,
        };
        Ok(deferred::compile(&call)?)
    }

    /// Execute the template body, populating the block tree
    ///
    /// Output outside any block becomes the root's content, unless the root
    /// was claimed by [`extend`](Self::extend).
    pub fn prepare(&mut self) -> Result<(), RenderError> {
        let source = self
            .cx
            .loader
            .load(&self.path)
            .map_err(|source| RenderError::Io {
                path: self.path.clone(),
                source,
            })?;

        self.stack = vec![Frame::new(self.blocks.root())];
        let executor = self.cx.executor;
        executor.execute(&source, self)?;

        if self.stack.len() > 1 {
            let open = self.current_block();
            return Err(RenderError::UnclosedBlock {
                path: self.path.clone(),
                block: self.blocks.block(open).name().to_string(),
            });
        }

        let capture = self
            .stack
            .pop()
            .map(|frame| frame.capture)
            .unwrap_or_default();
        let root = self.blocks.root();
        self.stack = vec![Frame::new(root)];

        let root_block = self.blocks.block_mut(root);
        if !root_block.is_extended() {
            root_block.set_content(&capture);
        }
        Ok(())
    }

    /// Prepare the template and render its block tree
    pub fn render(&mut self) -> Result<String, RenderError> {
        self.prepare()?;
        Ok(self.blocks.render(self.blocks.root(), self.cx.cache))
    }
}

impl fmt::Debug for Template<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Template")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("cache_mode", &self.cache_mode)
            .field("extends", &self.extends)
            .field("blocks", &self.blocks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::syntax::DirectiveExecutor;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    struct Fixture {
        resolver: Resolver,
        loader: MemoryLoader,
        executor: DirectiveExecutor,
        cache: MemoryCache,
        fragments: FragmentRegistry,
    }

    impl Fixture {
        fn new(templates: &[(&str, &str)]) -> Self {
            let loader = MemoryLoader::new();
            for (path, source) in templates {
                loader.insert(*path, *source);
            }
            Self {
                resolver: Resolver::default(),
                loader,
                executor: DirectiveExecutor,
                cache: MemoryCache::new(),
                fragments: FragmentRegistry::default(),
            }
        }

        fn context(&self, cached: bool) -> Context<'_> {
            Context {
                resolver: &self.resolver,
                loader: &self.loader,
                executor: &self.executor,
                cache: cached.then_some(&self.cache as &dyn Cache),
                fragments: &self.fragments,
                ttl: Duration::from_secs(60),
                markdown: true,
                max_depth: 8,
            }
        }
    }

    fn render(fixture: &Fixture, name: &str) -> Result<String, RenderError> {
        let cx = fixture.context(true);
        Template::new(PathBuf::from(name), Variables::new(), &cx).render()
    }

    #[test]
    fn test_identity_depends_on_path_and_vars() {
        let mut vars = Variables::new();
        let a = TemplateId::derive(Path::new("page"), &vars);
        assert_eq!(a, TemplateId::derive(Path::new("page"), &vars));
        vars.insert("x".into(), json!(1));
        assert_ne!(a, TemplateId::derive(Path::new("page"), &vars));
        assert_ne!(a, TemplateId::derive(Path::new("other"), &Variables::new()));
        assert_ne!(a.compiled_key(), a.as_str());
        assert_ne!(a.include_key(), a.as_str());
        assert_ne!(a.include_key(), a.compiled_key());
    }

    #[test]
    fn test_standalone_blocks() {
        let fixture = Fixture::new(&[("page", "A{% begin x %}1{% end %}B")]);
        assert_eq!(render(&fixture, "page").unwrap(), "A1B");
    }

    #[test]
    fn test_extend_modes() {
        let fixture = Fixture::new(&[
            ("page", "A{% begin x %}1{% end %}B"),
            ("append", "{% extend \"page\" %}{% append x %}2{% end %}"),
            ("prepend", "{% extend \"page\" %}{% prepend x %}0{% end %}"),
            ("replace", "{% extend \"page\" %}{% begin x %}9{% end %}"),
        ]);
        assert_eq!(render(&fixture, "append").unwrap(), "A12B");
        assert_eq!(render(&fixture, "prepend").unwrap(), "A01B");
        assert_eq!(render(&fixture, "replace").unwrap(), "A9B");
    }

    #[test]
    fn test_extend_discards_loose_output() {
        let fixture = Fixture::new(&[
            ("page", "A{% begin x %}1{% end %}B"),
            ("child", "lost{% extend \"page\" %}also lost{% begin x %}2{% end %}"),
        ]);
        assert_eq!(render(&fixture, "child").unwrap(), "A2B");
    }

    #[test]
    fn test_extend_records_base_and_aliases_tree() {
        let fixture = Fixture::new(&[
            ("page", "A{% begin x %}1{% end %}B"),
            ("child", "{% extend \"page\" %}"),
        ]);
        let cx = fixture.context(false);
        let mut child = Template::new(PathBuf::from("child"), Variables::new(), &cx);
        child.prepare().unwrap();
        assert_eq!(child.extends(), Some("page"));
        assert!(child.blocks().contains("x"));
        assert!(child.blocks().block(child.blocks().root()).is_extended());
    }

    #[test]
    fn test_new_block_inside_override() {
        let fixture = Fixture::new(&[
            ("page", "<{% begin x %}1{% end %}>"),
            (
                "child",
                "{% extend \"page\" %}{% append x %}[{% begin y %}2{% end %}]{% end %}",
            ),
        ]);
        assert_eq!(render(&fixture, "child").unwrap(), "<1[2]>");
    }

    #[test]
    fn test_parent_renders_inherited_content() {
        let fixture = Fixture::new(&[
            ("page", "{% begin x %}base{% end %}"),
            ("child", "{% extend \"page\" %}{% begin x %}({% parent %}){% end %}"),
        ]);
        assert_eq!(render(&fixture, "child").unwrap(), "(base)");
    }

    #[test]
    fn test_parent_inside_cacheable_override() {
        let fixture = Fixture::new(&[
            ("base", "<{% cache side %}base{% end %}>"),
            ("child", "{% extend \"base\" %}{% cache side %}({% parent %}){% end %}"),
        ]);
        assert_eq!(render(&fixture, "child").unwrap(), "<(base)>");

        let base = TemplateId::derive(Path::new("base"), &Variables::new());
        let side = crate::block::BlockId::derive(&base, "side");
        assert_eq!(fixture.cache.get(side.as_str()).unwrap(), "(base)");
        assert_eq!(fixture.cache.total_writes(), 1);
    }

    #[test]
    fn test_content_does_not_populate_cache() {
        let fixture = Fixture::new(&[(
            "page",
            "{% opt cachemode \"disabled\" %}{% cache side %}s{% end %}[{% content side %}]",
        )]);
        assert_eq!(render(&fixture, "page").unwrap(), "s[s]");
        assert_eq!(fixture.cache.total_writes(), 1);
    }

    #[test]
    fn test_cached_include_has_its_own_key() {
        let fixture = Fixture::new(&[
            ("page", "[{% cinclude \"widget\" %}]"),
            ("widget", "w"),
        ]);
        assert_eq!(render(&fixture, "page").unwrap(), "[w]");

        let widget = TemplateId::derive(Path::new("widget"), &Variables::new());
        assert_eq!(fixture.cache.get(&widget.include_key()).unwrap(), "w");
        assert!(!fixture.cache.has(widget.as_str()));
    }

    #[test]
    fn test_cached_fetch() {
        let dir = tempfile::TempDir::new().unwrap();
        let motd = dir.path().join("motd.txt");
        fs::write(&motd, "hello").unwrap();
        let source = format!("<{{% cfetch {:?} %}}>", motd.display().to_string());
        let fixture = Fixture::new(&[("page", source.as_str())]);

        assert_eq!(render(&fixture, "page").unwrap(), "<hello>");
        fs::write(&motd, "changed").unwrap();
        assert_eq!(render(&fixture, "page").unwrap(), "<hello>");

        let page = TemplateId::derive(Path::new("page"), &Variables::new());
        let key = page.fetch_key(&motd.display().to_string());
        assert_eq!(fixture.cache.writes(&key), 1);
    }

    #[test]
    fn test_cached_fetch_errors() {
        let fixture = Fixture::new(&[("page", "{% cfetch \"/no/such/file\" %}")]);
        assert!(matches!(
            render(&fixture, "page"),
            Err(RenderError::Io { .. })
        ));

        let cx = fixture.context(false);
        let mut page = Template::new(PathBuf::from("page"), Variables::new(), &cx);
        assert!(matches!(
            page.render(),
            Err(RenderError::CacheUnavailable { .. })
        ));
    }

    #[test]
    fn test_inline_markdown() {
        let fixture = Fixture::new(&[("page", "{% md \"*hi*\" %}")]);
        assert_eq!(render(&fixture, "page").unwrap().trim(), "<p><em>hi</em></p>");

        let mut cx = fixture.context(false);
        cx.markdown = false;
        let mut page = Template::new(PathBuf::from("page"), Variables::new(), &cx);
        assert!(matches!(
            page.render(),
            Err(RenderError::ExtensionDisabled { extension: "markdown", .. })
        ));
    }

    #[test]
    fn test_missing_include_names_includer() {
        let fixture = Fixture::new(&[("page", "{% include \"gone\" %}")]);
        match render(&fixture, "page").unwrap_err() {
            RenderError::TemplateNotFound { name, from } => {
                assert_eq!(name, "gone");
                assert_eq!(from.as_deref(), Some(Path::new("page")));
            }
            other => panic!("expected missing template, got {other:?}"),
        }
    }

    #[test]
    fn test_variables_layering_on_extend() {
        let fixture = Fixture::new(&[
            ("page", "{% let a = \"base\" %}{% let b = \"base\" %}{% begin x %}{% end %}"),
            ("child", "{% let a = \"child\" %}{% extend \"page\" %}"),
        ]);
        let cx = fixture.context(false);
        let mut child = Template::new(PathBuf::from("child"), Variables::new(), &cx);
        child.prepare().unwrap();
        assert_eq!(child.variable("a"), Some(&json!("child")));
        assert_eq!(child.variable("b"), Some(&json!("base")));
    }

    #[test]
    fn test_extend_cycle() {
        let fixture = Fixture::new(&[
            ("a", "{% extend \"b\" %}"),
            ("b", "{% extend \"a\" %}"),
        ]);
        let err = render(&fixture, "a").unwrap_err();
        match err {
            RenderError::ExtendCycle { chain } => {
                let chain: Vec<_> = chain.iter().map(|p| p.display().to_string()).collect();
                assert_eq!(chain, vec!["a", "b", "a"]);
            }
            other => panic!("expected extend cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_self_extend_is_cycle() {
        let fixture = Fixture::new(&[("a", "{% extend \"a\" %}")]);
        assert!(matches!(
            render(&fixture, "a"),
            Err(RenderError::ExtendCycle { .. })
        ));
    }

    #[test]
    fn test_block_type_mismatch() {
        let fixture = Fixture::new(&[
            ("page", "{% begin x %}1{% end %}"),
            ("child", "{% extend \"page\" %}{% markdown x %}2{% end %}"),
        ]);
        let err = render(&fixture, "child").unwrap_err();
        match &err {
            RenderError::BlockTypeMismatch {
                path,
                block,
                existing,
                conflicting,
            } => {
                assert_eq!(path, Path::new("child"));
                assert_eq!(block, "x");
                assert_eq!(*existing, "plain");
                assert_eq!(*conflicting, "markdown");
            }
            other => panic!("expected mismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_unbalanced_and_unclosed_blocks() {
        let fixture = Fixture::new(&[
            ("extra_end", "x{% end %}"),
            ("unclosed", "{% begin x %}1"),
        ]);
        assert!(matches!(
            render(&fixture, "extra_end"),
            Err(RenderError::UnbalancedEnd { .. })
        ));
        assert!(matches!(
            render(&fixture, "unclosed"),
            Err(RenderError::UnclosedBlock { ref block, .. }) if block == "x"
        ));
    }

    #[test]
    fn test_reserved_root_name() {
        let fixture = Fixture::new(&[("page", "{% begin \".\" %}{% end %}")]);
        assert!(matches!(
            render(&fixture, "page"),
            Err(RenderError::ReservedBlockName { .. })
        ));
    }

    #[test]
    fn test_include_nesting_limit() {
        let fixture = Fixture::new(&[("loop", "{% include \"loop\" %}")]);
        assert!(matches!(
            render(&fixture, "loop"),
            Err(RenderError::NestingTooDeep { limit: 8, .. })
        ));
    }

    #[test]
    fn test_cache_mode_option() {
        let fixture = Fixture::new(&[
            ("dynamic", "{% opt cachemode \"dynamic\" %}"),
            ("bogus", "{% opt cachemode \"sometimes\" %}"),
            ("unknown", "{% opt colour \"red\" %}"),
        ]);
        let cx = fixture.context(false);
        let mut template = Template::new(PathBuf::from("dynamic"), Variables::new(), &cx);
        template.render().unwrap();
        assert_eq!(template.cache_mode(), CacheMode::Dynamic);

        assert!(matches!(
            render(&fixture, "bogus"),
            Err(RenderError::InvalidCacheMode { .. })
        ));
        assert!(matches!(
            render(&fixture, "unknown"),
            Err(RenderError::InvalidOption { .. })
        ));
    }

    #[test]
    fn test_include_folds_cache_mode() {
        let fixture = Fixture::new(&[
            ("page", "[{% include \"widget\" %}]"),
            ("widget", "{% opt cachemode \"disabled\" %}w"),
        ]);
        let cx = fixture.context(false);
        let mut page = Template::new(PathBuf::from("page"), Variables::new(), &cx);
        assert_eq!(page.render().unwrap(), "[w]");
        assert_eq!(page.cache_mode(), CacheMode::Disabled);
    }

    #[test]
    fn test_cacheable_block_requires_cache() {
        let fixture = Fixture::new(&[("page", "{% cache side %}s{% end %}")]);
        let cx = fixture.context(false);
        let mut page = Template::new(PathBuf::from("page"), Variables::new(), &cx);
        assert!(matches!(
            page.render(),
            Err(RenderError::CacheUnavailable { .. })
        ));
    }
}
