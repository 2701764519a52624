//! Strata - a block-inheritance template engine
//!
//! Templates declare named blocks; a template may extend another and
//! override, prepend to or append to the blocks it inherits. Rendered output
//! can be cached whole, per block, or in a compiled form whose deferred
//! fragments are evaluated on every request.
//!
//! # Example
//!
//! ```rust
//! use strata::render;
//!
//! let html = render("A{% begin x %}1{% end %}B", Default::default()).unwrap();
//! assert_eq!(html, "A1B");
//! ```

pub mod block;
pub mod cache;
pub mod config;
pub mod deferred;
pub mod engine;
pub mod error;
pub mod plugin;
pub mod syntax;
pub mod template;

pub use block::{ApplyMode, Block, BlockId, BlockKind};
pub use cache::{Cache, CacheError, CacheMode, FileCache, MemoryCache};
pub use config::{ConfigError, EngineConfig};
pub use deferred::{FragmentCall, FragmentError, FragmentRegistry};
pub use engine::Engine;
pub use error::{RenderError, SyntaxError};
pub use plugin::{CachePlugin, MarkdownPlugin, Plugin};
pub use syntax::DirectiveExecutor;
pub use template::{FileLoader, Loader, MemoryLoader, Template, TemplateId, Variables};

/// Render a single template source with default settings and no cache
///
/// # Example
///
/// ```rust
/// use serde_json::json;
/// use strata::{render, Variables};
///
/// let mut vars = Variables::new();
/// vars.insert("name".into(), json!("Ada"));
/// assert_eq!(render("Hi {{ name }}", vars).unwrap(), "Hi Ada");
/// ```
pub fn render(source: &str, vars: Variables) -> Result<String, RenderError> {
    const NAME: &str = "main";
    let engine = Engine::new().with_loader(MemoryLoader::new().with_template(NAME, source));
    engine.render(NAME, vars, &[], false)
}
