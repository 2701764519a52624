//! Block tree model
//!
//! A template's output is assembled from named blocks arranged in a tree.
//! Each block accumulates raw text that may contain placeholder tokens for
//! its children; rendering splices the children's output into those tokens.
//!
//! # Example
//!
//! ```text
//! A{% begin title %}Hello{% end %}B
//! ```
//!
//! produces a root block with content `A{{#<id>#}}B` and one child block
//! `title` with content `Hello`.

pub mod placeholder;
mod registry;

pub use registry::{BlockHandle, BlockRegistry, ROOT_NAME};
pub(crate) use registry::markdown_to_html;

use std::fmt;
use std::time::Duration;

use sha2::{Digest, Sha256};

use crate::template::TemplateId;

/// Hex-encoded SHA-256 over the concatenation of `parts`
pub(crate) fn hex_digest(parts: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    format!("{:x}", hasher.finalize())
}

/// Deterministic block identity, derived from the owning template and the block name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(String);

impl BlockId {
    /// Length of an id in hex characters
    pub const LEN: usize = 64;

    /// Derive the id of block `name` declared by template `owner`
    pub fn derive(owner: &TemplateId, name: &str) -> Self {
        Self(hex_digest(&[owner.as_str().as_bytes(), name.as_bytes()]))
    }

    /// Parse an id from its textual form, rejecting anything that is not 64 lowercase hex digits
    pub fn parse(s: &str) -> Option<Self> {
        let valid = s.len() == Self::LEN
            && s
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        valid.then(|| Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How newly captured content merges with a block's existing content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ApplyMode {
    /// Discard existing content
    #[default]
    Replace,
    /// Place new content before existing content
    Prepend,
    /// Place new content after existing content
    Append,
}

/// The closed set of block kinds
///
/// Overriding a registered block with an explicit kind must use the same kind
/// (see [`BlockKind::same_kind`]); the ttl of a cacheable block is not part of
/// its kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockKind {
    /// Ordinary block
    Plain,
    /// Rendered output is memoized in the cache under the block id
    Cacheable { ttl: Duration },
    /// Own content is converted from Markdown to HTML before children are spliced in
    Markdown,
}

impl BlockKind {
    /// Short name used in diagnostics
    pub fn name(&self) -> &'static str {
        match self {
            BlockKind::Plain => "plain",
            BlockKind::Cacheable { .. } => "cacheable",
            BlockKind::Markdown => "markdown",
        }
    }

    /// Whether two kinds are the same variant
    pub fn same_kind(&self, other: &BlockKind) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

impl fmt::Display for BlockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A node in a template's block tree
#[derive(Debug, Clone)]
pub struct Block {
    id: BlockId,
    name: String,
    kind: BlockKind,
    mode: ApplyMode,
    content: String,
    children: Vec<BlockHandle>,
    parent: Option<BlockHandle>,
    extended: bool,
}

impl Block {
    pub(crate) fn new(
        owner: &TemplateId,
        name: &str,
        kind: BlockKind,
        parent: Option<BlockHandle>,
    ) -> Self {
        Self {
            id: BlockId::derive(owner, name),
            name: name.to_string(),
            kind,
            mode: ApplyMode::Replace,
            content: String::new(),
            children: Vec::new(),
            parent,
            extended: false,
        }
    }

    pub fn id(&self) -> &BlockId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &BlockKind {
        &self.kind
    }

    pub fn mode(&self) -> ApplyMode {
        self.mode
    }

    /// Raw content, still containing child placeholder tokens
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Children in declaration order
    pub fn children(&self) -> &[BlockHandle] {
        &self.children
    }

    pub fn parent(&self) -> Option<BlockHandle> {
        self.parent
    }

    /// True once a later declaration (an override or an extending template) has claimed this block
    pub fn is_extended(&self) -> bool {
        self.extended
    }

    pub fn set_extended(&mut self, extended: bool) {
        self.extended = extended;
    }

    pub fn set_mode(&mut self, mode: ApplyMode) {
        self.mode = mode;
    }

    /// Merge `text` into the stored content according to the current apply mode
    pub fn set_content(&mut self, text: &str) {
        match self.mode {
            ApplyMode::Replace => self.content = text.to_string(),
            ApplyMode::Prepend => self.content.insert_str(0, text),
            ApplyMode::Append => self.content.push_str(text),
        }
    }

    pub(crate) fn add_child(&mut self, child: BlockHandle) {
        self.children.push(child);
    }
}
