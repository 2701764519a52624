//! Block registry: owns a template's block tree and indexes it by name

use std::borrow::Cow;
use std::collections::HashMap;
use std::time::Duration;

use pulldown_cmark::{html, Options, Parser};

use super::placeholder;
use super::{Block, BlockKind};
use crate::cache::Cache;
use crate::template::TemplateId;

/// Reserved name of a template's implicit root block
pub const ROOT_NAME: &str = ".";

/// Handle to a block stored in a [`BlockRegistry`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockHandle(usize);

/// Arena of blocks forming one tree, plus a flat name index into it
///
/// Tree edges and the index both point at the same arena slots, so a block
/// looked up by name is the very block spliced into its parent.
#[derive(Debug, Clone)]
pub struct BlockRegistry {
    blocks: Vec<Block>,
    index: HashMap<String, BlockHandle>,
    root: BlockHandle,
}

impl BlockRegistry {
    /// Create a registry holding only the root block of `owner`
    pub fn new(owner: &TemplateId) -> Self {
        let root = BlockHandle(0);
        let mut index = HashMap::new();
        index.insert(ROOT_NAME.to_string(), root);
        Self {
            blocks: vec![Block::new(owner, ROOT_NAME, BlockKind::Plain, None)],
            index,
            root,
        }
    }

    pub fn root(&self) -> BlockHandle {
        self.root
    }

    /// Look up a block by name
    pub fn get(&self, name: &str) -> Option<BlockHandle> {
        self.index.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn block(&self, handle: BlockHandle) -> &Block {
        &self.blocks[handle.0]
    }

    pub fn block_mut(&mut self, handle: BlockHandle) -> &mut Block {
        &mut self.blocks[handle.0]
    }

    /// Number of blocks, root included
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Create block `name` under `parent` and register it
    pub fn create_child(
        &mut self,
        parent: BlockHandle,
        name: &str,
        kind: BlockKind,
        owner: &TemplateId,
    ) -> BlockHandle {
        let handle = BlockHandle(self.blocks.len());
        self.blocks.push(Block::new(owner, name, kind, Some(parent)));
        self.add_child(parent, handle);
        self.index.insert(name.to_string(), handle);
        handle
    }

    /// Append `child` to the ordered children of `parent`
    pub fn add_child(&mut self, parent: BlockHandle, child: BlockHandle) {
        self.blocks[parent.0].add_child(child);
        self.blocks[child.0].parent = Some(parent);
    }

    /// Render a block and, recursively, its children
    ///
    /// Cacheable blocks consult `cache` first and store their output on a
    /// miss. Cache failures are logged and fall back to recomputation.
    pub fn render(&self, handle: BlockHandle, cache: Option<&dyn Cache>) -> String {
        let block = self.block(handle);
        match (&block.kind, cache) {
            (BlockKind::Cacheable { ttl }, Some(cache)) => {
                self.render_cached(handle, *ttl, cache)
            }
            _ => self.render_contents(handle, cache),
        }
    }

    /// Render a block from its current content without reading or writing
    /// any cache entry, for use while the template is still executing
    pub fn render_live(&self, handle: BlockHandle) -> String {
        self.render_contents(handle, None)
    }

    fn render_cached(&self, handle: BlockHandle, ttl: Duration, cache: &dyn Cache) -> String {
        let block = self.block(handle);
        let key = block.id.as_str();

        if cache.has(key) {
            match cache.get(key) {
                Ok(payload) => {
                    tracing::debug!(block = %block.name, "block cache hit");
                    return payload;
                }
                Err(err) => {
                    tracing::warn!(block = %block.name, error = %err, "discarding cached block");
                }
            }
        }

        tracing::debug!(block = %block.name, "block cache miss");
        let output = self.render_contents(handle, Some(cache));
        if let Err(err) = cache.put(key, &output, ttl) {
            tracing::warn!(block = %block.name, error = %err, "failed to cache block");
        }
        output
    }

    fn render_contents(&self, handle: BlockHandle, cache: Option<&dyn Cache>) -> String {
        let block = self.block(handle);
        let content: Cow<'_, str> = match block.kind {
            BlockKind::Markdown => Cow::Owned(markdown_to_html(&block.content)),
            _ => Cow::Borrowed(&block.content),
        };

        if block.children.is_empty() {
            return content.into_owned();
        }

        let rendered: HashMap<&str, String> = block
            .children
            .iter()
            .map(|&child| (self.block(child).id.as_str(), self.render(child, cache)))
            .collect();

        placeholder::substitute(&content, &rendered)
    }
}

pub(crate) fn markdown_to_html(source: &str) -> String {
    let parser = Parser::new_ext(source, Options::all());
    let mut out = String::with_capacity(source.len());
    html::push_html(&mut out, parser);
    out
}
