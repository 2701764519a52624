//! Placeholder tokens that splice a child block's output into its parent's content
//!
//! A token wraps a [`BlockId`] in delimiters that contain characters outside
//! the id's hex alphabet, so a token can always be told apart from the id
//! itself and from ordinary template text.

use std::collections::HashMap;
use std::ops::Range;

use super::BlockId;

/// Opening delimiter of a placeholder token
pub const OPEN: &str = "{{#";
/// Closing delimiter of a placeholder token
pub const CLOSE: &str = "#}}";

/// Encode a block id as an in-text placeholder token
pub fn encode(id: &BlockId) -> String {
    format!("{OPEN}{id}{CLOSE}")
}

/// Decode a complete placeholder token back into a block id
pub fn decode(token: &str) -> Option<BlockId> {
    token
        .strip_prefix(OPEN)
        .and_then(|rest| rest.strip_suffix(CLOSE))
        .and_then(BlockId::parse)
}

/// Find the first well-formed token at or after byte offset `from`
///
/// Returns the byte range of the whole token and the id it carries.
/// Text that merely starts like a token is skipped.
pub fn find(content: &str, from: usize) -> Option<(Range<usize>, BlockId)> {
    let mut cursor = from;
    while let Some(rel) = content.get(cursor..)?.find(OPEN) {
        let start = cursor + rel;
        let id_start = start + OPEN.len();
        let id_end = id_start + BlockId::LEN;
        let id = content.get(id_start..id_end).and_then(BlockId::parse);
        let closed = content
            .get(id_end..)
            .is_some_and(|rest| rest.starts_with(CLOSE));
        if let (Some(id), true) = (id, closed) {
            return Some((start..id_end + CLOSE.len(), id));
        }
        cursor = start + 1;
    }
    None
}

/// Replace every token whose id appears in `replacements` with the mapped text
///
/// A single left-to-right pass: inserted text is never scanned again, and
/// tokens without a replacement are left verbatim.
pub fn substitute(content: &str, replacements: &HashMap<&str, String>) -> String {
    let mut out = String::with_capacity(content.len());
    let mut pos = 0;
    while let Some((range, id)) = find(content, pos) {
        out.push_str(&content[pos..range.start]);
        match replacements.get(id.as_str()) {
            Some(text) => out.push_str(text),
            None => out.push_str(&content[range.clone()]),
        }
        pos = range.end;
    }
    out.push_str(&content[pos..]);
    out
}
