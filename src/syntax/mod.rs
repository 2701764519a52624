//! Directive language understood by [`DirectiveExecutor`]
//!
//! Template source is literal output interleaved with tags:
//!
//! ```text
//! {% extend "layout" %}
//! {% begin title %}Hello, {{ user.name }}{% end %}
//! {# comments produce no output #}
//! ```

pub mod ast;
mod grammar;
mod interpreter;
pub mod lexer;

pub use ast::*;
pub use grammar::{parse_directive, parse_expr};
pub use interpreter::DirectiveExecutor;

use crate::error::SyntaxError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TagKind {
    Directive,
    Print,
    Comment,
}

impl TagKind {
    const ALL: [(TagKind, &'static str, &'static str); 3] = [
        (TagKind::Directive, "{%", "%}"),
        (TagKind::Print, "{{", "}}"),
        (TagKind::Comment, "{#", "#}"),
    ];
}

/// Split template source into nodes
///
/// Every malformed tag is reported, not just the first one.
pub fn parse(source: &str) -> Result<Vec<Node>, Vec<SyntaxError>> {
    let mut nodes = Vec::new();
    let mut errors = Vec::new();
    let mut pos = 0;

    while pos < source.len() {
        let next = TagKind::ALL
            .iter()
            .filter_map(|&(kind, open, close)| {
                source[pos..].find(open).map(|at| (pos + at, kind, open, close))
            })
            .min_by_key(|&(at, ..)| at);

        let Some((start, kind, open, close)) = next else {
            nodes.push(Node::Text(source[pos..].to_string()));
            break;
        };

        if start > pos {
            nodes.push(Node::Text(source[pos..start].to_string()));
        }

        let body_start = start + open.len();
        let Some(len) = source[body_start..].find(close) else {
            errors.push(SyntaxError::new(start..source.len(), "unterminated tag"));
            break;
        };
        let body = &source[body_start..body_start + len];

        match kind {
            TagKind::Directive => match parse_directive(body, body_start) {
                Ok(directive) => nodes.push(Node::Directive(directive)),
                Err(errs) => errors.extend(errs),
            },
            TagKind::Print => match parse_expr(body, body_start) {
                Ok(expr) => nodes.push(Node::Print(expr)),
                Err(errs) => errors.extend(errs),
            },
            TagKind::Comment => {}
        }

        pos = body_start + len + close.len();
    }

    if errors.is_empty() {
        Ok(nodes)
    } else {
        Err(errors)
    }
}
