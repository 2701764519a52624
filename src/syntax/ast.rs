//! AST types for template source

use serde_json::Value;

use crate::error::Span;

/// A node with its location in the template source
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned<T> {
    pub node: T,
    pub span: Span,
}

impl<T> Spanned<T> {
    pub fn new(node: T, span: Span) -> Self {
        Self { node, span }
    }
}

/// Value expression
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    /// Dotted variable path, e.g. `user.name`
    Variable(Vec<String>),
}

/// `name = expr` pairs of a `with` clause
pub type Bindings = Vec<(String, Spanned<Expr>)>;

#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    Begin(String),
    Prepend(String),
    Append(String),
    End,
    /// Cacheable block with an optional ttl in seconds
    Cache {
        name: String,
        ttl: Option<Spanned<Expr>>,
    },
    Markdown(String),
    Extend(Spanned<Expr>),
    Include {
        name: Spanned<Expr>,
        with: Bindings,
    },
    CachedInclude {
        name: Spanned<Expr>,
        ttl: Option<Spanned<Expr>>,
        with: Bindings,
    },
    Let {
        name: String,
        value: Spanned<Expr>,
    },
    Opt {
        name: String,
        value: Spanned<Expr>,
    },
    Content(String),
    Parent,
    Defer {
        op: String,
        args: Vec<Spanned<Expr>>,
    },
    /// Cached read of an external resource, with an optional ttl in seconds
    CachedFetch {
        source: Spanned<Expr>,
        ttl: Option<Spanned<Expr>>,
    },
    /// Inline Markdown conversion of an expression
    Md(Spanned<Expr>),
}

impl Directive {
    /// Keyword that introduces the directive
    pub fn keyword(&self) -> &'static str {
        match self {
            Directive::Begin(_) => "begin",
            Directive::Prepend(_) => "prepend",
            Directive::Append(_) => "append",
            Directive::End => "end",
            Directive::Cache { .. } => "cache",
            Directive::Markdown(_) => "markdown",
            Directive::Extend(_) => "extend",
            Directive::Include { .. } => "include",
            Directive::CachedInclude { .. } => "cinclude",
            Directive::Let { .. } => "let",
            Directive::Opt { .. } => "opt",
            Directive::Content(_) => "content",
            Directive::Parent => "parent",
            Directive::Defer { .. } => "defer",
            Directive::CachedFetch { .. } => "cfetch",
            Directive::Md(_) => "md",
        }
    }
}

/// One piece of template source
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// Literal output
    Text(String),
    /// `{{ expr }}`
    Print(Spanned<Expr>),
    /// `{% directive %}`
    Directive(Spanned<Directive>),
}
