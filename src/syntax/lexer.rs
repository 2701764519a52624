//! Lexer for directive and expression tag bodies using logos

use logos::Logos;

use crate::error::{Span, SyntaxError};

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\n\r]+")]
pub enum Token {
    // Block directives
    #[token("begin")]
    Begin,
    #[token("prepend")]
    Prepend,
    #[token("append")]
    Append,
    #[token("end")]
    End,
    #[token("cache")]
    Cache,
    #[token("markdown")]
    Markdown,

    // Composition
    #[token("extend")]
    Extend,
    #[token("include")]
    Include,
    #[token("cinclude")]
    CachedInclude,
    #[token("with")]
    With,

    // Bindings and options
    #[token("let")]
    Let,
    #[token("opt")]
    Opt,

    // Output
    #[token("content")]
    Content,
    #[token("parent")]
    Parent,
    #[token("defer")]
    Defer,
    #[token("cfetch")]
    CachedFetch,
    #[token("md")]
    Md,

    #[token("true")]
    True,
    #[token("false")]
    False,

    #[token("=")]
    Equals,
    #[token(",")]
    Comma,
    #[token(".")]
    Dot,

    // Literals - identifiers must come after keywords
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_-]*", |lex| lex.slice().to_string(), priority = 1)]
    Ident(String),

    #[regex(r#""([^"\\]|\\.)*""#, |lex| unescape(&lex.slice()[1..lex.slice().len() - 1]))]
    String(String),

    #[regex(r"-?[0-9]+", |lex| lex.slice().parse::<i64>().ok())]
    Integer(i64),
}

impl Token {
    /// Source text of a keyword token
    pub fn keyword(&self) -> Option<&'static str> {
        let word = match self {
            Token::Begin => "begin",
            Token::Prepend => "prepend",
            Token::Append => "append",
            Token::End => "end",
            Token::Cache => "cache",
            Token::Markdown => "markdown",
            Token::Extend => "extend",
            Token::Include => "include",
            Token::CachedInclude => "cinclude",
            Token::With => "with",
            Token::Let => "let",
            Token::Opt => "opt",
            Token::Content => "content",
            Token::Parent => "parent",
            Token::Defer => "defer",
            Token::CachedFetch => "cfetch",
            Token::Md => "md",
            Token::True => "true",
            Token::False => "false",
            _ => return None,
        };
        Some(word)
    }
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

/// Lex a tag body, shifting spans by `offset` so they point into the template source
pub fn lex(input: &str, offset: usize) -> Result<Vec<(Token, Span)>, Vec<SyntaxError>> {
    let mut tokens = Vec::new();
    let mut errors = Vec::new();
    for (tok, span) in Token::lexer(input).spanned() {
        let span = span.start + offset..span.end + offset;
        match tok {
            Ok(tok) => tokens.push((tok, span)),
            Err(()) => {
                let text = input
                    .get(span.start - offset..span.end - offset)
                    .unwrap_or_default();
                errors.push(SyntaxError::new(span, format!("Unexpected character(s) '{}'", text)));
            }
        }
    }
    if errors.is_empty() {
        Ok(tokens)
    } else {
        Err(errors)
    }
}
