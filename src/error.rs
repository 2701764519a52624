//! Error types for rendering and template parsing

use std::path::PathBuf;

use ariadne::{Color, Label, Report, ReportKind, Source};
use thiserror::Error;

use crate::deferred::FragmentError;
use crate::syntax::lexer::Token;

/// Byte range in source text
pub type Span = std::ops::Range<usize>;

/// Errors raised while resolving, executing or rendering templates
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("template not found: '{name}'{}", requested_by(.from))]
    TemplateNotFound {
        name: String,
        /// Template whose extend or include asked for it
        from: Option<PathBuf>,
    },

    #[error("unable to read template {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("syntax errors in {}: {}", .path.display(), format_syntax_errors(.errors))]
    Syntax {
        path: PathBuf,
        /// Template source, kept for reporting
        text: String,
        errors: Vec<SyntaxError>,
    },

    #[error(
        "{}: block '{block}' is declared as {existing} and cannot be overridden as {conflicting}",
        .path.display()
    )]
    BlockTypeMismatch {
        path: PathBuf,
        block: String,
        existing: &'static str,
        conflicting: &'static str,
    },

    #[error("extend cycle: {}", format_chain(.chain))]
    ExtendCycle { chain: Vec<PathBuf> },

    #[error("invalid cache mode '{value}' (expected static, dynamic or disabled)")]
    InvalidCacheMode { value: String },

    #[error("{}: unknown option '{option}'", .path.display())]
    InvalidOption { path: PathBuf, option: String },

    #[error("{}: block name '{name}' is reserved", .path.display())]
    ReservedBlockName { path: PathBuf, name: String },

    #[error("{}: 'end' without an open block", .path.display())]
    UnbalancedEnd { path: PathBuf },

    #[error("{}: block '{block}' is never closed", .path.display())]
    UnclosedBlock { path: PathBuf, block: String },

    #[error("{}: cannot extend from inside a block", .path.display())]
    ExtendInsideBlock { path: PathBuf },

    #[error("{}: undefined variable '{name}'", .path.display())]
    UndefinedVariable { path: PathBuf, name: String },

    #[error("{}: invalid argument to '{directive}': {message}", .path.display())]
    InvalidArgument {
        path: PathBuf,
        directive: &'static str,
        message: String,
    },

    #[error("{}: no cache is configured", .path.display())]
    CacheUnavailable { path: PathBuf },

    #[error("{}: the {extension} extension is not enabled", .path.display())]
    ExtensionDisabled {
        path: PathBuf,
        extension: &'static str,
    },

    #[error("{}: template nesting exceeds {limit} levels", .path.display())]
    NestingTooDeep { path: PathBuf, limit: usize },

    #[error(transparent)]
    Fragment(#[from] FragmentError),
}

impl RenderError {
    /// Human readable report; syntax errors are drawn against their source
    pub fn report(&self) -> String {
        match self {
            RenderError::Syntax { path, text, errors } => {
                let filename = path.display().to_string();
                errors
                    .iter()
                    .map(|e| e.format(text, &filename))
                    .collect::<Vec<_>>()
                    .join("\n")
            }
            other => other.to_string(),
        }
    }
}

fn format_syntax_errors(errors: &[SyntaxError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

fn requested_by(from: &Option<PathBuf>) -> String {
    match from {
        Some(path) => format!(" (requested by {})", path.display()),
        None => String::new(),
    }
}

fn format_chain(chain: &[PathBuf]) -> String {
    chain
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// A parse error in template directive syntax
#[derive(Error, Debug, Clone, PartialEq)]
#[error("syntax error at {span:?}: {message}")]
pub struct SyntaxError {
    pub span: Span,
    pub message: String,
    pub expected: Vec<String>,
}

impl SyntaxError {
    pub fn new(span: Span, message: impl Into<String>) -> Self {
        Self {
            span,
            message: message.into(),
            expected: Vec::new(),
        }
    }

    /// Format the error with source context using ariadne
    pub fn format(&self, source: &str, filename: &str) -> String {
        let expected_str = if self.expected.is_empty() {
            String::new()
        } else {
            format!("\nExpected: {}", self.expected.join(", "))
        };

        let mut buf = Vec::new();
        let written = Report::build(ReportKind::Error, filename, self.span.start)
            .with_message(&self.message)
            .with_label(
                Label::new((filename, self.span.clone()))
                    .with_message(format!("{}{}", self.message, expected_str))
                    .with_color(Color::Red),
            )
            .finish()
            .write((filename, Source::from(source)), &mut buf)
            .ok();

        match written {
            Some(()) => String::from_utf8_lossy(&buf).into_owned(),
            None => self.to_string(),
        }
    }
}

impl<'a> From<chumsky::error::Rich<'a, Token>> for SyntaxError {
    fn from(err: chumsky::error::Rich<'a, Token>) -> Self {
        use chumsky::error::{RichPattern, RichReason};

        let message = match err.reason() {
            RichReason::ExpectedFound { found, .. } => {
                let found_str = match found {
                    Some(tok) => format_token(tok),
                    None => "end of tag".to_string(),
                };
                format!("Unexpected {}", found_str)
            }
            RichReason::Custom(msg) => msg.to_string(),
            #[allow(unreachable_patterns)]
            _ => "invalid syntax".to_string(),
        };

        let expected: Vec<String> = err
            .expected()
            .filter_map(|e| match e {
                RichPattern::Token(tok) => Some(format_token(tok)),
                RichPattern::Label(label) => Some(label.to_string()),
                RichPattern::EndOfInput => Some("end of tag".to_string()),
                #[allow(unreachable_patterns)]
                _ => None,
            })
            .collect();

        SyntaxError {
            span: err.span().into_range(),
            message,
            expected,
        }
    }
}

/// Format a token for human-readable error messages
fn format_token(tok: &Token) -> String {
    match tok {
        Token::Ident(s) => format!("identifier '{}'", s),
        Token::String(s) => format!("string \"{}\"", s),
        Token::Integer(n) => format!("number {}", n),
        Token::Equals => "'='".to_string(),
        Token::Comma => "','".to_string(),
        Token::Dot => "'.'".to_string(),
        keyword => match keyword.keyword() {
            Some(word) => format!("keyword '{}'", word),
            None => format!("{:?}", keyword),
        },
    }
}
