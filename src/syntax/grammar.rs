//! Tag body parsers using chumsky

use chumsky::input::{Stream, ValueInput};
use chumsky::prelude::*;
use serde_json::Value;

use crate::error::SyntaxError;
use crate::syntax::ast::*;
use crate::syntax::lexer::{self, Token};

/// Parse the body of a `{% ... %}` tag starting at `offset` in the template source
pub fn parse_directive(body: &str, offset: usize) -> Result<Spanned<Directive>, Vec<SyntaxError>> {
    let end_of_tag = offset + body.len();
    let tokens = lexer::lex(body, offset)?
        .into_iter()
        .map(|(tok, span)| (tok, span.into()));

    let token_stream = Stream::from_iter(tokens)
        .map((end_of_tag..end_of_tag).into(), |(t, s): (_, _)| (t, s));

    directive_parser()
        .then_ignore(end())
        .parse(token_stream)
        .into_result()
        .map_err(|errs| errs.into_iter().map(|e| e.into()).collect())
}

/// Parse the body of a `{{ ... }}` tag starting at `offset` in the template source
pub fn parse_expr(body: &str, offset: usize) -> Result<Spanned<Expr>, Vec<SyntaxError>> {
    let end_of_tag = offset + body.len();
    let tokens = lexer::lex(body, offset)?
        .into_iter()
        .map(|(tok, span)| (tok, span.into()));

    let token_stream = Stream::from_iter(tokens)
        .map((end_of_tag..end_of_tag).into(), |(t, s): (_, _)| (t, s));

    expr_parser()
        .then_ignore(end())
        .parse(token_stream)
        .into_result()
        .map_err(|errs| errs.into_iter().map(|e| e.into()).collect())
}

/// Helper to extract span range from chumsky's MapExtra
fn span_range(e: &impl chumsky::span::Span<Offset = usize>) -> std::ops::Range<usize> {
    e.start()..e.end()
}

fn expr_parser<'a, I>() -> impl Parser<'a, I, Spanned<Expr>, extra::Err<Rich<'a, Token>>> + Clone
where
    I: ValueInput<'a, Token = Token, Span = SimpleSpan>,
{
    let literal = select! {
        Token::String(s) => Value::String(s),
        Token::Integer(n) => Value::from(n),
        Token::True => Value::Bool(true),
        Token::False => Value::Bool(false),
    }
    .map(Expr::Literal);

    // Segments after the first may be array indices: `items.0.name`
    let segment = select! {
        Token::Ident(s) => s,
        Token::Integer(n) if n >= 0 => n.to_string(),
    };

    let variable = select! { Token::Ident(s) => s }
        .then(
            just(Token::Dot)
                .ignore_then(segment)
                .repeated()
                .collect::<Vec<_>>(),
        )
        .map(|(first, rest)| {
            let mut path = vec![first];
            path.extend(rest);
            Expr::Variable(path)
        });

    choice((literal, variable)).map_with(|expr, e| Spanned::new(expr, span_range(&e.span())))
}

fn directive_parser<'a, I>(
) -> impl Parser<'a, I, Spanned<Directive>, extra::Err<Rich<'a, Token>>> + Clone
where
    I: ValueInput<'a, Token = Token, Span = SimpleSpan>,
{
    let ident = select! { Token::Ident(s) => s };

    // Block names may be quoted to use keywords or the reserved root name
    let block_name = select! {
        Token::Ident(s) => s,
        Token::String(s) => s,
    };

    let expr = expr_parser();

    let with_clause = just(Token::With)
        .ignore_then(
            ident
                .clone()
                .then_ignore(just(Token::Equals))
                .then(expr.clone())
                .separated_by(just(Token::Comma))
                .at_least(1)
                .collect::<Vec<_>>(),
        )
        .or_not()
        .map(Option::unwrap_or_default);

    let blocks = choice((
        just(Token::Begin)
            .ignore_then(block_name.clone())
            .map(Directive::Begin),
        just(Token::Prepend)
            .ignore_then(block_name.clone())
            .map(Directive::Prepend),
        just(Token::Append)
            .ignore_then(block_name.clone())
            .map(Directive::Append),
        just(Token::End).to(Directive::End),
        just(Token::Cache)
            .ignore_then(block_name.clone())
            .then(expr.clone().or_not())
            .map(|(name, ttl)| Directive::Cache { name, ttl }),
        just(Token::Markdown)
            .ignore_then(block_name.clone())
            .map(Directive::Markdown),
    ));

    let composition = choice((
        just(Token::Extend)
            .ignore_then(expr.clone())
            .map(Directive::Extend),
        just(Token::Include)
            .ignore_then(expr.clone())
            .then(with_clause.clone())
            .map(|(name, with)| Directive::Include { name, with }),
        just(Token::CachedInclude)
            .ignore_then(expr.clone())
            .then(expr.clone().or_not())
            .then(with_clause)
            .map(|((name, ttl), with)| Directive::CachedInclude { name, ttl, with }),
    ));

    let other = choice((
        just(Token::Let)
            .ignore_then(ident.clone())
            .then_ignore(just(Token::Equals))
            .then(expr.clone())
            .map(|(name, value)| Directive::Let { name, value }),
        just(Token::Opt)
            .ignore_then(ident.clone())
            .then(expr.clone())
            .map(|(name, value)| Directive::Opt { name, value }),
        just(Token::Content)
            .ignore_then(block_name)
            .map(Directive::Content),
        just(Token::Parent).to(Directive::Parent),
        just(Token::Defer)
            .ignore_then(ident)
            .then(expr.clone().repeated().collect::<Vec<_>>())
            .map(|(op, args)| Directive::Defer { op, args }),
        just(Token::CachedFetch)
            .ignore_then(expr.clone())
            .then(expr.clone().or_not())
            .map(|(source, ttl)| Directive::CachedFetch { source, ttl }),
        just(Token::Md).ignore_then(expr).map(Directive::Md),
    ));

    choice((blocks, composition, other))
        .map_with(|directive, e| Spanned::new(directive, span_range(&e.span())))
}
