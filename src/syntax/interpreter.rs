//! Executes parsed template source against a [`Template`]

use std::time::Duration;

use serde_json::Value;

use super::ast::{Bindings, Directive, Expr, Node, Spanned};
use crate::block::BlockKind;
use crate::deferred;
use crate::error::RenderError;
use crate::template::{display_value, Executor, Template, Variables};

/// The executor for the built-in directive language
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectiveExecutor;

impl Executor for DirectiveExecutor {
    fn execute(&self, source: &str, template: &mut Template<'_>) -> Result<(), RenderError> {
        let nodes = super::parse(source).map_err(|errors| RenderError::Syntax {
            path: template.path().to_path_buf(),
            text: source.to_string(),
            errors,
        })?;

        for node in &nodes {
            match node {
                Node::Text(text) => template.write(text),
                Node::Print(expr) => {
                    let value = eval(expr, template)?;
                    template.write(&deferred::escape(&display_value(&value))?);
                }
                Node::Directive(directive) => run(&directive.node, template)?,
            }
        }
        Ok(())
    }
}

fn run(directive: &Directive, template: &mut Template<'_>) -> Result<(), RenderError> {
    let keyword = directive.keyword();
    match directive {
        Directive::Begin(name) => template.begin(name),
        Directive::Prepend(name) => template.prepend(name),
        Directive::Append(name) => template.append(name),
        Directive::End => template.end(),
        Directive::Cache { name, ttl } => {
            let ttl = ttl_or_default(ttl.as_ref(), keyword, template)?;
            template.add_block(name, BlockKind::Cacheable { ttl })
        }
        Directive::Markdown(name) => template.add_block(name, BlockKind::Markdown),
        Directive::Extend(name) => {
            let name = template_name(name, keyword, template)?;
            template.extend(&name)
        }
        Directive::Include { name, with } => {
            let name = template_name(name, keyword, template)?;
            let vars = bindings(with, template)?;
            let output = template.include(&name, vars)?;
            template.write(&output);
            Ok(())
        }
        Directive::CachedInclude { name, ttl, with } => {
            let name = template_name(name, keyword, template)?;
            let ttl = ttl_or_default(ttl.as_ref(), keyword, template)?;
            let vars = bindings(with, template)?;
            let output = template.cached_include(&name, vars, ttl)?;
            template.write(&output);
            Ok(())
        }
        Directive::Let { name, value } => {
            let value = eval(value, template)?;
            template.set_variable(name.clone(), value);
            Ok(())
        }
        Directive::Opt { name, value } => {
            let value = eval(value, template)?;
            template.set_option(name, &value)
        }
        Directive::Content(name) => {
            let output = template.content(name);
            template.write(&output);
            Ok(())
        }
        Directive::Parent => {
            let output = template.parent();
            template.write(&output);
            Ok(())
        }
        Directive::Defer { op, args } => {
            let args = args
                .iter()
                .map(|arg| eval(arg, template))
                .collect::<Result<Vec<_>, _>>()?;
            let tag = template.defer(op, args)?;
            template.write(&tag);
            Ok(())
        }
        Directive::CachedFetch { source, ttl } => {
            let source = match eval(source, template)? {
                Value::String(source) => source,
                other => {
                    return Err(RenderError::InvalidArgument {
                        path: template.path().to_path_buf(),
                        directive: keyword,
                        message: format!("source must be a string, got {other}"),
                    })
                }
            };
            let ttl = ttl_or_default(ttl.as_ref(), keyword, template)?;
            let content = template.cached_fetch(&source, ttl)?;
            template.write(&deferred::escape(&content)?);
            Ok(())
        }
        Directive::Md(expr) => {
            let text = display_value(&eval(expr, template)?);
            let html = template.markdown(&text)?;
            template.write(&deferred::escape(&html)?);
            Ok(())
        }
    }
}

fn eval(expr: &Spanned<Expr>, template: &Template<'_>) -> Result<Value, RenderError> {
    match &expr.node {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Variable(path) => lookup(path, template).cloned().ok_or_else(|| {
            RenderError::UndefinedVariable {
                path: template.path().to_path_buf(),
                name: path.join("."),
            }
        }),
    }
}

fn lookup<'t>(path: &[String], template: &'t Template<'_>) -> Option<&'t Value> {
    let (first, rest) = path.split_first()?;
    rest.iter()
        .try_fold(template.variable(first)?, |value, key| match value {
            Value::Object(map) => map.get(key),
            Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
}

fn template_name(
    expr: &Spanned<Expr>,
    directive: &'static str,
    template: &Template<'_>,
) -> Result<String, RenderError> {
    match eval(expr, template)? {
        Value::String(name) => Ok(name),
        other => Err(RenderError::InvalidArgument {
            path: template.path().to_path_buf(),
            directive,
            message: format!("template name must be a string, got {other}"),
        }),
    }
}

fn ttl_or_default(
    expr: Option<&Spanned<Expr>>,
    directive: &'static str,
    template: &Template<'_>,
) -> Result<Duration, RenderError> {
    let Some(expr) = expr else {
        return Ok(template.default_ttl());
    };
    let value = eval(expr, template)?;
    match value.as_u64() {
        Some(secs) => Ok(Duration::from_secs(secs)),
        None => Err(RenderError::InvalidArgument {
            path: template.path().to_path_buf(),
            directive,
            message: format!("ttl must be a non-negative number of seconds, got {value}"),
        }),
    }
}

fn bindings(with: &Bindings, template: &Template<'_>) -> Result<Variables, RenderError> {
    with.iter()
        .map(|(name, expr)| Ok((name.clone(), eval(expr, template)?)))
        .collect()
}
