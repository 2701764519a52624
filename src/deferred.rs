//! Deferred fragments
//!
//! A deferred fragment is a call that must run on every render, even when the
//! surrounding output comes from the cache. The call is stored in the output
//! as a self-describing tag:
//!
//! ```text
//! {%!eyJvcCI6InRpbWVzdGFtcCIsImFyZ3MiOltdfQ!%}
//! ```
//!
//! The tag body is the URL-safe base64 of the JSON form of a
//! [`FragmentCall`]. Only operations present in a [`FragmentRegistry`] can be
//! encoded or evaluated.
//!
//! Text that is not a tag must never be evaluated as one. Interpolated values
//! and fetched content pass through [`escape`], which turns every literal
//! `{%!` into a tag that resolves back to the same three characters.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::template::{display_value, Variables};

/// Opening delimiter of a fragment tag
pub const OPEN: &str = "{%!";
/// Closing delimiter of a fragment tag
pub const CLOSE: &str = "!%}";

/// Operation that yields its first argument unchanged; always available
const LITERAL_OP: &str = "literal";

#[derive(Debug, Error)]
pub enum FragmentError {
    #[error("unknown fragment operation '{op}'")]
    UnknownOperation { op: String },

    #[error("malformed fragment tag at byte {offset}: {reason}")]
    Malformed { offset: usize, reason: String },

    #[error("fragment operation '{op}' failed: {message}")]
    Failed { op: String, message: String },
}

impl FragmentError {
    /// Failure raised from inside an operation
    pub fn failed(op: &str, message: impl fmt::Display) -> Self {
        Self::Failed {
            op: op.to_string(),
            message: message.to_string(),
        }
    }
}

/// One deferred call: a named operation and its arguments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FragmentCall {
    pub op: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

/// A fragment operation; receives the call arguments and the render variables
pub type FragmentFn =
    dyn Fn(&[Value], &Variables) -> Result<String, FragmentError> + Send + Sync;

/// Closed set of operations that deferred tags may name
#[derive(Clone)]
pub struct FragmentRegistry {
    ops: BTreeMap<String, Arc<FragmentFn>>,
}

impl FragmentRegistry {
    /// A registry with no operations at all
    pub fn empty() -> Self {
        Self {
            ops: BTreeMap::new(),
        }
    }

    /// Register (or replace) operation `op`
    pub fn register<F>(&mut self, op: impl Into<String>, f: F)
    where
        F: Fn(&[Value], &Variables) -> Result<String, FragmentError> + Send + Sync + 'static,
    {
        self.ops.insert(op.into(), Arc::new(f));
    }

    pub fn contains(&self, op: &str) -> bool {
        self.ops.contains_key(op)
    }

    /// Evaluate a single call
    pub fn call(&self, call: &FragmentCall, vars: &Variables) -> Result<String, FragmentError> {
        if call.op == LITERAL_OP {
            return string_arg(LITERAL_OP, &call.args, 0).map(str::to_string);
        }
        let op = self
            .ops
            .get(&call.op)
            .ok_or_else(|| FragmentError::UnknownOperation {
                op: call.op.clone(),
            })?;
        op(&call.args, vars)
    }

    /// Replace every fragment tag in `content` with the output of its call
    ///
    /// Output of a call is not scanned again. An opening delimiter with no
    /// closing one is left as it is.
    pub fn resolve(&self, content: &str, vars: &Variables) -> Result<String, FragmentError> {
        let mut out = String::with_capacity(content.len());
        let mut rest = content;
        let mut consumed = 0;

        while let Some(start) = rest.find(OPEN) {
            let body_start = start + OPEN.len();
            let Some(len) = rest[body_start..].find(CLOSE) else {
                break;
            };
            let call = decode(&rest[body_start..body_start + len])
                .map_err(|reason| FragmentError::Malformed {
                    offset: consumed + start,
                    reason,
                })?;

            out.push_str(&rest[..start]);
            out.push_str(&self.call(&call, vars)?);

            let next = body_start + len + CLOSE.len();
            consumed += next;
            rest = &rest[next..];
        }
        out.push_str(rest);
        Ok(out)
    }
}

impl Default for FragmentRegistry {
    /// A registry holding the built-in operations
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register("var", op_var);
        registry.register("env", op_env);
        registry.register("read_file", op_read_file);
        registry.register("timestamp", op_timestamp);
        registry
    }
}

impl fmt::Debug for FragmentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.ops.keys()).finish()
    }
}

/// Encode `call` as a fragment tag
pub fn compile(call: &FragmentCall) -> Result<String, FragmentError> {
    let json = serde_json::to_vec(call).map_err(|e| FragmentError::failed(&call.op, e))?;
    Ok(format!("{OPEN}{}{CLOSE}", URL_SAFE_NO_PAD.encode(json)))
}

/// Make `text` safe to place in output that will later be resolved
///
/// Every `{%!` becomes a tag that evaluates to `{%!`, so neither stray
/// delimiters nor tag-shaped data can reach an operation.
pub fn escape(text: &str) -> Result<Cow<'_, str>, FragmentError> {
    if !text.contains(OPEN) {
        return Ok(Cow::Borrowed(text));
    }
    let literal = compile(&FragmentCall {
        op: LITERAL_OP.to_string(),
        args: vec![Value::String(OPEN.to_string())],
    })?;
    Ok(Cow::Owned(text.replace(OPEN, &literal)))
}

fn decode(body: &str) -> Result<FragmentCall, String> {
    let json = URL_SAFE_NO_PAD
        .decode(body)
        .map_err(|e| format!("invalid base64: {e}"))?;
    serde_json::from_slice(&json).map_err(|e| format!("invalid call: {e}"))
}

/// Whether `content` holds at least one fragment tag
pub fn contains_tags(content: &str) -> bool {
    content
        .find(OPEN)
        .is_some_and(|start| content[start + OPEN.len()..].contains(CLOSE))
}

fn string_arg<'a>(op: &str, args: &'a [Value], index: usize) -> Result<&'a str, FragmentError> {
    args.get(index)
        .and_then(Value::as_str)
        .ok_or_else(|| FragmentError::failed(op, format!("argument {index} must be a string")))
}

fn op_var(args: &[Value], vars: &Variables) -> Result<String, FragmentError> {
    let name = string_arg("var", args, 0)?;
    Ok(vars.get(name).map(display_value).unwrap_or_default())
}

fn op_env(args: &[Value], _vars: &Variables) -> Result<String, FragmentError> {
    let name = string_arg("env", args, 0)?;
    Ok(std::env::var(name).unwrap_or_default())
}

fn op_read_file(args: &[Value], _vars: &Variables) -> Result<String, FragmentError> {
    let path = string_arg("read_file", args, 0)?;
    fs::read_to_string(path).map_err(|e| FragmentError::failed("read_file", format!("{path}: {e}")))
}

fn op_timestamp(_args: &[Value], _vars: &Variables) -> Result<String, FragmentError> {
    Ok(Utc::now().timestamp().to_string())
}
