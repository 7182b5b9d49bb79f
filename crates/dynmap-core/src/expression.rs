//! Path expression evaluation against JSON documents.
//!
//! Substitutions and filters address the source payload with path
//! expressions. The engine only depends on the [`ExpressionEvaluator`] trait;
//! [`JsonPathEvaluator`] is the default implementation backed by JSONPath,
//! which supports selectors (`items[*].value`), recursive descent and
//! predicates (`items[?(@.type == 'temp')].value`).
//!
//! Paths may be written with or without the leading `$.`: `temp`,
//! `$.temp` and `_TOPIC_LEVEL_[1]` are all accepted.

use serde_json::Value;
use tracing::trace;

use crate::error::{Error, Result};

/// Evaluates a path expression against a document.
pub trait ExpressionEvaluator: Send + Sync {
    /// Evaluate `path` against `document`.
    ///
    /// Returns:
    /// - `Ok(Some(value))` - the expression produced a value (possibly `null`)
    /// - `Ok(None)` - the expression is empty or matched nothing
    /// - `Err(Error::Expression)` - the path is malformed or evaluation failed
    fn evaluate(&self, document: &Value, path: &str) -> Result<Option<Value>>;
}

/// JSONPath-backed evaluator.
///
/// A definite path (no wildcard, slice, union, recursive descent or
/// predicate) yields the single matched value. An indefinite path always
/// yields an array of all matches so callers can treat it as a list even
/// when only one element matched.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonPathEvaluator;

impl JsonPathEvaluator {
    pub fn new() -> Self {
        Self
    }

    /// Prefix bare paths with the root selector.
    fn normalize(path: &str) -> String {
        if path.starts_with('$') {
            path.to_string()
        } else if path.starts_with('[') {
            format!("${}", path)
        } else {
            format!("$.{}", path)
        }
    }

    /// Whether the path can select more than one node.
    fn is_indefinite(path: &str) -> bool {
        if path.contains('*') || path.contains("..") || path.contains("?(") {
            return true;
        }
        let mut in_brackets = false;
        for c in path.chars() {
            match c {
                '[' => in_brackets = true,
                ']' => in_brackets = false,
                ',' | ':' if in_brackets => return true,
                _ => {}
            }
        }
        false
    }
}

impl ExpressionEvaluator for JsonPathEvaluator {
    fn evaluate(&self, document: &Value, path: &str) -> Result<Option<Value>> {
        let trimmed = path.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        if trimmed == "$" {
            return Ok(Some(document.clone()));
        }

        let normalized = Self::normalize(trimmed);
        let matches = jsonpath_lib::select(document, &normalized)
            .map_err(|e| Error::expression(trimmed, format!("{:?}", e)))?;
        trace!("Evaluated '{}': {} match(es)", normalized, matches.len());

        if Self::is_indefinite(&normalized) {
            if matches.is_empty() {
                return Ok(None);
            }
            return Ok(Some(Value::Array(matches.into_iter().cloned().collect())));
        }

        Ok(match matches.len() {
            0 => None,
            1 => Some(matches[0].clone()),
            _ => Some(Value::Array(matches.into_iter().cloned().collect())),
        })
    }
}

/// Truthiness of an expression result, used by filters.
///
/// `null`, `false`, `0`, `""`, `[]`, `{}` and a missing result are falsy.
pub fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(a)) => !a.is_empty(),
        Some(Value::Object(o)) => !o.is_empty(),
    }
}
