// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Template variable interpolation.
//!
//! Step configs may reference context entries as `{{.name}}` or
//! `{{.dotted.path}}`. Substitution runs immediately before a step is
//! invoked, so outputs of earlier steps are visible. Missing keys render
//! as an empty string; a string that consists of exactly one placeholder
//! takes the referenced value with its JSON type preserved.

use crate::context::Context;
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::LazyLock;

/// Regex pattern for {{.variable}} or {{.namespace.variable}}
// Allow expect here as the regex is compile-time verified to be valid
#[allow(clippy::expect_used)]
static VAR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\.([a-zA-Z_][a-zA-Z0-9_]*(?:\.[a-zA-Z_][a-zA-Z0-9_]*)*)\}\}")
        .expect("constant regex pattern is valid")
});

/// Substitute placeholders in a plain string, stringifying values.
pub fn substitute_string(template: &str, context: &Context) -> String {
    VAR_PATTERN
        .replace_all(template, |caps: &regex::Captures| {
            context.get_path(&caps[1]).map(display_value).unwrap_or_default()
        })
        .to_string()
}

/// Recursively substitute placeholders in a JSON tree.
///
/// Strings are interpolated; objects and arrays are descended into;
/// numbers, booleans, and nulls pass through untouched.
pub fn substitute_value(value: &Value, context: &Context) -> Value {
    match value {
        Value::String(s) => substitute_string_value(s, context),
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| substitute_value(v, context)).collect())
        }
        Value::Object(map) => Value::Object(substitute_map(map, context)),
        other => other.clone(),
    }
}

/// Substitute placeholders across every value of a JSON object.
pub fn substitute_map(map: &Map<String, Value>, context: &Context) -> Map<String, Value> {
    map.iter().map(|(k, v)| (k.clone(), substitute_value(v, context))).collect()
}

fn substitute_string_value(s: &str, context: &Context) -> Value {
    // A string that is exactly one placeholder keeps the value's type,
    // so `"{{.retries}}"` substitutes to a number, not "3".
    if let Some(caps) = VAR_PATTERN.captures(s) {
        if caps
            .get(0)
            .is_some_and(|m| m.start() == 0 && m.end() == s.len())
        {
            return match context.get_path(&caps[1]) {
                Some(value) => value.clone(),
                None => Value::String(String::new()),
            };
        }
    }
    Value::String(substitute_string(s, context))
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
#[path = "template_tests.rs"]
mod tests;
