//! Structural pattern matching over JSON payloads.
//!
//! A pattern is itself a JSON value:
//! - an object matches when every listed key matches (extra keys are ignored)
//! - an array matches when the value equals any of its elements
//! - anything else matches by equality

use serde_json::Value;

/// Compiled pattern used to select payloads.
#[derive(Debug, Clone, PartialEq)]
pub struct PatternMatcher {
    pattern: Value,
}

impl PatternMatcher {
    /// Build a matcher from a pattern value.
    pub fn new(pattern: Value) -> Self {
        Self { pattern }
    }

    /// Check whether `value` matches the pattern.
    pub fn is_match(&self, value: &Value) -> bool {
        matches_value(&self.pattern, value)
    }
}

fn matches_value(pattern: &Value, value: &Value) -> bool {
    match pattern {
        Value::Object(fields) => match value {
            Value::Object(actual) => fields.iter().all(|(key, expected)| {
                actual
                    .get(key)
                    .is_some_and(|found| matches_value(expected, found))
            }),
            _ => false,
        },
        Value::Array(choices) => choices.iter().any(|choice| matches_value(choice, value)),
        _ => pattern == value,
    }
}
