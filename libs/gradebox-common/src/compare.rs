/// Value Comparator - structural equality used for grading
///
/// **Rules:**
/// - Primitives compare by value, types must match (`"5"` is not `5`)
/// - `NaN` equals `NaN` unless `CompareOptions::nan_equals_nan` is off
/// - `-0` equals `0` unless `CompareOptions::distinguish_negative_zero` is on
/// - Arrays compare element-wise, in order, with equal length
/// - Objects compare by key set and per-key value; key order is irrelevant
/// - `undefined`, `null` and a missing key are all distinct
///
/// **Never fails:**
/// Cycles and opaque values are not gradable and compare unequal, even to
/// themselves. Any finite nesting depth compares structurally.

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompareOptions {
    pub nan_equals_nan: bool,
    pub distinguish_negative_zero: bool,
}

impl Default for CompareOptions {
    fn default() -> Self {
        Self {
            nan_equals_nan: true,
            distinguish_negative_zero: false,
        }
    }
}

/// Deep equality with default options
pub fn deep_equal(a: &Value, b: &Value) -> bool {
    deep_equal_with(a, b, &CompareOptions::default())
}

pub fn deep_equal_with(a: &Value, b: &Value, options: &CompareOptions) -> bool {
    first_difference(a, b, options).is_none()
}

/// Where and why two values differ
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Difference {
    /// Accessor path from the root, e.g. `[1].name`; empty for the root
    pub path: String,
    pub expected: Value,
    pub actual: Value,
    pub reason: DifferenceReason,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum DifferenceReason {
    TypeMismatch,
    ValueMismatch,
    LengthMismatch,
    MissingKey,
    UnexpectedKey,
    Ungradable,
}

impl fmt::Display for Difference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let at = if self.path.is_empty() { "value" } else { self.path.as_str() };
        match self.reason {
            DifferenceReason::TypeMismatch => write!(
                f,
                "{}: expected {} but got {}",
                at,
                self.expected.type_name(),
                self.actual.type_name()
            ),
            DifferenceReason::ValueMismatch => {
                write!(f, "{}: expected {} but got {}", at, self.expected, self.actual)
            }
            DifferenceReason::LengthMismatch => write!(
                f,
                "{}: expected length {} but got {}",
                at,
                array_len(&self.expected),
                array_len(&self.actual)
            ),
            DifferenceReason::MissingKey => write!(f, "{}: missing key", at),
            DifferenceReason::UnexpectedKey => write!(f, "{}: unexpected key", at),
            DifferenceReason::Ungradable => {
                write!(f, "{}: {} cannot be compared", at, self.actual.type_name())
            }
        }
    }
}

fn array_len(value: &Value) -> usize {
    match value {
        Value::Array(items) => items.len(),
        _ => 0,
    }
}

/// Locate the first mismatch between `expected` and `actual`
///
/// Traversal order is deterministic: array indices ascending, object keys in
/// sorted order, missing keys reported before unexpected ones. The walk keeps
/// its own stack, so nesting depth is bounded only by memory.
pub fn first_difference(
    expected: &Value,
    actual: &Value,
    options: &CompareOptions,
) -> Option<Difference> {
    // (depth, path segment, expected, actual); segments[..depth] is the parent path
    let mut pending: Vec<(usize, String, &Value, &Value)> = vec![(0, String::new(), expected, actual)];
    let mut segments: Vec<String> = Vec::new();

    while let Some((depth, segment, expected, actual)) = pending.pop() {
        segments.truncate(depth);
        segments.push(segment);

        let mismatch = |reason: DifferenceReason, segments: &[String]| {
            Some(Difference {
                path: segments.concat(),
                expected: expected.clone(),
                actual: actual.clone(),
                reason,
            })
        };

        match (expected, actual) {
            (Value::Circular | Value::Opaque(_), _) | (_, Value::Circular | Value::Opaque(_)) => {
                return mismatch(DifferenceReason::Ungradable, &segments);
            }
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => {}
            (Value::Bool(a), Value::Bool(b)) if a == b => {}
            (Value::Number(a), Value::Number(b)) if numbers_equal(*a, *b, options) => {}
            (Value::String(a), Value::String(b)) if a == b => {}
            (Value::Array(a), Value::Array(b)) => {
                if a.len() != b.len() {
                    return mismatch(DifferenceReason::LengthMismatch, &segments);
                }
                for (idx, (left, right)) in a.iter().zip(b.iter()).enumerate().rev() {
                    pending.push((depth + 1, format!("[{}]", idx), left, right));
                }
            }
            (Value::Object(a), Value::Object(b)) => {
                if let Some(key) = a.keys().find(|k| !b.contains_key(*k)) {
                    return Some(Difference {
                        path: child_path(&segments.concat(), key),
                        expected: a[key].clone(),
                        actual: Value::Undefined,
                        reason: DifferenceReason::MissingKey,
                    });
                }
                if let Some(key) = b.keys().find(|k| !a.contains_key(*k)) {
                    return Some(Difference {
                        path: child_path(&segments.concat(), key),
                        expected: Value::Undefined,
                        actual: b[key].clone(),
                        reason: DifferenceReason::UnexpectedKey,
                    });
                }
                for (key, left) in a.iter().rev() {
                    pending.push((depth + 1, child_path("", key), left, &b[key]));
                }
            }
            _ if std::mem::discriminant(expected) == std::mem::discriminant(actual) => {
                return mismatch(DifferenceReason::ValueMismatch, &segments);
            }
            _ => return mismatch(DifferenceReason::TypeMismatch, &segments),
        }
    }
    None
}

fn numbers_equal(a: f64, b: f64, options: &CompareOptions) -> bool {
    if a.is_nan() || b.is_nan() {
        return options.nan_equals_nan && a.is_nan() && b.is_nan();
    }
    if options.distinguish_negative_zero && a == 0.0 && b == 0.0 {
        return a.is_sign_negative() == b.is_sign_negative();
    }
    a == b
}

fn child_path(parent: &str, key: &str) -> String {
    let is_identifier = !key.is_empty()
        && !key.starts_with(|c: char| c.is_ascii_digit())
        && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$');
    if is_identifier {
        format!("{}.{}", parent, key)
    } else {
        let quoted = serde_json::to_string(key).unwrap_or_else(|_| key.to_string());
        format!("{}[{}]", parent, quoted)
    }
}
