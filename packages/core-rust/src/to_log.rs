//! Size-bounded projection of arbitrary values for logs and trace spans.
//!
//! Values are first serialized into a `serde_json::Value` tree, which is
//! acyclic by construction, then projected: long strings are truncated to a
//! prefix plus their original length, arrays and objects are mapped
//! element-wise. The input is never mutated.

use serde::Serialize;
use serde_json::Value;

/// Strings longer than this many characters are truncated.
pub const MAX_LOGGED_STRING_LEN: usize = 80;

/// Number of leading characters kept from a truncated string.
pub const TRUNCATED_PREFIX_LEN: usize = 50;

/// Projects `value` into a loggable form.
///
/// Returns `None` when the value has no loggable representation (it cannot
/// be serialized), which callers treat as "absent".
pub fn to_log<T: Serialize + ?Sized>(value: &T) -> Option<Value> {
    serde_json::to_value(value).ok().map(project)
}

/// Projects an already-serialized value.
#[must_use]
pub fn project(value: Value) -> Value {
    match value {
        Value::String(s) => match truncate_for_log(&s) {
            Some(truncated) => Value::String(truncated),
            None => Value::String(s),
        },
        Value::Array(items) => Value::Array(items.into_iter().map(project).collect()),
        Value::Object(fields) => Value::Object(
            fields
                .into_iter()
                .map(|(name, field)| (name, project(field)))
                .collect(),
        ),
        other => other,
    }
}

/// Returns the truncated form of `s` when it exceeds [`MAX_LOGGED_STRING_LEN`]
/// characters: the first [`TRUNCATED_PREFIX_LEN`] characters, an ellipsis and
/// the original length in brackets.
#[must_use]
pub fn truncate_for_log(s: &str) -> Option<String> {
    let len = s.chars().count();
    if len <= MAX_LOGGED_STRING_LEN {
        return None;
    }
    let prefix: String = s.chars().take(TRUNCATED_PREFIX_LEN).collect();
    Some(format!("{prefix}… [{len}]"))
}
