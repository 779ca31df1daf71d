//! Redaction and size bounding for audited values
//!
//! Values are captured as [`Argument`]s when an invocation is built, and turned
//! into bounded text only when an audit record needs them. Each value is
//! sanitized on its own first:
//!
//! - `null` stays `null`
//! - anything whose text mentions `password` (any case) becomes `[HIDDEN]`
//! - text longer than [`FIELD_LIMIT`] characters is cut and marked; arrays
//!   and objects are measured by their compact JSON and, when too long, are
//!   replaced by the cut text
//!
//! Return values get a second, coarser cut at [`RETURN_VALUE_LIMIT`]
//! characters after serialization. Nothing here returns an error: failures
//! become a `[Serialization failed: ...]` string.

use serde::Serialize;
use serde_json::Value;
use std::borrow::Cow;

/// Maximum characters kept from a single value
pub const FIELD_LIMIT: usize = 200;

/// Maximum characters kept from a serialized return value
pub const RETURN_VALUE_LIMIT: usize = 500;

/// Replacement for values that look sensitive
pub const HIDDEN_MARKER: &str = "[HIDDEN]";

/// Appended to anything that was cut
pub const TRUNCATION_MARKER: &str = "... [truncated]";

const SENSITIVE_KEYWORD: &str = "password";

/// A captured argument or return value
#[derive(Debug, Clone, PartialEq)]
pub enum Argument {
    Value(Value),
    /// The value could not be represented; holds the encoder's reason
    Unrepresentable(String),
}

impl Argument {
    /// Capture any serializable value
    pub fn capture<T: Serialize + ?Sized>(value: &T) -> Self {
        match serde_json::to_value(value) {
            Ok(value) => Self::Value(value),
            Err(e) => Self::Unrepresentable(e.to_string()),
        }
    }

    pub fn null() -> Self {
        Self::Value(Value::Null)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Value(Value::Null))
    }
}

impl From<Value> for Argument {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

/// Build an argument list from serializable expressions.
///
/// ```
/// use taskboard_server::arguments;
///
/// let args = arguments!["Buy milk", Option::<String>::None, 42];
/// assert_eq!(args.len(), 3);
/// ```
#[macro_export]
macro_rules! arguments {
    () => { ::std::vec::Vec::<$crate::instrument::Argument>::new() };
    ($($value:expr),+ $(,)?) => {
        vec![$($crate::instrument::Argument::capture(&$value)),+]
    };
}

/// Serialize a parameter list as a JSON array of sanitized values
pub fn serialize_parameters(arguments: &[Argument]) -> String {
    if arguments.is_empty() {
        return "[]".to_string();
    }

    let mut safe = Vec::with_capacity(arguments.len());
    for argument in arguments {
        match argument {
            Argument::Value(value) => safe.push(sanitize_value(value)),
            Argument::Unrepresentable(reason) => return serialization_failed(reason),
        }
    }

    match serde_json::to_string(&safe) {
        Ok(serialized) => serialized,
        Err(e) => serialization_failed(&e),
    }
}

/// Serialize a single return value.
///
/// Strings are rendered as their bare text, everything else as compact JSON.
pub fn serialize_return_value(value: &Argument) -> String {
    let value = match value {
        Argument::Value(value) => sanitize_value(value),
        Argument::Unrepresentable(reason) => return serialization_failed(reason),
    };

    let serialized = match value {
        Value::String(text) => text,
        other => match serde_json::to_string(&other) {
            Ok(serialized) => serialized,
            Err(e) => return serialization_failed(&e),
        },
    };

    if serialized.chars().count() > RETURN_VALUE_LIMIT {
        truncate(&serialized, RETURN_VALUE_LIMIT)
    } else {
        serialized
    }
}

/// Apply the per-value policy.
///
/// Both the redaction check and the length bound look at the whole value's
/// text: the string itself, or compact JSON for anything else. A value over
/// the bound is replaced by its cut text.
pub fn sanitize_value(value: &Value) -> Value {
    if value.is_null() {
        return Value::Null;
    }

    let text = textual_form(value);
    if text.to_lowercase().contains(SENSITIVE_KEYWORD) {
        return Value::String(HIDDEN_MARKER.to_string());
    }

    if text.chars().count() > FIELD_LIMIT {
        return Value::String(truncate(&text, FIELD_LIMIT));
    }

    value.clone()
}

/// First `limit` characters of `text` followed by the truncation marker
pub fn truncate(text: &str, limit: usize) -> String {
    let mut cut: String = text.chars().take(limit).collect();
    cut.push_str(TRUNCATION_MARKER);
    cut
}

fn textual_form(value: &Value) -> Cow<'_, str> {
    match value {
        Value::String(text) => Cow::Borrowed(text),
        other => Cow::Owned(other.to_string()),
    }
}

fn serialization_failed(reason: &dyn std::fmt::Display) -> String {
    format!("[Serialization failed: {}]", reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn test_create_task_parameters() {
        let args = crate::arguments!["Buy milk", Option::<String>::None, "2031-05-01T10:00:00Z", 42];

        assert_eq!(
            serialize_parameters(&args),
            r#"["Buy milk",null,"2031-05-01T10:00:00Z",42]"#
        );
    }

    #[test]
    fn test_empty_parameter_list() {
        assert_eq!(serialize_parameters(&[]), "[]");
    }

    #[test]
    fn test_password_is_hidden_in_any_case() {
        for sensitive in ["password", "MyPassWord123", "reset PASSWORD now"] {
            assert_eq!(sanitize_value(&json!(sensitive)), json!(HIDDEN_MARKER));
        }
    }

    #[test]
    fn test_structured_value_mentioning_password_is_hidden() {
        let args = vec![
            Argument::capture(&json!({"username": "ana", "password": "hunter2"})),
            Argument::capture(&"ana"),
        ];

        assert_eq!(serialize_parameters(&args), r#"["[HIDDEN]","ana"]"#);
    }

    #[test]
    fn test_long_field_is_truncated_to_200_chars() {
        let long = "x".repeat(FIELD_LIMIT + 50);
        let sanitized = sanitize_value(&json!(long));

        let expected = format!("{}{}", "x".repeat(FIELD_LIMIT), TRUNCATION_MARKER);
        assert_eq!(sanitized, json!(expected));
    }

    #[test]
    fn test_field_at_limit_is_kept() {
        let exact = "y".repeat(FIELD_LIMIT);
        assert_eq!(sanitize_value(&json!(exact.clone())), json!(exact));
    }

    #[test]
    fn test_truncation_counts_characters_not_bytes() {
        let long = "ž".repeat(FIELD_LIMIT + 1);
        let sanitized = sanitize_value(&json!(long));

        let expected = format!("{}{}", "ž".repeat(FIELD_LIMIT), TRUNCATION_MARKER);
        assert_eq!(sanitized, json!(expected));
    }

    #[test]
    fn test_hidden_return_value_is_exact_marker() {
        let value = Argument::capture(&"new password accepted");
        assert_eq!(serialize_return_value(&value), HIDDEN_MARKER);
    }

    #[test]
    fn test_large_list_argument_is_bounded_as_a_whole() {
        let items: Vec<String> = (0..2000).map(|i| format!("item-{}", i)).collect();
        let serialized = serialize_parameters(&[Argument::capture(&items)]);

        let full = serde_json::to_string(&items).unwrap();
        let expected = serde_json::to_string(&vec![truncate(&full, FIELD_LIMIT)]).unwrap();
        assert_eq!(serialized, expected);

        let decoded: Vec<String> = serde_json::from_str(&serialized).unwrap();
        assert_eq!(decoded[0].chars().count(), FIELD_LIMIT + TRUNCATION_MARKER.len());
    }

    #[test]
    fn test_long_object_is_cut_as_text() {
        let task = json!({ "description": "d".repeat(300) });
        let sanitized = sanitize_value(&task);

        let text = sanitized.as_str().unwrap();
        assert!(text.starts_with(r#"{"description":"ddd"#));
        assert!(text.ends_with(TRUNCATION_MARKER));
        assert_eq!(text.chars().count(), FIELD_LIMIT + TRUNCATION_MARKER.len());
    }

    #[test]
    fn test_small_object_keeps_its_shape() {
        let task = json!({"title": "Write report", "tags": ["a", "b"]});
        assert_eq!(sanitize_value(&task), task);
    }

    #[test]
    fn test_list_return_value_cut_at_field_limit() {
        let rows: Vec<String> = (0..30).map(|i| format!("task-{:04}", i)).collect();
        let serialized = serialize_return_value(&Argument::capture(&rows));

        let full = serde_json::to_string(&rows).unwrap();
        assert_eq!(serialized, truncate(&full, FIELD_LIMIT));
        assert!(serialized.starts_with(r#"["task-0000","task-0001""#));
        assert!(serialized.chars().count() < RETURN_VALUE_LIMIT);
    }

    #[test]
    fn test_scalar_return_values() {
        assert_eq!(serialize_return_value(&Argument::capture(&7)), "7");
        assert_eq!(serialize_return_value(&Argument::capture(&"done")), "done");
        assert_eq!(serialize_return_value(&Argument::null()), "null");
    }

    #[test]
    fn test_unrepresentable_value_reports_failure() {
        let mut map = HashMap::new();
        map.insert((1, 2), "tuple keys are not JSON keys");
        let argument = Argument::capture(&map);

        assert!(matches!(argument, Argument::Unrepresentable(_)));
        let serialized = serialize_parameters(&[Argument::capture(&1), argument]);
        assert!(serialized.starts_with("[Serialization failed: "));
        assert!(serialized.ends_with(']'));
    }
}
