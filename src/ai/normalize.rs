//! Coerce loosely shaped model output into typed values
//!
//! Rules are tried in a fixed order and the first that applies wins:
//! a bare array, then an object wrapping an array (the conventional key
//! first, else the first array-valued property), then, where allowed, a single
//! object promoted to a one-element list. Anything else is an error.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::AiError;

/// Which rule produced the list
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Shape {
    Array,
    Wrapped(String),
    Single,
}

#[derive(Debug)]
pub struct Normalized<T> {
    pub items: Vec<T>,
    pub shape: Shape,
}

pub fn parse_json(raw: &str) -> Result<Value, AiError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(AiError::EmptyResponse);
    }
    serde_json::from_str(raw).map_err(|e| AiError::Malformed(e.to_string()))
}

/// Normalize a reply that should be a list of `T`
pub fn normalize_list<T: DeserializeOwned>(
    raw: &str,
    key: &str,
    promote_single: bool,
) -> Result<Normalized<T>, AiError> {
    match parse_json(raw)? {
        Value::Array(items) => Ok(Normalized {
            items: decode_items(items)?,
            shape: Shape::Array,
        }),
        Value::Object(mut map) => {
            if let Some(found) = array_key(&map, key) {
                let items = match map.get(&found) {
                    Some(Value::Array(items)) => items.clone(),
                    _ => Vec::new(),
                };
                match decode_items(items) {
                    Ok(items) => {
                        return Ok(Normalized {
                            items,
                            shape: Shape::Wrapped(found),
                        });
                    }
                    // An unknown array field on a lone item (e.g. "tags") is
                    // not a wrapper; let promotion have a go
                    Err(_) if found != key && promote_single => {}
                    Err(err) => return Err(err),
                }
            }
            if promote_single {
                let item = serde_json::from_value(Value::Object(map))
                    .map_err(|e| AiError::Malformed(e.to_string()))?;
                return Ok(Normalized {
                    items: vec![item],
                    shape: Shape::Single,
                });
            }
            Err(AiError::UnexpectedShape(
                "expected a JSON array, got an object without one".to_string(),
            ))
        }
        other => Err(AiError::UnexpectedShape(format!(
            "expected a JSON array, got {}",
            kind(&other)
        ))),
    }
}

/// Normalize a reply that should be a single `T`. A non-empty array is
/// accepted and its first element used.
pub fn normalize_object<T: DeserializeOwned>(raw: &str) -> Result<T, AiError> {
    let value = match parse_json(raw)? {
        Value::Object(map) => Value::Object(map),
        Value::Array(items) => match items.into_iter().next() {
            Some(first @ Value::Object(_)) => first,
            _ => {
                return Err(AiError::UnexpectedShape(
                    "expected a JSON object, got an array without one".to_string(),
                ));
            }
        },
        other => {
            return Err(AiError::UnexpectedShape(format!(
                "expected a JSON object, got {}",
                kind(&other)
            )));
        }
    };
    serde_json::from_value(value).map_err(|e| AiError::Malformed(e.to_string()))
}

fn array_key(map: &Map<String, Value>, key: &str) -> Option<String> {
    if map.get(key).is_some_and(Value::is_array) {
        return Some(key.to_string());
    }
    map.iter()
        .find(|(_, value)| value.is_array())
        .map(|(name, _)| name.clone())
}

fn decode_items<T: DeserializeOwned>(items: Vec<Value>) -> Result<Vec<T>, AiError> {
    items
        .into_iter()
        .map(serde_json::from_value)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| AiError::Malformed(e.to_string()))
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Enhancement, ParsedTask, Priority};

    #[test]
    fn bare_array() {
        let out: Normalized<ParsedTask> =
            normalize_list(r#"[{"title":"A"},{"title":"B"}]"#, "tasks", true).unwrap();
        assert_eq!(out.shape, Shape::Array);
        assert_eq!(out.items.len(), 2);
    }

    #[test]
    fn wrapped_array_is_unwrapped_not_promoted() {
        let raw = r#"{"tasks": [{"title":"A","priority":"low","due_date":null,"description":""}]}"#;
        let out: Normalized<ParsedTask> = normalize_list(raw, "tasks", true).unwrap();
        assert_eq!(out.shape, Shape::Wrapped("tasks".to_string()));
        assert_eq!(out.items.len(), 1);
        assert_eq!(out.items[0].title, "A");
        assert_eq!(out.items[0].priority, Priority::Low);
        assert_eq!(out.items[0].due_date, None);
    }

    #[test]
    fn unknown_wrapper_key_uses_first_array() {
        let raw = r#"{"note": "x", "items": [{"title":"A"}], "more": [{"title":"B"}]}"#;
        let out: Normalized<ParsedTask> = normalize_list(raw, "tasks", true).unwrap();
        assert_eq!(out.shape, Shape::Wrapped("items".to_string()));
        assert_eq!(out.items[0].title, "A");
    }

    #[test]
    fn conventional_key_wins_over_earlier_arrays() {
        let raw = r#"{"other": [{"title":"X"}], "tasks": [{"title":"A"}]}"#;
        let out: Normalized<ParsedTask> = normalize_list(raw, "tasks", true).unwrap();
        assert_eq!(out.shape, Shape::Wrapped("tasks".to_string()));
        assert_eq!(out.items[0].title, "A");
    }

    #[test]
    fn single_object_promoted_only_when_allowed() {
        let raw = r#"{"title":"Buy milk","priority":"high","due_date":"2024-01-02"}"#;
        let out: Normalized<ParsedTask> = normalize_list(raw, "tasks", true).unwrap();
        assert_eq!(out.shape, Shape::Single);
        assert_eq!(out.items[0].title, "Buy milk");

        let err = normalize_list::<ParsedTask>(raw, "tasks", false).unwrap_err();
        assert!(matches!(err, AiError::UnexpectedShape(_)));
    }

    #[test]
    fn single_object_with_array_field_is_still_promoted() {
        let raw = r#"{"title":"Buy milk","priority":"high","due_date":"2024-01-02","tags":["shopping"]}"#;
        let out: Normalized<ParsedTask> = normalize_list(raw, "tasks", true).unwrap();
        assert_eq!(out.shape, Shape::Single);
        assert_eq!(out.items.len(), 1);
        assert_eq!(out.items[0].title, "Buy milk");

        // Without promotion the stray array is still not a task list
        assert!(normalize_list::<ParsedTask>(raw, "tasks", false).is_err());
    }

    #[test]
    fn other_shapes_fail() {
        assert!(matches!(
            normalize_list::<ParsedTask>("42", "tasks", true),
            Err(AiError::UnexpectedShape(_))
        ));
        assert!(matches!(
            normalize_list::<ParsedTask>("not json", "tasks", true),
            Err(AiError::Malformed(_))
        ));
        assert!(matches!(
            normalize_list::<ParsedTask>("  ", "tasks", true),
            Err(AiError::EmptyResponse)
        ));
        // Elements that do not fit the schema are not guessed at
        assert!(matches!(
            normalize_list::<ParsedTask>(r#"[{"name":"A"}]"#, "tasks", true),
            Err(AiError::Malformed(_))
        ));
    }

    #[test]
    fn object_reply() {
        let raw = r#"{"title":"Plan trip","description":"Book flights.","priority":"medium","due_date":null}"#;
        let enhanced: Enhancement = normalize_object(raw).unwrap();
        assert_eq!(enhanced.title, "Plan trip");

        let wrapped = format!("[{}]", raw);
        let enhanced: Enhancement = normalize_object(&wrapped).unwrap();
        assert_eq!(enhanced.title, "Plan trip");

        assert!(matches!(
            normalize_object::<Enhancement>("[]"),
            Err(AiError::UnexpectedShape(_))
        ));
    }
}
