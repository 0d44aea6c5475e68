//! Defaults resolution
//!
//! Merges a stored (partially specified) configuration document over a
//! defaults document of the same shape:
//! 1. Fields absent or `null` in the stored document take the default
//! 2. Fields set in the stored document are kept, including `false`, `0` and `""`
//! 3. Objects merge recursively, arrays and scalars are leaves
//!
//! Both inputs are borrowed and never mutated, so a failed pass can resolve
//! the same snapshot again.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

/// Errors raised while merging a stored document with its defaults
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MergeError {
    #[error("incompatible shapes at '{path}': stored value is {stored}, default is {default}")]
    ShapeMismatch {
        path: String,
        stored: &'static str,
        default: &'static str,
    },

    #[error("resolved configuration does not match the schema: {0}")]
    Schema(String),
}

/// Merge `stored` over `defaults`, returning a new document.
pub fn resolve(stored: &Value, defaults: &Value) -> Result<Value, MergeError> {
    let mut path = Vec::new();
    merge_at(stored, defaults, &mut path)
}

/// Merge and deserialize into the typed schema `T`.
pub fn resolve_typed<T: DeserializeOwned>(stored: &Value, defaults: &Value) -> Result<T, MergeError> {
    let merged = resolve(stored, defaults)?;
    serde_json::from_value(merged).map_err(|e| MergeError::Schema(e.to_string()))
}

fn merge_at(stored: &Value, defaults: &Value, path: &mut Vec<String>) -> Result<Value, MergeError> {
    match (stored, defaults) {
        (Value::Null, default) => Ok(default.clone()),
        (stored, Value::Null) => Ok(stored.clone()),
        (Value::Object(stored_map), Value::Object(default_map)) => {
            let mut merged = Map::new();
            for (key, default_value) in default_map {
                let value = match stored_map.get(key) {
                    Some(stored_value) => {
                        path.push(key.clone());
                        let value = merge_at(stored_value, default_value, path);
                        path.pop();
                        value?
                    }
                    None => default_value.clone(),
                };
                merged.insert(key.clone(), value);
            }
            // Keys unknown to the defaults are kept; the typed schema decides
            for (key, stored_value) in stored_map {
                if !default_map.contains_key(key) {
                    merged.insert(key.clone(), stored_value.clone());
                }
            }
            Ok(Value::Object(merged))
        }
        (stored, default) if kind_of(stored) == kind_of(default) => Ok(stored.clone()),
        (stored, default) => Err(MergeError::ShapeMismatch {
            path: display_path(path),
            stored: kind_of(stored),
            default: kind_of(default),
        }),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn display_path(path: &[String]) -> String {
    if path.is_empty() {
        "<root>".to_string()
    } else {
        path.join(".")
    }
}
