use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Generic runtime value carried in exchange bodies, headers and properties.
///
/// Supports all JSON-compatible types plus binary data. Expressions evaluate
/// to a `Value`, and saga option values are stored as `Value`s until they are
/// copied onto finalization exchanges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Value {
    /// JSON null.
    #[default]
    Null,
    /// JSON boolean.
    Bool(bool),
    /// JSON integer (signed 64-bit).
    Int(i64),
    /// JSON floating-point (64-bit IEEE 754).
    Float(f64),
    /// JSON string (UTF-8).
    String(String),
    /// JSON array (ordered sequence of values).
    Array(Vec<Value>),
    /// JSON object. Uses `BTreeMap` for deterministic iteration order.
    Map(BTreeMap<String, Value>),
    /// Binary data. Declared last so JSON arrays of small integers
    /// deserialize as `Array`, never as `Bytes`.
    Bytes(Vec<u8>),
}

impl Value {
    /// Returns `true` for `Value::Null`.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Borrow the inner string, if this is a `Value::String`.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the inner integer, if this is a `Value::Int`.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Stable textual key for this value.
    ///
    /// Used wherever a value must index a map (sticky correlation keys).
    /// Strings render without quotes so that a header `"a"` and the constant
    /// `a` correlate to the same key.
    #[must_use]
    pub fn to_key(&self) -> String {
        match self {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::String(s) => write!(f, "{s:?}"),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Value::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Value::Map(entries) => {
                f.write_str("{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{k:?}:{v}")?;
                }
                f.write_str("}")
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_key_has_no_quotes() {
        assert_eq!(Value::from("order-1").to_key(), "order-1");
        assert_eq!(Value::Int(7).to_key(), "7");
        assert_eq!(Value::Null.to_key(), "null");
    }

    #[test]
    fn display_nested_structures() {
        let mut map = BTreeMap::new();
        map.insert("a".to_string(), Value::Array(vec![Value::Int(1), Value::Bool(true)]));
        assert_eq!(Value::Map(map).to_string(), r#"{"a":[1,true]}"#);
    }

    #[test]
    fn deserializes_untagged_json() {
        let v: Value = serde_json::from_str(r#"{"k": [1, "x", null]}"#).unwrap();
        let Value::Map(m) = v else {
            panic!("expected map");
        };
        assert_eq!(
            m["k"],
            Value::Array(vec![Value::Int(1), Value::from("x"), Value::Null])
        );
    }
}
