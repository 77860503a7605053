//! Typed values for [`crate::chunk::ExtendedMetadata`].
//!
//! The wire format for chunk metadata is an opaque string-keyed JSON
//! object (so storage backends can evolve the schema without a protocol
//! bump), but the analytics engine needs type-safe access to the handful
//! of well-known keys it reads and writes. `Value` is that internal
//! tagged representation; it serializes untagged so the wire shape is
//! unaffected.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// A metadata value, tagged for type-safe internal access but untagged
/// on the wire so storage still exchanges opaque JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// A string value.
    String(String),
    /// An integer value.
    Int(i64),
    /// A floating point value.
    Float(f64),
    /// A boolean value.
    Bool(bool),
    /// An RFC 3339 timestamp, stored as the literal wire string.
    Timestamp(chrono::DateTime<chrono::Utc>),
    /// A nested object.
    Obj(std::collections::BTreeMap<String, Value>),
    /// An array of values.
    Arr(Vec<Value>),
}

impl Value {
    /// View this value as an `f64`, accepting both `Int` and `Float`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// View this value as an `i64`, accepting both `Int` and `Float`
    /// (truncating toward zero).
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::Float(f) => Some(*f as i64),
            _ => None,
        }
    }

    /// View this value as a `bool`.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// View this value as a `&str`.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// View this value as a timestamp. Strings are parsed as RFC 3339
    /// on demand, so values populated by external storage layers (which
    /// only know JSON strings) still work.
    pub fn as_timestamp(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        match self {
            Self::Timestamp(t) => Some(*t),
            Self::String(s) => chrono::DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.with_timezone(&chrono::Utc)),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<chrono::DateTime<chrono::Utc>> for Value {
    fn from(t: chrono::DateTime<chrono::Utc>) -> Self {
        Self::Timestamp(t)
    }
}

/// Convert a `Value` tree into plain `serde_json::Value` for exchange
/// with a storage backend that only understands opaque JSON.
impl From<Value> for JsonValue {
    fn from(value: Value) -> Self {
        match value {
            Value::String(s) => JsonValue::String(s),
            Value::Int(i) => JsonValue::Number(i.into()),
            Value::Float(f) => serde_json::Number::from_f64(f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Value::Bool(b) => JsonValue::Bool(b),
            Value::Timestamp(t) => JsonValue::String(t.to_rfc3339()),
            Value::Obj(map) => {
                JsonValue::Object(map.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
            Value::Arr(items) => JsonValue::Array(items.into_iter().map(Into::into).collect()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_string_parses_on_demand() {
        let value = Value::String("2024-01-01T00:00:00Z".to_string());
        assert!(value.as_timestamp().is_some());
    }

    #[test]
    fn numeric_coercion_works_both_ways() {
        assert_eq!(Value::Int(10).as_f64(), Some(10.0));
        assert_eq!(Value::Float(10.9).as_i64(), Some(10));
    }

    #[test]
    fn untagged_round_trip_preserves_shape() {
        let value = Value::Obj(std::collections::BTreeMap::from([(
            "access_count".to_string(),
            Value::Int(5),
        )]));
        let json = serde_json::to_string(&value).unwrap();
        assert_eq!(json, r#"{"access_count":5}"#);
    }
}
