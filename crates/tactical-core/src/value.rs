//! The closed value sum and canonical serialization.
//!
//! `Value` is the only shape application data, keys, and mutation contexts
//! are allowed to take anywhere in this crate. It mirrors the JSON data
//! model exactly — `Null | Bool | Num | Str | Array | Object` — so it can
//! be produced from and converted back to [`serde_json::Value`] without
//! loss, while remaining a closed sum that every match in this workspace
//! can exhaustively handle.
//!
//! ## Canonical serialization
//!
//! [`serialize`] produces a string form that is stable under key reordering:
//! object keys are always emitted in lexicographic order, so two
//! structurally-equal objects serialize identically regardless of
//! construction order. This underpins [`crate::key::ChainKey`] equality and
//! the deterministic record-key wire form.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The closed set of values this crate can store, key on, or serialize.
///
/// Objects use a `BTreeMap` rather than a `HashMap` specifically so that
/// iteration order is always lexicographic by key — this is what makes
/// [`serialize`] deterministic without a separate sort step at each level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// JSON `null`.
    Null,
    /// JSON `true`/`false`.
    Bool(bool),
    /// JSON number. Stored as `f64`, matching the only numeric type JSON has.
    Num(f64),
    /// JSON string.
    Str(String),
    /// JSON array, order preserved.
    Array(Vec<Value>),
    /// JSON object, keys sorted lexicographically on construction and on read.
    Object(BTreeMap<String, Value>),
}

impl Value {
    /// Shorthand for an empty object, the shape `push` uses for `context: {}`.
    pub fn empty_object() -> Value {
        Value::Object(BTreeMap::new())
    }

    /// `true` if this is [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Build an array from elements that may be absent.
    ///
    /// Per the key-encoding contract, an absent element (the target
    /// language's `undefined`) serializes as the JSON literal `null` when
    /// it appears inside an array — unlike an absent object field, which is
    /// omitted entirely. This constructor encodes that rule at the type
    /// level: there is no way to build a `Value::Array` from `Option<Value>`
    /// elements other than through here, so callers always get the rule
    /// right.
    pub fn array_with_absent(items: Vec<Option<Value>>) -> Value {
        Value::Array(
            items
                .into_iter()
                .map(|item| item.unwrap_or(Value::Null))
                .collect(),
        )
    }
}

/// Error raised when converting external data into [`Value`] encounters a
/// shape outside the closed set.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("unsupported type: {0}")]
pub struct UnsupportedType(pub String);

impl TryFrom<serde_json::Value> for Value {
    type Error = UnsupportedType;

    fn try_from(json: serde_json::Value) -> Result<Self, Self::Error> {
        match json {
            serde_json::Value::Null => Ok(Value::Null),
            serde_json::Value::Bool(b) => Ok(Value::Bool(b)),
            serde_json::Value::Number(n) => n
                .as_f64()
                .map(Value::Num)
                .ok_or_else(|| UnsupportedType(format!("non-finite number: {n}"))),
            serde_json::Value::String(s) => Ok(Value::Str(s)),
            serde_json::Value::Array(items) => items
                .into_iter()
                .map(Value::try_from)
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            serde_json::Value::Object(map) => map
                .into_iter()
                .map(|(k, v)| Value::try_from(v).map(|v| (k, v)))
                .collect::<Result<BTreeMap<_, _>, _>>()
                .map(Value::Object),
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::Num(n) => serde_json::Number::from_f64(n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Str(s) => serde_json::Value::String(s),
            Value::Array(items) => {
                serde_json::Value::Array(items.into_iter().map(Into::into).collect())
            }
            Value::Object(map) => {
                serde_json::Value::Object(map.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Num(n)
    }
}

/// Canonical, deterministic serialization of a [`Value`].
///
/// Two structurally-equal values (same keys and values, any key order)
/// always serialize to the same string — this is what the key-encoding
/// contract requires and what `BTreeMap` gives us for free at every level.
pub fn serialize(value: &Value) -> String {
    let mut out = String::new();
    write_value(value, &mut out);
    out
}

fn write_value(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Num(n) => {
            let _ = write!(out, "{}", format_number(*n));
        }
        Value::Str(s) => write_json_string(s, out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            out.push('{');
            for (i, (k, v)) in map.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_json_string(k, out);
                out.push(':');
                write_value(v, out);
            }
            out.push('}');
        }
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

fn write_json_string(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn obj(pairs: &[(&str, Value)]) -> Value {
        Value::Object(pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect())
    }

    #[test]
    fn key_order_does_not_affect_serialization() {
        let a = obj(&[("foo", "bar".into()), ("baz", "qux".into())]);
        let b = obj(&[("baz", "qux".into()), ("foo", "bar".into())]);
        assert_eq!(serialize(&a), serialize(&b));
        assert_eq!(serialize(&a), r#"{"baz":"qux","foo":"bar"}"#);
    }

    #[test]
    fn nested_objects_sort_at_every_level() {
        let inner_a = obj(&[("z", 1.0.into()), ("a", 2.0.into())]);
        let inner_b = obj(&[("a", 2.0.into()), ("z", 1.0.into())]);
        let a = obj(&[("outer", inner_a)]);
        let b = obj(&[("outer", inner_b)]);
        assert_eq!(serialize(&a), serialize(&b));
    }

    #[test]
    fn arrays_preserve_order() {
        let a = Value::Array(vec!["a".into(), "b".into()]);
        let b = Value::Array(vec!["b".into(), "a".into()]);
        assert_ne!(serialize(&a), serialize(&b));
    }

    #[test]
    fn absent_array_elements_become_null() {
        let v = Value::array_with_absent(vec![Some("x".into()), None, Some("y".into())]);
        assert_eq!(serialize(&v), r#"["x",null,"y"]"#);
    }

    #[test]
    fn absent_object_fields_are_simply_omitted() {
        // There is no "undefined" variant; omission is the natural
        // consequence of not inserting the key into the BTreeMap.
        let mut map = BTreeMap::new();
        map.insert("present".to_string(), Value::from("x"));
        assert_eq!(serialize(&Value::Object(map)), r#"{"present":"x"}"#);
    }

    #[test]
    fn strings_escape_control_characters() {
        let v = Value::from("a\n\"b\\c");
        assert_eq!(serialize(&v), r#""a\n\"b\\c""#);
    }

    #[test]
    fn round_trips_through_serde_json() {
        let json = serde_json::json!({"baz": "qux", "foo": {"nested": [1, 2, null, true]}});
        let value = Value::try_from(json.clone()).unwrap();
        let back: serde_json::Value = value.into();
        assert_eq!(json, back);
    }

    proptest! {
        #[test]
        fn serialize_is_stable_under_object_key_permutation(
            pairs in prop::collection::vec(("[a-z]{1,5}", any::<i32>()), 1..8)
        ) {
            let mut unique: BTreeMap<String, i32> = BTreeMap::new();
            for (k, v) in pairs {
                unique.insert(k, v);
            }
            let entries: Vec<(String, i32)> = unique.into_iter().collect();

            let forward = Value::Object(
                entries.iter().map(|(k, v)| (k.clone(), Value::Num(*v as f64))).collect(),
            );
            let mut reversed = entries.clone();
            reversed.reverse();
            let backward = Value::Object(
                reversed.iter().map(|(k, v)| (k.clone(), Value::Num(*v as f64))).collect(),
            );

            prop_assert_eq!(serialize(&forward), serialize(&backward));
        }
    }
}
