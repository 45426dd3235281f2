//! Tree values: the closed set of shapes a source or output field can take

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// An ordered field map. Insertion order is significant: it drives traversal
/// order, output order and merge precedence.
pub type Record = IndexMap<String, Value>;

/// A terminal value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
}

/// A field value in a source document or an output record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Scalar(Scalar),
    Map(Record),
    Sequence(Vec<Value>),
}

impl Value {
    pub fn null() -> Self {
        Value::Scalar(Scalar::Null)
    }

    pub fn string(s: impl Into<String>) -> Self {
        Value::Scalar(Scalar::String(s.into()))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Scalar(Scalar::Null))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Scalar(Scalar::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Record> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&[Value]> {
        match self {
            Value::Sequence(items) => Some(items),
            _ => None,
        }
    }

    /// Short shape name used in logs and conflict reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Scalar(Scalar::Null) => "null",
            Value::Scalar(_) => "scalar",
            Value::Map(_) => "map",
            Value::Sequence(_) => "sequence",
        }
    }

    /// Render a scalar as text: strings verbatim, numbers and booleans via
    /// their display form. Maps, sequences and null have no text form.
    pub fn scalar_text(&self) -> Option<String> {
        match self {
            Value::Scalar(Scalar::String(s)) => Some(s.clone()),
            Value::Scalar(Scalar::Number(n)) => Some(n.to_string()),
            Value::Scalar(Scalar::Bool(b)) => Some(b.to_string()),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::string(s)
    }
}

impl From<Record> for Value {
    fn from(record: Record) -> Self {
        Value::Map(record)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Sequence(items)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Scalar(Scalar::Null),
            serde_json::Value::Bool(b) => Value::Scalar(Scalar::Bool(b)),
            serde_json::Value::Number(n) => Value::Scalar(Scalar::Number(n)),
            serde_json::Value::String(s) => Value::Scalar(Scalar::String(s)),
            serde_json::Value::Array(items) => {
                Value::Sequence(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => Value::Map(
                map.into_iter()
                    .map(|(k, v)| (k, Value::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(value: Value) -> Self {
        match value {
            Value::Scalar(Scalar::Null) => serde_json::Value::Null,
            Value::Scalar(Scalar::Bool(b)) => serde_json::Value::Bool(b),
            Value::Scalar(Scalar::Number(n)) => serde_json::Value::Number(n),
            Value::Scalar(Scalar::String(s)) => serde_json::Value::String(s),
            Value::Sequence(items) => {
                serde_json::Value::Array(items.into_iter().map(Into::into).collect())
            }
            Value::Map(record) => serde_json::Value::Object(
                record.into_iter().map(|(k, v)| (k, v.into())).collect(),
            ),
        }
    }
}

/// Convert a JSON object into a record. Non-object JSON yields `None`.
pub fn record_from_json(json: serde_json::Value) -> Option<Record> {
    match Value::from(json) {
        Value::Map(record) => Some(record),
        _ => None,
    }
}

/// Coerce a value into a sequence. Sequences are returned unchanged, anything
/// else (including maps) becomes a one-element sequence.
pub fn normalize(value: Value) -> Value {
    match value {
        Value::Sequence(_) => value,
        other => Value::Sequence(vec![other]),
    }
}

/// Drop null-valued entries, then normalize every remaining value.
pub fn normalize_record(record: &mut Record) {
    record.retain(|_, v| !v.is_null());
    for value in record.values_mut() {
        let taken = std::mem::replace(value, Value::null());
        *value = normalize(taken);
    }
}
