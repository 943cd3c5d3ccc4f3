//! Dynamically shaped tracked value for free-form JSON documents.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use super::{Kind, Notifier, Track, TrackedRecord, TrackedVec};

/// A JSON value whose arrays and objects are tracked containers.
///
/// Use this when the shape of a session value is not known statically.
/// Its [`Kind`] follows the variant it currently holds.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum TrackedValue {
    #[default]
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    Array(TrackedVec<TrackedValue>),
    Object(TrackedRecord<TrackedValue>),
}

impl TrackedValue {
    pub const fn as_array(&self) -> Option<&TrackedVec<Self>> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    pub const fn as_array_mut(&mut self) -> Option<&mut TrackedVec<Self>> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    pub const fn as_object(&self) -> Option<&TrackedRecord<Self>> {
        match self {
            Self::Object(fields) => Some(fields),
            _ => None,
        }
    }

    pub const fn as_object_mut(&mut self) -> Option<&mut TrackedRecord<Self>> {
        match self {
            Self::Object(fields) => Some(fields),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Number(n) => n.as_i64(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Convert to a plain, untracked JSON value.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(*b),
            Self::Number(n) => Value::Number(n.clone()),
            Self::String(s) => Value::String(s.clone()),
            Self::Array(items) => Value::Array(items.iter().map(Self::to_json).collect()),
            Self::Object(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }
}

impl From<Value> for TrackedValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => Self::Number(n),
            Value::String(s) => Self::String(s),
            Value::Array(items) => Self::Array(items.into_iter().map(Self::from).collect()),
            Value::Object(fields) => {
                Self::Object(fields.into_iter().map(|(k, v)| (k, Self::from(v))).collect())
            }
        }
    }
}

impl From<i64> for TrackedValue {
    fn from(n: i64) -> Self {
        Self::Number(n.into())
    }
}

impl From<&str> for TrackedValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<bool> for TrackedValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl Track for TrackedValue {
    fn kind(&self) -> Kind {
        match self {
            Self::Array(_) => Kind::Sequence,
            Self::Object(_) => Kind::Record,
            _ => Kind::Scalar,
        }
    }

    fn attach(&mut self, notifier: &Notifier) -> bool {
        match self {
            Self::Array(items) => items.attach(notifier),
            Self::Object(fields) => fields.attach(notifier),
            _ => false,
        }
    }

    fn detach(&mut self) {
        match self {
            Self::Array(items) => items.detach(),
            Self::Object(fields) => fields.detach(),
            _ => {}
        }
    }
}

impl Serialize for TrackedValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_unit(),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Number(n) => n.serialize(serializer),
            Self::String(s) => serializer.serialize_str(s),
            Self::Array(items) => items.serialize(serializer),
            Self::Object(fields) => fields.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for TrackedValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(Self::from)
    }
}

#[cfg(test)]
mod tests {
    use super::super::Slot;
    use super::super::testing::recording;
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_round_trip() {
        let raw = json!({"a": {"b": [1, 2, 3]}, "flag": true, "name": "x"});
        let value = TrackedValue::from(raw.clone());
        assert_eq!(value.to_json(), raw);
        assert_eq!(serde_json::to_value(&value).unwrap(), raw);
    }

    #[test]
    fn test_nested_array_push_reports_once() {
        let (notifier, sink) = recording("doc");
        let mut doc = TrackedValue::from(json!({"a": {"b": [1, 2, 3]}}));
        doc.attach(&notifier);
        doc.as_object_mut()
            .and_then(|o| o.get_mut("a"))
            .unwrap()
            .as_object_mut()
            .and_then(|o| o.get_mut("b"))
            .unwrap()
            .as_array_mut()
            .unwrap()
            .push(TrackedValue::from(4_i64));
        assert_eq!(sink.count(), 1);
        assert_eq!(doc.to_json(), json!({"a": {"b": [1, 2, 3, 4]}}));
    }

    #[test]
    fn test_kind_change_through_slot_reports() {
        let (notifier, sink) = recording("doc");
        let mut value = TrackedValue::from(json!([1]));
        {
            let mut slot = Slot::new(&mut value, Some(&notifier));
            *slot = TrackedValue::from(7_i64);
        }
        assert_eq!(value.as_i64(), Some(7));
        assert_eq!(sink.count(), 1);
    }
}
