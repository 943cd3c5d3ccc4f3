//! Codecs - Conversion between registered values and stored JSON
//!
//! Every registered key carries a codec. The default is [`JsonCodec`],
//! which defers to serde; tracked sets and maps already serialize to
//! ordered sequences through their serde impls. [`SetCodec`] and
//! [`MapCodec`] give plain std collections the same sequence form, and
//! [`FnCodec`] wraps a pair of closures for anything custom.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::hash::Hash;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::CodecError;

/// Encoder/decoder pair for one registered value type.
pub trait Codec<T>: Send + Sync + 'static {
    /// Convert the current value to its stored form.
    fn encode(&self, value: &T) -> Result<Value, CodecError>;

    /// Rebuild a value from its stored form.
    fn decode(&self, raw: Value) -> Result<T, CodecError>;
}

/// Codec backed by the value's own serde impls.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl<T: Serialize + DeserializeOwned> Codec<T> for JsonCodec {
    fn encode(&self, value: &T) -> Result<Value, CodecError> {
        Ok(serde_json::to_value(value)?)
    }

    fn decode(&self, raw: Value) -> Result<T, CodecError> {
        Ok(serde_json::from_value(raw)?)
    }
}

/// Codec built from two closures.
pub struct FnCodec<E, D> {
    encode: E,
    decode: D,
}

impl<E, D> FnCodec<E, D> {
    pub const fn new(encode: E, decode: D) -> Self {
        Self { encode, decode }
    }
}

impl<T, E, D> Codec<T> for FnCodec<E, D>
where
    E: Fn(&T) -> Result<Value, CodecError> + Send + Sync + 'static,
    D: Fn(Value) -> Result<T, CodecError> + Send + Sync + 'static,
{
    fn encode(&self, value: &T) -> Result<Value, CodecError> {
        (self.encode)(value)
    }

    fn decode(&self, raw: Value) -> Result<T, CodecError> {
        (self.decode)(raw)
    }
}

/// Export set elements as a JSON array, in iteration order.
pub fn serialize_set<'a, T, I>(items: I) -> Result<Value, CodecError>
where
    T: Serialize + 'a,
    I: IntoIterator<Item = &'a T>,
{
    items
        .into_iter()
        .map(|item| serde_json::to_value(item).map_err(CodecError::from))
        .collect::<Result<Vec<_>, _>>()
        .map(Value::Array)
}

/// Build a set from a JSON array. Duplicates collapse.
pub fn deserialize_set<T, C>(raw: Value) -> Result<C, CodecError>
where
    T: DeserializeOwned,
    C: FromIterator<T>,
{
    let items: Vec<T> = serde_json::from_value(raw)?;
    Ok(items.into_iter().collect())
}

/// Export map entries as a JSON array of `[key, value]` pairs.
pub fn serialize_map<'a, K, V, I>(entries: I) -> Result<Value, CodecError>
where
    K: Serialize + 'a,
    V: Serialize + 'a,
    I: IntoIterator<Item = (&'a K, &'a V)>,
{
    entries
        .into_iter()
        .map(|(key, value)| {
            Ok(Value::Array(vec![
                serde_json::to_value(key)?,
                serde_json::to_value(value)?,
            ]))
        })
        .collect::<Result<Vec<_>, CodecError>>()
        .map(Value::Array)
}

/// Build a map from a JSON array of `[key, value]` pairs.
pub fn deserialize_map<K, V, C>(raw: Value) -> Result<C, CodecError>
where
    K: DeserializeOwned,
    V: DeserializeOwned,
    C: FromIterator<(K, V)>,
{
    let pairs: Vec<(K, V)> = serde_json::from_value(raw)?;
    Ok(pairs.into_iter().collect())
}

/// Sequence codec for plain std sets.
#[derive(Debug, Clone, Copy, Default)]
pub struct SetCodec;

impl<T> Codec<BTreeSet<T>> for SetCodec
where
    T: Serialize + DeserializeOwned + Ord + Send + Sync + 'static,
{
    fn encode(&self, value: &BTreeSet<T>) -> Result<Value, CodecError> {
        serialize_set(value)
    }

    fn decode(&self, raw: Value) -> Result<BTreeSet<T>, CodecError> {
        deserialize_set(raw)
    }
}

impl<T> Codec<HashSet<T>> for SetCodec
where
    T: Serialize + DeserializeOwned + Eq + Hash + Send + Sync + 'static,
{
    fn encode(&self, value: &HashSet<T>) -> Result<Value, CodecError> {
        serialize_set(value)
    }

    fn decode(&self, raw: Value) -> Result<HashSet<T>, CodecError> {
        deserialize_set(raw)
    }
}

/// Entry-pair codec for plain std maps.
#[derive(Debug, Clone, Copy, Default)]
pub struct MapCodec;

impl<K, V> Codec<BTreeMap<K, V>> for MapCodec
where
    K: Serialize + DeserializeOwned + Ord + Send + Sync + 'static,
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn encode(&self, value: &BTreeMap<K, V>) -> Result<Value, CodecError> {
        serialize_map(value)
    }

    fn decode(&self, raw: Value) -> Result<BTreeMap<K, V>, CodecError> {
        deserialize_map(raw)
    }
}

impl<K, V> Codec<HashMap<K, V>> for MapCodec
where
    K: Serialize + DeserializeOwned + Eq + Hash + Send + Sync + 'static,
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn encode(&self, value: &HashMap<K, V>) -> Result<Value, CodecError> {
        serialize_map(value)
    }

    fn decode(&self, raw: Value) -> Result<HashMap<K, V>, CodecError> {
        deserialize_map(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_codec_uses_array_form() {
        let tags: BTreeSet<String> = ["x".to_string()].into();
        assert_eq!(SetCodec.encode(&tags).unwrap(), json!(["x"]));
        let back: BTreeSet<String> = SetCodec.decode(json!(["y", "x"])).unwrap();
        assert_eq!(back.len(), 2);
    }

    #[test]
    fn test_map_codec_uses_entry_pairs() {
        let map: HashMap<u8, bool> = [(1, true)].into();
        assert_eq!(MapCodec.encode(&map).unwrap(), json!([[1, true]]));
        let back: HashMap<u8, bool> = MapCodec.decode(json!([[2, false]])).unwrap();
        assert_eq!(back.get(&2), Some(&false));
    }

    #[test]
    fn test_decode_rejects_wrong_shape() {
        let result: Result<BTreeSet<i32>, _> = SetCodec.decode(json!({"a": 1}));
        assert!(matches!(result, Err(CodecError::Json(_))));
    }

    #[test]
    fn test_fn_codec_propagates_custom_errors() {
        let codec = FnCodec::new(
            |_: &i32| -> Result<Value, CodecError> { Err(CodecError::custom("not today")) },
            |raw: Value| -> Result<i32, CodecError> {
                raw.as_i64()
                    .and_then(|n| i32::try_from(n).ok())
                    .ok_or_else(|| CodecError::custom("not an i32"))
            },
        );
        assert!(Codec::<i32>::encode(&codec, &1).is_err());
        assert_eq!(Codec::<i32>::decode(&codec, json!(4)).unwrap(), 4);
    }
}
