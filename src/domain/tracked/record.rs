//! Tracked record, the plain-object analogue.

use std::collections::BTreeMap;
use std::ops::Deref;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::{Kind, Notifier, Slot, Track, attach_slot, batched};

/// String-keyed fields that report writes and deletes to their owning key.
///
/// Stored as a JSON object. Reading the same field twice yields the same
/// reference; nested containers are attached when inserted and when the
/// record itself is attached.
pub struct TrackedRecord<V> {
    fields: BTreeMap<String, V>,
    notifier: Option<Notifier>,
}

impl<V> TrackedRecord<V> {
    pub const fn new() -> Self {
        Self {
            fields: BTreeMap::new(),
            notifier: None,
        }
    }

    pub fn into_inner(self) -> BTreeMap<String, V> {
        self.fields
    }

    pub const fn is_attached(&self) -> bool {
        self.notifier.is_some()
    }

    pub fn batch<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        let notifier = self.notifier.clone();
        batched(self, notifier, f)
    }

    fn touch(&self) {
        if let Some(notifier) = &self.notifier {
            notifier.notify();
        }
    }
}

impl<V: Track> TrackedRecord<V> {
    /// Write a field.
    pub fn insert(&mut self, field: impl Into<String>, mut value: V) -> Option<V> {
        if let Some(notifier) = &self.notifier {
            value.attach(notifier);
        }
        let mut previous = self.fields.insert(field.into(), value);
        previous.detach();
        self.touch();
        previous
    }

    /// Delete a field.
    pub fn remove(&mut self, field: &str) -> Option<V> {
        let mut removed = self.fields.remove(field);
        removed.detach();
        self.touch();
        removed
    }

    pub fn get_mut(&mut self, field: &str) -> Option<Slot<'_, V>> {
        let Self { fields, notifier } = self;
        fields
            .get_mut(field)
            .map(|value| Slot::new(value, notifier.as_ref()))
    }
}

impl<V: Track> Track for TrackedRecord<V> {
    const KIND: Kind = Kind::Record;

    fn attach(&mut self, notifier: &Notifier) -> bool {
        if !attach_slot(&mut self.notifier, notifier) {
            return false;
        }
        for value in self.fields.values_mut() {
            value.attach(notifier);
        }
        true
    }

    fn detach(&mut self) {
        if self.notifier.take().is_some() {
            for value in self.fields.values_mut() {
                value.detach();
            }
        }
    }
}

impl<V> Deref for TrackedRecord<V> {
    type Target = BTreeMap<String, V>;

    fn deref(&self) -> &BTreeMap<String, V> {
        &self.fields
    }
}

impl<V> Default for TrackedRecord<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone> Clone for TrackedRecord<V> {
    fn clone(&self) -> Self {
        Self {
            fields: self.fields.clone(),
            notifier: None,
        }
    }
}

impl<V: PartialEq> PartialEq for TrackedRecord<V> {
    fn eq(&self, other: &Self) -> bool {
        self.fields == other.fields
    }
}

impl<V: std::fmt::Debug> std::fmt::Debug for TrackedRecord<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map().entries(&self.fields).finish()
    }
}

impl<V, K: Into<String>> FromIterator<(K, V)> for TrackedRecord<V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
            notifier: None,
        }
    }
}

impl<V: Serialize> Serialize for TrackedRecord<V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.fields.serialize(serializer)
    }
}

impl<'de, V: Deserialize<'de>> Deserialize<'de> for TrackedRecord<V> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        BTreeMap::deserialize(deserializer).map(|fields| Self {
            fields,
            notifier: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::TrackedVec;
    use super::super::testing::recording;
    use super::*;

    type Nested = TrackedRecord<TrackedRecord<TrackedVec<i64>>>;

    fn nested() -> Nested {
        let inner: TrackedRecord<TrackedVec<i64>> =
            [("b", TrackedVec::from(vec![1, 2, 3]))].into_iter().collect();
        [("a", inner)].into_iter().collect()
    }

    #[test]
    fn test_deep_push_notifies_exactly_once() {
        let (notifier, sink) = recording("doc");
        let mut doc = nested();
        doc.attach(&notifier);
        doc.get_mut("a").unwrap().get_mut("b").unwrap().push(4);
        assert_eq!(sink.count(), 1);
        assert_eq!(&*doc["a"]["b"], &[1, 2, 3, 4]);
    }

    #[test]
    fn test_same_path_yields_same_reference() {
        let doc = nested();
        let first = &doc["a"]["b"];
        let second = &doc["a"]["b"];
        assert!(std::ptr::eq(first, second));
    }

    #[test]
    fn test_attach_twice_keeps_identity() {
        let (notifier, sink) = recording("doc");
        let mut doc = nested();
        doc.attach(&notifier);
        let before: *const TrackedVec<i64> = &doc["a"]["b"];
        doc.attach(&notifier);
        assert!(std::ptr::eq(before, &doc["a"]["b"]));
        assert_eq!(sink.count(), 0);
    }

    #[test]
    fn test_write_and_delete_notify() {
        let (notifier, sink) = recording("prefs");
        let mut prefs: TrackedRecord<String> = TrackedRecord::new();
        prefs.attach(&notifier);
        prefs.insert("theme", "dark".to_string());
        prefs.get_mut("theme").unwrap().push_str("-blue");
        prefs.remove("theme");
        assert_eq!(sink.count(), 3);
        assert!(prefs.is_empty());
    }

    #[test]
    fn test_inserted_child_is_attached() {
        let (notifier, sink) = recording("doc");
        let mut doc: TrackedRecord<TrackedVec<i64>> = TrackedRecord::new();
        doc.attach(&notifier);
        doc.insert("list", TrackedVec::new());
        assert!(doc["list"].is_attached());
        doc.get_mut("list").unwrap().push(1);
        assert_eq!(sink.count(), 2);
    }

    #[test]
    fn test_member_replaced_through_slot_reports_once() {
        let (notifier, sink) = recording("doc");
        let mut doc: TrackedRecord<TrackedVec<i64>> =
            [("b", TrackedVec::from(vec![1]))].into_iter().collect();
        doc.attach(&notifier);

        *doc.get_mut("b").unwrap() = TrackedVec::from(vec![9]);
        assert_eq!(sink.count(), 1);
        assert!(doc["b"].is_attached());

        doc.get_mut("b").unwrap().push(10);
        assert_eq!(sink.count(), 2);
        assert_eq!(&*doc["b"], &[9, 10]);
    }

    #[test]
    fn test_serializes_as_object() {
        let doc = nested();
        assert_eq!(
            serde_json::to_value(&doc).unwrap(),
            serde_json::json!({"a": {"b": [1, 2, 3]}})
        );
    }
}
