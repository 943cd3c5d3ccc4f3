//! Tracked map with arbitrary ordered keys.

use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::ops::Deref;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::{Kind, Notifier, Slot, Track, attach_slot, batched};

/// A `BTreeMap` that reports `insert` / `remove` / `clear` to its owning key.
///
/// Stored as an ordered JSON array of `[key, value]` pairs, so keys need
/// not be strings. Values may themselves be tracked containers; they are
/// attached to the same owner.
pub struct TrackedMap<K, V> {
    entries: BTreeMap<K, V>,
    notifier: Option<Notifier>,
}

impl<K, V> TrackedMap<K, V> {
    pub const fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            notifier: None,
        }
    }

    pub fn into_inner(self) -> BTreeMap<K, V> {
        self.entries
    }

    pub const fn is_attached(&self) -> bool {
        self.notifier.is_some()
    }

    /// Run several mutations as one batch.
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

impl<K: Ord, V: Track> TrackedMap<K, V> {
    /// Insert or overwrite `key`, returning the previous value.
    pub fn insert(&mut self, key: K, mut value: V) -> Option<V> {
        if let Some(notifier) = &self.notifier {
            value.attach(notifier);
        }
        let mut previous = self.entries.insert(key, value);
        previous.detach();
        self.touch();
        previous
    }

    /// Remove `key`, returning its value.
    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        let mut removed = self.entries.remove(key);
        removed.detach();
        self.touch();
        removed
    }

    pub fn clear(&mut self) {
        for value in self.entries.values_mut() {
            value.detach();
        }
        self.entries.clear();
        self.touch();
    }

    /// Mutable access to the value under `key`.
    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<Slot<'_, V>>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        let Self { entries, notifier } = self;
        entries
            .get_mut(key)
            .map(|value| Slot::new(value, notifier.as_ref()))
    }

    pub fn extend(&mut self, iter: impl IntoIterator<Item = (K, V)>) {
        self.batch(|this| {
            for (key, value) in iter {
                this.insert(key, value);
            }
        });
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&K, &V) -> bool) {
        self.batch(|this| {
            this.entries.retain(|key, value| {
                let kept = keep(key, value);
                if !kept {
                    value.detach();
                }
                kept
            });
        });
    }
}

impl<K, V: Track> Track for TrackedMap<K, V> {
    const KIND: Kind = Kind::AssociativeMap;

    fn attach(&mut self, notifier: &Notifier) -> bool {
        if !attach_slot(&mut self.notifier, notifier) {
            return false;
        }
        for value in self.entries.values_mut() {
            value.attach(notifier);
        }
        true
    }

    fn detach(&mut self) {
        if self.notifier.take().is_some() {
            for value in self.entries.values_mut() {
                value.detach();
            }
        }
    }
}

impl<K, V> Deref for TrackedMap<K, V> {
    type Target = BTreeMap<K, V>;

    fn deref(&self) -> &BTreeMap<K, V> {
        &self.entries
    }
}

impl<K, V> Default for TrackedMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Clone, V: Clone> Clone for TrackedMap<K, V> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
            notifier: None,
        }
    }
}

impl<K: PartialEq, V: PartialEq> PartialEq for TrackedMap<K, V> {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl<K: std::fmt::Debug, V: std::fmt::Debug> std::fmt::Debug for TrackedMap<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map().entries(&self.entries).finish()
    }
}

impl<K, V> From<BTreeMap<K, V>> for TrackedMap<K, V> {
    fn from(entries: BTreeMap<K, V>) -> Self {
        Self {
            entries,
            notifier: None,
        }
    }
}

impl<K: Ord, V> FromIterator<(K, V)> for TrackedMap<K, V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        BTreeMap::from_iter(iter).into()
    }
}

impl<K: Serialize, V: Serialize> Serialize for TrackedMap<K, V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.entries.iter())
    }
}

impl<'de, K, V> Deserialize<'de> for TrackedMap<K, V>
where
    K: Deserialize<'de> + Ord,
    V: Deserialize<'de>,
{
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Vec::<(K, V)>::deserialize(deserializer).map(|pairs| pairs.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::recording;
    use super::super::TrackedSet;
    use super::*;

    #[test]
    fn test_map_mutations_notify() {
        let (notifier, sink) = recording("scores");
        let mut scores: TrackedMap<u32, i64> = TrackedMap::new();
        scores.attach(&notifier);
        scores.insert(1, 10);
        scores.insert(1, 11);
        assert_eq!(scores.remove(&1), Some(11));
        scores.clear();
        assert_eq!(sink.count(), 4);
    }

    #[test]
    fn test_scalar_value_through_slot_notifies_once() {
        let (notifier, sink) = recording("scores");
        let mut scores: TrackedMap<u32, i64> = [(1, 10)].into_iter().collect();
        scores.attach(&notifier);
        *scores.get_mut(&1).unwrap() += 5;
        assert_eq!(scores[&1], 15);
        assert_eq!(sink.count(), 1);
    }

    #[test]
    fn test_nested_set_value_reports_once() {
        let (notifier, sink) = recording("groups");
        let mut groups: TrackedMap<String, TrackedSet<i32>> = TrackedMap::new();
        groups.attach(&notifier);
        groups.insert("a".into(), TrackedSet::new());
        groups.get_mut("a").unwrap().insert(1);
        assert_eq!(sink.count(), 2);
        assert!(groups["a"].contains(&1));
    }

    #[test]
    fn test_serializes_as_entry_pairs() {
        let map: TrackedMap<i32, &str> = [(2, "b"), (1, "a")].into_iter().collect();
        assert_eq!(
            serde_json::to_value(&map).unwrap(),
            serde_json::json!([[1, "a"], [2, "b"]])
        );
        let back: TrackedMap<i32, String> =
            serde_json::from_value(serde_json::json!([[3, "c"]])).unwrap();
        assert_eq!(back[&3], "c");
    }
}
