//! Tracked set.

use std::borrow::Borrow;
use std::collections::BTreeSet;
use std::ops::Deref;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::{Kind, Notifier, Track, attach_slot, batched};

/// A `BTreeSet` that reports `insert` / `remove` / `clear` to its owning key.
///
/// Each mutating call notifies once after it completes, whether or not
/// the set actually changed. Reads pass through `Deref`.
/// Stored as an ordered JSON array.
pub struct TrackedSet<T> {
    items: BTreeSet<T>,
    notifier: Option<Notifier>,
}

impl<T> TrackedSet<T> {
    pub const fn new() -> Self {
        Self {
            items: BTreeSet::new(),
            notifier: None,
        }
    }

    pub fn into_inner(self) -> BTreeSet<T> {
        self.items
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

    pub fn clear(&mut self) {
        self.items.clear();
        self.touch();
    }
}

impl<T: Ord> TrackedSet<T> {
    /// Add `value`. Returns whether it was newly inserted.
    pub fn insert(&mut self, value: T) -> bool {
        let inserted = self.items.insert(value);
        self.touch();
        inserted
    }

    /// Remove `value`. Returns whether it was present.
    pub fn remove<Q>(&mut self, value: &Q) -> bool
    where
        T: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        let removed = self.items.remove(value);
        self.touch();
        removed
    }

    pub fn extend(&mut self, iter: impl IntoIterator<Item = T>) {
        self.batch(|this| {
            for value in iter {
                this.insert(value);
            }
        });
    }

    pub fn retain(&mut self, keep: impl FnMut(&T) -> bool) {
        self.batch(|this| this.items.retain(keep));
    }
}

impl<T> Track for TrackedSet<T> {
    const KIND: Kind = Kind::AssociativeSet;

    fn attach(&mut self, notifier: &Notifier) -> bool {
        attach_slot(&mut self.notifier, notifier)
    }

    fn detach(&mut self) {
        self.notifier = None;
    }
}

impl<T> Deref for TrackedSet<T> {
    type Target = BTreeSet<T>;

    fn deref(&self) -> &BTreeSet<T> {
        &self.items
    }
}

impl<T> Default for TrackedSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> Clone for TrackedSet<T> {
    fn clone(&self) -> Self {
        Self {
            items: self.items.clone(),
            notifier: None,
        }
    }
}

impl<T: PartialEq> PartialEq for TrackedSet<T> {
    fn eq(&self, other: &Self) -> bool {
        self.items == other.items
    }
}

impl<T: Eq> Eq for TrackedSet<T> {}

impl<T: std::fmt::Debug> std::fmt::Debug for TrackedSet<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(&self.items).finish()
    }
}

impl<T> From<BTreeSet<T>> for TrackedSet<T> {
    fn from(items: BTreeSet<T>) -> Self {
        Self {
            items,
            notifier: None,
        }
    }
}

impl<T: Ord> FromIterator<T> for TrackedSet<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        BTreeSet::from_iter(iter).into()
    }
}

impl<'a, T> IntoIterator for &'a TrackedSet<T> {
    type Item = &'a T;
    type IntoIter = std::collections::btree_set::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

impl<T: Serialize> Serialize for TrackedSet<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(&self.items)
    }
}

impl<'de, T: Deserialize<'de> + Ord> Deserialize<'de> for TrackedSet<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Vec::<T>::deserialize(deserializer).map(|items| items.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::recording;
    use super::*;

    #[test]
    fn test_every_mutating_call_notifies_once() {
        let (notifier, sink) = recording("tags");
        let mut tags = TrackedSet::new();
        tags.attach(&notifier);
        assert!(tags.insert("x".to_string()));
        assert!(!tags.insert("x".to_string()));
        assert!(tags.remove("x"));
        tags.clear();
        assert_eq!(sink.count(), 4);
    }

    #[test]
    fn test_reads_do_not_notify() {
        let (notifier, sink) = recording("tags");
        let mut tags: TrackedSet<i32> = [1, 2, 3].into_iter().collect();
        tags.attach(&notifier);
        assert!(tags.contains(&2));
        assert_eq!(tags.len(), 3);
        assert_eq!(tags.iter().copied().max(), Some(3));
        assert_eq!(sink.count(), 0);
    }

    #[test]
    fn test_extend_and_retain_are_batches() {
        let (notifier, sink) = recording("tags");
        let mut tags = TrackedSet::new();
        tags.attach(&notifier);
        tags.extend(1..=10);
        tags.retain(|n| n % 2 == 0);
        assert_eq!(tags.len(), 5);
        assert_eq!(sink.count(), 2);
    }

    #[test]
    fn test_serializes_as_array() {
        let tags: TrackedSet<&str> = ["b", "a"].into_iter().collect();
        assert_eq!(
            serde_json::to_value(&tags).unwrap(),
            serde_json::json!(["a", "b"])
        );
        let back: TrackedSet<String> =
            serde_json::from_value(serde_json::json!(["x", "x", "y"])).unwrap();
        assert_eq!(back.len(), 2);
    }
}
