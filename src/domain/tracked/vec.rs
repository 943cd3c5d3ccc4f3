//! Tracked sequence, the array analogue.

use std::ops::{Deref, RangeBounds};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::{Kind, Notifier, Slot, Track, attach_slot, batched};

/// A `Vec` that reports every mutation to its owning key.
///
/// Single-element operations notify once each. Bulk operations
/// (`extend`, `retain`, `sort*`, `reverse`, `fill`, `splice`, `drain`,
/// `copy_within`, `dedup`) run as one batch and notify once in total.
/// Reads go through `Deref<Target = [T]>`.
pub struct TrackedVec<T> {
    items: Vec<T>,
    notifier: Option<Notifier>,
}

impl<T> TrackedVec<T> {
    /// Create an empty, unattached sequence.
    pub const fn new() -> Self {
        Self {
            items: Vec::new(),
            notifier: None,
        }
    }

    /// Unwrap into the plain vector.
    pub fn into_inner(self) -> Vec<T> {
        self.items
    }

    /// Whether this sequence currently reports to an owning key.
    pub const fn is_attached(&self) -> bool {
        self.notifier.is_some()
    }

    /// Run several mutations as one batch: exactly one notification
    /// fires after `f` returns, however many mutations it made.
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

impl<T: Track> TrackedVec<T> {
    fn adopt(&self, value: &mut T) {
        if let Some(notifier) = &self.notifier {
            value.attach(notifier);
        }
    }

    /// Mutable access to one element.
    pub fn get_mut(&mut self, index: usize) -> Option<Slot<'_, T>> {
        let Self { items, notifier } = self;
        items
            .get_mut(index)
            .map(|value| Slot::new(value, notifier.as_ref()))
    }

    /// Overwrite the element at `index`, returning the old one.
    ///
    /// # Panics
    /// Panics if `index` is out of bounds, like slice indexing.
    pub fn set(&mut self, index: usize, mut value: T) -> T {
        self.adopt(&mut value);
        let mut old = std::mem::replace(&mut self.items[index], value);
        old.detach();
        self.touch();
        old
    }

    /// Append an element.
    pub fn push(&mut self, mut value: T) {
        self.adopt(&mut value);
        self.items.push(value);
        self.touch();
    }

    /// Remove the last element. Reports a mutation even when empty.
    pub fn pop(&mut self) -> Option<T> {
        let mut value = self.items.pop();
        value.detach();
        self.touch();
        value
    }

    /// Insert an element at `index`, shifting later ones.
    pub fn insert(&mut self, index: usize, mut value: T) {
        self.adopt(&mut value);
        self.items.insert(index, value);
        self.touch();
    }

    /// Remove and return the element at `index`.
    pub fn remove(&mut self, index: usize) -> T {
        let mut value = self.items.remove(index);
        value.detach();
        self.touch();
        value
    }

    /// Swap two elements.
    pub fn swap(&mut self, a: usize, b: usize) {
        self.items.swap(a, b);
        self.touch();
    }

    /// Shorten the sequence to `len` elements.
    pub fn truncate(&mut self, len: usize) {
        for value in self.items.iter_mut().skip(len) {
            value.detach();
        }
        self.items.truncate(len);
        self.touch();
    }

    /// Remove every element.
    pub fn clear(&mut self) {
        self.truncate(0);
    }

    /// Append every element of `iter` as one batch.
    pub fn extend(&mut self, iter: impl IntoIterator<Item = T>) {
        self.batch(|this| {
            for value in iter {
                this.push(value);
            }
        });
    }

    /// Keep only elements matching `keep`, as one batch.
    pub fn retain(&mut self, mut keep: impl FnMut(&T) -> bool) {
        self.batch(|this| {
            this.items.retain_mut(|value| {
                let kept = keep(value);
                if !kept {
                    value.detach();
                }
                kept
            });
        });
    }

    /// Reverse in place, as one batch.
    pub fn reverse(&mut self) {
        self.batch(|this| this.items.reverse());
    }

    /// Sort with a comparator, as one batch.
    pub fn sort_by(&mut self, compare: impl FnMut(&T, &T) -> std::cmp::Ordering) {
        self.batch(|this| this.items.sort_by(compare));
    }

    /// Sort by a derived key, as one batch.
    pub fn sort_by_key<K: Ord>(&mut self, key: impl FnMut(&T) -> K) {
        self.batch(|this| this.items.sort_by_key(key));
    }

    /// Replace `range` with `replace_with`, returning the removed elements.
    /// One batch.
    pub fn splice<R, I>(&mut self, range: R, replace_with: I) -> Vec<T>
    where
        R: RangeBounds<usize>,
        I: IntoIterator<Item = T>,
    {
        self.batch(|this| {
            let mut incoming: Vec<T> = replace_with.into_iter().collect();
            for value in &mut incoming {
                this.adopt(value);
            }
            let mut removed: Vec<T> = this.items.splice(range, incoming).collect();
            for value in &mut removed {
                value.detach();
            }
            removed
        })
    }

    /// Remove `range`, returning the removed elements. One batch.
    pub fn drain<R: RangeBounds<usize>>(&mut self, range: R) -> Vec<T> {
        self.splice(range, std::iter::empty())
    }
}

impl<T: Track + Ord> TrackedVec<T> {
    /// Sort ascending, as one batch.
    pub fn sort(&mut self) {
        self.batch(|this| this.items.sort());
    }
}

impl<T: Track + Clone> TrackedVec<T> {
    /// Overwrite every element with `value`, as one batch.
    pub fn fill(&mut self, value: T) {
        self.batch(|this| {
            for index in 0..this.items.len() {
                this.set(index, value.clone());
            }
        });
    }
}

impl<T: Track + Copy> TrackedVec<T> {
    /// Copy `src` to the position starting at `dest`, as one batch.
    pub fn copy_within<R: RangeBounds<usize>>(&mut self, src: R, dest: usize) {
        self.batch(|this| this.items.copy_within(src, dest));
    }
}

impl<T: Track + PartialEq> TrackedVec<T> {
    /// Remove consecutive duplicates, as one batch.
    pub fn dedup(&mut self) {
        self.batch(|this| this.items.dedup());
    }
}

impl<T: Track> Track for TrackedVec<T> {
    const KIND: Kind = Kind::Sequence;

    fn attach(&mut self, notifier: &Notifier) -> bool {
        if !attach_slot(&mut self.notifier, notifier) {
            return false;
        }
        for value in &mut self.items {
            value.attach(notifier);
        }
        true
    }

    fn detach(&mut self) {
        if self.notifier.take().is_some() {
            for value in &mut self.items {
                value.detach();
            }
        }
    }
}

impl<T> Deref for TrackedVec<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.items
    }
}

impl<T> Default for TrackedVec<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Clones are detached copies; only the registered value reports.
impl<T: Clone> Clone for TrackedVec<T> {
    fn clone(&self) -> Self {
        Self {
            items: self.items.clone(),
            notifier: None,
        }
    }
}

impl<T: PartialEq> PartialEq for TrackedVec<T> {
    fn eq(&self, other: &Self) -> bool {
        self.items == other.items
    }
}

impl<T: Eq> Eq for TrackedVec<T> {}

impl<T: std::fmt::Debug> std::fmt::Debug for TrackedVec<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(&self.items).finish()
    }
}

impl<T> From<Vec<T>> for TrackedVec<T> {
    fn from(items: Vec<T>) -> Self {
        Self {
            items,
            notifier: None,
        }
    }
}

impl<T> FromIterator<T> for TrackedVec<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Vec::from_iter(iter).into()
    }
}

impl<'a, T> IntoIterator for &'a TrackedVec<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

impl<T: Serialize> Serialize for TrackedVec<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.items.serialize(serializer)
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for TrackedVec<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Vec::deserialize(deserializer).map(Self::from)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::recording;
    use super::*;

    fn attached(items: Vec<i64>) -> (TrackedVec<i64>, std::sync::Arc<super::super::testing::RecordingSink>) {
        let (notifier, sink) = recording("list");
        let mut vec = TrackedVec::from(items);
        vec.attach(&notifier);
        (vec, sink)
    }

    #[test]
    fn test_unattached_vec_mutates_silently() {
        let mut vec = TrackedVec::new();
        vec.push(1_i64);
        vec.push(2);
        assert_eq!(&*vec, &[1, 2]);
        assert!(!vec.is_attached());
    }

    #[test]
    fn test_single_element_ops_notify_once_each() {
        let (mut vec, sink) = attached(vec![1, 2, 3]);
        vec.push(4);
        vec.pop();
        vec.insert(0, 0);
        vec.remove(0);
        vec.set(1, 20);
        assert_eq!(sink.count(), 5);
        assert_eq!(&*vec, &[1, 20, 3]);
    }

    #[test]
    fn test_pop_on_empty_still_notifies() {
        let (mut vec, sink) = attached(vec![]);
        assert_eq!(vec.pop(), None);
        assert_eq!(sink.count(), 1);
    }

    #[test]
    fn test_sort_notifies_exactly_once() {
        let (mut vec, sink) = attached(vec![5, 3, 9, 1, 7]);
        vec.sort();
        assert_eq!(&*vec, &[1, 3, 5, 7, 9]);
        assert_eq!(sink.count(), 1);
    }

    #[test]
    fn test_fill_batches_internal_writes() {
        let (mut vec, sink) = attached(vec![1, 2, 3, 4]);
        vec.fill(0);
        assert_eq!(&*vec, &[0, 0, 0, 0]);
        assert_eq!(sink.count(), 1);
    }

    #[test]
    fn test_splice_returns_removed_and_notifies_once() {
        let (mut vec, sink) = attached(vec![1, 2, 3, 4]);
        let removed = vec.splice(1..3, [7, 8, 9]);
        assert_eq!(removed, vec![2, 3]);
        assert_eq!(&*vec, &[1, 7, 8, 9, 4]);
        assert_eq!(sink.count(), 1);
    }

    #[test]
    fn test_user_batch_nests_bulk_operations() {
        let (mut vec, sink) = attached(vec![3, 1, 2]);
        vec.batch(|v| {
            v.push(0);
            v.sort();
            v.reverse();
            v.extend([10, 11]);
        });
        assert_eq!(&*vec, &[3, 2, 1, 0, 10, 11]);
        assert_eq!(sink.count(), 1);
    }

    #[test]
    fn test_nested_vec_forwards_to_owner() {
        let (notifier, sink) = recording("grid");
        let mut grid: TrackedVec<TrackedVec<i64>> =
            vec![TrackedVec::from(vec![1]), TrackedVec::from(vec![2])].into();
        grid.attach(&notifier);
        grid.get_mut(1).unwrap().push(3);
        assert_eq!(sink.count(), 1);
        assert_eq!(&*grid[1], &[2, 3]);
    }

    #[test]
    fn test_element_replaced_through_slot_reports_once() {
        let (notifier, sink) = recording("grid");
        let mut grid: TrackedVec<TrackedVec<i64>> = vec![TrackedVec::from(vec![1])].into();
        grid.attach(&notifier);
        {
            let mut row = grid.get_mut(0).unwrap();
            *row = TrackedVec::from(vec![5, 6]);
        }
        assert_eq!(sink.count(), 1);
        assert!(grid[0].is_attached());
    }

    #[test]
    fn test_removed_child_is_detached() {
        let (notifier, sink) = recording("grid");
        let mut grid: TrackedVec<TrackedVec<i64>> = vec![TrackedVec::from(vec![1])].into();
        grid.attach(&notifier);
        let mut child = grid.pop().unwrap();
        assert!(!child.is_attached());
        child.push(2);
        assert_eq!(sink.count(), 1);
    }

    #[test]
    fn test_clone_is_detached() {
        let (vec, _sink) = attached(vec![1]);
        assert!(vec.is_attached());
        assert!(!vec.clone().is_attached());
    }

    #[test]
    fn test_serializes_as_plain_array() {
        let vec = TrackedVec::from(vec![1, 2]);
        assert_eq!(serde_json::to_value(&vec).unwrap(), serde_json::json!([1, 2]));
        let back: TrackedVec<i64> = serde_json::from_value(serde_json::json!([3])).unwrap();
        assert_eq!(&*back, &[3]);
    }
}
