//! Change Tracking - Containers that report their own mutation
//!
//! A registered value may hold sequences, sets, maps and records nested
//! to any depth. Each tracked container carries a [`Notifier`] for the
//! top-level key that owns it; every mutating operation calls
//! [`Notifier::notify`], and the registry re-persists that key.
//!
//! Dispatch is static: every trackable type declares one [`Kind`].
//! Scalars ignore their notifier and are persisted either by reassigning
//! the owning key or, when reached through a [`Slot`], when the slot is
//! released after mutable use.
//!
//! Bulk operations (sort, splice, fill, ...) run as a batch. Batches
//! nest: the owning key keeps a depth counter, notifications inside a
//! batch are deferred, and exactly one fires when the outermost batch
//! ends.

mod map;
mod record;
mod set;
mod value;
mod vec;

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

pub use map::TrackedMap;
pub use record::TrackedRecord;
pub use set::TrackedSet;
pub use value::TrackedValue;
pub use vec::TrackedVec;

/// The closed set of value shapes the tracking layer distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    /// Opaque value. Changes are only seen through reassignment.
    Scalar,
    /// Ordered sequence (`TrackedVec`).
    Sequence,
    /// Set of unique elements (`TrackedSet`).
    AssociativeSet,
    /// Map with arbitrary ordered keys (`TrackedMap`).
    AssociativeMap,
    /// String-keyed record (`TrackedRecord`).
    Record,
}

/// Receiver of "this key changed" events.
///
/// The registry implements this by queueing the key for persistence.
pub trait DirtySink: Send + Sync {
    /// Called once per tracked mutation (or once per outermost batch).
    fn mark_dirty(&self, key: &Arc<str>);
}

struct OwnerHook {
    key: Arc<str>,
    depth: AtomicUsize,
    deferred: AtomicBool,
    sink: Arc<dyn DirtySink>,
}

/// Handle to the persistence hook of one top-level key.
///
/// Cloning is cheap; all clones share the same batch depth.
#[derive(Clone)]
pub struct Notifier {
    hook: Arc<OwnerHook>,
}

impl Notifier {
    /// Create the hook for `key`, reporting to `sink`.
    pub fn new(key: impl Into<Arc<str>>, sink: Arc<dyn DirtySink>) -> Self {
        Self {
            hook: Arc::new(OwnerHook {
                key: key.into(),
                depth: AtomicUsize::new(0),
                deferred: AtomicBool::new(false),
                sink,
            }),
        }
    }

    /// Owning top-level key.
    pub fn key(&self) -> &str {
        &self.hook.key
    }

    /// Report one mutation. Deferred while a batch is open.
    pub fn notify(&self) {
        if self.hook.depth.load(Ordering::Acquire) > 0 {
            self.hook.deferred.store(true, Ordering::Release);
        } else {
            self.hook.sink.mark_dirty(&self.hook.key);
        }
    }

    /// Open a batch on the owning key. The batch closes when the guard drops.
    pub fn batch(&self) -> BatchGuard {
        self.hook.depth.fetch_add(1, Ordering::AcqRel);
        BatchGuard {
            notifier: self.clone(),
            absorb: false,
        }
    }

    /// Whether a batch is currently open on the owning key.
    pub fn in_batch(&self) -> bool {
        self.hook.depth.load(Ordering::Acquire) > 0
    }

    /// True when both handles report to the same key hook.
    pub fn same_owner(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.hook, &other.hook)
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("key", &self.hook.key)
            .field("depth", &self.hook.depth.load(Ordering::Relaxed))
            .finish()
    }
}

/// Open batch on a key. Restores the depth counter on drop, unwinding included.
#[must_use = "the batch closes as soon as the guard is dropped"]
pub struct BatchGuard {
    notifier: Notifier,
    absorb: bool,
}

impl BatchGuard {
    /// Close the batch without firing a deferred notification.
    ///
    /// Used when the caller persists the key itself right after.
    pub fn absorb(mut self) {
        self.absorb = true;
    }
}

impl Drop for BatchGuard {
    fn drop(&mut self) {
        let hook = &self.notifier.hook;
        if hook.depth.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }
        if hook.deferred.swap(false, Ordering::AcqRel) && !self.absorb {
            hook.sink.mark_dirty(&hook.key);
        }
    }
}

/// A value the tracking layer knows how to wrap.
///
/// Containers store the notifier and pass it down to their children.
/// Attaching the notifier a value already holds is a no-op, so wrapping
/// twice never produces a second identity.
pub trait Track {
    /// Static shape of the type.
    const KIND: Kind = Kind::Scalar;

    /// Shape of this particular value. Only dynamic values override it.
    fn kind(&self) -> Kind {
        Self::KIND
    }

    /// Start reporting mutations to `notifier`.
    ///
    /// Returns `true` when a container was newly attached, i.e. it was
    /// detached or reported to another owner. A container that appears
    /// detached where an attached one used to be has been replaced
    /// wholesale, which callers report as a write.
    fn attach(&mut self, notifier: &Notifier) -> bool {
        let _ = notifier;
        false
    }

    /// Stop reporting mutations.
    fn detach(&mut self) {}
}

macro_rules! scalar_track {
    ($($ty:ty),* $(,)?) => {
        $(impl Track for $ty {})*
    };
}

scalar_track!(
    (),
    bool,
    char,
    i8,
    i16,
    i32,
    i64,
    i128,
    isize,
    u8,
    u16,
    u32,
    u64,
    u128,
    usize,
    f32,
    f64,
    String,
    serde_json::Value,
);

impl<T> Track for Vec<T> {}
impl<T> Track for BTreeSet<T> {}
impl<K, V> Track for BTreeMap<K, V> {}
impl<T, H> Track for HashSet<T, H> {}
impl<K, V, H> Track for HashMap<K, V, H> {}

impl<T: Track> Track for Option<T> {
    fn kind(&self) -> Kind {
        self.as_ref().map_or(Kind::Scalar, Track::kind)
    }

    fn attach(&mut self, notifier: &Notifier) -> bool {
        self.as_mut().is_some_and(|inner| inner.attach(notifier))
    }

    fn detach(&mut self) {
        if let Some(inner) = self {
            inner.detach();
        }
    }
}

/// Install `notifier` into a container's slot.
///
/// Returns `false` when the container already reports to that owner, in
/// which case its children are already attached too.
pub(crate) fn attach_slot(slot: &mut Option<Notifier>, notifier: &Notifier) -> bool {
    if slot.as_ref().is_some_and(|current| current.same_owner(notifier)) {
        return false;
    }
    *slot = Some(notifier.clone());
    true
}

/// Run `f` inside a batch on `notifier` (if any) and notify once at the end.
pub(crate) fn batched<C, R>(
    container: &mut C,
    notifier: Option<Notifier>,
    f: impl FnOnce(&mut C) -> R,
) -> R {
    let guard = notifier.as_ref().map(Notifier::batch);
    let out = f(container);
    if let Some(notifier) = &notifier {
        notifier.notify();
    }
    drop(guard);
    out
}

/// Mutable access to one member of a tracked container.
///
/// Dropping the slot after mutable use re-attaches the member and reports
/// one mutation when the member was or became a scalar, or was replaced
/// by a container that was not yet attached. In-place container edits
/// report on their own.
pub struct Slot<'a, T: Track> {
    value: &'a mut T,
    notifier: Option<&'a Notifier>,
    kind_before: Option<Kind>,
    replaced: bool,
}

impl<'a, T: Track> Slot<'a, T> {
    pub(crate) fn new(value: &'a mut T, notifier: Option<&'a Notifier>) -> Self {
        Self {
            value,
            notifier,
            kind_before: None,
            replaced: false,
        }
    }

    /// Replace the member wholesale, reporting the write whatever its kind.
    pub fn replace(mut self, value: T) -> T {
        self.replaced = true;
        std::mem::replace(&mut *self, value)
    }
}

impl<T: Track> Deref for Slot<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.value
    }
}

impl<T: Track> DerefMut for Slot<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        if self.kind_before.is_none() {
            self.kind_before = Some(self.value.kind());
        }
        self.value
    }
}

impl<T: Track> Drop for Slot<'_, T> {
    fn drop(&mut self) {
        let (Some(before), Some(notifier)) = (self.kind_before, self.notifier) else {
            return;
        };
        let fresh = self.value.attach(notifier);
        if fresh || self.replaced || before == Kind::Scalar || self.value.kind() == Kind::Scalar {
            notifier.notify();
        }
    }
}

impl<T: Track + std::fmt::Debug> std::fmt::Debug for Slot<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Slot").field(&self.value).finish()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Sink that records every key it is told about.
    #[derive(Default)]
    pub struct RecordingSink {
        pub keys: Mutex<Vec<String>>,
    }

    impl RecordingSink {
        pub fn count(&self) -> usize {
            self.keys.lock().unwrap().len()
        }
    }

    impl DirtySink for RecordingSink {
        fn mark_dirty(&self, key: &Arc<str>) {
            self.keys.lock().unwrap().push(key.to_string());
        }
    }

    pub fn recording(key: &str) -> (Notifier, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        (Notifier::new(key, sink.clone()), sink)
    }
}

#[cfg(test)]
mod tests {
    use super::testing::recording;
    use super::*;

    #[test]
    fn test_notify_outside_batch_fires_immediately() {
        let (notifier, sink) = recording("count");
        notifier.notify();
        notifier.notify();
        assert_eq!(sink.count(), 2);
    }

    #[test]
    fn test_nested_batches_fire_once_at_outermost_end() {
        let (notifier, sink) = recording("list");
        let outer = notifier.batch();
        {
            let _inner = notifier.batch();
            notifier.notify();
            notifier.notify();
        }
        assert!(notifier.in_batch());
        assert_eq!(sink.count(), 0);
        drop(outer);
        assert!(!notifier.in_batch());
        assert_eq!(sink.count(), 1);
    }

    #[test]
    fn test_empty_batch_does_not_fire() {
        let (notifier, sink) = recording("list");
        drop(notifier.batch());
        assert_eq!(sink.count(), 0);
    }

    #[test]
    fn test_absorbed_batch_swallows_deferred_notification() {
        let (notifier, sink) = recording("list");
        let guard = notifier.batch();
        notifier.notify();
        guard.absorb();
        assert_eq!(sink.count(), 0);
        notifier.notify();
        assert_eq!(sink.count(), 1);
    }

    #[test]
    fn test_batch_depth_restored_after_panic() {
        let (notifier, sink) = recording("list");
        let cloned = notifier.clone();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = cloned.batch();
            cloned.notify();
            panic!("comparator blew up");
        }));
        assert!(result.is_err());
        assert!(!notifier.in_batch());
        assert_eq!(sink.count(), 1);
    }

    #[test]
    fn test_scalar_slot_notifies_only_after_mutable_use() {
        let (notifier, sink) = recording("n");
        let mut value = 1_i64;
        {
            let slot = Slot::new(&mut value, Some(&notifier));
            assert_eq!(*slot, 1);
        }
        assert_eq!(sink.count(), 0);
        {
            let mut slot = Slot::new(&mut value, Some(&notifier));
            *slot += 1;
        }
        assert_eq!(value, 2);
        assert_eq!(sink.count(), 1);
    }

    #[test]
    fn test_option_takes_kind_of_its_content() {
        let mut list = Some(TrackedVec::from(vec![1_i64]));
        assert_eq!(list.kind(), Kind::Sequence);
        assert_eq!(None::<TrackedVec<i64>>.kind(), Kind::Scalar);

        let (notifier, sink) = recording("list");
        assert!(list.attach(&notifier));
        assert!(!list.attach(&notifier));
        {
            let mut slot = Slot::new(&mut list, Some(&notifier));
            if let Some(inner) = slot.as_mut() {
                inner.push(2);
            }
        }
        assert_eq!(sink.count(), 1);
    }

    #[test]
    fn test_attach_reports_fresh_containers_only() {
        let (notifier, _) = recording("doc");
        let mut scalar = 3_i64;
        assert!(!scalar.attach(&notifier));

        let mut list = TrackedVec::<i64>::new();
        assert!(list.attach(&notifier));
        assert!(!list.attach(&notifier));

        let (other, _) = recording("other");
        assert!(list.attach(&other));
    }

    #[test]
    fn test_same_owner_compares_hook_identity() {
        let (a, _) = recording("a");
        let (b, _) = recording("a");
        assert!(a.same_owner(&a.clone()));
        assert!(!a.same_owner(&b));
    }
}
