//! Memory Store - In-process Session Store with a Write Log
//!
//! Values live in a `RwLock`ed JSON map. Every successful `set` call is
//! appended to a write log so callers can assert exactly what crossed
//! the store boundary, and how many times.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use tracing::trace;

use crate::ports::store::{SessionStore, StoreError, StoreValues};

/// In-memory session store.
#[derive(Default)]
pub struct MemoryStore {
    /// Current stored state.
    values: RwLock<StoreValues>,
    /// Every `set` payload, in call order.
    writes: Mutex<Vec<StoreValues>>,
    /// Number of `get` calls served.
    reads: AtomicUsize,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with `values`.
    pub fn with_values(values: StoreValues) -> Self {
        Self {
            values: RwLock::new(values),
            ..Self::default()
        }
    }

    /// Copy of the current stored state.
    pub fn snapshot(&self) -> StoreValues {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Every `set` payload received so far.
    pub fn writes(&self) -> Vec<StoreValues> {
        self.writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of `set` calls received so far.
    pub fn write_count(&self) -> usize {
        self.writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Number of `get` calls served so far.
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }

    /// Forget the write log, keeping stored values.
    pub fn clear_writes(&self) {
        self.writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn get(&self, keys: Option<Vec<String>>) -> Result<StoreValues, StoreError> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        let values = self.values.read().unwrap_or_else(PoisonError::into_inner);
        let found = match keys {
            None => values.clone(),
            Some(keys) => keys
                .into_iter()
                .filter_map(|key| values.get(&key).cloned().map(|value| (key, value)))
                .collect(),
        };
        trace!(found = found.len(), "memory store read");
        Ok(found)
    }

    async fn set(&self, values: StoreValues) -> Result<(), StoreError> {
        {
            let mut stored = self.values.write().unwrap_or_else(PoisonError::into_inner);
            for (key, value) in &values {
                stored.insert(key.clone(), value.clone());
            }
        }
        trace!(keys = values.len(), "memory store write");
        self.writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(values);
        Ok(())
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("keys", &self.snapshot().len())
            .field("writes", &self.write_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn values(raw: serde_json::Value) -> StoreValues {
        raw.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_get_filters_to_requested_keys() {
        let store = MemoryStore::with_values(values(json!({"a": 1, "b": 2})));
        let found = store
            .get(Some(vec!["a".to_string(), "missing".to_string()]))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found["a"], json!(1));
        assert_eq!(store.read_count(), 1);
    }

    #[tokio::test]
    async fn test_get_without_filter_returns_everything() {
        let store = MemoryStore::with_values(values(json!({"a": 1, "b": 2})));
        assert_eq!(store.get(None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_set_merges_and_logs() {
        let store = MemoryStore::with_values(values(json!({"a": 1})));
        store.set(values(json!({"b": [1]}))).await.unwrap();
        store.set(values(json!({"a": null}))).await.unwrap();
        assert_eq!(
            serde_json::Value::Object(store.snapshot()),
            json!({"a": null, "b": [1]})
        );
        assert_eq!(store.write_count(), 2);
        assert_eq!(store.writes()[0], values(json!({"b": [1]})));
        store.clear_writes();
        assert_eq!(store.write_count(), 0);
    }
}
