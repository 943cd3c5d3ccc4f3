//! Value Registry - Typed Session Values Bound to a Store
//!
//! Orchestrates the domain (tracked values, codecs) with the
//! `SessionStore` port:
//! - Registration of typed keys with an initial value and a codec
//! - Batched and single-key loading, with a "fully loaded" signal
//! - The write path (explicit sets, saves, tracked mutations)
//!
//! Each registered key gets an [`Item`] handle. Values live behind a
//! mutex shared by the handle and the registry; the background persister
//! encodes from that same cell, so every write sends the full current
//! value.

use std::any::{Any, type_name};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use super::persister::{self, PersistQueue, Snapshot};
use crate::config::RegistryConfig;
use crate::domain::codec::{Codec, JsonCodec};
use crate::domain::tracked::{Kind, Notifier, Track};
use crate::error::{SessionError, SessionResult};
use crate::ports::store::SessionStore;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Load bookkeeping published to `await_loaded` callers.
#[derive(Debug, Clone, Default)]
struct LoadProgress {
    /// Keys still waiting for their first answered load.
    pending: usize,
    /// Keys found by the most recent load operation.
    loaded: BTreeSet<String>,
}

/// Current and declared value of one key.
struct ValueCell<T> {
    current: Mutex<T>,
    initial: T,
}

/// Type-erased view of an entry, used by loads, lookups and the persister.
trait ErasedEntry: Send + Sync {
    fn encode(&self) -> SessionResult<Value>;
    fn install(&self, raw: Value) -> SessionResult<()>;
    fn key(&self) -> Arc<str>;
    fn cell(&self) -> Arc<dyn Any + Send + Sync>;
    fn notifier(&self) -> Option<Notifier>;
}

struct Entry<T, C> {
    key: Arc<str>,
    cell: Arc<ValueCell<T>>,
    codec: C,
    notifier: Option<Notifier>,
}

impl<T, C> ErasedEntry for Entry<T, C>
where
    T: Track + Send + Sync + 'static,
    C: Codec<T>,
{
    fn encode(&self) -> SessionResult<Value> {
        let current = lock(&self.cell.current);
        self.codec
            .encode(&current)
            .map_err(|source| SessionError::Serialization {
                key: self.key.to_string(),
                source,
            })
    }

    fn install(&self, raw: Value) -> SessionResult<()> {
        let mut decoded =
            self.codec
                .decode(raw)
                .map_err(|source| SessionError::Deserialization {
                    key: self.key.to_string(),
                    source,
                })?;
        if let Some(notifier) = &self.notifier {
            decoded.attach(notifier);
        }
        *lock(&self.cell.current) = decoded;
        Ok(())
    }

    fn key(&self) -> Arc<str> {
        Arc::clone(&self.key)
    }

    fn cell(&self) -> Arc<dyn Any + Send + Sync> {
        Arc::clone(&self.cell) as Arc<dyn Any + Send + Sync>
    }

    fn notifier(&self) -> Option<Notifier> {
        self.notifier.clone()
    }
}

struct Inner<S> {
    store: Arc<S>,
    config: RegistryConfig,
    entries: RwLock<BTreeMap<String, Arc<dyn ErasedEntry>>>,
    pending: Mutex<BTreeSet<String>>,
    progress: watch::Sender<LoadProgress>,
    queue: PersistQueue,
}

impl<S: SessionStore> Inner<S> {
    fn entry(&self, key: &str) -> Option<Arc<dyn ErasedEntry>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Mark `attempted` as answered (or failed) and publish progress.
    fn settle(&self, attempted: &[String], loaded: BTreeSet<String>) {
        let mut pending = lock(&self.pending);
        for key in attempted {
            pending.remove(key);
        }
        let remaining = pending.len();
        self.progress.send_modify(|progress| {
            progress.pending = remaining;
            progress.loaded = loaded;
        });
    }
}

impl<S: SessionStore> Snapshot for Inner<S> {
    fn snapshot(&self, key: &str) -> SessionResult<Value> {
        self.entry(key)
            .ok_or_else(|| SessionError::UndeclaredKey(key.to_string()))?
            .encode()
    }
}

/// Registry of typed session values bound to one store.
///
/// Cheap to clone; clones share the same entries and persister.
/// Must be created inside a tokio runtime: construction spawns the
/// background persister task, which stops once the registry and every
/// handle are dropped.
pub struct Registry<S: SessionStore> {
    inner: Arc<Inner<S>>,
}

impl<S: SessionStore> Clone for Registry<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: SessionStore> Registry<S> {
    /// Create a registry over `store`.
    pub fn new(store: Arc<S>, config: &RegistryConfig) -> Self {
        let (queue, rx) = PersistQueue::channel();
        let (progress, _) = watch::channel(LoadProgress::default());

        let inner = Arc::new(Inner {
            store: Arc::clone(&store),
            config: config.clone(),
            entries: RwLock::new(BTreeMap::new()),
            pending: Mutex::new(BTreeSet::new()),
            progress,
            queue,
        });

        tokio::spawn(persister::run(rx, Arc::downgrade(&inner), store));

        info!(auto_save = config.auto_save, "Session registry created");
        Self { inner }
    }

    /// Create a registry with default settings (auto-save on).
    pub fn with_defaults(store: Arc<S>) -> Self {
        Self::new(store, &RegistryConfig::default())
    }

    /// Declare keys up front; [`RegistryBuilder::build`] registers them
    /// and starts the bulk load.
    pub fn builder(store: Arc<S>) -> RegistryBuilder<S> {
        RegistryBuilder {
            store,
            config: RegistryConfig::default(),
            definitions: Vec::new(),
        }
    }

    /// The store this registry persists into.
    pub fn store(&self) -> &Arc<S> {
        &self.inner.store
    }

    /// Whether tracked mutations persist on their own.
    pub fn auto_save(&self) -> bool {
        self.inner.config.auto_save
    }

    /// Register `key` with the default JSON codec.
    ///
    /// # Errors
    /// Returns [`SessionError::DuplicateKey`] if `key` is already registered.
    pub fn register<T>(&self, key: impl Into<String>, initial: T) -> SessionResult<Item<T, S>>
    where
        T: Track + Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    {
        self.register_with(key, initial, JsonCodec)
    }

    /// Register `key` with an explicit codec.
    ///
    /// The key joins the pending-load set; it stays at `initial` until a
    /// load finds a stored value for it.
    ///
    /// # Errors
    /// Returns [`SessionError::DuplicateKey`] if `key` is already registered.
    pub fn register_with<T, C>(
        &self,
        key: impl Into<String>,
        initial: T,
        codec: C,
    ) -> SessionResult<Item<T, S>>
    where
        T: Track + Clone + Send + Sync + 'static,
        C: Codec<T>,
    {
        let key: String = key.into();
        let shared_key: Arc<str> = Arc::from(key.as_str());

        let notifier = self.inner.config.auto_save.then(|| {
            Notifier::new(
                Arc::clone(&shared_key),
                Arc::new(self.inner.queue.clone()),
            )
        });

        let mut current = initial.clone();
        if let Some(notifier) = &notifier {
            current.attach(notifier);
        }
        let kind = current.kind();
        let cell = Arc::new(ValueCell {
            current: Mutex::new(current),
            initial,
        });

        {
            let mut entries = self
                .inner
                .entries
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            if entries.contains_key(&key) {
                return Err(SessionError::DuplicateKey(key));
            }
            entries.insert(
                key.clone(),
                Arc::new(Entry {
                    key: Arc::clone(&shared_key),
                    cell: Arc::clone(&cell),
                    codec,
                    notifier: notifier.clone(),
                }),
            );
        }

        {
            let mut pending = lock(&self.inner.pending);
            pending.insert(key.clone());
            let remaining = pending.len();
            self.inner
                .progress
                .send_modify(|progress| progress.pending = remaining);
        }

        debug!(key = %key, kind = ?kind, "Session value registered");

        Ok(Item {
            key: shared_key,
            cell,
            notifier,
            registry: self.clone(),
        })
    }

    /// Typed handle to an already registered key.
    ///
    /// # Errors
    /// [`SessionError::UndeclaredKey`] if `key` is unknown,
    /// [`SessionError::TypeMismatch`] if it was registered with a type
    /// other than `T`.
    pub fn item<T>(&self, key: &str) -> SessionResult<Item<T, S>>
    where
        T: Track + Send + Sync + 'static,
    {
        let entry = self
            .inner
            .entry(key)
            .ok_or_else(|| SessionError::UndeclaredKey(key.to_string()))?;
        let cell = entry
            .cell()
            .downcast::<ValueCell<T>>()
            .map_err(|_| SessionError::TypeMismatch {
                key: key.to_string(),
                requested: type_name::<T>(),
            })?;
        Ok(Item {
            key: entry.key(),
            cell,
            notifier: entry.notifier(),
            registry: self.clone(),
        })
    }

    /// Whether `key` has been registered.
    pub fn is_registered(&self, key: &str) -> bool {
        self.inner.entry(key).is_some()
    }

    /// Every registered key, sorted.
    pub fn keys(&self) -> Vec<String> {
        self.inner
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Keys whose stored value has not been looked up yet.
    pub fn pending_keys(&self) -> BTreeSet<String> {
        lock(&self.inner.pending).clone()
    }

    /// Load a single key from the store.
    ///
    /// Returns `Ok(true)` and replaces the current value when the store
    /// holds one, `Ok(false)` when it does not (the value keeps its
    /// declared initial state). Unregistered keys return `Ok(false)`
    /// without touching the store. Once the store has answered, the key
    /// leaves the pending set whatever the outcome, including a failed
    /// read.
    ///
    /// # Errors
    /// [`SessionError::StoreUnavailable`] if the read fails (the value
    /// keeps its current state), [`SessionError::Deserialization`] if the
    /// stored value does not decode (the current value is kept).
    #[instrument(skip(self))]
    pub async fn load(&self, key: &str) -> SessionResult<bool> {
        let Some(entry) = self.inner.entry(key) else {
            debug!("Ignoring load of unregistered key");
            return Ok(false);
        };

        let keys = vec![key.to_string()];
        let mut stored = match self.inner.store.get(Some(keys.clone())).await {
            Ok(stored) => stored,
            Err(e) => {
                self.inner.settle(&keys, BTreeSet::new());
                warn!(error = %e, "Store read failed, keeping current value");
                return Err(e.into());
            }
        };

        let Some(raw) = stored.remove(key) else {
            self.inner.settle(&keys, BTreeSet::new());
            debug!("No stored value, keeping initial");
            return Ok(false);
        };

        match entry.install(raw) {
            Ok(()) => {
                self.inner.settle(&keys, BTreeSet::from([key.to_string()]));
                debug!("Session value loaded");
                Ok(true)
            }
            Err(e) => {
                self.inner.settle(&keys, BTreeSet::new());
                Err(e)
            }
        }
    }

    /// Load every pending key in one batched store read.
    ///
    /// All keys in the batch leave the pending set once the store has
    /// answered. Values that fail to decode keep their current value and
    /// are left out of the result.
    ///
    /// # Errors
    /// [`SessionError::StoreUnavailable`] if the read fails. The batch
    /// still leaves the pending set with nothing loaded, so
    /// [`Registry::await_loaded`] resolves; retry a key with
    /// [`Registry::load`].
    #[instrument(skip(self))]
    pub async fn load_all(&self) -> SessionResult<BTreeSet<String>> {
        let keys: Vec<String> = lock(&self.inner.pending).iter().cloned().collect();
        if keys.is_empty() {
            debug!("Nothing pending");
            return Ok(BTreeSet::new());
        }

        let mut stored = match self.inner.store.get(Some(keys.clone())).await {
            Ok(stored) => stored,
            Err(e) => {
                self.inner.settle(&keys, BTreeSet::new());
                warn!(
                    requested = keys.len(),
                    error = %e,
                    "Store read failed, keeping initial values"
                );
                return Err(e.into());
            }
        };

        let mut loaded = BTreeSet::new();
        for key in &keys {
            let Some(raw) = stored.remove(key) else {
                continue;
            };
            let Some(entry) = self.inner.entry(key) else {
                continue;
            };
            match entry.install(raw) {
                Ok(()) => {
                    loaded.insert(key.clone());
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "Stored value ignored");
                }
            }
        }

        self.inner.settle(&keys, loaded.clone());
        info!(
            requested = keys.len(),
            loaded = loaded.len(),
            "Session values loaded"
        );
        Ok(loaded)
    }

    /// Start `load_all` in the background.
    pub fn spawn_load_all(&self) -> JoinHandle<SessionResult<BTreeSet<String>>> {
        let registry = self.clone();
        tokio::spawn(async move { registry.load_all().await })
    }

    /// Wait until no key is pending, then return the keys found by the
    /// most recent load (empty if nothing was ever loaded).
    ///
    /// Keys registered while waiting extend the wait.
    pub async fn await_loaded(&self) -> BTreeSet<String> {
        let mut rx = self.inner.progress.subscribe();
        match rx.wait_for(|progress| progress.pending == 0).await {
            Ok(progress) => progress.loaded.clone(),
            Err(_) => BTreeSet::new(),
        }
    }

    /// Re-run the write path for each key with its current value.
    ///
    /// # Errors
    /// Stops at the first key that is unregistered, fails to encode, or
    /// is refused by the store.
    #[instrument(skip(self, keys))]
    pub async fn save<I, K>(&self, keys: I) -> SessionResult<()>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        for key in keys {
            let key = key.as_ref();
            if self.inner.entry(key).is_none() {
                return Err(SessionError::UndeclaredKey(key.to_string()));
            }
            self.inner.queue.write(Arc::from(key)).await?;
        }
        Ok(())
    }

    /// Wait until every tracked mutation queued so far has reached the
    /// store.
    ///
    /// # Errors
    /// Returns the first background persistence failure since the last
    /// flush.
    pub async fn flush(&self) -> SessionResult<()> {
        self.inner.queue.flush().await
    }
}

impl<S: SessionStore> std::fmt::Debug for Registry<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("keys", &self.keys())
            .field("pending", &self.pending_keys())
            .field("auto_save", &self.auto_save())
            .finish()
    }
}

type Definition<S> = Box<dyn FnOnce(&Registry<S>) -> SessionResult<()> + Send>;

/// Declares a registry's keys before it starts loading.
///
/// ```ignore
/// let registry = Registry::builder(store)
///     .item("count", 0_i64)
///     .item("tags", TrackedSet::<String>::new())
///     .build()?;
/// let found = registry.await_loaded().await;
/// let count = registry.item::<i64>("count")?;
/// ```
pub struct RegistryBuilder<S: SessionStore> {
    store: Arc<S>,
    config: RegistryConfig,
    definitions: Vec<Definition<S>>,
}

impl<S: SessionStore> RegistryBuilder<S> {
    /// Use `config` instead of the defaults.
    #[must_use]
    pub fn config(mut self, config: &RegistryConfig) -> Self {
        self.config = config.clone();
        self
    }

    /// Declare `key` with the default JSON codec.
    #[must_use]
    pub fn item<T>(self, key: impl Into<String>, initial: T) -> Self
    where
        T: Track + Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    {
        self.item_with(key, initial, JsonCodec)
    }

    /// Declare `key` with an explicit codec.
    #[must_use]
    pub fn item_with<T, C>(mut self, key: impl Into<String>, initial: T, codec: C) -> Self
    where
        T: Track + Clone + Send + Sync + 'static,
        C: Codec<T>,
    {
        let key = key.into();
        self.definitions.push(Box::new(move |registry: &Registry<S>| {
            registry.register_with(key, initial, codec).map(drop)
        }));
        self
    }

    /// Register every declared key, then start [`Registry::load_all`] in
    /// the background. Must be called inside a tokio runtime.
    ///
    /// # Errors
    /// [`SessionError::DuplicateKey`] if a key was declared twice.
    pub fn build(self) -> SessionResult<Registry<S>> {
        let registry = Registry::new(self.store, &self.config);
        for define in self.definitions {
            define(&registry)?;
        }
        drop(registry.spawn_load_all());
        Ok(registry)
    }
}

impl<S: SessionStore> std::fmt::Debug for RegistryBuilder<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryBuilder")
            .field("config", &self.config)
            .field("declared", &self.definitions.len())
            .finish()
    }
}

/// Typed handle to one registered key.
///
/// Reads see the in-memory value immediately; writes update it first and
/// then persist, so a failed persist leaves the new value in place.
pub struct Item<T, S: SessionStore> {
    key: Arc<str>,
    cell: Arc<ValueCell<T>>,
    notifier: Option<Notifier>,
    registry: Registry<S>,
}

impl<T, S: SessionStore> Clone for Item<T, S> {
    fn clone(&self) -> Self {
        Self {
            key: Arc::clone(&self.key),
            cell: Arc::clone(&self.cell),
            notifier: self.notifier.clone(),
            registry: self.registry.clone(),
        }
    }
}

impl<T: Track, S: SessionStore> Item<T, S> {
    /// The registered key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The value this key was registered with.
    pub fn initial(&self) -> &T {
        &self.cell.initial
    }

    /// Borrow the current value.
    ///
    /// The value's lock is held while `f` runs. Calling `read`, `get`,
    /// `with_mut` or `update` on this same key (through any handle) from
    /// inside `f` deadlocks.
    pub fn read<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&lock(&self.cell.current))
    }

    /// Mutate the current value in place.
    ///
    /// Tracked containers inside the value report each mutation. When
    /// the value is (or becomes) a scalar, the closure as a whole counts
    /// as one write, and so does replacing a container wholesale. Persistence
    /// happens in the background; use [`Registry::flush`] to observe its
    /// outcome.
    ///
    /// Like [`Item::read`], `f` runs under the value's lock: touching this
    /// same key again from inside `f` deadlocks. Other keys are fine.
    pub fn with_mut<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut current = lock(&self.cell.current);
        let before = current.kind();
        let out = f(&mut current);
        if let Some(notifier) = &self.notifier {
            let fresh = current.attach(notifier);
            if fresh || before == Kind::Scalar || current.kind() == Kind::Scalar {
                notifier.notify();
            }
        }
        out
    }

    /// Replace the current value and persist it.
    ///
    /// # Errors
    /// [`SessionError::Serialization`] or [`SessionError::StoreUnavailable`];
    /// the new value stays in memory either way.
    pub async fn set(&self, mut value: T) -> SessionResult<()> {
        if let Some(notifier) = &self.notifier {
            value.attach(notifier);
        }
        *lock(&self.cell.current) = value;
        self.registry.inner.queue.write(Arc::clone(&self.key)).await
    }

    /// Mutate in place as one batch and persist exactly once, waiting
    /// for the outcome.
    ///
    /// `f` runs under the value's lock, as in [`Item::with_mut`].
    ///
    /// # Errors
    /// Same as [`Item::set`].
    pub async fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> SessionResult<R> {
        let batch = self.notifier.as_ref().map(Notifier::batch);
        let out = {
            let mut current = lock(&self.cell.current);
            let out = f(&mut current);
            if let Some(notifier) = &self.notifier {
                current.attach(notifier);
            }
            out
        };
        if let Some(batch) = batch {
            batch.absorb();
        }
        self.registry.inner.queue.write(Arc::clone(&self.key)).await?;
        Ok(out)
    }

    /// Persist the current value again.
    ///
    /// # Errors
    /// Same as [`Item::set`].
    pub async fn save(&self) -> SessionResult<()> {
        self.registry.save([&*self.key]).await
    }

    /// Load this key from the store. See [`Registry::load`].
    ///
    /// # Errors
    /// Same as [`Registry::load`].
    pub async fn load(&self) -> SessionResult<bool> {
        self.registry.load(&self.key).await
    }
}

impl<T: Track + Clone, S: SessionStore> Item<T, S> {
    /// Clone of the current value. The clone is not tracked.
    ///
    /// Takes the value's lock, so it must not be called for this key from
    /// inside a [`Item::read`] or [`Item::with_mut`] closure.
    pub fn get(&self) -> T {
        lock(&self.cell.current).clone()
    }

    /// Write the declared initial value back.
    ///
    /// # Errors
    /// Same as [`Item::set`].
    pub async fn reset(&self) -> SessionResult<()> {
        self.set(self.cell.initial.clone()).await
    }
}

impl<T: Track + std::fmt::Debug, S: SessionStore> std::fmt::Debug for Item<T, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Item")
            .field("key", &self.key)
            .field("value", &*lock(&self.cell.current))
            .finish()
    }
}
