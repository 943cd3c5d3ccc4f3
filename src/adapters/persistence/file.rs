//! File Store - Atomic JSON Session File
//!
//! Keeps the whole session as one JSON object in a file. Writes merge
//! into the current contents, are written to a temporary file first and
//! then atomically renamed over the session file, so the file is always
//! either the old or the new version, never a partial write.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use crate::ports::store::{SessionStore, StoreError, StoreValues};

/// File-backed session store.
pub struct FileStore {
    /// Path to the session file.
    path: PathBuf,
    /// Temporary path for atomic writes.
    tmp_path: PathBuf,
    /// Pretty-print the JSON on disk.
    pretty: bool,
    /// Serializes read-modify-write cycles.
    io_lock: Mutex<()>,
}

impl FileStore {
    /// Open (without creating) the session file at `path`.
    ///
    /// Creates the parent directory if it doesn't exist.
    pub async fn open(path: impl AsRef<Path>, pretty: bool) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(dir).await?;
        }

        let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
        tmp_name.push(".tmp");
        let tmp_path = path.with_file_name(tmp_name);

        info!(path = %path.display(), "Session file store opened");

        Ok(Self {
            path,
            tmp_path,
            pretty,
            io_lock: Mutex::new(()),
        })
    }

    /// Path of the session file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Drop every stored value, e.g. when a new session starts.
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub async fn clear(&self) -> Result<(), StoreError> {
        let _guard = self.io_lock.lock().await;
        self.write_all(&StoreValues::new()).await?;
        info!("Session file cleared");
        Ok(())
    }

    async fn read_all(&self) -> Result<StoreValues, StoreError> {
        if !fs::try_exists(&self.path).await? {
            debug!(path = %self.path.display(), "No session file yet, starting empty");
            return Ok(StoreValues::new());
        }

        let json = fs::read_to_string(&self.path).await?;
        if json.trim().is_empty() {
            return Ok(StoreValues::new());
        }
        Ok(serde_json::from_str(&json)?)
    }

    async fn write_all(&self, values: &StoreValues) -> Result<(), StoreError> {
        let json = if self.pretty {
            serde_json::to_string_pretty(values)?
        } else {
            serde_json::to_string(values)?
        };

        // Write to tmp file
        fs::write(&self.tmp_path, json).await?;

        // Atomic rename
        fs::rename(&self.tmp_path, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for FileStore {
    #[instrument(skip(self), fields(path = %self.path.display()))]
    async fn get(&self, keys: Option<Vec<String>>) -> Result<StoreValues, StoreError> {
        let _guard = self.io_lock.lock().await;
        let mut stored = self.read_all().await?;
        let Some(keys) = keys else {
            return Ok(stored);
        };
        Ok(keys
            .into_iter()
            .filter_map(|key| stored.remove(&key).map(|value| (key, value)))
            .collect())
    }

    #[instrument(skip(self, values), fields(path = %self.path.display(), keys = values.len()))]
    async fn set(&self, values: StoreValues) -> Result<(), StoreError> {
        let _guard = self.io_lock.lock().await;
        let mut stored = self.read_all().await?;
        stored.extend(values);
        self.write_all(&stored).await?;
        debug!(total = stored.len(), "Session file written");
        Ok(())
    }
}

impl std::fmt::Debug for FileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStore")
            .field("path", &self.path)
            .field("pretty", &self.pretty)
            .finish_non_exhaustive()
    }
}
