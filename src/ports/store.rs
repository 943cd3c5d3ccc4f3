//! Session Store Port - Key/Value Persistence Interface
//!
//! The registry talks to exactly one external collaborator: an
//! asynchronous store over a flat namespace of JSON values. The host
//! owns the store; the registry only reads and merges into it.

use async_trait::async_trait;

/// Values crossing the store boundary, keyed by session key.
pub type StoreValues = serde_json::Map<String, serde_json::Value>;

/// Errors reported by store implementations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
  /// I/O failure in a file-backed store.
  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),

  /// The backing data could not be parsed or written as JSON.
  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  /// The store refused the request (quota, permissions, closed host).
  #[error("store rejected request: {0}")]
  Rejected(String),
}

/// Trait for session store providers.
///
/// Implementations must be safe to share between the registry's
/// foreground handles and its background persister.
#[async_trait]
pub trait SessionStore: Send + Sync + 'static {
  /// Read stored values.
  ///
  /// `Some(keys)` restricts the read to those keys; `None` requests
  /// every stored key. Keys with no stored value are absent from the
  /// returned map.
  async fn get(&self, keys: Option<Vec<String>>) -> Result<StoreValues, StoreError>;

  /// Merge `values` into the stored state.
  ///
  /// Keys not named in `values` are left untouched.
  async fn set(&self, values: StoreValues) -> Result<(), StoreError>;
}
