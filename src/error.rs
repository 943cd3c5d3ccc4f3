//! Error types shared by the registry, the codecs and the store port.

use crate::ports::store::StoreError;

/// Errors raised while converting a value to or from its stored form.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// serde_json could not represent the value.
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    /// A custom codec refused the value.
    #[error("{0}")]
    Custom(String),
}

impl CodecError {
    /// Build a custom codec error from any displayable message.
    pub fn custom(msg: impl std::fmt::Display) -> Self {
        Self::Custom(msg.to_string())
    }
}

/// Errors surfaced by registry operations.
///
/// Serialization failures and store failures are distinct variants so a
/// caller can tell "the value could not be encoded" apart from "the store
/// refused the write". Neither rolls back the in-memory value.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Load or save requested for a key that was never registered.
    #[error("key `{0}` is not registered")]
    UndeclaredKey(String),

    /// A key was registered twice on the same registry.
    #[error("key `{0}` is already registered")]
    DuplicateKey(String),

    /// The current value could not be encoded for the store.
    #[error("failed to serialize `{key}`: {source}")]
    Serialization {
        key: String,
        #[source]
        source: CodecError,
    },

    /// The stored value could not be decoded into the registered type.
    #[error("failed to decode stored value for `{key}`: {source}")]
    Deserialization {
        key: String,
        #[source]
        source: CodecError,
    },

    /// A key was looked up with a value type other than the one it was
    /// registered with.
    #[error("key `{key}` is not registered as `{requested}`")]
    TypeMismatch { key: String, requested: &'static str },

    /// The store rejected a get or set call.
    #[error("store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),

    /// The background persister is no longer running.
    #[error("registry persister has shut down")]
    Closed,
}

impl SessionError {
    /// Key this error relates to, when there is one.
    pub fn key(&self) -> Option<&str> {
        match self {
            Self::UndeclaredKey(key)
            | Self::DuplicateKey(key)
            | Self::Serialization { key, .. }
            | Self::Deserialization { key, .. }
            | Self::TypeMismatch { key, .. } => Some(key),
            Self::StoreUnavailable(_) | Self::Closed => None,
        }
    }
}

/// Result alias for registry operations.
pub type SessionResult<T> = Result<T, SessionError>;
