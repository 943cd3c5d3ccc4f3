//! Configuration Module - TOML-based Session Configuration
//!
//! Loads and validates configuration from `config.toml`. Logging,
//! the session file location and registry behaviour are externalized
//! here; the library itself never reads files or the environment.

pub mod loader;

use serde::Deserialize;

/// Top-level configuration.
///
/// Loaded from `config.toml` at startup. Every field is validated
/// before the store is opened.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
  /// Logging setup.
  #[serde(default)]
  pub logging: LoggingConfig,
  /// Session file location and format.
  pub store: StoreConfig,
  /// Registry behaviour.
  #[serde(default)]
  pub registry: RegistryConfig,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
  /// Log level (trace, debug, info, warn, error). `RUST_LOG` overrides it.
  #[serde(default = "default_log_level")]
  pub level: String,
  /// Emit JSON lines instead of human-readable output.
  #[serde(default)]
  pub json: bool,
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      level: default_log_level(),
      json: false,
    }
  }
}

/// File store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
  /// Path of the JSON session file.
  pub path: String,
  /// Pretty-print the file contents.
  #[serde(default = "default_true")]
  pub pretty: bool,
}

/// Registry behaviour.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RegistryConfig {
  /// Persist tracked mutations without an explicit save.
  #[serde(default = "default_true")]
  pub auto_save: bool,
}

impl Default for RegistryConfig {
  fn default() -> Self {
    Self {
      auto_save: default_true(),
    }
  }
}

fn default_log_level() -> String {
  "info".to_string()
}

const fn default_true() -> bool {
  true
}
