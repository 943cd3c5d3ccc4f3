//! Configuration Loader - File Loading and Validation
//!
//! Handles loading `config.toml`, validating all parameters,
//! and providing clear error messages for misconfiguration.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use super::AppConfig;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Load and validate configuration from a TOML file.
///
/// # Arguments
/// * `path` - Path to the config.toml file
///
/// # Errors
/// Returns detailed error if:
/// - File doesn't exist or can't be read
/// - TOML parsing fails
/// - Validation rules are violated
pub fn load_config(path: impl AsRef<Path>) -> Result<AppConfig> {
  let path = path.as_ref();

  let content = std::fs::read_to_string(path)
    .with_context(|| format!("Failed to read config file: {}", path.display()))?;

  let config = parse_config(&content)?;

  info!(
    path = %config.store.path,
    auto_save = config.registry.auto_save,
    "Configuration loaded successfully"
  );

  Ok(config)
}

/// Parse and validate configuration from TOML text.
///
/// # Errors
/// Returns an error if parsing fails or validation rules are violated.
pub fn parse_config(content: &str) -> Result<AppConfig> {
  let config: AppConfig = toml::from_str(content)
    .with_context(|| "Failed to parse config.toml")?;

  validate_config(&config)?;
  Ok(config)
}

/// Validate all configuration parameters.
fn validate_config(config: &AppConfig) -> Result<()> {
  anyhow::ensure!(
    !config.store.path.trim().is_empty(),
    "store.path must not be empty"
  );

  // Accept compound filters like "info,session_values=debug" as long as
  // the default directive is a known level.
  let level = config.logging.level.split(',').next().unwrap_or_default();
  anyhow::ensure!(
    level.contains('=') || LOG_LEVELS.contains(&level.to_ascii_lowercase().as_str()),
    "logging.level must be one of {LOG_LEVELS:?}, got {:?}",
    config.logging.level
  );

  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_load_nonexistent_file() {
    let result = load_config("nonexistent.toml");
    assert!(result.is_err());
  }

  #[test]
  fn test_minimal_config_uses_defaults() {
    let config = parse_config("[store]\npath = \"data/session.json\"\n").unwrap();
    assert_eq!(config.logging.level, "info");
    assert!(!config.logging.json);
    assert!(config.store.pretty);
    assert!(config.registry.auto_save);
  }

  #[test]
  fn test_full_config() {
    let config = parse_config(
      r#"
        [logging]
        level = "debug,session_values=trace"
        json = true

        [store]
        path = "/tmp/s.json"
        pretty = false

        [registry]
        auto_save = false
      "#,
    )
    .unwrap();
    assert!(config.logging.json);
    assert!(!config.store.pretty);
    assert!(!config.registry.auto_save);
  }

  #[test]
  fn test_rejects_empty_path() {
    let err = parse_config("[store]\npath = \"  \"\n").unwrap_err();
    assert!(err.to_string().contains("store.path"));
  }

  #[test]
  fn test_rejects_unknown_level() {
    let result = parse_config("[logging]\nlevel = \"loud\"\n[store]\npath = \"s.json\"\n");
    assert!(result.is_err());
  }

  #[test]
  fn test_load_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[store]\npath = \"s.json\"\n").unwrap();
    assert_eq!(load_config(&path).unwrap().store.path, "s.json");
  }
}
