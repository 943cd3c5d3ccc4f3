//! Session Values - Entry Point
//!
//! Inspects the session file configured in `config.toml` and prints the
//! stored values as pretty JSON.
//!
//! Usage: `session-values [CONFIG] [--key NAME]...`
//!
//! Wiring sequence:
//! 1. Parse arguments (config path, key filter)
//! 2. Load config.toml + validate
//! 3. Init tracing (env filter, optional JSON)
//! 4. Open the FileStore
//! 5. Read the requested keys and print them

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use session_values::adapters::persistence::FileStore;
use session_values::config;
use session_values::ports::store::SessionStore;

#[derive(Debug, Parser)]
#[command(
    name = "session-values",
    version,
    about = "Print the values stored in a session file"
)]
struct Args {
    /// Path to the configuration file
    #[arg(default_value = "config.toml")]
    config: PathBuf,

    /// Only print this key (repeatable)
    #[arg(long = "key", value_name = "NAME")]
    keys: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // ── 1. Parse arguments ───────────────────────────────────
    let args = Args::parse();

    // ── 2. Load configuration ────────────────────────────────
    let config = config::loader::load_config(&args.config)
        .context("Failed to load configuration")?;

    // ── 3. Initialize logging (stderr, stdout carries the JSON) ─
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if config.logging.json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        store = %config.store.path,
        keys = args.keys.len(),
        "Starting session-values"
    );

    // ── 4. Open the session file ─────────────────────────────
    let store = FileStore::open(&config.store.path, config.store.pretty)
        .await
        .context("Failed to open session file")?;

    // ── 5. Read and print ────────────────────────────────────
    let filter = (!args.keys.is_empty()).then_some(args.keys);
    let values = store
        .get(filter)
        .await
        .with_context(|| format!("Failed to read {}", store.path().display()))?;

    info!(found = values.len(), "Session values read");
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::Value::Object(values))?
    );

    Ok(())
}
