//! Use Cases Layer - Session Value Workflows
//!
//! Orchestrates the tracked domain types with the `SessionStore` port.
//!
//! Use cases:
//! - `Registry`: Key registration, loading, saving and flushing
//! - `Item`: Typed handle for reading and writing one key
//! - `persister`: Ordered background writer fed by tracked mutations

pub(crate) mod persister;
pub mod registry;

pub use registry::{Item, Registry, RegistryBuilder};
