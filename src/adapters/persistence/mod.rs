//! Persistence Adapters - Session Store Backends
//!
//! `MemoryStore` keeps values in process and records every write, which
//! makes it the natural fake for tests. `FileStore` keeps one JSON
//! object on disk and replaces it atomically on every write.

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;
