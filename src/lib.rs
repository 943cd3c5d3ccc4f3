//! Session Values - Library Root
//!
//! Typed values bound to an asynchronous session key/value store.
//! Values load from the store on startup and persist on every write,
//! including in-place mutation of tracked containers nested at any depth.
//!
//! Re-exports all modules for integration tests and benchmarks.

pub mod adapters;
pub mod config;
pub mod domain;
pub mod error;
pub mod ports;
pub mod usecases;

pub use error::{CodecError, SessionError, SessionResult};
pub use usecases::{Item, Registry, RegistryBuilder};
