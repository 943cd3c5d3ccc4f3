//! Adapters Layer - Hexagonal Architecture Outer Ring
//!
//! Implements the `SessionStore` port with concrete backends.
//!
//! Adapter categories:
//! - `persistence`: In-memory store and atomic JSON file store

pub mod persistence;
