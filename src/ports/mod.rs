//! Ports Layer - Hexagonal Architecture Boundaries
//!
//! Defines the interfaces (traits) the registry requires from the
//! outside world. Adapters implement these traits.
//!
//! Port categories:
//! - `SessionStore`: Flat asynchronous key/value storage for session values

pub mod store;
