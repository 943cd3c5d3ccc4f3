//! Domain layer - Session values and their change tracking.
//!
//! Pure, synchronous logic with no store access: tracked containers that
//! report their own mutation, and the codecs that turn registered values
//! into stored JSON. Testable in isolation.

pub mod codec;
pub mod tracked;

// Re-export core types for convenience
pub use codec::{Codec, FnCodec, JsonCodec, MapCodec, SetCodec};
pub use tracked::{
    BatchGuard, DirtySink, Kind, Notifier, Slot, Track, TrackedMap, TrackedRecord, TrackedSet,
    TrackedValue, TrackedVec,
};
