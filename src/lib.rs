//! Daybook - Client-side entity graph cache
//!
//! This crate re-exports all layers of the Daybook system for convenient access.
//! For detailed documentation, see the individual layer crates.
//!
//! # Architecture
//!
//! ```text
//! Layer 3: daybook_remote     — Queries, saves, payload merge, cache exchange
//! Layer 2: daybook_cache      — Entity cache, change tracking, relation fixup
//! Layer 1: daybook_metadata   — Structural type model, metadata documents
//! Layer 0: daybook_foundation — Core types (Value, EntityKey, Error)
//! ```

pub use daybook_cache as cache;
pub use daybook_foundation as foundation;
pub use daybook_metadata as metadata;
pub use daybook_remote as remote;
