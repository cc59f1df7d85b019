//! Core types for the Daybook entity cache.
//!
//! This crate provides:
//! - [`Value`] - The scalar value type for all entity property data
//! - [`EntityRef`] - Generational handles to attached entities
//! - [`EntityKey`] - Composite keys for identity resolution
//! - [`EntityState`] - The entity lifecycle state machine vocabulary
//! - [`DataType`] - Scalar data type descriptors with JSON coercion
//! - [`Error`] - Rich error types with context

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod entity;
pub mod error;
pub mod key;
pub mod state;
pub mod types;
pub mod value;

// Re-export main types for convenience
pub use entity::{CacheId, EntityRef, NavId, PropId, TypeId};
pub use error::{Error, ErrorContext, ErrorKind, Result};
pub use key::EntityKey;
pub use state::{EntityAction, EntityState, EntityStateSet, EntityVersion, MergeStrategy};
pub use types::DataType;
pub use value::Value;
