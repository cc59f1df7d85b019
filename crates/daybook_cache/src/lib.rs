//! Client-side entity cache for the Daybook system.
//!
//! This crate provides:
//! - [`EntityCache`] - Identity-keyed entity storage with change tracking
//! - [`DetachedEntity`] - Entity values before attach and after detach
//! - [`StructuralValues`] - Versioned per-property storage with backups
//! - [`KeyGenerator`] - Placeholder keys for added entities
//! - [`ChangeEvent`] / [`Subscriber`] - Change notification with load scopes
//! - [`ValidationRule`] / [`RuleRegistry`] - Metadata-driven validation

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod aspect;
pub mod cache;
pub mod events;
mod group;
pub mod keygen;
pub mod unattached;
pub mod validate;

// Re-export main types for convenience
pub use aspect::{DetachedEntity, StructuralValues};
pub use cache::{EntityCache, MergeDisposition};
pub use events::{ChangeEvent, PropertyChange, Subscriber, SubscriberId};
pub use keygen::{KeyGenerator, NegativeKeyGenerator};
pub use unattached::{PendingLink, UnattachedChildrenMap};
pub use validate::{
    DataTypeRule, MaxLength, Required, RuleFactory, RuleRegistry, ValidationContext,
    ValidationError, ValidationRule,
};
