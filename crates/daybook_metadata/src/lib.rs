//! Runtime structural type model for the Daybook entity cache.
//!
//! This crate provides:
//! - [`MetadataStore`] - Type registration with forward-reference resolution
//! - [`StructuralType`] - Resolved entity and complex types
//! - [`DataProperty`] / [`NavigationProperty`] - Resolved property descriptors
//! - [`MetadataDocument`] - The JSON document form metadata travels in
//! - [`NamingConvention`] - Wire-to-client property name translation

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod json;
pub mod named;
pub mod naming;
pub mod property;
pub mod store;
pub mod structural;

// Re-export main types for convenience
pub use json::{DataPropertyDef, MetadataDocument, NavigationPropertyDef, TypeDef};
pub use named::{Named, NamedVec};
pub use naming::NamingConvention;
pub use property::{
    AutoGeneratedKeyType, ConcurrencyMode, DataProperty, DataPropertyKind, NavigationProperty,
};
pub use store::MetadataStore;
pub use structural::{EntityFacts, StructuralType, TypeKind};
