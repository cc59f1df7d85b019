//! Error types for the Daybook system.
//!
//! Uses `thiserror` for ergonomic error definition with rich context.

use std::fmt;

use thiserror::Error;

use crate::entity::{CacheId, EntityRef};
use crate::key::EntityKey;
use crate::state::EntityState;
use crate::types::DataType;

/// The main error type for Daybook operations.
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct Error {
    /// The kind of error that occurred.
    pub kind: ErrorKind,
    /// Optional context about where the error occurred.
    pub context: Option<ErrorContext>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            context: None,
        }
    }

    /// Adds context to this error.
    #[must_use]
    pub fn with_context(mut self, context: ErrorContext) -> Self {
        self.context = Some(context);
        self
    }

    /// Creates a type mismatch error.
    #[must_use]
    pub fn type_mismatch(expected: DataType, actual: impl Into<String>) -> Self {
        Self::new(ErrorKind::TypeMismatch {
            expected,
            actual: actual.into(),
        })
    }

    /// Creates an entity not found error.
    #[must_use]
    pub fn entity_not_found(key: EntityKey) -> Self {
        Self::new(ErrorKind::EntityNotFound(key))
    }

    /// Creates a stale entity reference error.
    #[must_use]
    pub fn stale_reference(entity: EntityRef) -> Self {
        Self::new(ErrorKind::StaleReference(entity))
    }

    /// Creates a duplicate key error.
    #[must_use]
    pub fn duplicate_key(key: EntityKey) -> Self {
        Self::new(ErrorKind::DuplicateKey(key))
    }

    /// Creates an illegal state transition error.
    #[must_use]
    pub fn illegal_transition(from: EntityState, to: EntityState) -> Self {
        Self::new(ErrorKind::IllegalTransition { from, to })
    }

    /// Creates an unknown type error.
    #[must_use]
    pub fn unknown_type(name: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnknownType(name.into()))
    }

    /// Creates an unknown property error.
    #[must_use]
    pub fn unknown_property(type_name: impl Into<String>, property: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnknownProperty {
            type_name: type_name.into(),
            property: property.into(),
        })
    }

    /// Creates an incomplete key error.
    #[must_use]
    pub fn incomplete_key(key: EntityKey) -> Self {
        Self::new(ErrorKind::IncompleteKey(key))
    }

    /// Creates a cross-cache reference error.
    #[must_use]
    pub fn cross_cache(expected: CacheId, actual: CacheId) -> Self {
        Self::new(ErrorKind::CrossCache { expected, actual })
    }

    /// Creates a wrong entity type error.
    #[must_use]
    pub fn wrong_entity_type(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::new(ErrorKind::WrongEntityType {
            expected: expected.into(),
            actual: actual.into(),
        })
    }

    /// Creates a non-scalar assignment error.
    #[must_use]
    pub fn non_scalar(property: impl Into<String>) -> Self {
        Self::new(ErrorKind::NonScalarAssignment {
            property: property.into(),
        })
    }

    /// Creates an unresolved type error.
    #[must_use]
    pub fn unresolved_type(name: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnresolvedType(name.into()))
    }

    /// Creates a merge disallowed error.
    #[must_use]
    pub fn merge_disallowed(key: EntityKey) -> Self {
        Self::new(ErrorKind::MergeDisallowed(key))
    }

    /// Creates an unresolved payload reference error.
    #[must_use]
    pub fn unresolved_ref(id: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnresolvedRef(id.into()))
    }

    /// Creates a validation failed error.
    #[must_use]
    pub fn validation_failed(failures: usize) -> Self {
        Self::new(ErrorKind::ValidationFailed { failures })
    }

    /// Creates a key generation error.
    #[must_use]
    pub fn key_generation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::KeyGeneration(message.into()))
    }

    /// Creates a service error.
    #[must_use]
    pub fn service(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Service(message.into()))
    }

    /// Creates a serialization error.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::SerializationError(message.into()))
    }

    /// Creates a malformed payload error.
    #[must_use]
    pub fn malformed_payload(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::MalformedPayload(message.into()))
    }

    /// Creates a metadata document error.
    #[must_use]
    pub fn metadata(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::MetadataError(message.into()))
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal(message.into()))
    }
}

/// Categorized error kinds for pattern matching.
#[derive(Debug, Error)]
pub enum ErrorKind {
    /// A value did not conform to the declared data type.
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        /// The declared data type.
        expected: DataType,
        /// Rendering of the offending value.
        actual: String,
    },

    /// No attached entity carries this key.
    #[error("entity not found: {0:?}")]
    EntityNotFound(EntityKey),

    /// Entity reference no longer resolves (generation mismatch or detach).
    #[error("stale entity reference: {0:?}")]
    StaleReference(EntityRef),

    /// An attached entity already carries this key.
    #[error("duplicate key: {0:?}")]
    DuplicateKey(EntityKey),

    /// A key had nil parts where identity requires values.
    #[error("incomplete key: {0:?}")]
    IncompleteKey(EntityKey),

    /// The requested lifecycle state change is not allowed.
    #[error("illegal state transition: {from:?} -> {to:?}")]
    IllegalTransition {
        /// The state the entity is in.
        from: EntityState,
        /// The state that was requested.
        to: EntityState,
    },

    /// An entity reference from one cache was handed to another.
    #[error("entity belongs to a different cache: expected {expected:?}, got {actual:?}")]
    CrossCache {
        /// The cache performing the operation.
        expected: CacheId,
        /// The cache the reference was issued by.
        actual: CacheId,
    },

    /// An entity of one type was handed to an operation expecting another.
    #[error("wrong entity type: expected {expected}, got {actual}")]
    WrongEntityType {
        /// The type the operation was declared against.
        expected: String,
        /// The type of the entity actually supplied.
        actual: String,
    },

    /// No structural type with this name is registered.
    #[error("unknown type: {0}")]
    UnknownType(String),

    /// The type exists but has no property with this name.
    #[error("unknown property: {property} on {type_name}")]
    UnknownProperty {
        /// The type that was queried.
        type_name: String,
        /// The property name that was not found.
        property: String,
    },

    /// The type is registered but still waiting on forward references.
    #[error("type not fully resolved: {0}")]
    UnresolvedType(String),

    /// A type declared two properties with the same name.
    #[error("duplicate property: {property} on {type_name}")]
    DuplicateProperty {
        /// The declaring type.
        type_name: String,
        /// The repeated property name.
        property: String,
    },

    /// A scalar value was assigned where only structured access is allowed.
    #[error("property {property} is not scalar-assignable")]
    NonScalarAssignment {
        /// The property that was assigned.
        property: String,
    },

    /// An incoming entity collided with a cached one under `Disallowed`.
    #[error("merge disallowed for already-cached entity: {0:?}")]
    MergeDisallowed(EntityKey),

    /// A `$ref` pointed at an `$id` that has not appeared yet.
    #[error("unresolved payload reference: ${0}")]
    UnresolvedRef(String),

    /// The wire payload did not have the expected shape.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// The metadata document did not have the expected shape.
    #[error("metadata error: {0}")]
    MetadataError(String),

    /// Entities failed validation at a save boundary.
    #[error("validation failed for {failures} entities")]
    ValidationFailed {
        /// How many entities had at least one validation error.
        failures: usize,
    },

    /// A temporary key could not be generated.
    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    /// The remote service reported a failure.
    #[error("service error: {0}")]
    Service(String),

    /// JSON could not be parsed or produced.
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Internal error (should not happen).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Context about where an error occurred.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    /// The structural type involved.
    pub entity_type: Option<String>,
    /// The property involved.
    pub property: Option<String>,
    /// The service resource involved.
    pub resource: Option<String>,
}

impl ErrorContext {
    /// Creates a new empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the structural type.
    #[must_use]
    pub fn with_type(mut self, entity_type: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self
    }

    /// Sets the property.
    #[must_use]
    pub fn with_property(mut self, property: impl Into<String>) -> Self {
        self.property = Some(property.into());
        self
    }

    /// Sets the service resource.
    #[must_use]
    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(entity_type) = &self.entity_type {
            write!(f, "on {entity_type}")?;
            if let Some(property) = &self.property {
                write!(f, ".{property}")?;
            }
        } else if let Some(property) = &self.property {
            write!(f, "on property {property}")?;
        }
        if let Some(resource) = &self.resource {
            write!(f, " (resource {resource})")?;
        }
        Ok(())
    }
}

/// A specialized `Result` type for Daybook operations.
pub type Result<T> = std::result::Result<T, Error>;
