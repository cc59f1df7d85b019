//! Resolved property descriptors.
//!
//! These are the forms a [`crate::MetadataStore`] hands out after
//! registration. Raw document forms live in [`crate::json`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use daybook_foundation::{DataType, NavId, PropId, TypeId, Value};

use crate::named::Named;

/// How key values for new entities of a type come to exist.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AutoGeneratedKeyType {
    /// Keys are assigned by the application before attach.
    #[default]
    None,
    /// Keys are produced server-side on insert; the client holds a
    /// temporary key until save.
    Identity,
    /// Keys are produced by a client-registered key generator; the client
    /// holds a temporary key until save.
    KeyGenerator,
}

impl AutoGeneratedKeyType {
    /// Returns true if new entities need a temporary key until save.
    #[must_use]
    pub fn needs_temp_key(self) -> bool {
        !matches!(self, Self::None)
    }
}

/// Whether a property participates in optimistic concurrency checks.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConcurrencyMode {
    /// Not a concurrency column.
    #[default]
    None,
    /// The original value accompanies every update so the server can detect
    /// concurrent writes.
    Fixed,
}

/// What a data property stores.
#[derive(Clone, Debug, PartialEq)]
pub enum DataPropertyKind {
    /// A scalar of the given type.
    Scalar(DataType),
    /// A nested complex object.
    Complex {
        /// Declared complex type name, kept for forward references.
        type_name: Arc<str>,
        /// The resolved complex type, once registered.
        target: Option<TypeId>,
    },
}

/// A resolved data property.
#[derive(Clone, Debug)]
pub struct DataProperty {
    /// Property name, unique within the declaring type.
    pub name: Arc<str>,
    /// Scalar or complex payload.
    pub kind: DataPropertyKind,
    /// Whether nil is an acceptable stored value.
    pub nullable: bool,
    /// Whether this property is part of the declaring type's key.
    pub part_of_key: bool,
    /// Concurrency participation.
    pub concurrency_mode: ConcurrencyMode,
    /// Maximum string length, when declared.
    pub max_length: Option<usize>,
    /// Value given to fresh instances. `None` falls back to nil for
    /// nullable properties and the type default otherwise.
    pub default_value: Option<Value>,
    /// The navigation property on the declaring type that uses this
    /// property as a foreign key column, if any.
    pub related_nav: Option<NavId>,
    /// The navigation property on another type that claims this property
    /// as its inverse foreign key column, if any.
    pub inverse_nav: Option<(TypeId, NavId)>,
    /// Raw validator configurations from the metadata document.
    pub validators: Vec<serde_json::Value>,
}

impl DataProperty {
    /// The scalar type, or `None` for complex properties.
    #[must_use]
    pub fn scalar_type(&self) -> Option<DataType> {
        match self.kind {
            DataPropertyKind::Scalar(dt) => Some(dt),
            DataPropertyKind::Complex { .. } => None,
        }
    }

    /// The resolved complex type, or `None` for scalar properties and
    /// complex properties still waiting on registration.
    #[must_use]
    pub fn complex_type(&self) -> Option<TypeId> {
        match self.kind {
            DataPropertyKind::Scalar(_) => None,
            DataPropertyKind::Complex { target, .. } => target,
        }
    }

    /// Returns true if this property holds a nested complex object.
    #[must_use]
    pub fn is_complex(&self) -> bool {
        matches!(self.kind, DataPropertyKind::Complex { .. })
    }

    /// Returns true if this property is a foreign key column.
    #[must_use]
    pub fn is_foreign_key(&self) -> bool {
        self.related_nav.is_some() || self.inverse_nav.is_some()
    }

    /// The value a fresh instance starts with.
    #[must_use]
    pub fn initial_value(&self) -> Value {
        if let Some(default) = &self.default_value {
            return default.clone();
        }
        if self.nullable {
            return Value::Nil;
        }
        match self.kind {
            DataPropertyKind::Scalar(dt) => dt.default_value(),
            DataPropertyKind::Complex { .. } => Value::Nil,
        }
    }
}

impl Named for DataProperty {
    fn name(&self) -> &str {
        &self.name
    }
}

/// A resolved navigation property.
#[derive(Clone, Debug)]
pub struct NavigationProperty {
    /// Property name, unique within the declaring type.
    pub name: Arc<str>,
    /// Declared target entity type name, kept for forward references.
    pub entity_type_name: Arc<str>,
    /// The resolved target type, once registered.
    pub target: Option<TypeId>,
    /// True for a to-one reference, false for a to-many collection.
    pub is_scalar: bool,
    /// Groups this navigation with its inverse on the target type.
    pub association_name: Arc<str>,
    /// Declared foreign key column names on the declaring type.
    pub foreign_key_names: Vec<Arc<str>>,
    /// Resolved foreign key columns on the declaring type.
    pub foreign_keys: Vec<PropId>,
    /// Declared foreign key column names on the target type, for
    /// relationships navigable only from this side.
    pub inv_foreign_key_names: Vec<Arc<str>>,
    /// Resolved foreign key columns on the target type.
    pub inv_foreign_keys: Vec<PropId>,
    /// The inverse navigation on the target type, matched by association
    /// name, if one exists.
    pub inverse: Option<NavId>,
}

impl NavigationProperty {
    /// Returns true once the target type and all foreign key columns have
    /// been resolved.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.target.is_some()
            && self.foreign_keys.len() == self.foreign_key_names.len()
            && self.inv_foreign_keys.len() == self.inv_foreign_key_names.len()
    }
}

impl Named for NavigationProperty {
    fn name(&self) -> &str {
        &self.name
    }
}
