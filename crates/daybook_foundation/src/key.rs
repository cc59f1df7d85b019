//! Composite entity keys for identity resolution.

use std::fmt;

use crate::entity::TypeId;
use crate::value::Value;

/// Identity of an entity: its structural type plus its key property values.
///
/// Key values appear in the declaring type's key-property order, so two keys
/// built from the same entity always compare equal. Comparison of the value
/// parts is strict: `Int(1)` and `String("1")` are different keys, and
/// callers are expected to coerce values through the declared
/// [`crate::DataType`] before building a key.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityKey {
    type_id: TypeId,
    values: Vec<Value>,
}

impl EntityKey {
    /// Creates a key from a type and its key property values.
    #[must_use]
    pub fn new(type_id: TypeId, values: Vec<Value>) -> Self {
        Self { type_id, values }
    }

    /// Creates a single-valued key.
    #[must_use]
    pub fn single(type_id: TypeId, value: impl Into<Value>) -> Self {
        Self {
            type_id,
            values: vec![value.into()],
        }
    }

    /// The type this key identifies an instance of.
    #[must_use]
    pub const fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// The key values, in declared key-property order.
    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Returns true if every key part is present (non-nil) and the key has
    /// at least one part.
    ///
    /// Incomplete keys never match anything and cannot be attached.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.values.is_empty() && !self.values.iter().any(Value::is_nil)
    }

    /// Rebinds this key to a different type, keeping the same values.
    ///
    /// Used when an entity is looked up through a subtype or base type of
    /// the one the key was originally built for.
    #[must_use]
    pub fn with_type(&self, type_id: TypeId) -> Self {
        Self {
            type_id,
            values: self.values.clone(),
        }
    }
}

impl fmt::Debug for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityKey(t{}:", self.type_id.index())?;
        for (i, v) in self.values.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, " {v:?}")?;
        }
        write!(f, ")")
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}(", self.type_id.index())?;
        for (i, v) in self.values.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{v}")?;
        }
        write!(f, ")")
    }
}
