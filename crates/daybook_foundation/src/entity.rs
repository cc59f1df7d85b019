//! Entity references with generational indices.

use std::fmt;

/// Identifier for an [`crate::Value`]-typed entity cache instance.
///
/// Every cache gets a distinct id at construction. References carry the id of
/// the cache that issued them, so handing a reference to a different cache is
/// detectable instead of silently resolving to an unrelated entity.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct CacheId(u32);

impl CacheId {
    /// Creates a cache id from its raw counter value.
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Sentinel id meaning "no cache", used by [`EntityRef::null`].
    #[must_use]
    pub const fn none() -> Self {
        Self(0)
    }

    /// Returns true if this is the "no cache" sentinel.
    #[must_use]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }
}

/// Index of a structural type in a metadata store.
#[derive(Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord, Debug)]
pub struct TypeId(u32);

impl TypeId {
    /// Creates a type id from its table index.
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the table index for this type.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Index of a data property within its declaring type.
#[derive(Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord, Debug)]
pub struct PropId(u32);

impl PropId {
    /// Creates a property id from its table index.
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the table index for this property.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Index of a navigation property within its declaring type.
#[derive(Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord, Debug)]
pub struct NavId(u32);

impl NavId {
    /// Creates a navigation id from its table index.
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the table index for this navigation property.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Handle to an attached entity, with a generational index for stale
/// reference detection.
///
/// The generation counter increments when a slot is reused after detach,
/// allowing detection of references to entities that are no longer attached.
///
/// # Layout
/// - `cache`: id of the cache that issued the reference
/// - `type_id`: the entity's structural type
/// - `index`: 32-bit slot index within the type's group
/// - `generation`: 32-bit generation counter
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct EntityRef {
    /// The cache that issued this reference.
    pub cache: CacheId,
    /// The entity's structural type.
    pub type_id: TypeId,
    /// Slot index within the type's group.
    pub index: u32,
    /// Generation counter for stale reference detection.
    pub generation: u32,
}

impl EntityRef {
    /// Creates a new entity reference.
    #[must_use]
    pub const fn new(cache: CacheId, type_id: TypeId, index: u32, generation: u32) -> Self {
        Self {
            cache,
            type_id,
            index,
            generation,
        }
    }

    /// Returns a sentinel value representing "no entity".
    ///
    /// This uses `u32::MAX` as the index, which is never allocated.
    #[must_use]
    pub const fn null() -> Self {
        Self {
            cache: CacheId::none(),
            type_id: TypeId::new(0),
            index: u32::MAX,
            generation: 0,
        }
    }

    /// Returns true if this is the null sentinel value.
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.index == u32::MAX
    }
}

impl fmt::Debug for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "EntityRef(null)")
        } else {
            write!(
                f,
                "EntityRef(t{}:{}v{})",
                self.type_id.index(),
                self.index,
                self.generation
            )
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "Entity(null)")
        } else {
            write!(f, "Entity(t{}:{})", self.type_id.index(), self.index)
        }
    }
}
