//! Entity lifecycle states, property versions, and change actions.

use enumset::{EnumSet, EnumSetType};
use serde::{Deserialize, Serialize};

/// Lifecycle state of an entity with respect to its cache.
///
/// Attached entities are always in exactly one of `Unchanged`, `Added`,
/// `Modified`, or `Deleted`. `Detached` describes an entity value that no
/// cache currently owns.
#[derive(EnumSetType, Debug, Hash, Serialize, Deserialize)]
pub enum EntityState {
    /// Not attached to any cache.
    Detached,
    /// Attached, identical to the last known server state.
    Unchanged,
    /// Attached, pending insert on the next save.
    Added,
    /// Attached, pending update on the next save.
    Modified,
    /// Attached, pending delete on the next save.
    Deleted,
}

/// A set of entity states, used for filtered queries over a cache.
pub type EntityStateSet = EnumSet<EntityState>;

impl EntityState {
    /// Returns true if this state belongs to an attached entity.
    #[must_use]
    pub fn is_attached(self) -> bool {
        !matches!(self, Self::Detached)
    }

    /// Returns true if this state marks the entity as pending for save.
    #[must_use]
    pub fn has_changes(self) -> bool {
        matches!(self, Self::Added | Self::Modified | Self::Deleted)
    }

    /// The set of states pending for save.
    #[must_use]
    pub fn changed() -> EntityStateSet {
        Self::Added | Self::Modified | Self::Deleted
    }

    /// The set of all attached states.
    #[must_use]
    pub fn attached() -> EntityStateSet {
        Self::Unchanged | Self::Added | Self::Modified | Self::Deleted
    }
}

/// Which snapshot of a property value to read.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
pub enum EntityVersion {
    /// The live value.
    #[default]
    Current,
    /// The value as of the last accept, before any pending changes.
    Original,
    /// The in-progress value inside an edit session.
    Proposed,
}

/// What kind of change a cache event describes.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum EntityAction {
    /// Entity attached directly by application code.
    Attach,
    /// Entity attached while merging a query result.
    AttachOnQuery,
    /// Entity attached while importing an exported entity set.
    AttachOnImport,
    /// Entity detached from its cache.
    Detach,
    /// Entity marked for deletion.
    Delete,
    /// A property value changed.
    PropertyChange,
    /// The lifecycle state changed without a property change.
    EntityStateChange,
    /// Pending changes were accepted.
    AcceptChanges,
    /// Pending changes were rolled back.
    RejectChanges,
    /// The whole cache was cleared.
    Clear,
}

impl EntityAction {
    /// Returns true for the attach family of actions.
    ///
    /// Subscriber failures during these actions always surface, even inside
    /// a bulk load where other subscriber failures are swallowed.
    #[must_use]
    pub fn is_attach(self) -> bool {
        matches!(self, Self::Attach | Self::AttachOnQuery | Self::AttachOnImport)
    }
}

/// How merging an incoming entity interacts with local pending changes.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
pub enum MergeStrategy {
    /// Keep locally changed values; only fill in entities without changes.
    #[default]
    PreserveChanges,
    /// Take the incoming values, discarding local changes.
    OverwriteChanges,
    /// Resolve identity only; never touch property values.
    SkipMerge,
    /// Treat an incoming entity that is already cached as an error.
    Disallowed,
}
