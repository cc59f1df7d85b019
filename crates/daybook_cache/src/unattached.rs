//! Deferred relation linkage.
//!
//! When an entity arrives whose foreign key names a parent that is not in
//! the cache yet, the link cannot be completed. The orphan registers here
//! under the parent's key; when an entity with that key attaches, the
//! registrations are consumed and the links completed. Registrations are
//! also re-created when a parent detaches, so a later re-attach under the
//! same key restores its children.

use std::collections::HashMap;

use daybook_foundation::{EntityKey, EntityRef, NavId};

/// Which navigation property a pending link will flow through.
///
/// Most orphans wait through their own to-one navigation. Relationships
/// navigable only from the parent side have no navigation on the child at
/// all; those wait through the parent's navigation instead, with the
/// foreign key columns living on the child.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PendingLink {
    /// The child's own to-one navigation to the awaited parent.
    ChildNav(NavId),
    /// The parent's navigation; the child carries the foreign key columns
    /// but has no navigation of its own.
    ParentNav(NavId),
}

/// Orphaned child entities waiting for a parent key to attach.
///
/// Values keep registration order so that consuming them produces events
/// in a deterministic order.
#[derive(Debug, Default)]
pub struct UnattachedChildrenMap {
    map: HashMap<EntityKey, Vec<(PendingLink, Vec<EntityRef>)>>,
}

impl UnattachedChildrenMap {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `child` as waiting for the entity with `parent_key`.
    ///
    /// Registering the same child twice under the same link is a no-op.
    pub fn add_child(&mut self, parent_key: EntityKey, link: PendingLink, child: EntityRef) {
        let entries = self.map.entry(parent_key).or_default();
        match entries.iter_mut().find(|(l, _)| *l == link) {
            Some((_, children)) => {
                if !children.contains(&child) {
                    children.push(child);
                }
            }
            None => entries.push((link, vec![child])),
        }
    }

    /// Removes one registration, if present.
    pub fn remove_child(&mut self, parent_key: &EntityKey, link: PendingLink, child: EntityRef) {
        let Some(entries) = self.map.get_mut(parent_key) else {
            return;
        };
        if let Some((_, children)) = entries.iter_mut().find(|(l, _)| *l == link) {
            children.retain(|c| *c != child);
        }
        entries.retain(|(_, children)| !children.is_empty());
        if entries.is_empty() {
            self.map.remove(parent_key);
        }
    }

    /// Removes every registration of `child`, under any key.
    ///
    /// Used when a child detaches while still waiting.
    pub fn remove_child_everywhere(&mut self, child: EntityRef) {
        self.map.retain(|_, entries| {
            entries.retain_mut(|(_, children)| {
                children.retain(|c| *c != child);
                !children.is_empty()
            });
            !entries.is_empty()
        });
    }

    /// Takes every registration waiting for `parent_key`.
    #[must_use]
    pub fn take_children(&mut self, parent_key: &EntityKey) -> Vec<(PendingLink, Vec<EntityRef>)> {
        self.map.remove(parent_key).unwrap_or_default()
    }

    /// The registrations waiting for `parent_key`, without consuming them.
    #[must_use]
    pub fn children_for(&self, parent_key: &EntityKey) -> &[(PendingLink, Vec<EntityRef>)] {
        self.map.get(parent_key).map_or(&[], Vec::as_slice)
    }

    /// Moves registrations from one parent key to another.
    ///
    /// Used when a temporary key is replaced by the store-issued one.
    pub fn rekey(&mut self, old_key: &EntityKey, new_key: EntityKey) {
        if let Some(mut entries) = self.map.remove(old_key) {
            match self.map.get_mut(&new_key) {
                Some(existing) => existing.append(&mut entries),
                None => {
                    self.map.insert(new_key, entries);
                }
            }
        }
    }

    /// Number of parent keys with at least one waiting child.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns true if nothing is waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Drops every registration.
    pub fn clear(&mut self) {
        self.map.clear();
    }
}
