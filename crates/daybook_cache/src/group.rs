//! Per-type entity storage with generational indices and a key index.
//!
//! Each entity type attached to a cache gets one [`EntityGroup`]: a slot
//! arena whose indices are reused after detach, with a generation counter
//! that makes references to detached entities detectably stale instead of
//! silently resolving to whatever moved into the slot. Even generations
//! are free, odd generations are alive. Alongside the arena the group
//! keeps a key index, so identity lookups never scan.

use std::collections::HashMap;

use daybook_foundation::{
    CacheId, EntityKey, EntityRef, EntityState, Error, Result, TypeId,
};

use crate::aspect::EntityAspect;

struct GroupSlot {
    /// Even = free, odd = alive.
    generation: u32,
    aspect: Option<EntityAspect>,
}

/// All attached entities of one structural type.
pub(crate) struct EntityGroup {
    cache: CacheId,
    type_id: TypeId,
    slots: Vec<GroupSlot>,
    free: Vec<u32>,
    /// Key index over live slots, deleted entities included.
    key_map: HashMap<EntityKey, u32>,
}

impl EntityGroup {
    pub(crate) fn new(cache: CacheId, type_id: TypeId) -> Self {
        Self {
            cache,
            type_id,
            slots: Vec::new(),
            free: Vec::new(),
            key_map: HashMap::new(),
        }
    }

    pub(crate) fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Number of live entities, deleted ones included.
    pub(crate) fn len(&self) -> usize {
        self.key_map.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.key_map.is_empty()
    }

    /// Inserts an aspect and issues its reference.
    ///
    /// The key must be free. An occupant in `Deleted` state still holds
    /// its key; a second entity with that key cannot attach until the
    /// deletion is accepted.
    pub(crate) fn insert(&mut self, mut aspect: EntityAspect) -> Result<EntityRef> {
        debug_assert_eq!(aspect.key.type_id(), self.type_id);
        if self.key_map.contains_key(&aspect.key) {
            return Err(Error::duplicate_key(aspect.key.clone()));
        }
        let index = match self.free.pop() {
            Some(index) => {
                // Was even/free, becomes odd/alive.
                self.slots[index as usize].generation += 1;
                index
            }
            None => {
                let index = u32::try_from(self.slots.len())
                    .map_err(|_| Error::internal("entity group index overflow"))?;
                // Fresh slots start alive at generation 1.
                self.slots.push(GroupSlot {
                    generation: 1,
                    aspect: None,
                });
                index
            }
        };
        let slot = &mut self.slots[index as usize];
        let eref = EntityRef::new(self.cache, self.type_id, index, slot.generation);
        aspect.eref = eref;
        self.key_map.insert(aspect.key.clone(), index);
        slot.aspect = Some(aspect);
        Ok(eref)
    }

    /// Removes an entity, freeing its slot and key.
    pub(crate) fn remove(&mut self, eref: EntityRef) -> Option<EntityAspect> {
        let slot = self.slots.get_mut(eref.index as usize)?;
        if slot.generation != eref.generation {
            return None;
        }
        let aspect = slot.aspect.take()?;
        // Was odd/alive, becomes even/free.
        slot.generation += 1;
        self.free.push(eref.index);
        self.key_map.remove(&aspect.key);
        Some(aspect)
    }

    pub(crate) fn get(&self, eref: EntityRef) -> Option<&EntityAspect> {
        let slot = self.slots.get(eref.index as usize)?;
        if slot.generation != eref.generation {
            return None;
        }
        slot.aspect.as_ref()
    }

    pub(crate) fn get_mut(&mut self, eref: EntityRef) -> Option<&mut EntityAspect> {
        let slot = self.slots.get_mut(eref.index as usize)?;
        if slot.generation != eref.generation {
            return None;
        }
        slot.aspect.as_mut()
    }

    pub(crate) fn get_at(&self, index: u32) -> Option<&EntityAspect> {
        self.slots.get(index as usize)?.aspect.as_ref()
    }

    /// Looks up an entity by key.
    ///
    /// Entities in `Deleted` state are invisible unless asked for; their
    /// key stays reserved either way.
    pub(crate) fn find(&self, key: &EntityKey, include_deleted: bool) -> Option<EntityRef> {
        debug_assert_eq!(key.type_id(), self.type_id);
        let index = *self.key_map.get(key)?;
        let aspect = self.get_at(index)?;
        if !include_deleted && aspect.state == EntityState::Deleted {
            return None;
        }
        Some(aspect.eref)
    }

    /// Moves an entity to a new key, preserving its slot and reference.
    ///
    /// # Errors
    ///
    /// Returns a duplicate key error if another entity already holds the
    /// new key, and a stale reference error for a dead handle.
    pub(crate) fn update_key(&mut self, eref: EntityRef, new_key: EntityKey) -> Result<()> {
        debug_assert_eq!(new_key.type_id(), self.type_id);
        if let Some(&occupant) = self.key_map.get(&new_key) {
            if occupant != eref.index {
                return Err(Error::duplicate_key(new_key));
            }
        }
        let aspect = self
            .get_mut(eref)
            .ok_or_else(|| Error::stale_reference(eref))?;
        let old_key = std::mem::replace(&mut aspect.key, new_key.clone());
        self.key_map.remove(&old_key);
        self.key_map.insert(new_key, eref.index);
        Ok(())
    }

    /// Iterates live aspects in slot order.
    pub(crate) fn iter(&self) -> impl Iterator<Item = &EntityAspect> {
        self.slots.iter().filter_map(|slot| slot.aspect.as_ref())
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut EntityAspect> {
        self.slots.iter_mut().filter_map(|slot| slot.aspect.as_mut())
    }

    /// Detaches every entity, keeping generation counters so references
    /// issued before the clear read as stale rather than dangling.
    pub(crate) fn clear(&mut self) {
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.aspect.take().is_some() {
                slot.generation += 1;
                self.free.push(index as u32);
            }
        }
        self.key_map.clear();
    }
}
