//! The entity cache: identity, change tracking, and relationship fixup.
//!
//! An [`EntityCache`] owns a [`MetadataStore`] and a group of entities per
//! structural type. Every mutation goes through the cache so that the
//! invariants hold at all times: one entity per key, lifecycle states that
//! always describe the pending save operation, original values that always
//! hold the last-accepted state, and navigation properties that stay
//! symmetric with the foreign key columns underneath them.
//!
//! Relationship writes work in two phases. The mutating operation first
//! plans a list of link operations against immutable state, then applies
//! them one at a time; each applied operation publishes its own change
//! event. Planning against a snapshot keeps the fixup logic free of
//! aliasing problems and makes the event stream deterministic.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use daybook_foundation::{
    CacheId, EntityAction, EntityKey, EntityRef, EntityState, EntityVersion, Error, MergeStrategy,
    NavId, PropId, Result, TypeId, Value,
};
use daybook_metadata::{MetadataStore, StructuralType};

use crate::aspect::{
    BackupPolicy, DetachedEntity, EntityAspect, NavSlot, PropertySlot, StructuralValues,
    compute_key,
};
use crate::events::{ChangeEvent, EventHub, PropertyChange, Subscriber, SubscriberId};
use crate::group::EntityGroup;
use crate::keygen::{KeyGenerator, NegativeKeyGenerator};
use crate::unattached::{PendingLink, UnattachedChildrenMap};
use crate::validate::{
    DataTypeRule, MaxLength, Required, RuleRegistry, ValidationContext, ValidationError,
    ValidationRule,
};

static NEXT_CACHE_ID: AtomicU32 = AtomicU32::new(1);

/// What merging an incoming entity should do, given the local state and a
/// [`MergeStrategy`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MergeDisposition {
    /// No local entity under this key; attach the incoming one.
    Attach,
    /// Overwrite the local entity's values with the incoming ones.
    Update {
        /// The local entity.
        target: EntityRef,
    },
    /// Keep the local values; only refresh relationship links.
    RelationsOnly {
        /// The local entity.
        target: EntityRef,
    },
    /// Leave the local entity entirely alone.
    Skip {
        /// The local entity.
        target: EntityRef,
    },
}

/// How a value write treats tracking.
#[derive(Copy, Clone, Debug)]
enum WritePolicy {
    /// Application write: backups, state transitions, navigation resync.
    Tracked {
        /// Whether a foreign key change refreshes navigation links.
        resync: bool,
    },
    /// Server data landing in the cache: raw slots, no transitions.
    Load,
}

/// One planned relationship mutation.
enum LinkOp {
    SetScalar {
        entity: EntityRef,
        nav: NavId,
        target: EntityRef,
    },
    Add {
        entity: EntityRef,
        nav: NavId,
        item: EntityRef,
    },
    Remove {
        entity: EntityRef,
        nav: NavId,
        item: EntityRef,
    },
    /// Tracked foreign key write with navigation resync suppressed.
    WriteFk {
        entity: EntityRef,
        prop: PropId,
        value: Value,
    },
    Register {
        key: EntityKey,
        link: PendingLink,
        child: EntityRef,
    },
    Unregister {
        key: EntityKey,
        link: PendingLink,
        child: EntityRef,
    },
}

/// A client-side cache of entities with change tracking.
pub struct EntityCache {
    id: CacheId,
    store: MetadataStore,
    groups: HashMap<TypeId, EntityGroup>,
    unattached: UnattachedChildrenMap,
    events: EventHub,
    keygen: Box<dyn KeyGenerator>,
    rules: RuleRegistry,
}

fn lookup(groups: &HashMap<TypeId, EntityGroup>, eref: EntityRef) -> Option<&EntityAspect> {
    groups.get(&eref.type_id)?.get(eref)
}

fn lookup_mut(
    groups: &mut HashMap<TypeId, EntityGroup>,
    eref: EntityRef,
) -> Option<&mut EntityAspect> {
    groups.get_mut(&eref.type_id)?.get_mut(eref)
}

/// The stored value of a scalar slot, nil for complex slots.
fn scalar_of(values: &StructuralValues, prop: PropId) -> Value {
    match values.slot(prop) {
        PropertySlot::Scalar(v) => v.clone(),
        PropertySlot::Complex(_) => Value::Nil,
    }
}

impl EntityCache {
    /// Creates a cache over the given metadata, with the default negative
    /// integer key generator.
    #[must_use]
    pub fn new(store: MetadataStore) -> Self {
        Self::with_key_generator(store, Box::new(NegativeKeyGenerator::new()))
    }

    /// Creates a cache with a custom placeholder key generator.
    #[must_use]
    pub fn with_key_generator(store: MetadataStore, keygen: Box<dyn KeyGenerator>) -> Self {
        Self {
            id: CacheId::new(NEXT_CACHE_ID.fetch_add(1, Ordering::Relaxed)),
            store,
            groups: HashMap::new(),
            unattached: UnattachedChildrenMap::new(),
            events: EventHub::new(),
            keygen,
            rules: RuleRegistry::default(),
        }
    }

    /// This cache's identity, carried by every reference it issues.
    #[must_use]
    pub fn id(&self) -> CacheId {
        self.id
    }

    /// The metadata this cache operates over.
    #[must_use]
    pub fn metadata(&self) -> &MetadataStore {
        &self.store
    }

    /// Mutable metadata access, for adding documents as services are
    /// discovered.
    pub fn metadata_mut(&mut self) -> &mut MetadataStore {
        &mut self.store
    }

    /// The placeholder key generator.
    #[must_use]
    pub fn key_generator(&self) -> &dyn KeyGenerator {
        &*self.keygen
    }

    /// Mutable access to the placeholder key generator.
    pub fn key_generator_mut(&mut self) -> &mut dyn KeyGenerator {
        &mut *self.keygen
    }

    /// The validation rule registry.
    #[must_use]
    pub fn rule_registry(&self) -> &RuleRegistry {
        &self.rules
    }

    /// Mutable registry access, for registering custom rules.
    pub fn rule_registry_mut(&mut self) -> &mut RuleRegistry {
        &mut self.rules
    }

    /// Resolves a data property id by name.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown type or property.
    pub fn data_prop(&self, type_id: TypeId, name: &str) -> Result<PropId> {
        let ty = self
            .store
            .get(type_id)
            .ok_or_else(|| Error::unknown_type(format!("type #{}", type_id.index())))?;
        ty.data_prop(name)
            .map(|(id, _)| id)
            .ok_or_else(|| Error::unknown_property(ty.full_name.to_string(), name))
    }

    /// Resolves a navigation property id by name.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown type or property.
    pub fn nav_prop(&self, type_id: TypeId, name: &str) -> Result<NavId> {
        let ty = self
            .store
            .get(type_id)
            .ok_or_else(|| Error::unknown_type(format!("type #{}", type_id.index())))?;
        ty.nav_prop(name)
            .map(|(id, _)| id)
            .ok_or_else(|| Error::unknown_property(ty.full_name.to_string(), name))
    }

    fn check_ref(&self, eref: EntityRef) -> Result<()> {
        if eref.is_null() {
            return Err(Error::stale_reference(eref));
        }
        if eref.cache != self.id {
            return Err(Error::cross_cache(self.id, eref.cache));
        }
        Ok(())
    }

    fn aspect(&self, eref: EntityRef) -> Result<&EntityAspect> {
        self.check_ref(eref)?;
        lookup(&self.groups, eref).ok_or_else(|| Error::stale_reference(eref))
    }

    fn aspect_mut(&mut self, eref: EntityRef) -> Result<&mut EntityAspect> {
        self.check_ref(eref)?;
        lookup_mut(&mut self.groups, eref).ok_or_else(|| Error::stale_reference(eref))
    }

    // ---- attach family ----------------------------------------------------

    /// Attaches a new entity in `Added` state.
    ///
    /// When the entity's type declares an auto-generated key and the key
    /// properties still hold their defaults, placeholder values are
    /// generated so the entity is immediately findable.
    ///
    /// # Errors
    ///
    /// Returns an error when the key is incomplete, another entity already
    /// holds it, or an attach subscriber fails.
    pub fn attach(&mut self, entity: DetachedEntity) -> Result<EntityRef> {
        self.attach_core(entity, EntityState::Added, EntityAction::Attach)
    }

    /// Attaches a query result in `Unchanged` state.
    ///
    /// # Errors
    ///
    /// Same conditions as [`EntityCache::attach`].
    pub fn attach_queried(&mut self, entity: DetachedEntity) -> Result<EntityRef> {
        self.attach_core(entity, EntityState::Unchanged, EntityAction::AttachOnQuery)
    }

    /// Attaches an imported entity in `Unchanged` state.
    ///
    /// # Errors
    ///
    /// Same conditions as [`EntityCache::attach`].
    pub fn attach_imported(&mut self, entity: DetachedEntity) -> Result<EntityRef> {
        self.attach_core(entity, EntityState::Unchanged, EntityAction::AttachOnImport)
    }

    /// Creates a fresh instance of the named type and attaches it.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown, abstract, or complex types, and for
    /// any condition [`EntityCache::attach`] reports.
    pub fn new_entity(&mut self, type_name: &str) -> Result<EntityRef> {
        let entity = DetachedEntity::new(&self.store, type_name)?;
        self.attach(entity)
    }

    /// Creates and attaches a fresh instance of the type with the given id.
    ///
    /// # Errors
    ///
    /// Same conditions as [`EntityCache::new_entity`].
    pub fn new_entity_of(&mut self, type_id: TypeId) -> Result<EntityRef> {
        let entity = DetachedEntity::of(&self.store, type_id)?;
        self.attach(entity)
    }

    fn attach_core(
        &mut self,
        entity: DetachedEntity,
        state: EntityState,
        action: EntityAction,
    ) -> Result<EntityRef> {
        let (type_id, mut values, unmapped) = entity.into_parts();
        let ty = self
            .store
            .get(type_id)
            .ok_or_else(|| Error::unknown_type(format!("type #{}", type_id.index())))?;
        if !ty.is_entity_type() {
            return Err(Error::wrong_entity_type(
                "an entity type",
                ty.full_name.to_string(),
            ));
        }
        if state == EntityState::Added {
            let needs_temp = ty
                .entity_facts()
                .is_some_and(|f| f.auto_generated_key_type.needs_temp_key());
            if needs_temp {
                for prop in ty.key_properties().iter().copied() {
                    let def = ty.data(prop);
                    let current = scalar_of(&values, prop);
                    let untouched = current.is_nil()
                        || def
                            .scalar_type()
                            .is_some_and(|dt| dt.default_value() == current);
                    if untouched {
                        let temp = self.keygen.next_temp_value(def)?;
                        values.set_scalar(def, prop, temp, BackupPolicy::RAW)?;
                    }
                }
            }
        }
        let mut aspect = EntityAspect::new(ty, values, state);
        aspect.unmapped = unmapped;
        if !aspect.key.is_complete() {
            return Err(Error::incomplete_key(aspect.key.clone()));
        }
        let cache_id = self.id;
        let group = self
            .groups
            .entry(type_id)
            .or_insert_with(|| EntityGroup::new(cache_id, type_id));
        let eref = group.insert(aspect)?;
        tracing::debug!(entity = %eref, ?state, "attach");
        self.link_related_entities(eref)?;
        self.events.publish(ChangeEvent::entity_level(eref, action))?;
        Ok(eref)
    }

    // ---- lookup -----------------------------------------------------------

    /// Looks up an entity by key. Entities pending deletion are invisible.
    #[must_use]
    pub fn find(&self, key: &EntityKey) -> Option<EntityRef> {
        self.find_where(key, false)
    }

    /// Looks up an entity by key, seeing entities pending deletion too.
    #[must_use]
    pub fn find_including_deleted(&self, key: &EntityKey) -> Option<EntityRef> {
        self.find_where(key, true)
    }

    fn find_where(&self, key: &EntityKey, include_deleted: bool) -> Option<EntityRef> {
        if let Some(group) = self.groups.get(&key.type_id()) {
            if let Some(eref) = group.find(key, include_deleted) {
                return Some(eref);
            }
        }
        // A base-typed key can identify an instance of a derived type.
        let mut derived: Vec<TypeId> = self
            .groups
            .keys()
            .copied()
            .filter(|t| *t != key.type_id() && self.store.is_assignable(key.type_id(), *t))
            .collect();
        derived.sort();
        for type_id in derived {
            let rebound = key.with_type(type_id);
            if let Some(eref) = self.groups[&type_id].find(&rebound, include_deleted) {
                return Some(eref);
            }
        }
        None
    }

    // ---- reads ------------------------------------------------------------

    /// The lifecycle state of an entity.
    ///
    /// # Errors
    ///
    /// Returns an error for a stale or foreign reference.
    pub fn state(&self, eref: EntityRef) -> Result<EntityState> {
        Ok(self.aspect(eref)?.state)
    }

    /// The identity key of an entity.
    ///
    /// # Errors
    ///
    /// Returns an error for a stale or foreign reference.
    pub fn key(&self, eref: EntityRef) -> Result<EntityKey> {
        Ok(self.aspect(eref)?.key.clone())
    }

    /// The version an entity's reads and writes currently address.
    ///
    /// # Errors
    ///
    /// Returns an error for a stale or foreign reference.
    pub fn version(&self, eref: EntityRef) -> Result<EntityVersion> {
        Ok(self.aspect(eref)?.version)
    }

    /// Reads a scalar property's current value.
    ///
    /// # Errors
    ///
    /// Returns an error for stale references, unknown properties, or
    /// complex properties.
    pub fn value(&self, eref: EntityRef, prop: PropId) -> Result<Value> {
        self.value_at(eref, prop, EntityVersion::Current)
    }

    /// Reads a scalar property under a version.
    ///
    /// # Errors
    ///
    /// Same conditions as [`EntityCache::value`].
    pub fn value_at(&self, eref: EntityRef, prop: PropId, version: EntityVersion) -> Result<Value> {
        let aspect = self.aspect(eref)?;
        let ty = &self.store[eref.type_id];
        if prop.index() >= ty.data_properties.len() {
            return Err(Error::unknown_property(
                ty.full_name.to_string(),
                format!("#{}", prop.index()),
            ));
        }
        aspect.values.value_at(ty, prop, version)
    }

    /// Reads a scalar property by name.
    ///
    /// # Errors
    ///
    /// Same conditions as [`EntityCache::value`].
    pub fn value_by_name(&self, eref: EntityRef, name: &str) -> Result<Value> {
        let prop = self.data_prop(eref.type_id, name)?;
        self.value(eref, prop)
    }

    /// Reads a scalar at a path of property ids, descending through
    /// complex members.
    ///
    /// # Errors
    ///
    /// Returns an error for stale references or invalid paths.
    pub fn value_path(
        &self,
        eref: EntityRef,
        path: &[PropId],
        version: EntityVersion,
    ) -> Result<Value> {
        let aspect = self.aspect(eref)?;
        aspect.values.value_at_path(&self.store, path, version)
    }

    /// Wire properties of an entity that had no metadata counterpart.
    ///
    /// # Errors
    ///
    /// Returns an error for a stale or foreign reference.
    pub fn unmapped(&self, eref: EntityRef) -> Result<&serde_json::Map<String, serde_json::Value>> {
        Ok(&self.aspect(eref)?.unmapped)
    }

    /// Keeps a wire property with no metadata counterpart on an entity.
    ///
    /// # Errors
    ///
    /// Returns an error for a stale or foreign reference.
    pub fn set_unmapped(
        &mut self,
        eref: EntityRef,
        name: impl Into<String>,
        value: serde_json::Value,
    ) -> Result<()> {
        self.aspect_mut(eref)?.unmapped.insert(name.into(), value);
        Ok(())
    }

    /// Renders an entity's current values as JSON keyed by property name.
    ///
    /// # Errors
    ///
    /// Returns an error for a stale or foreign reference.
    pub fn values_json(
        &self,
        eref: EntityRef,
    ) -> Result<serde_json::Map<String, serde_json::Value>> {
        Ok(self.aspect(eref)?.values.to_json_map(&self.store))
    }

    /// Collects an entity's original backups as dotted property names.
    ///
    /// # Errors
    ///
    /// Returns an error for a stale or foreign reference.
    pub fn original_values_json(
        &self,
        eref: EntityRef,
    ) -> Result<serde_json::Map<String, serde_json::Value>> {
        let aspect = self.aspect(eref)?;
        let mut out = serde_json::Map::new();
        aspect.values.collect_originals(&self.store, "", &mut out);
        Ok(out)
    }

    // ---- writes -----------------------------------------------------------

    /// Writes a scalar property, recording backups and transitioning
    /// `Unchanged` entities to `Modified`.
    ///
    /// Writing a key property re-indexes the entity under its new key.
    /// Writing a foreign key column refreshes the navigation links it
    /// backs. Writing the value a property already holds does nothing.
    ///
    /// # Errors
    ///
    /// Returns an error for stale references, complex properties, values
    /// the declared type cannot hold, a key change that collides with
    /// another entity, or a failing event subscriber.
    pub fn set_value(&mut self, eref: EntityRef, prop: PropId, value: impl Into<Value>) -> Result<()> {
        self.write_value_inner(eref, &[prop], value.into(), WritePolicy::Tracked { resync: true })?;
        Ok(())
    }

    /// Writes a scalar property by name.
    ///
    /// # Errors
    ///
    /// Same conditions as [`EntityCache::set_value`].
    pub fn set_value_by_name(
        &mut self,
        eref: EntityRef,
        name: &str,
        value: impl Into<Value>,
    ) -> Result<()> {
        let prop = self.data_prop(eref.type_id, name)?;
        self.set_value(eref, prop, value)
    }

    /// Writes a scalar at a path of property ids, descending through
    /// complex members. Backups land in the record owning the terminal
    /// property.
    ///
    /// # Errors
    ///
    /// Same conditions as [`EntityCache::set_value`], plus invalid paths.
    pub fn set_value_path(&mut self, eref: EntityRef, path: &[PropId], value: Value) -> Result<()> {
        self.write_value_inner(eref, path, value, WritePolicy::Tracked { resync: true })?;
        Ok(())
    }

    /// Writes a scalar without recording backups or transitioning state.
    ///
    /// This is how server data lands in the cache: query merges, imports,
    /// and post-save refreshes. Key properties still re-index.
    ///
    /// # Errors
    ///
    /// Returns an error for stale references, non-conforming values, or a
    /// key collision.
    pub fn load_value(&mut self, eref: EntityRef, prop: PropId, value: Value) -> Result<()> {
        self.write_value_inner(eref, &[prop], value, WritePolicy::Load)?;
        Ok(())
    }

    /// Writes a scalar at a property path without tracking.
    ///
    /// # Errors
    ///
    /// Same conditions as [`EntityCache::load_value`].
    pub fn load_value_path(&mut self, eref: EntityRef, path: &[PropId], value: Value) -> Result<()> {
        self.write_value_inner(eref, path, value, WritePolicy::Load)?;
        Ok(())
    }

    fn write_value_inner(
        &mut self,
        eref: EntityRef,
        path: &[PropId],
        value: Value,
        policy: WritePolicy,
    ) -> Result<Option<(Value, Value)>> {
        self.check_ref(eref)?;
        let type_id = eref.type_id;
        let top = *path
            .first()
            .ok_or_else(|| Error::internal("empty property path"))?;
        {
            let ty = &self.store[type_id];
            if top.index() >= ty.data_properties.len() {
                return Err(Error::unknown_property(
                    ty.full_name.to_string(),
                    format!("#{}", top.index()),
                ));
            }
        }
        let is_key_write = path.len() == 1 && self.store[type_id].data(top).part_of_key;

        // Key writes re-index; make sure the destination key is free first.
        let mut key_change = None;
        if is_key_write {
            let def = self.store[type_id].data(top);
            let data_type = def
                .scalar_type()
                .ok_or_else(|| Error::non_scalar(def.name.to_string()))?;
            let coerced = data_type.coerce(value.clone())?;
            let position = self.store[type_id]
                .key_properties()
                .iter()
                .position(|p| *p == top)
                .ok_or_else(|| Error::internal("key column missing from key properties"))?;
            let group = self
                .groups
                .get(&type_id)
                .ok_or_else(|| Error::stale_reference(eref))?;
            let aspect = group.get(eref).ok_or_else(|| Error::stale_reference(eref))?;
            let old_key = aspect.key.clone();
            let mut parts = old_key.values().to_vec();
            parts[position] = coerced;
            let new_key = EntityKey::new(type_id, parts);
            if new_key != old_key {
                if !new_key.is_complete() {
                    return Err(Error::incomplete_key(new_key));
                }
                if let Some(occupant) = group.find(&new_key, true) {
                    if occupant != eref {
                        return Err(Error::duplicate_key(new_key));
                    }
                }
                key_change = Some((old_key, new_key));
            }
        }

        let change = {
            let Self { store, groups, .. } = self;
            let aspect = lookup_mut(groups, eref).ok_or_else(|| Error::stale_reference(eref))?;
            let backup = match policy {
                WritePolicy::Tracked { .. } => aspect.backup_policy(),
                WritePolicy::Load => BackupPolicy::RAW,
            };
            aspect.values.set_at_path(store, path, value, backup)?
        };
        let Some((old, new)) = change else {
            return Ok(None);
        };

        if let Some((old_key, new_key)) = key_change {
            let group = self
                .groups
                .get_mut(&type_id)
                .ok_or_else(|| Error::stale_reference(eref))?;
            group.update_key(eref, new_key.clone())?;
            self.unattached.rekey(&old_key, new_key);
        }

        let property = self.path_name(type_id, path);
        self.events.publish(ChangeEvent::property(
            eref,
            PropertyChange::Data {
                property,
                old: old.clone(),
                new: new.clone(),
            },
        ))?;

        if let WritePolicy::Tracked { resync } = policy {
            self.note_modified(eref)?;
            if resync && path.len() == 1 {
                let def = self.store[type_id].data(top);
                if def.related_nav.is_some() || def.inverse_nav.is_some() {
                    self.resync_links(eref)?;
                }
            }
        }
        Ok(Some((old, new)))
    }

    fn path_name(&self, type_id: TypeId, path: &[PropId]) -> Arc<str> {
        let mut ty = &self.store[type_id];
        let mut name = String::new();
        for (i, prop) in path.iter().enumerate() {
            let def = ty.data(*prop);
            if i > 0 {
                name.push('.');
            }
            name.push_str(&def.name);
            if i + 1 < path.len() {
                if let Some(next) = def.complex_type() {
                    ty = &self.store[next];
                }
            }
        }
        Arc::from(name.as_str())
    }

    fn note_modified(&mut self, eref: EntityRef) -> Result<()> {
        let transitioned = {
            let aspect =
                lookup_mut(&mut self.groups, eref).ok_or_else(|| Error::stale_reference(eref))?;
            if aspect.state == EntityState::Unchanged {
                aspect.state = EntityState::Modified;
                true
            } else {
                false
            }
        };
        if transitioned {
            self.events
                .publish(ChangeEvent::entity_level(eref, EntityAction::EntityStateChange))?;
        }
        Ok(())
    }

    // ---- navigation -------------------------------------------------------

    /// The target of a to-one navigation, or the null reference when unset.
    ///
    /// # Errors
    ///
    /// Returns an error for stale references or a to-many navigation.
    pub fn nav_target(&self, eref: EntityRef, nav: NavId) -> Result<EntityRef> {
        let aspect = self.aspect(eref)?;
        let ty = &self.store[eref.type_id];
        if nav.index() >= ty.navigation_properties.len() {
            return Err(Error::unknown_property(
                ty.full_name.to_string(),
                format!("navigation #{}", nav.index()),
            ));
        }
        match &aspect.navs[nav.index()] {
            NavSlot::Scalar(r) => Ok(*r),
            NavSlot::Collection(_) => Err(Error::non_scalar(ty.nav(nav).name.to_string())),
        }
    }

    /// The members of a to-many navigation, in insertion order.
    ///
    /// # Errors
    ///
    /// Returns an error for stale references or a to-one navigation.
    pub fn nav_items(&self, eref: EntityRef, nav: NavId) -> Result<Vec<EntityRef>> {
        let aspect = self.aspect(eref)?;
        let ty = &self.store[eref.type_id];
        if nav.index() >= ty.navigation_properties.len() {
            return Err(Error::unknown_property(
                ty.full_name.to_string(),
                format!("navigation #{}", nav.index()),
            ));
        }
        match &aspect.navs[nav.index()] {
            NavSlot::Collection(items) => Ok(items.clone()),
            NavSlot::Scalar(_) => Err(Error::metadata(format!(
                "{} is a to-one navigation",
                ty.nav(nav).name
            ))),
        }
    }

    /// Sets a to-one navigation, keeping both sides and the underlying
    /// foreign key columns consistent.
    ///
    /// The inverse navigation on the old and new targets is updated, a
    /// displaced holder of a to-one inverse loses its link, and the
    /// foreign key columns on whichever side owns them are rewritten as
    /// tracked changes. Key columns are never nulled.
    ///
    /// # Errors
    ///
    /// Returns an error for stale or foreign references, a to-many
    /// navigation, a target of the wrong type, or a failing subscriber.
    pub fn set_nav(&mut self, eref: EntityRef, nav: NavId, target: Option<EntityRef>) -> Result<()> {
        self.aspect(eref)?;
        let target_ref = target.unwrap_or_else(EntityRef::null);
        let type_id = eref.type_id;
        {
            let ty = &self.store[type_id];
            if nav.index() >= ty.navigation_properties.len() {
                return Err(Error::unknown_property(
                    ty.full_name.to_string(),
                    format!("navigation #{}", nav.index()),
                ));
            }
        }
        let (is_scalar, declared, inverse, fk_cols, inv_fk_cols, nav_name) = {
            let nd = self.store[type_id].nav(nav);
            (
                nd.is_scalar,
                nd.target,
                nd.inverse,
                nd.foreign_keys.clone(),
                nd.inv_foreign_keys.clone(),
                Arc::clone(&nd.name),
            )
        };
        if !is_scalar {
            return Err(Error::non_scalar(nav_name.to_string()));
        }
        let declared = declared.ok_or_else(|| Error::unresolved_type(nav_name.to_string()))?;
        if !target_ref.is_null() {
            self.aspect(target_ref)?;
            if !self.store.is_assignable(declared, target_ref.type_id) {
                return Err(Error::wrong_entity_type(
                    self.store[declared].full_name.to_string(),
                    self.store[target_ref.type_id].full_name.to_string(),
                ));
            }
        }
        let current = match &self.aspect(eref)?.navs[nav.index()] {
            NavSlot::Scalar(r) => *r,
            NavSlot::Collection(_) => return Err(Error::non_scalar(nav_name.to_string())),
        };
        if current == target_ref {
            return Ok(());
        }

        let mut ops = Vec::new();

        // Leaving the old target: clear its inverse side.
        if !current.is_null() {
            if let Some(inv) = inverse {
                match lookup(&self.groups, current).map(|a| &a.navs[inv.index()]) {
                    Some(NavSlot::Scalar(r)) if *r == eref => ops.push(LinkOp::SetScalar {
                        entity: current,
                        nav: inv,
                        target: EntityRef::null(),
                    }),
                    Some(NavSlot::Collection(_)) => ops.push(LinkOp::Remove {
                        entity: current,
                        nav: inv,
                        item: eref,
                    }),
                    _ => {}
                }
            }
        }
        // Joining the new target: update its inverse side, displacing the
        // previous holder of a to-one inverse.
        if !target_ref.is_null() {
            if let Some(inv) = inverse {
                match lookup(&self.groups, target_ref).map(|a| &a.navs[inv.index()]) {
                    Some(NavSlot::Scalar(prev)) => {
                        let prev = *prev;
                        if !prev.is_null() && prev != eref {
                            ops.push(LinkOp::SetScalar {
                                entity: prev,
                                nav,
                                target: EntityRef::null(),
                            });
                            for col in &fk_cols {
                                if !self.store[prev.type_id].data(*col).part_of_key {
                                    ops.push(LinkOp::WriteFk {
                                        entity: prev,
                                        prop: *col,
                                        value: Value::Nil,
                                    });
                                }
                            }
                        }
                        ops.push(LinkOp::SetScalar {
                            entity: target_ref,
                            nav: inv,
                            target: eref,
                        });
                    }
                    Some(NavSlot::Collection(_)) => ops.push(LinkOp::Add {
                        entity: target_ref,
                        nav: inv,
                        item: eref,
                    }),
                    None => {}
                }
            }
        }
        // Relationships whose foreign key lives on the target side.
        if !inv_fk_cols.is_empty() {
            if !current.is_null() && lookup(&self.groups, current).is_some() {
                for col in &inv_fk_cols {
                    if !self.store[current.type_id].data(*col).part_of_key {
                        ops.push(LinkOp::WriteFk {
                            entity: current,
                            prop: *col,
                            value: Value::Nil,
                        });
                    }
                }
            }
            if !target_ref.is_null() {
                let parts = self.aspect(eref)?.key.values().to_vec();
                for (col, part) in inv_fk_cols.iter().zip(parts) {
                    if !self.store[target_ref.type_id].data(*col).part_of_key {
                        ops.push(LinkOp::WriteFk {
                            entity: target_ref,
                            prop: *col,
                            value: part,
                        });
                    }
                }
            }
        }
        // This entity's own slot.
        ops.push(LinkOp::SetScalar {
            entity: eref,
            nav,
            target: target_ref,
        });
        // Foreign key columns on this side follow the new target's key.
        if !fk_cols.is_empty() {
            if let Some(waiting) = self.fk_wait_key(eref, declared, &fk_cols) {
                ops.push(LinkOp::Unregister {
                    key: waiting,
                    link: PendingLink::ChildNav(nav),
                    child: eref,
                });
            }
            if target_ref.is_null() {
                for col in &fk_cols {
                    if !self.store[type_id].data(*col).part_of_key {
                        ops.push(LinkOp::WriteFk {
                            entity: eref,
                            prop: *col,
                            value: Value::Nil,
                        });
                    }
                }
            } else {
                let parts = self.aspect(target_ref)?.key.values().to_vec();
                for (col, part) in fk_cols.iter().zip(parts) {
                    ops.push(LinkOp::WriteFk {
                        entity: eref,
                        prop: *col,
                        value: part,
                    });
                }
            }
        }
        self.apply_ops(ops)
    }

    /// Attaches a detached entity as `Added` and points the navigation at
    /// it, returning its reference.
    ///
    /// # Errors
    ///
    /// Any condition of [`EntityCache::attach`] or
    /// [`EntityCache::set_nav`].
    pub fn set_nav_entity(
        &mut self,
        eref: EntityRef,
        nav: NavId,
        entity: DetachedEntity,
    ) -> Result<EntityRef> {
        let child = self.attach(entity)?;
        self.set_nav(eref, nav, Some(child))?;
        Ok(child)
    }

    /// Adds an entity to a to-many navigation.
    ///
    /// When the relationship is navigable from the child too, this runs
    /// the full to-one logic from the child's side, so foreign keys and
    /// any previous parent stay consistent.
    ///
    /// # Errors
    ///
    /// Returns an error for stale or foreign references, a to-one
    /// navigation, an item of the wrong type, or a failing subscriber.
    pub fn add_to_nav(&mut self, eref: EntityRef, nav: NavId, item: EntityRef) -> Result<()> {
        self.aspect(eref)?;
        self.aspect(item)?;
        let type_id = eref.type_id;
        {
            let ty = &self.store[type_id];
            if nav.index() >= ty.navigation_properties.len() {
                return Err(Error::unknown_property(
                    ty.full_name.to_string(),
                    format!("navigation #{}", nav.index()),
                ));
            }
        }
        let (is_scalar, declared, inverse, inv_fk_cols, nav_name) = {
            let nd = self.store[type_id].nav(nav);
            (
                nd.is_scalar,
                nd.target,
                nd.inverse,
                nd.inv_foreign_keys.clone(),
                Arc::clone(&nd.name),
            )
        };
        if is_scalar {
            return Err(Error::metadata(format!(
                "{nav_name} is a to-one navigation; use set_nav"
            )));
        }
        let declared = declared.ok_or_else(|| Error::unresolved_type(nav_name.to_string()))?;
        if !self.store.is_assignable(declared, item.type_id) {
            return Err(Error::wrong_entity_type(
                self.store[declared].full_name.to_string(),
                self.store[item.type_id].full_name.to_string(),
            ));
        }
        if let Some(inv) = inverse {
            let child_side_scalar = matches!(
                lookup(&self.groups, item).map(|a| &a.navs[inv.index()]),
                Some(NavSlot::Scalar(_))
            );
            if child_side_scalar {
                return self.set_nav(item, inv, Some(eref));
            }
        }
        if let NavSlot::Collection(items) = &self.aspect(eref)?.navs[nav.index()] {
            if items.contains(&item) {
                return Ok(());
            }
        }
        let mut ops = vec![LinkOp::Add {
            entity: eref,
            nav,
            item,
        }];
        if !inv_fk_cols.is_empty() {
            let parts = self.aspect(eref)?.key.values().to_vec();
            for (col, part) in inv_fk_cols.iter().zip(parts) {
                if !self.store[item.type_id].data(*col).part_of_key {
                    ops.push(LinkOp::WriteFk {
                        entity: item,
                        prop: *col,
                        value: part,
                    });
                }
            }
        }
        self.apply_ops(ops)
    }

    /// Attaches a detached entity as `Added` and adds it to a to-many
    /// navigation, returning its reference.
    ///
    /// # Errors
    ///
    /// Any condition of [`EntityCache::attach`] or
    /// [`EntityCache::add_to_nav`].
    pub fn add_to_nav_entity(
        &mut self,
        eref: EntityRef,
        nav: NavId,
        entity: DetachedEntity,
    ) -> Result<EntityRef> {
        let child = self.attach(entity)?;
        self.add_to_nav(eref, nav, child)?;
        Ok(child)
    }

    /// Removes an entity from a to-many navigation, nulling the foreign
    /// key columns underneath (key columns excepted).
    ///
    /// # Errors
    ///
    /// Same conditions as [`EntityCache::add_to_nav`].
    pub fn remove_from_nav(&mut self, eref: EntityRef, nav: NavId, item: EntityRef) -> Result<()> {
        self.aspect(eref)?;
        self.check_ref(item)?;
        let type_id = eref.type_id;
        {
            let ty = &self.store[type_id];
            if nav.index() >= ty.navigation_properties.len() {
                return Err(Error::unknown_property(
                    ty.full_name.to_string(),
                    format!("navigation #{}", nav.index()),
                ));
            }
        }
        let (is_scalar, inverse, inv_fk_cols, nav_name) = {
            let nd = self.store[type_id].nav(nav);
            (
                nd.is_scalar,
                nd.inverse,
                nd.inv_foreign_keys.clone(),
                Arc::clone(&nd.name),
            )
        };
        if is_scalar {
            return Err(Error::metadata(format!(
                "{nav_name} is a to-one navigation; use set_nav"
            )));
        }
        if let Some(inv) = inverse {
            let child_side_scalar = matches!(
                lookup(&self.groups, item).map(|a| &a.navs[inv.index()]),
                Some(NavSlot::Scalar(_))
            );
            if child_side_scalar {
                return self.set_nav(item, inv, None);
            }
        }
        let present = match &self.aspect(eref)?.navs[nav.index()] {
            NavSlot::Collection(items) => items.contains(&item),
            NavSlot::Scalar(_) => false,
        };
        if !present {
            return Ok(());
        }
        let mut ops = vec![LinkOp::Remove {
            entity: eref,
            nav,
            item,
        }];
        if !inv_fk_cols.is_empty() && lookup(&self.groups, item).is_some() {
            for col in &inv_fk_cols {
                if !self.store[item.type_id].data(*col).part_of_key {
                    ops.push(LinkOp::WriteFk {
                        entity: item,
                        prop: *col,
                        value: Value::Nil,
                    });
                }
            }
        }
        self.apply_ops(ops)
    }

    fn fk_wait_key(
        &self,
        eref: EntityRef,
        declared: TypeId,
        fk_cols: &[PropId],
    ) -> Option<EntityKey> {
        let aspect = lookup(&self.groups, eref)?;
        let parts: Vec<Value> = fk_cols
            .iter()
            .map(|c| scalar_of(&aspect.values, *c))
            .collect();
        let key = EntityKey::new(declared, parts);
        key.is_complete().then_some(key)
    }

    // ---- relationship fixup ----------------------------------------------

    /// Recomputes every navigation link driven by this entity's foreign
    /// key columns, registering it as waiting where targets are absent.
    ///
    /// This is the full-recompute half of fixup: called after foreign key
    /// writes, after rollbacks, and after merges overwrite values in
    /// place. Links to this entity held by others through their own
    /// foreign keys are not touched.
    ///
    /// # Errors
    ///
    /// Returns an error for stale or foreign references, or a failing
    /// subscriber.
    pub fn resync_links(&mut self, eref: EntityRef) -> Result<()> {
        self.aspect(eref)?;
        let type_id = eref.type_id;
        self.unattached.remove_child_everywhere(eref);
        let mut ops = Vec::new();

        // To-one navigations over this entity's own foreign keys.
        let nav_count = self.store[type_id].navigation_properties.len();
        for raw in 0..nav_count {
            let nav = NavId::new(u32::try_from(raw).map_err(|_| Error::internal("navigation index overflow"))?);
            let (is_scalar, declared, fk_cols, inverse) = {
                let nd = self.store[type_id].nav(nav);
                (nd.is_scalar, nd.target, nd.foreign_keys.clone(), nd.inverse)
            };
            if !is_scalar || fk_cols.is_empty() {
                continue;
            }
            let Some(declared) = declared else { continue };
            let aspect = self.aspect(eref)?;
            let parts: Vec<Value> = fk_cols
                .iter()
                .map(|c| scalar_of(&aspect.values, *c))
                .collect();
            let current = match &aspect.navs[nav.index()] {
                NavSlot::Scalar(r) => *r,
                NavSlot::Collection(_) => EntityRef::null(),
            };
            let key = EntityKey::new(declared, parts);
            let desired = if key.is_complete() {
                self.find(&key)
            } else {
                None
            };
            if !current.is_null() && desired != Some(current) {
                ops.push(LinkOp::SetScalar {
                    entity: eref,
                    nav,
                    target: EntityRef::null(),
                });
                if let Some(inv) = inverse {
                    match lookup(&self.groups, current).map(|a| &a.navs[inv.index()]) {
                        Some(NavSlot::Scalar(r)) if *r == eref => ops.push(LinkOp::SetScalar {
                            entity: current,
                            nav: inv,
                            target: EntityRef::null(),
                        }),
                        Some(NavSlot::Collection(_)) => ops.push(LinkOp::Remove {
                            entity: current,
                            nav: inv,
                            item: eref,
                        }),
                        _ => {}
                    }
                }
            }
            if let Some(parent) = desired {
                if parent != current {
                    ops.push(LinkOp::SetScalar {
                        entity: eref,
                        nav,
                        target: parent,
                    });
                    if let Some(inv) = inverse {
                        match lookup(&self.groups, parent).map(|a| &a.navs[inv.index()]) {
                            Some(NavSlot::Scalar(_)) => ops.push(LinkOp::SetScalar {
                                entity: parent,
                                nav: inv,
                                target: eref,
                            }),
                            Some(NavSlot::Collection(_)) => ops.push(LinkOp::Add {
                                entity: parent,
                                nav: inv,
                                item: eref,
                            }),
                            None => {}
                        }
                    }
                }
            } else if key.is_complete() {
                ops.push(LinkOp::Register {
                    key,
                    link: PendingLink::ChildNav(nav),
                    child: eref,
                });
            }
        }

        // Parent-side-only navigations keyed by this entity's foreign keys.
        for (parent_ty, parent_nav) in self.parent_side_navs(type_id) {
            let (inv_cols, parent_scalar) = {
                let nd = self.store[parent_ty].nav(parent_nav);
                (nd.inv_foreign_keys.clone(), nd.is_scalar)
            };
            let aspect = self.aspect(eref)?;
            let parts: Vec<Value> = inv_cols
                .iter()
                .map(|c| scalar_of(&aspect.values, *c))
                .collect();
            let key = EntityKey::new(parent_ty, parts);
            let desired = if key.is_complete() {
                self.find(&key)
            } else {
                None
            };
            // Drop links held by parents this entity no longer belongs to.
            let mut holders = Vec::new();
            for (tid, group) in &self.groups {
                if !self.store.is_assignable(parent_ty, *tid) {
                    continue;
                }
                for a in group.iter() {
                    let held = match &a.navs[parent_nav.index()] {
                        NavSlot::Scalar(r) => *r == eref,
                        NavSlot::Collection(items) => items.contains(&eref),
                    };
                    if held {
                        holders.push(a.eref);
                    }
                }
            }
            for parent in holders {
                if desired == Some(parent) {
                    continue;
                }
                if parent_scalar {
                    ops.push(LinkOp::SetScalar {
                        entity: parent,
                        nav: parent_nav,
                        target: EntityRef::null(),
                    });
                } else {
                    ops.push(LinkOp::Remove {
                        entity: parent,
                        nav: parent_nav,
                        item: eref,
                    });
                }
            }
            if let Some(parent) = desired {
                if parent_scalar {
                    ops.push(LinkOp::SetScalar {
                        entity: parent,
                        nav: parent_nav,
                        target: eref,
                    });
                } else {
                    ops.push(LinkOp::Add {
                        entity: parent,
                        nav: parent_nav,
                        item: eref,
                    });
                }
            } else if key.is_complete() {
                ops.push(LinkOp::Register {
                    key,
                    link: PendingLink::ParentNav(parent_nav),
                    child: eref,
                });
            }
        }

        self.apply_ops(ops)
    }

    /// Navigations declared only on the parent side whose foreign keys
    /// live on `type_id`, deduplicated.
    fn parent_side_navs(&self, type_id: TypeId) -> Vec<(TypeId, NavId)> {
        let ty = &self.store[type_id];
        let mut out: Vec<(TypeId, NavId)> = Vec::new();
        for pid in ty.data_ids() {
            let Some((parent_ty, parent_nav)) = ty.data(pid).inverse_nav else {
                continue;
            };
            if out.contains(&(parent_ty, parent_nav)) {
                continue;
            }
            // Bidirectional pairs run through the child navigation instead.
            if self.store[parent_ty].nav(parent_nav).inverse.is_some() {
                continue;
            }
            out.push((parent_ty, parent_nav));
        }
        out
    }

    /// Links a freshly attached entity into the relationship graph: takes
    /// waiters registered under its key, then resolves its own foreign
    /// keys against the cache.
    fn link_related_entities(&mut self, eref: EntityRef) -> Result<()> {
        let my_key = self.aspect(eref)?.key.clone();
        let mut ops = Vec::new();

        for (link, children) in self.unattached.take_children(&my_key) {
            match link {
                PendingLink::ChildNav(nav) => {
                    for child in children {
                        let Some(child_aspect) = lookup(&self.groups, child) else {
                            continue;
                        };
                        if child_aspect.state == EntityState::Deleted {
                            continue;
                        }
                        ops.push(LinkOp::SetScalar {
                            entity: child,
                            nav,
                            target: eref,
                        });
                        if let Some(inv) = self.store[child.type_id].nav(nav).inverse {
                            match &self.aspect(eref)?.navs[inv.index()] {
                                NavSlot::Scalar(_) => ops.push(LinkOp::SetScalar {
                                    entity: eref,
                                    nav: inv,
                                    target: child,
                                }),
                                NavSlot::Collection(_) => ops.push(LinkOp::Add {
                                    entity: eref,
                                    nav: inv,
                                    item: child,
                                }),
                            }
                        }
                    }
                }
                PendingLink::ParentNav(nav) => {
                    for child in children {
                        let Some(child_aspect) = lookup(&self.groups, child) else {
                            continue;
                        };
                        if child_aspect.state == EntityState::Deleted {
                            continue;
                        }
                        match &self.aspect(eref)?.navs[nav.index()] {
                            NavSlot::Scalar(_) => ops.push(LinkOp::SetScalar {
                                entity: eref,
                                nav,
                                target: child,
                            }),
                            NavSlot::Collection(_) => ops.push(LinkOp::Add {
                                entity: eref,
                                nav,
                                item: child,
                            }),
                        }
                    }
                }
            }
        }
        self.apply_ops(ops)?;

        // Now resolve this entity's own foreign keys both ways.
        self.resync_links(eref)
    }

    fn apply_ops(&mut self, ops: Vec<LinkOp>) -> Result<()> {
        for op in ops {
            self.apply_op(op)?;
        }
        Ok(())
    }

    fn apply_op(&mut self, op: LinkOp) -> Result<()> {
        match op {
            LinkOp::SetScalar { entity, nav, target } => {
                let old = {
                    let Some(aspect) = lookup_mut(&mut self.groups, entity) else {
                        return Ok(());
                    };
                    let Some(NavSlot::Scalar(slot)) = aspect.navs.get_mut(nav.index()) else {
                        return Ok(());
                    };
                    let old = *slot;
                    if old == target {
                        return Ok(());
                    }
                    *slot = target;
                    old
                };
                let property = Arc::clone(&self.store[entity.type_id].nav(nav).name);
                self.events.publish(ChangeEvent::property(
                    entity,
                    PropertyChange::Reference {
                        property,
                        old,
                        new: target,
                    },
                ))
            }
            LinkOp::Add { entity, nav, item } => {
                let added = {
                    let Some(aspect) = lookup_mut(&mut self.groups, entity) else {
                        return Ok(());
                    };
                    let Some(NavSlot::Collection(items)) = aspect.navs.get_mut(nav.index()) else {
                        return Ok(());
                    };
                    if items.contains(&item) {
                        false
                    } else {
                        items.push(item);
                        true
                    }
                };
                if added {
                    let property = Arc::clone(&self.store[entity.type_id].nav(nav).name);
                    self.events.publish(ChangeEvent::property(
                        entity,
                        PropertyChange::CollectionAdd { property, item },
                    ))?;
                }
                Ok(())
            }
            LinkOp::Remove { entity, nav, item } => {
                let removed = {
                    let Some(aspect) = lookup_mut(&mut self.groups, entity) else {
                        return Ok(());
                    };
                    let Some(NavSlot::Collection(items)) = aspect.navs.get_mut(nav.index()) else {
                        return Ok(());
                    };
                    let before = items.len();
                    items.retain(|r| *r != item);
                    items.len() != before
                };
                if removed {
                    let property = Arc::clone(&self.store[entity.type_id].nav(nav).name);
                    self.events.publish(ChangeEvent::property(
                        entity,
                        PropertyChange::CollectionRemove { property, item },
                    ))?;
                }
                Ok(())
            }
            LinkOp::WriteFk { entity, prop, value } => {
                self.write_value_inner(entity, &[prop], value, WritePolicy::Tracked { resync: false })
                    .map(|_| ())
            }
            LinkOp::Register { key, link, child } => {
                self.unattached.add_child(key, link, child);
                Ok(())
            }
            LinkOp::Unregister { key, link, child } => {
                self.unattached.remove_child(&key, link, child);
                Ok(())
            }
        }
    }

    // ---- lifecycle --------------------------------------------------------

    /// Marks an entity for deletion on the next save.
    ///
    /// The entity leaves every navigation on both sides but keeps its
    /// foreign key values, stays findable through
    /// [`EntityCache::find_including_deleted`], and keeps its key
    /// reserved. Children that reference it through foreign keys are
    /// remembered so a rejected deletion relinks them. Deleting an
    /// `Added` entity detaches it outright.
    ///
    /// # Errors
    ///
    /// Returns an error for a stale or foreign reference, or a failing
    /// subscriber.
    pub fn delete(&mut self, eref: EntityRef) -> Result<()> {
        let state = self.aspect(eref)?.state;
        if state == EntityState::Added {
            self.detach(eref)?;
            return Ok(());
        }
        if state == EntityState::Deleted {
            return Ok(());
        }
        let ops = self.unlink_ops(eref, true)?;
        self.apply_ops(ops)?;
        self.aspect_mut(eref)?.state = EntityState::Deleted;
        tracing::debug!(entity = %eref, "delete");
        self.events
            .publish(ChangeEvent::entity_level(eref, EntityAction::Delete))?;
        self.events
            .publish(ChangeEvent::entity_level(eref, EntityAction::EntityStateChange))
    }

    /// Detaches an entity, handing its values back and making every
    /// reference to it stale.
    ///
    /// Children referencing it through foreign keys are remembered under
    /// its key, so re-attaching an entity with the same key relinks them.
    ///
    /// # Errors
    ///
    /// Returns an error for a stale or foreign reference, or a failing
    /// subscriber.
    pub fn detach(&mut self, eref: EntityRef) -> Result<DetachedEntity> {
        self.aspect(eref)?;
        let ops = self.unlink_ops(eref, true)?;
        self.apply_ops(ops)?;
        self.unattached.remove_child_everywhere(eref);
        let type_id = eref.type_id;
        let mut aspect = self
            .groups
            .get_mut(&type_id)
            .and_then(|g| g.remove(eref))
            .ok_or_else(|| Error::stale_reference(eref))?;
        aspect.values.clear_backups();
        tracing::debug!(entity = %eref, "detach");
        self.events
            .publish(ChangeEvent::entity_level(eref, EntityAction::Detach))?;
        Ok(DetachedEntity::from_parts(
            type_id,
            aspect.values,
            aspect.unmapped,
        ))
    }

    /// Plans the removal of an entity from every navigation it appears
    /// in, on both sides. Foreign key values stay untouched.
    fn unlink_ops(&self, eref: EntityRef, re_register: bool) -> Result<Vec<LinkOp>> {
        let type_id = eref.type_id;
        let my_key = self.aspect(eref)?.key.clone();
        let mut ops = Vec::new();

        // This entity's own slots, plus the inverse side of each link.
        let nav_count = self.store[type_id].navigation_properties.len();
        for raw in 0..nav_count {
            let nav = NavId::new(u32::try_from(raw).map_err(|_| Error::internal("navigation index overflow"))?);
            let inverse = self.store[type_id].nav(nav).inverse;
            let aspect = self.aspect(eref)?;
            match &aspect.navs[nav.index()] {
                NavSlot::Scalar(r) if !r.is_null() => {
                    let target = *r;
                    ops.push(LinkOp::SetScalar {
                        entity: eref,
                        nav,
                        target: EntityRef::null(),
                    });
                    if let Some(inv) = inverse {
                        match lookup(&self.groups, target).map(|a| &a.navs[inv.index()]) {
                            Some(NavSlot::Scalar(r)) if *r == eref => {
                                ops.push(LinkOp::SetScalar {
                                    entity: target,
                                    nav: inv,
                                    target: EntityRef::null(),
                                });
                            }
                            Some(NavSlot::Collection(_)) => ops.push(LinkOp::Remove {
                                entity: target,
                                nav: inv,
                                item: eref,
                            }),
                            _ => {}
                        }
                    }
                }
                NavSlot::Collection(items) if !items.is_empty() => {
                    for item in items.clone() {
                        ops.push(LinkOp::Remove {
                            entity: eref,
                            nav,
                            item,
                        });
                        if let Some(inv) = inverse {
                            if let Some(NavSlot::Scalar(r)) =
                                lookup(&self.groups, item).map(|a| &a.navs[inv.index()])
                            {
                                if *r == eref {
                                    ops.push(LinkOp::SetScalar {
                                        entity: item,
                                        nav: inv,
                                        target: EntityRef::null(),
                                    });
                                }
                            }
                        }
                        // Children keep their foreign keys pointing here;
                        // remember them so the key can relink later.
                        if re_register {
                            let link = match inverse {
                                Some(inv) => PendingLink::ChildNav(inv),
                                None => PendingLink::ParentNav(nav),
                            };
                            ops.push(LinkOp::Register {
                                key: my_key.clone(),
                                link,
                                child: item,
                            });
                        }
                    }
                }
                _ => {}
            }
        }

        // One-way links held by other entities: scalar navigations with no
        // inverse pointing here, and parent-side-only navigations holding
        // this entity.
        for (tid, group) in &self.groups {
            let holder_ty = &self.store[*tid];
            for nav in holder_ty.nav_ids() {
                let nd = holder_ty.nav(nav);
                if nd.inverse.is_some() {
                    continue;
                }
                let Some(declared) = nd.target else { continue };
                if nd.is_scalar && !nd.foreign_keys.is_empty() {
                    // A child of this entity through its own navigation.
                    if !self.store.is_assignable(declared, type_id) {
                        continue;
                    }
                    for a in group.iter() {
                        if matches!(&a.navs[nav.index()], NavSlot::Scalar(r) if *r == eref) {
                            ops.push(LinkOp::SetScalar {
                                entity: a.eref,
                                nav,
                                target: EntityRef::null(),
                            });
                            if re_register {
                                ops.push(LinkOp::Register {
                                    key: my_key.clone(),
                                    link: PendingLink::ChildNav(nav),
                                    child: a.eref,
                                });
                            }
                        }
                    }
                } else if !nd.inv_foreign_keys.is_empty() {
                    // A parent holding this entity through a one-way
                    // navigation; this entity carries the foreign keys.
                    if !self.store.is_assignable(declared, type_id) {
                        continue;
                    }
                    for a in group.iter() {
                        match &a.navs[nav.index()] {
                            NavSlot::Scalar(r) if *r == eref => ops.push(LinkOp::SetScalar {
                                entity: a.eref,
                                nav,
                                target: EntityRef::null(),
                            }),
                            NavSlot::Collection(items) if items.contains(&eref) => {
                                ops.push(LinkOp::Remove {
                                    entity: a.eref,
                                    nav,
                                    item: eref,
                                });
                            }
                            _ => {}
                        }
                    }
                }
            }
        }

        Ok(ops)
    }

    /// Accepts an entity's pending changes, as a successful save would.
    ///
    /// `Added` and `Modified` become `Unchanged` with their backups
    /// dropped; an accepted deletion detaches the entity. Accepting an
    /// unchanged entity does nothing.
    ///
    /// # Errors
    ///
    /// Returns an error for a stale or foreign reference, or a failing
    /// subscriber.
    pub fn accept_changes(&mut self, eref: EntityRef) -> Result<()> {
        let state = self.aspect(eref)?.state;
        match state {
            EntityState::Unchanged => Ok(()),
            EntityState::Added | EntityState::Modified => {
                {
                    let aspect = self.aspect_mut(eref)?;
                    aspect.values.clear_backups();
                    aspect.state = EntityState::Unchanged;
                    aspect.version = EntityVersion::Current;
                    aspect.pre_edit_state = None;
                }
                self.events
                    .publish(ChangeEvent::entity_level(eref, EntityAction::AcceptChanges))?;
                self.events
                    .publish(ChangeEvent::entity_level(eref, EntityAction::EntityStateChange))
            }
            EntityState::Deleted => {
                self.events
                    .publish(ChangeEvent::entity_level(eref, EntityAction::AcceptChanges))?;
                self.detach(eref)?;
                Ok(())
            }
            EntityState::Detached => Err(Error::stale_reference(eref)),
        }
    }

    /// Rolls an entity's pending changes back.
    ///
    /// `Modified` restores its original values and becomes `Unchanged`;
    /// a rejected deletion restores the entity and relinks the children
    /// that referenced it; rejecting an `Added` entity detaches it.
    ///
    /// # Errors
    ///
    /// Returns an error for a stale or foreign reference, a restored key
    /// that now collides, or a failing subscriber.
    pub fn reject_changes(&mut self, eref: EntityRef) -> Result<()> {
        let state = self.aspect(eref)?.state;
        match state {
            EntityState::Unchanged => Ok(()),
            EntityState::Added => {
                self.events
                    .publish(ChangeEvent::entity_level(eref, EntityAction::RejectChanges))?;
                self.detach(eref)?;
                Ok(())
            }
            EntityState::Modified => {
                {
                    let aspect = self.aspect_mut(eref)?;
                    aspect.values.roll_back_original();
                    aspect.version = EntityVersion::Current;
                    aspect.pre_edit_state = None;
                    aspect.state = EntityState::Unchanged;
                }
                self.restore_key_after_rollback(eref)?;
                self.resync_links(eref)?;
                self.events
                    .publish(ChangeEvent::entity_level(eref, EntityAction::RejectChanges))?;
                self.events
                    .publish(ChangeEvent::entity_level(eref, EntityAction::EntityStateChange))
            }
            EntityState::Deleted => {
                {
                    let aspect = self.aspect_mut(eref)?;
                    aspect.values.roll_back_original();
                    aspect.version = EntityVersion::Current;
                    aspect.pre_edit_state = None;
                    aspect.state = EntityState::Unchanged;
                }
                self.restore_key_after_rollback(eref)?;
                // Children were remembered at delete time; relink them and
                // resolve this entity's own keys again.
                self.link_related_entities(eref)?;
                self.events
                    .publish(ChangeEvent::entity_level(eref, EntityAction::RejectChanges))?;
                self.events
                    .publish(ChangeEvent::entity_level(eref, EntityAction::EntityStateChange))
            }
            EntityState::Detached => Err(Error::stale_reference(eref)),
        }
    }

    fn restore_key_after_rollback(&mut self, eref: EntityRef) -> Result<()> {
        let type_id = eref.type_id;
        let (old_key, new_key) = {
            let Self { store, groups, .. } = self;
            let aspect = lookup_mut(groups, eref).ok_or_else(|| Error::stale_reference(eref))?;
            let ty = &store[type_id];
            (aspect.key.clone(), compute_key(ty, &aspect.values))
        };
        if old_key != new_key {
            let group = self
                .groups
                .get_mut(&type_id)
                .ok_or_else(|| Error::stale_reference(eref))?;
            group.update_key(eref, new_key.clone())?;
            self.unattached.rekey(&old_key, new_key);
        }
        Ok(())
    }

    /// Transitions an `Unchanged` entity to `Modified` without touching
    /// any value.
    ///
    /// # Errors
    ///
    /// Returns an error for a stale reference or any other starting state.
    pub fn set_modified(&mut self, eref: EntityRef) -> Result<()> {
        let state = self.aspect(eref)?.state;
        if state != EntityState::Unchanged {
            return Err(Error::illegal_transition(state, EntityState::Modified));
        }
        self.aspect_mut(eref)?.state = EntityState::Modified;
        self.events
            .publish(ChangeEvent::entity_level(eref, EntityAction::EntityStateChange))
    }

    /// Forces an entity to `Unchanged`, keeping its current values and
    /// dropping all backups. Used when server data replaces local state.
    ///
    /// # Errors
    ///
    /// Returns an error for a stale or foreign reference, or a failing
    /// subscriber.
    pub fn reset_to_unchanged(&mut self, eref: EntityRef) -> Result<()> {
        let transitioned = {
            let aspect = self.aspect_mut(eref)?;
            aspect.values.clear_backups();
            aspect.version = EntityVersion::Current;
            aspect.pre_edit_state = None;
            let was = aspect.state;
            aspect.state = EntityState::Unchanged;
            was != EntityState::Unchanged
        };
        if transitioned {
            self.events
                .publish(ChangeEvent::entity_level(eref, EntityAction::EntityStateChange))?;
        }
        Ok(())
    }

    // ---- edit sessions ----------------------------------------------------

    /// Opens an edit session: subsequent writes also record into the
    /// proposed backup, so the whole session can be cancelled as one.
    /// Opening an already-open session does nothing.
    ///
    /// # Errors
    ///
    /// Returns an error for a stale or foreign reference.
    pub fn begin_edit(&mut self, eref: EntityRef) -> Result<()> {
        let aspect = self.aspect_mut(eref)?;
        if aspect.version == EntityVersion::Proposed {
            return Ok(());
        }
        aspect.pre_edit_state = Some(aspect.state);
        aspect.version = EntityVersion::Proposed;
        Ok(())
    }

    /// Cancels the open edit session, restoring values and lifecycle
    /// state from before [`EntityCache::begin_edit`]. Without an open
    /// session this does nothing.
    ///
    /// # Errors
    ///
    /// Returns an error for a stale or foreign reference, a restored key
    /// that now collides, or a failing subscriber.
    pub fn cancel_edit(&mut self, eref: EntityRef) -> Result<()> {
        let cancelled = {
            let aspect = self.aspect_mut(eref)?;
            if aspect.version != EntityVersion::Proposed {
                false
            } else {
                aspect.values.roll_back_proposed();
                aspect.version = EntityVersion::Current;
                if let Some(state) = aspect.pre_edit_state.take() {
                    aspect.state = state;
                }
                true
            }
        };
        if cancelled {
            self.restore_key_after_rollback(eref)?;
            self.resync_links(eref)?;
        }
        Ok(())
    }

    /// Commits the open edit session, keeping the written values and
    /// whatever state transitions they caused.
    ///
    /// # Errors
    ///
    /// Returns an error for a stale or foreign reference.
    pub fn end_edit(&mut self, eref: EntityRef) -> Result<()> {
        let aspect = self.aspect_mut(eref)?;
        if aspect.version != EntityVersion::Proposed {
            return Ok(());
        }
        aspect.values.clear_proposed();
        aspect.version = EntityVersion::Current;
        aspect.pre_edit_state = None;
        Ok(())
    }

    // ---- events -----------------------------------------------------------

    /// Registers a change subscriber, returning its id.
    pub fn subscribe(&mut self, subscriber: Subscriber) -> SubscriberId {
        self.events.subscribe(subscriber)
    }

    /// Removes a subscriber. Returns false if the id is unknown.
    pub fn unsubscribe(&mut self, id: SubscriberId) -> bool {
        self.events.unsubscribe(id)
    }

    /// Returns true while inside a load scope.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.events.is_loading()
    }

    /// Runs `f` inside a load scope: change events queue up and flush in
    /// order when the outermost scope exits.
    ///
    /// While flushing, subscriber failures are logged and swallowed,
    /// except on attach events, which always surface.
    ///
    /// # Errors
    ///
    /// Returns `f`'s error if it fails; otherwise any error the flush
    /// surfaces.
    pub fn with_load_scope<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        self.events.enter_load();
        let result = f(self);
        let flush = self.events.exit_load();
        match (result, flush) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), _) => Err(e),
        }
    }

    // ---- cache-wide queries -----------------------------------------------

    /// Every attached entity, deleted ones included, grouped by type in
    /// type id order.
    #[must_use]
    pub fn entities(&self) -> Vec<EntityRef> {
        let mut type_ids: Vec<TypeId> = self.groups.keys().copied().collect();
        type_ids.sort();
        let mut out = Vec::new();
        for tid in type_ids {
            out.extend(self.groups[&tid].iter().map(|a| a.eref));
        }
        out
    }

    /// Every attached entity of a type, subtypes included.
    #[must_use]
    pub fn entities_of(&self, type_id: TypeId) -> Vec<EntityRef> {
        let mut type_ids: Vec<TypeId> = self
            .groups
            .keys()
            .copied()
            .filter(|t| self.store.is_assignable(type_id, *t))
            .collect();
        type_ids.sort();
        let mut out = Vec::new();
        for tid in type_ids {
            out.extend(self.groups[&tid].iter().map(|a| a.eref));
        }
        out
    }

    /// Every entity pending a save operation.
    #[must_use]
    pub fn changes(&self) -> Vec<EntityRef> {
        let mut type_ids: Vec<TypeId> = self.groups.keys().copied().collect();
        type_ids.sort();
        let mut out = Vec::new();
        for tid in type_ids {
            out.extend(
                self.groups[&tid]
                    .iter()
                    .filter(|a| a.state.has_changes())
                    .map(|a| a.eref),
            );
        }
        out
    }

    /// Entities of a type pending a save operation, subtypes included.
    #[must_use]
    pub fn changes_of(&self, type_id: TypeId) -> Vec<EntityRef> {
        self.entities_of(type_id)
            .into_iter()
            .filter(|e| lookup(&self.groups, *e).is_some_and(|a| a.state.has_changes()))
            .collect()
    }

    /// Returns true if any entity is pending a save operation.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.groups
            .values()
            .any(|g| g.iter().any(|a| a.state.has_changes()))
    }

    /// Number of attached entities, deleted ones included.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.groups.values().map(EntityGroup::len).sum()
    }

    /// Returns true if nothing is attached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.values().all(EntityGroup::is_empty)
    }

    /// Detaches everything. References issued before the clear read as
    /// stale; placeholder key state survives.
    ///
    /// # Errors
    ///
    /// Returns an error if a subscriber fails on the clear event.
    pub fn clear(&mut self) -> Result<()> {
        for group in self.groups.values_mut() {
            group.clear();
        }
        self.unattached.clear();
        tracing::debug!("cache cleared");
        self.events
            .publish(ChangeEvent::entity_level(EntityRef::null(), EntityAction::Clear))
    }

    // ---- validation -------------------------------------------------------

    /// Validates one entity against its metadata: implicit rules from
    /// property facts, plus configured validators through the registry.
    /// The failures are stored on the entity and returned.
    ///
    /// # Errors
    ///
    /// Returns an error for a stale reference or an unbuildable validator
    /// configuration.
    pub fn validate_entity(&mut self, eref: EntityRef) -> Result<Vec<ValidationError>> {
        self.check_ref(eref)?;
        let failures = {
            let Self {
                store,
                groups,
                rules,
                ..
            } = self;
            let aspect = lookup(groups, eref).ok_or_else(|| Error::stale_reference(eref))?;
            let ty = &store[eref.type_id];
            let mut out = Vec::new();
            validate_record(store, rules, ty, &ty.full_name, &aspect.values, "", &mut out)?;
            for config in &ty.validators {
                let rule = rules.rule_from_config(config)?;
                let ctx = ValidationContext {
                    entity_type: &ty.full_name,
                    property: None,
                    value: &Value::Nil,
                };
                out.extend(rule.validate(&ctx));
            }
            out
        };
        self.aspect_mut(eref)?.errors = failures.clone();
        Ok(failures)
    }

    /// Validates every entity pending an insert or update, returning the
    /// total failure count. Deletions skip validation.
    ///
    /// # Errors
    ///
    /// Returns an error for an unbuildable validator configuration.
    pub fn validate_changes(&mut self) -> Result<usize> {
        let mut total = 0;
        for eref in self.changes() {
            if self.state(eref)? == EntityState::Deleted {
                continue;
            }
            total += self.validate_entity(eref)?.len();
        }
        Ok(total)
    }

    /// The failures recorded by the last validation of an entity.
    ///
    /// # Errors
    ///
    /// Returns an error for a stale or foreign reference.
    pub fn errors(&self, eref: EntityRef) -> Result<&[ValidationError]> {
        Ok(&self.aspect(eref)?.errors)
    }

    /// Returns true if the last validation of an entity recorded failures.
    ///
    /// # Errors
    ///
    /// Returns an error for a stale or foreign reference.
    pub fn has_errors(&self, eref: EntityRef) -> Result<bool> {
        Ok(!self.aspect(eref)?.errors.is_empty())
    }

    // ---- merge and save support -------------------------------------------

    /// Decides what merging an incoming entity under `key` should do.
    ///
    /// Entities without pending changes always take incoming values;
    /// entities with pending changes follow the strategy.
    ///
    /// # Errors
    ///
    /// Returns an error under [`MergeStrategy::Disallowed`] when the key
    /// is already present.
    pub fn merge_disposition(
        &self,
        key: &EntityKey,
        strategy: MergeStrategy,
    ) -> Result<MergeDisposition> {
        let Some(target) = self.find_including_deleted(key) else {
            return Ok(MergeDisposition::Attach);
        };
        let state = self.aspect(target)?.state;
        match strategy {
            MergeStrategy::Disallowed => Err(Error::merge_disallowed(key.clone())),
            MergeStrategy::SkipMerge => Ok(MergeDisposition::Skip { target }),
            MergeStrategy::OverwriteChanges => Ok(MergeDisposition::Update { target }),
            MergeStrategy::PreserveChanges => {
                if state.has_changes() {
                    Ok(MergeDisposition::RelationsOnly { target })
                } else {
                    Ok(MergeDisposition::Update { target })
                }
            }
        }
    }

    /// Rewrites a placeholder key with the store-assigned one after a
    /// save: the entity itself is re-indexed, and every foreign key
    /// column in the cache holding the placeholder follows, re-indexing
    /// children whose key contains the column.
    ///
    /// # Errors
    ///
    /// Returns an error when no entity holds the placeholder, the type's
    /// key spans multiple columns, or the real key collides.
    pub fn apply_key_mapping(&mut self, type_id: TypeId, temp: &Value, real: &Value) -> Result<()> {
        let old_key = EntityKey::single(type_id, temp.clone());
        let eref = self
            .find_including_deleted(&old_key)
            .ok_or_else(|| Error::entity_not_found(old_key.clone()))?;
        let key_prop = {
            let ty = &self.store[eref.type_id];
            let key_props = ty.key_properties();
            if key_props.len() != 1 {
                return Err(Error::key_generation(
                    "key mapping requires a single-column key",
                ));
            }
            key_props[0]
        };
        self.write_value_inner(eref, &[key_prop], real.clone(), WritePolicy::Load)?;
        tracing::debug!(entity = %eref, %temp, %real, "key mapping applied");

        // Dependent foreign keys across the whole cache.
        let mut rewrites: Vec<(EntityRef, PropId)> = Vec::new();
        for (owner_ty, col) in self.fk_columns_referencing(type_id) {
            for (tid, group) in &self.groups {
                if !self.store.is_assignable(owner_ty, *tid) {
                    continue;
                }
                for aspect in group.iter() {
                    if scalar_of(&aspect.values, col) == *temp {
                        rewrites.push((aspect.eref, col));
                    }
                }
            }
        }
        for (child, col) in rewrites {
            self.write_value_inner(child, &[col], real.clone(), WritePolicy::Load)?;
        }
        Ok(())
    }

    /// Every (owning type, column) pair whose values reference keys of
    /// `referenced`.
    fn fk_columns_referencing(&self, referenced: TypeId) -> Vec<(TypeId, PropId)> {
        let mut out: Vec<(TypeId, PropId)> = Vec::new();
        for ty in self.store.types() {
            for nav in ty.nav_ids() {
                let nd = ty.nav(nav);
                let Some(target) = nd.target else { continue };
                if nd.is_scalar
                    && !nd.foreign_keys.is_empty()
                    && self.store.is_assignable(target, referenced)
                {
                    for col in &nd.foreign_keys {
                        if !out.contains(&(ty.id, *col)) {
                            out.push((ty.id, *col));
                        }
                    }
                }
                if !nd.inv_foreign_keys.is_empty() && self.store.is_assignable(ty.id, referenced) {
                    for col in &nd.inv_foreign_keys {
                        if !out.contains(&(target, *col)) {
                            out.push((target, *col));
                        }
                    }
                }
            }
        }
        out
    }
}

/// Runs implicit and configured property rules over one record,
/// recursing into complex members with dotted names.
fn validate_record(
    store: &MetadataStore,
    rules: &RuleRegistry,
    ty: &StructuralType,
    entity_type_name: &str,
    values: &StructuralValues,
    prefix: &str,
    out: &mut Vec<ValidationError>,
) -> Result<()> {
    for pid in ty.data_ids() {
        let def = ty.data(pid);
        let dotted = if prefix.is_empty() {
            def.name.to_string()
        } else {
            format!("{prefix}.{}", def.name)
        };
        match values.slot(pid) {
            PropertySlot::Complex(nested) => {
                let nested_ty = &store[nested.type_id()];
                validate_record(store, rules, nested_ty, entity_type_name, nested, &dotted, out)?;
            }
            PropertySlot::Scalar(value) => {
                let ctx = ValidationContext {
                    entity_type: entity_type_name,
                    property: Some(&dotted),
                    value,
                };
                if !def.nullable {
                    out.extend(Required.validate(&ctx));
                }
                if let Some(max) = def.max_length {
                    out.extend(MaxLength { max }.validate(&ctx));
                }
                if let Some(data_type) = def.scalar_type() {
                    out.extend(DataTypeRule { data_type }.validate(&ctx));
                }
                for config in &def.validators {
                    let rule = rules.rule_from_config(config)?;
                    out.extend(rule.validate(&ctx));
                }
            }
        }
    }
    Ok(())
}

impl fmt::Debug for EntityCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityCache")
            .field("id", &self.id)
            .field("entities", &self.entity_count())
            .field("pending_links", &self.unattached.len())
            .finish_non_exhaustive()
    }
}
