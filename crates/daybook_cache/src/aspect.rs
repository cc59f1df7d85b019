//! Per-entity value storage and versioning.
//!
//! Every entity and complex object stores its data properties as a
//! [`StructuralValues`] record: a slot per declared property, pre-sized
//! from metadata at construction so property access never allocates or
//! searches. Complex properties hold a nested record inline, typed by the
//! complex type; the nested record keeps its own backup maps but has no
//! lifecycle of its own: its state and version are its parent entity's,
//! and its backups are cleared and replayed together with the parent's.
//!
//! Backup maps are lazy. The original map records the pre-change value the
//! first time a property changes while the entity is clean; rolling back
//! replays it. The proposed map does the same for an open edit session.
//! Entities in `Added` state never record originals, because there is no
//! server state to roll back to.

use std::collections::HashMap;

use daybook_foundation::{
    EntityKey, EntityRef, EntityState, EntityVersion, Error, PropId, Result, TypeId, Value,
};
use daybook_metadata::{DataProperty, MetadataStore, StructuralType, TypeKind};

use crate::validate::ValidationError;

/// Whether a write records pre-change values, decided per entity write
/// from its state and version.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct BackupPolicy {
    pub(crate) record_original: bool,
    pub(crate) record_proposed: bool,
}

impl BackupPolicy {
    /// No backups at all: loads, fixup of freshly attached entities,
    /// rollback replay.
    pub(crate) const RAW: Self = Self {
        record_original: false,
        record_proposed: false,
    };
}

/// One stored data property.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum PropertySlot {
    /// A scalar value.
    Scalar(Value),
    /// A nested complex object.
    Complex(Box<StructuralValues>),
}

/// Pre-sized value storage for one structural record.
#[derive(Clone, Debug, PartialEq)]
pub struct StructuralValues {
    type_id: TypeId,
    slots: Vec<PropertySlot>,
    original: Option<HashMap<PropId, Value>>,
    proposed: Option<HashMap<PropId, Value>>,
}

// Complex types that nest deeper than this are assumed cyclic.
const MAX_COMPLEX_DEPTH: usize = 16;

impl StructuralValues {
    /// Builds storage for a fresh instance of `type_id`, with every slot
    /// holding its declared initial value and complex properties built
    /// recursively.
    ///
    /// # Errors
    ///
    /// Returns an error if the type is unknown, unresolved, or nests
    /// complex types past any reasonable depth (a definition cycle).
    pub fn for_type(store: &MetadataStore, type_id: TypeId) -> Result<Self> {
        Self::for_type_at(store, type_id, 0)
    }

    fn for_type_at(store: &MetadataStore, type_id: TypeId, depth: usize) -> Result<Self> {
        if depth > MAX_COMPLEX_DEPTH {
            return Err(Error::metadata("complex types nest too deeply"));
        }
        let ty = store
            .get(type_id)
            .ok_or_else(|| Error::unknown_type(format!("type #{}", type_id.index())))?;
        if !ty.is_resolved() {
            return Err(Error::unresolved_type(ty.full_name.to_string()));
        }
        let mut slots = Vec::with_capacity(ty.data_properties.len());
        for pid in ty.data_ids() {
            let prop = ty.data(pid);
            let slot = match prop.complex_type() {
                Some(complex_id) => PropertySlot::Complex(Box::new(Self::for_type_at(
                    store,
                    complex_id,
                    depth + 1,
                )?)),
                None => PropertySlot::Scalar(prop.initial_value()),
            };
            slots.push(slot);
        }
        Ok(Self {
            type_id,
            slots,
            original: None,
            proposed: None,
        })
    }

    /// The structural type these values belong to.
    #[must_use]
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub(crate) fn slot(&self, prop: PropId) -> &PropertySlot {
        &self.slots[prop.index()]
    }

    /// The current scalar value of a property.
    ///
    /// # Errors
    ///
    /// Returns an error for complex properties.
    pub fn scalar(&self, ty: &StructuralType, prop: PropId) -> Result<&Value> {
        match &self.slots[prop.index()] {
            PropertySlot::Scalar(v) => Ok(v),
            PropertySlot::Complex(_) => Err(Error::non_scalar(ty.data(prop).name.to_string())),
        }
    }

    /// The nested record of a complex property.
    ///
    /// # Errors
    ///
    /// Returns an error for scalar properties.
    pub fn complex(&self, ty: &StructuralType, prop: PropId) -> Result<&StructuralValues> {
        match &self.slots[prop.index()] {
            PropertySlot::Complex(c) => Ok(c),
            PropertySlot::Scalar(_) => Err(Error::metadata(format!(
                "{}.{} is scalar, not complex",
                ty.full_name,
                ty.data(prop).name
            ))),
        }
    }

    pub(crate) fn complex_mut(&mut self, prop: PropId) -> Option<&mut StructuralValues> {
        match &mut self.slots[prop.index()] {
            PropertySlot::Complex(c) => Some(c),
            PropertySlot::Scalar(_) => None,
        }
    }

    /// Reads a scalar property under a version.
    ///
    /// `Original` reads the backup when one exists and falls back to the
    /// current value; `Current` and `Proposed` read the live slot (inside
    /// an edit session the live slot is the proposed value).
    ///
    /// # Errors
    ///
    /// Returns an error for complex properties.
    pub fn value_at(
        &self,
        ty: &StructuralType,
        prop: PropId,
        version: EntityVersion,
    ) -> Result<Value> {
        if version == EntityVersion::Original {
            if let Some(backup) = self.original.as_ref().and_then(|m| m.get(&prop)) {
                return Ok(backup.clone());
            }
        }
        self.scalar(ty, prop).cloned()
    }

    /// Reads a scalar at a path of property ids, descending through
    /// complex records.
    ///
    /// # Errors
    ///
    /// Returns an error for an empty path, a non-complex property in a
    /// non-terminal position, or a complex property in the terminal one.
    pub fn value_at_path(
        &self,
        store: &MetadataStore,
        path: &[PropId],
        version: EntityVersion,
    ) -> Result<Value> {
        let (record, last) = self.descend(store, path)?;
        let ty = &store[record.type_id];
        record.value_at(ty, last, version)
    }

    fn descend<'a>(
        &'a self,
        store: &MetadataStore,
        path: &[PropId],
    ) -> Result<(&'a StructuralValues, PropId)> {
        let (&last, rest) = path
            .split_last()
            .ok_or_else(|| Error::internal("empty property path"))?;
        let mut record = self;
        for &prop in rest {
            let ty = &store[record.type_id];
            record = record.complex(ty, prop)?;
        }
        Ok((record, last))
    }

    fn descend_mut<'a>(
        &'a mut self,
        store: &MetadataStore,
        path: &[PropId],
    ) -> Result<(&'a mut StructuralValues, PropId)> {
        let (&last, rest) = path
            .split_last()
            .ok_or_else(|| Error::internal("empty property path"))?;
        let mut record = self;
        for &prop in rest {
            let ty = &store[record.type_id];
            let name = ty.data(prop).name.to_string();
            record = record
                .complex_mut(prop)
                .ok_or_else(|| Error::non_scalar(name))?;
        }
        Ok((record, last))
    }

    /// Writes a scalar property, coercing through its declared type and
    /// recording backups per `policy`.
    ///
    /// Returns `None` when the coerced value equals the stored one; the
    /// write is skipped entirely and no backup is recorded. Otherwise
    /// returns the old and new values.
    pub(crate) fn set_scalar(
        &mut self,
        prop_def: &DataProperty,
        prop: PropId,
        value: Value,
        policy: BackupPolicy,
    ) -> Result<Option<(Value, Value)>> {
        let Some(data_type) = prop_def.scalar_type() else {
            return Err(Error::non_scalar(prop_def.name.to_string()));
        };
        let coerced = data_type.coerce(value)?;
        let PropertySlot::Scalar(current) = &mut self.slots[prop.index()] else {
            return Err(Error::non_scalar(prop_def.name.to_string()));
        };
        if *current == coerced {
            return Ok(None);
        }
        let old = std::mem::replace(current, coerced.clone());
        if policy.record_original {
            self.original
                .get_or_insert_with(HashMap::new)
                .entry(prop)
                .or_insert_with(|| old.clone());
        }
        if policy.record_proposed {
            self.proposed
                .get_or_insert_with(HashMap::new)
                .entry(prop)
                .or_insert_with(|| old.clone());
        }
        Ok(Some((old, coerced)))
    }

    /// Writes a scalar at a path of property ids. Backups land in the
    /// record that owns the terminal property.
    pub(crate) fn set_at_path(
        &mut self,
        store: &MetadataStore,
        path: &[PropId],
        value: Value,
        policy: BackupPolicy,
    ) -> Result<Option<(Value, Value)>> {
        let (record, last) = self.descend_mut(store, path)?;
        let ty = &store[record.type_id];
        let prop_def = ty.data(last).clone();
        record.set_scalar(&prop_def, last, value, policy)
    }

    /// Replays original backups, restoring pre-change values, and clears
    /// both backup maps recursively. Returns true if any value changed.
    pub(crate) fn roll_back_original(&mut self) -> bool {
        let mut changed = false;
        if let Some(map) = self.original.take() {
            for (prop, value) in map {
                if let PropertySlot::Scalar(current) = &mut self.slots[prop.index()] {
                    if *current != value {
                        *current = value;
                        changed = true;
                    }
                }
            }
        }
        self.proposed = None;
        for slot in &mut self.slots {
            if let PropertySlot::Complex(c) = slot {
                changed |= c.roll_back_original();
            }
        }
        changed
    }

    /// Replays proposed backups and clears the proposed maps recursively,
    /// leaving original backups alone. Returns true if any value changed.
    pub(crate) fn roll_back_proposed(&mut self) -> bool {
        let mut changed = false;
        if let Some(map) = self.proposed.take() {
            for (prop, value) in map {
                if let PropertySlot::Scalar(current) = &mut self.slots[prop.index()] {
                    if *current != value {
                        *current = value;
                        changed = true;
                    }
                }
            }
        }
        for slot in &mut self.slots {
            if let PropertySlot::Complex(c) = slot {
                changed |= c.roll_back_proposed();
            }
        }
        changed
    }

    /// Drops both backup maps recursively without touching values.
    pub(crate) fn clear_backups(&mut self) {
        self.original = None;
        self.proposed = None;
        for slot in &mut self.slots {
            if let PropertySlot::Complex(c) = slot {
                c.clear_backups();
            }
        }
    }

    /// Drops the proposed maps recursively, keeping the values they
    /// guarded. Originals survive.
    pub(crate) fn clear_proposed(&mut self) {
        self.proposed = None;
        for slot in &mut self.slots {
            if let PropertySlot::Complex(c) = slot {
                c.clear_proposed();
            }
        }
    }

    /// Returns true if any record in this tree holds an original backup.
    #[must_use]
    pub fn has_original_backups(&self) -> bool {
        if self.original.as_ref().is_some_and(|m| !m.is_empty()) {
            return true;
        }
        self.slots.iter().any(|slot| match slot {
            PropertySlot::Complex(c) => c.has_original_backups(),
            PropertySlot::Scalar(_) => false,
        })
    }

    /// Renders current values as a JSON object keyed by property name,
    /// nesting complex records as objects.
    #[must_use]
    pub fn to_json_map(&self, store: &MetadataStore) -> serde_json::Map<String, serde_json::Value> {
        let ty = &store[self.type_id];
        let mut out = serde_json::Map::new();
        for pid in ty.data_ids() {
            let name = ty.data(pid).name.to_string();
            let value = match &self.slots[pid.index()] {
                PropertySlot::Scalar(v) => v.to_json(),
                PropertySlot::Complex(c) => serde_json::Value::Object(c.to_json_map(store)),
            };
            out.insert(name, value);
        }
        out
    }

    /// Collects original backups as dotted property names, recursively.
    pub(crate) fn collect_originals(
        &self,
        store: &MetadataStore,
        prefix: &str,
        out: &mut serde_json::Map<String, serde_json::Value>,
    ) {
        let ty = &store[self.type_id];
        if let Some(map) = &self.original {
            for (prop, value) in map {
                let name = &ty.data(*prop).name;
                let key = if prefix.is_empty() {
                    name.to_string()
                } else {
                    format!("{prefix}.{name}")
                };
                out.insert(key, value.to_json());
            }
        }
        for pid in ty.data_ids() {
            if let PropertySlot::Complex(c) = &self.slots[pid.index()] {
                let name = &ty.data(pid).name;
                let nested = if prefix.is_empty() {
                    name.to_string()
                } else {
                    format!("{prefix}.{name}")
                };
                c.collect_originals(store, &nested, out);
            }
        }
    }
}

/// One stored navigation property.
#[derive(Clone, Debug)]
pub(crate) enum NavSlot {
    /// A to-one reference; the null reference means unset.
    Scalar(EntityRef),
    /// A to-many collection.
    Collection(Vec<EntityRef>),
}

/// The tracked record of one attached entity.
#[derive(Debug)]
pub(crate) struct EntityAspect {
    /// The handle the owning group issued for this entity.
    pub(crate) eref: EntityRef,
    pub(crate) state: EntityState,
    pub(crate) version: EntityVersion,
    /// State to restore when an edit session is cancelled.
    pub(crate) pre_edit_state: Option<EntityState>,
    /// The key this entity is indexed under.
    pub(crate) key: EntityKey,
    pub(crate) values: StructuralValues,
    pub(crate) navs: Vec<NavSlot>,
    /// Wire properties with no metadata counterpart, kept raw.
    pub(crate) unmapped: serde_json::Map<String, serde_json::Value>,
    /// Errors from the last validation pass.
    pub(crate) errors: Vec<ValidationError>,
}

impl EntityAspect {
    pub(crate) fn new(ty: &StructuralType, values: StructuralValues, state: EntityState) -> Self {
        let key = compute_key(ty, &values);
        let navs = ty
            .navigation_properties
            .iter()
            .map(|nav| {
                if nav.is_scalar {
                    NavSlot::Scalar(EntityRef::null())
                } else {
                    NavSlot::Collection(Vec::new())
                }
            })
            .collect();
        Self {
            eref: EntityRef::null(),
            state,
            version: EntityVersion::Current,
            pre_edit_state: None,
            key,
            values,
            navs,
            unmapped: serde_json::Map::new(),
            errors: Vec::new(),
        }
    }

    /// Recomputes the cached key from current values.
    pub(crate) fn recompute_key(&mut self, ty: &StructuralType) {
        self.key = compute_key(ty, &self.values);
    }

    pub(crate) fn backup_policy(&self) -> BackupPolicy {
        BackupPolicy {
            // Added entities have no server state to restore.
            record_original: !matches!(self.state, EntityState::Added),
            record_proposed: self.version == EntityVersion::Proposed,
        }
    }
}

/// Builds the identity key of a record from its key-property values.
///
/// Key properties are always scalar; a complex slot in key position reads
/// as nil, which leaves the key incomplete.
pub(crate) fn compute_key(ty: &StructuralType, values: &StructuralValues) -> EntityKey {
    let parts = ty
        .key_properties()
        .iter()
        .map(|prop| match values.slot(*prop) {
            PropertySlot::Scalar(v) => v.clone(),
            PropertySlot::Complex(_) => Value::Nil,
        })
        .collect();
    EntityKey::new(ty.id, parts)
}

/// An entity value no cache owns.
///
/// This is how new entities exist before [`crate::EntityCache::attach`]
/// and what detaching hands back. Writes are raw: no backups, no state
/// transitions, no relation fixup.
#[derive(Clone, Debug)]
pub struct DetachedEntity {
    type_id: TypeId,
    values: StructuralValues,
    unmapped: serde_json::Map<String, serde_json::Value>,
}

impl DetachedEntity {
    /// Creates a fresh instance of the named entity type.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is unknown or ambiguous, the type is
    /// complex, abstract, or not fully resolved.
    pub fn new(store: &MetadataStore, type_name: &str) -> Result<Self> {
        let ty = store
            .get_type(type_name)
            .ok_or_else(|| Error::unknown_type(type_name))?;
        Self::of(store, ty.id)
    }

    /// Creates a fresh instance of the entity type with the given id.
    ///
    /// # Errors
    ///
    /// Same conditions as [`DetachedEntity::new`].
    pub fn of(store: &MetadataStore, type_id: TypeId) -> Result<Self> {
        let ty = store
            .get(type_id)
            .ok_or_else(|| Error::unknown_type(format!("type #{}", type_id.index())))?;
        if matches!(ty.kind, TypeKind::Complex) {
            return Err(Error::wrong_entity_type(
                "an entity type",
                format!("complex type {}", ty.full_name),
            ));
        }
        if ty.is_abstract {
            return Err(Error::metadata(format!(
                "cannot instantiate abstract type {}",
                ty.full_name
            )));
        }
        Ok(Self {
            type_id,
            values: StructuralValues::for_type(store, type_id)?,
            unmapped: serde_json::Map::new(),
        })
    }

    /// The entity type of this value.
    #[must_use]
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Sets a top-level scalar property by name.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown or complex properties, or a value the
    /// declared type cannot hold.
    pub fn set(
        &mut self,
        store: &MetadataStore,
        name: &str,
        value: impl Into<Value>,
    ) -> Result<()> {
        let ty = &store[self.type_id];
        let (prop, def) = ty
            .data_prop(name)
            .ok_or_else(|| Error::unknown_property(ty.full_name.to_string(), name))?;
        let def = def.clone();
        self.values
            .set_scalar(&def, prop, value.into(), BackupPolicy::RAW)?;
        Ok(())
    }

    /// Sets a scalar property by id.
    ///
    /// # Errors
    ///
    /// Returns an error for complex properties or non-conforming values.
    pub fn set_value(&mut self, store: &MetadataStore, prop: PropId, value: Value) -> Result<()> {
        let def = store[self.type_id].data(prop).clone();
        self.values.set_scalar(&def, prop, value, BackupPolicy::RAW)?;
        Ok(())
    }

    /// Sets a scalar at a path of property ids, descending through
    /// complex members.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid paths or non-conforming values.
    pub fn set_at(&mut self, store: &MetadataStore, path: &[PropId], value: Value) -> Result<()> {
        self.values
            .set_at_path(store, path, value, BackupPolicy::RAW)?;
        Ok(())
    }

    /// Reads a top-level scalar property by name.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown or complex properties.
    pub fn get(&self, store: &MetadataStore, name: &str) -> Result<Value> {
        let ty = &store[self.type_id];
        let (prop, _) = ty
            .data_prop(name)
            .ok_or_else(|| Error::unknown_property(ty.full_name.to_string(), name))?;
        self.values.scalar(ty, prop).cloned()
    }

    /// Keeps a wire property that has no metadata counterpart.
    pub fn set_unmapped(&mut self, name: impl Into<String>, value: serde_json::Value) {
        self.unmapped.insert(name.into(), value);
    }

    /// The identity key this value would attach under.
    #[must_use]
    pub fn key(&self, store: &MetadataStore) -> EntityKey {
        compute_key(&store[self.type_id], &self.values)
    }

    pub(crate) fn into_parts(
        self,
    ) -> (
        TypeId,
        StructuralValues,
        serde_json::Map<String, serde_json::Value>,
    ) {
        (self.type_id, self.values, self.unmapped)
    }

    pub(crate) fn from_parts(
        type_id: TypeId,
        values: StructuralValues,
        unmapped: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        Self {
            type_id,
            values,
            unmapped,
        }
    }
}
