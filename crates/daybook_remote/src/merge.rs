//! Turns server JSON payloads into entity-graph mutations.
//!
//! A payload element is an object describing one entity: data properties
//! keyed by server-side names, navigation properties holding nested
//! objects or arrays, and the `$type` / `$id` / `$ref` protocol markers.
//! Merging resolves each object to a tracked entity by key, then applies
//! values and relationship expansions according to the cache's merge
//! disposition, so local pending changes survive exactly when the
//! strategy says they should.
//!
//! `$ref` resolution is single-pass: the `$id` it points at must appear
//! earlier in the same document. A reference to an unseen id is an
//! error, not a deferred fixup.

use std::collections::HashMap;

use daybook_cache::{DetachedEntity, EntityCache, MergeDisposition};
use daybook_foundation::{
    EntityKey, EntityRef, EntityState, Error, MergeStrategy, NavId, PropId, Result, TypeId, Value,
};
use daybook_metadata::{MetadataStore, NamingConvention};

/// Merges the entity objects of one response document into a cache.
///
/// The context carries the `$id` registry, so every element of a
/// multi-entity document shares it. Run the whole document through one
/// context inside one load scope; [`merge_entity`] does this for a
/// single standalone payload.
pub struct MergeContext<'a> {
    cache: &'a mut EntityCache,
    strategy: MergeStrategy,
    refs: HashMap<String, EntityRef>,
}

/// Payload fields sorted by what merging does with them.
pub(crate) struct FieldPlan<'j> {
    /// Scalar writes, complex members flattened to property paths.
    pub(crate) scalars: Vec<(Vec<PropId>, Value)>,
    /// Wire properties with no metadata counterpart, client-named.
    pub(crate) unmapped: Vec<(String, &'j serde_json::Value)>,
    /// Navigation properties present in the payload.
    pub(crate) expansions: Vec<NavPlan<'j>>,
}

pub(crate) struct NavPlan<'j> {
    nav: NavId,
    declared: TypeId,
    is_scalar: bool,
    /// This side's foreign key columns, with their key-membership flag.
    fk_cols: Vec<(PropId, bool)>,
    /// Whether any foreign key exists on either side of the association.
    association_has_fks: bool,
    json: &'j serde_json::Value,
}

impl<'a> MergeContext<'a> {
    /// Creates a context merging under the given strategy.
    pub fn new(cache: &'a mut EntityCache, strategy: MergeStrategy) -> Self {
        Self {
            cache,
            strategy,
            refs: HashMap::new(),
        }
    }

    /// Merges one entity payload, returning the entity it resolved to.
    ///
    /// # Errors
    ///
    /// Returns an error for payloads that are not objects, a `$ref` to an
    /// id this context has not seen, an unknown or incompatible `$type`,
    /// values the declared types cannot hold, or a merge the strategy
    /// disallows.
    pub fn merge(&mut self, json: &serde_json::Value, expected: TypeId) -> Result<EntityRef> {
        let serde_json::Value::Object(obj) = json else {
            return Err(Error::malformed_payload("expected an entity object"));
        };
        if let Some(raw) = obj.get("$ref") {
            let id = ref_id(raw)?;
            return self
                .refs
                .get(&id)
                .copied()
                .ok_or_else(|| Error::unresolved_ref(id));
        }
        self.merge_object(obj, expected)
    }

    fn merge_object(
        &mut self,
        obj: &serde_json::Map<String, serde_json::Value>,
        expected: TypeId,
    ) -> Result<EntityRef> {
        let naming = self.cache.metadata().naming_convention();
        let type_id = resolve_type(self.cache.metadata(), obj, expected)?;
        let key = payload_key(self.cache.metadata(), naming, type_id, obj)?;
        let plan = plan_fields(self.cache.metadata(), naming, type_id, obj)?;
        let disposition = self.cache.merge_disposition(&key, self.strategy)?;
        tracing::trace!(%key, ?disposition, "merge");

        let (eref, writable) = match disposition {
            MergeDisposition::Attach => (self.attach_new(type_id, &plan)?, true),
            MergeDisposition::Update { target } => {
                if self.cache.state(target)? == EntityState::Deleted {
                    // Overwriting discards the local deletion before the
                    // incoming values land.
                    self.cache.reject_changes(target)?;
                }
                self.load_into(target, &plan)?;
                self.cache.reset_to_unchanged(target)?;
                (target, true)
            }
            MergeDisposition::RelationsOnly { target } => (target, false),
            MergeDisposition::Skip { target } => {
                if let Some(raw) = obj.get("$id") {
                    self.refs.insert(ref_id(raw)?, target);
                }
                return Ok(target);
            }
        };
        if let Some(raw) = obj.get("$id") {
            self.refs.insert(ref_id(raw)?, eref);
        }

        let mut resync = matches!(disposition, MergeDisposition::Update { .. });
        for expansion in &plan.expansions {
            resync |= self.merge_expansion(eref, expansion, writable)?;
        }
        if writable && resync {
            self.cache.resync_links(eref)?;
        }
        Ok(eref)
    }

    fn attach_new(&mut self, type_id: TypeId, plan: &FieldPlan<'_>) -> Result<EntityRef> {
        let mut entity = DetachedEntity::of(self.cache.metadata(), type_id)?;
        for (path, value) in &plan.scalars {
            entity.set_at(self.cache.metadata(), path, value.clone())?;
        }
        for (name, raw) in &plan.unmapped {
            entity.set_unmapped(name.clone(), (*raw).clone());
        }
        self.cache.attach_queried(entity)
    }

    fn load_into(&mut self, target: EntityRef, plan: &FieldPlan<'_>) -> Result<()> {
        for (path, value) in &plan.scalars {
            self.cache.load_value_path(target, path, value.clone())?;
        }
        for (name, raw) in &plan.unmapped {
            self.cache.set_unmapped(target, name.clone(), (*raw).clone())?;
        }
        Ok(())
    }

    /// Merges one navigation expansion. Returns true when it wrote a
    /// foreign key column, which obliges the caller to resync.
    fn merge_expansion(
        &mut self,
        owner: EntityRef,
        expansion: &NavPlan<'_>,
        writable: bool,
    ) -> Result<bool> {
        if expansion.is_scalar {
            if expansion.json.is_null() {
                // A null expansion means "not sent", never "unlink".
                return Ok(false);
            }
            let child = self.merge(expansion.json, expansion.declared)?;
            if !writable {
                return Ok(false);
            }
            if expansion.fk_cols.is_empty() {
                self.cache.set_nav(owner, expansion.nav, Some(child))?;
                return Ok(false);
            }
            // The nesting implies the link even when the payload omits
            // the foreign key columns; derive them from the target key.
            let parts = self.cache.key(child)?.values().to_vec();
            let mut wrote = false;
            for (&(col, part_of_key), part) in expansion.fk_cols.iter().zip(parts) {
                if part_of_key {
                    continue;
                }
                self.cache.load_value(owner, col, part)?;
                wrote = true;
            }
            Ok(wrote)
        } else {
            let serde_json::Value::Array(items) = expansion.json else {
                if expansion.json.is_null() {
                    return Ok(false);
                }
                return Err(Error::malformed_payload(
                    "expected an array for a collection navigation",
                ));
            };
            for item in items {
                let child = self.merge(item, expansion.declared)?;
                // Purely associative collections have no foreign keys
                // for membership to resolve through; link directly.
                if writable && !expansion.association_has_fks {
                    self.cache.add_to_nav(owner, expansion.nav, child)?;
                }
            }
            Ok(false)
        }
    }
}

/// Merges one standalone entity payload inside its own load scope.
///
/// # Errors
///
/// Returns an error for an unknown type name or any condition of
/// [`MergeContext::merge`].
pub fn merge_entity(
    cache: &mut EntityCache,
    json: &serde_json::Value,
    type_name: &str,
    strategy: MergeStrategy,
) -> Result<EntityRef> {
    let expected = cache
        .metadata()
        .get_type(type_name)
        .ok_or_else(|| Error::unknown_type(type_name))?
        .id;
    cache.with_load_scope(|cache| MergeContext::new(cache, strategy).merge(json, expected))
}

/// Resolves the concrete entity type of a payload object.
fn resolve_type(
    store: &MetadataStore,
    obj: &serde_json::Map<String, serde_json::Value>,
    expected: TypeId,
) -> Result<TypeId> {
    let Some(raw) = obj.get("$type") else {
        return Ok(expected);
    };
    let Some(name) = raw.as_str() else {
        return Err(Error::malformed_payload("$type must be a string"));
    };
    // Discriminators arrive as "Namespace.Type, Assembly"; only the
    // type part matters here.
    let type_part = name.split(',').next().unwrap_or(name).trim();
    let ty = store
        .get_type(type_part)
        .ok_or_else(|| Error::unknown_type(type_part))?;
    if !store.is_assignable(expected, ty.id) {
        return Err(Error::wrong_entity_type(
            store[expected].full_name.to_string(),
            ty.full_name.to_string(),
        ));
    }
    Ok(ty.id)
}

/// Builds the identity key a payload object claims, coercing each part
/// through the declared key property type. Key properties the payload
/// omits fall back to their initial value.
pub(crate) fn payload_key(
    store: &MetadataStore,
    naming: NamingConvention,
    type_id: TypeId,
    obj: &serde_json::Map<String, serde_json::Value>,
) -> Result<EntityKey> {
    let ty = &store[type_id];
    let mut parts = Vec::new();
    for prop in ty.key_properties().iter().copied() {
        let def = ty.data(prop);
        let data_type = def
            .scalar_type()
            .ok_or_else(|| Error::non_scalar(def.name.to_string()))?;
        let wire = naming.to_server(&def.name);
        let value = match obj.get(&wire) {
            Some(raw) => data_type.coerce_json(raw)?,
            None => def.initial_value(),
        };
        parts.push(value);
    }
    Ok(EntityKey::new(type_id, parts))
}

pub(crate) fn plan_fields<'j>(
    store: &MetadataStore,
    naming: NamingConvention,
    type_id: TypeId,
    obj: &'j serde_json::Map<String, serde_json::Value>,
) -> Result<FieldPlan<'j>> {
    let ty = &store[type_id];
    let mut plan = FieldPlan {
        scalars: Vec::new(),
        unmapped: Vec::new(),
        expansions: Vec::new(),
    };
    for (wire_name, raw) in obj {
        if wire_name.starts_with('$') {
            continue;
        }
        let client = naming.to_client(wire_name);
        if let Some((prop, def)) = ty.data_prop(&client) {
            if let Some(data_type) = def.scalar_type() {
                plan.scalars.push((vec![prop], data_type.coerce_json(raw)?));
            } else if let Some(nested) = def.complex_type() {
                match raw {
                    serde_json::Value::Null => {}
                    serde_json::Value::Object(members) => {
                        plan_complex(store, naming, nested, members, &[prop], &mut plan.scalars)?;
                    }
                    _ => {
                        return Err(Error::malformed_payload(format!(
                            "expected an object for complex property {client}"
                        )));
                    }
                }
            } else {
                return Err(Error::unresolved_type(def.name.to_string()));
            }
        } else if let Some((nav, nd)) = ty.nav_prop(&client) {
            let declared = nd
                .target
                .ok_or_else(|| Error::unresolved_type(nd.name.to_string()))?;
            let fk_cols = nd
                .foreign_keys
                .iter()
                .map(|c| (*c, ty.data(*c).part_of_key))
                .collect();
            let inverse_fks = nd.inverse.is_some_and(|inv| {
                let ind = store[declared].nav(inv);
                !ind.foreign_keys.is_empty() || !ind.inv_foreign_keys.is_empty()
            });
            plan.expansions.push(NavPlan {
                nav,
                declared,
                is_scalar: nd.is_scalar,
                fk_cols,
                association_has_fks: !nd.foreign_keys.is_empty()
                    || !nd.inv_foreign_keys.is_empty()
                    || inverse_fks,
                json: raw,
            });
        } else {
            plan.unmapped.push((client, raw));
        }
    }
    Ok(plan)
}

fn plan_complex(
    store: &MetadataStore,
    naming: NamingConvention,
    type_id: TypeId,
    obj: &serde_json::Map<String, serde_json::Value>,
    prefix: &[PropId],
    out: &mut Vec<(Vec<PropId>, Value)>,
) -> Result<()> {
    let ty = &store[type_id];
    for (wire_name, raw) in obj {
        if wire_name.starts_with('$') {
            continue;
        }
        let client = naming.to_client(wire_name);
        let Some((prop, def)) = ty.data_prop(&client) else {
            tracing::trace!(member = %client, "unmatched complex member dropped");
            continue;
        };
        let mut path = prefix.to_vec();
        path.push(prop);
        if let Some(data_type) = def.scalar_type() {
            out.push((path, data_type.coerce_json(raw)?));
        } else if let Some(nested) = def.complex_type() {
            match raw {
                serde_json::Value::Null => {}
                serde_json::Value::Object(members) => {
                    plan_complex(store, naming, nested, members, &path, out)?;
                }
                _ => {
                    return Err(Error::malformed_payload(format!(
                        "expected an object for complex property {client}"
                    )));
                }
            }
        } else {
            return Err(Error::unresolved_type(def.name.to_string()));
        }
    }
    Ok(())
}

fn ref_id(raw: &serde_json::Value) -> Result<String> {
    match raw {
        serde_json::Value::String(s) => Ok(s.clone()),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        _ => Err(Error::malformed_payload(
            "$id and $ref must be strings or numbers",
        )),
    }
}
