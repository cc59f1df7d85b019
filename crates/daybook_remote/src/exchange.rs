//! Cache exchange: serialize attached entities to a JSON document and
//! rebuild them in another cache.
//!
//! An export is a client-side snapshot, not a server payload: property
//! names are client names, pending states and pre-change backups are
//! kept, and placeholder keys are flagged so an importing cache can
//! fence its own generator off them. Importing reconstructs each entity
//! exactly as it was: an imported `Modified` entity can still reject
//! back to its original values, and an imported `Added` entity still
//! awaits a real key from its next save.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use daybook_cache::{DetachedEntity, EntityCache, MergeDisposition};
use daybook_foundation::{
    EntityRef, EntityState, Error, MergeStrategy, PropId, Result, TypeId, Value,
};
use daybook_metadata::{MetadataDocument, MetadataStore, NamingConvention};

use crate::merge::{payload_key, plan_fields};

/// A portable snapshot of attached entities.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheExport {
    /// The full metadata document of the exporting cache, so a fresh
    /// cache can be built to receive the entities.
    pub metadata: MetadataDocument,
    /// Exported entities grouped by full type name.
    pub groups: BTreeMap<String, Vec<ExportedEntity>>,
}

/// One entity as exported: enough to rebuild value record, backups,
/// and lifecycle state.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedEntity {
    /// Lifecycle state at export time.
    pub state: EntityState,
    /// Current values keyed by client property names, complex members
    /// nested as objects.
    pub values: serde_json::Map<String, serde_json::Value>,
    /// Pre-change backups keyed by dotted client property paths.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub original_values: serde_json::Map<String, serde_json::Value>,
    /// Retained wire properties with no metadata counterpart.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub unmapped: serde_json::Map<String, serde_json::Value>,
    /// True when the key holds generator placeholders.
    #[serde(default)]
    pub has_temp_key: bool,
}

impl CacheExport {
    /// Parses an export from JSON text.
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the text is not a valid export.
    pub fn parse(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::serialization(e.to_string()))
    }

    /// Renders this export as JSON text.
    ///
    /// # Errors
    ///
    /// Returns a serialization error if rendering fails.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::serialization(e.to_string()))
    }

    /// Total number of exported entities.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }
}

/// Exports entities to a portable document.
///
/// With `refs` of `None` every attached entity goes, deletions
/// included; otherwise exactly the picked entities go, duplicates
/// collapsed.
///
/// # Errors
///
/// Returns an error for stale references in an explicit list.
pub fn export_entities(cache: &EntityCache, refs: Option<&[EntityRef]>) -> Result<CacheExport> {
    let chosen: Vec<EntityRef> = match refs {
        Some(list) => {
            let mut out = Vec::with_capacity(list.len());
            for &eref in list {
                cache.state(eref)?;
                if !out.contains(&eref) {
                    out.push(eref);
                }
            }
            out
        }
        None => cache.entities(),
    };
    let mut groups: BTreeMap<String, Vec<ExportedEntity>> = BTreeMap::new();
    for eref in chosen {
        let key = cache.key(eref)?;
        let has_temp_key = key
            .values()
            .iter()
            .any(|v| cache.key_generator().is_temporary(v));
        let entity = ExportedEntity {
            state: cache.state(eref)?,
            values: cache.values_json(eref)?,
            original_values: cache.original_values_json(eref)?,
            unmapped: cache.unmapped(eref)?.clone(),
            has_temp_key,
        };
        let type_name = cache.metadata()[eref.type_id].full_name.to_string();
        groups.entry(type_name).or_default().push(entity);
    }
    tracing::debug!(entities = groups.values().map(Vec::len).sum::<usize>(), "export");
    Ok(CacheExport {
        metadata: cache.metadata().to_document(),
        groups,
    })
}

/// Imports exported entities, honoring the merge strategy.
///
/// Every structural type named by the document must already be
/// registered in the receiving cache; the embedded metadata is there to
/// build one when starting fresh. Imported entities rebuild completely:
/// values, backups, lifecycle state, unmapped properties, and
/// relationships resolved from foreign keys. Placeholder key values are
/// reserved with the receiving cache's key generator first, so entities
/// added later cannot collide with them.
///
/// Under [`MergeStrategy::PreserveChanges`] an already-cached entity
/// with pending changes is left alone; under
/// [`MergeStrategy::OverwriteChanges`] it is replaced wholesale, which
/// invalidates previously held references to it.
///
/// # Errors
///
/// Returns an error for unregistered types, values the metadata cannot
/// hold, or a merge the strategy disallows.
pub fn import_entities(
    cache: &mut EntityCache,
    export: &CacheExport,
    strategy: MergeStrategy,
) -> Result<Vec<EntityRef>> {
    let mut types = Vec::with_capacity(export.groups.len());
    for type_name in export.groups.keys() {
        let type_id = cache
            .metadata()
            .get_type(type_name)
            .map(|ty| ty.id)
            .ok_or_else(|| Error::unknown_type(type_name.clone()))?;
        types.push(type_id);
    }
    cache.with_load_scope(|cache| {
        let mut imported = Vec::new();
        for (type_id, entities) in types.iter().zip(export.groups.values()) {
            for entity in entities {
                if let Some(eref) = import_one(cache, *type_id, entity, strategy)? {
                    imported.push(eref);
                }
            }
        }
        tracing::debug!(entities = imported.len(), "import");
        Ok(imported)
    })
}

fn import_one(
    cache: &mut EntityCache,
    type_id: TypeId,
    entity: &ExportedEntity,
    strategy: MergeStrategy,
) -> Result<Option<EntityRef>> {
    let identity = NamingConvention::Identity;
    let key = payload_key(cache.metadata(), identity, type_id, &entity.values)?;
    match cache.merge_disposition(&key, strategy)? {
        MergeDisposition::Attach => {}
        MergeDisposition::Update { target } => {
            // Imports replace wholesale rather than merging field by
            // field; the old reference goes stale.
            cache.detach(target)?;
        }
        MergeDisposition::RelationsOnly { target } => {
            tracing::trace!(entity = %target, "import skipped, local changes preserved");
            return Ok(None);
        }
        MergeDisposition::Skip { target } => {
            tracing::trace!(entity = %target, "import skipped");
            return Ok(None);
        }
    }

    if entity.has_temp_key {
        for value in key.values() {
            cache.key_generator_mut().reserve(value);
        }
    }

    let plan = plan_fields(cache.metadata(), identity, type_id, &entity.values)?;
    let originals = original_writes(cache.metadata(), type_id, &entity.original_values)?;

    // The detached instance holds pre-change values; the pending edits
    // replay over it after attach so the backups regrow naturally.
    let mut detached = DetachedEntity::of(cache.metadata(), type_id)?;
    for (path, value) in &plan.scalars {
        detached.set_at(cache.metadata(), path, value.clone())?;
    }
    for (path, value) in &originals {
        detached.set_at(cache.metadata(), path, value.clone())?;
    }
    for (name, raw) in &entity.unmapped {
        detached.set_unmapped(name.clone(), raw.clone());
    }

    let eref = if entity.state == EntityState::Added {
        cache.attach(detached)?
    } else {
        cache.attach_imported(detached)?
    };
    for (path, _) in &originals {
        let Some(current) = current_value(&plan.scalars, path) else {
            continue;
        };
        cache.set_value_path(eref, path, current.clone())?;
    }
    match entity.state {
        EntityState::Deleted => cache.delete(eref)?,
        // A tracked edit that wrote the original value back leaves no
        // state transition to replay; force the exported state.
        EntityState::Modified if cache.state(eref)? == EntityState::Unchanged => {
            cache.set_modified(eref)?;
        }
        _ => {}
    }
    Ok(Some(eref))
}

/// Resolves dotted original-value paths to property paths with their
/// coerced values.
fn original_writes(
    store: &MetadataStore,
    type_id: TypeId,
    originals: &serde_json::Map<String, serde_json::Value>,
) -> Result<Vec<(Vec<PropId>, Value)>> {
    let mut out = Vec::with_capacity(originals.len());
    for (dotted, raw) in originals {
        out.push(original_write(store, type_id, dotted, raw)?);
    }
    Ok(out)
}

fn original_write(
    store: &MetadataStore,
    type_id: TypeId,
    dotted: &str,
    raw: &serde_json::Value,
) -> Result<(Vec<PropId>, Value)> {
    let mut ty = &store[type_id];
    let mut path = Vec::new();
    let mut segments = dotted.split('.').peekable();
    while let Some(segment) = segments.next() {
        let Some((prop, def)) = ty.data_prop(segment) else {
            return Err(Error::unknown_property(ty.full_name.to_string(), segment));
        };
        path.push(prop);
        if segments.peek().is_some() {
            let nested = def
                .complex_type()
                .ok_or_else(|| Error::non_scalar(def.name.to_string()))?;
            ty = &store[nested];
        } else {
            let data_type = def
                .scalar_type()
                .ok_or_else(|| Error::non_scalar(def.name.to_string()))?;
            return Ok((path, data_type.coerce_json(raw)?));
        }
    }
    Err(Error::malformed_payload("empty original value path"))
}

fn current_value<'a>(scalars: &'a [(Vec<PropId>, Value)], path: &[PropId]) -> Option<&'a Value> {
    scalars
        .iter()
        .find(|(candidate, _)| candidate == path)
        .map(|(_, value)| value)
}
