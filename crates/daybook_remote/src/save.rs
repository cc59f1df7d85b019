//! Save orchestration: bundle pending changes, ship them through an
//! adapter, and reconcile the cache with the outcome.
//!
//! The adapter owns the wire. This module owns everything around it:
//! which entities go, whether they are fit to go, and how the server's
//! verdict lands back in the cache. Nothing in the cache moves until
//! the adapter has answered successfully, so a failed save leaves every
//! pending change pending.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use daybook_cache::EntityCache;
use daybook_foundation::{
    DataType, EntityRef, EntityState, Error, MergeStrategy, Result, TypeId,
};
use daybook_metadata::{MetadataStore, NamingConvention};

use crate::merge::{MergeContext, payload_key};
use crate::service::relock;

/// Everything the server needs to persist one wave of changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveBundle {
    /// The changed entities, in cache change order.
    pub entities: Vec<SaveEntity>,
}

/// One changed entity as the adapter sees it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveEntity {
    /// Full structural type name.
    pub type_name: String,
    /// The pending lifecycle state: `Added`, `Modified`, or `Deleted`.
    pub state: EntityState,
    /// Current values keyed by server-side property names, nested
    /// complex members as objects, unmapped properties included raw.
    pub values: serde_json::Map<String, serde_json::Value>,
    /// Pre-change backups keyed by dotted server-side paths, for
    /// servers doing optimistic concurrency checks.
    pub original_values: serde_json::Map<String, serde_json::Value>,
    /// True when the key still holds client-issued placeholder values
    /// the server must replace.
    pub has_temp_key: bool,
}

/// What came back from a successful save.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveResult {
    /// Server-side renditions of the saved entities, same payload shape
    /// as a query response element.
    pub saved: Vec<SavedEntity>,
    /// Placeholder keys and the real keys that replaced them.
    pub key_mappings: Vec<KeyMapping>,
}

/// A saved entity as echoed by the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedEntity {
    /// Full structural type name.
    pub type_name: String,
    /// Values keyed by server-side property names, real keys included.
    pub values: serde_json::Map<String, serde_json::Value>,
}

/// One placeholder key the store replaced.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyMapping {
    /// Full structural type name of the keyed entity.
    pub type_name: String,
    /// The placeholder the client sent.
    pub temp_value: serde_json::Value,
    /// The key the store assigned.
    pub real_value: serde_json::Value,
}

/// The persistence boundary a save goes through.
#[async_trait]
pub trait SaveAdapter: Send + Sync {
    /// Persists the bundle, returning the server's echo and any key
    /// replacements.
    ///
    /// # Errors
    ///
    /// Returns an error when persistence fails; the caller will leave
    /// the cache untouched.
    async fn save(&self, bundle: SaveBundle) -> Result<SaveResult>;
}

/// Tuning knobs for [`save_changes`].
#[derive(Debug, Clone, Default)]
pub struct SaveOptions {
    entities: Option<Vec<EntityRef>>,
    skip_validation: bool,
}

impl SaveOptions {
    /// Options saving every pending change, validation on.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts the save to an explicit set of entities. References
    /// without pending changes are skipped.
    #[must_use]
    pub fn only(mut self, entities: Vec<EntityRef>) -> Self {
        self.entities = Some(entities);
        self
    }

    /// Sends entities to the adapter even when validation would fail.
    #[must_use]
    pub fn without_validation(mut self) -> Self {
        self.skip_validation = true;
        self
    }
}

/// What a completed save did.
#[derive(Debug, Default)]
pub struct SaveReport {
    /// The saved entities still attached afterwards. Accepted deletions
    /// detach, so they do not appear here.
    pub saved: Vec<EntityRef>,
    /// The key replacements the server reported, already applied.
    pub key_mappings: Vec<KeyMapping>,
}

/// Saves pending changes through an adapter.
///
/// Collects the changed entities (all of them, or the set picked in
/// `options`), validates the non-deletions, and hands the bundle to the
/// adapter. On success the reported key mappings are applied first, so
/// placeholder keys and every foreign key referencing them take their
/// store-assigned values, then each saved entity's changes are
/// accepted, and finally the server's echoed payloads merge back over
/// the survivors. With nothing to save the adapter is never called.
///
/// # Errors
///
/// Returns an error for stale references in an explicit entity list,
/// validation failures (unless skipped), and adapter failures. Adapter
/// and validation errors leave the cache untouched.
pub async fn save_changes(
    cache: &mut EntityCache,
    adapter: &dyn SaveAdapter,
    options: &SaveOptions,
) -> Result<SaveReport> {
    let pending = pending_entities(cache, options)?;
    if pending.is_empty() {
        tracing::debug!("nothing to save");
        return Ok(SaveReport::default());
    }

    if !options.skip_validation {
        let mut failures = 0;
        for &eref in &pending {
            if cache.state(eref)? != EntityState::Deleted {
                failures += cache.validate_entity(eref)?.len();
            }
        }
        if failures > 0 {
            return Err(Error::validation_failed(failures));
        }
    }

    let naming = cache.metadata().naming_convention();
    let mut entities = Vec::with_capacity(pending.len());
    for &eref in &pending {
        entities.push(save_entity(cache, naming, eref)?);
    }
    tracing::debug!(entities = entities.len(), "saving");
    let result = adapter.save(SaveBundle { entities }).await?;

    let saved = cache.with_load_scope(|cache| {
        for mapping in &result.key_mappings {
            let (type_id, data_type) = mapping_target(cache.metadata(), mapping)?;
            let temp = data_type.coerce_json(&mapping.temp_value)?;
            let real = data_type.coerce_json(&mapping.real_value)?;
            cache.apply_key_mapping(type_id, &temp, &real)?;
        }

        let mut saved = Vec::with_capacity(pending.len());
        for &eref in &pending {
            let deleted = cache.state(eref)? == EntityState::Deleted;
            cache.accept_changes(eref)?;
            if !deleted {
                saved.push(eref);
            }
        }

        // The echo carries real keys and server-computed columns. Skip
        // entities no longer cached, such as accepted deletions.
        let mut echoes = Vec::with_capacity(result.saved.len());
        for entity in &result.saved {
            let type_id = cache
                .metadata()
                .get_type(&entity.type_name)
                .map(|ty| ty.id)
                .ok_or_else(|| Error::unknown_type(entity.type_name.clone()))?;
            let key = payload_key(cache.metadata(), naming, type_id, &entity.values)?;
            if cache.find(&key).is_none() {
                tracing::trace!(%key, "save echo for an entity no longer cached");
                continue;
            }
            echoes.push((type_id, serde_json::Value::Object(entity.values.clone())));
        }
        let mut ctx = MergeContext::new(cache, MergeStrategy::OverwriteChanges);
        for (type_id, payload) in &echoes {
            ctx.merge(payload, *type_id)?;
        }
        Ok(saved)
    })?;

    Ok(SaveReport {
        saved,
        key_mappings: result.key_mappings,
    })
}

fn pending_entities(cache: &EntityCache, options: &SaveOptions) -> Result<Vec<EntityRef>> {
    let Some(list) = &options.entities else {
        return Ok(cache.changes());
    };
    let mut pending = Vec::with_capacity(list.len());
    for &eref in list {
        if pending.contains(&eref) {
            continue;
        }
        if cache.state(eref)?.has_changes() {
            pending.push(eref);
        } else {
            tracing::trace!(entity = %eref, "unchanged entity skipped from save");
        }
    }
    Ok(pending)
}

fn save_entity(
    cache: &EntityCache,
    naming: NamingConvention,
    eref: EntityRef,
) -> Result<SaveEntity> {
    let state = cache.state(eref)?;
    let mut values = server_named(naming, cache.values_json(eref)?);
    for (name, raw) in cache.unmapped(eref)? {
        values.insert(naming.to_server(name), raw.clone());
    }
    let mut original_values = serde_json::Map::new();
    for (path, value) in cache.original_values_json(eref)? {
        original_values.insert(server_named_path(naming, &path), value);
    }
    let key = cache.key(eref)?;
    let has_temp_key = state == EntityState::Added
        && key
            .values()
            .iter()
            .any(|v| cache.key_generator().is_temporary(v));
    Ok(SaveEntity {
        type_name: cache.metadata()[eref.type_id].full_name.to_string(),
        state,
        values,
        original_values,
        has_temp_key,
    })
}

/// Renames a client-named value tree to server-side names. Values are
/// scalars or nested complex objects, so every object level renames.
fn server_named(
    naming: NamingConvention,
    map: serde_json::Map<String, serde_json::Value>,
) -> serde_json::Map<String, serde_json::Value> {
    map.into_iter()
        .map(|(name, value)| {
            let value = match value {
                serde_json::Value::Object(inner) => {
                    serde_json::Value::Object(server_named(naming, inner))
                }
                other => other,
            };
            (naming.to_server(&name), value)
        })
        .collect()
}

fn server_named_path(naming: NamingConvention, path: &str) -> String {
    path.split('.')
        .map(|part| naming.to_server(part))
        .collect::<Vec<_>>()
        .join(".")
}

fn mapping_target(store: &MetadataStore, mapping: &KeyMapping) -> Result<(TypeId, DataType)> {
    let ty = store
        .get_type(&mapping.type_name)
        .ok_or_else(|| Error::unknown_type(mapping.type_name.clone()))?;
    let &[prop] = ty.key_properties() else {
        return Err(Error::key_generation(format!(
            "type {} cannot remap a composite key",
            mapping.type_name
        )));
    };
    let def = ty.data(prop);
    let data_type = def
        .scalar_type()
        .ok_or_else(|| Error::non_scalar(def.name.to_string()))?;
    Ok((ty.id, data_type))
}

/// A scripted in-memory adapter for tests and local development.
///
/// Results are staged ahead of time and consumed in order; every bundle
/// received is kept for inspection.
#[derive(Debug, Default)]
pub struct InMemorySaveAdapter {
    results: Mutex<VecDeque<std::result::Result<SaveResult, String>>>,
    bundles: Mutex<Vec<SaveBundle>>,
}

impl InMemorySaveAdapter {
    /// Creates an adapter with nothing staged.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues the result for the next save call.
    pub fn stage(&self, result: SaveResult) {
        relock(&self.results).push_back(Ok(result));
    }

    /// Queues a failure for the next save call.
    pub fn stage_error(&self, message: impl Into<String>) {
        relock(&self.results).push_back(Err(message.into()));
    }

    /// Every bundle received so far, in call order.
    #[must_use]
    pub fn bundles(&self) -> Vec<SaveBundle> {
        relock(&self.bundles).clone()
    }
}

#[async_trait]
impl SaveAdapter for InMemorySaveAdapter {
    async fn save(&self, bundle: SaveBundle) -> Result<SaveResult> {
        relock(&self.bundles).push(bundle);
        match relock(&self.results).pop_front() {
            Some(Ok(result)) => Ok(result),
            Some(Err(message)) => Err(Error::service(message)),
            None => Err(Error::service("no save result staged")),
        }
    }
}
