//! Query execution: fetch a resource, merge the response into the cache.

use daybook_cache::EntityCache;
use daybook_foundation::{EntityRef, Error, MergeStrategy, Result, TypeId};

use crate::merge::MergeContext;
use crate::service::DataServiceApi;

/// A request for the entities behind one resource path.
///
/// The path is passed to the service verbatim, so it may carry whatever
/// query-string options the service understands. The entity type is
/// resolved from the resource name unless set explicitly.
#[derive(Debug, Clone)]
pub struct Query {
    resource: String,
    type_name: Option<String>,
    strategy: MergeStrategy,
}

impl Query {
    /// Creates a query for a resource path.
    #[must_use]
    pub fn from(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            type_name: None,
            strategy: MergeStrategy::default(),
        }
    }

    /// Declares the entity type of the results, overriding the resource
    /// name lookup.
    #[must_use]
    pub fn typed(mut self, type_name: impl Into<String>) -> Self {
        self.type_name = Some(type_name.into());
        self
    }

    /// Sets how results merge over entities already in the cache.
    #[must_use]
    pub fn with_strategy(mut self, strategy: MergeStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// The resource path sent to the data service.
    #[must_use]
    pub fn resource_path(&self) -> &str {
        &self.resource
    }

    /// The merge strategy applied to the results.
    #[must_use]
    pub fn strategy(&self) -> MergeStrategy {
        self.strategy
    }

    /// The resource name used for entity type lookup, which is the path
    /// up to any query string.
    #[must_use]
    pub fn resource_name(&self) -> &str {
        match self.resource.find('?') {
            Some(i) => &self.resource[..i],
            None => &self.resource,
        }
    }

    fn expected_type(&self, cache: &EntityCache) -> Result<TypeId> {
        if let Some(name) = &self.type_name {
            return cache
                .metadata()
                .get_type(name)
                .map(|ty| ty.id)
                .ok_or_else(|| Error::unknown_type(name.clone()));
        }
        cache
            .metadata()
            .type_for_resource(self.resource_name())
            .map(|ty| ty.id)
            .ok_or_else(|| {
                Error::unknown_type(format!(
                    "no entity type registered for resource {}",
                    self.resource_name()
                ))
            })
    }
}

/// What a query produced: the merged entities, in response order, and
/// the server-reported total when the response envelope carried one.
#[derive(Debug)]
pub struct QueryResult {
    pub refs: Vec<EntityRef>,
    pub inline_count: Option<i64>,
}

/// Runs a query against a data service and merges the response.
///
/// The response body may be a bare JSON array, an envelope
/// `{ "results": [...], "inlineCount": n }`, or a single entity object.
/// All elements merge inside one load scope, so change events queue
/// until the whole graph is linked.
///
/// # Errors
///
/// Returns an error when the resource resolves to no entity type, the
/// service call fails, the body is not JSON, or any element fails to
/// merge. A failed element leaves earlier elements merged.
pub async fn execute_query(
    cache: &mut EntityCache,
    service: &dyn DataServiceApi,
    query: &Query,
) -> Result<QueryResult> {
    let expected = query.expected_type(cache)?;
    let body = service.get(query.resource_path()).await?;
    let payload: serde_json::Value = serde_json::from_str(&body)
        .map_err(|err| Error::serialization(format!("query response: {err}")))?;
    let result = merge_payload(cache, &payload, expected, query.strategy())?;
    tracing::debug!(
        resource = query.resource_path(),
        merged = result.refs.len(),
        "query executed"
    );
    Ok(result)
}

/// Merges an already-parsed query payload. Exposed for callers holding
/// a response body from elsewhere, such as offline replays.
///
/// # Errors
///
/// Returns an error for payloads that are neither an array, an
/// envelope, nor an entity object, and for any element that fails to
/// merge.
pub fn merge_payload(
    cache: &mut EntityCache,
    payload: &serde_json::Value,
    expected: TypeId,
    strategy: MergeStrategy,
) -> Result<QueryResult> {
    let (items, inline_count) = match payload {
        serde_json::Value::Array(items) => (items.as_slice(), None),
        serde_json::Value::Object(obj) => match obj.get("results") {
            Some(serde_json::Value::Array(items)) => {
                let count = obj.get("inlineCount").and_then(serde_json::Value::as_i64);
                (items.as_slice(), count)
            }
            Some(_) => {
                return Err(Error::malformed_payload("results must be an array"));
            }
            // A lone entity object counts as a one-element result.
            None => (std::slice::from_ref(payload), None),
        },
        _ => {
            return Err(Error::malformed_payload(
                "expected a result array or envelope",
            ));
        }
    };
    let refs = cache.with_load_scope(|cache| {
        let mut ctx = MergeContext::new(cache, strategy);
        let mut refs = Vec::with_capacity(items.len());
        for item in items {
            refs.push(ctx.merge(item, expected)?);
        }
        Ok(refs)
    })?;
    Ok(QueryResult { refs, inline_count })
}
