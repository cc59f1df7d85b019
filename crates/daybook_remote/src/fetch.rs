//! Single-flight metadata download and registration.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use daybook_foundation::{Result, TypeId};
use daybook_metadata::{MetadataDocument, MetadataStore};

use crate::service::DataServiceApi;

/// The resource path metadata documents are served under.
pub const METADATA_RESOURCE: &str = "Metadata";

/// Downloads and caches metadata documents, one fetch per service.
///
/// Concurrent callers for the same service share a single in-flight
/// request: the first caller holds the per-service entry across the
/// network await, later callers suspend on it and read the parsed
/// document once it lands. A failed fetch caches nothing, so the next
/// caller tries the service again.
#[derive(Debug, Default)]
pub struct MetadataFetcher {
    entries: Mutex<HashMap<String, Arc<tokio::sync::Mutex<Option<Arc<MetadataDocument>>>>>>,
}

impl MetadataFetcher {
    /// Creates a fetcher with nothing cached.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetches a service's metadata document, reusing the cached parse
    /// when one exists.
    ///
    /// # Errors
    ///
    /// Returns the service error from the request, or a metadata error
    /// when the body does not parse as a document.
    pub async fn fetch(&self, service: &dyn DataServiceApi) -> Result<Arc<MetadataDocument>> {
        let entry = {
            let mut entries = self
                .entries
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            Arc::clone(entries.entry(service.service_name().to_string()).or_default())
        };
        let mut slot = entry.lock().await;
        if let Some(doc) = slot.as_ref() {
            return Ok(Arc::clone(doc));
        }
        tracing::debug!(service = service.service_name(), "fetching metadata");
        let body = service.get(METADATA_RESOURCE).await?;
        let doc = Arc::new(MetadataDocument::parse(&body)?);
        *slot = Some(Arc::clone(&doc));
        tracing::debug!(
            service = service.service_name(),
            types = doc.structural_types.len(),
            "metadata cached"
        );
        Ok(doc)
    }

    /// Fetches a service's metadata and registers every type in the
    /// store, returning the ids of the types realized by this call.
    /// Types the store already knows are skipped.
    ///
    /// # Errors
    ///
    /// Same conditions as [`MetadataFetcher::fetch`], plus the first
    /// registration error.
    pub async fn fetch_into(
        &self,
        store: &mut MetadataStore,
        service: &dyn DataServiceApi,
    ) -> Result<Vec<TypeId>> {
        let doc = self.fetch(service).await?;
        store.add_document(&doc)
    }

    /// The cached document for a service, if a fetch has completed and
    /// none is currently in flight.
    #[must_use]
    pub fn cached(&self, service_name: &str) -> Option<Arc<MetadataDocument>> {
        let entries = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let entry = entries.get(service_name)?;
        entry.try_lock().ok().and_then(|slot| slot.clone())
    }
}
