//! Remote access for the Daybook system: queries, saves, and metadata
//! exchange against an async data service.
//!
//! This crate provides:
//! - [`DataServiceApi`] - The async seam to a remote service
//! - [`MetadataFetcher`] - Single-flight metadata download and registration
//! - [`MergeContext`] / [`merge_entity`] - Server payloads merged into a cache
//! - [`Query`] / [`execute_query`] - Resource queries with strategy control
//! - [`SaveAdapter`] / [`save_changes`] - Change bundling and key reconciliation
//! - [`CacheExport`] / [`import_entities`] - Portable cache snapshots

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod exchange;
pub mod fetch;
pub mod merge;
pub mod query;
pub mod save;
pub mod service;


// Re-export main types for convenience
pub use exchange::{CacheExport, ExportedEntity, export_entities, import_entities};
pub use fetch::{METADATA_RESOURCE, MetadataFetcher};
pub use merge::{MergeContext, merge_entity};
pub use query::{Query, QueryResult, execute_query, merge_payload};
pub use save::{
    InMemorySaveAdapter, KeyMapping, SaveAdapter, SaveBundle, SaveEntity, SaveOptions, SaveReport,
    SaveResult, SavedEntity, save_changes,
};
pub use service::{DataServiceApi, InMemoryDataService};
