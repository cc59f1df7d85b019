//! Integration tests for Layer 3: Remote access
//!
//! Metadata bootstrap, query execution, payload merging, and save
//! round trips against a scripted data service.

mod support;

mod merging;
mod saves;
