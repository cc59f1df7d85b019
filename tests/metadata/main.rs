//! Integration tests for Layer 1: Metadata
//!
//! Structural type resolution, forward references, inheritance, and the
//! persisted document format.

mod documents;
mod resolution;
