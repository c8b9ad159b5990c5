//! Core data models for the object store.
//!
//! These are the descriptors persisted as JSON sidecar records and returned
//! over the HTTP API. They serialize naturally via `serde`.

pub mod bucket;
pub mod object;
