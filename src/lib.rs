//! Filesystem-backed object store.
//!
//! Named buckets hold keyed binary objects, addressed as `bucket/key`. The
//! storage engine ([`services::StorageService`]) keeps payload bytes and JSON
//! sidecar records in two parallel directory trees with crash-safe writes and
//! MD5 content checksums. The HTTP layer ([`routes`], [`handlers`]) and the
//! command-line client ([`cli`]) are thin translators around it.

pub mod cli;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
