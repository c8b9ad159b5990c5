//! Storage engine: directory layout, sidecar codec, crash-safe writer,
//! per-key locks, put journal, and the `StorageService` orchestrating them.

pub mod content_writer;
pub mod journal;
pub mod key_locks;
pub mod layout;
pub mod metadata_codec;
pub mod recovery;
pub mod storage_service;

pub use recovery::RecoveryReport;
pub use storage_service::{
    Listing, StorageError, StorageErrorKind, StorageResult, StorageService,
};
