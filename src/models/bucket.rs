//! Represents a logical bucket, a top-level container for objects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A storage bucket.
///
/// Buckets act as namespaces for objects. The descriptor is persisted as
/// `metadata/<name>.json` next to the bucket's metadata subtree.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Bucket {
    /// Bucket name, unique across the store.
    pub name: String,

    /// When this bucket was first created. Never rewritten by later calls.
    pub created: DateTime<Utc>,
}

impl Bucket {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            created: Utc::now(),
        }
    }
}
