//! Directory layout for the two-tree store.
//!
//! ```text
//! <root>/data/<bucket>/<key>               raw payload bytes
//! <root>/metadata/<bucket>.json            bucket descriptor
//! <root>/metadata/<bucket>/<key>.json      object descriptor
//! <root>/journal/<uuid>.json               pending-put markers
//! ```
//!
//! Keys are split on `/` and pushed segment by segment, so a nested key maps
//! to nested directories in both trees.

use super::storage_service::{StorageError, StorageResult};
use std::path::{Component, Path, PathBuf};
use uuid::Uuid;

/// Prefix of every temporary file the engine creates. Files carrying it are
/// never listed and are swept by recovery.
pub const TEMP_PREFIX: &str = ".tmp-";

const RECORD_EXT: &str = ".json";
const MAX_OBJECT_KEY_LEN: usize = 1024;
const MAX_BUCKET_NAME_LEN: usize = 63;

#[derive(Clone, Debug)]
pub struct StorageLayout {
    root: PathBuf,
    data_dir: PathBuf,
    metadata_dir: PathBuf,
    journal_dir: PathBuf,
}

impl StorageLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            data_dir: root.join("data"),
            metadata_dir: root.join("metadata"),
            journal_dir: root.join("journal"),
            root,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn metadata_dir(&self) -> &Path {
        &self.metadata_dir
    }

    pub fn journal_dir(&self) -> &Path {
        &self.journal_dir
    }

    /// Payload directory of a bucket. Does not check for existence.
    pub fn bucket_root(&self, bucket: &str) -> PathBuf {
        self.data_dir.join(bucket)
    }

    /// Metadata subtree holding the bucket's object records.
    pub fn bucket_metadata_root(&self, bucket: &str) -> PathBuf {
        self.metadata_dir.join(bucket)
    }

    pub fn bucket_record_path(&self, bucket: &str) -> PathBuf {
        self.metadata_dir.join(format!("{bucket}{RECORD_EXT}"))
    }

    /// Construct a fully-qualified payload path. Parent directories may not
    /// exist yet.
    pub fn object_path(&self, bucket: &str, key: &str) -> PathBuf {
        let mut path = self.bucket_root(bucket);
        push_key(&mut path, key);
        path
    }

    pub fn object_record_path(&self, bucket: &str, key: &str) -> PathBuf {
        let mut path = self.bucket_metadata_root(bucket);
        push_key(&mut path, &format!("{key}{RECORD_EXT}"));
        path
    }

    pub fn journal_entry_path(&self, id: Uuid) -> PathBuf {
        self.journal_dir.join(format!("{id}{RECORD_EXT}"))
    }
}

fn push_key(path: &mut PathBuf, key: &str) {
    for segment in key.split('/') {
        path.push(segment);
    }
}

/// Rebuild an object key from a payload path relative to its bucket root.
///
/// Returns `None` for anything that is not a plain sequence of UTF-8 names.
pub fn key_from_relative(relative: &Path) -> Option<String> {
    let mut segments = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(name) => segments.push(name.to_str()?),
            _ => return None,
        }
    }
    if segments.is_empty() {
        return None;
    }
    Some(segments.join("/"))
}

pub fn is_temp_name(name: &str) -> bool {
    name.starts_with(TEMP_PREFIX)
}

/// Validate a bucket name before it is used as a directory name.
pub fn ensure_bucket_name_safe(name: &str) -> StorageResult<()> {
    let invalid = |reason: &'static str| {
        Err(StorageError::InvalidBucketName {
            name: name.to_string(),
            reason,
        })
    };

    if name.is_empty() {
        return invalid("must not be empty");
    }
    if name.len() > MAX_BUCKET_NAME_LEN {
        return invalid("must be at most 63 bytes");
    }
    if name.contains('/') || name.contains('\\') {
        return invalid("must not contain path separators");
    }
    if name.starts_with('.') {
        return invalid("must not start with a dot");
    }
    // `<name>.json` would collide with the record file of bucket `<name>`.
    if name.ends_with(RECORD_EXT) {
        return invalid("must not end with `.json`");
    }
    if name.chars().any(|c| c.is_control()) {
        return invalid("must not contain control characters");
    }
    Ok(())
}

/// Basic key validation to avoid path traversal and clashes with the
/// engine's own temporary files.
pub fn ensure_key_safe(key: &str) -> StorageResult<()> {
    let invalid = |reason: &'static str| {
        Err(StorageError::InvalidObjectKey {
            key: key.to_string(),
            reason,
        })
    };

    if key.is_empty() {
        return invalid("must not be empty");
    }
    if key.len() > MAX_OBJECT_KEY_LEN {
        return invalid("must be at most 1024 bytes");
    }
    if key.starts_with('/') {
        return invalid("must not start with `/`");
    }
    if key.chars().any(|c| c.is_control() || c == '\\') {
        return invalid("must not contain control characters or `\\`");
    }
    for segment in key.split('/') {
        match segment {
            "" => return invalid("must not contain empty segments"),
            "." | ".." => return invalid("must not contain `.` or `..` segments"),
            s if is_temp_name(s) => return invalid("segments must not start with `.tmp-`"),
            _ => {}
        }
    }
    Ok(())
}
