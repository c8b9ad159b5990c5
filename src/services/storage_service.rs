//! src/services/storage_service.rs
//!
//! StorageService: bucket and object operations over a local directory
//! tree. Payload bytes live under `data/`, JSON sidecar records under
//! `metadata/`, keyed identically by `bucket/key` (see `layout`). Nothing is
//! cached between calls; every operation re-reads what it needs from disk.
//!
//! A put publishes the payload by rename and then writes the record. A crash
//! between those steps leaves a payload with a stale or missing record; the
//! journal marker written before the rename lets `recover` repair it.

use super::{
    content_writer,
    journal::{Journal, JournalTicket, PendingPut},
    key_locks::KeyLocks,
    layout::{self, StorageLayout},
    metadata_codec::{self, CodecError},
};
use crate::models::{
    bucket::Bucket,
    object::{ObjectMetadata, content_type_for},
};
use bytes::Bytes;
use chrono::Utc;
use futures::Stream;
use serde::{Serialize, de::DeserializeOwned};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tokio::fs::{self, File};
use tracing::{debug, error, warn};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("bucket `{0}` not found")]
    BucketNotFound(String),
    #[error("object `{key}` not found in bucket `{bucket}`")]
    ObjectNotFound { bucket: String, key: String },
    #[error("bucket `{name}` invalid: {reason}")]
    InvalidBucketName { name: String, reason: &'static str },
    #[error("object key `{key}` invalid: {reason}")]
    InvalidObjectKey { key: String, reason: &'static str },
    #[error("metadata record for `{bucket}/{key}` is missing")]
    MissingMetadata { bucket: String, key: String },
    #[error("metadata record `{}` is unusable: {source}", .path.display())]
    Metadata {
        path: PathBuf,
        #[source]
        source: CodecError,
    },
    #[error("{op} `{}` failed: {source}", .path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Coarse classification callers map to their own status codes.
///
/// Undecodable or missing records on a single-object read are data
/// corruption and classify as `Io`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageErrorKind {
    NotFound,
    InvalidInput,
    Io,
}

impl StorageError {
    pub fn kind(&self) -> StorageErrorKind {
        match self {
            Self::BucketNotFound(_) | Self::ObjectNotFound { .. } => StorageErrorKind::NotFound,
            Self::InvalidBucketName { .. } | Self::InvalidObjectKey { .. } => {
                StorageErrorKind::InvalidInput
            }
            Self::MissingMetadata { .. } | Self::Metadata { .. } | Self::Io { .. } => {
                StorageErrorKind::Io
            }
        }
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Result of an enumeration. `skipped` counts entries left out because their
/// record was missing or unreadable; each one is also logged at `warn`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listing<T> {
    pub entries: Vec<T>,
    pub skipped: usize,
}

impl<T> Default for Listing<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            skipped: 0,
        }
    }
}

/// StorageService provides the bucket/object lifecycle:
/// - Create bucket (directory plus bucket record)
/// - Put object (staged write, rename, record)
/// - Get / head object (payload handle plus record)
/// - Delete object (payload and record, empty directories pruned)
/// - List buckets and objects (tolerant of corrupt records)
///
/// Operations on the same `bucket/key` are serialized through an in-memory
/// lock table. Cloning is cheap enough to hand one to every request.
#[derive(Clone)]
pub struct StorageService {
    pub(super) layout: StorageLayout,
    pub(super) journal: Journal,
    locks: KeyLocks,
}

impl StorageService {
    /// Open (or initialize) a store rooted at `root`.
    ///
    /// Creates the `data/`, `metadata/` and `journal/` directories. Does not
    /// run recovery; call [`StorageService::recover`] before serving.
    pub async fn open(root: impl Into<PathBuf>) -> StorageResult<Self> {
        let layout = StorageLayout::new(root);
        for dir in [layout.data_dir(), layout.metadata_dir(), layout.journal_dir()] {
            fs::create_dir_all(dir)
                .await
                .map_err(io_error("create directory", dir))?;
        }

        Ok(Self {
            journal: Journal::new(layout.clone()),
            layout,
            locks: KeyLocks::new(),
        })
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    /// Create a bucket and its payload directory.
    ///
    /// First write wins: when a readable record already exists it is returned
    /// unchanged, keeping the original `created` timestamp. A missing or
    /// corrupt record is replaced.
    pub async fn create_bucket(&self, name: &str) -> StorageResult<Bucket> {
        layout::ensure_bucket_name_safe(name)?;
        let _guard = self.locks.lock_bucket(name).await;

        let bucket_root = self.layout.bucket_root(name);
        fs::create_dir_all(&bucket_root)
            .await
            .map_err(io_error("create bucket directory", &bucket_root))?;

        let record_path = self.layout.bucket_record_path(name);
        match load_record::<Bucket>(&record_path).await {
            Ok(Some(existing)) => {
                debug!("bucket {} already exists (created {})", name, existing.created);
                return Ok(existing);
            }
            Ok(None) => {}
            Err(err) => warn!("replacing unreadable record of bucket {}: {}", name, err),
        }

        let bucket = Bucket::new(name);
        store_record(&record_path, &bucket).await?;
        debug!("created bucket {}", name);
        Ok(bucket)
    }

    /// Stream-upload an object.
    ///
    /// - Writes bytes to a temp file next to the destination, computing
    ///   size and MD5 in the same pass.
    /// - Journals the pending record, renames the payload into place, then
    ///   writes the record.
    ///
    /// On any failure before the rename the previous version is untouched.
    /// If the record cannot be written after the rename, the new payload is
    /// withdrawn so the key reads as absent instead of mismatched.
    pub async fn put_object<S>(
        &self,
        bucket: &str,
        key: &str,
        content_type: Option<String>,
        stream: S,
    ) -> StorageResult<ObjectMetadata>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        layout::ensure_bucket_name_safe(bucket)?;
        layout::ensure_key_safe(key)?;
        self.ensure_bucket_exists(bucket).await?;

        let _guard = self.locks.lock_object(bucket, key).await;
        // Directories created below must survive until the record is written.
        let _tree = self.locks.share_tree(bucket).await;

        let file_path = self.layout.object_path(bucket, key);
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            io_error("resolve object directory", &file_path)(io::Error::other(
                "object path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent)
            .await
            .map_err(io_error("create object directory", &parent))?;

        let staged = content_writer::stage_stream(&parent, stream)
            .await
            .map_err(io_error("write payload", &file_path))?;

        let metadata = ObjectMetadata {
            key: key.to_string(),
            size: staged.size(),
            content_type: content_type
                .filter(|ct| !ct.trim().is_empty())
                .unwrap_or_else(|| content_type_for(key).to_string()),
            etag: staged.etag().to_string(),
            last_modified: Utc::now(),
        };

        let ticket = self
            .journal
            .begin(&PendingPut {
                bucket: bucket.to_string(),
                temp_name: staged.temp_name(),
                metadata: metadata.clone(),
            })
            .await
            .map_err(io_error("write journal entry", self.layout.journal_dir()))?;

        if let Err(err) = staged.commit(&file_path).await {
            complete_ticket(ticket).await;
            return Err(io_error("publish payload", &file_path)(err));
        }

        let record_path = self.layout.object_record_path(bucket, key);
        if let Err(err) = store_record(&record_path, &metadata).await {
            error!(
                "record write failed for {}/{}, withdrawing payload: {}",
                bucket, key, err
            );
            self.withdraw(bucket, key, ticket).await;
            return Err(err);
        }

        complete_ticket(ticket).await;
        debug!(
            "stored {}/{} ({} bytes, etag {})",
            bucket, key, metadata.size, metadata.etag
        );
        Ok(metadata)
    }

    /// Fetch an object for reading.
    ///
    /// Returns the record and an open handle. The pair is read under the
    /// key lock, so both come from the same put even if a newer put lands
    /// while the caller is still streaming.
    pub async fn get_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> StorageResult<(ObjectMetadata, File)> {
        layout::ensure_bucket_name_safe(bucket)?;
        layout::ensure_key_safe(key)?;
        let _guard = self.locks.lock_object(bucket, key).await;

        let file_path = self.layout.object_path(bucket, key);
        let file = match File::open(&file_path).await {
            Ok(file) => file,
            Err(err) if is_missing(&err) => return Err(object_not_found(bucket, key)),
            Err(err) => return Err(io_error("open payload", &file_path)(err)),
        };
        let is_file = file
            .metadata()
            .await
            .map_err(io_error("stat payload", &file_path))?
            .is_file();
        if !is_file {
            return Err(object_not_found(bucket, key));
        }

        let metadata = self.load_object_record(bucket, key).await?;
        Ok((metadata, file))
    }

    /// Fetch only object metadata, with the same rules as `get_object`.
    pub async fn head_object(&self, bucket: &str, key: &str) -> StorageResult<ObjectMetadata> {
        layout::ensure_bucket_name_safe(bucket)?;
        layout::ensure_key_safe(key)?;
        let _guard = self.locks.lock_object(bucket, key).await;

        let file_path = self.layout.object_path(bucket, key);
        match fs::metadata(&file_path).await {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => return Err(object_not_found(bucket, key)),
            Err(err) if is_missing(&err) => return Err(object_not_found(bucket, key)),
            Err(err) => return Err(io_error("stat payload", &file_path)(err)),
        }

        self.load_object_record(bucket, key).await
    }

    /// Delete an object's payload and record.
    ///
    /// Idempotent: deleting a key that does not exist succeeds. The payload
    /// goes first, so if removing the record then fails the object is
    /// already invisible and only an orphan record remains. Empty parent
    /// directories are pruned only while no put in the bucket is running.
    pub async fn delete_object(&self, bucket: &str, key: &str) -> StorageResult<()> {
        layout::ensure_bucket_name_safe(bucket)?;
        layout::ensure_key_safe(key)?;
        let _guard = self.locks.lock_object(bucket, key).await;

        let file_path = self.layout.object_path(bucket, key);
        let removed = remove_if_present(&file_path)
            .await
            .map_err(io_error("remove payload", &file_path))?;

        let record_path = self.layout.object_record_path(bucket, key);
        remove_if_present(&record_path)
            .await
            .map_err(io_error("remove metadata record", &record_path))?;

        {
            let _tree = self.locks.own_tree(bucket).await;
            if let Some(parent) = file_path.parent() {
                prune_empty_dirs(parent, &self.layout.bucket_root(bucket)).await;
            }
            if let Some(parent) = record_path.parent() {
                prune_empty_dirs(parent, &self.layout.bucket_metadata_root(bucket)).await;
            }
        }

        if removed {
            debug!("deleted {}/{}", bucket, key);
        } else {
            debug!("delete of {}/{}: nothing stored", bucket, key);
        }
        Ok(())
    }

    /// Enumerate buckets that have a readable record, sorted by name.
    pub async fn list_buckets(&self) -> StorageResult<Listing<Bucket>> {
        let data_dir = self.layout.data_dir();
        let mut dir = fs::read_dir(data_dir)
            .await
            .map_err(io_error("read data directory", data_dir))?;

        let mut listing = Listing::default();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(io_error("read data directory", data_dir))?
        {
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            if !is_dir {
                continue;
            }
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                warn!("skipping bucket directory with non UTF-8 name {:?}", file_name);
                listing.skipped += 1;
                continue;
            };
            if let Err(err) = layout::ensure_bucket_name_safe(name) {
                warn!("skipping bucket directory {}: {}", name, err);
                listing.skipped += 1;
                continue;
            }

            match load_record::<Bucket>(&self.layout.bucket_record_path(name)).await {
                Ok(Some(bucket)) => listing.entries.push(bucket),
                Ok(None) => {
                    warn!("skipping bucket {}: record missing", name);
                    listing.skipped += 1;
                }
                Err(err) => {
                    warn!("skipping bucket {}: {}", name, err);
                    listing.skipped += 1;
                }
            }
        }

        listing.entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(listing)
    }

    /// Enumerate every object in a bucket, sorted by key.
    ///
    /// Walks the payload tree, so only published payloads are considered;
    /// staged temp files are ignored. Objects whose record cannot be loaded
    /// are skipped and counted.
    pub async fn list_objects(&self, bucket: &str) -> StorageResult<Listing<ObjectMetadata>> {
        layout::ensure_bucket_name_safe(bucket)?;
        self.ensure_bucket_exists(bucket).await?;

        let bucket_root = self.layout.bucket_root(bucket);
        let files = walk_files(&bucket_root)
            .await
            .map_err(io_error("walk bucket directory", &bucket_root))?;

        let mut listing = Listing::default();
        for path in files {
            if is_temp_file(&path) {
                continue;
            }
            let key = path
                .strip_prefix(&bucket_root)
                .ok()
                .and_then(layout::key_from_relative)
                .filter(|key| layout::ensure_key_safe(key).is_ok());
            let Some(key) = key else {
                warn!("skipping unaddressable payload {}", path.display());
                listing.skipped += 1;
                continue;
            };

            let record_path = self.layout.object_record_path(bucket, &key);
            match load_record::<ObjectMetadata>(&record_path).await {
                Ok(Some(metadata)) => listing.entries.push(metadata),
                Ok(None) => {
                    warn!("skipping {}/{}: record missing", bucket, key);
                    listing.skipped += 1;
                }
                Err(err) => {
                    warn!("skipping {}/{}: {}", bucket, key, err);
                    listing.skipped += 1;
                }
            }
        }

        listing.entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(listing)
    }

    async fn ensure_bucket_exists(&self, bucket: &str) -> StorageResult<()> {
        let record_path = self.layout.bucket_record_path(bucket);
        match fs::try_exists(&record_path).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(StorageError::BucketNotFound(bucket.to_string())),
            Err(err) => Err(io_error("stat bucket record", &record_path)(err)),
        }
    }

    async fn load_object_record(&self, bucket: &str, key: &str) -> StorageResult<ObjectMetadata> {
        let record_path = self.layout.object_record_path(bucket, key);
        load_record(&record_path)
            .await?
            .ok_or_else(|| StorageError::MissingMetadata {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
    }

    /// Take back a payload whose record could not be written.
    ///
    /// If the payload cannot be removed the journal marker stays, and
    /// recovery writes the record from it on the next start.
    async fn withdraw(&self, bucket: &str, key: &str, ticket: JournalTicket) {
        let file_path = self.layout.object_path(bucket, key);
        if let Err(err) = remove_if_present(&file_path).await {
            warn!(
                "payload {} left for recovery ({}): {}",
                file_path.display(),
                ticket.path().display(),
                err
            );
            return;
        }

        let record_path = self.layout.object_record_path(bucket, key);
        if let Err(err) = remove_if_present(&record_path).await {
            warn!("failed to remove stale record {}: {}", record_path.display(), err);
        }
        complete_ticket(ticket).await;
    }
}

pub(super) fn io_error(
    op: &'static str,
    path: &Path,
) -> impl FnOnce(io::Error) -> StorageError + use<> {
    let path = path.to_path_buf();
    move |source| StorageError::Io { op, path, source }
}

fn object_not_found(bucket: &str, key: &str) -> StorageError {
    StorageError::ObjectNotFound {
        bucket: bucket.to_string(),
        key: key.to_string(),
    }
}

/// `NotADirectory` shows up when a key walks through an existing payload
/// file, e.g. `a/b` while `a` is an object.
fn is_missing(err: &io::Error) -> bool {
    matches!(err.kind(), ErrorKind::NotFound | ErrorKind::NotADirectory)
}

fn is_temp_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(layout::is_temp_name)
}

/// Read and decode a record. A missing file is `Ok(None)`.
pub(super) async fn load_record<T: DeserializeOwned>(path: &Path) -> StorageResult<Option<T>> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if is_missing(&err) => return Ok(None),
        Err(err) => return Err(io_error("read metadata record", path)(err)),
    };
    metadata_codec::decode(&bytes)
        .map(Some)
        .map_err(|source| StorageError::Metadata {
            path: path.to_path_buf(),
            source,
        })
}

/// Encode and atomically write a record, creating parent directories.
pub(super) async fn store_record<T: Serialize>(path: &Path, record: &T) -> StorageResult<()> {
    let bytes = metadata_codec::encode(record).map_err(|source| StorageError::Metadata {
        path: path.to_path_buf(),
        source,
    })?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(io_error("create metadata directory", parent))?;
    }
    content_writer::write_atomic(path, &bytes)
        .await
        .map_err(io_error("write metadata record", path))
}

/// Remove a file, reporting whether anything was there. A directory at the
/// path counts as absent.
async fn remove_if_present(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(err) if is_missing(&err) => Ok(false),
        Err(err) => match fs::symlink_metadata(path).await {
            Ok(meta) if meta.is_dir() => Ok(false),
            _ => Err(err),
        },
    }
}

async fn complete_ticket(ticket: JournalTicket) {
    let path = ticket.path().to_path_buf();
    if let Err(err) = ticket.complete().await {
        warn!("failed to clear journal entry {}: {}", path.display(), err);
    }
}

/// Every regular file below `root`, depth first. A missing root yields
/// nothing.
pub(super) async fn walk_files(root: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => continue,
            Err(err) => return Err(err),
        };
        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                pending.push(entry.path());
            } else if file_type.is_file() {
                files.push(entry.path());
            }
        }
    }
    Ok(files)
}

/// Recursively remove empty directories up to (not including) `stop`.
///
/// Stops when:
/// - directory not empty
/// - directory not found
/// - reached `stop`
/// - encountered unexpected I/O errors
async fn prune_empty_dirs(start: &Path, stop: &Path) {
    let mut current = start.to_path_buf();
    while current.starts_with(stop) && current != stop {
        match fs::remove_dir(&current).await {
            Ok(_) => {
                if let Some(parent) = current.parent() {
                    current = parent.to_path_buf();
                } else {
                    break;
                }
            }
            Err(err) if err.kind() == ErrorKind::NotFound => break,
            Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
            Err(err) => {
                debug!("failed to prune directory {}: {}", current.display(), err);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use std::collections::HashSet;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;

    const HELLO_MD5: &str = "5d41402abc4b2a76b9719d911017c592";

    async fn open_store() -> (TempDir, StorageService) {
        let tmp = TempDir::new().unwrap();
        let service = StorageService::open(tmp.path()).await.unwrap();
        (tmp, service)
    }

    fn body(bytes: &[u8]) -> impl Stream<Item = io::Result<Bytes>> + Send + use<> {
        stream::iter(vec![Ok(Bytes::copy_from_slice(bytes))])
    }

    async fn put(
        service: &StorageService,
        bucket: &str,
        key: &str,
        bytes: &[u8],
    ) -> ObjectMetadata {
        service
            .put_object(bucket, key, None, body(bytes))
            .await
            .unwrap()
    }

    async fn read_all(mut file: File) -> Vec<u8> {
        let mut buf = Vec::new();
        file.read_to_end(&mut buf).await.unwrap();
        buf
    }

    fn temp_files_under(root: &Path) -> Vec<PathBuf> {
        let mut found = Vec::new();
        let mut pending = vec![root.to_path_buf()];
        while let Some(dir) = pending.pop() {
            for entry in std::fs::read_dir(dir).unwrap() {
                let path = entry.unwrap().path();
                if path.is_dir() {
                    pending.push(path);
                } else if is_temp_file(&path) {
                    found.push(path);
                }
            }
        }
        found
    }

    #[tokio::test]
    async fn photos_scenario() {
        let (_tmp, service) = open_store().await;
        service.create_bucket("photos").await.unwrap();

        let meta = service
            .put_object("photos", "a.txt", None, body(b"hello"))
            .await
            .unwrap();
        assert_eq!(meta.key, "a.txt");
        assert_eq!(meta.size, 5);
        assert_eq!(meta.etag, HELLO_MD5);
        assert_eq!(meta.content_type, "text/plain");

        let (got, file) = service.get_object("photos", "a.txt").await.unwrap();
        assert_eq!(got.etag, HELLO_MD5);
        assert_eq!(read_all(file).await, b"hello");

        service.delete_object("photos", "a.txt").await.unwrap();
        let err = service.get_object("photos", "a.txt").await.unwrap_err();
        assert!(matches!(err, StorageError::ObjectNotFound { .. }));
        assert_eq!(err.kind(), StorageErrorKind::NotFound);
    }

    #[tokio::test]
    async fn round_trip_preserves_bytes_and_checksum() {
        let (_tmp, service) = open_store().await;
        service.create_bucket("blobs").await.unwrap();

        let large: Vec<u8> = (0..300_000u32).map(|i| (i % 251) as u8).collect();
        let payloads: [&[u8]; 3] = [b"", b"\x00\xff\x00binary", &large];

        for (i, payload) in payloads.into_iter().enumerate() {
            let key = format!("obj-{i}");
            let chunks: Vec<io::Result<Bytes>> = payload
                .chunks(7_000)
                .map(|c| Ok(Bytes::copy_from_slice(c)))
                .collect();
            let meta = service
                .put_object("blobs", &key, None, stream::iter(chunks))
                .await
                .unwrap();

            assert_eq!(meta.size, payload.len() as u64);
            assert_eq!(meta.etag, format!("{:x}", md5::compute(payload)));

            let (got, file) = service.get_object("blobs", &key).await.unwrap();
            assert_eq!(got, meta);
            assert_eq!(read_all(file).await, payload);
        }
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let (_tmp, service) = open_store().await;
        service.create_bucket("photos").await.unwrap();

        service.delete_object("photos", "never-existed").await.unwrap();
        service.delete_object("photos", "never-existed").await.unwrap();

        put(&service, "photos", "a.txt", b"hello").await;
        service.delete_object("photos", "a.txt").await.unwrap();
        service.delete_object("photos", "a.txt").await.unwrap();
        assert!(service.list_objects("photos").await.unwrap().entries.is_empty());

        // no bucket at all is still a no-op
        service.delete_object("ghost", "a.txt").await.unwrap();
    }

    #[tokio::test]
    async fn objects_are_isolated_per_bucket() {
        let (_tmp, service) = open_store().await;
        service.create_bucket("a").await.unwrap();
        service.create_bucket("b").await.unwrap();

        put(&service, "a", "k", b"only in a").await;

        let err = service.get_object("b", "k").await.unwrap_err();
        assert_eq!(err.kind(), StorageErrorKind::NotFound);
        assert!(service.list_objects("b").await.unwrap().entries.is_empty());
        assert_eq!(service.list_objects("a").await.unwrap().entries.len(), 1);
    }

    #[tokio::test]
    async fn listing_returns_every_put_sorted_by_key() {
        let (_tmp, service) = open_store().await;
        service.create_bucket("docs").await.unwrap();

        let keys = ["z.txt", "a.txt", "nested/deep/b.md", "nested/c.json", "m"];
        for (i, key) in keys.iter().enumerate() {
            put(&service, "docs", key, &vec![b'x'; i * 10]).await;
        }

        let listing = service.list_objects("docs").await.unwrap();
        assert_eq!(listing.skipped, 0);
        let listed: Vec<(&str, u64)> = listing
            .entries
            .iter()
            .map(|m| (m.key.as_str(), m.size))
            .collect();
        assert_eq!(
            listed,
            vec![
                ("a.txt", 10),
                ("m", 40),
                ("nested/c.json", 30),
                ("nested/deep/b.md", 20),
                ("z.txt", 0),
            ]
        );
    }

    #[tokio::test]
    async fn corrupt_record_is_skipped_by_listing_and_fatal_to_get() {
        let (tmp, service) = open_store().await;
        service.create_bucket("docs").await.unwrap();
        for key in ["one", "two", "three"] {
            put(&service, "docs", key, key.as_bytes()).await;
        }

        let record = tmp.path().join("metadata").join("docs").join("two.json");
        std::fs::write(&record, b"{ definitely not json").unwrap();

        let listing = service.list_objects("docs").await.unwrap();
        let keys: Vec<&str> = listing.entries.iter().map(|m| m.key.as_str()).collect();
        assert_eq!(keys, vec!["one", "three"]);
        assert_eq!(listing.skipped, 1);

        let err = service.get_object("docs", "two").await.unwrap_err();
        assert!(matches!(err, StorageError::Metadata { .. }));
        assert_eq!(err.kind(), StorageErrorKind::Io);
    }

    #[tokio::test]
    async fn missing_record_is_corruption_not_absence() {
        let (tmp, service) = open_store().await;
        service.create_bucket("docs").await.unwrap();
        put(&service, "docs", "a.txt", b"hello").await;

        std::fs::remove_file(tmp.path().join("metadata/docs/a.txt.json")).unwrap();

        let err = service.get_object("docs", "a.txt").await.unwrap_err();
        assert!(matches!(err, StorageError::MissingMetadata { .. }));
        assert_eq!(err.kind(), StorageErrorKind::Io);
        let err = service.head_object("docs", "a.txt").await.unwrap_err();
        assert_eq!(err.kind(), StorageErrorKind::Io);

        let listing = service.list_objects("docs").await.unwrap();
        assert!(listing.entries.is_empty());
        assert_eq!(listing.skipped, 1);
    }

    #[tokio::test]
    async fn create_bucket_keeps_first_timestamp() {
        let (tmp, service) = open_store().await;
        let first = service.create_bucket("photos").await.unwrap();
        let record = std::fs::read(tmp.path().join("metadata/photos.json")).unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let second = service.create_bucket("photos").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(
            std::fs::read(tmp.path().join("metadata/photos.json")).unwrap(),
            record
        );
        assert!(tmp.path().join("data/photos").is_dir());
    }

    #[tokio::test]
    async fn create_bucket_replaces_corrupt_record() {
        let (tmp, service) = open_store().await;
        service.create_bucket("photos").await.unwrap();
        std::fs::write(tmp.path().join("metadata/photos.json"), b"garbage").unwrap();

        let bucket = service.create_bucket("photos").await.unwrap();
        assert_eq!(bucket.name, "photos");
        let listing = service.list_buckets().await.unwrap();
        assert_eq!(listing.entries, vec![bucket]);
    }

    #[tokio::test]
    async fn list_buckets_sorted_and_tolerant() {
        let (tmp, service) = open_store().await;
        for name in ["zeta", "alpha", "mid"] {
            service.create_bucket(name).await.unwrap();
        }
        std::fs::write(tmp.path().join("metadata/mid.json"), b"[").unwrap();
        std::fs::create_dir_all(tmp.path().join("data/orphan")).unwrap();

        let listing = service.list_buckets().await.unwrap();
        let names: Vec<&str> = listing.entries.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
        assert_eq!(listing.skipped, 2);
    }

    #[tokio::test]
    async fn put_requires_existing_bucket() {
        let (tmp, service) = open_store().await;
        let err = service
            .put_object("ghost", "a.txt", None, body(b"hello"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::BucketNotFound(_)));
        assert!(!tmp.path().join("data/ghost").exists());

        let err = service.list_objects("ghost").await.unwrap_err();
        assert_eq!(err.kind(), StorageErrorKind::NotFound);
    }

    #[tokio::test]
    async fn failed_upload_keeps_previous_version() {
        let (tmp, service) = open_store().await;
        service.create_bucket("docs").await.unwrap();
        let original = put(&service, "docs", "report.txt", b"hello").await;

        let broken: Vec<io::Result<Bytes>> = vec![
            Ok(Bytes::from_static(b"half of the new")),
            Err(io::Error::other("connection reset")),
        ];
        let err = service
            .put_object("docs", "report.txt", None, stream::iter(broken))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), StorageErrorKind::Io);

        let (meta, file) = service.get_object("docs", "report.txt").await.unwrap();
        assert_eq!(meta, original);
        assert_eq!(read_all(file).await, b"hello");
        assert!(temp_files_under(tmp.path()).is_empty());
        assert!(std::fs::read_dir(tmp.path().join("journal")).unwrap().next().is_none());
    }

    #[tokio::test]
    async fn reput_replaces_payload_and_record() {
        let (_tmp, service) = open_store().await;
        service.create_bucket("docs").await.unwrap();
        put(&service, "docs", "a", b"first version").await;
        let second = service
            .put_object("docs", "a", Some("application/json".into()), body(b"{}"))
            .await
            .unwrap();

        let (meta, file) = service.get_object("docs", "a").await.unwrap();
        assert_eq!(meta, second);
        assert_eq!(meta.content_type, "application/json");
        assert_eq!(read_all(file).await, b"{}");
        assert_eq!(service.list_objects("docs").await.unwrap().entries.len(), 1);
    }

    #[tokio::test]
    async fn content_type_is_inferred_when_absent_or_blank() {
        let (_tmp, service) = open_store().await;
        service.create_bucket("web").await.unwrap();

        let meta = service
            .put_object("web", "index.html", Some("  ".into()), body(b"<p>"))
            .await
            .unwrap();
        assert_eq!(meta.content_type, "text/html");

        let meta = put(&service, "web", "blob", b"?").await;
        assert_eq!(meta.content_type, "application/octet-stream");

        let meta = service
            .put_object("web", "x.txt", Some("custom/opaque".into()), body(b"?"))
            .await
            .unwrap();
        assert_eq!(meta.content_type, "custom/opaque");
    }

    #[tokio::test]
    async fn invalid_names_are_rejected_before_touching_disk() {
        let (tmp, service) = open_store().await;
        service.create_bucket("docs").await.unwrap();

        let err = service
            .put_object("docs", "../escape", None, body(b"x"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), StorageErrorKind::InvalidInput);
        let err = service.create_bucket("../up").await.unwrap_err();
        assert_eq!(err.kind(), StorageErrorKind::InvalidInput);
        assert!(!tmp.path().join("escape").exists());
    }

    #[tokio::test]
    async fn delete_prunes_empty_directories() {
        let (tmp, service) = open_store().await;
        service.create_bucket("docs").await.unwrap();
        put(&service, "docs", "a/b/c.txt", b"deep").await;
        put(&service, "docs", "a/keep.txt", b"keep").await;

        service.delete_object("docs", "a/b/c.txt").await.unwrap();

        assert!(!tmp.path().join("data/docs/a/b").exists());
        assert!(!tmp.path().join("metadata/docs/a/b").exists());
        assert!(tmp.path().join("data/docs/a/keep.txt").exists());
        assert!(tmp.path().join("data/docs").is_dir());
    }

    #[tokio::test]
    async fn key_under_an_existing_object_reads_as_missing() {
        let (_tmp, service) = open_store().await;
        service.create_bucket("docs").await.unwrap();
        put(&service, "docs", "a", b"file").await;

        let err = service.get_object("docs", "a/b").await.unwrap_err();
        assert_eq!(err.kind(), StorageErrorKind::NotFound);
        service.delete_object("docs", "a/b").await.unwrap();

        put(&service, "docs", "dir/x", b"x").await;
        let err = service.get_object("docs", "dir").await.unwrap_err();
        assert_eq!(err.kind(), StorageErrorKind::NotFound);
    }

    #[tokio::test]
    async fn staged_files_are_never_listed() {
        let (tmp, service) = open_store().await;
        service.create_bucket("docs").await.unwrap();
        put(&service, "docs", "done.txt", b"done").await;
        std::fs::write(tmp.path().join("data/docs/.tmp-inflight"), b"partial").unwrap();

        let listing = service.list_objects("docs").await.unwrap();
        assert_eq!(listing.entries.len(), 1);
        assert_eq!(listing.skipped, 0);
    }

    #[tokio::test]
    async fn concurrent_puts_to_one_key_stay_consistent() {
        let (_tmp, service) = open_store().await;
        service.create_bucket("race").await.unwrap();

        let mut tasks = Vec::new();
        for i in 0..8u8 {
            let service = service.clone();
            tasks.push(tokio::spawn(async move {
                let payload = vec![i; 4096 + i as usize];
                service
                    .put_object("race", "contested", None, body(&payload))
                    .await
                    .unwrap()
            }));
        }
        let mut etags = HashSet::new();
        for task in tasks {
            etags.insert(task.await.unwrap().etag);
        }

        let (meta, file) = service.get_object("race", "contested").await.unwrap();
        let bytes = read_all(file).await;
        assert!(etags.contains(&meta.etag));
        assert_eq!(meta.etag, format!("{:x}", md5::compute(&bytes)));
        assert_eq!(meta.size, bytes.len() as u64);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn pruning_deletes_never_break_puts_next_door() {
        let (_tmp, service) = open_store().await;
        service.create_bucket("b").await.unwrap();

        for i in 0..100 {
            let dir = format!("dir{i}");
            let mut deletes = Vec::new();
            for _ in 0..20 {
                let service = service.clone();
                let missing = format!("{dir}/missing");
                deletes.push(tokio::spawn(async move {
                    service.delete_object("b", &missing).await
                }));
            }
            let writer = {
                let service = service.clone();
                let key = format!("{dir}/obj");
                tokio::spawn(async move {
                    service
                        .put_object("b", &key, None, body(b"payload"))
                        .await
                })
            };

            writer.await.unwrap().unwrap();
            for delete in deletes {
                delete.await.unwrap().unwrap();
            }

            let (meta, file) = service.get_object("b", &format!("{dir}/obj")).await.unwrap();
            assert_eq!(meta.size, 7);
            assert_eq!(read_all(file).await, b"payload");
        }
        assert_eq!(service.list_objects("b").await.unwrap().entries.len(), 100);
    }
}
