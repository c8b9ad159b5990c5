//! Startup repair of interrupted puts.
//!
//! Runs before the server accepts requests, so no put is in flight and any
//! temp file or journal marker on disk belongs to a dead process.

use super::{
    content_writer,
    journal::PendingPut,
    layout::{self, TEMP_PREFIX},
    storage_service::{
        StorageResult, StorageService, io_error, load_record, store_record, walk_files,
    },
};
use crate::models::object::ObjectMetadata;
use std::io::ErrorKind;
use tokio::fs;
use tracing::{info, warn};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Puts whose payload was published but whose record was not.
    pub completed: usize,
    /// Puts that never reached the rename; their markers were dropped.
    pub discarded: usize,
    /// Leftover `.tmp-*` files removed from the store.
    pub temp_files_removed: usize,
}

impl StorageService {
    /// Replay journal markers, then sweep stale temp files.
    ///
    /// For each marker: if the payload at rest hashes to the journaled etag
    /// the record is (re)written from the marker, otherwise the put never
    /// published and the marker is dropped. Unreadable markers are dropped
    /// with a warning.
    pub async fn recover(&self) -> StorageResult<RecoveryReport> {
        let mut report = RecoveryReport::default();
        let journal_dir = self.layout.journal_dir();

        let pending = self
            .journal
            .pending()
            .await
            .map_err(io_error("read journal", journal_dir))?;

        for (ticket, entry) in pending {
            match entry {
                Ok(entry) => {
                    if self.replay(&entry).await? {
                        report.completed += 1;
                    } else {
                        report.discarded += 1;
                    }
                }
                Err(err) => {
                    warn!("dropping unreadable journal entry {}: {}", ticket.path().display(), err);
                    report.discarded += 1;
                }
            }
            let path = ticket.path().to_path_buf();
            ticket
                .complete()
                .await
                .map_err(io_error("remove journal entry", &path))?;
        }

        for dir in [self.layout.data_dir(), self.layout.metadata_dir(), journal_dir] {
            let files = walk_files(dir).await.map_err(io_error("walk store", dir))?;
            for path in files {
                let is_temp = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(layout::is_temp_name);
                if !is_temp {
                    continue;
                }
                match fs::remove_file(&path).await {
                    Ok(()) => report.temp_files_removed += 1,
                    Err(err) if err.kind() == ErrorKind::NotFound => {}
                    Err(err) => return Err(io_error("remove temp file", &path)(err)),
                }
            }
        }

        if report != RecoveryReport::default() {
            info!(
                "recovery: {} puts completed, {} discarded, {} temp files removed",
                report.completed, report.discarded, report.temp_files_removed
            );
        }
        Ok(report)
    }

    /// Returns true when the marker's record was (or already is) published.
    async fn replay(&self, entry: &PendingPut) -> StorageResult<bool> {
        let PendingPut {
            bucket, metadata, ..
        } = entry;
        if layout::ensure_bucket_name_safe(bucket).is_err()
            || layout::ensure_key_safe(&metadata.key).is_err()
            || !entry.temp_name.starts_with(TEMP_PREFIX)
            || entry.temp_name.contains('/')
        {
            warn!("dropping journal entry with invalid target {}/{}", bucket, metadata.key);
            return Ok(false);
        }

        let file_path = self.layout.object_path(bucket, &metadata.key);
        let etag = match content_writer::checksum_file(&file_path).await {
            Ok(etag) => etag,
            Err(err) if matches!(err.kind(), ErrorKind::NotFound | ErrorKind::NotADirectory) => {
                return Ok(false);
            }
            Err(err) => return Err(io_error("checksum payload", &file_path)(err)),
        };
        if etag != metadata.etag {
            return Ok(false);
        }

        let record_path = self.layout.object_record_path(bucket, &metadata.key);
        let current = load_record::<ObjectMetadata>(&record_path).await.ok().flatten();
        if current.as_ref().is_none_or(|c| c.etag != metadata.etag) {
            warn!(
                "publishing journaled record for {}/{} (etag {})",
                bucket, metadata.key, metadata.etag
            );
            store_record(&record_path, metadata).await?;
        }
        Ok(true)
    }
}
