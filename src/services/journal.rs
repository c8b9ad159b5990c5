//! Write-ahead markers for in-flight puts.
//!
//! A marker is written after the payload is staged and before it is renamed
//! into place, and removed once the object record is written. A marker that
//! survives a crash tells recovery which object may have a published payload
//! without a matching record.

use super::{
    content_writer,
    layout::{self, StorageLayout},
    metadata_codec::{self, CodecError},
};
use crate::models::object::ObjectMetadata;
use serde::{Deserialize, Serialize};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use tokio::fs;
use uuid::Uuid;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PendingPut {
    pub bucket: String,

    /// File name of the staged temp file, in the payload's directory.
    pub temp_name: String,

    /// Record to publish once the payload is in place.
    pub metadata: ObjectMetadata,
}

/// Handle to a marker on disk. Dropping it leaves the marker in place.
#[derive(Debug)]
pub struct JournalTicket {
    path: PathBuf,
}

impl JournalTicket {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn complete(self) -> io::Result<()> {
        remove_entry(&self.path).await
    }
}

#[derive(Clone, Debug)]
pub struct Journal {
    layout: StorageLayout,
}

impl Journal {
    pub fn new(layout: StorageLayout) -> Self {
        Self { layout }
    }

    pub async fn begin(&self, entry: &PendingPut) -> io::Result<JournalTicket> {
        let path = self.layout.journal_entry_path(Uuid::new_v4());
        let bytes = metadata_codec::encode(entry).map_err(io::Error::other)?;
        content_writer::write_atomic(&path, &bytes).await?;
        Ok(JournalTicket { path })
    }

    /// All markers currently on disk, decoded or not.
    pub async fn pending(
        &self,
    ) -> io::Result<Vec<(JournalTicket, Result<PendingPut, CodecError>)>> {
        let mut entries = Vec::new();
        let mut dir = match fs::read_dir(self.layout.journal_dir()).await {
            Ok(dir) => dir,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(entries),
            Err(err) => return Err(err),
        };

        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if layout::is_temp_name(name) || !name.ends_with(".json") {
                continue;
            }
            let path = entry.path();
            let bytes = fs::read(&path).await?;
            entries.push((JournalTicket { path }, metadata_codec::decode(&bytes)));
        }

        entries.sort_by(|a, b| a.0.path.cmp(&b.0.path));
        Ok(entries)
    }
}

async fn remove_entry(path: &Path) -> io::Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}
