//! Crash-safe payload writes.
//!
//! Bytes are streamed into a `.tmp-<uuid>` sibling of the destination while
//! an MD5 digest and byte count are accumulated in the same pass. The temp
//! file is owned by a guard that removes it on every failure path, including
//! when the writing future is dropped mid-stream. Only `commit` moves it to
//! the destination, by a same-directory rename.

use super::layout::TEMP_PREFIX;
use bytes::Bytes;
use futures::{Stream, StreamExt, pin_mut};
use md5::Context;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use tokio::{
    fs::{self, File},
    io::{AsyncReadExt, AsyncWriteExt},
};
use uuid::Uuid;

const READ_CHUNK: usize = 64 * 1024;

/// Removes the wrapped file on drop unless disarmed.
#[derive(Debug)]
struct TempGuard {
    path: Option<PathBuf>,
}

impl TempGuard {
    fn new_in(dir: &Path) -> Self {
        Self {
            path: Some(dir.join(format!("{}{}", TEMP_PREFIX, Uuid::new_v4()))),
        }
    }

    fn path(&self) -> &Path {
        self.path.as_deref().unwrap_or_else(|| Path::new(""))
    }

    fn disarm(&mut self) {
        self.path = None;
    }
}

impl Drop for TempGuard {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            if let Err(err) = std::fs::remove_file(&path) {
                if err.kind() != ErrorKind::NotFound {
                    tracing::debug!("failed to remove temp file {}: {}", path.display(), err);
                }
            }
        }
    }
}

/// A fully written and synced payload waiting to be published.
#[derive(Debug)]
pub struct StagedPayload {
    temp: TempGuard,
    size: u64,
    etag: String,
}

impl StagedPayload {
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Lowercase hex MD5 of the staged bytes.
    pub fn etag(&self) -> &str {
        &self.etag
    }

    #[cfg(test)]
    pub(crate) fn temp_path(&self) -> &Path {
        self.temp.path()
    }

    /// File name of the temp file, relative to the destination directory.
    pub fn temp_name(&self) -> String {
        self.temp
            .path()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Atomically rename the staged file onto `dest`.
    ///
    /// `dest` must be in the same directory the payload was staged in. On
    /// error the temp file is removed and `dest` is left as it was.
    pub async fn commit(mut self, dest: &Path) -> io::Result<()> {
        rename_replacing(self.temp.path(), dest).await?;
        self.temp.disarm();
        sync_parent(dest).await;
        Ok(())
    }
}

/// Stream `stream` into a temp file inside `dir`, computing size and MD5.
///
/// `dir` must already exist.
pub async fn stage_stream<S>(dir: &Path, stream: S) -> io::Result<StagedPayload>
where
    S: Stream<Item = io::Result<Bytes>>,
{
    let temp = TempGuard::new_in(dir);
    let mut file = File::create(temp.path()).await?;

    let mut size: u64 = 0;
    let mut digest = Context::new();
    pin_mut!(stream);
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        size += chunk.len() as u64;
        digest.consume(&chunk);
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    file.sync_all().await?;
    drop(file);

    Ok(StagedPayload {
        temp,
        size,
        etag: format!("{:x}", digest.compute()),
    })
}

/// Write `bytes` to `path` through a synced temp sibling and a rename, so
/// readers see either the previous file or the complete new one.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| io::Error::new(ErrorKind::InvalidInput, "path has no parent directory"))?;
    let mut temp = TempGuard::new_in(dir);

    let mut file = File::create(temp.path()).await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    file.sync_all().await?;
    drop(file);

    rename_replacing(temp.path(), path).await?;
    temp.disarm();
    sync_parent(path).await;
    Ok(())
}

/// Lowercase hex MD5 of a file at rest.
pub async fn checksum_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path).await?;
    let mut digest = Context::new();
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        digest.consume(&buf[..n]);
    }
    Ok(format!("{:x}", digest.compute()))
}

/// Flush a directory entry so a completed rename survives power loss.
#[cfg(unix)]
async fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir).await?.sync_all().await
}

#[cfg(not(unix))]
async fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}

/// The rename has already happened; a failed directory sync only weakens
/// durability, so it is logged rather than reported.
async fn sync_parent(path: &Path) {
    let Some(dir) = path.parent() else {
        return;
    };
    if let Err(err) = sync_dir(dir).await {
        tracing::warn!("failed to sync directory {}: {}", dir.display(), err);
    }
}

async fn rename_replacing(from: &Path, to: &Path) -> io::Result<()> {
    match fs::rename(from, to).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::AlreadyExists => {
            fs::remove_file(to).await?;
            fs::rename(from, to).await
        }
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use tempfile::TempDir;

    fn chunks(parts: &[&'static str]) -> impl Stream<Item = io::Result<Bytes>> + use<> {
        let items: Vec<io::Result<Bytes>> = parts
            .iter()
            .map(|p| Ok(Bytes::from_static(p.as_bytes())))
            .collect();
        stream::iter(items)
    }

    fn dir_entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn stages_and_commits_with_single_pass_checksum() {
        let tmp = TempDir::new().unwrap();
        let staged = stage_stream(tmp.path(), chunks(&["hel", "lo"]))
            .await
            .unwrap();

        assert_eq!(staged.size(), 5);
        assert_eq!(staged.etag(), "5d41402abc4b2a76b9719d911017c592");
        assert!(staged.temp_name().starts_with(TEMP_PREFIX));
        assert!(staged.temp_path().exists());

        let dest = tmp.path().join("a.txt");
        staged.commit(&dest).await.unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), b"hello");
        assert_eq!(dir_entries(tmp.path()), vec!["a.txt".to_string()]);
    }

    #[tokio::test]
    async fn failed_stream_leaves_no_temp_file() {
        let tmp = TempDir::new().unwrap();
        let items: Vec<io::Result<Bytes>> = vec![
            Ok(Bytes::from_static(b"partial")),
            Err(io::Error::other("client went away")),
        ];

        let err = stage_stream(tmp.path(), stream::iter(items))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "client went away");
        assert!(dir_entries(tmp.path()).is_empty());
    }

    #[tokio::test]
    async fn dropping_a_staged_payload_discards_it() {
        let tmp = TempDir::new().unwrap();
        let staged = stage_stream(tmp.path(), chunks(&["abc"])).await.unwrap();
        let temp_path = staged.temp_path().to_path_buf();
        assert!(temp_path.exists());

        drop(staged);
        assert!(!temp_path.exists());
    }

    #[tokio::test]
    async fn commit_replaces_existing_destination() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("obj");
        std::fs::write(&dest, b"old contents").unwrap();

        let staged = stage_stream(tmp.path(), chunks(&["new"])).await.unwrap();
        staged.commit(&dest).await.unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), b"new");
    }

    #[tokio::test]
    async fn write_atomic_and_checksum_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("record.json");

        write_atomic(&path, b"first").await.unwrap();
        write_atomic(&path, b"hello").await.unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"hello");
        assert_eq!(
            checksum_file(&path).await.unwrap(),
            "5d41402abc4b2a76b9719d911017c592"
        );
        assert_eq!(dir_entries(tmp.path()), vec!["record.json".to_string()]);
    }

    #[tokio::test]
    async fn directories_can_be_synced() {
        let tmp = TempDir::new().unwrap();
        sync_dir(tmp.path()).await.unwrap();
    }

    #[tokio::test]
    async fn empty_stream_yields_empty_payload() {
        let tmp = TempDir::new().unwrap();
        let staged = stage_stream(tmp.path(), chunks(&[])).await.unwrap();
        assert_eq!(staged.size(), 0);
        assert_eq!(staged.etag(), "d41d8cd98f00b204e9800998ecf8427e");
    }
}
