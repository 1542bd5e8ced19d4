//! Content-addressed chunk files
//!
//! Layout: `<root>/<hex[0..2]>/<hex>`. A chunk file is published exactly once
//! and never rewritten; identical hashes imply identical content, so a writer
//! that finds the file already present simply reports that it lost the race.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tempfile::TempPath;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument};

use crate::hash::Sha256Hash;

/// Filesystem store for individual chunk payloads
#[derive(Debug, Clone)]
pub struct ChunkStore {
    root: PathBuf,
}

impl ChunkStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Sharded path of a chunk file.
    pub fn path(&self, hash: &Sha256Hash) -> PathBuf {
        let hex = hash.to_hex();
        self.root.join(&hex[..2]).join(hex)
    }

    /// Publish a chunk file if none exists yet.
    ///
    /// Returns `Ok(true)` when this call created the file and `Ok(false)` when
    /// another writer already had. The payload is written to a private temp
    /// file first and then hard-linked into place, so the final path is only
    /// ever visible with complete content, and the link fails with
    /// `AlreadyExists` for every writer but one.
    #[instrument(skip(self, payload), fields(hash = %hash.short_hex(), size = payload.len()))]
    pub async fn write(&self, hash: &Sha256Hash, payload: &[u8]) -> std::io::Result<bool> {
        let path = self.path(hash);
        // Fast path only; the hard link below decides any race.
        if fs::try_exists(&path).await? {
            debug!("Chunk already present");
            return Ok(false);
        }

        let shard = path.parent().unwrap_or(self.root.as_path());
        fs::create_dir_all(shard).await?;

        let (file, temp_path) = create_temp_file(shard, &hash.to_hex()).await?;
        let published = publish(file, &temp_path, &path, payload).await;
        drop(temp_path);

        match published {
            Ok(()) => {
                debug!("Stored chunk");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                debug!("Lost chunk write race");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Open a chunk file for streaming reads.
    pub async fn open_read(&self, hash: &Sha256Hash) -> std::io::Result<File> {
        File::open(self.path(hash)).await
    }

    /// Read a whole chunk file into memory.
    pub async fn read(&self, hash: &Sha256Hash) -> std::io::Result<Vec<u8>> {
        fs::read(self.path(hash)).await
    }

    pub async fn exists(&self, hash: &Sha256Hash) -> std::io::Result<bool> {
        fs::try_exists(self.path(hash)).await
    }

    /// Size of a chunk file on disk, if present.
    pub async fn stored_len(&self, hash: &Sha256Hash) -> std::io::Result<Option<u64>> {
        match fs::metadata(self.path(hash)).await {
            Ok(meta) => Ok(Some(meta.len())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}

async fn publish(
    mut file: File,
    temp_path: &Path,
    path: &Path,
    payload: &[u8],
) -> std::io::Result<()> {
    file.write_all(payload).await?;
    file.sync_all().await?;
    drop(file);

    fs::hard_link(temp_path, path).await
}

/// Create `<dir>/.<stem>.<random>.tmp`, deleted when the returned guard drops.
///
/// The file is created on the blocking pool. If the caller is cancelled
/// before that finishes, the guard is dropped together with the task output.
pub(crate) async fn create_temp_file(dir: &Path, stem: &str) -> std::io::Result<(File, TempPath)> {
    let dir = dir.to_path_buf();
    let prefix = format!(".{stem}.");
    let temp = tokio::task::spawn_blocking(move || {
        tempfile::Builder::new()
            .prefix(&prefix)
            .suffix(".tmp")
            .tempfile_in(dir)
    })
    .await
    .map_err(std::io::Error::other)??;

    let (file, temp_path) = temp.into_parts();
    Ok((File::from_std(file), temp_path))
}
