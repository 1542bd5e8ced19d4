//! Materialized artifact cache
//!
//! Some callers need a real file path rather than a stream. [`ArtifactCache`]
//! reconstructs an artifact once into `<root>/artifacts/<hex>` and hands out
//! that path from then on. Files are written under a private temp name and
//! renamed into place, so the final path never holds a partial artifact.

use std::fs::Metadata;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tempfile::PathPersistError;
use tokio::fs::{self, File};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info, instrument};

use crate::chunk_store::create_temp_file;
use crate::config::ArtifactCacheConfig;
use crate::error::{ArtifactError, Result};
use crate::hash::Sha256Hash;
use crate::manifest::ArtifactManifest;
use crate::store::ArtifactStore;

/// A materialized, read-only local copy of an artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactCacheEntry {
    pub artifact_id: Sha256Hash,
    pub path: PathBuf,
    pub byte_length: u64,
    pub cached_at: DateTime<Utc>,
}

/// Flat-file cache in front of an [`ArtifactStore`]
pub struct ArtifactCache {
    store: Arc<ArtifactStore>,
    config: ArtifactCacheConfig,
    artifacts_dir: PathBuf,
}

impl ArtifactCache {
    pub fn new(store: Arc<ArtifactStore>, config: ArtifactCacheConfig) -> Self {
        let artifacts_dir = config.root.join("artifacts");
        Self {
            store,
            config,
            artifacts_dir,
        }
    }

    pub fn store(&self) -> &Arc<ArtifactStore> {
        &self.store
    }

    /// Deterministic location of a materialized artifact.
    pub fn path_for(&self, artifact_id: &Sha256Hash) -> PathBuf {
        self.artifacts_dir.join(artifact_id.to_hex())
    }

    /// Entry for an already materialized artifact, without materializing.
    pub async fn try_get(&self, artifact_id: &Sha256Hash) -> Result<Option<ArtifactCacheEntry>> {
        let path = self.path_for(artifact_id);
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(Some(cached_entry(*artifact_id, path, &meta))),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Materialize a stored artifact if needed and return its entry.
    ///
    /// Fails with [`ArtifactError::NotFound`] when the store does not know
    /// the artifact.
    #[instrument(skip(self, artifact_id), fields(artifact = %artifact_id.short_hex()))]
    pub async fn ensure(&self, artifact_id: &Sha256Hash) -> Result<ArtifactCacheEntry> {
        if let Some(entry) = self.try_get(artifact_id).await? {
            debug!("Cache hit");
            return Ok(entry);
        }

        let manifest = self
            .store
            .try_get_manifest(artifact_id)
            .await?
            .ok_or(ArtifactError::NotFound(*artifact_id))?;
        self.materialize(&manifest).await
    }

    /// Same as [`Self::ensure`] for a manifest the caller already holds.
    #[instrument(skip(self, manifest), fields(artifact = %manifest.artifact_id().short_hex()))]
    pub async fn ensure_manifest(&self, manifest: &ArtifactManifest) -> Result<ArtifactCacheEntry> {
        if let Some(entry) = self.try_get(&manifest.artifact_id()).await? {
            debug!("Cache hit");
            return Ok(entry);
        }
        self.materialize(manifest).await
    }

    async fn materialize(&self, manifest: &ArtifactManifest) -> Result<ArtifactCacheEntry> {
        let artifact_id = manifest.artifact_id();
        let path = self.path_for(&artifact_id);
        fs::create_dir_all(&self.artifacts_dir).await?;

        let (file, temp_path) = create_temp_file(&self.artifacts_dir, &artifact_id.to_hex()).await?;
        self.write_temp(manifest, file).await?;

        let target = path.clone();
        let persisted = tokio::task::spawn_blocking(move || temp_path.persist(target)).await?;
        match persisted {
            Ok(()) => {
                info!(bytes = manifest.byte_length(), path = %path.display(), "Materialized artifact");
                Ok(ArtifactCacheEntry {
                    artifact_id,
                    path,
                    byte_length: manifest.byte_length(),
                    cached_at: Utc::now(),
                })
            }
            Err(PathPersistError { error, path: temp_path }) => {
                drop(temp_path);
                match self.try_get(&artifact_id).await? {
                    Some(entry) => {
                        debug!("Another materializer finished first");
                        Ok(entry)
                    }
                    None => Err(error.into()),
                }
            }
        }
    }

    async fn write_temp(&self, manifest: &ArtifactManifest, file: File) -> Result<()> {
        let mut writer = BufWriter::with_capacity(self.config.write_buffer_size.max(1), file);

        let mut reader = self.store.open_stream(manifest);
        let written = tokio::io::copy(&mut reader, &mut writer).await?;
        writer.flush().await?;
        writer.get_ref().sync_all().await?;

        if written != manifest.byte_length() {
            return Err(ArtifactError::decode(format!(
                "materialized {} bytes, manifest records {}",
                written,
                manifest.byte_length()
            )));
        }
        Ok(())
    }
}

fn cached_entry(artifact_id: Sha256Hash, path: PathBuf, meta: &Metadata) -> ArtifactCacheEntry {
    let cached_at = meta
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now());
    ArtifactCacheEntry {
        artifact_id,
        path,
        byte_length: meta.len(),
        cached_at,
    }
}
