//! Artifact store facade
//!
//! [`ArtifactStore`] ties the pieces together:
//!
//! ```text
//! store(content)
//!   ├─ FastCdcChunker splits the stream
//!   ├─ each chunk: SHA-256 → ChunkCodec → ChunkStore (first writer wins)
//!   ├─ whole stream: incremental SHA-256 → artifact id
//!   └─ ArtifactMetadataStore::try_insert (all rows or none)
//!
//! try_open(id)
//!   ├─ ArtifactMetadataStore::get_manifest
//!   └─ ArtifactChunkStream over the manifest's chunks
//! ```
//!
//! The metadata database is opened lazily by the first operation that needs
//! it. Every database call runs on the blocking pool.

use std::sync::Arc;

use chrono::Utc;
use tokio::io::AsyncRead;
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument, warn};

use crate::chunk_store::ChunkStore;
use crate::chunker::FastCdcChunker;
use crate::codec::ChunkCodec;
use crate::config::ArtifactStoreConfig;
use crate::error::{ArtifactError, Result};
use crate::hash::{Sha256Hash, Sha256Hasher};
use crate::manifest::{ArtifactChunkInfo, ArtifactManifest, RegionIndexEntry};
use crate::metadata::{ArtifactMetadataStore, ArtifactRecord, ChunkRecord};
use crate::stream::ArtifactChunkStream;

/// Per-call options for [`ArtifactStore::store`]
#[derive(Debug, Clone, Default)]
pub struct ArtifactStoreWriteOptions {
    /// Addressable sub-ranges recorded with the manifest
    pub region_index: Vec<RegionIndexEntry>,
}

impl ArtifactStoreWriteOptions {
    pub fn with_regions(region_index: Vec<RegionIndexEntry>) -> Self {
        Self { region_index }
    }
}

/// Content-addressed, deduplicating artifact store
pub struct ArtifactStore {
    config: ArtifactStoreConfig,
    chunker: FastCdcChunker,
    codec: ChunkCodec,
    chunk_store: ChunkStore,
    metadata: OnceCell<Arc<ArtifactMetadataStore>>,
}

impl ArtifactStore {
    /// Create a store. Chunking settings are validated here; nothing touches
    /// the filesystem until the first operation.
    pub fn new(config: ArtifactStoreConfig) -> Result<Self> {
        let chunker = FastCdcChunker::new(config.chunking.clone())?;
        let codec = ChunkCodec::new(config.compression.clone());
        let chunk_store = ChunkStore::new(config.chunk_root());

        Ok(Self {
            config,
            chunker,
            codec,
            chunk_store,
            metadata: OnceCell::new(),
        })
    }

    pub fn config(&self) -> &ArtifactStoreConfig {
        &self.config
    }

    pub fn chunk_store(&self) -> &ChunkStore {
        &self.chunk_store
    }

    /// Create the storage root and open the database exactly once.
    async fn metadata(&self) -> Result<Arc<ArtifactMetadataStore>> {
        let metadata = self
            .metadata
            .get_or_try_init(|| async {
                tokio::fs::create_dir_all(self.config.chunk_root()).await?;

                let path = self.config.database_path();
                let metadata =
                    tokio::task::spawn_blocking(move || ArtifactMetadataStore::open(&path)).await??;

                info!(root = %self.config.root.display(), "Artifact store initialized");
                Ok::<_, ArtifactError>(Arc::new(metadata))
            })
            .await?;
        Ok(Arc::clone(metadata))
    }

    /// Run a metadata call on the blocking pool.
    async fn with_metadata<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&ArtifactMetadataStore) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let metadata = self.metadata().await?;
        tokio::task::spawn_blocking(move || f(&metadata)).await?
    }

    /// Chunk, deduplicate and persist `content`, returning its manifest.
    ///
    /// Storing content that is already present returns the existing manifest
    /// and leaves the metadata untouched.
    #[instrument(skip(self, content, options))]
    pub async fn store<R>(
        &self,
        content: R,
        media_type: &str,
        options: ArtifactStoreWriteOptions,
    ) -> Result<ArtifactManifest>
    where
        R: AsyncRead + Unpin,
    {
        if media_type.trim().is_empty() {
            return Err(ArtifactError::invalid_manifest("media type is required"));
        }

        let metadata = self.metadata().await?;
        let mut source = self.chunker.stream(content);
        let mut artifact_hasher = Sha256Hasher::new();
        let mut chunks = Vec::new();
        let mut byte_length = 0u64;
        let mut written = 0usize;

        while let Some(chunk) = source.next_chunk().await? {
            artifact_hasher.update(&chunk);
            byte_length += chunk.len() as u64;

            let (info, created) = self.persist_chunk(&metadata, &chunk).await?;
            if created {
                written += 1;
            }
            chunks.push(info);
        }

        let manifest = ArtifactManifest::new(
            artifact_hasher.finalize(),
            media_type,
            byte_length,
            chunks,
            options.region_index,
        )?;
        let manifest_hash = manifest.compute_manifest_hash();
        let artifact_id = manifest.artifact_id();

        let candidate = manifest.clone();
        let inserted = tokio::task::spawn_blocking({
            let metadata = Arc::clone(&metadata);
            move || metadata.try_insert(&candidate, &manifest_hash, Utc::now())
        })
        .await??;

        if inserted {
            info!(
                artifact = %artifact_id.short_hex(),
                bytes = byte_length,
                chunks = manifest.chunks().len(),
                new_chunks = written,
                "Stored artifact"
            );
            return Ok(manifest);
        }

        debug!(artifact = %artifact_id.short_hex(), "Artifact already stored, returning existing manifest");
        let existing = tokio::task::spawn_blocking(move || metadata.get_manifest(&artifact_id)).await??;
        existing.ok_or_else(|| {
            ArtifactError::Database(format!(
                "artifact {artifact_id} reported as stored but has no manifest"
            ))
        })
    }

    /// Hash, encode and publish one chunk.
    ///
    /// Returns the chunk reference and whether this call created the file.
    /// When the file already exists the encoding recorded for it wins.
    async fn persist_chunk(
        &self,
        metadata: &Arc<ArtifactMetadataStore>,
        chunk: &[u8],
    ) -> Result<(ArtifactChunkInfo, bool)> {
        let hash = Sha256Hash::compute(chunk);
        let encoded = self.codec.encode(chunk)?;
        let mut info = ArtifactChunkInfo {
            hash,
            uncompressed_length: chunk.len() as u32,
            stored_length: encoded.stored_length() as u32,
            compression: encoded.compression,
        };

        if self.chunk_store.write(&hash, &encoded.payload).await? {
            return Ok((info, true));
        }

        let record = tokio::task::spawn_blocking({
            let metadata = Arc::clone(metadata);
            move || metadata.chunk_record(&hash)
        })
        .await??;

        match record {
            Some(record) => {
                info.compression = record.compression_kind()?;
                info.stored_length = record.stored_length;
            }
            // Either another writer has not committed yet or the file was left
            // by an interrupted store. Trust it only if it decodes to this chunk.
            None => {
                let stored = self.chunk_store.read(&hash).await?;
                let stored_length = stored.len();
                let expected = chunk.len();
                let identified =
                    tokio::task::spawn_blocking(move || ChunkCodec::identify(&stored, &hash, expected))
                        .await?;

                let Some(compression) = identified else {
                    warn!(
                        chunk = %hash.short_hex(),
                        on_disk = stored_length,
                        "Existing chunk file has no metadata and does not match its hash"
                    );
                    return Err(ArtifactError::ChunkMetadataMissing(hash));
                };
                if compression != info.compression {
                    debug!(chunk = %hash.short_hex(), %compression, "Adopted encoding of existing chunk file");
                }
                info.compression = compression;
                info.stored_length = u32::try_from(stored_length)
                    .map_err(|_| ArtifactError::ChunkMetadataMissing(hash))?;
            }
        }
        Ok((info, false))
    }

    /// Manifest of a stored artifact, or `None` if unknown.
    #[instrument(skip(self, artifact_id), fields(artifact = %artifact_id.short_hex()))]
    pub async fn try_get_manifest(&self, artifact_id: &Sha256Hash) -> Result<Option<ArtifactManifest>> {
        let artifact_id = *artifact_id;
        self.with_metadata(move |m| m.get_manifest(&artifact_id)).await
    }

    pub async fn contains(&self, artifact_id: &Sha256Hash) -> Result<bool> {
        let artifact_id = *artifact_id;
        self.with_metadata(move |m| m.exists(&artifact_id)).await
    }

    /// Open a reader over a stored artifact, or `None` if unknown.
    pub async fn try_open(&self, artifact_id: &Sha256Hash) -> Result<Option<ArtifactChunkStream>> {
        Ok(self
            .try_get_manifest(artifact_id)
            .await?
            .map(|manifest| self.open_stream(&manifest)))
    }

    /// Open a reader over an already loaded manifest.
    pub fn open_stream(&self, manifest: &ArtifactManifest) -> ArtifactChunkStream {
        ArtifactChunkStream::new(self.chunk_store.clone(), manifest.chunks().to_vec())
    }

    pub async fn artifact_record(&self, artifact_id: &Sha256Hash) -> Result<Option<ArtifactRecord>> {
        let artifact_id = *artifact_id;
        self.with_metadata(move |m| m.artifact_record(&artifact_id)).await
    }

    /// Persisted chunk row, including its reference count.
    pub async fn chunk_record(&self, chunk_hash: &Sha256Hash) -> Result<Option<ChunkRecord>> {
        let chunk_hash = *chunk_hash;
        self.with_metadata(move |m| m.chunk_record(&chunk_hash)).await
    }
}
