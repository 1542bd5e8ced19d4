//! Transactional artifact metadata on redb
//!
//! Four tables mirror the logical schema:
//!
//! - `artifacts`: artifact_hash -> [`ArtifactRecord`]
//! - `chunks`: chunk_hash -> [`ChunkRecord`]
//! - `artifact_chunks`: artifact_hash ++ seq (u32 BE) -> chunk hash + length
//! - `region_index`: artifact_hash ++ region_id (u32 BE) -> offset + length
//!
//! Big-endian suffixes keep each artifact's rows contiguous and ordered, so a
//! prefix scan returns chunks in write order and regions by id. An artifact
//! row is only ever committed in the same write transaction as its chunk,
//! ordering and region rows.

use std::path::Path;

use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable, TableDefinition, WriteTransaction};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::codec::CompressionKind;
use crate::error::ArtifactError;
use crate::hash::Sha256Hash;
use crate::manifest::{ArtifactChunkInfo, ArtifactManifest, RegionIndexEntry};

// Key: artifact hash, Value: serialized ArtifactRecord
const ARTIFACTS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("artifacts");

// Key: chunk hash, Value: serialized ChunkRecord
const CHUNKS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("chunks");

// Key: (artifact hash, seq) concatenated, Value: serialized ArtifactChunkRow
const ARTIFACT_CHUNKS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("artifact_chunks");

// Key: (artifact hash, region id) concatenated, Value: serialized RegionRow
const REGION_INDEX: TableDefinition<&[u8], &[u8]> = TableDefinition::new("region_index");

/// Persisted artifact row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub media_type: String,
    pub byte_length: u64,
    /// Unix millis of the first successful store
    pub created_at_ms: i64,
    pub manifest_hash: Sha256Hash,
    pub ref_count: u64,
}

/// Persisted chunk row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub byte_length: u32,
    pub stored_length: u32,
    /// Compression label (`"none"` or `"zstd"`)
    pub compression: String,
    /// Number of artifact references to this chunk
    pub ref_count: u64,
}

impl ChunkRecord {
    pub fn compression_kind(&self) -> Result<CompressionKind, ArtifactError> {
        CompressionKind::from_label(&self.compression).ok_or_else(|| {
            ArtifactError::Database(format!("unknown compression label '{}'", self.compression))
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ArtifactChunkRow {
    chunk_hash: Sha256Hash,
    uncompressed_length: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct RegionRow {
    offset: u64,
    length: u64,
}

fn row_key(artifact_id: &Sha256Hash, suffix: u32) -> [u8; 36] {
    let mut key = [0u8; 36];
    key[..32].copy_from_slice(artifact_id.as_bytes());
    key[32..].copy_from_slice(&suffix.to_be_bytes());
    key
}

fn key_suffix(key: &[u8]) -> Result<u32, ArtifactError> {
    let suffix: [u8; 4] = key
        .get(32..36)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| ArtifactError::Database(format!("malformed row key of {} bytes", key.len())))?;
    Ok(u32::from_be_bytes(suffix))
}

/// Metadata database for artifacts and chunks
pub struct ArtifactMetadataStore {
    db: Database,
}

impl ArtifactMetadataStore {
    /// Open or create the database and make sure every table exists.
    #[instrument(skip(path), fields(path = %path.display()))]
    pub fn open(path: &Path) -> Result<Self, ArtifactError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::create(path)?;
        info!("Opened artifact metadata database");

        let store = Self { db };
        store.init_tables()?;
        Ok(store)
    }

    fn init_tables(&self) -> Result<(), ArtifactError> {
        let write_txn = self.db.begin_write()?;
        write_txn.open_table(ARTIFACTS)?;
        write_txn.open_table(CHUNKS)?;
        write_txn.open_table(ARTIFACT_CHUNKS)?;
        write_txn.open_table(REGION_INDEX)?;
        write_txn.commit()?;

        debug!("Initialized metadata tables");
        Ok(())
    }

    pub fn exists(&self, artifact_id: &Sha256Hash) -> Result<bool, ArtifactError> {
        let read_txn = self.db.begin_read()?;
        let artifacts = read_txn.open_table(ARTIFACTS)?;
        Ok(artifacts.get(artifact_id.as_bytes().as_slice())?.is_some())
    }

    pub fn artifact_record(
        &self,
        artifact_id: &Sha256Hash,
    ) -> Result<Option<ArtifactRecord>, ArtifactError> {
        let read_txn = self.db.begin_read()?;
        let artifacts = read_txn.open_table(ARTIFACTS)?;
        let record = match artifacts.get(artifact_id.as_bytes().as_slice())? {
            Some(value) => Some(postcard::from_bytes(value.value())?),
            None => None,
        };
        Ok(record)
    }

    pub fn chunk_record(&self, chunk_hash: &Sha256Hash) -> Result<Option<ChunkRecord>, ArtifactError> {
        let read_txn = self.db.begin_read()?;
        let chunks = read_txn.open_table(CHUNKS)?;
        let record = match chunks.get(chunk_hash.as_bytes().as_slice())? {
            Some(value) => Some(postcard::from_bytes(value.value())?),
            None => None,
        };
        Ok(record)
    }

    /// Reassemble the manifest of a stored artifact.
    ///
    /// Returns `Ok(None)` for unknown artifacts. Fails with
    /// [`ArtifactError::ManifestHashMismatch`] when the rows no longer hash to
    /// the manifest hash recorded at insert time.
    #[instrument(skip(self, artifact_id), fields(artifact = %artifact_id.short_hex()))]
    pub fn get_manifest(
        &self,
        artifact_id: &Sha256Hash,
    ) -> Result<Option<ArtifactManifest>, ArtifactError> {
        let read_txn = self.db.begin_read()?;

        let artifacts = read_txn.open_table(ARTIFACTS)?;
        let record: ArtifactRecord = match artifacts.get(artifact_id.as_bytes().as_slice())? {
            Some(value) => postcard::from_bytes(value.value())?,
            None => return Ok(None),
        };

        let prefix = artifact_id.as_bytes().as_slice();
        let ordering = read_txn.open_table(ARTIFACT_CHUNKS)?;
        let chunk_table = read_txn.open_table(CHUNKS)?;
        let mut chunks = Vec::new();

        for entry in ordering.range(prefix..)? {
            let (key, value) = entry?;
            let key_bytes = key.value();
            if !key_bytes.starts_with(prefix) {
                break;
            }

            let seq = key_suffix(key_bytes)?;
            if seq as usize != chunks.len() {
                return Err(ArtifactError::Database(format!(
                    "artifact {artifact_id} is missing chunk row {}",
                    chunks.len()
                )));
            }

            let row: ArtifactChunkRow = postcard::from_bytes(value.value())?;
            let chunk: ChunkRecord = match chunk_table.get(row.chunk_hash.as_bytes().as_slice())? {
                Some(value) => postcard::from_bytes(value.value())?,
                None => {
                    return Err(ArtifactError::Database(format!(
                        "artifact {artifact_id} references unknown chunk {}",
                        row.chunk_hash
                    )));
                }
            };

            chunks.push(ArtifactChunkInfo {
                hash: row.chunk_hash,
                uncompressed_length: row.uncompressed_length,
                stored_length: chunk.stored_length,
                compression: chunk.compression_kind()?,
            });
        }

        let regions_table = read_txn.open_table(REGION_INDEX)?;
        let mut regions = Vec::new();
        for entry in regions_table.range(prefix..)? {
            let (key, value) = entry?;
            let key_bytes = key.value();
            if !key_bytes.starts_with(prefix) {
                break;
            }

            let row: RegionRow = postcard::from_bytes(value.value())?;
            regions.push(RegionIndexEntry::new(key_suffix(key_bytes)?, row.offset, row.length));
        }

        let manifest = ArtifactManifest::new(
            *artifact_id,
            record.media_type,
            record.byte_length,
            chunks,
            regions,
        )?;

        let computed = manifest.compute_manifest_hash();
        if computed != record.manifest_hash {
            warn!(
                stored = %record.manifest_hash,
                computed = %computed,
                "Manifest hash mismatch"
            );
            return Err(ArtifactError::ManifestHashMismatch {
                artifact_id: *artifact_id,
                stored: record.manifest_hash,
                computed,
            });
        }

        Ok(Some(manifest))
    }

    /// Insert an artifact and all of its rows in one transaction.
    ///
    /// Returns `Ok(false)` without touching anything when the artifact is
    /// already stored. Otherwise every referenced chunk row is inserted with
    /// `ref_count = 1` or has its `ref_count` incremented, and the artifact,
    /// ordering and region rows are added. redb serializes write transactions,
    /// so the existence check and the inserts cannot interleave with a
    /// concurrent insert of the same artifact.
    #[instrument(skip(self, manifest, manifest_hash, now), fields(artifact = %manifest.artifact_id().short_hex(), chunks = manifest.chunks().len()))]
    pub fn try_insert(
        &self,
        manifest: &ArtifactManifest,
        manifest_hash: &Sha256Hash,
        now: DateTime<Utc>,
    ) -> Result<bool, ArtifactError> {
        let write_txn = self.db.begin_write()?;
        let inserted = Self::insert_rows(&write_txn, manifest, manifest_hash, now)?;

        if inserted {
            write_txn.commit()?;
            debug!("Committed artifact");
        } else {
            write_txn.abort()?;
            debug!("Artifact already stored");
        }
        Ok(inserted)
    }

    fn insert_rows(
        write_txn: &WriteTransaction,
        manifest: &ArtifactManifest,
        manifest_hash: &Sha256Hash,
        now: DateTime<Utc>,
    ) -> Result<bool, ArtifactError> {
        let artifact_id = manifest.artifact_id();
        let artifact_key = artifact_id.as_bytes().as_slice();

        let mut artifacts = write_txn.open_table(ARTIFACTS)?;
        if artifacts.get(artifact_key)?.is_some() {
            return Ok(false);
        }

        {
            let mut chunks = write_txn.open_table(CHUNKS)?;
            for chunk in manifest.chunks() {
                let key = chunk.hash.as_bytes().as_slice();
                let existing: Option<ChunkRecord> = match chunks.get(key)? {
                    Some(value) => Some(postcard::from_bytes(value.value())?),
                    None => None,
                };
                let record = match existing {
                    Some(mut record) => {
                        record.ref_count += 1;
                        record
                    }
                    None => ChunkRecord {
                        byte_length: chunk.uncompressed_length,
                        stored_length: chunk.stored_length,
                        compression: chunk.compression.label().to_string(),
                        ref_count: 1,
                    },
                };
                chunks.insert(key, postcard::to_allocvec(&record)?.as_slice())?;
            }
        }

        let record = ArtifactRecord {
            media_type: manifest.media_type().to_string(),
            byte_length: manifest.byte_length(),
            created_at_ms: now.timestamp_millis(),
            manifest_hash: *manifest_hash,
            ref_count: 1,
        };
        artifacts.insert(artifact_key, postcard::to_allocvec(&record)?.as_slice())?;

        {
            let mut ordering = write_txn.open_table(ARTIFACT_CHUNKS)?;
            for (seq, chunk) in manifest.chunks().iter().enumerate() {
                let row = ArtifactChunkRow {
                    chunk_hash: chunk.hash,
                    uncompressed_length: chunk.uncompressed_length,
                };
                let key = row_key(&artifact_id, seq as u32);
                ordering.insert(key.as_slice(), postcard::to_allocvec(&row)?.as_slice())?;
            }
        }

        {
            let mut regions = write_txn.open_table(REGION_INDEX)?;
            for region in manifest.region_index() {
                let row = RegionRow {
                    offset: region.offset,
                    length: region.length,
                };
                let key = row_key(&artifact_id, region.region_id);
                regions.insert(key.as_slice(), postcard::to_allocvec(&row)?.as_slice())?;
            }
        }

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_store() -> (ArtifactMetadataStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = ArtifactMetadataStore::open(&temp_dir.path().join("meta.redb")).unwrap();
        (store, temp_dir)
    }

    fn chunk_info(data: &[u8]) -> ArtifactChunkInfo {
        ArtifactChunkInfo {
            hash: Sha256Hash::compute(data),
            uncompressed_length: data.len() as u32,
            stored_length: data.len() as u32,
            compression: CompressionKind::None,
        }
    }

    fn manifest_of(parts: &[&[u8]], regions: Vec<RegionIndexEntry>) -> ArtifactManifest {
        let content: Vec<u8> = parts.concat();
        ArtifactManifest::new(
            Sha256Hash::compute(&content),
            "application/octet-stream",
            content.len() as u64,
            parts.iter().map(|p| chunk_info(p)).collect(),
            regions,
        )
        .unwrap()
    }

    #[test]
    fn test_insert_and_get_manifest() {
        let (store, _temp) = create_test_store();
        let manifest = manifest_of(
            &[b"first-", b"second-", b"third"],
            vec![RegionIndexEntry::new(7, 6, 7), RegionIndexEntry::new(3, 0, 6)],
        );
        let hash = manifest.compute_manifest_hash();

        assert!(!store.exists(&manifest.artifact_id()).unwrap());
        assert!(store.try_insert(&manifest, &hash, Utc::now()).unwrap());
        assert!(store.exists(&manifest.artifact_id()).unwrap());

        let loaded = store.get_manifest(&manifest.artifact_id()).unwrap().unwrap();
        assert_eq!(loaded, manifest);
        assert_eq!(loaded.compute_manifest_hash(), hash);

        let record = store.artifact_record(&manifest.artifact_id()).unwrap().unwrap();
        assert_eq!(record.manifest_hash, hash);
        assert_eq!(record.ref_count, 1);
        assert_eq!(record.byte_length, 18);
    }

    #[test]
    fn test_unknown_artifact_is_none() {
        let (store, _temp) = create_test_store();
        let id = Sha256Hash::compute(b"nothing");
        assert!(store.get_manifest(&id).unwrap().is_none());
        assert!(store.artifact_record(&id).unwrap().is_none());
        assert!(store.chunk_record(&id).unwrap().is_none());
    }

    #[test]
    fn test_second_insert_is_noop() {
        let (store, _temp) = create_test_store();
        let manifest = manifest_of(&[b"abc", b"def"], vec![]);
        let hash = manifest.compute_manifest_hash();

        assert!(store.try_insert(&manifest, &hash, Utc::now()).unwrap());
        assert!(!store.try_insert(&manifest, &hash, Utc::now()).unwrap());

        let chunk = store.chunk_record(&Sha256Hash::compute(b"abc")).unwrap().unwrap();
        assert_eq!(chunk.ref_count, 1);
    }

    #[test]
    fn test_shared_chunk_ref_count() {
        let (store, _temp) = create_test_store();
        let first = manifest_of(&[b"shared", b"-one"], vec![]);
        let second = manifest_of(&[b"shared", b"-two"], vec![]);

        assert!(store.try_insert(&first, &first.compute_manifest_hash(), Utc::now()).unwrap());
        assert!(store.try_insert(&second, &second.compute_manifest_hash(), Utc::now()).unwrap());

        let shared = store.chunk_record(&Sha256Hash::compute(b"shared")).unwrap().unwrap();
        assert_eq!(shared.ref_count, 2);
        assert_eq!(shared.byte_length, 6);
        assert_eq!(shared.compression_kind().unwrap(), CompressionKind::None);

        let unique = store.chunk_record(&Sha256Hash::compute(b"-one")).unwrap().unwrap();
        assert_eq!(unique.ref_count, 1);
    }

    #[test]
    fn test_empty_manifest() {
        let (store, _temp) = create_test_store();
        let manifest = manifest_of(&[], vec![]);
        assert!(store.try_insert(&manifest, &manifest.compute_manifest_hash(), Utc::now()).unwrap());

        let loaded = store.get_manifest(&manifest.artifact_id()).unwrap().unwrap();
        assert!(loaded.chunks().is_empty());
        assert_eq!(loaded.byte_length(), 0);
    }

    #[test]
    fn test_manifest_hash_mismatch_detected() {
        let (store, _temp) = create_test_store();
        let manifest = manifest_of(&[b"payload"], vec![]);
        let wrong = Sha256Hash::compute(b"not the manifest");

        assert!(store.try_insert(&manifest, &wrong, Utc::now()).unwrap());
        let err = store.get_manifest(&manifest.artifact_id()).unwrap_err();
        assert!(matches!(err, ArtifactError::ManifestHashMismatch { .. }));
    }

    #[test]
    fn test_reopen_preserves_rows() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("meta.redb");
        let manifest = manifest_of(&[b"durable"], vec![]);

        {
            let store = ArtifactMetadataStore::open(&path).unwrap();
            assert!(store.try_insert(&manifest, &manifest.compute_manifest_hash(), Utc::now()).unwrap());
        }

        let store = ArtifactMetadataStore::open(&path).unwrap();
        assert_eq!(store.get_manifest(&manifest.artifact_id()).unwrap(), Some(manifest));
    }
}
