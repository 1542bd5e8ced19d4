//! Artifact manifests
//!
//! A manifest is the ordered chunk list needed to rebuild an artifact, plus
//! its media type and optional region index. The canonical encoding is a
//! fixed little-endian layout; its SHA-256 is the manifest hash stored next
//! to the artifact row:
//!
//! ```text
//! version(1) | artifact_id(32) | media_type(varint len + utf8) | byte_length(u64)
//! | chunk_count(u32) + [hash(32) + uncompressed_len(u32)]*
//! | region_count(u32) + [region_id(u32) + offset(u64) + length(u64)]*
//! ```

use std::collections::HashSet;

use bytes::BufMut;
use serde::{Deserialize, Serialize};

use crate::codec::CompressionKind;
use crate::error::ArtifactError;
use crate::hash::Sha256Hash;

/// Encoding version written as the first byte.
pub const MANIFEST_VERSION: u8 = 1;

/// One chunk reference within a manifest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactChunkInfo {
    /// SHA-256 of the uncompressed chunk bytes
    pub hash: Sha256Hash,
    pub uncompressed_length: u32,
    /// Size of the chunk file on disk
    pub stored_length: u32,
    pub compression: CompressionKind,
}

/// Addressable sub-range of an artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionIndexEntry {
    pub region_id: u32,
    pub offset: u64,
    pub length: u64,
}

impl RegionIndexEntry {
    pub fn new(region_id: u32, offset: u64, length: u64) -> Self {
        Self {
            region_id,
            offset,
            length,
        }
    }
}

/// Canonical description of a stored artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactManifest {
    artifact_id: Sha256Hash,
    media_type: String,
    byte_length: u64,
    chunks: Vec<ArtifactChunkInfo>,
    region_index: Vec<RegionIndexEntry>,
}

impl ArtifactManifest {
    /// Build a manifest, checking that the fields agree with each other.
    ///
    /// The region index is sorted by `region_id`; ids must be unique and every
    /// region must fall inside `[0, byte_length]`.
    pub fn new(
        artifact_id: Sha256Hash,
        media_type: impl Into<String>,
        byte_length: u64,
        chunks: Vec<ArtifactChunkInfo>,
        mut region_index: Vec<RegionIndexEntry>,
    ) -> Result<Self, ArtifactError> {
        let media_type = media_type.into();
        if media_type.trim().is_empty() {
            return Err(ArtifactError::invalid_manifest("media type is required"));
        }

        let chunk_total: u64 = chunks.iter().map(|c| u64::from(c.uncompressed_length)).sum();
        if chunk_total != byte_length {
            return Err(ArtifactError::invalid_manifest(format!(
                "byte length {byte_length} does not match chunk total {chunk_total}"
            )));
        }

        region_index.sort_by_key(|r| r.region_id);
        let mut seen = HashSet::with_capacity(region_index.len());
        for region in &region_index {
            if !seen.insert(region.region_id) {
                return Err(ArtifactError::invalid_manifest(format!(
                    "duplicate region id {}",
                    region.region_id
                )));
            }
            let end = region.offset.checked_add(region.length);
            if end.is_none_or(|end| end > byte_length) {
                return Err(ArtifactError::invalid_manifest(format!(
                    "region {} ({}+{}) exceeds artifact length {}",
                    region.region_id, region.offset, region.length, byte_length
                )));
            }
        }

        Ok(Self {
            artifact_id,
            media_type,
            byte_length,
            chunks,
            region_index,
        })
    }

    /// SHA-256 of the full artifact content.
    pub fn artifact_id(&self) -> Sha256Hash {
        self.artifact_id
    }

    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    pub fn byte_length(&self) -> u64 {
        self.byte_length
    }

    pub fn chunks(&self) -> &[ArtifactChunkInfo] {
        &self.chunks
    }

    pub fn region_index(&self) -> &[RegionIndexEntry] {
        &self.region_index
    }

    pub fn region(&self, region_id: u32) -> Option<&RegionIndexEntry> {
        self.region_index
            .binary_search_by_key(&region_id, |r| r.region_id)
            .ok()
            .map(|i| &self.region_index[i])
    }

    /// Deterministic binary encoding (see module docs).
    pub fn to_canonical_bytes(&self) -> Vec<u8> {
        let media = self.media_type.as_bytes();
        let mut buf = Vec::with_capacity(
            1 + 32 + 5 + media.len() + 8 + 4 + self.chunks.len() * 36 + 4 + self.region_index.len() * 20,
        );

        buf.put_u8(MANIFEST_VERSION);
        buf.put_slice(self.artifact_id.as_bytes());
        put_varint(&mut buf, media.len() as u32);
        buf.put_slice(media);
        buf.put_u64_le(self.byte_length);

        buf.put_u32_le(self.chunks.len() as u32);
        for chunk in &self.chunks {
            buf.put_slice(chunk.hash.as_bytes());
            buf.put_u32_le(chunk.uncompressed_length);
        }

        buf.put_u32_le(self.region_index.len() as u32);
        for region in &self.region_index {
            buf.put_u32_le(region.region_id);
            buf.put_u64_le(region.offset);
            buf.put_u64_le(region.length);
        }

        buf
    }

    /// SHA-256 of [`Self::to_canonical_bytes`].
    pub fn compute_manifest_hash(&self) -> Sha256Hash {
        Sha256Hash::compute(&self.to_canonical_bytes())
    }
}

/// 7-bit groups, low first, high bit set on all but the last byte.
fn put_varint(buf: &mut Vec<u8>, mut value: u32) {
    while value >= 0x80 {
        buf.put_u8((value as u8) | 0x80);
        value >>= 7;
    }
    buf.put_u8(value as u8);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(data: &[u8], len: u32) -> ArtifactChunkInfo {
        ArtifactChunkInfo {
            hash: Sha256Hash::compute(data),
            uncompressed_length: len,
            stored_length: len,
            compression: CompressionKind::None,
        }
    }

    fn sample_manifest() -> ArtifactManifest {
        ArtifactManifest::new(
            Sha256Hash::compute(b"strata"),
            "application/x-test",
            10,
            vec![chunk(b"chunk-a", 4), chunk(b"chunk-b", 6)],
            vec![RegionIndexEntry::new(2, 4, 6), RegionIndexEntry::new(1, 0, 4)],
        )
        .unwrap()
    }

    #[test]
    fn test_canonical_encoding_golden() {
        let manifest = sample_manifest();
        let bytes = manifest.to_canonical_bytes();

        assert_eq!(bytes.len(), 180);
        assert_eq!(bytes[0], MANIFEST_VERSION);
        assert_eq!(&bytes[1..33], Sha256Hash::compute(b"strata").as_bytes());
        assert_eq!(bytes[33], 18);
        assert_eq!(&bytes[34..52], b"application/x-test");
        assert_eq!(&bytes[52..60], &10u64.to_le_bytes());
        assert_eq!(&bytes[60..64], &2u32.to_le_bytes());
        assert_eq!(
            manifest.compute_manifest_hash().to_hex(),
            "f3232a0e0939ddd45901ab63708c2835b6770226c8bfc87cec7578cafbf6decb"
        );
    }

    #[test]
    fn test_any_byte_mutation_changes_hash() {
        let manifest = sample_manifest();
        let bytes = manifest.to_canonical_bytes();
        let original = Sha256Hash::compute(&bytes);

        for i in 0..bytes.len() {
            let mut mutated = bytes.clone();
            mutated[i] ^= 0x01;
            assert_ne!(Sha256Hash::compute(&mutated), original, "byte {i}");
        }
    }

    #[test]
    fn test_regions_sorted_and_queryable() {
        let manifest = sample_manifest();
        let ids: Vec<u32> = manifest.region_index().iter().map(|r| r.region_id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(manifest.region(2), Some(&RegionIndexEntry::new(2, 4, 6)));
        assert_eq!(manifest.region(3), None);
    }

    #[test]
    fn test_storage_details_do_not_affect_hash() {
        let plain = sample_manifest();
        let mut chunks = plain.chunks().to_vec();
        chunks[1].stored_length = 3;
        chunks[1].compression = CompressionKind::Zstd;
        let compressed = ArtifactManifest::new(
            plain.artifact_id(),
            plain.media_type(),
            plain.byte_length(),
            chunks,
            plain.region_index().to_vec(),
        )
        .unwrap();

        assert_eq!(plain.compute_manifest_hash(), compressed.compute_manifest_hash());
    }

    #[test]
    fn test_invalid_manifests_rejected() {
        let id = Sha256Hash::compute(b"x");

        let blank = ArtifactManifest::new(id, "  ", 0, vec![], vec![]);
        assert!(matches!(blank, Err(ArtifactError::InvalidManifest(_))));

        let wrong_len = ArtifactManifest::new(id, "a/b", 5, vec![chunk(b"c", 4)], vec![]);
        assert!(wrong_len.is_err());

        let dup_region = ArtifactManifest::new(
            id,
            "a/b",
            4,
            vec![chunk(b"c", 4)],
            vec![RegionIndexEntry::new(1, 0, 2), RegionIndexEntry::new(1, 2, 2)],
        );
        assert!(dup_region.is_err());

        let out_of_bounds = ArtifactManifest::new(
            id,
            "a/b",
            4,
            vec![chunk(b"c", 4)],
            vec![RegionIndexEntry::new(1, 3, 2)],
        );
        assert!(out_of_bounds.is_err());
    }

    #[test]
    fn test_long_media_type_uses_multi_byte_prefix() {
        let media_type = "m".repeat(200);
        let manifest =
            ArtifactManifest::new(Sha256Hash::compute(b""), media_type, 0, vec![], vec![]).unwrap();
        let bytes = manifest.to_canonical_bytes();
        assert_eq!(&bytes[33..35], &[0xC8, 0x01]);
        assert_eq!(bytes.len(), 1 + 32 + 2 + 200 + 8 + 4 + 4);
    }
}
