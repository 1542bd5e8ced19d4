//! Per-chunk compression
//!
//! Chunks are compressed independently so that each chunk file can be decoded
//! on its own. The decoded length is checked against the length recorded at
//! write time, on top of the content hash check done by the reader.

use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::CompressionConfig;
use crate::error::ArtifactError;
use crate::hash::Sha256Hash;

/// First four bytes of every zstd frame.
pub const ZSTD_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];

/// Compression applied to a stored chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionKind {
    /// Stored verbatim
    #[default]
    None,
    /// zstd frame
    Zstd,
}

impl CompressionKind {
    pub const NONE_LABEL: &'static str = "none";
    pub const ZSTD_LABEL: &'static str = "zstd";

    /// Label persisted in chunk metadata.
    pub fn label(&self) -> &'static str {
        match self {
            CompressionKind::None => Self::NONE_LABEL,
            CompressionKind::Zstd => Self::ZSTD_LABEL,
        }
    }

    /// Parse a persisted label. Blank means uncompressed.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "" | Self::NONE_LABEL => Some(CompressionKind::None),
            Self::ZSTD_LABEL => Some(CompressionKind::Zstd),
            _ => None,
        }
    }
}

impl fmt::Display for CompressionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Compress `data` as a single zstd frame.
pub fn compress(data: &[u8], level: i32) -> Result<Vec<u8>, ArtifactError> {
    Ok(zstd::bulk::compress(data, level)?)
}

/// Decompress a zstd frame that must expand to exactly `expected_len` bytes.
pub fn decompress(data: &[u8], expected_len: usize) -> Result<Vec<u8>, ArtifactError> {
    let decoded = zstd::stream::decode_all(data)
        .map_err(|e| ArtifactError::decode(format!("zstd frame is corrupt: {e}")))?;
    if decoded.len() != expected_len {
        return Err(ArtifactError::decode(format!(
            "decompressed length {} did not match expected {}",
            decoded.len(),
            expected_len
        )));
    }
    Ok(decoded)
}

/// A chunk in the form it is written to disk
#[derive(Debug)]
pub struct EncodedChunk<'a> {
    pub payload: Cow<'a, [u8]>,
    pub compression: CompressionKind,
}

impl EncodedChunk<'_> {
    pub fn stored_length(&self) -> usize {
        self.payload.len()
    }
}

/// Applies the configured compression policy to chunks
#[derive(Debug, Clone)]
pub struct ChunkCodec {
    config: CompressionConfig,
}

impl ChunkCodec {
    pub fn new(config: CompressionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CompressionConfig {
        &self.config
    }

    /// Encode a chunk for storage.
    ///
    /// Chunks below `min_bytes`, and chunks that zstd fails to shrink when
    /// `only_if_smaller` is set, are stored verbatim.
    pub fn encode<'a>(&self, chunk: &'a [u8]) -> Result<EncodedChunk<'a>, ArtifactError> {
        let verbatim = EncodedChunk {
            payload: Cow::Borrowed(chunk),
            compression: CompressionKind::None,
        };

        if self.config.kind == CompressionKind::None || chunk.len() < self.config.min_bytes {
            return Ok(verbatim);
        }

        let compressed = compress(chunk, self.config.level)?;
        if self.config.only_if_smaller && compressed.len() >= chunk.len() {
            return Ok(verbatim);
        }

        Ok(EncodedChunk {
            payload: Cow::Owned(compressed),
            compression: CompressionKind::Zstd,
        })
    }

    /// Decode stored bytes back to the original chunk.
    pub fn decode(
        kind: CompressionKind,
        stored: Vec<u8>,
        uncompressed_len: usize,
    ) -> Result<Vec<u8>, ArtifactError> {
        match kind {
            CompressionKind::None => {
                if stored.len() != uncompressed_len {
                    return Err(ArtifactError::decode(format!(
                        "stored length {} did not match expected {}",
                        stored.len(),
                        uncompressed_len
                    )));
                }
                Ok(stored)
            }
            CompressionKind::Zstd => decompress(&stored, uncompressed_len),
        }
    }

    /// Work out how an existing chunk file was encoded.
    ///
    /// Returns the encoding under which `stored` decodes to `uncompressed_len`
    /// bytes hashing to `hash`, or `None` if it matches neither.
    pub fn identify(
        stored: &[u8],
        hash: &Sha256Hash,
        uncompressed_len: usize,
    ) -> Option<CompressionKind> {
        if stored.starts_with(&ZSTD_MAGIC)
            && let Ok(decoded) = decompress(stored, uncompressed_len)
            && Sha256Hash::compute(&decoded) == *hash
        {
            return Some(CompressionKind::Zstd);
        }

        (stored.len() == uncompressed_len && Sha256Hash::compute(stored) == *hash)
            .then_some(CompressionKind::None)
    }
}
