//! Configuration types for the artifact store and cache

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::codec::CompressionKind;
use crate::error::ArtifactError;

/// Lower bound applied to the effective read buffer.
const MIN_READ_BUFFER: usize = 4096;

/// Content-defined chunking parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Smallest chunk emitted before end of stream
    pub min_chunk_size: usize,
    /// Target average chunk size
    pub avg_chunk_size: usize,
    /// Forced cut size
    pub max_chunk_size: usize,
    /// Bytes requested from the source per read
    pub read_buffer_size: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            min_chunk_size: 512 * 1024,
            avg_chunk_size: 2 * 1024 * 1024,
            max_chunk_size: 8 * 1024 * 1024,
            read_buffer_size: 256 * 1024,
        }
    }
}

impl ChunkingConfig {
    /// Check `0 < min <= avg <= max` and a non-empty read buffer.
    pub fn validate(&self) -> Result<(), ArtifactError> {
        if self.min_chunk_size == 0 {
            return Err(ArtifactError::invalid_config(
                "min_chunk_size must be greater than zero",
            ));
        }
        if self.avg_chunk_size < self.min_chunk_size {
            return Err(ArtifactError::invalid_config(format!(
                "avg_chunk_size ({}) must be >= min_chunk_size ({})",
                self.avg_chunk_size, self.min_chunk_size
            )));
        }
        if self.max_chunk_size < self.avg_chunk_size {
            return Err(ArtifactError::invalid_config(format!(
                "max_chunk_size ({}) must be >= avg_chunk_size ({})",
                self.max_chunk_size, self.avg_chunk_size
            )));
        }
        if u32::try_from(self.max_chunk_size).is_err() {
            return Err(ArtifactError::invalid_config(format!(
                "max_chunk_size ({}) must fit in 32 bits",
                self.max_chunk_size
            )));
        }
        if self.read_buffer_size == 0 {
            return Err(ArtifactError::invalid_config(
                "read_buffer_size must be greater than zero",
            ));
        }
        Ok(())
    }

    /// Read buffer size clamped into `[min(4096, max_chunk_size), max_chunk_size]`.
    pub fn effective_read_buffer(&self) -> usize {
        let floor = MIN_READ_BUFFER.min(self.max_chunk_size);
        self.read_buffer_size.clamp(floor, self.max_chunk_size)
    }
}

/// Per-chunk compression policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    /// Codec applied to eligible chunks
    pub kind: CompressionKind,
    /// zstd compression level
    pub level: i32,
    /// Chunks shorter than this are stored as-is
    pub min_bytes: usize,
    /// Keep the compressed form only when it is strictly smaller
    pub only_if_smaller: bool,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            kind: CompressionKind::None,
            level: 3,
            min_bytes: 64 * 1024,
            only_if_smaller: true,
        }
    }
}

impl CompressionConfig {
    /// zstd at the default level for every chunk of at least `min_bytes`.
    pub fn zstd() -> Self {
        Self {
            kind: CompressionKind::Zstd,
            ..Default::default()
        }
    }
}

/// Configuration for the artifact store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactStoreConfig {
    /// Root directory holding the database and chunk tree
    pub root: PathBuf,
    /// Chunker parameters
    pub chunking: ChunkingConfig,
    /// Chunk compression policy
    pub compression: CompressionConfig,
}

impl Default for ArtifactStoreConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./data/artifacts"),
            chunking: ChunkingConfig::default(),
            compression: CompressionConfig::default(),
        }
    }
}

impl ArtifactStoreConfig {
    /// Default settings rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Default::default()
        }
    }

    pub fn with_chunking(mut self, chunking: ChunkingConfig) -> Self {
        self.chunking = chunking;
        self
    }

    pub fn with_compression(mut self, compression: CompressionConfig) -> Self {
        self.compression = compression;
        self
    }

    /// `<root>/artifacts.redb`
    pub fn database_path(&self) -> PathBuf {
        self.root.join("artifacts.redb")
    }

    /// `<root>/chunks`
    pub fn chunk_root(&self) -> PathBuf {
        self.root.join("chunks")
    }
}

/// Configuration for the materialized artifact cache
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactCacheConfig {
    /// Cache root; files land under `<root>/artifacts/`
    pub root: PathBuf,
    /// Buffer size used while writing materialized files
    pub write_buffer_size: usize,
}

impl Default for ArtifactCacheConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./data/cache"),
            write_buffer_size: 256 * 1024,
        }
    }
}

impl ArtifactCacheConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Default::default()
        }
    }
}
