//! # Strata Artifacts
//!
//! Content-addressed, deduplicating artifact storage.
//!
//! An artifact is an arbitrary byte stream identified by the SHA-256 of its
//! content. Storing it splits the stream into content-defined chunks, writes
//! each distinct chunk once, and commits a manifest describing how to put the
//! bytes back together.
//!
//! ## Features
//!
//! - **FastCdcChunker**: streaming gear-hash chunking with normalized cut masks
//! - **ChunkCodec**: optional, size-gated zstd compression per chunk
//! - **ChunkStore**: sharded chunk files, first writer wins
//! - **ArtifactMetadataStore**: redb tables for artifacts, chunks, chunk
//!   ordering and region indexes, with chunk reference counts
//! - **ArtifactStore**: store / open / contains facade over all of the above
//! - **ArtifactCache**: materializes artifacts into plain local files
//!
//! ## Example
//!
//! ```rust,ignore
//! use strata_artifacts::{ArtifactStore, ArtifactStoreConfig};
//! use tokio::io::AsyncReadExt;
//!
//! #[tokio::main]
//! async fn main() -> strata_artifacts::Result<()> {
//!     let store = ArtifactStore::new(ArtifactStoreConfig::new("./data/artifacts"))?;
//!
//!     let manifest = store
//!         .store(&b"hello"[..], "text/plain", Default::default())
//!         .await?;
//!
//!     let mut reader = store.try_open(&manifest.artifact_id()).await?.unwrap();
//!     let mut bytes = Vec::new();
//!     reader.read_to_end(&mut bytes).await?;
//!     assert_eq!(bytes, b"hello");
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod chunk_store;
pub mod chunker;
pub mod codec;
pub mod config;
pub mod error;
pub mod hash;
pub mod manifest;
pub mod metadata;
pub mod store;
pub mod stream;

// Re-exports
pub use cache::{ArtifactCache, ArtifactCacheEntry};
pub use chunk_store::ChunkStore;
pub use chunker::{ChunkStream, FastCdcChunker, GEAR_TABLE};
pub use codec::{ChunkCodec, CompressionKind, EncodedChunk};
pub use config::{ArtifactCacheConfig, ArtifactStoreConfig, ChunkingConfig, CompressionConfig};
pub use error::{ArtifactError, Result};
pub use hash::{Sha256Hash, Sha256Hasher};
pub use manifest::{ArtifactChunkInfo, ArtifactManifest, MANIFEST_VERSION, RegionIndexEntry};
pub use metadata::{ArtifactMetadataStore, ArtifactRecord, ChunkRecord};
pub use store::{ArtifactStore, ArtifactStoreWriteOptions};
pub use stream::ArtifactChunkStream;
