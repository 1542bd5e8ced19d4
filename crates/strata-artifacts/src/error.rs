//! Error types for strata-artifacts
//!
//! Expected absence (unknown artifact, unknown chunk) is reported as `None`
//! by the read operations. The variants here are reserved for faults.

use thiserror::Error;

use crate::hash::Sha256Hash;

/// Errors that can occur in artifact store operations
#[derive(Debug, Error)]
pub enum ArtifactError {
    /// I/O error from the filesystem or the content source
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Metadata database error
    #[error("Database error: {0}")]
    Database(String),

    /// Error (de)serializing a metadata row
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Chunking or compression settings are unusable
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Manifest fields are inconsistent
    #[error("Invalid manifest: {0}")]
    InvalidManifest(String),

    /// Hex string or byte slice is not a SHA-256 hash
    #[error("Invalid hash: {0}")]
    InvalidHash(String),

    /// Stored chunk could not be decoded back to its recorded length
    #[error("Decode error: {0}")]
    Decode(String),

    /// Artifact is required but not present in the store
    #[error("Artifact not found: {0}")]
    NotFound(Sha256Hash),

    /// Stored manifest fingerprint disagrees with the stored rows
    #[error("Manifest hash mismatch for {artifact_id}: stored {stored}, computed {computed}")]
    ManifestHashMismatch {
        artifact_id: Sha256Hash,
        stored: Sha256Hash,
        computed: Sha256Hash,
    },

    /// Chunk file exists on disk without metadata and does not decode to its hash
    #[error("Chunk {0} exists on disk without metadata and does not match its hash")]
    ChunkMetadataMissing(Sha256Hash),

    /// Blocking metadata task failed to complete
    #[error("Task error: {0}")]
    Task(String),
}

impl ArtifactError {
    /// Create a new InvalidConfig error
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// Create a new InvalidManifest error
    pub fn invalid_manifest(message: impl Into<String>) -> Self {
        Self::InvalidManifest(message.into())
    }

    /// Create a new Decode error
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode(message.into())
    }

    /// Create a new InvalidHash error
    pub fn invalid_hash(message: impl Into<String>) -> Self {
        Self::InvalidHash(message.into())
    }
}

impl From<postcard::Error> for ArtifactError {
    fn from(err: postcard::Error) -> Self {
        ArtifactError::Serialization(err.to_string())
    }
}

impl From<redb::DatabaseError> for ArtifactError {
    fn from(err: redb::DatabaseError) -> Self {
        ArtifactError::Database(err.to_string())
    }
}

impl From<redb::TransactionError> for ArtifactError {
    fn from(err: redb::TransactionError) -> Self {
        ArtifactError::Database(err.to_string())
    }
}

impl From<redb::TableError> for ArtifactError {
    fn from(err: redb::TableError) -> Self {
        ArtifactError::Database(err.to_string())
    }
}

impl From<redb::StorageError> for ArtifactError {
    fn from(err: redb::StorageError) -> Self {
        ArtifactError::Database(err.to_string())
    }
}

impl From<redb::CommitError> for ArtifactError {
    fn from(err: redb::CommitError) -> Self {
        ArtifactError::Database(err.to_string())
    }
}

impl From<tokio::task::JoinError> for ArtifactError {
    fn from(err: tokio::task::JoinError) -> Self {
        ArtifactError::Task(err.to_string())
    }
}

/// Readers surface store faults through `std::io::Error`; non-I/O faults
/// become `InvalidData` with the original error as the source.
impl From<ArtifactError> for std::io::Error {
    fn from(err: ArtifactError) -> Self {
        match err {
            ArtifactError::Io(inner) => inner,
            other => std::io::Error::new(std::io::ErrorKind::InvalidData, other),
        }
    }
}

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, ArtifactError>;
