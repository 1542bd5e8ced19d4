//! SHA-256 content identifiers
//!
//! Both artifacts and chunks are addressed by [`Sha256Hash`]. The type is a
//! plain 32-byte value: equal iff byte-identical, cheap to copy, and encoded
//! as lowercase hex for paths and display.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::ArtifactError;

/// 32-byte SHA-256 digest identifying an artifact or a chunk.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Sha256Hash([u8; 32]);

impl Sha256Hash {
    /// Digest length in bytes.
    pub const LEN: usize = 32;

    /// Hash a complete byte slice.
    pub fn compute(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }

    /// Wrap an existing digest.
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Build from a slice, rejecting anything that is not exactly 32 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ArtifactError> {
        let array: [u8; 32] = bytes.try_into().map_err(|_| {
            ArtifactError::invalid_hash(format!(
                "SHA-256 hash must be {} bytes, got {}",
                Self::LEN,
                bytes.len()
            ))
        })?;
        Ok(Self(array))
    }

    /// Parse a 64-character hex string (either case).
    pub fn from_hex(hex_str: &str) -> Result<Self, ArtifactError> {
        let trimmed = hex_str.trim();
        if trimmed.len() != Self::LEN * 2 {
            return Err(ArtifactError::invalid_hash(format!(
                "expected {} hex characters, got {}",
                Self::LEN * 2,
                trimmed.len()
            )));
        }
        let bytes = hex::decode(trimmed).map_err(|e| ArtifactError::invalid_hash(e.to_string()))?;
        Self::from_bytes(&bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex encoding of all 32 bytes.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First 8 hex characters, for log lines.
    pub fn short_hex(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl From<[u8; 32]> for Sha256Hash {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Sha256Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl FromStr for Sha256Hash {
    type Err = ArtifactError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl fmt::Debug for Sha256Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sha256({}..)", self.short_hex())
    }
}

impl fmt::Display for Sha256Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Incremental SHA-256 over data arriving in pieces.
#[derive(Clone, Default)]
pub struct Sha256Hasher {
    inner: Sha256,
}

impl Sha256Hasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    pub fn finalize(self) -> Sha256Hash {
        Sha256Hash(self.inner.finalize().into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn test_compute_known_vector() {
        assert_eq!(Sha256Hash::compute(b"").to_hex(), EMPTY_SHA256);
    }

    #[test]
    fn test_hex_roundtrip_and_case() {
        let hash = Sha256Hash::compute(b"strata");
        let parsed: Sha256Hash = hash.to_hex().parse().unwrap();
        assert_eq!(parsed, hash);

        let upper = Sha256Hash::from_hex(&hash.to_hex().to_uppercase()).unwrap();
        assert_eq!(upper, hash);
        assert_eq!(hash.to_string(), hash.to_hex());
    }

    #[test]
    fn test_invalid_hex_rejected() {
        assert!(Sha256Hash::from_hex("abcd").is_err());
        assert!(Sha256Hash::from_hex(&"zz".repeat(32)).is_err());
        assert!(Sha256Hash::from_hex("").is_err());
    }

    #[test]
    fn test_from_bytes_length_checked() {
        assert!(Sha256Hash::from_bytes(&[0u8; 31]).is_err());
        assert!(Sha256Hash::from_bytes(&[0u8; 33]).is_err());
        let hash = Sha256Hash::from_bytes(&[7u8; 32]).unwrap();
        assert_eq!(hash.as_bytes(), &[7u8; 32]);
    }

    #[test]
    fn test_incremental_matches_one_shot() {
        let mut hasher = Sha256Hasher::new();
        hasher.update(b"hello ");
        hasher.update(b"");
        hasher.update(b"world");
        assert_eq!(hasher.finalize(), Sha256Hash::compute(b"hello world"));
    }

    #[test]
    fn test_debug_is_short() {
        let hash = Sha256Hash::compute(b"test");
        let debug = format!("{hash:?}");
        assert!(debug.starts_with("Sha256("));
        assert!(debug.ends_with("..)"));
        assert_eq!(debug.len(), "Sha256(..)".len() + 8);
    }
}
