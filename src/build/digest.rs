use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest as _, Sha256};
use std::path::{Path, PathBuf};

pub const SHA256: &str = "sha256";

/// Represents a content-addressable digest (e.g., "sha256:abc123...")
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Digest {
    algorithm: String,
    hash: String,
}

/// Incremental sha256 over length-prefixed parts
///
/// Prefixing each part with its length keeps `("ab", "c")` and `("a", "bc")`
/// from colliding.
#[derive(Default)]
pub struct DigestBuilder {
    hasher: Sha256,
}

impl DigestBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn part(mut self, bytes: impl AsRef<[u8]>) -> Self {
        let bytes = bytes.as_ref();
        self.hasher.update((bytes.len() as u64).to_be_bytes());
        self.hasher.update(bytes);
        self
    }

    pub fn finish(self) -> Digest {
        Digest {
            algorithm: SHA256.to_string(),
            hash: hex::encode(self.hasher.finalize()),
        }
    }
}

impl Digest {
    /// sha256 of a byte slice
    pub fn sha256(bytes: &[u8]) -> Self {
        Self {
            algorithm: SHA256.to_string(),
            hash: hex::encode(Sha256::digest(bytes)),
        }
    }

    /// Parse a digest string in format "algorithm:hash"
    pub fn parse(digest: &str) -> Result<Self> {
        let (algorithm, hash) = digest.split_once(':').with_context(|| {
            format!(
                "Invalid digest format (expected 'algorithm:hash'): {}",
                digest
            )
        })?;

        if algorithm.is_empty() || hash.is_empty() {
            anyhow::bail!("Invalid digest format (empty part): {}", digest);
        }

        Ok(Self {
            algorithm: algorithm.to_string(),
            hash: hash.to_string(),
        })
    }

    /// Get the algorithm part (e.g., "sha256")
    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    /// Get the hash part
    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// First 12 hash characters, as shown in build output
    pub fn short(&self) -> &str {
        &self.hash[..self.hash.len().min(12)]
    }

    /// Storage path of the object named by this digest
    pub fn to_blob_path(&self, dir: &Path) -> PathBuf {
        dir.join(&self.algorithm).join(&self.hash)
    }
}

impl std::fmt::Display for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.hash)
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Digest::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_digest() {
        let digest = Digest::parse("sha256:abc123").unwrap();
        assert_eq!(digest.algorithm(), "sha256");
        assert_eq!(digest.hash(), "abc123");
        assert_eq!(digest.to_string(), "sha256:abc123");
    }

    #[test]
    fn test_parse_invalid_digest() {
        assert!(Digest::parse("invalid").is_err());
        assert!(Digest::parse("").is_err());
        assert!(Digest::parse("sha256:").is_err());
    }

    #[test]
    fn test_sha256_known_value() {
        assert_eq!(
            Digest::sha256(b"").hash(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_builder_parts_are_length_prefixed() {
        let a = DigestBuilder::new().part("ab").part("c").finish();
        let b = DigestBuilder::new().part("a").part("bc").finish();
        assert_ne!(a, b);
    }

    #[test]
    fn test_to_blob_path() {
        let digest = Digest::parse("sha256:abc123").unwrap();
        let path = digest.to_blob_path(Path::new("/cache/layers"));
        assert_eq!(path, PathBuf::from("/cache/layers/sha256/abc123"));
    }

    #[test]
    fn test_serde_as_string() {
        let digest = Digest::sha256(b"x");
        let json = serde_json::to_string(&digest).unwrap();
        assert_eq!(json, format!("\"{}\"", digest));
        let back: Digest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, digest);
    }
}
