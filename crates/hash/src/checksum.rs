//! Upstream source checksums (`sha256:<hex>`)

use kiln_errors::{Error, NetworkError};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tokio::io::AsyncReadExt;

/// Algorithms accepted in recipe checksums
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChecksumAlgorithm {
    Sha256,
}

impl ChecksumAlgorithm {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
        }
    }
}

/// An expected or computed digest of fetched bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Checksum {
    algorithm: ChecksumAlgorithm,
    digest: [u8; 32],
}

impl Checksum {
    #[must_use]
    pub fn sha256(digest: [u8; 32]) -> Self {
        Self {
            algorithm: ChecksumAlgorithm::Sha256,
            digest,
        }
    }

    #[must_use]
    pub fn sha256_of(data: &[u8]) -> Self {
        Self::sha256(Sha256::digest(data).into())
    }

    /// Compute the SHA-256 of a file on disk
    ///
    /// # Errors
    /// Returns an error if the file cannot be read.
    pub async fn sha256_file(path: &Path) -> Result<Self, Error> {
        let mut file = tokio::fs::File::open(path)
            .await
            .map_err(|e| Error::io_with_path(&e, path))?;
        let mut stream = Sha256Stream::new();
        let mut buffer = vec![0; crate::CHUNK_SIZE];
        loop {
            let n = file.read(&mut buffer).await?;
            if n == 0 {
                break;
            }
            stream.update(&buffer[..n]);
        }
        Ok(stream.finish())
    }

    #[must_use]
    pub fn algorithm(&self) -> ChecksumAlgorithm {
        self.algorithm
    }

    #[must_use]
    pub fn hex(&self) -> String {
        hex::encode(self.digest)
    }
}

impl FromStr for Checksum {
    type Err = NetworkError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| NetworkError::InvalidChecksum {
            value: value.to_string(),
            reason: reason.to_string(),
        };
        let (algorithm, digest) = value
            .split_once(':')
            .ok_or_else(|| invalid("expected <algorithm>:<hex digest>"))?;

        if !algorithm.eq_ignore_ascii_case("sha256") {
            return Err(NetworkError::UnsupportedChecksum {
                algorithm: algorithm.to_string(),
            });
        }

        let bytes = hex::decode(digest).map_err(|_| invalid("digest is not hexadecimal"))?;
        let digest: [u8; 32] = bytes
            .try_into()
            .map_err(|_| invalid("sha256 digest must be 64 hex characters"))?;
        Ok(Self::sha256(digest))
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm.as_str(), self.hex())
    }
}

impl Serialize for Checksum {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Checksum {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Incremental SHA-256 over a byte stream
#[derive(Debug, Clone, Default)]
pub struct Sha256Stream {
    hasher: Sha256,
    len: u64,
}

impl Sha256Stream {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
        self.len += chunk.len() as u64;
    }

    /// Bytes seen so far
    #[must_use]
    pub fn len(&self) -> u64 {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub fn finish(self) -> Checksum {
        Checksum::sha256(self.hasher.finalize().into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMPTY: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn parses_and_displays() {
        let c: Checksum = format!("sha256:{EMPTY}").parse().unwrap();
        assert_eq!(c, Checksum::sha256_of(b""));
        assert_eq!(c.to_string(), format!("sha256:{EMPTY}"));

        let upper: Checksum = format!("SHA256:{}", EMPTY.to_uppercase()).parse().unwrap();
        assert_eq!(upper, c);
    }

    #[test]
    fn rejects_other_algorithms() {
        let err = "md5:d41d8cd98f00b204e9800998ecf8427e"
            .parse::<Checksum>()
            .unwrap_err();
        assert!(matches!(err, NetworkError::UnsupportedChecksum { algorithm } if algorithm == "md5"));
    }

    #[test]
    fn rejects_malformed_digests() {
        assert!(matches!(
            "sha256:abc".parse::<Checksum>(),
            Err(NetworkError::InvalidChecksum { .. })
        ));
        assert!(matches!(
            EMPTY.parse::<Checksum>(),
            Err(NetworkError::InvalidChecksum { .. })
        ));
    }

    #[test]
    fn stream_matches_one_shot() {
        let mut stream = Sha256Stream::new();
        stream.update(b"hello ");
        stream.update(b"world");
        assert_eq!(stream.len(), 11);
        assert_eq!(stream.finish(), Checksum::sha256_of(b"hello world"));
    }
}
