#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Content addressing for kiln
//!
//! BLAKE3 identifies everything kiln stores itself (artifact trees, merged
//! configurations, cache keys). SHA-256 checksums identify upstream source
//! archives, since that is what upstream projects publish.

mod checksum;
mod tree;

pub use checksum::{Checksum, ChecksumAlgorithm, Sha256Stream};
pub use tree::hash_directory;

use blake3::Hasher;
use kiln_errors::{Error, StorageError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Size of chunks for streaming hash computation
pub(crate) const CHUNK_SIZE: usize = 64 * 1024;

/// A BLAKE3 hash value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash {
    bytes: [u8; 32],
}

impl Hash {
    #[must_use]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self { bytes }
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }

    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.bytes)
    }

    /// Parse from hex string
    ///
    /// # Errors
    /// Returns an error if the input is not 64 hexadecimal characters.
    pub fn from_hex(s: &str) -> Result<Self, Error> {
        let bytes = hex::decode(s).map_err(|e| StorageError::CorruptedData {
            message: format!("invalid hex: {e}"),
        })?;

        let array: [u8; 32] = bytes.try_into().map_err(|b: Vec<u8>| {
            StorageError::CorruptedData {
                message: format!("hash must be 32 bytes, got {}", b.len()),
            }
        })?;
        Ok(Self::from_bytes(array))
    }

    /// Compute hash of a byte slice
    #[must_use]
    pub fn from_data(data: &[u8]) -> Self {
        Self::from_bytes(*blake3::hash(data).as_bytes())
    }

    /// Hash a sequence of labelled parts without ambiguity between
    /// `["ab", "c"]` and `["a", "bc"]`.
    #[must_use]
    pub fn from_parts<'a>(parts: impl IntoIterator<Item = &'a [u8]>) -> Self {
        let mut hasher = Hasher::new();
        for part in parts {
            hasher.update(&(part.len() as u64).to_le_bytes());
            hasher.update(part);
        }
        Self::from_bytes(*hasher.finalize().as_bytes())
    }

    /// Compute hash of a file
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or read.
    pub async fn hash_file(path: &Path) -> Result<Self, Error> {
        let mut file = File::open(path)
            .await
            .map_err(|e| StorageError::from_io_with_path(&e, path))?;

        let mut hasher = Hasher::new();
        let mut buffer = vec![0; CHUNK_SIZE];

        loop {
            let n = file.read(&mut buffer).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
        }

        Ok(Self::from_bytes(*hasher.finalize().as_bytes()))
    }

    /// Compute hash while copying data to a writer
    ///
    /// # Errors
    /// Returns an error if reading from the reader or writing to the writer fails.
    pub async fn hash_and_copy<R, W>(mut reader: R, mut writer: W) -> Result<(Self, u64), Error>
    where
        R: AsyncReadExt + Unpin,
        W: AsyncWriteExt + Unpin,
    {
        let mut hasher = Hasher::new();
        let mut buffer = vec![0; CHUNK_SIZE];
        let mut total_bytes = 0u64;

        loop {
            let n = reader.read(&mut buffer).await?;
            if n == 0 {
                break;
            }

            hasher.update(&buffer[..n]);
            writer.write_all(&buffer[..n]).await?;
            total_bytes += n as u64;
        }

        writer.flush().await?;
        Ok((Self::from_bytes(*hasher.finalize().as_bytes()), total_bytes))
    }

    /// First twelve hex characters, for log lines and directory names
    #[must_use]
    pub fn short(&self) -> String {
        self.to_hex()[..12].to_string()
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Serialize for Hash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Create a content-addressed relative path from a hash
#[must_use]
pub fn content_path(hash: &Hash) -> String {
    let hex = hash.to_hex();
    // two-character fan-out keeps directories small
    format!("{}/{}", &hex[..2], &hex[2..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn known_blake3_value() {
        let hash = Hash::from_data(b"hello world");
        assert_eq!(
            hash.to_hex(),
            "d74981efa70a0c880b8d8c1985d075dbcbf679b99a5f9914e5aaf96b831a9e24"
        );
    }

    #[test]
    fn serializes_as_hex() {
        let hash = Hash::from_data(b"test");
        let json = serde_json::to_string(&hash).unwrap();
        assert_eq!(json, format!("\"{}\"", hash.to_hex()));
        let back: Hash = serde_json::from_str(&json).unwrap();
        assert_eq!(hash, back);
    }

    #[test]
    fn from_hex_rejects_wrong_length() {
        assert!(Hash::from_hex("abcd").is_err());
        assert!(Hash::from_hex("zz").is_err());
    }

    #[test]
    fn parts_are_length_prefixed() {
        let a = Hash::from_parts([b"ab".as_slice(), b"c".as_slice()]);
        let b = Hash::from_parts([b"a".as_slice(), b"bc".as_slice()]);
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn file_hash_matches_data_hash() {
        let mut temp = NamedTempFile::new().unwrap();
        temp.write_all(b"test file content").unwrap();

        let from_file = Hash::hash_file(temp.path()).await.unwrap();
        assert_eq!(from_file, Hash::from_data(b"test file content"));
    }

    #[tokio::test]
    async fn hash_and_copy_counts_bytes() {
        let data = vec![7u8; CHUNK_SIZE + 10];
        let mut out = Vec::new();
        let (hash, n) = Hash::hash_and_copy(data.as_slice(), &mut out).await.unwrap();
        assert_eq!(n, data.len() as u64);
        assert_eq!(out, data);
        assert_eq!(hash, Hash::from_data(&data));
    }

    #[test]
    fn content_path_fans_out() {
        let hash = Hash::from_data(b"x");
        let path = content_path(&hash);
        assert_eq!(&path[..3], &format!("{}/", &hash.to_hex()[..2]));
        assert_eq!(path.len(), 65);
    }
}
