//! Deterministic hashing of directory trees
//!
//! Two trees hash equal when they contain the same relative paths with the
//! same kinds, contents, symlink targets and executable bits. Timestamps and
//! ownership are ignored.

use crate::Hash;
use blake3::Hasher;
use kiln_errors::{Error, StorageError};
use std::path::{Path, PathBuf};

#[derive(Debug)]
enum Entry {
    Dir,
    File { hash: Hash, executable: bool },
    Symlink(String),
}

/// Hash every entry below `root`
///
/// # Errors
/// Returns an error if the tree cannot be walked or a file cannot be read.
pub async fn hash_directory(root: &Path) -> Result<Hash, Error> {
    let mut entries = collect(root).await?;
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    let mut hasher = Hasher::new();
    for (relative, entry) in &entries {
        hasher.update(relative.as_bytes());
        hasher.update(&[0]);
        match entry {
            Entry::Dir => {
                hasher.update(b"d");
            }
            Entry::File { hash, executable } => {
                hasher.update(if *executable { b"x" } else { b"f" });
                hasher.update(hash.as_bytes());
            }
            Entry::Symlink(target) => {
                hasher.update(b"l");
                hasher.update(target.as_bytes());
            }
        }
        hasher.update(&[0]);
    }
    Ok(Hash::from_bytes(*hasher.finalize().as_bytes()))
}

async fn collect(root: &Path) -> Result<Vec<(String, Entry)>, Error> {
    let mut out = Vec::new();
    let mut pending: Vec<PathBuf> = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut reader = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| StorageError::from_io_with_path(&e, &dir))?;
        while let Some(item) = reader.next_entry().await? {
            let path = item.path();
            let relative = path
                .strip_prefix(root)
                .map_err(|_| StorageError::InvalidPath {
                    path: path.display().to_string(),
                })?
                .to_string_lossy()
                .replace('\\', "/");
            let metadata = tokio::fs::symlink_metadata(&path).await?;

            let entry = if metadata.is_symlink() {
                let target = tokio::fs::read_link(&path).await?;
                Entry::Symlink(target.to_string_lossy().into_owned())
            } else if metadata.is_dir() {
                pending.push(path.clone());
                Entry::Dir
            } else {
                Entry::File {
                    hash: Hash::hash_file(&path).await?,
                    executable: is_executable(&metadata),
                }
            };
            out.push((relative, entry));
        }
    }
    Ok(out)
}

#[cfg(unix)]
fn is_executable(metadata: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_metadata: &std::fs::Metadata) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::fs;

    async fn sample(root: &Path) {
        fs::create_dir_all(root.join("bin")).await.unwrap();
        fs::write(root.join("bin/tool"), b"#!/bin/sh\n").await.unwrap();
        fs::write(root.join("README"), b"hi").await.unwrap();
    }

    #[tokio::test]
    async fn same_content_same_hash() {
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        sample(a.path()).await;
        sample(b.path()).await;
        assert_eq!(
            hash_directory(a.path()).await.unwrap(),
            hash_directory(b.path()).await.unwrap()
        );
    }

    #[tokio::test]
    async fn content_and_names_matter() {
        let a = TempDir::new().unwrap();
        sample(a.path()).await;
        let before = hash_directory(a.path()).await.unwrap();

        fs::write(a.path().join("README"), b"changed").await.unwrap();
        let changed = hash_directory(a.path()).await.unwrap();
        assert_ne!(before, changed);

        fs::rename(a.path().join("README"), a.path().join("README.md"))
            .await
            .unwrap();
        assert_ne!(changed, hash_directory(a.path()).await.unwrap());
    }

    #[tokio::test]
    async fn empty_directories_count() {
        let a = TempDir::new().unwrap();
        let empty = hash_directory(a.path()).await.unwrap();
        fs::create_dir(a.path().join("lib")).await.unwrap();
        assert_ne!(empty, hash_directory(a.path()).await.unwrap());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn executable_bit_matters() {
        use std::os::unix::fs::PermissionsExt;
        let a = TempDir::new().unwrap();
        sample(a.path()).await;
        let before = hash_directory(a.path()).await.unwrap();
        let tool = a.path().join("bin/tool");
        fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755))
            .await
            .unwrap();
        let after = hash_directory(a.path()).await.unwrap();
        // sample() leaves the default umask mode, which is not executable
        assert_ne!(before, after);
    }
}
