#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Content-addressed storage for kiln
//!
//! Layout under the store root:
//!
//! ```text
//! artifacts/<aa>/<rest-of-hash>/   immutable directory trees
//! tmp/                             quarantined staging, never read by lookups
//! cache/                           build cache entries (see `FsBuildCache`)
//! ```
//!
//! Trees are addressed by [`kiln_hash::hash_directory`]. Inserting a tree
//! that already exists keeps the existing copy; a tree only becomes visible
//! under its final path through a single rename.

mod cache;
mod fs_util;

pub use cache::{BuildCache, CacheEntry, CacheGuard, CacheKey, FsBuildCache, MemoryBuildCache};
pub use fs_util::copy_tree;

use kiln_errors::{Error, StorageError};
use kiln_hash::{content_path, hash_directory, Hash};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const ARTIFACTS_DIR: &str = "artifacts";
const TMP_DIR: &str = "tmp";

/// A tree stored under its content hash
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredArtifact {
    pub hash: Hash,
    pub path: PathBuf,
}

/// Immutable directory store
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Open (and create if needed) a store rooted at `root`
    ///
    /// # Errors
    ///
    /// Returns an error if the store directories cannot be created.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, Error> {
        let root = root.into();
        for dir in [ARTIFACTS_DIR, TMP_DIR] {
            let path = root.join(dir);
            tokio::fs::create_dir_all(&path)
                .await
                .map_err(|e| StorageError::from_io_with_path(&e, &path))?;
        }
        Ok(Self { root })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn artifact_path(&self, hash: &Hash) -> PathBuf {
        self.root.join(ARTIFACTS_DIR).join(content_path(hash))
    }

    pub async fn contains(&self, hash: &Hash) -> bool {
        tokio::fs::try_exists(self.artifact_path(hash))
            .await
            .unwrap_or(false)
    }

    /// Look up a stored artifact
    ///
    /// # Errors
    ///
    /// Returns `ArtifactNotFound` if nothing is stored under `hash`.
    pub async fn get(&self, hash: &Hash) -> Result<StoredArtifact, Error> {
        if self.contains(hash).await {
            Ok(StoredArtifact {
                hash: *hash,
                path: self.artifact_path(hash),
            })
        } else {
            Err(StorageError::ArtifactNotFound {
                hash: hash.to_hex(),
            }
            .into())
        }
    }

    /// Create a quarantined staging directory on the store's filesystem.
    /// It is removed when dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn staging_dir(&self, label: &str) -> Result<TempDir, Error> {
        tempfile::Builder::new()
            .prefix(&format!("{label}-"))
            .tempdir_in(self.root.join(TMP_DIR))
            .map_err(|e| {
                StorageError::IoError {
                    message: format!("failed to create staging directory: {e}"),
                }
                .into()
            })
    }

    /// Move a finished tree into the store under its content hash
    ///
    /// `tree` is consumed: on success it no longer exists at its old path.
    /// If an identical tree is already stored, the existing one is kept.
    ///
    /// # Errors
    ///
    /// Returns an error if hashing or moving the tree fails.
    pub async fn insert_tree(&self, tree: &Path) -> Result<StoredArtifact, Error> {
        let hash = hash_directory(tree).await?;
        let dest = self.artifact_path(&hash);

        if self.contains(&hash).await {
            tokio::fs::remove_dir_all(tree).await.ok();
            return Ok(StoredArtifact { hash, path: dest });
        }

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::from_io_with_path(&e, parent))?;
        }

        // a tree outside the store may live on another filesystem
        let imported = !tree.starts_with(self.root.join(TMP_DIR));
        let source = if imported {
            let staging = self.staging_dir("import")?.keep();
            let copy = staging.join("tree");
            copy_tree(tree, &copy).await?;
            copy
        } else {
            tree.to_path_buf()
        };

        let renamed = tokio::fs::rename(&source, &dest).await;
        if imported {
            if let Some(parent) = source.parent() {
                tokio::fs::remove_dir_all(parent).await.ok();
            }
            tokio::fs::remove_dir_all(tree).await.ok();
        }
        match renamed {
            Ok(()) => {}
            Err(_) if self.contains(&hash).await => {
                // lost a race with an identical insert
                tokio::fs::remove_dir_all(&source).await.ok();
            }
            Err(e) => {
                return Err(StorageError::AtomicRenameFailed {
                    message: format!("{} -> {}: {e}", source.display(), dest.display()),
                }
                .into())
            }
        }

        Ok(StoredArtifact { hash, path: dest })
    }
}
