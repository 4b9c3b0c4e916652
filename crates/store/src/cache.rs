//! Build cache: `(recipe, configuration, source checksum)` → artifact
//!
//! The cache is an injected service rather than ambient state. Entries are
//! write-once: the first `put` for a key is kept and later puts return it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use kiln_errors::{Error, StorageError};
use kiln_hash::Hash;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Identity of one build
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    /// `name@version`
    pub recipe: String,
    /// Digest of the resolved configuration, triples and dependency outputs
    pub config: Hash,
    /// Declared source checksum, if the recipe has a source
    pub checksum: Option<String>,
}

impl CacheKey {
    #[must_use]
    pub fn digest(&self) -> Hash {
        Hash::from_parts([
            self.recipe.as_bytes(),
            self.config.as_bytes().as_slice(),
            self.checksum.as_deref().unwrap_or("").as_bytes(),
        ])
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub artifact: Hash,
    pub created_at: DateTime<Utc>,
}

impl CacheEntry {
    #[must_use]
    pub fn new(key: CacheKey, artifact: Hash) -> Self {
        Self {
            key,
            artifact,
            created_at: Utc::now(),
        }
    }
}

/// Held while a key is being built; dropping it releases the key
#[derive(Debug)]
pub struct CacheGuard {
    guard: Option<OwnedMutexGuard<()>>,
    mutex: Arc<Mutex<()>>,
    key: Hash,
    locks: LockTable,
}

impl Drop for CacheGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        // the table and this guard are the only holders once nobody waits
        self.locks
            .remove_if(&self.key, |_, mutex| Arc::ptr_eq(mutex, &self.mutex) && Arc::strong_count(mutex) == 2);
    }
}

#[async_trait]
pub trait BuildCache: Send + Sync {
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, Error>;

    /// Record an entry unless one exists; returns the entry that is kept
    async fn put(&self, entry: CacheEntry) -> Result<CacheEntry, Error>;

    /// Per-key mutual exclusion
    async fn lock(&self, key: &CacheKey) -> Result<CacheGuard, Error>;
}

type LockTable = Arc<DashMap<Hash, Arc<Mutex<()>>>>;

#[derive(Debug, Default)]
struct KeyLocks(LockTable);

impl KeyLocks {
    async fn lock(&self, key: &CacheKey) -> CacheGuard {
        let key = key.digest();
        let mutex = self.0.entry(key).or_default().clone();
        let guard = Arc::clone(&mutex).lock_owned().await;
        CacheGuard {
            guard: Some(guard),
            mutex,
            key,
            locks: Arc::clone(&self.0),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.0.len()
    }
}

/// In-memory cache, mainly for tests and one-shot sessions
#[derive(Debug, Default)]
pub struct MemoryBuildCache {
    entries: DashMap<Hash, CacheEntry>,
    locks: KeyLocks,
}

impl MemoryBuildCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl BuildCache for MemoryBuildCache {
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, Error> {
        Ok(self.entries.get(&key.digest()).map(|e| e.value().clone()))
    }

    async fn put(&self, entry: CacheEntry) -> Result<CacheEntry, Error> {
        Ok(self
            .entries
            .entry(entry.key.digest())
            .or_insert(entry)
            .value()
            .clone())
    }

    async fn lock(&self, key: &CacheKey) -> Result<CacheGuard, Error> {
        Ok(self.locks.lock(key).await)
    }
}

/// Cache persisted as one JSON file per key
#[derive(Debug)]
pub struct FsBuildCache {
    dir: PathBuf,
    locks: KeyLocks,
}

impl FsBuildCache {
    /// Open a cache directory, creating it if needed
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, Error> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| StorageError::from_io_with_path(&e, &dir))?;
        Ok(Self {
            dir,
            locks: KeyLocks::default(),
        })
    }

    fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(format!("{}.json", key.digest().to_hex()))
    }

    async fn read(path: PathBuf) -> Result<Option<CacheEntry>, Error> {
        match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(|e| {
                StorageError::CorruptedData {
                    message: format!("{}: {e}", path.display()),
                }
                .into()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::from_io_with_path(&e, &path).into()),
        }
    }
}

#[async_trait]
impl BuildCache for FsBuildCache {
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, Error> {
        Self::read(self.entry_path(key)).await
    }

    async fn put(&self, entry: CacheEntry) -> Result<CacheEntry, Error> {
        let path = self.entry_path(&entry.key);
        let dir = self.dir.clone();
        let bytes = serde_json::to_vec_pretty(&entry)?;

        let target = path.clone();
        let written = tokio::task::spawn_blocking(move || -> std::io::Result<bool> {
            let mut temp = tempfile::NamedTempFile::new_in(&dir)?;
            temp.write_all(&bytes)?;
            temp.as_file().sync_all()?;
            match temp.persist_noclobber(&target) {
                Ok(_) => Ok(true),
                Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
                Err(e) => Err(e.error),
            }
        })
        .await
        .map_err(|e| Error::internal(format!("cache writer panicked: {e}")))?
        .map_err(|e| StorageError::from_io_with_path(&e, &path))?;

        if written {
            Ok(entry)
        } else {
            Self::read(path)
                .await?
                .ok_or_else(|| Error::internal("cache entry vanished after write conflict"))
        }
    }

    async fn lock(&self, key: &CacheKey) -> Result<CacheGuard, Error> {
        Ok(self.locks.lock(key).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn key(config: &[u8]) -> CacheKey {
        CacheKey {
            recipe: "zlib@1.3.1".into(),
            config: Hash::from_data(config),
            checksum: Some("sha256:00".into()),
        }
    }

    async fn write_once<C: BuildCache>(cache: &C) {
        let k = key(b"a");
        assert!(cache.get(&k).await.unwrap().is_none());

        let first = cache
            .put(CacheEntry::new(k.clone(), Hash::from_data(b"first")))
            .await
            .unwrap();
        let second = cache
            .put(CacheEntry::new(k.clone(), Hash::from_data(b"second")))
            .await
            .unwrap();
        assert_eq!(first.artifact, Hash::from_data(b"first"));
        assert_eq!(second, first);
        assert_eq!(cache.get(&k).await.unwrap(), Some(first));
        assert!(cache.get(&key(b"b")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn memory_cache_is_write_once() {
        write_once(&MemoryBuildCache::new()).await;
    }

    #[tokio::test]
    async fn fs_cache_is_write_once_and_persistent() {
        let temp = tempfile::tempdir().unwrap();
        let cache = FsBuildCache::open(temp.path().join("cache")).await.unwrap();
        write_once(&cache).await;

        let reopened = FsBuildCache::open(temp.path().join("cache")).await.unwrap();
        let entry = reopened.get(&key(b"a")).await.unwrap().unwrap();
        assert_eq!(entry.artifact, Hash::from_data(b"first"));
    }

    #[test]
    fn key_digest_covers_every_field() {
        let base = key(b"a");
        let mut other = base.clone();
        other.checksum = None;
        assert_ne!(base.digest(), other.digest());
        let mut other = base.clone();
        other.recipe = "zlib@1.3.2".into();
        assert_ne!(base.digest(), other.digest());
        assert_ne!(base.digest(), key(b"b").digest());
    }

    #[tokio::test]
    async fn lock_is_per_key() {
        let cache = Arc::new(MemoryBuildCache::new());
        let held = cache.lock(&key(b"a")).await.unwrap();

        // a different key is not blocked
        let _other = tokio::time::timeout(Duration::from_secs(1), cache.lock(&key(b"b")))
            .await
            .expect("other key should lock immediately")
            .unwrap();

        let waiter = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.lock(&key(b"a")).await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());
        drop(held);
        waiter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn released_locks_are_forgotten() {
        let cache = Arc::new(MemoryBuildCache::new());
        let held = cache.lock(&key(b"a")).await.unwrap();
        let waiter = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.lock(&key(b"a")).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(held);
        // a queued waiter keeps the entry alive
        let next = waiter.await.unwrap().unwrap();
        assert_eq!(cache.locks.len(), 1);
        drop(next);
        assert_eq!(cache.locks.len(), 0);

        for i in 0..16u8 {
            drop(cache.lock(&key(&[i])).await.unwrap());
        }
        assert_eq!(cache.locks.len(), 0);
    }
}
