//! Fetch cache: verified sources as content-addressed directories
//!
//! Layout under the store root:
//!
//! ```text
//! downloads/<sha256>     verified raw bytes
//! fetch/<key>.json       (url, checksum, mode, unwrap) -> artifact hash
//! ```
//!
//! Concurrent fetches of the same key inside one process share a single
//! download. An index record is written only after verification and
//! storage succeed, so a failed fetch is never observable.

use crate::client::NetClient;
use crate::download::Download;
use crate::extract::{self, ArchiveFormat};
use crate::source::SourceSpec;
use dashmap::DashMap;
use kiln_config::NetworkConfig;
use kiln_errors::{Error, StorageError};
use kiln_events::{AppEvent, EventEmitter, FetchEvent};
use kiln_hash::{Checksum, Hash};
use kiln_store::ArtifactStore;
use kiln_types::FetchMode;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::OnceCell;
use url::Url;

const DOWNLOADS_DIR: &str = "downloads";
const INDEX_DIR: &str = "fetch";

/// A fetched and verified source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fetched {
    pub url: String,
    pub checksum: Checksum,
    pub artifact: Hash,
    /// Store path of the artifact directory
    pub path: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
struct IndexRecord {
    url: String,
    checksum: Checksum,
    mode: FetchMode,
    unwrap: bool,
    artifact: Hash,
}

/// Downloads, verifies and caches sources
#[derive(Debug)]
pub struct Fetcher {
    client: NetClient,
    network: NetworkConfig,
    store: ArtifactStore,
    downloads: PathBuf,
    index: PathBuf,
    inflight: DashMap<Hash, Arc<OnceCell<Fetched>>>,
}

impl Fetcher {
    /// # Errors
    ///
    /// Returns an error if the cache directories cannot be created.
    pub async fn new(
        client: NetClient,
        network: NetworkConfig,
        store: ArtifactStore,
    ) -> Result<Self, Error> {
        let downloads = store.root().join(DOWNLOADS_DIR);
        let index = store.root().join(INDEX_DIR);
        for dir in [&downloads, &index] {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| StorageError::from_io_with_path(&e, dir))?;
        }
        Ok(Self {
            client,
            network,
            store,
            downloads,
            index,
            inflight: DashMap::new(),
        })
    }

    #[must_use]
    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Cached result for `spec`, without touching the network
    ///
    /// # Errors
    ///
    /// Returns an error if the URL cannot be resolved or the index is corrupt.
    pub async fn lookup(&self, spec: &SourceSpec) -> Result<Option<Fetched>, Error> {
        let url = spec.resolve_url(&self.network)?;
        self.lookup_key(&cache_key(&url, spec)).await
    }

    /// Fetch `spec`, serving repeats from the cache
    ///
    /// # Errors
    ///
    /// Returns `ChecksumMismatch` if the bytes differ from the declared
    /// checksum, or a network, extraction or storage error.
    pub async fn fetch<E: EventEmitter>(
        &self,
        spec: &SourceSpec,
        events: &E,
    ) -> Result<Fetched, Error> {
        let url = spec.resolve_url(&self.network)?;
        let key = cache_key(&url, spec);
        let cell = Arc::clone(&self.inflight.entry(key).or_default());
        let result = cell
            .get_or_try_init(|| self.fetch_uncached(&url, key, spec, events))
            .await
            .cloned();
        // last caller out drops the entry; the index serves later fetches
        self.inflight
            .remove_if(&key, |_, held| Arc::ptr_eq(held, &cell) && Arc::strong_count(held) == 2);
        result
    }

    async fn fetch_uncached<E: EventEmitter>(
        &self,
        url: &Url,
        key: Hash,
        spec: &SourceSpec,
        events: &E,
    ) -> Result<Fetched, Error> {
        if let Some(hit) = self.lookup_key(&key).await? {
            events.emit(AppEvent::Fetch(FetchEvent::CacheHit {
                url: hit.url.clone(),
                checksum: hit.checksum.to_string(),
            }));
            return Ok(hit);
        }

        let raw = self.download(url, &spec.checksum, events).await?;

        let staging = self.store.staging_dir("fetch")?;
        let tree = staging.path().join("tree");
        let root = match spec.mode {
            FetchMode::Extract => {
                let format = ArchiveFormat::detect(&raw, &file_name(url)).await?;
                extract::extract(&raw, format, &tree).await?;
                if spec.unwrap {
                    extract::unwrap_single_dir(&tree).await?
                } else {
                    tree
                }
            }
            FetchMode::Raw => {
                tokio::fs::create_dir_all(&tree)
                    .await
                    .map_err(|e| Error::io_with_path(&e, &tree))?;
                let target = tree.join(file_name(url));
                tokio::fs::copy(&raw, &target)
                    .await
                    .map_err(|e| Error::io_with_path(&e, &target))?;
                tree
            }
        };
        let stored = self.store.insert_tree(&root).await?;
        drop(staging);

        let record = IndexRecord {
            url: url.to_string(),
            checksum: spec.checksum,
            mode: spec.mode,
            unwrap: spec.unwrap,
            artifact: stored.hash,
        };
        self.write_record(&key, &record).await?;

        events.emit(AppEvent::Fetch(FetchEvent::Extracted {
            url: record.url.clone(),
            artifact: stored.hash.to_hex(),
        }));

        Ok(Fetched {
            url: record.url,
            checksum: record.checksum,
            artifact: stored.hash,
            path: stored.path,
        })
    }

    /// Verified raw bytes for `url`, reusing an earlier download
    async fn download<E: EventEmitter>(
        &self,
        url: &Url,
        checksum: &Checksum,
        events: &E,
    ) -> Result<PathBuf, Error> {
        let dest = self.downloads.join(checksum.hex());
        if tokio::fs::try_exists(&dest).await.unwrap_or(false)
            && Checksum::sha256_file(&dest).await? == *checksum
        {
            events.emit(AppEvent::Fetch(FetchEvent::CacheHit {
                url: url.to_string(),
                checksum: checksum.to_string(),
            }));
            return Ok(dest);
        }

        Download::from_url(url.clone())
            .execute(&self.client, &dest, checksum, events)
            .await?;
        Ok(dest)
    }

    async fn lookup_key(&self, key: &Hash) -> Result<Option<Fetched>, Error> {
        let path = self.record_path(key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::from_io_with_path(&e, &path).into()),
        };
        let record: IndexRecord =
            serde_json::from_slice(&bytes).map_err(|e| StorageError::CorruptedData {
                message: format!("{}: {e}", path.display()),
            })?;

        // the artifact may have been removed from the store by hand
        if !self.store.contains(&record.artifact).await {
            return Ok(None);
        }
        Ok(Some(Fetched {
            path: self.store.artifact_path(&record.artifact),
            url: record.url,
            checksum: record.checksum,
            artifact: record.artifact,
        }))
    }

    async fn write_record(&self, key: &Hash, record: &IndexRecord) -> Result<(), Error> {
        let path = self.record_path(key);
        let dir = self.index.clone();
        let bytes = serde_json::to_vec_pretty(record)?;
        let target = path.clone();
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let mut temp = tempfile::NamedTempFile::new_in(&dir)?;
            temp.write_all(&bytes)?;
            temp.persist(&target).map(|_| ()).map_err(|e| e.error)
        })
        .await
        .map_err(|e| Error::internal(format!("index writer panicked: {e}")))?
        .map_err(|e| StorageError::from_io_with_path(&e, &path).into())
    }

    fn record_path(&self, key: &Hash) -> PathBuf {
        self.index.join(format!("{}.json", key.to_hex()))
    }
}

fn cache_key(url: &Url, spec: &SourceSpec) -> Hash {
    let mode: &[u8] = match spec.mode {
        FetchMode::Raw => b"raw",
        FetchMode::Extract => b"extract",
    };
    let checksum = spec.checksum.to_string();
    Hash::from_parts([
        url.as_str().as_bytes(),
        checksum.as_bytes(),
        mode,
        &[u8::from(spec.unwrap)],
    ])
}

/// Last path segment of a URL, used for format detection and raw file names
fn file_name(url: &Url) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|name| !name.is_empty())
        .unwrap_or("download")
        .to_string()
}
