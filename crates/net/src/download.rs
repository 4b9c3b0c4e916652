//! Streaming download with checksum verification
//!
//! Bytes are hashed as they arrive and written to a temporary file next to
//! the destination. The destination only appears after the digest matches;
//! on mismatch the temporary file is removed and nothing is left behind.

use crate::client::NetClient;
use kiln_errors::{Error, NetworkError};
use kiln_events::{AppEvent, EventEmitter, FailureContext, FetchEvent};
use kiln_hash::{Checksum, Sha256Stream};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use url::Url;

const PROGRESS_STEP: u64 = 4 * 1024 * 1024;

/// A verified file on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadResult {
    pub path: PathBuf,
    pub checksum: Checksum,
    pub size: u64,
}

/// A single download of one URL
#[derive(Debug, Clone)]
pub struct Download {
    url: Url,
}

impl Download {
    /// # Errors
    ///
    /// Returns `InvalidUrl` if the URL cannot be parsed or uses an
    /// unsupported scheme.
    pub fn new(url: &str) -> Result<Self, Error> {
        Ok(Self {
            url: crate::source::parse_url(url)?,
        })
    }

    #[must_use]
    pub fn from_url(url: Url) -> Self {
        Self { url }
    }

    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Fetch the URL into `dest`, verifying it against `expected`
    ///
    /// # Errors
    ///
    /// Returns `ChecksumMismatch` if the digest differs, or a transport or
    /// I/O error if the bytes cannot be fetched or written.
    pub async fn execute<E: EventEmitter>(
        &self,
        client: &NetClient,
        dest: &Path,
        expected: &Checksum,
        events: &E,
    ) -> Result<DownloadResult, Error> {
        let result = self.fetch_verified(client, dest, expected, events).await;
        if let Err(error) = &result {
            events.emit(AppEvent::Fetch(FetchEvent::Failed {
                url: self.url.to_string(),
                failure: FailureContext::from_error(error),
            }));
        }
        result
    }

    async fn fetch_verified<E: EventEmitter>(
        &self,
        client: &NetClient,
        dest: &Path,
        expected: &Checksum,
        events: &E,
    ) -> Result<DownloadResult, Error> {
        let dir = dest
            .parent()
            .ok_or_else(|| Error::internal(format!("{} has no parent", dest.display())))?;
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| Error::io_with_path(&e, dir))?;

        let temp_path = tempfile::Builder::new()
            .prefix(".download-")
            .tempfile_in(dir)
            .map_err(|e| Error::io_with_path(&e, dir))?
            .into_temp_path();
        let mut file = tokio::fs::File::create(&temp_path).await?;

        let url = self.url.to_string();
        let mut hasher = Sha256Stream::new();
        let mut next_report = PROGRESS_STEP;
        let mut on_chunk = |chunk: &[u8], total: Option<u64>| {
            hasher.update(chunk);
            if hasher.len() >= next_report {
                next_report = hasher.len() + PROGRESS_STEP;
                events.emit(AppEvent::Fetch(FetchEvent::Progress {
                    url: url.clone(),
                    bytes: hasher.len(),
                    total_bytes: total,
                }));
            }
        };

        if self.url.scheme() == "file" {
            let source = self
                .url
                .to_file_path()
                .map_err(|()| NetworkError::InvalidUrl(url.clone()))?;
            let mut input = tokio::fs::File::open(&source)
                .await
                .map_err(|e| Error::io_with_path(&e, &source))?;
            let total = input.metadata().await.ok().map(|m| m.len());
            events.emit(AppEvent::Fetch(FetchEvent::Started {
                url: url.clone(),
                total_bytes: total,
            }));
            let mut buffer = vec![0u8; 64 * 1024];
            loop {
                let n = input.read(&mut buffer).await?;
                if n == 0 {
                    break;
                }
                on_chunk(&buffer[..n], total);
                file.write_all(&buffer[..n]).await?;
            }
            file.flush().await?;
        } else {
            let response = client.get(&url).await?;
            let total = response.content_length();
            events.emit(AppEvent::Fetch(FetchEvent::Started {
                url: url.clone(),
                total_bytes: total,
            }));
            client
                .stream_to(&url, response, &mut file, |chunk| on_chunk(chunk, total))
                .await?;
        }
        file.sync_all().await?;
        drop(file);

        let size = hasher.len();
        let actual = hasher.finish();
        if actual != *expected {
            // temp_path is removed on drop
            return Err(NetworkError::ChecksumMismatch {
                url,
                expected: expected.to_string(),
                actual: actual.to_string(),
            }
            .into());
        }

        temp_path
            .persist(dest)
            .map_err(|e| Error::io_with_path(&e.error, dest))?;

        events.emit(AppEvent::Fetch(FetchEvent::Verified {
            url,
            bytes: size,
            checksum: actual.to_string(),
        }));

        Ok(DownloadResult {
            path: dest.to_path_buf(),
            checksum: actual,
            size,
        })
    }
}
