#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Source acquisition for kiln
//!
//! Resolves source conventions (raw URL, GNU mirror, GitHub) to concrete
//! URLs, downloads them once, verifies the SHA-256 checksum over the raw
//! bytes and turns the result into an immutable directory in the artifact
//! store. A checksum mismatch is always fatal and nothing is retried.

mod client;
mod download;
pub mod extract;
mod fetch;
mod source;

pub use client::{NetClient, NetConfig};
pub use download::{Download, DownloadResult};
pub use extract::ArchiveFormat;
pub use fetch::{Fetched, Fetcher};
pub use source::{parse_url, GithubSource, SourceLocation, SourceSpec};

use kiln_errors::Error;
use kiln_events::EventEmitter;
use kiln_hash::Checksum;
use std::path::Path;

/// Download a single file and verify it
///
/// # Errors
///
/// Returns an error if the URL is invalid, the download fails, or the
/// checksum does not match.
pub async fn download_file<E: EventEmitter>(
    client: &NetClient,
    url: &str,
    dest: &Path,
    checksum: &Checksum,
    events: &E,
) -> Result<DownloadResult, Error> {
    Download::new(url)?
        .execute(client, dest, checksum, events)
        .await
}
