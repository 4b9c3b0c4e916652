use httpmock::prelude::*;
use kiln_config::NetworkConfig;
use kiln_errors::{Error, NetworkError};
use kiln_events::{AppEvent, FetchEvent};
use kiln_hash::Checksum;
use kiln_net::{Fetcher, NetClient, SourceSpec};
use kiln_store::ArtifactStore;
use kiln_types::{Compression, FetchMode};
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

fn tarball() -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (name, body) in [
        ("hello-1.0/configure", "#!/bin/sh\n"),
        ("hello-1.0/hello.c", "int main(void) { return 0; }\n"),
    ] {
        let mut header = tar::Header::new_gnu();
        header.set_size(body.len() as u64);
        header.set_mode(0o755);
        header.set_cksum();
        builder.append_data(&mut header, name, body.as_bytes()).unwrap();
    }
    builder.into_inner().unwrap()
}

async fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = async_compression::tokio::write::GzipEncoder::new(Vec::new());
    encoder.write_all(data).await.unwrap();
    encoder.shutdown().await.unwrap();
    encoder.into_inner()
}

async fn fetcher(root: &Path, network: NetworkConfig) -> Fetcher {
    let store = ArtifactStore::open(root).await.unwrap();
    Fetcher::new(NetClient::with_defaults().unwrap(), network, store)
        .await
        .unwrap()
}

#[tokio::test]
async fn repeat_fetch_is_served_from_cache() {
    let server = MockServer::start_async().await;
    let body = gzip(&tarball()).await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/hello-1.0.tar.gz");
            then.status(200).body(body.clone());
        })
        .await;

    let temp = tempfile::tempdir().unwrap();
    let spec = SourceSpec::url(server.url("/hello-1.0.tar.gz"), Checksum::sha256_of(&body));
    let (tx, mut rx) = kiln_events::channel();

    let first = fetcher(temp.path(), NetworkConfig::default())
        .await
        .fetch(&spec, &tx)
        .await
        .unwrap();
    assert!(first.path.join("hello.c").is_file());
    assert!(first.path.join("configure").is_file());

    // a fresh fetcher over the same store must not hit the network
    let again = fetcher(temp.path(), NetworkConfig::default()).await;
    assert_eq!(again.lookup(&spec).await.unwrap(), Some(first.clone()));
    let second = again.fetch(&spec, &tx).await.unwrap();
    assert_eq!(second, first);
    mock.assert_hits_async(1).await;

    let mut verified = 0;
    let mut cached = 0;
    while let Ok(message) = rx.try_recv() {
        match message.event {
            AppEvent::Fetch(FetchEvent::Verified { .. }) => verified += 1,
            AppEvent::Fetch(FetchEvent::CacheHit { .. }) => cached += 1,
            _ => {}
        }
    }
    assert_eq!(verified, 1);
    assert_eq!(cached, 1);
}

#[tokio::test]
async fn corrupted_checksum_is_fatal_and_not_cached() {
    let server = MockServer::start_async().await;
    let body = tarball();
    server
        .mock_async(|when, then| {
            when.method(GET).path("/hello-1.0.tar");
            then.status(200).body(body.clone());
        })
        .await;

    let temp = tempfile::tempdir().unwrap();
    let fetcher = fetcher(temp.path(), NetworkConfig::default()).await;
    let spec = SourceSpec::url(server.url("/hello-1.0.tar"), Checksum::sha256_of(b"tampered"));

    let err = fetcher.fetch(&spec, &None::<kiln_events::EventSender>).await.unwrap_err();
    match err {
        Error::Network(NetworkError::ChecksumMismatch { expected, actual, .. }) => {
            assert_eq!(expected, Checksum::sha256_of(b"tampered").to_string());
            assert_eq!(actual, Checksum::sha256_of(&body).to_string());
        }
        other => panic!("expected checksum mismatch, got {other:?}"),
    }
    assert_eq!(fetcher.lookup(&spec).await.unwrap(), None);

    let mut downloads = tokio::fs::read_dir(temp.path().join("downloads")).await.unwrap();
    assert!(downloads.next_entry().await.unwrap().is_none());
}

#[tokio::test]
async fn concurrent_identical_fetches_share_one_download() {
    let server = MockServer::start_async().await;
    let body = tarball();
    let mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/shared.tar");
            then.status(200)
                .delay(std::time::Duration::from_millis(100))
                .body(body.clone());
        })
        .await;

    let temp = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(fetcher(temp.path(), NetworkConfig::default()).await);
    let spec = SourceSpec::url(server.url("/shared.tar"), Checksum::sha256_of(&body));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let fetcher = Arc::clone(&fetcher);
        let spec = spec.clone();
        handles.push(tokio::spawn(async move {
            fetcher.fetch(&spec, &None::<kiln_events::EventSender>).await.unwrap()
        }));
    }
    let mut artifacts = Vec::new();
    for handle in handles {
        artifacts.push(handle.await.unwrap().artifact);
    }
    artifacts.dedup();
    assert_eq!(artifacts.len(), 1);
    mock.assert_hits_async(1).await;
}

#[tokio::test]
async fn gnu_convention_against_a_mirror() {
    let server = MockServer::start_async().await;
    let body = gzip(&tarball()).await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/gnu/hello/hello-1.0.tar.gz");
            then.status(200).body(body.clone());
        })
        .await;

    let temp = tempfile::tempdir().unwrap();
    let network = NetworkConfig {
        gnu_mirror: server.url("/gnu"),
        ..NetworkConfig::default()
    };
    let fetcher = fetcher(temp.path(), network).await;
    let spec = SourceSpec::gnu("hello", "1.0", Compression::Gz, Checksum::sha256_of(&body))
        .with_unwrap(false);

    let fetched = fetcher.fetch(&spec, &None::<kiln_events::EventSender>).await.unwrap();
    mock.assert_async().await;
    assert!(fetched.path.join("hello-1.0/hello.c").is_file());
}

#[tokio::test]
async fn raw_mode_keeps_the_file() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/tools/install.sh");
            then.status(200).body("echo hi\n");
        })
        .await;

    let temp = tempfile::tempdir().unwrap();
    let fetcher = fetcher(temp.path(), NetworkConfig::default()).await;
    let spec = SourceSpec::url(server.url("/tools/install.sh"), Checksum::sha256_of(b"echo hi\n"))
        .with_mode(FetchMode::Raw);

    let fetched = fetcher.fetch(&spec, &None::<kiln_events::EventSender>).await.unwrap();
    assert_eq!(
        tokio::fs::read_to_string(fetched.path.join("install.sh")).await.unwrap(),
        "echo hi\n"
    );
}

#[tokio::test]
async fn http_errors_surface() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/missing.tar");
            then.status(404);
        })
        .await;

    let temp = tempfile::tempdir().unwrap();
    let fetcher = fetcher(temp.path(), NetworkConfig::default()).await;
    let spec = SourceSpec::url(server.url("/missing.tar"), Checksum::sha256_of(b""));
    let err = fetcher.fetch(&spec, &None::<kiln_events::EventSender>).await.unwrap_err();
    assert!(matches!(
        err,
        Error::Network(NetworkError::HttpError { status: 404, .. })
    ));
}
