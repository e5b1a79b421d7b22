use std::fs;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tempfile::tempdir;

use crate::module_system::integrity::ContentHash;
use crate::module_system::manifest::ModuleSource;
use crate::module_system::release::{ChecksumVerification, GitHubReleaseClient, ReleaseSource};

use super::common::MockReleaseSource;

#[test]
fn test_client_rejects_invalid_token_header() {
    let result = GitHubReleaseClient::new(
        "https://api.github.com",
        Some("bad\ntoken"),
        Duration::from_secs(5),
        Duration::from_secs(60),
    );
    assert!(result.is_err());
}

#[test]
fn test_client_builds_without_token() {
    let client = GitHubReleaseClient::new("https://api.github.com/", None, Duration::from_secs(5), Duration::from_secs(60));
    assert!(client.is_ok());
}

#[tokio::test]
async fn test_verify_checksum_without_url_is_skipped() {
    let dir = tempdir().unwrap();
    let archive = dir.path().join("blog.zip");
    fs::write(&archive, b"payload").unwrap();

    let source = MockReleaseSource::new();
    let repo = ModuleSource::new("acme", "blog");
    source.publish(&repo, "1.1.0", &archive, None);
    let release = source.latest_release(&repo, false).await.unwrap().unwrap();

    let outcome = source.verify_checksum(&release, &archive).await.unwrap();
    assert_eq!(outcome, ChecksumVerification::Skipped);
    assert_eq!(source.checksum_fetches.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_verify_checksum_match_and_mismatch() {
    let dir = tempdir().unwrap();
    let archive = dir.path().join("blog.zip");
    fs::write(&archive, b"payload").unwrap();

    let source = MockReleaseSource::new();
    let repo = ModuleSource::new("acme", "blog");
    source.publish(&repo, "1.1.0", &archive, Some(ContentHash::compute(b"payload")));
    let release = source.latest_release(&repo, false).await.unwrap().unwrap();
    assert_eq!(
        source.verify_checksum(&release, &archive).await.unwrap(),
        ChecksumVerification::Verified
    );

    fs::write(&archive, b"tampered").unwrap();
    match source.verify_checksum(&release, &archive).await.unwrap() {
        ChecksumVerification::Mismatch { expected, actual } => {
            assert_eq!(expected, ContentHash::compute(b"payload").to_string());
            assert_eq!(actual, ContentHash::compute(b"tampered").to_string());
        }
        other => panic!("expected mismatch, got {other:?}"),
    }
}

#[tokio::test]
async fn test_batch_lookup_reports_each_source() {
    let dir = tempdir().unwrap();
    let archive = dir.path().join("blog.zip");
    fs::write(&archive, b"payload").unwrap();

    let source = MockReleaseSource::new();
    let blog = ModuleSource::new("acme", "blog");
    let shop = ModuleSource::new("acme", "shop");
    source.publish(&blog, "2.0.0", &archive, None);

    let results = source.latest_releases(&[blog.clone(), shop.clone()], false).await;
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].0, blog);
    assert_eq!(results[0].1.as_ref().unwrap().as_ref().unwrap().version, "2.0.0");
    assert!(results[1].1.as_ref().unwrap().is_none());
}

#[tokio::test]
async fn test_prerelease_filtering() {
    let dir = tempdir().unwrap();
    let archive = dir.path().join("blog.zip");
    fs::write(&archive, b"payload").unwrap();

    let source = MockReleaseSource::new();
    let repo = ModuleSource::new("acme", "blog");
    source.publish(&repo, "2.0.0-beta.1", &archive, None);

    assert!(source.latest_release(&repo, false).await.unwrap().is_none());
    let beta = source.latest_release(&repo, true).await.unwrap().unwrap();
    assert!(beta.prerelease);
    assert_eq!(beta.parsed_version().unwrap().to_string(), "2.0.0-beta.1");
}
