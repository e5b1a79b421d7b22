//! Remote release lookups (GitHub releases API) with a TTL cache.
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::kernel::constants::APP_VERSION;
use crate::module_system::integrity::{parse_checksum, ContentHash};
use crate::module_system::manifest::ModuleSource;
use crate::module_system::version::ModuleVersion;

#[derive(Debug, thiserror::Error)]
pub enum ReleaseError {
    #[error("Request to '{url}' failed: {message}")]
    Http { url: String, message: String },

    #[error("Request to '{url}' returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("Unexpected release data from '{url}': {message}")]
    Parse { url: String, message: String },

    #[error("No valid SHA-256 digest found at '{0}'")]
    InvalidChecksum(String),

    #[error("Failed to write download to '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A published release of a module
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseInfo {
    pub tag_name: String,
    /// Version parsed from the tag (leading `v` removed)
    pub version: String,
    pub name: Option<String>,
    pub body: Option<String>,
    pub prerelease: bool,
    pub published_at: Option<DateTime<Utc>>,
    /// ZIP asset, or the source zipball when the release has none
    pub download_url: String,
    /// `.sha256` asset, if published
    pub checksum_url: Option<String>,
}

impl ReleaseInfo {
    pub fn parsed_version(&self) -> Option<ModuleVersion> {
        ModuleVersion::parse(&self.version).ok()
    }
}

/// Outcome of checksum verification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChecksumVerification {
    Verified,
    /// The release publishes no checksum
    Skipped,
    Mismatch { expected: String, actual: String },
}

#[async_trait]
pub trait ReleaseSource: Send + Sync {
    /// Newest release of `owner/repo`. Prereleases are only considered when
    /// `include_prerelease` is set. `Ok(None)` when nothing is published.
    async fn latest_release(
        &self,
        source: &ModuleSource,
        include_prerelease: bool,
    ) -> Result<Option<ReleaseInfo>, ReleaseError>;

    /// Batch variant; one failing repository does not affect the others.
    async fn latest_releases(
        &self,
        sources: &[ModuleSource],
        include_prerelease: bool,
    ) -> Vec<(ModuleSource, Result<Option<ReleaseInfo>, ReleaseError>)> {
        let mut results = Vec::with_capacity(sources.len());
        for source in sources {
            let result = self.latest_release(source, include_prerelease).await;
            results.push((source.clone(), result));
        }
        results
    }

    /// Downloads the release asset to `dest`
    async fn download(&self, release: &ReleaseInfo, dest: &Path) -> Result<(), ReleaseError>;

    async fn fetch_checksum(&self, url: &str) -> Result<ContentHash, ReleaseError>;

    /// Compares `file` against the published checksum. No request is made
    /// when the release has no checksum URL.
    async fn verify_checksum(&self, release: &ReleaseInfo, file: &Path) -> Result<ChecksumVerification, ReleaseError> {
        let Some(url) = release.checksum_url.as_deref() else {
            return Ok(ChecksumVerification::Skipped);
        };
        let expected = self.fetch_checksum(url).await?;
        let path = file.to_path_buf();
        let actual = tokio::task::spawn_blocking(move || ContentHash::of_file(&path))
            .await
            .map_err(|e| ReleaseError::Io {
                path: file.to_path_buf(),
                source: std::io::Error::other(e),
            })?
            .map_err(|source| ReleaseError::Io {
                path: file.to_path_buf(),
                source,
            })?;

        if actual == expected {
            Ok(ChecksumVerification::Verified)
        } else {
            Ok(ChecksumVerification::Mismatch {
                expected: expected.to_string(),
                actual: actual.to_string(),
            })
        }
    }

    /// Drops cached lookups for one repository
    async fn invalidate(&self, source: &ModuleSource);
}

#[derive(Debug, Deserialize)]
struct GitHubAsset {
    name: String,
    browser_download_url: String,
}

#[derive(Debug, Deserialize)]
struct GitHubRelease {
    tag_name: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    prerelease: bool,
    #[serde(default)]
    draft: bool,
    #[serde(default)]
    published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    zipball_url: Option<String>,
    #[serde(default)]
    assets: Vec<GitHubAsset>,
}

impl GitHubRelease {
    fn into_release_info(self, url: &str) -> Result<ReleaseInfo, ReleaseError> {
        let parse_err = |message: String| ReleaseError::Parse {
            url: url.to_string(),
            message,
        };
        let version = ModuleVersion::parse(&self.tag_name).map_err(|e| parse_err(e.to_string()))?;

        let zip_asset = self
            .assets
            .iter()
            .find(|a| a.name.to_ascii_lowercase().ends_with(".zip"))
            .map(|a| a.browser_download_url.clone());
        let download_url = zip_asset
            .or(self.zipball_url)
            .ok_or_else(|| parse_err(format!("release '{}' has no downloadable archive", self.tag_name)))?;
        let checksum_url = self
            .assets
            .iter()
            .find(|a| {
                let name = a.name.to_ascii_lowercase();
                name.ends_with(".sha256") || name.ends_with(".sha256sum")
            })
            .map(|a| a.browser_download_url.clone());

        Ok(ReleaseInfo {
            tag_name: self.tag_name,
            version: version.to_string(),
            name: self.name,
            body: self.body,
            prerelease: self.prerelease,
            published_at: self.published_at,
            download_url,
            checksum_url,
        })
    }
}

type CacheKey = (String, bool);

/// GitHub releases API client.
///
/// Lookups are cached per `owner/repo` and prerelease policy for the
/// configured TTL.
#[derive(Debug)]
pub struct GitHubReleaseClient {
    client: Client,
    api_base: String,
    cache_ttl: Duration,
    cache: Mutex<HashMap<CacheKey, (Instant, Option<ReleaseInfo>)>>,
}

impl GitHubReleaseClient {
    pub fn new(
        api_base: &str,
        token: Option<&str>,
        timeout: Duration,
        cache_ttl: Duration,
    ) -> Result<Self, ReleaseError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("modkit/{}", APP_VERSION))
                .unwrap_or_else(|_| HeaderValue::from_static("modkit")),
        );
        if let Some(token) = token.filter(|t| !t.is_empty()) {
            let value = HeaderValue::from_str(&format!("Bearer {}", token)).map_err(|e| ReleaseError::Http {
                url: api_base.to_string(),
                message: format!("invalid token header: {}", e),
            })?;
            headers.insert(AUTHORIZATION, value);
        }

        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| ReleaseError::Http {
                url: api_base.to_string(),
                message: format!("failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            cache_ttl,
            cache: Mutex::new(HashMap::new()),
        })
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response, ReleaseError> {
        self.client.get(url).send().await.map_err(|e| ReleaseError::Http {
            url: url.to_string(),
            message: e.to_string(),
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<Option<T>, ReleaseError> {
        let response = self.get(url).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(ReleaseError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }
        response.json::<T>().await.map(Some).map_err(|e| ReleaseError::Parse {
            url: url.to_string(),
            message: e.to_string(),
        })
    }

    async fn fetch_latest(&self, source: &ModuleSource, include_prerelease: bool) -> Result<Option<ReleaseInfo>, ReleaseError> {
        if include_prerelease {
            let url = format!("{}/repos/{}/{}/releases?per_page=20", self.api_base, source.owner, source.repo);
            let releases: Vec<GitHubRelease> = self.get_json(&url).await?.unwrap_or_default();
            releases
                .into_iter()
                .find(|r| !r.draft)
                .map(|r| r.into_release_info(&url))
                .transpose()
        } else {
            let url = format!("{}/repos/{}/{}/releases/latest", self.api_base, source.owner, source.repo);
            let release: Option<GitHubRelease> = self.get_json(&url).await?;
            release.map(|r| r.into_release_info(&url)).transpose()
        }
    }
}

#[async_trait]
impl ReleaseSource for GitHubReleaseClient {
    async fn latest_release(
        &self,
        source: &ModuleSource,
        include_prerelease: bool,
    ) -> Result<Option<ReleaseInfo>, ReleaseError> {
        let key = (source.slug(), include_prerelease);
        if let Some((fetched_at, cached)) = self.cache.lock().await.get(&key) {
            if fetched_at.elapsed() < self.cache_ttl {
                log::debug!("Release cache hit for {}", source.slug());
                return Ok(cached.clone());
            }
        }

        log::debug!("Fetching latest release of {} (prerelease: {})", source.slug(), include_prerelease);
        let release = self.fetch_latest(source, include_prerelease).await?;
        self.cache.lock().await.insert(key, (Instant::now(), release.clone()));
        Ok(release)
    }

    async fn download(&self, release: &ReleaseInfo, dest: &Path) -> Result<(), ReleaseError> {
        let url = release.download_url.as_str();
        let mut response = self.get(url).await?;
        if !response.status().is_success() {
            return Err(ReleaseError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        let io_err = |source| ReleaseError::Io {
            path: dest.to_path_buf(),
            source,
        };
        let mut file = tokio::fs::File::create(dest).await.map_err(io_err)?;
        while let Some(chunk) = response.chunk().await.map_err(|e| ReleaseError::Http {
            url: url.to_string(),
            message: e.to_string(),
        })? {
            file.write_all(&chunk).await.map_err(io_err)?;
        }
        file.flush().await.map_err(io_err)?;
        log::info!("Downloaded {} to {}", url, dest.display());
        Ok(())
    }

    async fn fetch_checksum(&self, url: &str) -> Result<ContentHash, ReleaseError> {
        let response = self.get(url).await?;
        if !response.status().is_success() {
            return Err(ReleaseError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }
        let text = response.text().await.map_err(|e| ReleaseError::Http {
            url: url.to_string(),
            message: e.to_string(),
        })?;
        parse_checksum(&text).ok_or_else(|| ReleaseError::InvalidChecksum(url.to_string()))
    }

    async fn invalidate(&self, source: &ModuleSource) {
        let slug = source.slug();
        self.cache.lock().await.retain(|(key, _), _| *key != slug);
    }
}
