//! Upstream release metadata and artifact retrieval.
//!
//! Tools are installed from pinned release tags. Metadata comes from a
//! fixed per-tool "release by tag" endpoint; assets are selected by
//! platform and architecture tokens in the asset name. Downloads buffer
//! the response to completion before returning.

use std::future::Future;
use std::pin::Pin;
use std::sync::LazyLock;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;
use thiserror::Error;

use crate::machine::Arch;

const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const GITHUB_API_BASE: &str = "https://api.github.com";
const GITHUB_ACCEPT: &str = "application/vnd.github.v3+json";

static HTTP_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .timeout(DEFAULT_HTTP_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
});

/// Release metadata for one pinned tag.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
pub struct Release {
    /// Downloadable assets attached to the release.
    #[serde(default)]
    pub assets: Vec<ReleaseAsset>,
}

/// One downloadable asset in a release.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct ReleaseAsset {
    /// File name of the asset.
    pub name: String,
    /// Direct download location.
    pub browser_download_url: String,
}

/// Errors raised while resolving or retrieving release artifacts.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ReleaseError {
    /// Raised when the request never completes (DNS, TLS, connect).
    #[error("release request failed: {message}")]
    Request {
        /// Transport error message.
        message: String,
    },
    /// Raised when the endpoint answers with a non-success status.
    #[error("release endpoint returned HTTP {status}")]
    HttpStatus {
        /// Status code returned by the endpoint.
        status: u16,
    },
    /// Raised when the response body is not the expected JSON shape.
    #[error("release metadata could not be decoded: {message}")]
    Decode {
        /// Decoder error message.
        message: String,
    },
    /// Raised when a downloaded artifact cannot be written out.
    #[error("failed to write {path}: {message}")]
    Io {
        /// Destination that could not be written.
        path: Utf8PathBuf,
        /// Operating system error message.
        message: String,
    },
    /// Raised when no asset matches the requested platform and
    /// architecture. Carries the tokens that were searched for so the
    /// cause is visible without string parsing.
    #[error("no {tool} asset matches platform `{platform_token}` and architectures {arch_tokens:?}")]
    NoMatchingAsset {
        /// Tool whose release was searched.
        tool: String,
        /// Platform token that asset names were required to contain.
        platform_token: String,
        /// Architecture tokens that were accepted.
        arch_tokens: Vec<&'static str>,
    },
}

/// Future returned by release source operations.
pub type ReleaseFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ReleaseError>> + Send + 'a>>;

/// Abstraction over the release endpoint to support fakes in tests.
pub trait ReleaseSource: Send + Sync {
    /// Fetches release metadata for `repo` at the pinned `tag`.
    ///
    /// # Errors
    ///
    /// Returns [`ReleaseError::Request`], [`ReleaseError::HttpStatus`], or
    /// [`ReleaseError::Decode`] depending on where retrieval failed.
    fn fetch_release<'a>(&'a self, repo: &'a str, tag: &'a str) -> ReleaseFuture<'a, Release>;

    /// Downloads `url` and materialises it at `dest`.
    ///
    /// # Errors
    ///
    /// Returns the same retrieval errors as
    /// [`ReleaseSource::fetch_release`], or [`ReleaseError::Io`] when the
    /// artifact cannot be written.
    fn download<'a>(&'a self, url: &'a str, dest: &'a Utf8Path) -> ReleaseFuture<'a, ()>;
}

/// Release source backed by the GitHub releases API.
#[derive(Clone, Debug)]
pub struct GithubReleases {
    api_base: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl Default for GithubReleases {
    fn default() -> Self {
        Self::new()
    }
}

impl GithubReleases {
    /// Creates a source pointing at the public GitHub API with the
    /// default request bound.
    #[must_use]
    pub fn new() -> Self {
        Self {
            api_base: GITHUB_API_BASE.to_owned(),
            timeout: DEFAULT_HTTP_TIMEOUT,
            client: HTTP_CLIENT.clone(),
        }
    }

    /// Overrides the per-request timeout, rebuilding the client with the
    /// new bound.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self.client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        self
    }

    /// Returns the bound applied to each request.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Overrides the API base URL. Used by tests to point at a stub
    /// server.
    #[must_use]
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into();
        self
    }
}

impl ReleaseSource for GithubReleases {
    fn fetch_release<'a>(&'a self, repo: &'a str, tag: &'a str) -> ReleaseFuture<'a, Release> {
        Box::pin(async move {
            let url = format!("{}/repos/{repo}/releases/tags/{tag}", self.api_base);
            let response = self
                .client
                .get(&url)
                .header(reqwest::header::ACCEPT, GITHUB_ACCEPT)
                .send()
                .await
                .map_err(|err| ReleaseError::Request {
                    message: err.to_string(),
                })?;
            let status = response.status();
            if !status.is_success() {
                return Err(ReleaseError::HttpStatus {
                    status: status.as_u16(),
                });
            }
            response
                .json::<Release>()
                .await
                .map_err(|err| ReleaseError::Decode {
                    message: err.to_string(),
                })
        })
    }

    fn download<'a>(&'a self, url: &'a str, dest: &'a Utf8Path) -> ReleaseFuture<'a, ()> {
        Box::pin(async move {
            let response =
                self.client
                    .get(url)
                    .send()
                    .await
                    .map_err(|err| ReleaseError::Request {
                        message: err.to_string(),
                    })?;
            let status = response.status();
            if !status.is_success() {
                return Err(ReleaseError::HttpStatus {
                    status: status.as_u16(),
                });
            }
            let body = response.bytes().await.map_err(|err| ReleaseError::Request {
                message: err.to_string(),
            })?;
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent).map_err(|err| ReleaseError::Io {
                    path: dest.to_path_buf(),
                    message: err.to_string(),
                })?;
            }
            std::fs::write(dest, &body).map_err(|err| ReleaseError::Io {
                path: dest.to_path_buf(),
                message: err.to_string(),
            })
        })
    }
}

/// Architecture tokens accepted in asset names for `arch`.
#[must_use]
pub const fn arch_tokens(arch: Arch) -> &'static [&'static str] {
    match arch {
        Arch::Arm64 => &["arm64"],
        Arch::X86_64 => &["x86_64", "amd64"],
    }
}

/// Selects the asset whose name contains both the platform token and one
/// of the accepted architecture tokens.
///
/// # Errors
///
/// Returns [`ReleaseError::NoMatchingAsset`] naming the searched tokens
/// when nothing matches; the wrong asset is never picked silently.
pub fn select_asset<'a>(
    release: &'a Release,
    tool: &str,
    platform_token: &str,
    arch: Arch,
) -> Result<&'a ReleaseAsset, ReleaseError> {
    let tokens = arch_tokens(arch);
    release
        .assets
        .iter()
        .find(|asset| {
            let name = asset.name.to_ascii_lowercase();
            name.contains(platform_token) && tokens.iter().any(|token| name.contains(token))
        })
        .ok_or_else(|| ReleaseError::NoMatchingAsset {
            tool: tool.to_owned(),
            platform_token: platform_token.to_owned(),
            arch_tokens: tokens.to_vec(),
        })
}
