// kmirror-common/src/config.rs
use std::env;

use tracing::debug;

use super::error::{KmError, Result};

const DEFAULT_API_BASE_URL: &str = "https://api.github.com";
const DEFAULT_UPLOAD_BASE_URL: &str = "https://uploads.github.com";
const DEFAULT_OWNER: &str = "thought-machine";
const DEFAULT_REPOSITORY: &str = "falco-probes";
const DEFAULT_PAGE_SIZE: u32 = 100;
// The GitHub API caps per_page at 100.
const MAX_PAGE_SIZE: u32 = 100;
/// Tags made of 40 hex characters are rejected by GitHub, so release tags are
/// derived from a prefix of the version key.
pub const DEFAULT_TAG_PREFIX_LEN: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub api_base_url: String,
    /// Host for asset uploads. Only used when a release carries no
    /// `upload_url` of its own.
    pub upload_base_url: String,
    pub owner: String,
    pub repository: String,
    pub github_token: Option<String>,
    pub page_size: u32,
    pub draft_releases: bool,
    pub tag_prefix_len: usize,
}

impl Config {
    pub fn load() -> Result<Self> {
        debug!("Loading kmirror configuration from environment");
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a configuration from an arbitrary key lookup. `load` uses the
    /// process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let api_base_url = non_empty("KMIRROR_GITHUB_API_URL")
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        // A custom API host (GitHub Enterprise, a local mock) serves uploads
        // itself unless told otherwise.
        let upload_base_url = non_empty("KMIRROR_GITHUB_UPLOAD_URL")
            .unwrap_or_else(|| {
                if api_base_url == DEFAULT_API_BASE_URL {
                    DEFAULT_UPLOAD_BASE_URL.to_string()
                } else {
                    api_base_url.clone()
                }
            })
            .trim_end_matches('/')
            .to_string();
        let owner = non_empty("KMIRROR_GITHUB_OWNER").unwrap_or_else(|| DEFAULT_OWNER.to_string());
        let repository =
            non_empty("KMIRROR_GITHUB_REPO").unwrap_or_else(|| DEFAULT_REPOSITORY.to_string());
        let github_token = non_empty("KMIRROR_GITHUB_TOKEN").or_else(|| non_empty("GITHUB_TOKEN"));

        let page_size = match non_empty("KMIRROR_PAGE_SIZE") {
            Some(raw) => raw.trim().parse::<u32>().map_err(|e| {
                KmError::Config(format!("KMIRROR_PAGE_SIZE '{raw}' is not a number: {e}"))
            })?,
            None => DEFAULT_PAGE_SIZE,
        };
        if page_size == 0 || page_size > MAX_PAGE_SIZE {
            return Err(KmError::Config(format!(
                "page size must be between 1 and {MAX_PAGE_SIZE}, got {page_size}"
            )));
        }

        debug!(
            "Configuration loaded: {}/{} via {} (token set: {})",
            owner,
            repository,
            api_base_url,
            github_token.is_some()
        );
        Ok(Self {
            api_base_url,
            upload_base_url,
            owner,
            repository,
            github_token,
            page_size,
            draft_releases: false,
            tag_prefix_len: DEFAULT_TAG_PREFIX_LEN,
        })
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.github_token = Some(token.into());
        self
    }

    pub fn with_repository(mut self, owner: impl Into<String>, repository: impl Into<String>) -> Self {
        self.owner = owner.into();
        self.repository = repository.into();
        self
    }

    /// Points both the API and the upload host at `url`.
    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into().trim_end_matches('/').to_string();
        self.upload_base_url = self.api_base_url.clone();
        self
    }

    pub fn with_draft_releases(mut self, draft: bool) -> Self {
        self.draft_releases = draft;
        self
    }

    pub fn repo_api_url(&self) -> String {
        format!(
            "{}/repos/{}/{}",
            self.api_base_url, self.owner, self.repository
        )
    }

    pub fn releases_url(&self) -> String {
        format!("{}/releases", self.repo_api_url())
    }

    pub fn release_assets_url(&self, release_id: u64) -> String {
        format!("{}/releases/{}/assets", self.repo_api_url(), release_id)
    }

    pub fn release_upload_url(&self, release_id: u64) -> String {
        format!(
            "{}/repos/{}/{}/releases/{}/assets",
            self.upload_base_url, self.owner, self.repository, release_id
        )
    }

    pub fn require_token(&self) -> Result<&str> {
        self.github_token.as_deref().ok_or_else(|| {
            KmError::Config(
                "no GitHub token configured (set KMIRROR_GITHUB_TOKEN or GITHUB_TOKEN)".to_string(),
            )
        })
    }
}
