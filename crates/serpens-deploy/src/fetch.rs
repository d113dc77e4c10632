//! Config fetchers.
//!
//! A service's config lives at `services/<service>/serpens.yml` in the
//! repository that sent the webhook, on the configured branch.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::debug;

use crate::error::{FetchError, FetchResult};

pub const DEFAULT_BASE_URL: &str = "https://raw.githubusercontent.com";
pub const DEFAULT_BRANCH: &str = "main";

/// Retrieves the raw `serpens.yml` text for a service.
#[async_trait]
pub trait ConfigFetcher: Send + Sync {
    async fn fetch(&self, repository: &str, service: &str) -> FetchResult<String>;
}

/// Relative path of a service's config inside its repository.
pub fn config_path(service: &str) -> String {
    format!("services/{service}/serpens.yml")
}

fn is_path_segment(s: &str) -> bool {
    !s.is_empty()
        && s != "."
        && s != ".."
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

// ── GitHub raw content ─────────────────────────────────────────

/// Fetches configs over HTTP from a raw-content host.
#[derive(Debug, Clone)]
pub struct GitHubRawFetcher {
    client: Client,
    base_url: String,
    branch: String,
}

impl GitHubRawFetcher {
    pub fn new(base_url: impl Into<String>, branch: impl Into<String>) -> FetchResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("serpens/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            branch: branch.into(),
        })
    }

    /// URL of `service`'s config in `repository` (`owner/name`).
    pub fn url_for(&self, repository: &str, service: &str) -> FetchResult<String> {
        let valid_repo = repository
            .split_once('/')
            .is_some_and(|(owner, name)| is_path_segment(owner) && is_path_segment(name));
        if !valid_repo {
            return Err(FetchError::InvalidName(repository.to_string()));
        }
        if !is_path_segment(service) {
            return Err(FetchError::InvalidName(service.to_string()));
        }
        Ok(format!(
            "{}/{repository}/{}/{}",
            self.base_url,
            self.branch,
            config_path(service)
        ))
    }
}

#[async_trait]
impl ConfigFetcher for GitHubRawFetcher {
    async fn fetch(&self, repository: &str, service: &str) -> FetchResult<String> {
        let url = self.url_for(repository, service)?;
        debug!(%url, "fetching service config");

        let response = self.client.get(&url).send().await?;
        match response.status() {
            status if status.is_success() => Ok(response.text().await?),
            StatusCode::NOT_FOUND => Err(FetchError::NotFound {
                repository: repository.to_string(),
                service: service.to_string(),
            }),
            status => Err(FetchError::Status {
                url,
                status: status.as_u16(),
            }),
        }
    }
}

// ── In-memory ──────────────────────────────────────────────────

/// Serves configs from memory.
#[derive(Debug, Default)]
pub struct StaticConfigFetcher {
    configs: Mutex<HashMap<(String, String), String>>,
    fetches: AtomicUsize,
}

impl StaticConfigFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, repository: &str, service: &str, content: impl Into<String>) {
        self.configs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert((repository.to_string(), service.to_string()), content.into());
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConfigFetcher for StaticConfigFetcher {
    async fn fetch(&self, repository: &str, service: &str) -> FetchResult<String> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.configs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&(repository.to_string(), service.to_string()))
            .cloned()
            .ok_or_else(|| FetchError::NotFound {
                repository: repository.to_string(),
                service: service.to_string(),
            })
    }
}
