//! User Directory lookups for display metadata.
//!
//! Display names and avatars are cosmetic. Services call
//! [`resolve_display_or_default`], which never fails: any lookup error or
//! missing field degrades to an empty string.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::Url;
use serde::Deserialize;
use thiserror::Error;

/// Errors from a User Directory lookup. Never propagated past this module's callers.
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("directory returned HTTP {0}")]
    HttpStatus(u16),

    #[error("user not found: {0}")]
    NotFound(String),

    #[error("invalid directory URL: {0}")]
    InvalidUrl(String),

    #[error("user directory is not configured")]
    Disabled,
}

/// Display metadata for one user as returned by the directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DisplayInfo {
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

/// Display metadata after fallback: both fields always present.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedDisplay {
    pub display_name: String,
    pub avatar_url: String,
}

/// Resolves a user id to display metadata.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn resolve_display(&self, user_id: &str) -> Result<DisplayInfo, DirectoryError>;
}

/// Looks up `user_id`, degrading to empty metadata on any failure.
pub async fn resolve_display_or_default(
    directory: &dyn UserDirectory,
    user_id: &str,
) -> ResolvedDisplay {
    match directory.resolve_display(user_id).await {
        Ok(info) => {
            if info.avatar_url.is_none() {
                log::debug!("[Directory] No avatar for {}", user_id);
            }
            ResolvedDisplay {
                display_name: info.display_name,
                avatar_url: info.avatar_url.unwrap_or_default(),
            }
        }
        Err(DirectoryError::Disabled) => ResolvedDisplay::default(),
        Err(e) => {
            log::warn!("[Directory] Lookup for {} failed: {}", user_id, e);
            ResolvedDisplay::default()
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// HTTP Directory
// ─────────────────────────────────────────────────────────────────────────────

/// Directory backed by the user service's REST API (`GET {base}/users/{id}`).
pub struct HttpUserDirectory {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpUserDirectory {
    /// Creates a directory client with a per-request timeout.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, DirectoryError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DirectoryError::Http(e.to_string()))?;
        Self::with_client(client, base_url)
    }

    /// Creates a directory client reusing an existing HTTP client.
    pub fn with_client(client: reqwest::Client, base_url: &str) -> Result<Self, DirectoryError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| DirectoryError::InvalidUrl(format!("{base_url}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(DirectoryError::InvalidUrl(base_url.to_string()));
        }
        Ok(Self { client, base_url })
    }

    /// The user id always lands in a single escaped path segment.
    fn user_url(&self, user_id: &str) -> Result<Url, DirectoryError> {
        // Dot segments are dropped by the URL builder and would address the collection.
        if matches!(user_id, "." | "..") {
            return Err(DirectoryError::NotFound(user_id.to_string()));
        }
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| DirectoryError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .push("users")
            .push(user_id);
        url.set_query(None);
        url.set_fragment(None);
        Ok(url)
    }
}

#[async_trait]
impl UserDirectory for HttpUserDirectory {
    async fn resolve_display(&self, user_id: &str) -> Result<DisplayInfo, DirectoryError> {
        let response = self
            .client
            .get(self.user_url(user_id)?)
            .send()
            .await
            .map_err(|e| DirectoryError::Http(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(DirectoryError::NotFound(user_id.to_string()));
        }
        if !status.is_success() {
            return Err(DirectoryError::HttpStatus(status.as_u16()));
        }

        response
            .json::<DisplayInfo>()
            .await
            .map_err(|e| DirectoryError::Http(e.to_string()))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// In-memory and no-op Directories
// ─────────────────────────────────────────────────────────────────────────────

/// Fixed in-memory directory.
#[derive(Default)]
pub struct StaticUserDirectory {
    users: DashMap<String, DisplayInfo>,
}

impl StaticUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, user_id: &str, display_name: &str, avatar_url: Option<&str>) {
        self.users.insert(
            user_id.to_string(),
            DisplayInfo {
                display_name: display_name.to_string(),
                avatar_url: avatar_url.map(str::to_string),
            },
        );
    }
}

#[async_trait]
impl UserDirectory for StaticUserDirectory {
    async fn resolve_display(&self, user_id: &str) -> Result<DisplayInfo, DirectoryError> {
        self.users
            .get(user_id)
            .map(|r| r.value().clone())
            .ok_or_else(|| DirectoryError::NotFound(user_id.to_string()))
    }
}

/// Used when no directory is configured. Every lookup reports `Disabled`.
pub struct NoopUserDirectory;

#[async_trait]
impl UserDirectory for NoopUserDirectory {
    async fn resolve_display(&self, _user_id: &str) -> Result<DisplayInfo, DirectoryError> {
        Err(DirectoryError::Disabled)
    }
}
