//! HTTP transport against the workspace server
//!
//! Binding: `{base}/users/{user_id}/workspace/files[/{path}]` with the
//! relative path escaped as a single URL segment, an optional bearer
//! credential, and a fixed per-request timeout. Not-found on a file GET is a
//! distinguished answer, not an error.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use color_eyre::eyre::{bail, eyre, Result};
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use tracing::debug;

use ysync_core::remote::{RemoteFileMeta, WorkspaceListing, WorkspaceTransport};
use ysync_core::ContentHash;

/// Fixed timeout applied to every request
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Response headers carrying file metadata on GET
const HASH_HEADER: &str = "X-File-Hash";
const MODIFIED_HEADER: &str = "X-File-Modified";

/// Workspace API client
pub struct HttpTransport {
    client: Client,
    base: Url,
    api_key: Option<String>,
    user_id: String,
}

impl HttpTransport {
    /// Create a client for one user's workspace.
    ///
    /// # Errors
    /// Returns an error if the base URL is invalid or the HTTP client
    /// cannot be built.
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        user_id: impl Into<String>,
    ) -> Result<Self> {
        let base = Url::parse(base_url)?;
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("ysync/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base,
            api_key: api_key.filter(|key| !key.is_empty()),
            user_id: user_id.into(),
        })
    }

    fn workspace_url(&self, file: Option<&str>) -> Result<Url> {
        let mut url = self.base.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|()| eyre!("server URL cannot be a base: {}", self.base))?;
            segments
                .pop_if_empty()
                .extend(["users", self.user_id.as_str(), "workspace", "files"]);
            if let Some(file) = file {
                // One escaped segment; slashes in the path become %2F.
                segments.push(file);
            }
        }
        Ok(url)
    }

    fn health_url(&self) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| eyre!("server URL cannot be a base: {}", self.base))?
            .pop_if_empty()
            .push("health");
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }
}

#[async_trait]
impl WorkspaceTransport for HttpTransport {
    async fn ping(&self) -> Result<()> {
        let response = self.client.get(self.health_url()?).send().await?;
        if response.status() != StatusCode::OK {
            bail!("server returned status {}", response.status());
        }
        Ok(())
    }

    async fn list_files(&self) -> Result<WorkspaceListing> {
        let url = self.workspace_url(None)?;
        let response = self.authorize(self.client.get(url)).send().await?;

        if response.status() != StatusCode::OK {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("unexpected status {status}: {body}");
        }

        Ok(response.json().await?)
    }

    async fn get_file(&self, path: &str) -> Result<Option<(Bytes, RemoteFileMeta)>> {
        let url = self.workspace_url(Some(path))?;
        let response = self.authorize(self.client.get(url)).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            debug!(path, "file not found remotely");
            return Ok(None);
        }
        if response.status() != StatusCode::OK {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("unexpected status {status}: {body}");
        }

        let hash = response
            .headers()
            .get(HASH_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(ContentHash::from_hex);
        let modified = response
            .headers()
            .get(MODIFIED_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| DateTime::parse_from_rfc3339(value).ok())
            .map(|value| value.with_timezone(&Utc));

        let content = response.bytes().await?;
        let meta = RemoteFileMeta {
            path: path.to_string(),
            hash: hash.unwrap_or_else(|| ContentHash::of(&content)),
            size: content.len() as u64,
            modified: modified.unwrap_or_else(Utc::now),
        };

        Ok(Some((content, meta)))
    }

    async fn put_file(&self, path: &str, content: Bytes) -> Result<RemoteFileMeta> {
        let url = self.workspace_url(Some(path))?;
        let response = self
            .authorize(self.client.put(url))
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(content)
            .send()
            .await?;

        if response.status() != StatusCode::OK && response.status() != StatusCode::CREATED {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("unexpected status {status}: {body}");
        }

        Ok(response.json().await?)
    }

    async fn delete_file(&self, path: &str) -> Result<()> {
        let url = self.workspace_url(Some(path))?;
        let response = self.authorize(self.client.delete(url)).send().await?;

        if response.status() != StatusCode::OK && response.status() != StatusCode::NO_CONTENT {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("unexpected status {status}: {body}");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport() -> HttpTransport {
        HttpTransport::new("http://localhost:8200", None, "user-1").unwrap()
    }

    #[test]
    fn test_workspace_url_without_file() {
        let url = transport().workspace_url(None).unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:8200/users/user-1/workspace/files"
        );
    }

    #[test]
    fn test_file_path_escaped_as_single_segment() {
        let url = transport()
            .workspace_url(Some("notes/readme.md"))
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:8200/users/user-1/workspace/files/notes%2Freadme.md"
        );
    }

    #[test]
    fn test_base_url_with_path_prefix() {
        let transport = HttpTransport::new("http://localhost:8200/api/", None, "u").unwrap();
        let url = transport.workspace_url(None).unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:8200/api/users/u/workspace/files"
        );
    }

    #[test]
    fn test_health_url() {
        let url = transport().health_url().unwrap();
        assert_eq!(url.as_str(), "http://localhost:8200/health");
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        assert!(HttpTransport::new("not a url", None, "u").is_err());
    }

    #[test]
    fn test_empty_api_key_means_no_auth() {
        let transport = HttpTransport::new("http://x", Some(String::new()), "u").unwrap();
        assert!(transport.api_key.is_none());
    }
}
