//! HTTP client for the Gram platform API.

use std::path::Path;

use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::Deserialize;
use tracing::debug;

/// Base URL used when `GRAM_API_URL` is not set.
pub const DEFAULT_API_BASE_URL: &str = "https://app.getgram.ai";

/// Environment variable overriding the API base URL.
pub const API_URL_VAR: &str = "GRAM_API_URL";

/// Environment variable holding the API key.
pub const API_KEY_VAR: &str = "GRAM_API_KEY";

/// Resolved connection settings for the platform API.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub base_url: String,
    api_key: String,
}

impl ApiConfig {
    /// Read the API endpoint and credentials from the environment.
    pub fn from_env() -> Result<Self> {
        let base_url = std::env::var(API_URL_VAR)
            .unwrap_or_else(|_| DEFAULT_API_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        let api_key = std::env::var(API_KEY_VAR)
            .with_context(|| format!("{API_KEY_VAR} is not set. Create an API key at {base_url} and export it before pushing."))?;
        Ok(Self { base_url, api_key })
    }
}

/// Deployment acknowledgment from the platform.
#[derive(Debug, Clone, Deserialize)]
pub struct PushResponse {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(config: ApiConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", config.api_key))
            .context("API key contains characters not valid in a header")?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .context("failed to construct HTTP client")?;

        Ok(Self {
            http,
            base_url: config.base_url,
        })
    }

    /// Upload a function archive as a new deployment of `slug`.
    pub async fn push_function(
        &self,
        slug: &str,
        project: Option<&str>,
        archive: &Path,
    ) -> Result<PushResponse> {
        let url = format!("{}/api/functions/{slug}/deployments", self.base_url);
        debug!(%url, "uploading function archive");

        let bytes = tokio::fs::read(archive)
            .await
            .with_context(|| format!("failed to read archive {}", archive.display()))?;

        let mut request = self
            .http
            .post(&url)
            .header("Content-Type", "application/zip")
            .body(bytes);
        if let Some(project) = project {
            request = request.query(&[("project", project)]);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("failed to reach {url}"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("deployment upload failed with {status}: {body}");
        }

        response
            .json()
            .await
            .context("deployment response was not valid JSON")
    }
}
