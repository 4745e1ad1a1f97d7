//! # Repository Client
//!
//! The client handle is an explicit value owned by the caller: it holds the
//! endpoints and credentials and is never mutated by the pipeline steps that
//! borrow it.
//!
//! All remote access goes through the [`RepositoryApi`] trait. The pipeline
//! only depends on the trait, [`HttpRepository`] implements it on top of
//! `reqwest`, and tests substitute an in-memory repository.

use crate::catalog::{DatasetPage, QueryParameters};
use crate::error::ApiError;
use crate::subset::{CutoutJob, CutoutRequest};
use futures::StreamExt;
use log::debug;
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

/// Public ISIMIP metadata API
pub const DEFAULT_DATA_API_URL: &str = "https://data.isimip.org/api/v1";
/// Public ISIMIP files API (server-side processing such as cutouts)
pub const DEFAULT_FILES_API_URL: &str = "https://files.isimip.org/api/v1";

/// Connection configuration for the repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the metadata API (catalog)
    pub data_api_url: String,
    /// Base URL of the files API (cutouts)
    pub files_api_url: String,
    /// Optional bearer token sent with every request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    /// Optional request timeout in seconds; no timeout when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    /// Seconds between two polls of a running cutout job
    pub poll_interval_secs: u64,
    /// Upper bound on the number of polls for one cutout job
    pub max_polls: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            data_api_url: DEFAULT_DATA_API_URL.to_string(),
            files_api_url: DEFAULT_FILES_API_URL.to_string(),
            auth_token: None,
            timeout_secs: None,
            poll_interval_secs: 10,
            max_polls: 360,
        }
    }
}

impl ClientConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

/// Remote operations the pipeline needs from the repository.
#[async_trait::async_trait]
pub trait RepositoryApi: Send + Sync {
    /// Fetches one page (1-based) of the catalog's dataset search.
    async fn search_page(
        &self,
        params: &QueryParameters,
        page: u32,
    ) -> Result<DatasetPage, ApiError>;

    /// Submits a server-side cutout task.
    async fn submit_cutout(&self, request: &CutoutRequest) -> Result<CutoutJob, ApiError>;

    /// Fetches the current state of a submitted job.
    async fn job_status(&self, job_url: &str) -> Result<CutoutJob, ApiError>;

    /// Streams the resource at `url` into `dest`, returning the byte count.
    async fn fetch_to(&self, url: &str, dest: &Path) -> Result<u64, ApiError>;
}

/// [`RepositoryApi`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpRepository {
    client: Client,
    config: ClientConfig,
}

impl HttpRepository {
    pub fn new(config: ClientConfig) -> Result<Self, ApiError> {
        let mut builder = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")));
        if let Some(secs) = config.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let client = builder.build()?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn endpoint(base: &str, path: &str) -> String {
        format!("{}/{}", base.trim_end_matches('/'), path)
    }

    fn checked(response: Response) -> Result<Response, ApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let url = response.url().to_string();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ApiError::NotFound(url));
        }
        Err(ApiError::Status {
            url,
            status: status.as_u16(),
        })
    }

    async fn decode<T: serde::de::DeserializeOwned>(response: Response) -> Result<T, ApiError> {
        let url = response.url().to_string();
        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| ApiError::Decode {
            url,
            reason: e.to_string(),
        })
    }
}

#[async_trait::async_trait]
impl RepositoryApi for HttpRepository {
    async fn search_page(
        &self,
        params: &QueryParameters,
        page: u32,
    ) -> Result<DatasetPage, ApiError> {
        let url = Self::endpoint(&self.config.data_api_url, "datasets/");
        debug!("GET {} page {} with {}", url, page, params);

        let request = self
            .client
            .get(&url)
            .query(&params.to_query_pairs())
            .query(&[("page", page)]);
        let response = self.authorize(request).send().await?;
        let response = Self::checked(response)?;
        Self::decode(response).await
    }

    async fn submit_cutout(&self, request: &CutoutRequest) -> Result<CutoutJob, ApiError> {
        let url = Self::endpoint(&self.config.files_api_url, "");
        debug!("POST {} ({} paths)", url, request.paths.len());

        let response = self
            .authorize(self.client.post(&url).json(request))
            .send()
            .await?;
        let response = Self::checked(response)?;
        Self::decode(response).await
    }

    async fn job_status(&self, job_url: &str) -> Result<CutoutJob, ApiError> {
        debug!("GET {}", job_url);
        let response = self.authorize(self.client.get(job_url)).send().await?;
        let response = Self::checked(response)?;
        Self::decode(response).await
    }

    async fn fetch_to(&self, url: &str, dest: &Path) -> Result<u64, ApiError> {
        let response = self.authorize(self.client.get(url)).send().await?;
        let response = Self::checked(response)?;

        let mut file = tokio::fs::File::create(dest).await?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }

        file.flush().await?;
        file.sync_all().await?;
        debug!("Fetched {} bytes from {}", written, url);
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_points_at_public_endpoints() {
        let config = ClientConfig::default();
        assert_eq!(config.data_api_url, DEFAULT_DATA_API_URL);
        assert_eq!(config.files_api_url, DEFAULT_FILES_API_URL);
        assert!(config.auth_token.is_none());
        assert!(config.timeout_secs.is_none());
        assert_eq!(config.poll_interval(), Duration::from_secs(10));
    }

    #[test]
    fn test_endpoint_joining() {
        assert_eq!(
            HttpRepository::endpoint("https://data.isimip.org/api/v1/", "datasets/"),
            "https://data.isimip.org/api/v1/datasets/"
        );
        assert_eq!(
            HttpRepository::endpoint("https://files.isimip.org/api/v1", ""),
            "https://files.isimip.org/api/v1/"
        );
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: ClientConfig =
            serde_json::from_str(r#"{"data_api_url": "http://localhost:8000/api/v1"}"#).unwrap();
        assert_eq!(config.data_api_url, "http://localhost:8000/api/v1");
        assert_eq!(config.files_api_url, DEFAULT_FILES_API_URL);
        assert_eq!(config.max_polls, 360);
    }
}
