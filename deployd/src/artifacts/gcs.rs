//! Google Cloud Storage artifact backend

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{header, Client};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, error};
use url::Url;

use crate::artifacts::ArtifactStore;
use crate::errors::DeployError;

pub const DEFAULT_API_BASE_URL: &str = "https://storage.googleapis.com";

/// Uploads objects through the GCS JSON API (simple media upload)
pub struct GcsArtifactStore {
    client: Client,
    api_base_url: String,
    bucket: String,
    token: Option<SecretString>,
}

impl GcsArtifactStore {
    pub fn new(
        api_base_url: &str,
        bucket: &str,
        token: Option<SecretString>,
    ) -> Result<Self, DeployError> {
        if bucket.is_empty() {
            return Err(DeployError::ConfigError(
                "Artifact bucket is not configured".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;

        Ok(Self {
            client,
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
            bucket: bucket.to_string(),
            token,
        })
    }

    /// Upload endpoint for `key`
    pub fn upload_url(&self, key: &str) -> Result<Url, DeployError> {
        let mut url = Url::parse(&format!(
            "{}/upload/storage/v1/b/{}/o",
            self.api_base_url, self.bucket
        ))
        .map_err(|e| DeployError::ConfigError(format!("Invalid storage URL: {e}")))?;

        url.query_pairs_mut()
            .append_pair("uploadType", "media")
            .append_pair("name", key);
        Ok(url)
    }
}

#[async_trait]
impl ArtifactStore for GcsArtifactStore {
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> Result<(), DeployError> {
        let url = self.upload_url(key)?;
        debug!("POST {} ({} bytes, {})", url, data.len(), content_type);

        let mut request = self
            .client
            .post(url)
            .header(header::CONTENT_TYPE, content_type)
            .body(data);

        if let Some(token) = &self.token {
            request = request.bearer_auth(token.expose_secret());
        }

        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("Object upload failed: {} - {}", status, body);
            return Err(DeployError::StorageError(format!(
                "upload of {key} failed: {status}: {body}"
            )));
        }

        Ok(())
    }
}
