use reqwest::StatusCode;
use std::time::Duration;

use crate::config::StorageConfig;
use crate::error::UploadError;

/// Client for the remote object store (Supabase-style storage API).
#[derive(Clone)]
pub struct BlobStore {
    http: reqwest::Client,
    endpoint: String,
    bucket: String,
    api_key: Option<String>,
    public_base: String,
}

impl BlobStore {
    pub fn new(config: &StorageConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build HTTP client: {}", e))?;
        Ok(Self::with_client(http, config))
    }

    pub fn with_client(http: reqwest::Client, config: &StorageConfig) -> Self {
        let endpoint = config.endpoint.trim_end_matches('/').to_string();
        let public_base = match config.public_base {
            Some(ref base) => base.trim_end_matches('/').to_string(),
            None => format!("{}/storage/v1/object/public/{}", endpoint, config.bucket),
        };
        Self {
            http,
            endpoint,
            bucket: config.bucket.clone(),
            api_key: config.api_key.clone(),
            public_base,
        }
    }

    pub fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.public_base, key)
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/storage/v1/object/{}/{}", self.endpoint, self.bucket, key)
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.api_key {
            Some(ref key) => req.bearer_auth(key).header("apikey", key),
            None => req,
        }
    }

    /// Upload (upsert) `bytes` under `key` and return its public URL.
    pub async fn upload(
        &self,
        bytes: Vec<u8>,
        key: &str,
        content_type: &str,
    ) -> Result<String, UploadError> {
        let req = self
            .http
            .post(self.object_url(key))
            .header("content-type", content_type)
            .header("cache-control", "max-age=3600")
            .header("x-upsert", "true")
            .body(bytes);
        let response = self
            .authorize(req)
            .send()
            .await
            .map_err(|e| UploadError::Network(e.to_string()))?;

        check_status(response).await?;
        let url = self.public_url(key);
        tracing::info!("Uploaded {} -> {}", key, url);
        Ok(url)
    }

    pub async fn delete(&self, key: &str) -> Result<(), UploadError> {
        let req = self.http.delete(self.object_url(key));
        let response = self
            .authorize(req)
            .send()
            .await
            .map_err(|e| UploadError::Network(e.to_string()))?;

        match check_status(response).await {
            Ok(()) => Ok(()),
            // Already gone is as good as deleted.
            Err(UploadError::Storage { status: 404, .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// True when the store answers at all, whatever the status code.
    pub async fn probe(&self) -> bool {
        let req = self.http.head(&self.endpoint);
        match self.authorize(req).send().await {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!("Storage probe failed: {}", e);
                false
            }
        }
    }
}

async fn check_status(response: reqwest::Response) -> Result<(), UploadError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let message = response.text().await.unwrap_or_default();
    if is_transient(status) {
        Err(UploadError::Network(format!("HTTP {}: {}", status.as_u16(), message)))
    } else {
        Err(UploadError::Storage {
            status: status.as_u16(),
            message,
        })
    }
}

/// Server-side hiccups are retried like connectivity loss.
fn is_transient(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
}
