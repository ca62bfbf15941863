//! Network side of the image pipeline.

use async_trait::async_trait;
use reqwest::Client;

use crate::config::Config;
use crate::errors::FetchError;

/// Fetches raw image bytes for a URL.
///
/// Any non-success response is a failure, never a valid payload.
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

/// Image fetcher backed by a plain HTTP client.
#[derive(Clone)]
pub struct HttpImageFetcher {
    client: Client,
}

impl HttpImageFetcher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn from_config(config: &Config) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(config.image_timeout)
            .build()
            .map_err(|e| FetchError::Network(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self::new(client))
    }
}

#[async_trait]
impl ImageFetcher for HttpImageFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        let bytes = response.bytes().await?;
        Ok(bytes.to_vec())
    }
}
