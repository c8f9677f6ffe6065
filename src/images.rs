//! Fetching finished images from the provider's result URLs

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;

/// Downloads a result URL to a local file.
///
/// A trait so the batch orchestrator can run against a stub in tests.
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch_to(&self, url: &str, dest: &Path) -> Result<()>;
}

/// HTTP implementation used in production
pub struct HttpImageFetcher {
    client: reqwest::Client,
}

impl HttpImageFetcher {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpImageFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ImageFetcher for HttpImageFetcher {
    async fn fetch_to(&self, url: &str, dest: &Path) -> Result<()> {
        let response = self
            .client
            .get(url)
            .timeout(Duration::from_secs(120))
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::Network(format!(
                "image download returned HTTP {}",
                response.status()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(dest, &bytes).await?;
        Ok(())
    }
}
