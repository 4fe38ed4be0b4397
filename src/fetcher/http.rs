use super::AssetFetcher;
use crate::{Error, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

/// Downloads assets over HTTP(S).
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    /// Reuse an existing connection pool.
    pub fn new_with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AssetFetcher for HttpFetcher {
    async fn fetch(&self, identifier: &str) -> Result<Vec<u8>> {
        tracing::debug!("Fetching asset {}", identifier);

        let response = self
            .client
            .get(identifier)
            .send()
            .await
            .map_err(|e| Error::Fetch {
                identifier: identifier.to_string(),
                message: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(Error::Fetch {
                identifier: identifier.to_string(),
                message: format!("HTTP status {}", response.status()),
            });
        }

        let bytes = response.bytes().await.map_err(|e| Error::Fetch {
            identifier: identifier.to_string(),
            message: format!("Failed to read body: {}", e),
        })?;
        Ok(bytes.to_vec())
    }
}
