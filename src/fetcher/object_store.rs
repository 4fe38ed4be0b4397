use super::AssetFetcher;
use crate::{Error, Result};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::{config::Region, Client as S3Client};

/// Reads assets from S3-compatible storage (e.g. DigitalOcean Spaces).
///
/// Identifiers are object keys within the configured bucket.
pub struct ObjectStoreFetcher {
    client: S3Client,
    bucket: String,
}

impl ObjectStoreFetcher {
    pub async fn new(
        access_key_id: String,
        secret_access_key: String,
        endpoint: String,
        bucket: String,
    ) -> Result<Self> {
        let credentials = aws_sdk_s3::config::Credentials::new(
            access_key_id,
            secret_access_key,
            None,
            None,
            "docimg-object-store",
        );

        let config = aws_config::defaults(BehaviorVersion::latest())
            .credentials_provider(credentials)
            .region(Region::new("us-east-1")) // S3-compatible stores ignore the region
            .endpoint_url(endpoint)
            .load()
            .await;

        Ok(Self {
            client: S3Client::new(&config),
            bucket,
        })
    }

    /// Build from `DOCIMG_STORE_*` environment variables.
    pub async fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let var = |name: &str| {
            std::env::var(name).map_err(|_| Error::Config(format!("{} not set", name)))
        };
        Self::new(
            var("DOCIMG_STORE_ACCESS_KEY_ID")?,
            var("DOCIMG_STORE_SECRET_ACCESS_KEY")?,
            std::env::var("DOCIMG_STORE_ENDPOINT")
                .unwrap_or_else(|_| "https://nyc3.digitaloceanspaces.com".to_string()),
            var("DOCIMG_STORE_BUCKET")?,
        )
        .await
    }
}

#[async_trait]
impl AssetFetcher for ObjectStoreFetcher {
    async fn fetch(&self, identifier: &str) -> Result<Vec<u8>> {
        let fetch_error = |message: String| Error::Fetch {
            identifier: identifier.to_string(),
            message,
        };

        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(identifier)
            .send()
            .await
            .map_err(|e| fetch_error(format!("Failed to read object: {}", e)))?;

        let bytes = response
            .body
            .collect()
            .await
            .map_err(|e| fetch_error(format!("Failed to read body: {}", e)))?;

        Ok(bytes.to_vec())
    }
}
