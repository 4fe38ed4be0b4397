//! Asset fetching
//!
//! Resolves an image identifier to raw bytes before optimization. Sources are
//! local files, HTTP(S) URLs and S3-compatible object storage.

pub mod file;
pub mod http;
pub mod mock;
pub mod object_store;

pub use file::FileFetcher;
pub use http::HttpFetcher;
pub use mock::MockFetcher;
pub use object_store::ObjectStoreFetcher;

use crate::Result;
use async_trait::async_trait;

#[async_trait]
pub trait AssetFetcher: Send + Sync {
    async fn fetch(&self, identifier: &str) -> Result<Vec<u8>>;
}
