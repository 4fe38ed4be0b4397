use super::AssetFetcher;
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// In-memory fetcher; unknown identifiers fail like a missing object.
#[derive(Clone)]
pub struct MockFetcher {
    files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    fetch_count: Arc<Mutex<usize>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self {
            files: Arc::new(Mutex::new(HashMap::new())),
            fetch_count: Arc::new(Mutex::new(0)),
        }
    }

    pub fn with_file(self, identifier: impl Into<String>, content: Vec<u8>) -> Self {
        self.files
            .lock()
            .unwrap()
            .insert(identifier.into(), content);
        self
    }

    pub fn get_fetch_count(&self) -> usize {
        *self.fetch_count.lock().unwrap()
    }
}

impl Default for MockFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AssetFetcher for MockFetcher {
    async fn fetch(&self, identifier: &str) -> Result<Vec<u8>> {
        *self.fetch_count.lock().unwrap() += 1;

        let files = self.files.lock().unwrap();
        files.get(identifier).cloned().ok_or_else(|| Error::Fetch {
            identifier: identifier.to_string(),
            message: "File not found".to_string(),
        })
    }
}
