use super::AssetFetcher;
use crate::{Error, Result};
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};

/// Reads assets relative to a root directory.
pub struct FileFetcher {
    root: PathBuf,
}

impl FileFetcher {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    /// Join `identifier` onto the root, refusing paths that could escape it.
    fn resolve(&self, identifier: &str) -> Result<PathBuf> {
        let relative = Path::new(identifier);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes || identifier.is_empty() {
            return Err(Error::Fetch {
                identifier: identifier.to_string(),
                message: "path must be relative to the asset root".to_string(),
            });
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl AssetFetcher for FileFetcher {
    async fn fetch(&self, identifier: &str) -> Result<Vec<u8>> {
        let path = self.resolve(identifier)?;
        tokio::fs::read(&path).await.map_err(|e| Error::Fetch {
            identifier: identifier.to_string(),
            message: format!("{}: {}", path.display(), e),
        })
    }
}
