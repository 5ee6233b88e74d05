use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::StoreError;

/// Root directory under which `{platform}/{title}/` trees are created.
#[async_trait]
pub trait StoragePathProvider: Send + Sync {
    async fn root(&self) -> Result<PathBuf, StoreError>;
}
