//! Redis CredentialStore and StoragePathProvider implementations.

use std::path::PathBuf;

use async_trait::async_trait;
use deadpool_redis::redis::AsyncCommands;

use super::pool::RedisPool;
use super::{COOKIE_PREFIX, STORAGE_PATH_KEY};
use crate::domain::credential::Credential;
use crate::domain::platform::Platform;
use crate::error::StoreError;
use crate::ports::credentials::CredentialStore;
use crate::ports::storage::StoragePathProvider;

fn cookie_key(platform: Platform) -> String {
    format!("{COOKIE_PREFIX}{platform}")
}

#[async_trait]
impl CredentialStore for RedisPool {
    async fn get_credential(&self, platform: Platform) -> Result<Option<Credential>, StoreError> {
        let mut conn = self.conn().await?;
        let json: Option<String> = conn.get(cookie_key(platform)).await?;
        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn set_credential(
        &self,
        platform: Platform,
        credential: &Credential,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        let json = serde_json::to_string(credential)?;
        conn.set_ex::<_, _, ()>(cookie_key(platform), json, self.cookie_ttl.as_secs())
            .await?;
        Ok(())
    }

    async fn is_valid(&self, platform: Platform) -> Result<bool, StoreError> {
        let mut conn = self.conn().await?;
        Ok(conn.exists(cookie_key(platform)).await?)
    }
}

#[async_trait]
impl StoragePathProvider for RedisPool {
    async fn root(&self) -> Result<PathBuf, StoreError> {
        let mut conn = self.conn().await?;
        let configured: Option<String> = conn.get(STORAGE_PATH_KEY).await?;
        Ok(configured
            .filter(|path| !path.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| self.default_root.clone()))
    }
}
