use async_trait::async_trait;

use crate::domain::credential::Credential;
use crate::domain::platform::Platform;
use crate::error::StoreError;

/// Per-platform login material. Entries expire after a fixed TTL enforced
/// by the store, so existence means validity.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get_credential(&self, platform: Platform) -> Result<Option<Credential>, StoreError>;

    async fn set_credential(
        &self,
        platform: Platform,
        credential: &Credential,
    ) -> Result<(), StoreError>;

    async fn is_valid(&self, platform: Platform) -> Result<bool, StoreError> {
        Ok(self.get_credential(platform).await?.is_some())
    }
}
