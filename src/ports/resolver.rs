use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::credential::Credential;
use crate::domain::platform::{ContentCategory, Platform};
use crate::error::PipelineError;

/// A page URL turned into something fetchable.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub title: String,
    pub platform: Platform,
    pub content_category: ContentCategory,
    pub media_url: String,
    /// Separate audio track, for sources that serve video and audio apart.
    pub audio_url: Option<String>,
    /// Extra request headers the media host expects (referer and the like).
    pub headers: Vec<(String, String)>,
}

impl Resolution {
    pub fn new(platform: Platform, title: impl Into<String>, media_url: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            platform,
            content_category: ContentCategory::ShortVideo,
            media_url: media_url.into(),
            audio_url: None,
            headers: Vec::new(),
        }
    }

    pub fn with_audio(mut self, audio_url: impl Into<String>) -> Self {
        self.audio_url = Some(audio_url.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Platform-specific extraction of the real media URL.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Fails with `ResolveFailed` when the page cannot be turned into media.
    async fn resolve(
        &self,
        url: &str,
        credential: Option<Credential>,
    ) -> Result<Resolution, PipelineError>;
}

/// Maps each platform to the resolver that handles it.
#[derive(Clone, Default)]
pub struct ResolverRegistry {
    resolvers: HashMap<Platform, Arc<dyn Resolver>>,
}

impl ResolverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, platform: Platform, resolver: Arc<dyn Resolver>) -> Self {
        self.resolvers.insert(platform, resolver);
        self
    }

    pub fn get(&self, platform: Platform) -> Option<Arc<dyn Resolver>> {
        self.resolvers.get(&platform).cloned()
    }

    pub async fn resolve(
        &self,
        platform: Platform,
        url: &str,
        credential: Option<Credential>,
    ) -> Result<Resolution, PipelineError> {
        let resolver = self
            .get(platform)
            .ok_or_else(|| PipelineError::UnsupportedPlatform(platform.to_string()))?;
        resolver.resolve(url, credential).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unregistered_platform_is_unsupported() {
        let registry = ResolverRegistry::new();
        let err = registry
            .resolve(Platform::Unknown, "https://example.com/v/123", None)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::UnsupportedPlatform(p) if p == "unknown"));
    }

    #[tokio::test]
    async fn dispatches_to_the_registered_resolver() {
        let mut resolver = MockResolver::new();
        resolver
            .expect_resolve()
            .withf(|url, credential| url == "https://b23.tv/abc" && credential.is_none())
            .times(1)
            .returning(|_, _| {
                Ok(Resolution::new(
                    Platform::Bilibili,
                    "clip",
                    "https://cdn.example.com/clip.mp4",
                ))
            });

        let registry = ResolverRegistry::new().register(Platform::Bilibili, Arc::new(resolver));
        assert!(registry.get(Platform::Bilibili).is_some());
        assert!(registry.get(Platform::Douyin).is_none());

        let resolution = registry
            .resolve(Platform::Bilibili, "https://b23.tv/abc", None)
            .await
            .unwrap();
        assert_eq!(resolution.media_url, "https://cdn.example.com/clip.mp4");
    }
}
