use std::path::Path;

use async_trait::async_trait;
use url::Url;

use crate::domain::credential::Credential;
use crate::domain::platform::{ContentCategory, Platform};
use crate::error::PipelineError;
use crate::ports::resolver::{Resolution, Resolver};

/// Resolver for links that already point at a media file: the page URL is
/// the media URL and the title is the file name.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectResolver;

#[async_trait]
impl Resolver for DirectResolver {
    async fn resolve(
        &self,
        url: &str,
        _credential: Option<Credential>,
    ) -> Result<Resolution, PipelineError> {
        let parsed = Url::parse(url).map_err(|e| PipelineError::ResolveFailed(format!("{url}: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https" | "file") {
            return Err(PipelineError::ResolveFailed(format!(
                "{url}: unsupported scheme {}",
                parsed.scheme()
            )));
        }

        let title = parsed
            .path_segments()
            .and_then(|mut segments| segments.rfind(|s| !s.is_empty()))
            .and_then(|name| Path::new(name).file_stem().map(|s| s.to_string_lossy().into_owned()))
            .filter(|name| !name.is_empty())
            .or_else(|| parsed.host_str().map(str::to_string))
            .unwrap_or_else(|| "video".to_string());

        let mut resolution = Resolution::new(Platform::detect(url), title, url);
        resolution.content_category = ContentCategory::detect(url);
        Ok(resolution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn title_comes_from_the_file_name() {
        let resolution = DirectResolver
            .resolve("https://cdn.example.com/media/My%20Clip.mp4?sig=1", None)
            .await
            .unwrap();

        assert_eq!(resolution.title, "My%20Clip");
        assert_eq!(resolution.media_url, "https://cdn.example.com/media/My%20Clip.mp4?sig=1");
        assert_eq!(resolution.platform, Platform::Unknown);
        assert!(resolution.audio_url.is_none());
    }

    #[tokio::test]
    async fn bare_host_falls_back_to_the_host_name() {
        let resolution = DirectResolver
            .resolve("https://example.com/", None)
            .await
            .unwrap();
        assert_eq!(resolution.title, "example.com");
    }

    #[tokio::test]
    async fn rejects_unparseable_urls() {
        let err = DirectResolver.resolve("not a url", None).await.unwrap_err();
        assert!(matches!(err, PipelineError::ResolveFailed(_)));
    }
}
