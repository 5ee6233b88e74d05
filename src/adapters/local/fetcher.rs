//! Streams resolved media to local disk.

use std::io;
use std::path::Path;
use std::time::Duration;

use bytes::Bytes;
use futures::{Stream, StreamExt, TryStreamExt};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, COOKIE};
use tokio::fs;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use super::fs::remove_if_exists;
use crate::domain::progress::{format_speed, percent, ProgressGate, ProgressObserver, SpeedMeter};
use crate::error::PipelineError;

/// Read size for local sources.
pub const CHUNK_SIZE: usize = 8192;

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 16_6 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/16.6 Mobile/15E148 Safari/604.1";

#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Limit for connecting and for each wait on the next chunk.
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(600),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// Request parameters beyond the URL.
#[derive(Debug, Clone, Default)]
pub struct FetchRequest {
    pub headers: Vec<(String, String)>,
    pub cookie: Option<String>,
}

#[derive(Debug, thiserror::Error)]
enum TransferError {
    #[error("no data received for {}s", .0.as_secs())]
    Timeout(Duration),
    #[error("read failed: {0}")]
    Read(io::Error),
    #[error("write failed: {0}")]
    Write(io::Error),
    #[error("stream ended after {done} of {total} bytes")]
    Truncated { done: u64, total: u64 },
    #[error("cancelled")]
    Cancelled,
}

#[derive(Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    config: FetchConfig,
}

impl Fetcher {
    pub fn new(config: FetchConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(config.timeout)
            .build()?;
        Ok(Self { client, config })
    }

    /// Downloads `url` into `dest` and returns the number of bytes written.
    ///
    /// Progress is reported when the total size is known; speed at most once
    /// per second. A failed download leaves no partial file behind.
    pub async fn fetch(
        &self,
        url: &str,
        dest: &Path,
        request: &FetchRequest,
        progress: &dyn ProgressObserver,
        cancel: &CancellationToken,
    ) -> Result<u64, PipelineError> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| PipelineError::io(parent, e))?;
        }

        let parsed = Url::parse(url).map_err(|e| PipelineError::download(url, e))?;
        info!(%url, dest = %dest.display(), "fetching");

        let result = match parsed.scheme() {
            "file" => self.fetch_file(url, &parsed, dest, progress, cancel).await,
            "http" | "https" => self.fetch_http(url, dest, request, progress, cancel).await,
            other => Err(PipelineError::download(
                url,
                format!("unsupported scheme {other:?}"),
            )),
        };

        if result.is_err() {
            if let Err(e) = remove_if_exists(dest).await {
                warn!(dest = %dest.display(), error = %e, "could not remove partial download");
            }
        }
        result
    }

    async fn fetch_file(
        &self,
        url: &str,
        parsed: &Url,
        dest: &Path,
        progress: &dyn ProgressObserver,
        cancel: &CancellationToken,
    ) -> Result<u64, PipelineError> {
        let source = parsed
            .to_file_path()
            .map_err(|_| PipelineError::download(url, "invalid file url"))?;
        let file = fs::File::open(&source)
            .await
            .map_err(|e| PipelineError::download(url, e))?;
        let total = file
            .metadata()
            .await
            .map_err(|e| PipelineError::download(url, e))?
            .len();

        let stream = ReaderStream::with_capacity(file, CHUNK_SIZE);
        self.write_stream(url, stream, dest, total, progress, cancel)
            .await
    }

    async fn fetch_http(
        &self,
        url: &str,
        dest: &Path,
        request: &FetchRequest,
        progress: &dyn ProgressObserver,
        cancel: &CancellationToken,
    ) -> Result<u64, PipelineError> {
        let mut headers = HeaderMap::new();
        for (name, value) in &request.headers {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.insert(name, value);
                }
                _ => debug!(header = %name, "skipping invalid request header"),
            }
        }
        if let Some(cookie) = &request.cookie {
            if let Ok(value) = HeaderValue::from_str(cookie) {
                headers.insert(COOKIE, value);
            }
        }

        let send = self.client.get(url).headers(headers).send();
        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
            sent = tokio::time::timeout(self.config.timeout, send) => match sent {
                Err(_) => return Err(PipelineError::download(url, TransferError::Timeout(self.config.timeout))),
                Ok(Err(e)) => return Err(PipelineError::download(url, e)),
                Ok(Ok(response)) => response,
            },
        };
        let response = response
            .error_for_status()
            .map_err(|e| PipelineError::download(url, e))?;

        let total = response.content_length().unwrap_or(0);
        let stream = response.bytes_stream().map_err(io::Error::other);
        self.write_stream(url, stream, dest, total, progress, cancel)
            .await
    }

    async fn write_stream<S>(
        &self,
        url: &str,
        stream: S,
        dest: &Path,
        total: u64,
        progress: &dyn ProgressObserver,
        cancel: &CancellationToken,
    ) -> Result<u64, PipelineError>
    where
        S: Stream<Item = io::Result<Bytes>>,
    {
        let mut file = fs::File::create(dest)
            .await
            .map_err(|e| PipelineError::io(dest, e))?;

        match stream_to_writer(stream, &mut file, total, self.config.timeout, progress, cancel)
            .await
        {
            Ok(written) => {
                debug!(%url, written, "download finished");
                Ok(written)
            }
            Err(TransferError::Cancelled) => Err(PipelineError::Cancelled),
            Err(TransferError::Write(e)) => Err(PipelineError::io(dest, e)),
            Err(e) => Err(PipelineError::download(url, e)),
        }
    }
}

/// Copies `stream` into `writer`, reporting progress and speed as it goes.
async fn stream_to_writer<S, W>(
    stream: S,
    writer: &mut W,
    total: u64,
    read_timeout: Duration,
    progress: &dyn ProgressObserver,
    cancel: &CancellationToken,
) -> Result<u64, TransferError>
where
    S: Stream<Item = io::Result<Bytes>>,
    W: AsyncWrite + Unpin,
{
    let mut stream = std::pin::pin!(stream);
    let mut meter = SpeedMeter::start();
    let mut gate = ProgressGate::new();
    let mut done = 0u64;

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return Err(TransferError::Cancelled),
            next = tokio::time::timeout(read_timeout, stream.next()) => next,
        };
        let chunk = match next {
            Err(_) => return Err(TransferError::Timeout(read_timeout)),
            Ok(None) => break,
            Ok(Some(Err(e))) => return Err(TransferError::Read(e)),
            Ok(Some(Ok(chunk))) => chunk,
        };

        writer.write_all(&chunk).await.map_err(TransferError::Write)?;
        done += chunk.len() as u64;

        if let Some(pct) = percent(done, total).and_then(|pct| gate.advance(pct)) {
            progress.on_progress(pct);
        }
        if let Some(rate) = meter.record(chunk.len() as u64) {
            progress.on_speed(&format_speed(rate));
        }
    }

    writer.flush().await.map_err(TransferError::Write)?;
    if total > 0 && done < total {
        return Err(TransferError::Truncated { done, total });
    }
    Ok(done)
}

#[cfg(test)]
mod tests {
    use axum::http::{HeaderMap as AxumHeaders, StatusCode};
    use axum::routing::get;
    use axum::Router;
    use futures::stream;
    use tempfile::TempDir;

    use super::*;
    use crate::domain::progress::testing::Recorder;
    use crate::domain::progress::NoProgress;

    fn fetcher() -> Fetcher {
        Fetcher::new(FetchConfig {
            timeout: Duration::from_secs(5),
            ..Default::default()
        })
        .unwrap()
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test(start_paused = true)]
    async fn ten_megabytes_at_a_constant_rate() {
        const CHUNK: usize = 64 * 1024;
        const CHUNKS: usize = 160;
        // 20 chunks of 64 KiB per second = 1.25 MiB/s; 10 MiB takes 8s.
        let chunks = stream::iter(0..CHUNKS).then(|_| async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok::<_, io::Error>(Bytes::from(vec![0u8; CHUNK]))
        });
        let recorder = Recorder::default();
        let total = (CHUNK * CHUNKS) as u64;

        let written = stream_to_writer(
            chunks,
            &mut tokio::io::sink(),
            total,
            Duration::from_secs(600),
            &recorder,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(written, total);
        let progress = recorder.progress();
        assert_eq!(progress.last(), Some(&100));
        assert!(progress.windows(2).all(|w| w[0] < w[1]));
        assert!(progress.iter().all(|p| *p <= 100));

        let speeds = recorder.speeds();
        assert!((7..=9).contains(&speeds.len()), "got {} samples", speeds.len());
        assert!(speeds.iter().all(|s| s == "1.25 MB/s"), "{speeds:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_stream_times_out() {
        let stalled = stream::pending::<io::Result<Bytes>>();
        let err = stream_to_writer(
            stalled,
            &mut tokio::io::sink(),
            1024,
            Duration::from_secs(600),
            &NoProgress,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, TransferError::Timeout(t) if t == Duration::from_secs(600)));
    }

    #[tokio::test]
    async fn cancellation_interrupts_a_stalled_stream() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = stream_to_writer(
            stream::pending::<io::Result<Bytes>>(),
            &mut tokio::io::sink(),
            0,
            Duration::from_secs(600),
            &NoProgress,
            &cancel,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, TransferError::Cancelled));
    }

    #[tokio::test]
    async fn unknown_or_zero_length_reports_no_progress() {
        let recorder = Recorder::default();
        let written = stream_to_writer(
            stream::iter(vec![Ok(Bytes::from_static(b"abc"))]),
            &mut tokio::io::sink(),
            0,
            Duration::from_secs(5),
            &recorder,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(written, 3);
        assert!(recorder.progress().is_empty());
    }

    #[tokio::test]
    async fn short_body_is_truncated() {
        let err = stream_to_writer(
            stream::iter(vec![Ok(Bytes::from_static(b"abc"))]),
            &mut tokio::io::sink(),
            10,
            Duration::from_secs(5),
            &NoProgress,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, TransferError::Truncated { done: 3, total: 10 }));
    }

    #[tokio::test]
    async fn copies_local_files_in_chunks() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("source.mp4");
        std::fs::write(&source, vec![7u8; CHUNK_SIZE * 3 + 100]).unwrap();
        let dest = dir.path().join("out").join("raw.mp4");
        let url = Url::from_file_path(&source).unwrap().to_string();
        let recorder = Recorder::default();

        let written = fetcher()
            .fetch(&url, &dest, &FetchRequest::default(), &recorder, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(written, (CHUNK_SIZE * 3 + 100) as u64);
        assert_eq!(std::fs::read(&dest).unwrap().len(), written as usize);
        assert_eq!(recorder.progress().last(), Some(&100));
    }

    #[tokio::test]
    async fn empty_local_file_downloads_without_progress() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("empty.mp4");
        std::fs::write(&source, b"").unwrap();
        let dest = dir.path().join("raw.mp4");
        let url = Url::from_file_path(&source).unwrap().to_string();
        let recorder = Recorder::default();

        let written = fetcher()
            .fetch(&url, &dest, &FetchRequest::default(), &recorder, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(written, 0);
        assert!(recorder.progress().is_empty());
        assert!(dest.exists());
    }

    #[tokio::test]
    async fn failed_download_removes_the_partial_file_and_names_the_url() {
        let dir = TempDir::new().unwrap();
        // Reading a directory fails after the destination was created.
        let url = Url::from_directory_path(dir.path()).unwrap().to_string();
        let dest = dir.path().join("partial.mp4");

        let err = fetcher()
            .fetch(&url, &dest, &FetchRequest::default(), &NoProgress, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(&err, PipelineError::Download { url: u, .. } if *u == url));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn http_download_sends_headers_and_cookie() {
        let body = vec![1u8; 100_000];
        let served = body.clone();
        let router = Router::new().route(
            "/media.mp4",
            get(move |headers: AxumHeaders| {
                let served = served.clone();
                async move {
                    let referer_ok = headers
                        .get("referer")
                        .is_some_and(|v| v == "https://www.bilibili.com/");
                    let cookie_ok = headers
                        .get("cookie")
                        .is_some_and(|v| v == "SESSDATA=abc");
                    if referer_ok && cookie_ok {
                        Ok(served)
                    } else {
                        Err(StatusCode::FORBIDDEN)
                    }
                }
            }),
        );
        let base = serve(router).await;
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("raw.mp4");
        let request = FetchRequest {
            headers: vec![("Referer".into(), "https://www.bilibili.com/".into())],
            cookie: Some("SESSDATA=abc".into()),
        };
        let recorder = Recorder::default();

        let written = fetcher()
            .fetch(
                &format!("{base}/media.mp4"),
                &dest,
                &request,
                &recorder,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(written, body.len() as u64);
        assert_eq!(std::fs::read(&dest).unwrap(), body);
        assert_eq!(recorder.progress().last(), Some(&100));
    }

    #[tokio::test]
    async fn http_error_status_is_a_download_error() {
        let base = serve(Router::new()).await;
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("raw.mp4");
        let url = format!("{base}/missing.mp4");

        let err = fetcher()
            .fetch(&url, &dest, &FetchRequest::default(), &NoProgress, &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            PipelineError::Download { url: failed, reason } => {
                assert_eq!(failed, url);
                assert!(reason.contains("404"), "{reason}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!dest.exists());
    }
}
