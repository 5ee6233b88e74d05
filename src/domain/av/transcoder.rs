use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use futures::StreamExt;
use tokio::process::Command;
use tokio_util::codec::{AnyDelimiterCodec, FramedRead};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::ffmpeg::{parse_duration, parse_time_field, StderrTail};
use crate::domain::progress::{
    percent_of_duration, NoProgress, ProgressGate, ProgressObserver, Scaled,
};
use crate::error::PipelineError;

/// Extension of the canonical output container.
pub const CANONICAL_EXTENSION: &str = "mov";

/// Inputs picked up when transcoding a whole directory.
pub const TRANSCODABLE_EXTENSIONS: [&str; 4] = ["mp4", "avi", "mkv", "flv"];

const TOOL_CHECK_TIMEOUT: Duration = Duration::from_secs(5);
const PROBE_TIMEOUT: Duration = Duration::from_secs(30);
const STDERR_TAIL_LINES: usize = 20;
const MAX_STDERR_LINE: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct TranscoderConfig {
    pub ffmpeg_path: PathBuf,
    /// Hard wall-clock limit for one encoder run.
    pub timeout: Duration,
    /// Assumed input duration when probing fails.
    pub fallback_duration: Duration,
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            timeout: Duration::from_secs(1800),
            fallback_duration: Duration::from_secs(3600),
        }
    }
}

#[derive(Debug)]
pub struct BatchFailure {
    pub input: PathBuf,
    pub error: PipelineError,
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub total: usize,
    pub succeeded: Vec<PathBuf>,
    pub failed: Vec<BatchFailure>,
}

/// Converts downloaded media into the canonical profile (H.264, AAC,
/// fast-start QuickTime container) by driving ffmpeg as a subprocess.
#[derive(Debug, Clone)]
pub struct Transcoder {
    config: TranscoderConfig,
}

impl Transcoder {
    pub fn new(config: TranscoderConfig) -> Self {
        Self { config }
    }

    /// Fails with `ToolMissing` unless `ffmpeg -version` runs cleanly.
    pub async fn check_tool(&self) -> Result<(), PipelineError> {
        let path = &self.config.ffmpeg_path;
        let mut command = Command::new(path);
        command
            .arg("-version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        match tokio::time::timeout(TOOL_CHECK_TIMEOUT, command.status()).await {
            Ok(Ok(status)) if status.success() => Ok(()),
            Ok(Ok(status)) => Err(PipelineError::ToolMissing(format!(
                "{} -version exited with {status}",
                path.display()
            ))),
            Ok(Err(e)) => Err(PipelineError::ToolMissing(format!("{}: {e}", path.display()))),
            Err(_) => Err(PipelineError::ToolMissing(format!(
                "{} -version did not answer",
                path.display()
            ))),
        }
    }

    /// Input duration in seconds as reported by ffmpeg, if it can be read.
    pub async fn probe_duration(&self, input: &Path) -> Option<f64> {
        let mut command = Command::new(&self.config.ffmpeg_path);
        command
            .arg("-hide_banner")
            .arg("-i")
            .arg(input)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // ffmpeg exits non-zero when given no output; the banner is still printed.
        let output = match tokio::time::timeout(PROBE_TIMEOUT, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                debug!(input = %input.display(), error = %e, "duration probe failed");
                return None;
            }
            Err(_) => {
                debug!(input = %input.display(), "duration probe timed out");
                return None;
            }
        };
        parse_duration(&String::from_utf8_lossy(&output.stderr))
    }

    /// Probed duration, or the configured fallback when unknown.
    pub fn effective_duration(&self, probed: Option<f64>) -> f64 {
        match probed {
            Some(secs) if secs.is_finite() && secs > 0.0 => secs,
            _ => self.config.fallback_duration.as_secs_f64(),
        }
    }

    /// Transcodes `input` into `output`. Progress is reported as whole
    /// percentages, only when they rise, and always ends at 100 on success.
    pub async fn transcode(
        &self,
        input: &Path,
        output: &Path,
        progress: &dyn ProgressObserver,
        cancel: &CancellationToken,
    ) -> Result<(), PipelineError> {
        self.check_tool().await?;
        if !tokio::fs::try_exists(input).await.unwrap_or(false) {
            return Err(PipelineError::InputMissing(input.to_path_buf()));
        }
        if let Some(dir) = output.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| PipelineError::io(dir, e))?;
        }

        let probed = self.probe_duration(input).await;
        if probed.is_none() {
            warn!(
                input = %input.display(),
                fallback_secs = self.config.fallback_duration.as_secs(),
                "could not read input duration, using fallback"
            );
        }
        let duration = self.effective_duration(probed);

        let mut args: Vec<OsString> = vec!["-hide_banner".into(), "-i".into(), input.into()];
        args.extend(
            [
                "-c:v", "libx264", "-preset", "medium", "-crf", "23", "-c:a", "aac", "-b:a",
                "128k", "-movflags", "+faststart", "-f", "mov", "-y",
            ]
            .map(OsString::from),
        );
        args.push(output.into());

        info!(input = %input.display(), output = %output.display(), duration, "transcoding");
        let mut gate = ProgressGate::new();
        self.run_encoder(args, duration, &mut gate, progress, cancel)
            .await?;

        if !tokio::fs::try_exists(output).await.unwrap_or(false) {
            return Err(PipelineError::TranscodeFailed(format!(
                "encoder exited cleanly but {} was not written",
                output.display()
            )));
        }
        if let Some(pct) = gate.advance(100) {
            progress.on_progress(pct);
        }
        Ok(())
    }

    /// Transcodes each input into `output_dir`, one after another. A failing
    /// input is recorded and the batch moves on; progress covers the whole
    /// batch, and an empty batch is immediately at 100.
    pub async fn transcode_batch(
        &self,
        inputs: &[PathBuf],
        output_dir: &Path,
        progress: &dyn ProgressObserver,
        cancel: &CancellationToken,
    ) -> BatchReport {
        let mut report = BatchReport {
            total: inputs.len(),
            ..Default::default()
        };
        if inputs.is_empty() {
            progress.on_progress(100);
            return report;
        }

        let span = 100.0 / inputs.len() as f64;
        for (index, input) in inputs.iter().enumerate() {
            if cancel.is_cancelled() {
                report.failed.push(BatchFailure {
                    input: input.clone(),
                    error: PipelineError::Cancelled,
                });
                continue;
            }

            let slot = Scaled::new(progress, span * index as f64, span);
            let stem = input.file_stem().unwrap_or(input.as_os_str());
            let mut output = output_dir.join(stem);
            output.set_extension(CANONICAL_EXTENSION);

            match self.transcode(input, &output, &slot, cancel).await {
                Ok(()) => report.succeeded.push(output),
                Err(error) => {
                    warn!(input = %input.display(), %error, "batch item failed");
                    slot.on_progress(100);
                    report.failed.push(BatchFailure {
                        input: input.clone(),
                        error,
                    });
                }
            }
        }
        report
    }

    /// Muxes separately downloaded video and audio tracks: the video stream
    /// is copied, the audio is encoded to AAC.
    pub async fn combine(
        &self,
        video: &Path,
        audio: &Path,
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), PipelineError> {
        self.check_tool().await?;
        for input in [video, audio] {
            if !tokio::fs::try_exists(input).await.unwrap_or(false) {
                return Err(PipelineError::InputMissing(input.to_path_buf()));
            }
        }

        let args: Vec<OsString> = vec![
            "-hide_banner".into(),
            "-i".into(),
            video.into(),
            "-i".into(),
            audio.into(),
            "-c:v".into(),
            "copy".into(),
            "-c:a".into(),
            "aac".into(),
            "-y".into(),
            output.into(),
        ];
        let mut gate = ProgressGate::new();
        self.run_encoder(args, 0.0, &mut gate, &NoProgress, cancel)
            .await
    }

    /// Lists the transcodable files directly inside `dir`, sorted by name.
    pub async fn transcodable_files(dir: &Path) -> Result<Vec<PathBuf>, PipelineError> {
        let mut entries = tokio::fs::read_dir(dir)
            .await
            .map_err(|e| PipelineError::io(dir, e))?;
        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| PipelineError::io(dir, e))?
        {
            let path = entry.path();
            let matches = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| TRANSCODABLE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                .unwrap_or(false);
            if matches && path.is_file() {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    async fn run_encoder(
        &self,
        args: Vec<OsString>,
        duration: f64,
        gate: &mut ProgressGate,
        progress: &dyn ProgressObserver,
        cancel: &CancellationToken,
    ) -> Result<(), PipelineError> {
        let mut child = Command::new(&self.config.ffmpeg_path)
            .args(&args)
            .env("LC_ALL", "C")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| PipelineError::ToolMissing(format!("failed to spawn ffmpeg: {e}")))?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| PipelineError::TranscodeFailed("failed to capture ffmpeg stderr".into()))?;
        // Progress lines end in '\r', regular log lines in '\n'.
        let codec =
            AnyDelimiterCodec::new_with_max_length(b"\r\n".to_vec(), Vec::new(), MAX_STDERR_LINE);
        let mut lines = FramedRead::new(stderr, codec);
        let mut tail = StderrTail::new(STDERR_TAIL_LINES);
        let mut stderr_open = true;

        let deadline = tokio::time::sleep(self.config.timeout);
        tokio::pin!(deadline);

        let status = loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = child.kill().await;
                    return Err(PipelineError::Cancelled);
                }
                _ = &mut deadline => {
                    warn!(timeout_secs = self.config.timeout.as_secs(), "ffmpeg timed out, killing it");
                    let _ = child.kill().await;
                    return Err(PipelineError::TranscodeTimeout(self.config.timeout));
                }
                frame = lines.next(), if stderr_open => match frame {
                    Some(Ok(bytes)) => {
                        let line = String::from_utf8_lossy(&bytes);
                        if let Some(elapsed) = parse_time_field(&line) {
                            if let Some(pct) = gate.advance(percent_of_duration(elapsed, duration)) {
                                progress.on_progress(pct);
                            }
                        } else {
                            tail.push(&line);
                        }
                    }
                    Some(Err(e)) => {
                        debug!(error = %e, "stopped reading ffmpeg stderr");
                        stderr_open = false;
                    }
                    None => stderr_open = false,
                },
                status = child.wait(), if !stderr_open => {
                    break status.map_err(|e| PipelineError::TranscodeFailed(format!("waiting for ffmpeg: {e}")))?;
                }
            }
        };

        if status.success() {
            return Ok(());
        }
        let detail = if tail.is_empty() {
            format!("ffmpeg exited with {status}")
        } else {
            format!("ffmpeg exited with {status}:\n{}", tail.render())
        };
        Err(PipelineError::TranscodeFailed(detail))
    }
}
