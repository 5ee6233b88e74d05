use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::adapters::local::fetcher::{FetchRequest, Fetcher};
use crate::adapters::local::fs::{exists, remove_if_exists, reserve_dir};
use crate::domain::av::{Transcoder, CANONICAL_EXTENSION};
use crate::domain::naming::MediaLayout;
use crate::domain::progress::{ProgressObserver, Scaled};
use crate::domain::task::{Task, TaskStatus, TaskUpdate, WriteOutcome};
use crate::domain::video::VideoRecord;
use crate::error::{PipelineError, StoreError};
use crate::ports::resolver::{Resolution, ResolverRegistry};
use crate::ports::storage::StoragePathProvider;
use crate::ports::Store;

/// Share of the download phase given to the video track when audio is
/// fetched separately.
const VIDEO_TRACK_SHARE: f64 = 80.0;
const QUEUE_ERROR_BACKOFF: Duration = Duration::from_secs(1);
const TASK_DIR_SUFFIX_CHARS: usize = 8;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Longest single wait on an empty queue before checking for shutdown.
    pub poll_interval: Duration,
    /// Register the downloaded file when transcoding fails.
    pub keep_raw_on_transcode_failure: bool,
    /// How often a running phase checks whether another writer moved the
    /// task.
    pub status_check_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            keep_raw_on_transcode_failure: true,
            status_check_interval: Duration::from_secs(2),
        }
    }
}

/// How one dequeued entry ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    /// Transcoding failed and the raw download was registered instead.
    Degraded,
    Failed,
    /// Stopped by a pause, cancel or delete, or by worker shutdown.
    Interrupted,
    /// The stored task was gone or no longer pending.
    Skipped,
    /// The store failed before the task could be claimed; the entry went
    /// back to the queue.
    Requeued,
}

/// Why a phase stopped early.
#[derive(Debug)]
enum Halt {
    Failed(PipelineError),
    /// Another writer changed or removed the task.
    Superseded,
    Shutdown,
}

impl From<PipelineError> for Halt {
    fn from(error: PipelineError) -> Self {
        Halt::Failed(error)
    }
}

impl From<StoreError> for Halt {
    fn from(error: StoreError) -> Self {
        Halt::Failed(PipelineError::Store(error))
    }
}

/// Latest progress reported by the running phase.
#[derive(Debug, Clone, Default)]
struct PhaseSnapshot {
    progress: Option<u8>,
    speed: Option<String>,
}

struct PhaseReporter {
    tx: watch::Sender<PhaseSnapshot>,
}

impl PhaseReporter {
    fn channel() -> (Self, watch::Receiver<PhaseSnapshot>) {
        let (tx, rx) = watch::channel(PhaseSnapshot::default());
        (Self { tx }, rx)
    }
}

impl ProgressObserver for PhaseReporter {
    fn on_progress(&self, pct: u8) {
        self.tx.send_modify(|snapshot| snapshot.progress = Some(pct));
    }

    fn on_speed(&self, speed: &str) {
        self.tx
            .send_modify(|snapshot| snapshot.speed = Some(speed.to_string()));
    }
}

/// Drains the task queue: resolve, download, transcode, finalize.
pub struct WorkerService<S, P> {
    store: S,
    storage: P,
    resolvers: ResolverRegistry,
    fetcher: Fetcher,
    transcoder: Transcoder,
    config: WorkerConfig,
}

impl<S, P> WorkerService<S, P>
where
    S: Store,
    P: StoragePathProvider + 'static,
{
    pub fn new(
        store: S,
        storage: P,
        resolvers: ResolverRegistry,
        fetcher: Fetcher,
        transcoder: Transcoder,
        config: WorkerConfig,
    ) -> Self {
        Self {
            store,
            storage,
            resolvers,
            fetcher,
            transcoder,
            config,
        }
    }

    /// Processes queue entries one at a time until `shutdown` is cancelled.
    /// A popped entry is always processed; shutdown is only observed
    /// between dequeue waits and inside running phases.
    pub async fn run_worker_loop(&self, worker_id: usize, shutdown: CancellationToken) {
        info!(worker_id, "worker started");
        while !shutdown.is_cancelled() {
            match self.store.dequeue_blocking(self.config.poll_interval).await {
                Ok(Some(entry)) => {
                    let task_id = entry.id.clone();
                    let outcome = self.process_entry(entry, &shutdown).await;
                    debug!(worker_id, %task_id, ?outcome, "entry processed");
                }
                Ok(None) => continue,
                Err(e) => {
                    error!(worker_id, error = %e, "queue error");
                    tokio::select! {
                        _ = shutdown.cancelled() => {}
                        _ = tokio::time::sleep(QUEUE_ERROR_BACKOFF) => {}
                    }
                }
            }
        }
        info!(worker_id, "worker stopped");
    }

    /// Pops and processes one entry without waiting. `None` when the queue
    /// is empty.
    pub async fn process_next(
        &self,
        shutdown: &CancellationToken,
    ) -> Result<Option<TaskOutcome>, StoreError> {
        match self.store.dequeue().await? {
            Some(entry) => Ok(Some(self.process_entry(entry, shutdown).await)),
            None => Ok(None),
        }
    }

    /// Takes one queue entry through the pipeline. Failures end up on the
    /// task record and never escape.
    pub async fn process_entry(&self, entry: Task, shutdown: &CancellationToken) -> TaskOutcome {
        let task = match self.claim(&entry).await {
            Ok(Some(task)) => task,
            Ok(None) => return TaskOutcome::Skipped,
            Err(e) => {
                error!(task_id = %entry.id, error = %e, "could not claim task, returning it to the queue");
                self.return_to_queue(&entry, shutdown).await;
                return TaskOutcome::Requeued;
            }
        };

        let mut resolved_url = None;
        match self.run(&task, &mut resolved_url, shutdown).await {
            Ok(outcome) => outcome,
            Err(Halt::Failed(error)) => {
                self.fail(&task, &error, resolved_url.as_deref()).await;
                TaskOutcome::Failed
            }
            Err(Halt::Superseded) => {
                info!(task_id = %task.id, "task changed by another writer, stopped");
                TaskOutcome::Interrupted
            }
            Err(Halt::Shutdown) => {
                self.requeue_interrupted(&task).await;
                TaskOutcome::Interrupted
            }
        }
    }

    /// Moves a pending task to `downloading`. Entries whose task was
    /// deleted, paused or cancelled while queued are skipped.
    async fn claim(&self, entry: &Task) -> Result<Option<Task>, StoreError> {
        let Some(current) = self.store.get_task(&entry.id).await? else {
            debug!(task_id = %entry.id, "queued task no longer exists");
            return Ok(None);
        };
        if current.status != TaskStatus::Pending {
            info!(task_id = %entry.id, status = %current.status, "skipping task that is not pending");
            return Ok(None);
        }

        let update = TaskUpdate::new().progress(0).clear_speed().clear_error();
        match self
            .store
            .transition_task(&entry.id, &[TaskStatus::Pending], TaskStatus::Downloading, update)
            .await?
        {
            WriteOutcome::Applied => Ok(Some(current)),
            outcome => {
                debug!(task_id = %entry.id, ?outcome, "task claimed elsewhere");
                Ok(None)
            }
        }
    }

    /// Puts back an entry that was popped but could not be claimed. Waits
    /// out the store error first unless the worker is stopping.
    async fn return_to_queue(&self, entry: &Task, shutdown: &CancellationToken) {
        tokio::select! {
            _ = shutdown.cancelled() => {}
            _ = tokio::time::sleep(QUEUE_ERROR_BACKOFF) => {}
        }
        match self.store.enqueue(entry).await {
            Ok(()) => debug!(task_id = %entry.id, "unclaimed entry re-queued"),
            Err(e) => error!(task_id = %entry.id, error = %e, "could not re-queue unclaimed entry"),
        }
    }

    async fn run(
        &self,
        task: &Task,
        resolved_url: &mut Option<String>,
        shutdown: &CancellationToken,
    ) -> Result<TaskOutcome, Halt> {
        info!(task_id = %task.id, url = %task.url, platform = %task.platform, "processing task");
        self.log(&task.id, "Resolving media").await;

        let credential = match self.store.get_credential(task.platform).await {
            Ok(credential) => credential,
            Err(e) => {
                warn!(task_id = %task.id, error = %e, "could not read credential, continuing without");
                None
            }
        };
        let resolution = self
            .resolvers
            .resolve(task.platform, &task.url, credential.clone())
            .await?;
        *resolved_url = Some(resolution.media_url.clone());

        self.advance(
            &task.id,
            TaskStatus::Downloading,
            TaskStatus::Downloading,
            TaskUpdate::new()
                .title(resolution.title.clone())
                .content_category(resolution.content_category),
        )
        .await?;
        self.log(&task.id, &format!("Downloading \"{}\"", resolution.title))
            .await;

        let layout = self.reserve_layout(task, &resolution.title).await?;
        let request = FetchRequest {
            headers: resolution.headers.clone(),
            cookie: credential.and_then(|c| c.cookie_header(task.platform)),
        };
        let raw = self
            .download(task, &resolution, &layout, &request, shutdown)
            .await?;

        self.advance(
            &task.id,
            TaskStatus::Downloading,
            TaskStatus::Transcoding,
            TaskUpdate::new().progress(0).clear_speed(),
        )
        .await?;
        self.log(&task.id, "Download finished, transcoding").await;

        self.transcode(task, &resolution, &layout, &raw, shutdown)
            .await
    }

    /// Picks the task's working directory. The plain title directory goes
    /// to whichever task creates it first; any other task with the same
    /// title works under a directory suffixed with its own id.
    async fn reserve_layout(&self, task: &Task, title: &str) -> Result<MediaLayout, Halt> {
        let root = self.storage.root().await?;
        let layout = MediaLayout::new(&root, task.platform, title);
        if reserve_dir(&layout.dir)
            .await
            .map_err(|e| PipelineError::io(&layout.dir, e))?
        {
            return Ok(layout);
        }

        let suffix: String = task
            .id
            .chars()
            .filter(char::is_ascii_alphanumeric)
            .take(TASK_DIR_SUFFIX_CHARS)
            .collect();
        let layout = layout.with_suffix(&suffix);
        tokio::fs::create_dir_all(&layout.dir)
            .await
            .map_err(|e| PipelineError::io(&layout.dir, e))?;
        debug!(task_id = %task.id, dir = %layout.dir.display(), "title directory taken, using task suffix");
        Ok(layout)
    }

    async fn download(
        &self,
        task: &Task,
        resolution: &Resolution,
        layout: &MediaLayout,
        request: &FetchRequest,
        shutdown: &CancellationToken,
    ) -> Result<PathBuf, Halt> {
        let raw = layout.raw();
        let (reporter, rx) = PhaseReporter::channel();
        let cancel = shutdown.child_token();

        match &resolution.audio_url {
            None => {
                let work = self
                    .fetcher
                    .fetch(&resolution.media_url, &raw, request, &reporter, &cancel);
                self.drive(&task.id, TaskStatus::Downloading, work, rx, &cancel, shutdown)
                    .await?;
            }
            Some(audio_url) => {
                let work = async {
                    let video = Scaled::new(&reporter, 0.0, VIDEO_TRACK_SHARE);
                    self.fetcher
                        .fetch(&resolution.media_url, &raw, request, &video, &cancel)
                        .await?;
                    let audio = Scaled::new(&reporter, VIDEO_TRACK_SHARE, 100.0 - VIDEO_TRACK_SHARE);
                    self.fetcher
                        .fetch(audio_url, &layout.audio(), request, &audio, &cancel)
                        .await
                };
                self.drive(&task.id, TaskStatus::Downloading, work, rx, &cancel, shutdown)
                    .await?;
                self.combine_tracks(task, layout, shutdown).await?;
            }
        }
        Ok(raw)
    }

    /// Muxes a separately fetched audio track into the raw file. A failed
    /// mux leaves the video-only download in place.
    async fn combine_tracks(
        &self,
        task: &Task,
        layout: &MediaLayout,
        shutdown: &CancellationToken,
    ) -> Result<(), Halt> {
        let (raw, audio, merged) = (layout.raw(), layout.audio(), layout.merged());
        let combined = self
            .transcoder
            .combine(&raw, &audio, &merged, &shutdown.child_token())
            .await;
        if shutdown.is_cancelled() {
            discard(&merged).await;
            return Err(Halt::Shutdown);
        }

        match combined {
            Ok(()) => {
                tokio::fs::rename(&merged, &raw)
                    .await
                    .map_err(|e| PipelineError::io(&merged, e))?;
                debug!(task_id = %task.id, "audio track merged");
            }
            Err(e) => {
                warn!(task_id = %task.id, error = %e, "audio merge failed, keeping video only");
                self.log(&task.id, &format!("Audio merge failed, continuing with video only: {e}"))
                    .await;
                discard(&merged).await;
            }
        }
        discard(&audio).await;
        Ok(())
    }

    async fn transcode(
        &self,
        task: &Task,
        resolution: &Resolution,
        layout: &MediaLayout,
        raw: &Path,
        shutdown: &CancellationToken,
    ) -> Result<TaskOutcome, Halt> {
        let output = layout.output(CANONICAL_EXTENSION);
        let (reporter, rx) = PhaseReporter::channel();
        let cancel = shutdown.child_token();
        let work = self.transcoder.transcode(raw, &output, &reporter, &cancel);

        match self
            .drive(&task.id, TaskStatus::Transcoding, work, rx, &cancel, shutdown)
            .await
        {
            Ok(()) => {
                discard(raw).await;
                self.finish(task, &resolution.title, output, false).await?;
                info!(task_id = %task.id, "task completed");
                Ok(TaskOutcome::Completed)
            }
            Err(Halt::Failed(error)) => {
                discard(&output).await;
                if !(self.config.keep_raw_on_transcode_failure && exists(raw).await) {
                    return Err(Halt::Failed(error));
                }
                warn!(task_id = %task.id, %error, "transcode failed, keeping the downloaded file");
                self.log(
                    &task.id,
                    &format!("Transcode failed, keeping the downloaded file: {error}"),
                )
                .await;
                self.finish(task, &resolution.title, raw.to_path_buf(), true)
                    .await?;
                Ok(TaskOutcome::Degraded)
            }
            Err(halt) => {
                discard(&output).await;
                Err(halt)
            }
        }
    }

    async fn finish(
        &self,
        task: &Task,
        title: &str,
        path: PathBuf,
        raw: bool,
    ) -> Result<(), Halt> {
        self.store
            .save_video(&VideoRecord::for_task(task, title, path.clone(), raw))
            .await?;
        self.advance(
            &task.id,
            TaskStatus::Transcoding,
            TaskStatus::Completed,
            TaskUpdate::new()
                .progress(100)
                .save_path(path.clone())
                .clear_speed(),
        )
        .await?;
        self.log(&task.id, &format!("Completed: {}", path.display()))
            .await;
        Ok(())
    }

    /// Runs one phase's work next to a forwarder that writes its progress
    /// to the store and watches for status changes by other writers.
    async fn drive<T>(
        &self,
        task_id: &str,
        phase: TaskStatus,
        work: impl Future<Output = Result<T, PipelineError>>,
        rx: watch::Receiver<PhaseSnapshot>,
        cancel: &CancellationToken,
        shutdown: &CancellationToken,
    ) -> Result<T, Halt> {
        let done = CancellationToken::new();
        let work = async {
            let result = work.await;
            done.cancel();
            result
        };
        let (result, superseded) =
            tokio::join!(work, self.forward_progress(task_id, phase, rx, cancel, &done));

        if superseded {
            return Err(Halt::Superseded);
        }
        match result {
            Ok(value) => Ok(value),
            Err(PipelineError::Cancelled) if shutdown.is_cancelled() => Err(Halt::Shutdown),
            Err(e) => Err(Halt::Failed(e)),
        }
    }

    /// Returns true when it cancelled the phase because the task left
    /// `phase` or was deleted.
    async fn forward_progress(
        &self,
        task_id: &str,
        phase: TaskStatus,
        mut rx: watch::Receiver<PhaseSnapshot>,
        cancel: &CancellationToken,
        done: &CancellationToken,
    ) -> bool {
        let mut checks = tokio::time::interval(self.config.status_check_interval);
        checks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut open = true;

        loop {
            let stopped = tokio::select! {
                _ = done.cancelled() => {
                    if open && rx.has_changed().unwrap_or(false) {
                        let snapshot = rx.borrow_and_update().clone();
                        self.write_snapshot(task_id, phase, snapshot).await;
                    }
                    return false;
                }
                changed = rx.changed(), if open => {
                    if changed.is_err() {
                        open = false;
                        continue;
                    }
                    let snapshot = rx.borrow_and_update().clone();
                    self.write_snapshot(task_id, phase, snapshot).await
                }
                _ = checks.tick() => self.still_in_phase(task_id, phase).await,
            };
            if stopped {
                cancel.cancel();
                return true;
            }
        }
    }

    /// Writes progress for a task still in `phase`; true if it no longer is.
    async fn write_snapshot(&self, task_id: &str, phase: TaskStatus, snapshot: PhaseSnapshot) -> bool {
        let written = match snapshot.progress {
            Some(progress) => {
                self.store
                    .update_progress(task_id, phase, progress, snapshot.speed)
                    .await
            }
            None => match snapshot.speed {
                Some(speed) => {
                    self.store
                        .transition_task(task_id, &[phase], phase, TaskUpdate::new().speed(speed))
                        .await
                }
                None => return false,
            },
        };
        match written {
            Ok(WriteOutcome::Applied) => false,
            Ok(outcome) => {
                info!(%task_id, ?outcome, "progress write rejected, stopping");
                true
            }
            Err(e) => {
                warn!(%task_id, error = %e, "could not record progress");
                false
            }
        }
    }

    /// True if the task was moved out of `phase` or deleted.
    async fn still_in_phase(&self, task_id: &str, phase: TaskStatus) -> bool {
        match self.store.get_task(task_id).await {
            Ok(Some(task)) if task.status == phase => false,
            Ok(Some(task)) => {
                info!(%task_id, status = %task.status, "task moved by another writer");
                true
            }
            Ok(None) => {
                info!(%task_id, "task deleted while processing");
                true
            }
            Err(e) => {
                warn!(%task_id, error = %e, "status check failed");
                false
            }
        }
    }

    /// Conditional write between statuses this worker owns.
    async fn advance(
        &self,
        task_id: &str,
        from: TaskStatus,
        to: TaskStatus,
        update: TaskUpdate,
    ) -> Result<(), Halt> {
        match self.store.transition_task(task_id, &[from], to, update).await? {
            WriteOutcome::Applied => Ok(()),
            _ => Err(Halt::Superseded),
        }
    }

    async fn fail(&self, task: &Task, error: &PipelineError, resolved_url: Option<&str>) {
        let message = error.failure_message(resolved_url);
        error!(task_id = %task.id, kind = %error.kind(), %error, "task failed");

        let update = TaskUpdate::new().error(message.clone()).clear_speed();
        match self
            .store
            .transition_task(
                &task.id,
                &[TaskStatus::Downloading, TaskStatus::Transcoding],
                TaskStatus::Failed,
                update,
            )
            .await
        {
            Ok(WriteOutcome::Applied) => self.log(&task.id, &format!("Failed: {message}")).await,
            Ok(outcome) => debug!(task_id = %task.id, ?outcome, "failure not recorded, task moved"),
            Err(e) => error!(task_id = %task.id, error = %e, "could not record failure"),
        }
    }

    /// Returns a task interrupted by shutdown to the queue.
    async fn requeue_interrupted(&self, task: &Task) {
        let update = TaskUpdate::new().progress(0).clear_speed();
        let requeued = async {
            let outcome = self
                .store
                .transition_task(
                    &task.id,
                    &[TaskStatus::Downloading, TaskStatus::Transcoding],
                    TaskStatus::Pending,
                    update,
                )
                .await?;
            if outcome != WriteOutcome::Applied {
                return Ok(false);
            }
            if let Some(current) = self.store.get_task(&task.id).await? {
                self.store.enqueue(&current).await?;
                self.store
                    .append_log(&task.id, "Worker stopped, task returned to the queue")
                    .await?;
            }
            Ok::<_, StoreError>(true)
        };
        match requeued.await {
            Ok(true) => info!(task_id = %task.id, "interrupted task re-queued"),
            Ok(false) => debug!(task_id = %task.id, "interrupted task was moved, not re-queued"),
            Err(e) => error!(task_id = %task.id, error = %e, "could not re-queue interrupted task"),
        }
    }

    async fn log(&self, task_id: &str, message: &str) {
        if let Err(e) = self.store.append_log(task_id, message).await {
            warn!(%task_id, error = %e, "could not append task log");
        }
    }
}

async fn discard(path: &Path) {
    if let Err(e) = remove_if_exists(path).await {
        warn!(path = %path.display(), error = %e, "could not remove file");
    }
}
