//! In-process store implementing the task, queue, video and credential
//! ports. Used by tests and by `STORE=memory`.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::domain::credential::Credential;
use crate::domain::platform::Platform;
use crate::domain::task::{now_micros, Task, TaskStatus, TaskUpdate, WriteOutcome};
use crate::domain::video::VideoRecord;
use crate::error::StoreError;
use crate::ports::credentials::CredentialStore;
use crate::ports::queue::TaskQueue;
use crate::ports::repository::{format_log_line, TaskRepository, VideoCatalog, LOG_CAPACITY};

const DEFAULT_COOKIE_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

#[derive(Default)]
struct State {
    tasks: HashMap<String, Task>,
    logs: HashMap<String, VecDeque<String>>,
    queue: VecDeque<Task>,
    videos: Vec<VideoRecord>,
    /// Credential and its expiry; `None` when the TTL is past what
    /// `Instant` can represent.
    credentials: HashMap<Platform, (Credential, Option<Instant>)>,
}

struct Shared {
    state: Mutex<State>,
    queued: Notify,
    cookie_ttl: Duration,
}

#[derive(Clone)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_cookie_ttl(DEFAULT_COOKIE_TTL)
    }

    pub fn with_cookie_ttl(cookie_ttl: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                queued: Notify::new(),
                cookie_ttl,
            }),
        }
    }

    fn pop(&self) -> Option<Task> {
        self.shared.state.lock().queue.pop_front()
    }
}

#[async_trait]
impl TaskRepository for MemoryStore {
    async fn create_task(&self, task: &Task) -> Result<(), StoreError> {
        self.shared
            .state
            .lock()
            .tasks
            .insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn get_task(&self, id: &str) -> Result<Option<Task>, StoreError> {
        Ok(self.shared.state.lock().tasks.get(id).cloned())
    }

    async fn update_task_status(
        &self,
        id: &str,
        status: TaskStatus,
        update: TaskUpdate,
    ) -> Result<(), StoreError> {
        let mut state = self.shared.state.lock();
        let task = state
            .tasks
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        task.apply(status, &update, now_micros());
        Ok(())
    }

    async fn transition_task(
        &self,
        id: &str,
        from: &[TaskStatus],
        to: TaskStatus,
        update: TaskUpdate,
    ) -> Result<WriteOutcome, StoreError> {
        let mut state = self.shared.state.lock();
        let Some(task) = state.tasks.get_mut(id) else {
            return Ok(WriteOutcome::Missing);
        };
        if !from.contains(&task.status) {
            return Ok(WriteOutcome::Superseded(task.status));
        }
        task.apply(to, &update, now_micros());
        Ok(WriteOutcome::Applied)
    }

    async fn list_tasks(&self) -> Result<Vec<Task>, StoreError> {
        Ok(self.shared.state.lock().tasks.values().cloned().collect())
    }

    async fn delete_task(&self, id: &str) -> Result<bool, StoreError> {
        let mut state = self.shared.state.lock();
        state.logs.remove(id);
        Ok(state.tasks.remove(id).is_some())
    }

    async fn append_log(&self, id: &str, message: &str) -> Result<(), StoreError> {
        let line = format_log_line(message);
        let mut state = self.shared.state.lock();
        if !state.tasks.contains_key(id) {
            return Ok(());
        }
        let logs = state.logs.entry(id.to_string()).or_default();
        logs.push_front(line);
        logs.truncate(LOG_CAPACITY);
        Ok(())
    }

    async fn get_logs(&self, id: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .shared
            .state
            .lock()
            .logs
            .get(id)
            .map(|logs| logs.iter().cloned().collect())
            .unwrap_or_default())
    }
}

#[async_trait]
impl VideoCatalog for MemoryStore {
    async fn save_video(&self, video: &VideoRecord) -> Result<(), StoreError> {
        self.shared.state.lock().videos.push(video.clone());
        Ok(())
    }

    async fn list_videos(&self) -> Result<Vec<VideoRecord>, StoreError> {
        let mut videos = self.shared.state.lock().videos.clone();
        videos.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(videos)
    }
}

#[async_trait]
impl TaskQueue for MemoryStore {
    async fn enqueue(&self, task: &Task) -> Result<(), StoreError> {
        self.shared.state.lock().queue.push_back(task.clone());
        self.shared.queued.notify_one();
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<Task>, StoreError> {
        Ok(self.pop())
    }

    async fn dequeue_blocking(&self, timeout: Duration) -> Result<Option<Task>, StoreError> {
        let deadline = Instant::now().checked_add(timeout);
        loop {
            let notified = self.shared.queued.notified();
            if let Some(task) = self.pop() {
                return Ok(Some(task));
            }
            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return Ok(self.pop());
                    }
                }
                None => notified.await,
            }
        }
    }

    async fn len(&self) -> Result<usize, StoreError> {
        Ok(self.shared.state.lock().queue.len())
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn get_credential(&self, platform: Platform) -> Result<Option<Credential>, StoreError> {
        let mut state = self.shared.state.lock();
        let expired = match state.credentials.get(&platform) {
            Some((credential, expires)) if expires.map_or(true, |at| at > Instant::now()) => {
                return Ok(Some(credential.clone()))
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            state.credentials.remove(&platform);
        }
        Ok(None)
    }

    async fn set_credential(
        &self,
        platform: Platform,
        credential: &Credential,
    ) -> Result<(), StoreError> {
        let expires = Instant::now().checked_add(self.shared.cookie_ttl);
        self.shared
            .state
            .lock()
            .credentials
            .insert(platform, (credential.clone(), expires));
        Ok(())
    }
}
