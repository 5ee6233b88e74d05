//! Redis TaskRepository and VideoCatalog implementations.

use std::collections::HashMap;
use std::sync::LazyLock;

use async_trait::async_trait;
use deadpool_redis::redis::{AsyncCommands, Script};

use super::codec::{task_from_fields, task_to_fields, update_to_fields};
use super::pool::RedisPool;
use super::{logs_key, task_key, TASK_PREFIX, VIDEO_PREFIX};
use crate::domain::task::{now_micros, Task, TaskStatus, TaskUpdate, WriteOutcome};
use crate::domain::video::VideoRecord;
use crate::error::StoreError;
use crate::ports::repository::{format_log_line, TaskRepository, VideoCatalog, LOG_CAPACITY};

// KEYS[1] task hash
// ARGV[1] now (µs), ARGV[2] space separated fields to delete,
// ARGV[3] space separated allowed current statuses ('' = any),
// ARGV[4..] field/value pairs
//
// Returns 'missing', the current status when it is not allowed, or 'ok'.
static UPDATE_SCRIPT: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r"
local key = KEYS[1]
if redis.call('EXISTS', key) == 0 then
  return 'missing'
end
if ARGV[3] ~= '' then
  local current = redis.call('HGET', key, 'status') or ''
  if not string.find(' ' .. ARGV[3] .. ' ', ' ' .. current .. ' ', 1, true) then
    return current
  end
end
local now = tonumber(ARGV[1])
local previous = tonumber(redis.call('HGET', key, 'updated_at') or '0') or 0
if now <= previous then
  now = previous + 1
end
for field in string.gmatch(ARGV[2], '%S+') do
  redis.call('HDEL', key, field)
end
redis.call('HSET', key, 'updated_at', string.format('%.0f', now), unpack(ARGV, 4))
return 'ok'
",
    )
});

// KEYS[1] task hash, KEYS[2] log list; ARGV[1] line, ARGV[2] capacity
static APPEND_LOG_SCRIPT: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r"
if redis.call('EXISTS', KEYS[1]) == 0 then
  return 0
end
redis.call('LPUSH', KEYS[2], ARGV[1])
redis.call('LTRIM', KEYS[2], 0, tonumber(ARGV[2]) - 1)
return 1
",
    )
});

impl RedisPool {
    async fn run_update(
        &self,
        id: &str,
        from: &[TaskStatus],
        status: TaskStatus,
        update: &TaskUpdate,
    ) -> Result<WriteOutcome, StoreError> {
        let mut conn = self.conn().await?;
        let (clear, set) = update_to_fields(status, update);
        let allowed: Vec<&str> = from.iter().map(|s| s.as_ref()).collect();

        let mut invocation = UPDATE_SCRIPT.key(task_key(id));
        invocation
            .arg(now_micros().timestamp_micros())
            .arg(clear.join(" "))
            .arg(allowed.join(" "));
        for (field, value) in set {
            invocation.arg(field).arg(value);
        }
        let reply: String = invocation.invoke_async(&mut conn).await?;

        match reply.as_str() {
            "ok" => Ok(WriteOutcome::Applied),
            "missing" => Ok(WriteOutcome::Missing),
            other => other
                .parse()
                .map(WriteOutcome::Superseded)
                .map_err(|_| StoreError::Corrupt {
                    key: task_key(id),
                    reason: format!("invalid status {other:?}"),
                }),
        }
    }
}

#[async_trait]
impl TaskRepository for RedisPool {
    async fn create_task(&self, task: &Task) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        conn.hset_multiple::<_, _, _, ()>(task_key(&task.id), &task_to_fields(task))
            .await?;
        Ok(())
    }

    async fn get_task(&self, id: &str) -> Result<Option<Task>, StoreError> {
        let mut conn = self.conn().await?;
        let key = task_key(id);
        let fields: HashMap<String, String> = conn.hgetall(&key).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        task_from_fields(&key, fields).map(Some)
    }

    async fn update_task_status(
        &self,
        id: &str,
        status: TaskStatus,
        update: TaskUpdate,
    ) -> Result<(), StoreError> {
        match self.run_update(id, &[], status, &update).await? {
            WriteOutcome::Missing => Err(StoreError::NotFound(id.to_string())),
            _ => Ok(()),
        }
    }

    async fn transition_task(
        &self,
        id: &str,
        from: &[TaskStatus],
        to: TaskStatus,
        update: TaskUpdate,
    ) -> Result<WriteOutcome, StoreError> {
        if from.is_empty() {
            // An empty allow-list means "any" to the script.
            return match self.get_task(id).await? {
                Some(task) => Ok(WriteOutcome::Superseded(task.status)),
                None => Ok(WriteOutcome::Missing),
            };
        }
        self.run_update(id, from, to, &update).await
    }

    async fn list_tasks(&self) -> Result<Vec<Task>, StoreError> {
        let mut conn = self.conn().await?;
        let keys: Vec<String> = conn.keys(format!("{TASK_PREFIX}*")).await?;

        let mut tasks = Vec::with_capacity(keys.len());
        for key in keys {
            // Deleted since KEYS ran.
            let fields: HashMap<String, String> = conn.hgetall(&key).await?;
            if fields.is_empty() {
                continue;
            }
            tasks.push(task_from_fields(&key, fields)?);
        }
        Ok(tasks)
    }

    async fn delete_task(&self, id: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn().await?;
        let removed: usize = conn.del(&[task_key(id), logs_key(id)]).await?;
        Ok(removed > 0)
    }

    async fn append_log(&self, id: &str, message: &str) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        let _: i64 = APPEND_LOG_SCRIPT
            .key(task_key(id))
            .key(logs_key(id))
            .arg(format_log_line(message))
            .arg(LOG_CAPACITY)
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn get_logs(&self, id: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn().await?;
        Ok(conn.lrange(logs_key(id), 0, -1).await?)
    }
}

#[async_trait]
impl VideoCatalog for RedisPool {
    async fn save_video(&self, video: &VideoRecord) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        let json = serde_json::to_string(video)?;
        conn.set::<_, _, ()>(format!("{VIDEO_PREFIX}{}", video.id), json)
            .await?;
        Ok(())
    }

    async fn list_videos(&self) -> Result<Vec<VideoRecord>, StoreError> {
        let mut conn = self.conn().await?;
        let keys: Vec<String> = conn.keys(format!("{VIDEO_PREFIX}*")).await?;

        let mut videos = Vec::with_capacity(keys.len());
        for key in keys {
            let json: Option<String> = conn.get(&key).await?;
            if let Some(json) = json {
                videos.push(serde_json::from_str::<VideoRecord>(&json)?);
            }
        }
        videos.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(videos)
    }
}

/// These need a running Redis: `REDIS_URL=redis://127.0.0.1/ cargo test -- --ignored`
#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::queue::TaskQueue;

    fn pool() -> RedisPool {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1/".into());
        RedisPool::new(&url).unwrap()
    }

    #[tokio::test]
    #[ignore]
    async fn update_script_stamps_and_guards_status() {
        let store = pool();
        let task = Task::new("https://example.com/v/redis");
        store.create_task(&task).await.unwrap();

        let outcome = store
            .transition_task(
                &task.id,
                &[TaskStatus::Failed],
                TaskStatus::Pending,
                TaskUpdate::new(),
            )
            .await
            .unwrap();
        assert_eq!(outcome, WriteOutcome::Superseded(TaskStatus::Pending));

        store
            .update_task_status(
                &task.id,
                TaskStatus::Failed,
                TaskUpdate::new().error("boom"),
            )
            .await
            .unwrap();
        store
            .update_task_status(&task.id, TaskStatus::Pending, TaskUpdate::new().clear_error())
            .await
            .unwrap();

        let stored = store.get_task(&task.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Pending);
        assert!(stored.error_message.is_none());
        assert!(stored.updated_at > task.updated_at);

        assert!(store.delete_task(&task.id).await.unwrap());
        assert!(store.get_task(&task.id).await.unwrap().is_none());
        assert!(matches!(
            store
                .update_task_status(&task.id, TaskStatus::Failed, TaskUpdate::new())
                .await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    #[ignore]
    async fn log_list_is_capped() {
        let store = pool();
        let task = Task::new("https://example.com/v/logs");
        store.create_task(&task).await.unwrap();
        for i in 0..120 {
            store.append_log(&task.id, &format!("line {i}")).await.unwrap();
        }

        let logs = store.get_logs(&task.id).await.unwrap();
        assert_eq!(logs.len(), LOG_CAPACITY);
        assert!(logs[0].ends_with("line 119"));

        store.delete_task(&task.id).await.unwrap();
        assert!(store.get_logs(&task.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    #[ignore]
    async fn queue_pops_in_push_order() {
        let store = pool();
        while store.dequeue().await.unwrap().is_some() {}

        let first = Task::new("https://example.com/v/first");
        let second = Task::new("https://example.com/v/second");
        store.enqueue(&first).await.unwrap();
        store.enqueue(&second).await.unwrap();

        assert_eq!(store.dequeue().await.unwrap().unwrap().id, first.id);
        assert_eq!(store.dequeue().await.unwrap().unwrap().id, second.id);
    }
}
