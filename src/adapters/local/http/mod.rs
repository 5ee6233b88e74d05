//! JSON API over the task service.
//!
//! Every response carries `success`; payloads go under `data`.

mod error;

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};

pub use error::ApiError;

use crate::application::tasks::TaskService;
use crate::domain::platform::Platform;
use crate::ports::Store;

type ApiResult = Result<Json<Value>, ApiError>;

#[derive(Debug, Deserialize)]
struct CreateTask {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ManualLogin {
    cookie: String,
}

pub fn router<S: Store>(service: Arc<TaskService<S>>) -> Router {
    Router::new()
        .route("/api/tasks", get(list_tasks::<S>).post(create_task::<S>))
        .route("/api/tasks/:id", get(get_task::<S>).delete(delete_task::<S>))
        .route("/api/tasks/:id/retry", post(retry_task::<S>))
        .route("/api/tasks/:id/pause", post(pause_task::<S>))
        .route("/api/tasks/:id/resume", post(resume_task::<S>))
        .route("/api/tasks/:id/cancel", post(cancel_task::<S>))
        .route("/api/tasks/:id/logs", get(task_logs::<S>))
        .route("/api/videos", get(list_videos::<S>))
        .route("/api/auth/status", get(auth_status::<S>))
        .route("/api/auth/:platform", post(login::<S>))
        .with_state(service)
}

fn ok(data: impl serde::Serialize) -> ApiResult {
    Ok(Json(json!({ "success": true, "data": data })))
}

async fn create_task<S: Store>(
    State(service): State<Arc<TaskService<S>>>,
    Json(body): Json<CreateTask>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let task = service.create(&body.url).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "data": task })),
    ))
}

async fn list_tasks<S: Store>(State(service): State<Arc<TaskService<S>>>) -> ApiResult {
    ok(service.list().await?)
}

async fn get_task<S: Store>(
    State(service): State<Arc<TaskService<S>>>,
    Path(id): Path<String>,
) -> ApiResult {
    ok(service.get(&id).await?)
}

async fn delete_task<S: Store>(
    State(service): State<Arc<TaskService<S>>>,
    Path(id): Path<String>,
) -> ApiResult {
    let deleted = service.delete(&id).await?;
    Ok(Json(json!({ "success": true, "deleted": deleted })))
}

async fn retry_task<S: Store>(
    State(service): State<Arc<TaskService<S>>>,
    Path(id): Path<String>,
) -> ApiResult {
    ok(service.retry(&id).await?)
}

async fn pause_task<S: Store>(
    State(service): State<Arc<TaskService<S>>>,
    Path(id): Path<String>,
) -> ApiResult {
    ok(service.pause(&id).await?)
}

async fn resume_task<S: Store>(
    State(service): State<Arc<TaskService<S>>>,
    Path(id): Path<String>,
) -> ApiResult {
    ok(service.resume(&id).await?)
}

async fn cancel_task<S: Store>(
    State(service): State<Arc<TaskService<S>>>,
    Path(id): Path<String>,
) -> ApiResult {
    ok(service.cancel(&id).await?)
}

async fn task_logs<S: Store>(
    State(service): State<Arc<TaskService<S>>>,
    Path(id): Path<String>,
) -> ApiResult {
    ok(service.logs(&id).await?)
}

async fn list_videos<S: Store>(State(service): State<Arc<TaskService<S>>>) -> ApiResult {
    ok(service.videos().await?)
}

async fn auth_status<S: Store>(State(service): State<Arc<TaskService<S>>>) -> ApiResult {
    ok(service.credential_status().await?)
}

async fn login<S: Store>(
    State(service): State<Arc<TaskService<S>>>,
    Path(platform): Path<String>,
    Json(body): Json<ManualLogin>,
) -> ApiResult {
    let platform: Platform = platform
        .parse()
        .map_err(|_| ApiError::bad_request(format!("unknown platform {platform:?}")))?;
    service.login_manual(platform, &body.cookie).await?;
    Ok(Json(json!({ "success": true })))
}
