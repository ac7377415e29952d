use axum::Json;
use axum::extract::{Path, Query};
use axum::routing::{get, post};
use axum::{Router, extract::State, http::StatusCode};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::{Task, TaskDraft};
use crate::services::{EngineState, RefreshStats, SyncOutcome, SyncTrigger};
use crate::state::AppState;

#[derive(Deserialize)]
struct SyncParams {
    #[serde(default = "manual_trigger")]
    trigger: SyncTrigger,
}

fn manual_trigger() -> SyncTrigger {
    SyncTrigger::Manual
}

#[derive(Serialize)]
struct SyncStatus {
    state: EngineState,
    pending: usize,
    online: bool,
}

#[derive(Serialize)]
struct RefreshResponse {
    sync: SyncOutcome,
    refresh: RefreshStats,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/tasks", get(list_tasks).post(create_task))
        .route(
            "/tasks/{id}",
            get(get_task).put(update_task).delete(delete_task),
        )
        .route("/sync", post(sync_now))
        .route("/sync/status", get(sync_status))
        .route("/refresh", post(refresh))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Result<StatusCode, AppError> {
    state.engine.pending_count().await?;
    Ok(StatusCode::OK)
}

async fn list_tasks(State(state): State<AppState>) -> Result<Json<Vec<Task>>, AppError> {
    let tasks = state.engine.store().list().await?;
    Ok(Json(tasks))
}

async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Task>, AppError> {
    let task = state.engine.store().get(id).await?.ok_or(AppError::NotFound)?;
    Ok(Json(task))
}

async fn create_task(
    State(state): State<AppState>,
    Json(draft): Json<TaskDraft>,
) -> Result<(StatusCode, Json<Task>), AppError> {
    if draft.title.trim().is_empty() {
        return Err(AppError::BadRequest("title must not be empty".to_string()));
    }
    let task = state.engine.create(draft).await?;
    Ok((StatusCode::CREATED, Json(task)))
}

async fn update_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(draft): Json<TaskDraft>,
) -> Result<Json<Task>, AppError> {
    if draft.title.trim().is_empty() {
        return Err(AppError::BadRequest("title must not be empty".to_string()));
    }
    let task = state.engine.update(id, draft).await?;
    Ok(Json(task))
}

async fn delete_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    state.engine.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn sync_now(
    State(state): State<AppState>,
    Query(params): Query<SyncParams>,
) -> Result<Json<SyncOutcome>, AppError> {
    let outcome = state.engine.sync(params.trigger).await?;
    Ok(Json(outcome))
}

async fn refresh(State(state): State<AppState>) -> Result<Json<RefreshResponse>, AppError> {
    let (sync, refresh) = state.engine.sync_and_refresh(SyncTrigger::Manual).await?;
    Ok(Json(RefreshResponse { sync, refresh }))
}

async fn sync_status(State(state): State<AppState>) -> Result<Json<SyncStatus>, AppError> {
    Ok(Json(SyncStatus {
        state: state.engine.state(),
        pending: state.engine.pending_count().await?,
        online: state.engine.connectivity().is_currently_online(),
    }))
}
