use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::{ApiError, AppState};
use crate::config::TokenOverrides;
use crate::schema::{BatchConfig, BatchItem, build_batch};
use crate::services::queue::{BatchRun, BatchRunSnapshot};

#[derive(Debug, Deserialize)]
pub struct CreateBatchRequest {
    pub items: Vec<BatchItem>,
    #[serde(default)]
    pub config: BatchConfig,
    #[serde(default)]
    pub tokens: Option<TokenOverrides>,
}

#[derive(Debug, Serialize)]
pub struct CreateBatchResponse {
    pub id: Uuid,
    pub task_count: usize,
}

/// Validates and registers a new batch, then drives it in the background.
/// Construction is all-or-nothing: a bad item rejects the whole request
/// before any network activity.
pub async fn create_batch(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateBatchRequest>,
) -> Result<Json<CreateBatchResponse>, ApiError> {
    let tasks = build_batch(&request.items, &request.config)
        .map_err(|err| ApiError::unprocessable(err.to_string()))?;

    let run = BatchRun::new(tasks);
    let task_count = request.items.len();
    state
        .batch_runs
        .lock()
        .unwrap()
        .insert(run.id, Arc::clone(&run));

    let tokens = state.config.tokens_with(request.tokens);
    let queue = state.queue.clone();
    let worker_run = Arc::clone(&run);
    tokio::spawn(async move {
        queue.run(&worker_run, &tokens).await;
    });

    tracing::info!(batch_id = %run.id, task_count, "batch accepted");
    Ok(Json(CreateBatchResponse {
        id: run.id,
        task_count,
    }))
}

pub async fn get_batch(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<BatchRunSnapshot>, ApiError> {
    let run = state
        .batch_runs
        .lock()
        .unwrap()
        .get(&id)
        .cloned()
        .ok_or_else(|| ApiError::not_found(format!("no batch {id}")))?;
    Ok(Json(run.snapshot()))
}

#[derive(Debug, Deserialize)]
pub struct RetryRequest {
    pub task_id: Uuid,
    #[serde(default)]
    pub tokens: Option<TokenOverrides>,
}

#[derive(Debug, Serialize)]
pub struct RetryResponse {
    pub task_id: Uuid,
}

/// Spawns a brand-new lifecycle for a terminal task's input and runs it in
/// the background. The original record is left as-is.
pub async fn retry_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(request): Json<RetryRequest>,
) -> Result<Json<RetryResponse>, ApiError> {
    let run = state
        .batch_runs
        .lock()
        .unwrap()
        .get(&id)
        .cloned()
        .ok_or_else(|| ApiError::not_found(format!("no batch {id}")))?;

    let handle = run
        .respawn_task(request.task_id)
        .map_err(|err| ApiError::conflict(err.to_string()))?;
    let new_task_id = handle.lock().unwrap().id;

    let tokens = state.config.tokens_with(request.tokens);
    let queue = state.queue.clone();
    let worker_run = Arc::clone(&run);
    tokio::spawn(async move {
        queue.process_single(&worker_run, handle, &tokens).await;
    });

    tracing::info!(batch_id = %id, task_id = %new_task_id, "task respawned");
    Ok(Json(RetryResponse {
        task_id: new_task_id,
    }))
}
