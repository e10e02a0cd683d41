use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use serde::Deserialize;

use crate::api::{ApiError, AppState};
use crate::schema::{TaskLogRow, UploadRow, VeoImageRow, VeoVideoTaskRow};

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub limit: Option<i64>,
}

fn clamp_limit(params: &ListParams) -> i64 {
    params.limit.unwrap_or(100).clamp(1, 500)
}

pub async fn list_tasks(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<TaskLogRow>>, ApiError> {
    Ok(Json(state.store.task_history(clamp_limit(&params)).await?))
}

pub async fn list_uploads(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<UploadRow>>, ApiError> {
    Ok(Json(state.store.upload_history(clamp_limit(&params)).await?))
}

pub async fn list_images(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<VeoImageRow>>, ApiError> {
    Ok(Json(state.store.image_history(clamp_limit(&params)).await?))
}

pub async fn list_videos(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<VeoVideoTaskRow>>, ApiError> {
    Ok(Json(state.store.video_history(clamp_limit(&params)).await?))
}

pub async fn delete_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if state.store.delete_task(id).await? {
        Ok(Json(serde_json::json!({ "deleted": true })))
    } else {
        Err(ApiError::not_found(format!("no task record {id}")))
    }
}

pub async fn delete_upload(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if state.store.delete_upload(id).await? {
        Ok(Json(serde_json::json!({ "deleted": true })))
    } else {
        Err(ApiError::not_found(format!("no upload record {id}")))
    }
}
