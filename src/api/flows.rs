use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::{ApiError, AppState};
use crate::config::TokenOverrides;
use crate::schema::{FlowRowInput, build_flow};
use crate::services::flow::{FlowRun, FlowRunSnapshot};

#[derive(Debug, Deserialize)]
pub struct CreateFlowRequest {
    pub rows: Vec<FlowRowInput>,
    #[serde(default)]
    pub tokens: Option<TokenOverrides>,
}

#[derive(Debug, Serialize)]
pub struct CreateFlowResponse {
    pub id: Uuid,
    pub row_count: usize,
}

pub async fn create_flow(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateFlowRequest>,
) -> Result<Json<CreateFlowResponse>, ApiError> {
    let records =
        build_flow(&request.rows).map_err(|err| ApiError::unprocessable(err.to_string()))?;

    let run = FlowRun::new(records);
    let row_count = request.rows.len();
    state
        .flow_runs
        .lock()
        .unwrap()
        .insert(run.id, Arc::clone(&run));

    let token = state.config.tokens_with(request.tokens).google_token;
    let engine = state.flows.clone();
    let worker_run = Arc::clone(&run);
    tokio::spawn(async move {
        engine.run(&worker_run, &token).await;
    });

    tracing::info!(flow_id = %run.id, row_count, "flow accepted");
    Ok(Json(CreateFlowResponse {
        id: run.id,
        row_count,
    }))
}

pub async fn get_flow(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<FlowRunSnapshot>, ApiError> {
    let run = state
        .flow_runs
        .lock()
        .unwrap()
        .get(&id)
        .cloned()
        .ok_or_else(|| ApiError::not_found(format!("no flow {id}")))?;
    Ok(Json(run.snapshot()))
}
