use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;

use crate::api::{ApiError, AppState};
use crate::config::TokenOverrides;
use crate::services::image_api::UploadReceipt;

#[derive(Debug, Deserialize)]
pub struct UploadRequest {
    pub file_name: String,
    pub data_base64: String,
    #[serde(default)]
    pub tokens: Option<TokenOverrides>,
}

/// Forwards one reference-media file to the vendor upload endpoint and logs
/// the receipt. Duplicate file names are rejected so the panel's library
/// stays addressable by name.
pub async fn create_upload(
    State(state): State<Arc<AppState>>,
    Json(request): Json<UploadRequest>,
) -> Result<Json<UploadReceipt>, ApiError> {
    let file_name = request.file_name.trim().to_string();
    if file_name.is_empty() {
        return Err(ApiError::unprocessable("file_name must not be empty"));
    }

    if state.store.file_name_exists(&file_name).await? {
        return Err(ApiError::conflict(format!(
            "file name {file_name:?} already exists"
        )));
    }

    let bytes = BASE64
        .decode(request.data_base64.trim())
        .map_err(|err| ApiError::unprocessable(format!("invalid base64 payload: {err}")))?;

    let tokens = state.config.tokens_with(request.tokens);
    let receipt = state
        .image_api
        .upload(&file_name, bytes, &tokens)
        .await
        .map_err(|err| ApiError::bad_gateway(err.to_string()))?;

    if let Err(err) = state.store.record_upload(&file_name, &receipt).await {
        tracing::error!(file_name = %file_name, error = %err, "failed to persist upload record");
    }

    tracing::info!(file_name = %file_name, media_id = ?receipt.media_id(), "upload recorded");
    Ok(Json(receipt))
}
