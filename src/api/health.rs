use std::sync::Arc;

use axum::Json;
use axum::extract::State;

use crate::api::{ApiError, AppState};
use crate::services::store::StoreHealth;

pub async fn get_health(
    State(state): State<Arc<AppState>>,
) -> Result<Json<StoreHealth>, ApiError> {
    Ok(Json(state.store.health().await?))
}
