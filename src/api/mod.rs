use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::Router;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use sqlx::PgPool;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::services::flow::{FlowEngine, FlowRun};
use crate::services::image_api::{HttpImageGenApi, ImageGenApi};
use crate::services::queue::{BatchQueue, BatchRun};
use crate::services::store::{PgStore, TaskStore};
use crate::services::video_api::{HttpVideoGenApi, VideoGenApi};

pub mod batches;
pub mod flows;
pub mod health;
pub mod history;
pub mod uploads;

/// Everything the handlers need, built once at startup. The store pool and
/// vendor clients are constructed here and injected; nothing is lazily
/// initialized at first use.
pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<dyn TaskStore>,
    pub image_api: Arc<dyn ImageGenApi>,
    pub queue: BatchQueue,
    pub flows: FlowEngine,
    pub batch_runs: Mutex<HashMap<Uuid, Arc<BatchRun>>>,
    pub flow_runs: Mutex<HashMap<Uuid, Arc<FlowRun>>>,
}

impl AppState {
    pub fn new(config: AppConfig, pool: PgPool) -> Arc<Self> {
        let store: Arc<dyn TaskStore> = Arc::new(PgStore::new(pool));
        let image_api: Arc<dyn ImageGenApi> =
            Arc::new(HttpImageGenApi::new(config.sora_api_base.clone()));
        let video_api: Arc<dyn VideoGenApi> = Arc::new(HttpVideoGenApi::new(
            config.labs_api_base.clone(),
            config.labs_project_id.clone(),
            config.labs_api_key.clone(),
        ));

        let queue = BatchQueue::new(
            Arc::clone(&image_api),
            Arc::clone(&store),
            config.image_poll,
            config.strategy,
        );
        let flows = FlowEngine::new(
            video_api,
            Arc::clone(&store),
            config.video_poll,
            config.fanout_width,
        );

        Arc::new(Self {
            config,
            store,
            image_api,
            queue,
            flows,
            batch_runs: Mutex::new(HashMap::new()),
            flow_runs: Mutex::new(HashMap::new()),
        })
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(health::get_health))
        .route("/api/batches", post(batches::create_batch))
        .route("/api/batches/{id}", get(batches::get_batch))
        .route("/api/batches/{id}/retry", post(batches::retry_task))
        .route("/api/flows", post(flows::create_flow))
        .route("/api/flows/{id}", get(flows::get_flow))
        .route("/api/uploads", post(uploads::create_upload))
        .route("/api/history/tasks", get(history::list_tasks))
        .route("/api/history/tasks/{id}", delete(history::delete_task))
        .route("/api/history/uploads", get(history::list_uploads))
        .route("/api/history/uploads/{id}", delete(history::delete_upload))
        .route("/api/history/images", get(history::list_images))
        .route("/api/history/videos", get(history::list_videos))
        .with_state(state)
}

pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn unprocessable(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::CONFLICT,
            message: message.into(),
        }
    }

    pub fn bad_gateway(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_GATEWAY,
            message: message.into(),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            axum::Json(serde_json::json!({ "error": self.message })),
        )
            .into_response()
    }
}
