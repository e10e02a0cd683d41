use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One terminal task outcome as logged to `sora_tasks`.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TaskLogRow {
    pub id: i64,
    pub task_id: Uuid,
    pub prompt: String,
    pub status: String,
    pub config: serde_json::Value,
    /// JSON-encoded array of output URLs; TEXT column for panel compatibility.
    pub result_urls: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct UploadRow {
    pub id: i64,
    pub file_name: String,
    pub file_id: Option<String>,
    pub upload_media_id: Option<String>,
    pub file_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Reference-image library entry, keyed by the vendor media generation id.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct VeoImageRow {
    pub media_generation_id: String,
    pub file_name: Option<String>,
    pub file_url: Option<String>,
    pub kind: String,
    pub prompt: Option<String>,
    pub google_response: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// Persistence-side mirror of one in-flight video operation, keyed by the
/// vendor operation name. Updated on every poll round.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct VeoVideoTaskRow {
    pub id: i64,
    pub operation_name: String,
    pub scene_id: Option<Uuid>,
    pub status: Option<String>,
    pub video_url: Option<String>,
    pub video_prompt: Option<String>,
    pub google_response: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
