use sqlx::PgPool;
use serde::Serialize;
use uuid::Uuid;

use crate::schema::{TaskLogRow, TaskRecord, UploadRow, VeoImageRow, VeoVideoTaskRow};
use crate::services::image_api::UploadReceipt;

/// Latest known state of one video operation, written once per poll round.
#[derive(Debug, Clone)]
pub struct OperationSnapshot {
    pub operation_name: String,
    pub scene_id: Option<Uuid>,
    pub status: String,
    pub video_url: Option<String>,
    pub video_prompt: Option<String>,
    pub raw_response: Option<serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct ImageSnapshot {
    pub media_generation_id: String,
    pub file_name: Option<String>,
    pub file_url: Option<String>,
    pub kind: String,
    pub prompt: Option<String>,
    pub raw_response: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreHealth {
    pub completed_tasks: i64,
    pub failed_tasks: i64,
    pub uploads: i64,
    pub pending_operations: i64,
}

/// Row-store bookkeeping behind the panel. Orchestrators treat every write
/// here as best-effort: failures are logged at the call site and never flip a
/// task's own outcome.
#[async_trait::async_trait]
pub trait TaskStore: Send + Sync {
    /// Single terminal write per task id.
    async fn log_task(&self, record: &TaskRecord) -> anyhow::Result<()>;

    async fn record_upload(&self, file_name: &str, receipt: &UploadReceipt)
    -> anyhow::Result<()>;

    async fn file_name_exists(&self, file_name: &str) -> anyhow::Result<bool>;

    /// Insert-or-update keyed by media generation id.
    async fn upsert_image(&self, image: &ImageSnapshot) -> anyhow::Result<()>;

    /// Insert-or-update keyed by operation name; called once per poll round,
    /// so repeated writes for one operation must land on one row.
    async fn upsert_operation(&self, op: &OperationSnapshot) -> anyhow::Result<()>;

    async fn video_history(&self, limit: i64) -> anyhow::Result<Vec<VeoVideoTaskRow>>;

    async fn task_history(&self, limit: i64) -> anyhow::Result<Vec<TaskLogRow>>;

    async fn upload_history(&self, limit: i64) -> anyhow::Result<Vec<UploadRow>>;

    async fn image_history(&self, limit: i64) -> anyhow::Result<Vec<VeoImageRow>>;

    async fn delete_task(&self, id: i64) -> anyhow::Result<bool>;

    async fn delete_upload(&self, id: i64) -> anyhow::Result<bool>;

    async fn health(&self) -> anyhow::Result<StoreHealth>;
}

/// Postgres-backed store. The pool is handed in at construction; there is no
/// global client and no implicit first-use initialization.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl TaskStore for PgStore {
    async fn log_task(&self, record: &TaskRecord) -> anyhow::Result<()> {
        let config = serde_json::json!({
            "width": record.input.width,
            "height": record.input.height,
            "n_variants": record.input.n_variants,
            "operation": record.input.operation(),
            "model": record.input.model(),
        });
        let result_urls = serde_json::to_string(&record.result_urls)?;

        sqlx::query(
            r#"
            INSERT INTO sora_tasks (task_id, prompt, status, config, result_urls, error_message)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(record.id)
        .bind(&record.input.prompt)
        .bind(record.status.as_str())
        .bind(config)
        .bind(result_urls)
        .bind(&record.error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_upload(
        &self,
        file_name: &str,
        receipt: &UploadReceipt,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sora_uploads (file_name, file_id, upload_media_id, file_url)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(file_name)
        .bind(receipt.id.as_deref().or(receipt.file_id.as_deref()))
        .bind(receipt.media_id())
        .bind(&receipt.url)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn file_name_exists(&self, file_name: &str) -> anyhow::Result<bool> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM sora_uploads WHERE file_name = $1")
                .bind(file_name)
                .fetch_one(&self.pool)
                .await?;
        Ok(count > 0)
    }

    async fn upsert_image(&self, image: &ImageSnapshot) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO veo_images (media_generation_id, file_name, file_url, kind, prompt, google_response)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (media_generation_id) DO UPDATE SET
                file_url = EXCLUDED.file_url,
                kind = EXCLUDED.kind,
                prompt = EXCLUDED.prompt,
                google_response = EXCLUDED.google_response
            "#,
        )
        .bind(&image.media_generation_id)
        .bind(&image.file_name)
        .bind(&image.file_url)
        .bind(&image.kind)
        .bind(&image.prompt)
        .bind(&image.raw_response)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_operation(&self, op: &OperationSnapshot) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO veo_video_tasks (operation_name, scene_id, status, video_url, video_prompt, google_response)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (operation_name) DO UPDATE SET
                status = EXCLUDED.status,
                video_url = EXCLUDED.video_url,
                google_response = EXCLUDED.google_response,
                updated_at = now()
            "#,
        )
        .bind(&op.operation_name)
        .bind(op.scene_id)
        .bind(&op.status)
        .bind(&op.video_url)
        .bind(&op.video_prompt)
        .bind(&op.raw_response)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn video_history(&self, limit: i64) -> anyhow::Result<Vec<VeoVideoTaskRow>> {
        let rows = sqlx::query_as::<_, VeoVideoTaskRow>(
            r#"
            SELECT id, operation_name, scene_id, status, video_url, video_prompt,
                   google_response, created_at, updated_at
            FROM veo_video_tasks
            ORDER BY created_at DESC, id DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn task_history(&self, limit: i64) -> anyhow::Result<Vec<TaskLogRow>> {
        let rows = sqlx::query_as::<_, TaskLogRow>(
            r#"
            SELECT id, task_id, prompt, status, config, result_urls, error_message, created_at
            FROM sora_tasks
            ORDER BY created_at DESC, id DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn upload_history(&self, limit: i64) -> anyhow::Result<Vec<UploadRow>> {
        let rows = sqlx::query_as::<_, UploadRow>(
            r#"
            SELECT id, file_name, file_id, upload_media_id, file_url, created_at
            FROM sora_uploads
            ORDER BY created_at DESC, id DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn image_history(&self, limit: i64) -> anyhow::Result<Vec<VeoImageRow>> {
        let rows = sqlx::query_as::<_, VeoImageRow>(
            r#"
            SELECT media_generation_id, file_name, file_url, kind, prompt, google_response, created_at
            FROM veo_images
            ORDER BY created_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn delete_task(&self, id: i64) -> anyhow::Result<bool> {
        let result = sqlx::query("DELETE FROM sora_tasks WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_upload(&self, id: i64) -> anyhow::Result<bool> {
        let result = sqlx::query("DELETE FROM sora_uploads WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn health(&self) -> anyhow::Result<StoreHealth> {
        let (completed_tasks, failed_tasks): (i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'completed'),
                COUNT(*) FILTER (WHERE status = 'failed')
            FROM sora_tasks
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let uploads: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sora_uploads")
            .fetch_one(&self.pool)
            .await?;

        let pending_operations: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM veo_video_tasks
            WHERE status NOT IN ('MEDIA_GENERATION_STATUS_SUCCESSFUL', 'MEDIA_GENERATION_STATUS_FAILED')
               OR status IS NULL
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(StoreHealth {
            completed_tasks,
            failed_tasks,
            uploads,
            pending_operations,
        })
    }
}
