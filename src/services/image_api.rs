use serde::{Deserialize, Serialize};

use crate::config::AuthTokens;
use crate::schema::GenerationRequest;

const SUBMIT_PATH: &str = "/video_gen";
const RECENT_TASKS_PATH: &str = "/v2/recent_tasks";
const UPLOAD_PATH: &str = "/uploads";
const SENTINEL_HEADER: &str = "openai-sentinel-token";
const REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(60);
const RECENT_TASKS_LIMIT: u32 = 20;

/// One entry of the recent-tasks listing. Unknown vendor fields ride along in
/// `generations` untouched; only the fields the lifecycle needs are typed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteTaskEntry {
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub failure_reason: Option<String>,
    #[serde(default)]
    pub generations: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadReceipt {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub file_id: Option<String>,
    #[serde(default)]
    pub upload_media_id: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

impl UploadReceipt {
    /// The id usable later as a reference-media entry. The endpoint has been
    /// observed returning it under several names; fixed priority order.
    pub fn media_id(&self) -> Option<&str> {
        self.id
            .as_deref()
            .or(self.upload_media_id.as_deref())
            .or(self.file_id.as_deref())
            .filter(|id| !id.is_empty())
    }
}

#[async_trait::async_trait]
pub trait ImageGenApi: Send + Sync {
    /// Submits one generation request. Requires both the bearer token and the
    /// sentinel token; returns the vendor job id.
    async fn submit(
        &self,
        request: &GenerationRequest,
        tokens: &AuthTokens,
    ) -> anyhow::Result<String>;

    /// Fetches the recent-jobs listing. Bearer token only, no sentinel.
    async fn recent_tasks(&self, tokens: &AuthTokens) -> anyhow::Result<Vec<RemoteTaskEntry>>;

    /// Uploads reference media. Bearer token only.
    async fn upload(
        &self,
        file_name: &str,
        bytes: Vec<u8>,
        tokens: &AuthTokens,
    ) -> anyhow::Result<UploadReceipt>;
}

pub struct HttpImageGenApi {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct SubmitResponse {
    #[serde(default)]
    id: Option<String>,
}

#[derive(Deserialize)]
struct RecentTasksResponse {
    #[serde(default)]
    task_responses: Vec<RemoteTaskEntry>,
}

impl HttpImageGenApi {
    pub fn new(base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("failed to build reqwest client");
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait::async_trait]
impl ImageGenApi for HttpImageGenApi {
    async fn submit(
        &self,
        request: &GenerationRequest,
        tokens: &AuthTokens,
    ) -> anyhow::Result<String> {
        let response = self
            .client
            .post(self.url(SUBMIT_PATH))
            .header("Authorization", format!("Bearer {}", tokens.auth_token))
            .header(SENTINEL_HEADER, &tokens.sentinel_token)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("generation API returned {status}: {body}");
        }

        let parsed: SubmitResponse = response.json().await?;
        parsed
            .id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| anyhow::anyhow!("no task id in generation response"))
    }

    async fn recent_tasks(&self, tokens: &AuthTokens) -> anyhow::Result<Vec<RemoteTaskEntry>> {
        let response = self
            .client
            .get(self.url(RECENT_TASKS_PATH))
            .query(&[("limit", RECENT_TASKS_LIMIT)])
            .header("Authorization", format!("Bearer {}", tokens.auth_token))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("recent tasks listing returned {status}: {body}");
        }

        let parsed: RecentTasksResponse = response.json().await?;
        Ok(parsed.task_responses)
    }

    async fn upload(
        &self,
        file_name: &str,
        bytes: Vec<u8>,
        tokens: &AuthTokens,
    ) -> anyhow::Result<UploadReceipt> {
        let form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(bytes).file_name(file_name.to_string()),
            )
            .text("file_name", file_name.to_string());

        let response = self
            .client
            .post(self.url(UPLOAD_PATH))
            .header("Authorization", format!("Bearer {}", tokens.auth_token))
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("upload failed {status}: {body}");
        }

        let receipt: UploadReceipt = response.json().await?;
        if receipt.media_id().is_none() {
            anyhow::bail!("no media id in upload response");
        }
        Ok(receipt)
    }
}

/// Collects output media URLs from a completed task entry. Each generation is
/// tried against the known payload shapes in fixed priority order; a
/// generation matching none of them is an error, never a silently dropped
/// entry.
pub fn extract_output_urls(entry: &RemoteTaskEntry) -> anyhow::Result<Vec<String>> {
    let mut urls = Vec::with_capacity(entry.generations.len());
    for (idx, generation) in entry.generations.iter().enumerate() {
        let url = generation["encodings"]["source"]["path"]
            .as_str()
            .or_else(|| generation["url"].as_str())
            .or_else(|| generation["encodings"]["source"]["url"].as_str())
            .filter(|u| !u.is_empty());

        match url {
            Some(url) => urls.push(url.to_string()),
            None => anyhow::bail!(
                "generation {} of task {}: no extractable URL",
                idx + 1,
                entry.id
            ),
        }
    }
    Ok(urls)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry_with(generations: Vec<serde_json::Value>) -> RemoteTaskEntry {
        RemoteTaskEntry {
            id: "task_1".to_string(),
            status: Some("succeeded".to_string()),
            failure_reason: None,
            generations,
        }
    }

    #[test]
    fn extracts_encoding_path_first() {
        let entry = entry_with(vec![serde_json::json!({
            "encodings": { "source": { "path": "https://x/a.png" } },
            "url": "https://x/fallback.png"
        })]);
        assert_eq!(
            extract_output_urls(&entry).unwrap(),
            vec!["https://x/a.png"]
        );
    }

    #[test]
    fn falls_back_to_url_then_source_url() {
        let entry = entry_with(vec![
            serde_json::json!({ "url": "https://x/b.png" }),
            serde_json::json!({ "encodings": { "source": { "url": "https://x/c.png" } } }),
        ]);
        assert_eq!(
            extract_output_urls(&entry).unwrap(),
            vec!["https://x/b.png", "https://x/c.png"]
        );
    }

    #[test]
    fn fails_closed_when_no_shape_matches() {
        let entry = entry_with(vec![
            serde_json::json!({ "url": "https://x/ok.png" }),
            serde_json::json!({ "thumbnail": "https://x/nope.png" }),
        ]);
        let err = extract_output_urls(&entry).unwrap_err();
        assert!(err.to_string().contains("no extractable URL"));
    }

    #[test]
    fn zero_generations_yield_zero_urls() {
        let entry = entry_with(vec![]);
        assert!(extract_output_urls(&entry).unwrap().is_empty());
    }

    #[test]
    fn upload_receipt_prefers_id_over_aliases() {
        let receipt: UploadReceipt = serde_json::from_value(serde_json::json!({
            "id": "media_a",
            "upload_media_id": "media_b",
            "file_id": "file_c"
        }))
        .unwrap();
        assert_eq!(receipt.media_id(), Some("media_a"));

        let receipt: UploadReceipt = serde_json::from_value(serde_json::json!({
            "file_id": "file_c"
        }))
        .unwrap();
        assert_eq!(receipt.media_id(), Some("file_c"));

        let receipt: UploadReceipt = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(receipt.media_id(), None);
    }

    #[test]
    fn listing_entry_tolerates_extra_vendor_fields() {
        let entry: RemoteTaskEntry = serde_json::from_value(serde_json::json!({
            "id": "task_9",
            "status": "running",
            "progress_pct": 0.4,
            "moderation": { "flagged": false }
        }))
        .unwrap();
        assert_eq!(entry.id, "task_9");
        assert_eq!(entry.status.as_deref(), Some("running"));
        assert!(entry.generations.is_empty());
    }
}
