use serde::{Deserialize, Serialize};
use uuid::Uuid;

const REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(60);
const VIDEO_MODEL_KEY: &str = "veo_3_1_i2v_s_fast";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Pending,
    Active,
    Successful,
    Failed,
}

impl OperationStatus {
    pub fn as_vendor_str(self) -> &'static str {
        match self {
            OperationStatus::Pending => "MEDIA_GENERATION_STATUS_PENDING",
            OperationStatus::Active => "MEDIA_GENERATION_STATUS_ACTIVE",
            OperationStatus::Successful => "MEDIA_GENERATION_STATUS_SUCCESSFUL",
            OperationStatus::Failed => "MEDIA_GENERATION_STATUS_FAILED",
        }
    }

    pub fn from_vendor(raw: &str) -> Option<Self> {
        match raw {
            "MEDIA_GENERATION_STATUS_PENDING" => Some(OperationStatus::Pending),
            "MEDIA_GENERATION_STATUS_ACTIVE" => Some(OperationStatus::Active),
            "MEDIA_GENERATION_STATUS_SUCCESSFUL" => Some(OperationStatus::Successful),
            "MEDIA_GENERATION_STATUS_FAILED" => Some(OperationStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, OperationStatus::Successful | OperationStatus::Failed)
    }
}

/// Correlation handle for one started video generation.
#[derive(Debug, Clone)]
pub struct StartedVideo {
    pub operation_name: String,
    pub scene_id: Uuid,
}

/// What the batch status endpoint needs to identify one operation.
#[derive(Debug, Clone)]
pub struct VideoOperationRef {
    pub operation_name: String,
    pub scene_id: Uuid,
    pub last_status: OperationStatus,
}

/// Decoded per-operation status report from one poll round.
#[derive(Debug, Clone)]
pub struct OperationReport {
    pub operation_name: String,
    pub status: OperationStatus,
    pub video_url: Option<String>,
    pub failure_reason: Option<String>,
    pub raw: serde_json::Value,
}

#[async_trait::async_trait]
pub trait VideoGenApi: Send + Sync {
    /// Generates an image from a prompt plus reference media; returns the
    /// media generation id.
    async fn generate_image(
        &self,
        prompt: &str,
        reference_ids: &[String],
        token: &str,
    ) -> anyhow::Result<String>;

    /// Resolves a media generation id to a fetchable image URL.
    async fn fetch_image(&self, media_generation_id: &str, token: &str)
    -> anyhow::Result<String>;

    /// Downloads raw media bytes from a previously resolved URL.
    async fn fetch_bytes(&self, url: &str) -> anyhow::Result<Vec<u8>>;

    /// Uploads a JPEG (raw base64) and returns the fresh media id the video
    /// endpoint requires.
    async fn upload_image(&self, jpeg_base64: &str, token: &str) -> anyhow::Result<String>;

    /// Starts one image-to-video generation.
    async fn start_video(
        &self,
        prompt: &str,
        media_id: &str,
        token: &str,
    ) -> anyhow::Result<StartedVideo>;

    /// Batch status check for a group of in-flight operations.
    async fn check_status(
        &self,
        operations: &[VideoOperationRef],
        token: &str,
    ) -> anyhow::Result<Vec<OperationReport>>;
}

pub struct HttpVideoGenApi {
    client: reqwest::Client,
    base_url: String,
    project_id: String,
    api_key: String,
}

impl HttpVideoGenApi {
    pub fn new(base_url: String, project_id: String, api_key: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("failed to build reqwest client");
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            project_id,
            api_key,
        }
    }

    /// Labs endpoints take JSON bodies declared as text/plain.
    async fn post_labs(
        &self,
        url: String,
        payload: &serde_json::Value,
        token: &str,
        what: &str,
    ) -> anyhow::Result<serde_json::Value> {
        let response = self
            .client
            .post(url)
            .header("Authorization", format!("Bearer {token}"))
            .header("Content-Type", "text/plain;charset=UTF-8")
            .header("Accept", "*/*")
            .body(payload.to_string())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("{what} failed {status}: {body}");
        }
        Ok(response.json().await?)
    }
}

fn session_id() -> String {
    format!(";{}", chrono::Utc::now().timestamp_millis())
}

fn random_seed() -> u64 {
    (Uuid::new_v4().as_u128() % 100_000) as u64
}

#[async_trait::async_trait]
impl VideoGenApi for HttpVideoGenApi {
    async fn generate_image(
        &self,
        prompt: &str,
        reference_ids: &[String],
        token: &str,
    ) -> anyhow::Result<String> {
        let payload = serde_json::json!({
            "imagePrompt": prompt,
            "referenceImageId": reference_ids.join(","),
        });
        let url = format!(
            "{}/projects/{}/flowMedia:batchGenerateImages",
            self.base_url, self.project_id
        );
        let body = self.post_labs(url, &payload, token, "image generation").await?;
        extract_media_generation_id(&body)
    }

    async fn fetch_image(
        &self,
        media_generation_id: &str,
        token: &str,
    ) -> anyhow::Result<String> {
        let mut query = vec![("clientContext.tool", "PINHOLE")];
        if !self.api_key.is_empty() {
            query.push(("key", self.api_key.as_str()));
        }

        let response = self
            .client
            .get(format!("{}/media/{}", self.base_url, media_generation_id))
            .query(&query)
            .header("Authorization", format!("Bearer {token}"))
            .header("Accept", "*/*")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("image fetch failed {status}: {body}");
        }

        let body: serde_json::Value = response.json().await?;
        extract_image_url(&body)
    }

    async fn fetch_bytes(&self, url: &str) -> anyhow::Result<Vec<u8>> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("media download failed {status}");
        }
        Ok(response.bytes().await?.to_vec())
    }

    async fn upload_image(&self, jpeg_base64: &str, token: &str) -> anyhow::Result<String> {
        // strip any data-url prefix so only raw base64 goes over the wire
        let raw = jpeg_base64
            .rsplit_once(',')
            .map(|(_, rest)| rest)
            .unwrap_or(jpeg_base64);

        let payload = serde_json::json!({
            "imageInput": {
                "rawImageBytes": raw,
                "mimeType": "image/jpeg",
                "isUserUploaded": true,
                "aspectRatio": "IMAGE_ASPECT_RATIO_LANDSCAPE",
            },
            "clientContext": {
                "sessionId": session_id(),
                "tool": "ASSET_MANAGER",
            },
        });

        let url = format!("{}:uploadUserImage", self.base_url);
        let body = self.post_labs(url, &payload, token, "image upload").await?;
        body["imageResult"]["mediaId"]
            .as_str()
            .filter(|id| !id.is_empty())
            .map(ToString::to_string)
            .ok_or_else(|| anyhow::anyhow!("no mediaId in upload response"))
    }

    async fn start_video(
        &self,
        prompt: &str,
        media_id: &str,
        token: &str,
    ) -> anyhow::Result<StartedVideo> {
        let scene_id = Uuid::new_v4();
        let payload = serde_json::json!({
            "clientContext": {
                "sessionId": session_id(),
                "projectId": self.project_id,
                "tool": "PINHOLE",
                "userPaygateTier": "PAYGATE_TIER_ONE",
            },
            "requests": [{
                "aspectRatio": "VIDEO_ASPECT_RATIO_LANDSCAPE",
                "seed": random_seed(),
                "textInput": { "prompt": prompt },
                "videoModelKey": VIDEO_MODEL_KEY,
                "startImage": { "mediaId": media_id },
                "metadata": { "sceneId": scene_id },
            }],
        });

        let url = format!("{}/video:batchAsyncGenerateVideoStartImage", self.base_url);
        let body = self.post_labs(url, &payload, token, "video start").await?;
        let operation_name = body["responses"][0]["operation"]["name"]
            .as_str()
            .filter(|name| !name.is_empty())
            .map(ToString::to_string)
            .ok_or_else(|| anyhow::anyhow!("no operation name in video start response"))?;

        Ok(StartedVideo {
            operation_name,
            scene_id,
        })
    }

    async fn check_status(
        &self,
        operations: &[VideoOperationRef],
        token: &str,
    ) -> anyhow::Result<Vec<OperationReport>> {
        let payload = serde_json::json!({
            "operations": operations
                .iter()
                .map(|op| serde_json::json!({
                    "operation": { "name": op.operation_name },
                    "sceneId": op.scene_id,
                    "status": op.last_status.as_vendor_str(),
                }))
                .collect::<Vec<_>>(),
        });

        let url = format!(
            "{}/video:batchCheckAsyncVideoGenerationStatus",
            self.base_url
        );
        let body = self.post_labs(url, &payload, token, "video status check").await?;

        let entries = body["operations"].as_array().cloned().unwrap_or_default();
        let reports = entries
            .iter()
            .enumerate()
            .map(|(idx, entry)| {
                let fallback = operations
                    .get(idx)
                    .map(|op| op.operation_name.as_str())
                    .unwrap_or_default();
                parse_operation_report(entry, fallback)
            })
            .collect();
        Ok(reports)
    }
}

/// The generation id has been observed in three places across response
/// variants; fixed priority, fail closed.
pub fn extract_media_generation_id(body: &serde_json::Value) -> anyhow::Result<String> {
    body["media"][0]["image"]["generatedImage"]["mediaGenerationId"]
        .as_str()
        .or_else(|| body["mediaGenerationId"]["mediaGenerationId"].as_str())
        .or_else(|| body["imageResult"]["mediaId"].as_str())
        .filter(|id| !id.is_empty())
        .map(ToString::to_string)
        .ok_or_else(|| anyhow::anyhow!("no mediaGenerationId in image generation response"))
}

/// Same story for the image URL.
pub fn extract_image_url(body: &serde_json::Value) -> anyhow::Result<String> {
    body["image"]["fifeUrl"]
        .as_str()
        .or_else(|| body["userUploadedImage"]["fifeUrl"].as_str())
        .or_else(|| body["media"][0]["image"]["generatedImage"]["fifeUrl"].as_str())
        .filter(|url| !url.is_empty())
        .map(ToString::to_string)
        .ok_or_else(|| anyhow::anyhow!("no image URL in media response"))
}

fn extract_video_uri(entry: &serde_json::Value) -> Option<String> {
    entry["response"]["videoResult"]["video"]["uri"]
        .as_str()
        .or_else(|| entry["response"]["video"]["uri"].as_str())
        .filter(|uri| !uri.is_empty())
        .map(ToString::to_string)
}

/// Decodes one operation entry from the batch status response. A done
/// operation with no recognizable video URI and no error is reported failed,
/// never silently empty.
pub fn parse_operation_report(entry: &serde_json::Value, fallback_name: &str) -> OperationReport {
    let operation_name = entry["operation"]["name"]
        .as_str()
        .filter(|name| !name.is_empty())
        .unwrap_or(fallback_name)
        .to_string();

    let reported = entry["status"].as_str().and_then(OperationStatus::from_vendor);
    let done = entry["done"].as_bool().unwrap_or(false)
        || reported.is_some_and(OperationStatus::is_terminal);

    if !done {
        return OperationReport {
            operation_name,
            status: reported.unwrap_or(OperationStatus::Active),
            video_url: None,
            failure_reason: None,
            raw: entry.clone(),
        };
    }

    if let Some(uri) = extract_video_uri(entry) {
        return OperationReport {
            operation_name,
            status: OperationStatus::Successful,
            video_url: Some(uri),
            failure_reason: None,
            raw: entry.clone(),
        };
    }

    let reason = if entry["error"].is_null() {
        "no extractable video URI in completed operation".to_string()
    } else {
        format!("video generation failed: {}", entry["error"])
    };

    OperationReport {
        operation_name,
        status: OperationStatus::Failed,
        video_url: None,
        failure_reason: Some(reason),
        raw: entry.clone(),
    }
}
