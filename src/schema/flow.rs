use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schema::task::split_media_ids;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowStatus {
    Pending,
    GeneratingImage,
    UploadingImage,
    StartingVideo,
    PollingVideo,
    Completed,
    Failed,
}

impl FlowStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, FlowStatus::Completed | FlowStatus::Failed)
    }
}

/// One pasted row of the image-to-video flow tab.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FlowRowInput {
    pub image_prompt: String,
    /// Comma-separated reference media ids from the image library.
    #[serde(default)]
    pub reference_image_id: Option<String>,
    /// Falls back to the image prompt when absent.
    #[serde(default)]
    pub video_prompt: Option<String>,
}

/// One flow row plus its mutable lifecycle state. Progresses through image
/// generation, re-upload, video start, and the group polling loop.
#[derive(Debug, Clone, Serialize)]
pub struct FlowRecord {
    pub id: Uuid,
    pub sequence: usize,
    pub image_prompt: String,
    pub reference_ids: Vec<String>,
    pub video_prompt: String,
    pub status: FlowStatus,
    pub media_generation_id: Option<String>,
    pub image_url: Option<String>,
    pub uploaded_media_id: Option<String>,
    pub operation_name: Option<String>,
    pub scene_id: Option<Uuid>,
    pub poll_attempts: u32,
    pub video_url: Option<String>,
    pub error: Option<String>,
}

impl FlowRecord {
    pub fn new(sequence: usize, input: &FlowRowInput) -> Self {
        let video_prompt = input
            .video_prompt
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or(&input.image_prompt)
            .to_string();

        Self {
            id: Uuid::new_v4(),
            sequence,
            image_prompt: input.image_prompt.clone(),
            reference_ids: input
                .reference_image_id
                .as_deref()
                .map(split_media_ids)
                .unwrap_or_default(),
            video_prompt,
            status: FlowStatus::Pending,
            media_generation_id: None,
            image_url: None,
            uploaded_media_id: None,
            operation_name: None,
            scene_id: None,
            poll_attempts: 0,
            video_url: None,
            error: None,
        }
    }

    pub fn complete(&mut self, video_url: String) {
        self.status = FlowStatus::Completed;
        self.video_url = Some(video_url);
        self.error = None;
    }

    pub fn fail(&mut self, reason: impl Into<String>) {
        self.status = FlowStatus::Failed;
        self.error = Some(reason.into());
        self.video_url = None;
    }
}

/// All-or-nothing construction, same contract as the image batch: one bad
/// row rejects the whole flow before any network activity.
pub fn build_flow(rows: &[FlowRowInput]) -> anyhow::Result<Vec<FlowRecord>> {
    if rows.is_empty() {
        anyhow::bail!("flow input must contain at least one row");
    }

    let mut records = Vec::with_capacity(rows.len());
    for (idx, row) in rows.iter().enumerate() {
        if row.image_prompt.trim().is_empty() {
            anyhow::bail!("row {}: image prompt must not be empty", idx + 1);
        }
        records.push(FlowRecord::new(idx + 1, row));
    }
    Ok(records)
}
