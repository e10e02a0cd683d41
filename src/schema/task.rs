use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Submitting,
    Polling,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Submitting => "submitting",
            TaskStatus::Polling => "polling",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

/// One reference-media entry of a remix request. Field names follow the
/// generation endpoint's wire format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InpaintItem {
    #[serde(rename = "type")]
    pub kind: String,
    pub frame_index: u32,
    pub preset_id: Option<String>,
    pub generation_id: Option<String>,
    pub upload_media_id: String,
    pub uploaded_file_id: Option<String>,
    pub source_start_frame: u32,
    pub source_end_frame: u32,
    pub crop_bounds: Option<serde_json::Value>,
    pub cameo_file_id: Option<String>,
}

impl InpaintItem {
    pub fn image(upload_media_id: String) -> Self {
        Self {
            kind: "image".to_string(),
            frame_index: 0,
            preset_id: None,
            generation_id: None,
            upload_media_id,
            uploaded_file_id: None,
            source_start_frame: 0,
            source_end_frame: 0,
            crop_bounds: None,
            cameo_file_id: None,
        }
    }
}

/// The two request variants the generation endpoint accepts. Tagged by the
/// `operation` wire field: plain text-to-image, or remix against uploaded
/// reference media.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum RequestMode {
    SimpleCompose {
        inpaint_items: Vec<InpaintItem>,
    },
    Remix {
        model: String,
        is_storyboard: bool,
        inpaint_items: Vec<InpaintItem>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub prompt: String,
    pub width: u32,
    pub height: u32,
    pub n_variants: u32,
    pub n_frames: u32,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(flatten)]
    pub mode: RequestMode,
}

impl GenerationRequest {
    pub fn operation(&self) -> &'static str {
        match self.mode {
            RequestMode::SimpleCompose { .. } => "simple_compose",
            RequestMode::Remix { .. } => "remix",
        }
    }

    pub fn model(&self) -> Option<&str> {
        match &self.mode {
            RequestMode::SimpleCompose { .. } => None,
            RequestMode::Remix { model, .. } => Some(model),
        }
    }
}

/// One batch row as pasted into the panel.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BatchItem {
    pub prompt: String,
    /// Comma-separated media ids; presence switches the request to remix.
    #[serde(default)]
    pub upload_media_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AspectRatio {
    #[serde(rename = "3:2")]
    Landscape,
    #[serde(rename = "2:3")]
    Portrait,
}

impl AspectRatio {
    pub fn dimensions(self) -> (u32, u32) {
        match self {
            AspectRatio::Landscape => (720, 480),
            AspectRatio::Portrait => (360, 540),
        }
    }
}

impl Default for AspectRatio {
    fn default() -> Self {
        AspectRatio::Landscape
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BatchConfig {
    #[serde(default)]
    pub aspect_ratio: AspectRatio,
    #[serde(default = "default_variants")]
    pub n_variants: u32,
}

fn default_variants() -> u32 {
    1
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            aspect_ratio: AspectRatio::default(),
            n_variants: 1,
        }
    }
}

/// One generation request plus its mutable lifecycle state.
#[derive(Debug, Clone, Serialize)]
pub struct TaskRecord {
    pub id: Uuid,
    /// 1-based position in the batch, display ordering only.
    pub sequence: usize,
    pub external_job_id: Option<String>,
    pub status: TaskStatus,
    pub input: GenerationRequest,
    pub poll_attempts: u32,
    pub result: Option<serde_json::Value>,
    pub result_urls: Vec<String>,
    pub error: Option<String>,
}

impl TaskRecord {
    pub fn new(sequence: usize, input: GenerationRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            sequence,
            external_job_id: None,
            status: TaskStatus::Pending,
            input,
            poll_attempts: 0,
            result: None,
            result_urls: Vec::new(),
            error: None,
        }
    }

    /// Retry is a brand-new lifecycle over the same input, never a mutation
    /// of the terminal record.
    pub fn respawn(&self) -> Self {
        Self::new(self.sequence, self.input.clone())
    }

    pub fn complete(&mut self, result: serde_json::Value, urls: Vec<String>) {
        self.status = TaskStatus::Completed;
        self.result = Some(result);
        self.result_urls = urls;
        self.error = None;
    }

    pub fn fail(&mut self, reason: impl Into<String>) {
        self.status = TaskStatus::Failed;
        self.error = Some(reason.into());
        self.result = None;
        self.result_urls = Vec::new();
    }
}

pub fn split_media_ids(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// Builds the ordered task list for one batch. All-or-nothing: any invalid
/// item fails the whole construction and produces zero records.
pub fn build_batch(items: &[BatchItem], config: &BatchConfig) -> anyhow::Result<Vec<TaskRecord>> {
    if items.is_empty() {
        anyhow::bail!("batch input must contain at least one item");
    }
    if !(1..=2).contains(&config.n_variants) {
        anyhow::bail!("n_variants must be 1 or 2, got {}", config.n_variants);
    }

    let (width, height) = config.aspect_ratio.dimensions();

    let mut tasks = Vec::with_capacity(items.len());
    for (idx, item) in items.iter().enumerate() {
        if item.prompt.trim().is_empty() {
            anyhow::bail!("item {}: prompt must not be empty", idx + 1);
        }

        let media_ids = item
            .upload_media_id
            .as_deref()
            .map(split_media_ids)
            .unwrap_or_default();

        let mode = if media_ids.is_empty() {
            RequestMode::SimpleCompose {
                inpaint_items: Vec::new(),
            }
        } else {
            RequestMode::Remix {
                model: "turbo".to_string(),
                is_storyboard: false,
                inpaint_items: media_ids.into_iter().map(InpaintItem::image).collect(),
            }
        };

        tasks.push(TaskRecord::new(
            idx + 1,
            GenerationRequest {
                prompt: item.prompt.clone(),
                width,
                height,
                n_variants: config.n_variants,
                n_frames: 1,
                kind: "image_gen".to_string(),
                mode,
            },
        ));
    }

    Ok(tasks)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(prompt: &str) -> BatchItem {
        BatchItem {
            prompt: prompt.to_string(),
            upload_media_id: None,
        }
    }

    #[test]
    fn builds_one_task_per_item_in_order() {
        let items = vec![item("cat"), item("dog"), item("bird")];
        let tasks = build_batch(&items, &BatchConfig::default()).unwrap();

        assert_eq!(tasks.len(), 3);
        for (idx, task) in tasks.iter().enumerate() {
            assert_eq!(task.sequence, idx + 1);
            assert_eq!(task.status, TaskStatus::Pending);
            assert!(task.external_job_id.is_none());
            assert!(task.result.is_none());
            assert!(task.error.is_none());
        }
        assert_eq!(tasks[0].input.prompt, "cat");
        assert_eq!(tasks[2].input.prompt, "bird");
    }

    #[test]
    fn empty_input_produces_no_tasks() {
        let err = build_batch(&[], &BatchConfig::default()).unwrap_err();
        assert!(err.to_string().contains("at least one item"));
    }

    #[test]
    fn one_empty_prompt_fails_the_whole_batch() {
        let items = vec![item("cat"), item("   "), item("bird")];
        let err = build_batch(&items, &BatchConfig::default()).unwrap_err();
        assert!(err.to_string().contains("item 2"));
    }

    #[test]
    fn rejects_out_of_range_variant_count() {
        let config = BatchConfig {
            aspect_ratio: AspectRatio::Landscape,
            n_variants: 3,
        };
        assert!(build_batch(&[item("cat")], &config).is_err());
    }

    #[test]
    fn media_ids_switch_to_remix_mode() {
        let items = vec![BatchItem {
            prompt: "dog".to_string(),
            upload_media_id: Some("media_1, media_2".to_string()),
        }];
        let tasks = build_batch(&items, &BatchConfig::default()).unwrap();

        let task = &tasks[0];
        assert_eq!(task.input.operation(), "remix");
        match &task.input.mode {
            RequestMode::Remix {
                model,
                is_storyboard,
                inpaint_items,
            } => {
                assert_eq!(model, "turbo");
                assert!(!is_storyboard);
                assert_eq!(inpaint_items.len(), 2);
                assert_eq!(inpaint_items[0].upload_media_id, "media_1");
                assert_eq!(inpaint_items[1].upload_media_id, "media_2");
            }
            other => panic!("expected remix mode, got {other:?}"),
        }

        let wire = serde_json::to_value(&task.input).unwrap();
        assert_eq!(wire["operation"], "remix");
        assert_eq!(wire["type"], "image_gen");
        assert_eq!(wire["inpaint_items"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn no_media_ids_means_simple_compose() {
        let tasks = build_batch(&[item("cat")], &BatchConfig::default()).unwrap();
        assert_eq!(tasks[0].input.operation(), "simple_compose");

        let wire = serde_json::to_value(&tasks[0].input).unwrap();
        assert_eq!(wire["operation"], "simple_compose");
        assert!(wire.get("model").is_none());
        assert_eq!(wire["width"], 720);
        assert_eq!(wire["height"], 480);
    }

    #[test]
    fn portrait_ratio_maps_to_portrait_dimensions() {
        let config = BatchConfig {
            aspect_ratio: AspectRatio::Portrait,
            n_variants: 2,
        };
        let tasks = build_batch(&[item("cat")], &config).unwrap();
        assert_eq!(tasks[0].input.width, 360);
        assert_eq!(tasks[0].input.height, 540);
        assert_eq!(tasks[0].input.n_variants, 2);
    }

    #[test]
    fn split_media_ids_trims_and_drops_empties() {
        assert_eq!(
            split_media_ids(" a, b ,, c"),
            vec!["a".to_string(), "b".to_string(), "c".to_string()]
        );
        assert!(split_media_ids(" , ").is_empty());
    }

    #[test]
    fn respawn_starts_a_fresh_lifecycle_with_the_same_input() {
        let mut original = build_batch(&[item("cat")], &BatchConfig::default())
            .unwrap()
            .remove(0);
        original.fail("boom");
        original.poll_attempts = 7;

        let retry = original.respawn();
        assert_ne!(retry.id, original.id);
        assert_eq!(retry.sequence, original.sequence);
        assert_eq!(retry.input, original.input);
        assert_eq!(retry.status, TaskStatus::Pending);
        assert_eq!(retry.poll_attempts, 0);
        assert!(retry.error.is_none());
    }

    #[test]
    fn terminal_setters_keep_result_and_error_exclusive() {
        let mut task = build_batch(&[item("cat")], &BatchConfig::default())
            .unwrap()
            .remove(0);

        task.complete(serde_json::json!({"ok": true}), vec!["u".to_string()]);
        assert!(task.result.is_some());
        assert!(task.error.is_none());

        let mut task = task.respawn();
        task.fail("boom");
        assert!(task.result.is_none());
        assert!(task.result_urls.is_empty());
        assert_eq!(task.error.as_deref(), Some("boom"));
    }
}
