use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Serialize;
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::config::PollPolicy;
use crate::schema::{FlowRecord, FlowStatus};
use crate::services::store::{ImageSnapshot, OperationSnapshot, TaskStore};
use crate::services::video_api::{OperationStatus, VideoGenApi, VideoOperationRef};

/// One video-flow batch in flight.
pub struct FlowRun {
    pub id: Uuid,
    rows: Vec<Arc<Mutex<FlowRecord>>>,
    completed: AtomicUsize,
}

#[derive(Debug, Clone, Serialize)]
pub struct FlowView {
    pub id: Uuid,
    pub sequence: usize,
    pub status: FlowStatus,
    pub media_generation_id: Option<String>,
    pub operation_name: Option<String>,
    pub poll_attempts: u32,
    pub video_url: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FlowRunSnapshot {
    pub id: Uuid,
    pub total: usize,
    pub completed: usize,
    pub rows: Vec<FlowView>,
}

impl FlowRun {
    pub fn new(rows: Vec<FlowRecord>) -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4(),
            rows: rows.into_iter().map(|r| Arc::new(Mutex::new(r))).collect(),
            completed: AtomicUsize::new(0),
        })
    }

    pub fn completed_count(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> FlowRunSnapshot {
        let rows: Vec<FlowView> = self
            .rows
            .iter()
            .map(|handle| {
                let row = handle.lock().unwrap();
                FlowView {
                    id: row.id,
                    sequence: row.sequence,
                    status: row.status,
                    media_generation_id: row.media_generation_id.clone(),
                    operation_name: row.operation_name.clone(),
                    poll_attempts: row.poll_attempts,
                    video_url: row.video_url.clone(),
                    error: row.error.clone(),
                }
            })
            .collect();

        FlowRunSnapshot {
            id: self.id,
            total: rows.len(),
            completed: self.completed_count(),
            rows,
        }
    }
}

/// Drives the image-to-video pipeline in bounded fan-out groups: every row of
/// a group runs its submission chain concurrently, then one group-level loop
/// polls the batch status endpoint, reconciling each operation's latest state
/// into storage every round before checking for terminal status. The next
/// group starts only when the current one is fully terminal or out of budget.
#[derive(Clone)]
pub struct FlowEngine {
    api: Arc<dyn VideoGenApi>,
    store: Arc<dyn TaskStore>,
    policy: PollPolicy,
    width: usize,
}

impl FlowEngine {
    pub fn new(
        api: Arc<dyn VideoGenApi>,
        store: Arc<dyn TaskStore>,
        policy: PollPolicy,
        width: usize,
    ) -> Self {
        Self {
            api,
            store,
            policy,
            width: width.max(1),
        }
    }

    pub async fn run(&self, run: &Arc<FlowRun>, token: &str) {
        tracing::info!(flow_id = %run.id, row_count = run.rows.len(), width = self.width, "flow started");

        for group in run.rows.chunks(self.width) {
            let mut set = JoinSet::new();
            for row in group {
                set.spawn(prepare_row(
                    Arc::clone(&self.api),
                    Arc::clone(&self.store),
                    Arc::clone(row),
                    token.to_string(),
                ));
            }
            while let Some(joined) = set.join_next().await {
                if let Err(err) = joined {
                    tracing::error!(flow_id = %run.id, error = %err, "flow row panicked");
                }
            }

            self.poll_group(group, token).await;

            for _ in group {
                run.completed.fetch_add(1, Ordering::SeqCst);
            }
        }

        tracing::info!(flow_id = %run.id, completed = run.completed_count(), "flow finished");
    }

    /// One polling loop per group. Poll and reconcile are fused: every round
    /// upserts each still-pending operation's reported state before the
    /// terminal check, so the stored row always mirrors the last response.
    async fn poll_group(&self, rows: &[Arc<Mutex<FlowRecord>>], token: &str) {
        let mut remaining: Vec<(Arc<Mutex<FlowRecord>>, VideoOperationRef)> = rows
            .iter()
            .filter_map(|row| {
                let r = row.lock().unwrap();
                match (&r.operation_name, r.scene_id, r.status) {
                    (Some(name), Some(scene_id), FlowStatus::PollingVideo) => Some((
                        Arc::clone(row),
                        VideoOperationRef {
                            operation_name: name.clone(),
                            scene_id,
                            last_status: OperationStatus::Active,
                        },
                    )),
                    _ => None,
                }
            })
            .collect();

        for attempt in 1..=self.policy.max_attempts {
            if remaining.is_empty() {
                return;
            }

            tokio::time::sleep(self.policy.interval).await;
            for (row, _) in &remaining {
                row.lock().unwrap().poll_attempts = attempt;
            }

            let refs: Vec<VideoOperationRef> =
                remaining.iter().map(|(_, op)| op.clone()).collect();
            let reports = match self.api.check_status(&refs, token).await {
                Ok(reports) => reports,
                Err(err) => {
                    tracing::warn!(attempt, error = %err, "video status poll failed, retrying");
                    continue;
                }
            };

            for report in reports {
                let Some(idx) = remaining
                    .iter()
                    .position(|(_, op)| op.operation_name == report.operation_name)
                else {
                    continue;
                };

                let (video_prompt, scene_id) = {
                    let row = remaining[idx].0.lock().unwrap();
                    (row.video_prompt.clone(), row.scene_id)
                };
                if let Err(err) = self
                    .store
                    .upsert_operation(&OperationSnapshot {
                        operation_name: report.operation_name.clone(),
                        scene_id,
                        status: report.status.as_vendor_str().to_string(),
                        video_url: report.video_url.clone(),
                        video_prompt: Some(video_prompt),
                        raw_response: Some(report.raw.clone()),
                    })
                    .await
                {
                    tracing::error!(
                        operation = %report.operation_name,
                        error = %err,
                        "failed to reconcile operation state"
                    );
                }

                match report.status {
                    OperationStatus::Successful => {
                        let (row, _) = remaining.remove(idx);
                        let mut row = row.lock().unwrap();
                        match report.video_url {
                            Some(url) => row.complete(url),
                            None => row.fail("no extractable video URI in completed operation"),
                        }
                    }
                    OperationStatus::Failed => {
                        let (row, _) = remaining.remove(idx);
                        row.lock().unwrap().fail(
                            report
                                .failure_reason
                                .unwrap_or_else(|| "video generation failed".to_string()),
                        );
                    }
                    status => remaining[idx].1.last_status = status,
                }
            }
        }

        for (row, op) in remaining {
            tracing::warn!(operation = %op.operation_name, "video polling budget exhausted");
            row.lock().unwrap().fail(format!(
                "video generation timed out after {} polling attempts",
                self.policy.max_attempts
            ));
        }
    }
}

/// Stage chain for one row, up to the point where its operation joins the
/// group polling loop. Any stage error finalizes this row only.
async fn prepare_row(
    api: Arc<dyn VideoGenApi>,
    store: Arc<dyn TaskStore>,
    row: Arc<Mutex<FlowRecord>>,
    token: String,
) {
    let (sequence, image_prompt, reference_ids, video_prompt) = {
        let mut r = row.lock().unwrap();
        r.status = FlowStatus::GeneratingImage;
        (
            r.sequence,
            r.image_prompt.clone(),
            r.reference_ids.clone(),
            r.video_prompt.clone(),
        )
    };

    let staged = async {
        let media_generation_id = api
            .generate_image(&image_prompt, &reference_ids, &token)
            .await?;
        row.lock().unwrap().media_generation_id = Some(media_generation_id.clone());
        tracing::info!(sequence, media_generation_id = %media_generation_id, "image generated");

        let image_url = api.fetch_image(&media_generation_id, &token).await?;
        row.lock().unwrap().image_url = Some(image_url.clone());

        if let Err(err) = store
            .upsert_image(&ImageSnapshot {
                media_generation_id: media_generation_id.clone(),
                file_name: None,
                file_url: Some(image_url.clone()),
                kind: "generated".to_string(),
                prompt: Some(image_prompt.clone()),
                raw_response: None,
            })
            .await
        {
            tracing::error!(sequence, error = %err, "failed to persist generated image");
        }

        row.lock().unwrap().status = FlowStatus::UploadingImage;
        let bytes = api.fetch_bytes(&image_url).await?;
        let uploaded_media_id = api.upload_image(&BASE64.encode(&bytes), &token).await?;
        row.lock().unwrap().uploaded_media_id = Some(uploaded_media_id.clone());

        row.lock().unwrap().status = FlowStatus::StartingVideo;
        let started = api.start_video(&video_prompt, &uploaded_media_id, &token).await?;
        {
            let mut r = row.lock().unwrap();
            r.operation_name = Some(started.operation_name.clone());
            r.scene_id = Some(started.scene_id);
            r.status = FlowStatus::PollingVideo;
        }
        tracing::info!(sequence, operation = %started.operation_name, "video generation started");

        if let Err(err) = store
            .upsert_operation(&OperationSnapshot {
                operation_name: started.operation_name.clone(),
                scene_id: Some(started.scene_id),
                status: OperationStatus::Active.as_vendor_str().to_string(),
                video_url: None,
                video_prompt: Some(video_prompt.clone()),
                raw_response: None,
            })
            .await
        {
            tracing::error!(sequence, error = %err, "failed to persist new video operation");
        }

        anyhow::Ok(())
    }
    .await;

    if let Err(err) = staged {
        tracing::error!(sequence, error = %err, "flow row failed before polling");
        row.lock().unwrap().fail(err.to_string());
    }
}
