use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use serde::Serialize;
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::config::{AuthTokens, PollPolicy};
use crate::schema::{TaskRecord, TaskStatus};
use crate::services::image_api::{ImageGenApi, extract_output_urls};
use crate::services::poller::{PollOutcome, poll_until_terminal};
use crate::services::store::TaskStore;

/// How one batch is driven: one task at a time, or fixed-size groups whose
/// members run concurrently. Group N+1 never starts before group N is fully
/// terminal; the group width is the only admission control against the
/// vendor API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStrategy {
    Sequential,
    FanOut { width: usize },
}

/// One batch in flight. Tasks are appended only by the retry path; the
/// completed counter advances exactly once per task whatever the outcome.
pub struct BatchRun {
    pub id: Uuid,
    tasks: RwLock<Vec<Arc<Mutex<TaskRecord>>>>,
    completed: AtomicUsize,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskView {
    pub id: Uuid,
    pub sequence: usize,
    pub status: TaskStatus,
    pub external_job_id: Option<String>,
    pub poll_attempts: u32,
    pub result_urls: Vec<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchRunSnapshot {
    pub id: Uuid,
    pub total: usize,
    pub completed: usize,
    pub tasks: Vec<TaskView>,
}

impl BatchRun {
    pub fn new(tasks: Vec<TaskRecord>) -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4(),
            tasks: RwLock::new(tasks.into_iter().map(|t| Arc::new(Mutex::new(t))).collect()),
            completed: AtomicUsize::new(0),
        })
    }

    pub fn completed_count(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    fn handles(&self) -> Vec<Arc<Mutex<TaskRecord>>> {
        self.tasks.read().unwrap().clone()
    }

    pub fn snapshot(&self) -> BatchRunSnapshot {
        let tasks: Vec<TaskView> = self
            .handles()
            .iter()
            .map(|handle| {
                let task = handle.lock().unwrap();
                TaskView {
                    id: task.id,
                    sequence: task.sequence,
                    status: task.status,
                    external_job_id: task.external_job_id.clone(),
                    poll_attempts: task.poll_attempts,
                    result_urls: task.result_urls.clone(),
                    error: task.error.clone(),
                }
            })
            .collect();

        BatchRunSnapshot {
            id: self.id,
            total: tasks.len(),
            completed: self.completed_count(),
            tasks,
        }
    }

    /// Spawns a fresh lifecycle for a terminal task's input and appends it to
    /// the run. The original record stays untouched.
    pub fn respawn_task(&self, task_id: Uuid) -> anyhow::Result<Arc<Mutex<TaskRecord>>> {
        let mut tasks = self.tasks.write().unwrap();
        let source = tasks
            .iter()
            .find(|handle| handle.lock().unwrap().id == task_id)
            .ok_or_else(|| anyhow::anyhow!("no task {task_id} in this run"))?;

        let snapshot = source.lock().unwrap().clone();
        if !snapshot.status.is_terminal() {
            anyhow::bail!("task {task_id} is still in flight");
        }

        let handle = Arc::new(Mutex::new(snapshot.respawn()));
        tasks.push(Arc::clone(&handle));
        Ok(handle)
    }
}

#[derive(Clone)]
pub struct BatchQueue {
    api: Arc<dyn ImageGenApi>,
    store: Arc<dyn TaskStore>,
    policy: PollPolicy,
    strategy: RunStrategy,
}

impl BatchQueue {
    pub fn new(
        api: Arc<dyn ImageGenApi>,
        store: Arc<dyn TaskStore>,
        policy: PollPolicy,
        strategy: RunStrategy,
    ) -> Self {
        Self {
            api,
            store,
            policy,
            strategy,
        }
    }

    /// Drives every task of the run to a terminal state. A task failure never
    /// aborts its siblings; there is no mid-flight cancellation.
    pub async fn run(&self, run: &Arc<BatchRun>, tokens: &AuthTokens) {
        let handles = run.handles();
        tracing::info!(
            batch_id = %run.id,
            task_count = handles.len(),
            strategy = ?self.strategy,
            "batch started"
        );

        match self.strategy {
            RunStrategy::Sequential => {
                for handle in handles {
                    process_task(
                        Arc::clone(&self.api),
                        Arc::clone(&self.store),
                        self.policy,
                        Arc::clone(run),
                        handle,
                        tokens.clone(),
                    )
                    .await;
                }
            }
            RunStrategy::FanOut { width } => {
                for group in handles.chunks(width.max(1)) {
                    let mut set = JoinSet::new();
                    for handle in group {
                        set.spawn(process_task(
                            Arc::clone(&self.api),
                            Arc::clone(&self.store),
                            self.policy,
                            Arc::clone(run),
                            Arc::clone(handle),
                            tokens.clone(),
                        ));
                    }
                    while let Some(joined) = set.join_next().await {
                        if let Err(err) = joined {
                            tracing::error!(batch_id = %run.id, error = %err, "batch task panicked");
                        }
                    }
                }
            }
        }

        tracing::info!(
            batch_id = %run.id,
            completed = run.completed_count(),
            "batch finished"
        );
    }

    /// Runs one (typically respawned) task through the same lifecycle.
    pub async fn process_single(
        &self,
        run: &Arc<BatchRun>,
        record: Arc<Mutex<TaskRecord>>,
        tokens: &AuthTokens,
    ) {
        process_task(
            Arc::clone(&self.api),
            Arc::clone(&self.store),
            self.policy,
            Arc::clone(run),
            record,
            tokens.clone(),
        )
        .await;
    }
}

/// Full lifecycle of one task: submit, poll, finalize. The persistence write
/// and the completed-count increment run unconditionally, whichever stage
/// failed. This function is the record's only writer for its whole duration.
async fn process_task(
    api: Arc<dyn ImageGenApi>,
    store: Arc<dyn TaskStore>,
    policy: PollPolicy,
    run: Arc<BatchRun>,
    record: Arc<Mutex<TaskRecord>>,
    tokens: AuthTokens,
) {
    let (task_id, input) = {
        let mut task = record.lock().unwrap();
        task.status = TaskStatus::Submitting;
        (task.id, task.input.clone())
    };

    let outcome = async {
        let job_id = api.submit(&input, &tokens).await?;
        {
            let mut task = record.lock().unwrap();
            task.external_job_id = Some(job_id.clone());
            task.status = TaskStatus::Polling;
        }

        let attempt_sink = Arc::clone(&record);
        let outcome = poll_until_terminal(api.as_ref(), &job_id, &tokens, &policy, move |attempt| {
            attempt_sink.lock().unwrap().poll_attempts = attempt;
        })
        .await;
        anyhow::Ok(outcome)
    }
    .await;

    {
        let mut task = record.lock().unwrap();
        match outcome {
            Ok(PollOutcome::Completed { entry }) => match extract_output_urls(&entry) {
                Ok(urls) => {
                    let payload =
                        serde_json::to_value(&entry).unwrap_or(serde_json::Value::Null);
                    task.complete(payload, urls);
                }
                Err(err) => task.fail(err.to_string()),
            },
            Ok(PollOutcome::Failed { reason }) => task.fail(reason),
            Ok(PollOutcome::TimedOut { attempts }) => {
                task.fail(format!("timed out after {attempts} polling attempts"));
            }
            Err(err) => task.fail(err.to_string()),
        }
        tracing::info!(
            task_id = %task.id,
            sequence = task.sequence,
            status = ?task.status,
            "task finalized"
        );
    }

    // finalize-always: best-effort persistence plus the aggregate counter,
    // regardless of which stage failed above
    let snapshot = record.lock().unwrap().clone();
    if let Err(err) = store.log_task(&snapshot).await {
        tracing::error!(task_id = %task_id, error = %err, "failed to persist task outcome");
    }
    run.completed.fetch_add(1, Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{BatchConfig, BatchItem, GenerationRequest, build_batch};
    use crate::services::image_api::{RemoteTaskEntry, UploadReceipt};
    use crate::services::store::{ImageSnapshot, OperationSnapshot, StoreHealth};
    use std::collections::HashSet;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    fn fast_policy(max_attempts: u32) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(1),
            max_attempts,
        }
    }

    fn batch(prompts: &[&str]) -> Vec<TaskRecord> {
        let items: Vec<BatchItem> = prompts
            .iter()
            .map(|p| BatchItem {
                prompt: p.to_string(),
                upload_media_id: None,
            })
            .collect();
        build_batch(&items, &BatchConfig::default()).unwrap()
    }

    /// Behavior of the mock listing endpoint for submitted jobs.
    #[derive(Clone, Copy, PartialEq)]
    enum ListingMode {
        Succeed,
        SucceedWithoutUrl,
        StayPending,
        FailWithReason,
    }

    /// Vendor stand-in: every submitted prompt becomes job `job::<prompt>`;
    /// the listing reports all submitted jobs per the configured mode. Also
    /// records, per submission, how many tasks of the run were already
    /// finalized, which is what the group-barrier assertions check.
    struct PanelMockApi {
        run: Arc<BatchRun>,
        fail_prompts: HashSet<String>,
        mode: ListingMode,
        submissions: Mutex<Vec<(String, usize)>>,
        polls: AtomicU32,
    }

    impl PanelMockApi {
        fn new(run: Arc<BatchRun>) -> Self {
            Self {
                run,
                fail_prompts: HashSet::new(),
                mode: ListingMode::Succeed,
                submissions: Mutex::new(Vec::new()),
                polls: AtomicU32::new(0),
            }
        }

        fn failing_submit(mut self, prompt: &str) -> Self {
            self.fail_prompts.insert(prompt.to_string());
            self
        }

        fn with_mode(mut self, mode: ListingMode) -> Self {
            self.mode = mode;
            self
        }

        fn submissions(&self) -> Vec<(String, usize)> {
            self.submissions.lock().unwrap().clone()
        }

        fn poll_count(&self) -> u32 {
            self.polls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl ImageGenApi for PanelMockApi {
        async fn submit(
            &self,
            request: &GenerationRequest,
            _tokens: &AuthTokens,
        ) -> anyhow::Result<String> {
            self.submissions
                .lock()
                .unwrap()
                .push((request.prompt.clone(), self.run.completed_count()));

            if self.fail_prompts.contains(&request.prompt) {
                anyhow::bail!("generation API returned 500 Internal Server Error: boom");
            }
            Ok(format!("job::{}", request.prompt))
        }

        async fn recent_tasks(
            &self,
            _tokens: &AuthTokens,
        ) -> anyhow::Result<Vec<RemoteTaskEntry>> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            let submitted = self.submissions.lock().unwrap().clone();
            let entries = submitted
                .iter()
                .map(|(prompt, _)| match self.mode {
                    ListingMode::Succeed => RemoteTaskEntry {
                        id: format!("job::{prompt}"),
                        status: Some("succeeded".to_string()),
                        failure_reason: None,
                        generations: vec![serde_json::json!({
                            "encodings": { "source": { "path": format!("https://media/{prompt}.png") } }
                        })],
                    },
                    ListingMode::SucceedWithoutUrl => RemoteTaskEntry {
                        id: format!("job::{prompt}"),
                        status: Some("succeeded".to_string()),
                        failure_reason: None,
                        generations: vec![serde_json::json!({ "thumbnail": "x" })],
                    },
                    ListingMode::StayPending => RemoteTaskEntry {
                        id: format!("job::{prompt}"),
                        status: Some("running".to_string()),
                        failure_reason: None,
                        generations: vec![],
                    },
                    ListingMode::FailWithReason => RemoteTaskEntry {
                        id: format!("job::{prompt}"),
                        status: Some("failed".to_string()),
                        failure_reason: Some("content policy violation".to_string()),
                        generations: vec![],
                    },
                })
                .collect();
            Ok(entries)
        }

        async fn upload(
            &self,
            _file_name: &str,
            _bytes: Vec<u8>,
            _tokens: &AuthTokens,
        ) -> anyhow::Result<UploadReceipt> {
            unreachable!("queue tests never upload")
        }
    }

    /// Store stand-in that records every terminal write.
    struct RecordingStore {
        logged: Mutex<Vec<TaskRecord>>,
        fail_writes: bool,
    }

    impl RecordingStore {
        fn new() -> Self {
            Self {
                logged: Mutex::new(Vec::new()),
                fail_writes: false,
            }
        }

        fn failing() -> Self {
            Self {
                logged: Mutex::new(Vec::new()),
                fail_writes: true,
            }
        }

        fn logged(&self) -> Vec<TaskRecord> {
            self.logged.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl TaskStore for RecordingStore {
        async fn log_task(&self, record: &TaskRecord) -> anyhow::Result<()> {
            self.logged.lock().unwrap().push(record.clone());
            if self.fail_writes {
                anyhow::bail!("storage offline");
            }
            Ok(())
        }

        async fn record_upload(
            &self,
            _file_name: &str,
            _receipt: &UploadReceipt,
        ) -> anyhow::Result<()> {
            Ok(())
        }

        async fn file_name_exists(&self, _file_name: &str) -> anyhow::Result<bool> {
            Ok(false)
        }

        async fn upsert_image(&self, _image: &ImageSnapshot) -> anyhow::Result<()> {
            Ok(())
        }

        async fn upsert_operation(&self, _op: &OperationSnapshot) -> anyhow::Result<()> {
            Ok(())
        }

        async fn video_history(
            &self,
            _limit: i64,
        ) -> anyhow::Result<Vec<crate::schema::VeoVideoTaskRow>> {
            Ok(vec![])
        }

        async fn task_history(&self, _limit: i64) -> anyhow::Result<Vec<crate::schema::TaskLogRow>> {
            Ok(vec![])
        }

        async fn upload_history(&self, _limit: i64) -> anyhow::Result<Vec<crate::schema::UploadRow>> {
            Ok(vec![])
        }

        async fn image_history(&self, _limit: i64) -> anyhow::Result<Vec<crate::schema::VeoImageRow>> {
            Ok(vec![])
        }

        async fn delete_task(&self, _id: i64) -> anyhow::Result<bool> {
            Ok(false)
        }

        async fn delete_upload(&self, _id: i64) -> anyhow::Result<bool> {
            Ok(false)
        }

        async fn health(&self) -> anyhow::Result<StoreHealth> {
            Ok(StoreHealth {
                completed_tasks: 0,
                failed_tasks: 0,
                uploads: 0,
                pending_operations: 0,
            })
        }
    }

    #[tokio::test]
    async fn single_task_completes_with_extracted_url() {
        let run = BatchRun::new(batch(&["cat"]));
        let api = Arc::new(PanelMockApi::new(Arc::clone(&run)));
        let store = Arc::new(RecordingStore::new());
        let queue = BatchQueue::new(
            api.clone(),
            store.clone(),
            fast_policy(10),
            RunStrategy::Sequential,
        );

        queue.run(&run, &AuthTokens::default()).await;

        let snapshot = run.snapshot();
        assert_eq!(snapshot.completed, 1);
        let task = &snapshot.tasks[0];
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.external_job_id.as_deref(), Some("job::cat"));
        assert_eq!(task.result_urls, vec!["https://media/cat.png"]);
        assert!(task.error.is_none());

        let logged = store.logged();
        assert_eq!(logged.len(), 1);
        assert_eq!(logged[0].status, TaskStatus::Completed);
        assert!(logged[0].result.is_some());
        assert!(logged[0].error.is_none());
    }

    #[tokio::test]
    async fn submit_failure_finalizes_without_polling() {
        let run = BatchRun::new(batch(&["dog"]));
        let api = Arc::new(PanelMockApi::new(Arc::clone(&run)).failing_submit("dog"));
        let store = Arc::new(RecordingStore::new());
        let queue = BatchQueue::new(
            api.clone(),
            store.clone(),
            fast_policy(10),
            RunStrategy::Sequential,
        );

        queue.run(&run, &AuthTokens::default()).await;

        let snapshot = run.snapshot();
        assert_eq!(snapshot.completed, 1);
        let task = &snapshot.tasks[0];
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.error.as_deref().unwrap().contains("500"));
        assert!(task.external_job_id.is_none());
        assert_eq!(api.poll_count(), 0);

        // the failed task still got its single persistence write
        assert_eq!(store.logged().len(), 1);
        assert_eq!(store.logged()[0].status, TaskStatus::Failed);
    }

    #[tokio::test]
    async fn sequential_finalizes_in_submission_order() {
        let run = BatchRun::new(batch(&["first", "second", "third"]));
        let api = Arc::new(PanelMockApi::new(Arc::clone(&run)));
        let store = Arc::new(RecordingStore::new());
        let queue = BatchQueue::new(
            api.clone(),
            store.clone(),
            fast_policy(10),
            RunStrategy::Sequential,
        );

        queue.run(&run, &AuthTokens::default()).await;

        let logged: Vec<String> = store
            .logged()
            .iter()
            .map(|r| r.input.prompt.clone())
            .collect();
        assert_eq!(logged, vec!["first", "second", "third"]);
        assert_eq!(run.completed_count(), 3);
    }

    #[tokio::test]
    async fn fanout_groups_never_overlap() {
        let prompts: Vec<String> = (1..=10).map(|i| format!("task-{i}")).collect();
        let prompt_refs: Vec<&str> = prompts.iter().map(String::as_str).collect();
        let run = BatchRun::new(batch(&prompt_refs));
        let api = Arc::new(PanelMockApi::new(Arc::clone(&run)));
        let store = Arc::new(RecordingStore::new());
        let queue = BatchQueue::new(
            api.clone(),
            store.clone(),
            fast_policy(10),
            RunStrategy::FanOut { width: 4 },
        );

        queue.run(&run, &AuthTokens::default()).await;

        assert_eq!(run.completed_count(), 10);
        assert!(
            run.snapshot()
                .tasks
                .iter()
                .all(|t| t.status == TaskStatus::Completed)
        );

        // every task of group N submits only after all 4N tasks of the
        // previous groups have finalized
        for (prompt, finalized_at_submit) in api.submissions() {
            let sequence: usize = prompt.trim_start_matches("task-").parse().unwrap();
            let group_floor = ((sequence - 1) / 4) * 4;
            assert!(
                finalized_at_submit >= group_floor,
                "{prompt} submitted after only {finalized_at_submit} finalizations, needs {group_floor}"
            );
        }
    }

    #[tokio::test]
    async fn failed_task_does_not_abort_siblings() {
        let run = BatchRun::new(batch(&["ok-1", "bad", "ok-2"]));
        let api = Arc::new(PanelMockApi::new(Arc::clone(&run)).failing_submit("bad"));
        let store = Arc::new(RecordingStore::new());
        let queue = BatchQueue::new(
            api.clone(),
            store.clone(),
            fast_policy(10),
            RunStrategy::FanOut { width: 4 },
        );

        queue.run(&run, &AuthTokens::default()).await;

        let snapshot = run.snapshot();
        assert_eq!(snapshot.completed, 3);
        let by_prompt = |p: &str| {
            snapshot
                .tasks
                .iter()
                .find(|t| t.sequence == ["ok-1", "bad", "ok-2"].iter().position(|x| *x == p).unwrap() + 1)
                .unwrap()
                .clone()
        };
        assert_eq!(by_prompt("ok-1").status, TaskStatus::Completed);
        assert_eq!(by_prompt("bad").status, TaskStatus::Failed);
        assert_eq!(by_prompt("ok-2").status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn timeout_produces_synthesized_reason() {
        let run = BatchRun::new(batch(&["slow"]));
        let api =
            Arc::new(PanelMockApi::new(Arc::clone(&run)).with_mode(ListingMode::StayPending));
        let store = Arc::new(RecordingStore::new());
        let queue = BatchQueue::new(
            api.clone(),
            store.clone(),
            fast_policy(3),
            RunStrategy::Sequential,
        );

        queue.run(&run, &AuthTokens::default()).await;

        let task = &run.snapshot().tasks[0];
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(
            task.error.as_deref(),
            Some("timed out after 3 polling attempts")
        );
        assert_eq!(task.poll_attempts, 3);
        assert_eq!(run.completed_count(), 1);
    }

    #[tokio::test]
    async fn vendor_failure_reason_is_recorded() {
        let run = BatchRun::new(batch(&["flagged"]));
        let api =
            Arc::new(PanelMockApi::new(Arc::clone(&run)).with_mode(ListingMode::FailWithReason));
        let store = Arc::new(RecordingStore::new());
        let queue = BatchQueue::new(
            api.clone(),
            store.clone(),
            fast_policy(10),
            RunStrategy::Sequential,
        );

        queue.run(&run, &AuthTokens::default()).await;

        let task = &run.snapshot().tasks[0];
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error.as_deref(), Some("content policy violation"));
    }

    #[tokio::test]
    async fn unextractable_result_url_fails_the_task() {
        let run = BatchRun::new(batch(&["weird"]));
        let api = Arc::new(
            PanelMockApi::new(Arc::clone(&run)).with_mode(ListingMode::SucceedWithoutUrl),
        );
        let store = Arc::new(RecordingStore::new());
        let queue = BatchQueue::new(
            api.clone(),
            store.clone(),
            fast_policy(10),
            RunStrategy::Sequential,
        );

        queue.run(&run, &AuthTokens::default()).await;

        let task = &run.snapshot().tasks[0];
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.error.as_deref().unwrap().contains("no extractable URL"));
    }

    #[tokio::test]
    async fn persistence_failure_never_flips_task_outcome() {
        let run = BatchRun::new(batch(&["cat"]));
        let api = Arc::new(PanelMockApi::new(Arc::clone(&run)));
        let store = Arc::new(RecordingStore::failing());
        let queue = BatchQueue::new(
            api.clone(),
            store.clone(),
            fast_policy(10),
            RunStrategy::Sequential,
        );

        queue.run(&run, &AuthTokens::default()).await;

        let task = &run.snapshot().tasks[0];
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(run.completed_count(), 1);
        // the write was still attempted exactly once
        assert_eq!(store.logged().len(), 1);
    }

    #[tokio::test]
    async fn respawn_runs_a_fresh_lifecycle_for_the_same_input() {
        let run = BatchRun::new(batch(&["dog"]));
        let failing_api = Arc::new(PanelMockApi::new(Arc::clone(&run)).failing_submit("dog"));
        let store = Arc::new(RecordingStore::new());
        let queue = BatchQueue::new(
            failing_api,
            store.clone(),
            fast_policy(10),
            RunStrategy::Sequential,
        );
        queue.run(&run, &AuthTokens::default()).await;

        let failed_id = run.snapshot().tasks[0].id;
        let retry_handle = run.respawn_task(failed_id).unwrap();

        let healthy_api = Arc::new(PanelMockApi::new(Arc::clone(&run)));
        let retry_queue = BatchQueue::new(
            healthy_api,
            store.clone(),
            fast_policy(10),
            RunStrategy::Sequential,
        );
        retry_queue
            .process_single(&run, retry_handle, &AuthTokens::default())
            .await;

        let snapshot = run.snapshot();
        assert_eq!(snapshot.total, 2);
        assert_eq!(snapshot.completed, 2);
        assert_eq!(snapshot.tasks[0].status, TaskStatus::Failed);
        assert_eq!(snapshot.tasks[1].status, TaskStatus::Completed);
        assert_ne!(snapshot.tasks[0].id, snapshot.tasks[1].id);
        assert_eq!(store.logged().len(), 2);
    }

    #[tokio::test]
    async fn respawn_rejects_unknown_and_inflight_tasks() {
        let run = BatchRun::new(batch(&["cat"]));
        assert!(run.respawn_task(Uuid::new_v4()).is_err());

        // still pending, not terminal
        let pending_id = run.snapshot().tasks[0].id;
        assert!(run.respawn_task(pending_id).is_err());
    }

    /// The lifecycle is observed from inside the vendor mock: submission must
    /// see `submitting`, the first poll must see `polling` with the job id
    /// already attached.
    struct TransitionAssertingApi {
        run: Arc<BatchRun>,
    }

    #[async_trait::async_trait]
    impl ImageGenApi for TransitionAssertingApi {
        async fn submit(
            &self,
            request: &GenerationRequest,
            _tokens: &AuthTokens,
        ) -> anyhow::Result<String> {
            let snapshot = self.run.snapshot();
            let task = snapshot
                .tasks
                .iter()
                .find(|t| t.sequence == 1)
                .expect("task present");
            assert_eq!(task.status, TaskStatus::Submitting);
            assert!(task.external_job_id.is_none());
            Ok(format!("job::{}", request.prompt))
        }

        async fn recent_tasks(
            &self,
            _tokens: &AuthTokens,
        ) -> anyhow::Result<Vec<RemoteTaskEntry>> {
            let snapshot = self.run.snapshot();
            let task = &snapshot.tasks[0];
            assert_eq!(task.status, TaskStatus::Polling);
            assert_eq!(task.external_job_id.as_deref(), Some("job::cat"));
            Ok(vec![RemoteTaskEntry {
                id: "job::cat".to_string(),
                status: Some("succeeded".to_string()),
                failure_reason: None,
                generations: vec![serde_json::json!({ "url": "https://media/cat.png" })],
            }])
        }

        async fn upload(
            &self,
            _file_name: &str,
            _bytes: Vec<u8>,
            _tokens: &AuthTokens,
        ) -> anyhow::Result<UploadReceipt> {
            unreachable!()
        }
    }

    #[tokio::test]
    async fn status_moves_through_submitting_then_polling() {
        let run = BatchRun::new(batch(&["cat"]));
        let api = Arc::new(TransitionAssertingApi {
            run: Arc::clone(&run),
        });
        let store = Arc::new(RecordingStore::new());
        let queue = BatchQueue::new(api, store, fast_policy(10), RunStrategy::Sequential);

        queue.run(&run, &AuthTokens::default()).await;
        assert_eq!(run.snapshot().tasks[0].status, TaskStatus::Completed);
    }
}
