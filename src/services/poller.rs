use crate::config::{AuthTokens, PollPolicy};
use crate::services::image_api::{ImageGenApi, RemoteTaskEntry};

/// Terminal outcome of one polling loop. Timeout is its own variant so the
/// synthesized message stays distinguishable from vendor-reported failures.
#[derive(Debug, Clone)]
pub enum PollOutcome {
    Completed { entry: RemoteTaskEntry },
    Failed { reason: String },
    TimedOut { attempts: u32 },
}

/// Polls the recent-tasks listing until the job resolves or the attempt
/// budget runs out. Individual poll failures are logged and absorbed; the
/// loop only gives up at the ceiling. The callback fires once per attempt so
/// the panel can render progress at polling cadence.
pub async fn poll_until_terminal<F>(
    api: &dyn ImageGenApi,
    job_id: &str,
    tokens: &AuthTokens,
    policy: &PollPolicy,
    mut on_attempt: F,
) -> PollOutcome
where
    F: FnMut(u32) + Send,
{
    for attempt in 1..=policy.max_attempts {
        tokio::time::sleep(policy.interval).await;
        on_attempt(attempt);

        let entries = match api.recent_tasks(tokens).await {
            Ok(entries) => entries,
            Err(err) => {
                tracing::warn!(job_id = %job_id, attempt, error = %err, "status poll failed, retrying");
                continue;
            }
        };

        let Some(entry) = entries.into_iter().find(|entry| entry.id == job_id) else {
            // not in the listing window yet
            continue;
        };

        match entry.status.as_deref() {
            Some("succeeded") => {
                tracing::info!(job_id = %job_id, attempt, "job succeeded");
                return PollOutcome::Completed { entry };
            }
            Some("failed") => {
                let reason = entry
                    .failure_reason
                    .clone()
                    .filter(|r| !r.is_empty())
                    .unwrap_or_else(|| "unknown failure reason".to_string());
                tracing::info!(job_id = %job_id, attempt, reason = %reason, "job failed");
                return PollOutcome::Failed { reason };
            }
            _ => {}
        }
    }

    tracing::warn!(job_id = %job_id, attempts = policy.max_attempts, "polling budget exhausted");
    PollOutcome::TimedOut {
        attempts: policy.max_attempts,
    }
}
