use super::persist::ResultPersister;
use super::policy::PollPolicy;
use super::{TaskHandle, TaskPoll, TaskProvider, TaskStatus};
use crate::error::ProviderError;
use crate::types::{Sizing, Values};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Final state of one task after the lifecycle completes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub task_id: Option<String>,
    pub status: TaskStatus,
    /// Locator to hand to callers: the persisted copy when available
    pub result_url: Option<String>,
    /// Locator as reported by the provider
    pub remote_url: Option<String>,
    pub persisted: bool,
    pub error: Option<String>,
    pub attempts: u32,
}

impl TaskOutcome {
    fn failed(task_id: Option<String>, status: TaskStatus, error: String, attempts: u32) -> Self {
        Self {
            task_id,
            status,
            result_url: None,
            remote_url: None,
            persisted: false,
            error: Some(error),
            attempts,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == TaskStatus::Completed
    }
}

/// Drives submit -> poll -> persist for a single task
pub struct TaskRunner {
    provider: Arc<dyn TaskProvider>,
    persister: Arc<dyn ResultPersister>,
    policy: PollPolicy,
}

impl TaskRunner {
    pub fn new(
        provider: Arc<dyn TaskProvider>,
        persister: Arc<dyn ResultPersister>,
        policy: PollPolicy,
    ) -> Self {
        Self {
            provider,
            persister,
            policy,
        }
    }

    pub fn provider(&self) -> &Arc<dyn TaskProvider> {
        &self.provider
    }

    pub fn persister(&self) -> &Arc<dyn ResultPersister> {
        &self.persister
    }

    pub fn policy(&self) -> &PollPolicy {
        &self.policy
    }

    /// Run one task to a terminal outcome. Never returns an error: submission
    /// failures, provider failures, timeouts and cancellation all become a
    /// non-successful [`TaskOutcome`].
    pub async fn run(
        &self,
        prompt: &str,
        sizing: Sizing,
        extras: &Values,
        cancel: &CancellationToken,
    ) -> TaskOutcome {
        let handle = match self.provider.submit(prompt, sizing, extras).await {
            Ok(handle) => handle,
            Err(e) => {
                warn!(provider = self.provider.name(), error = %e, "Task submission failed");
                return TaskOutcome::failed(None, TaskStatus::Failed, e.to_string(), 0);
            }
        };

        info!(
            provider = self.provider.name(),
            task_id = %handle.id,
            width = sizing.width,
            height = sizing.height,
            "Task submitted"
        );

        let (poll, attempts) = match self.wait_for_terminal(&handle, cancel).await {
            Ok(observed) => observed,
            Err(
                e @ (ProviderError::Timeout { attempts, .. }
                | ProviderError::DeadlineExceeded { attempts, .. }),
            ) => {
                warn!(task_id = %handle.id, attempts, error = %e, "Task timed out");
                return TaskOutcome::failed(
                    Some(handle.id),
                    TaskStatus::TimedOut,
                    e.to_string(),
                    attempts,
                );
            }
            Err(e) => {
                warn!(task_id = %handle.id, error = %e, "Task polling aborted");
                return TaskOutcome::failed(Some(handle.id), TaskStatus::Failed, e.to_string(), 0);
            }
        };

        match (poll.status, poll.result_locator) {
            (TaskStatus::Completed, Some(remote)) => {
                self.finish(handle, remote, attempts).await
            }
            (TaskStatus::Completed, None) => TaskOutcome::failed(
                Some(handle.id),
                TaskStatus::Failed,
                "Task completed without a result".to_string(),
                attempts,
            ),
            (status, _) => {
                let error = poll
                    .error
                    .unwrap_or_else(|| format!("Task ended with status {}", status.as_str()));
                warn!(task_id = %handle.id, error = %error, "Task failed");
                TaskOutcome::failed(Some(handle.id), TaskStatus::Failed, error, attempts)
            }
        }
    }

    /// Poll until a terminal status. Transient poll errors use up an attempt
    /// and are otherwise ignored. The policy deadline bounds both the sleeps
    /// and the polls themselves.
    async fn wait_for_terminal(
        &self,
        handle: &TaskHandle,
        cancel: &CancellationToken,
    ) -> Result<(TaskPoll, u32), ProviderError> {
        let expires = self.policy.deadline.map(|deadline| Instant::now() + deadline);
        let deadline_exceeded = |attempts: u32| ProviderError::DeadlineExceeded {
            task_id: handle.id.clone(),
            deadline: self.policy.deadline.unwrap_or_default(),
            attempts,
        };
        let mut attempt = 0;

        while attempt < self.policy.max_attempts {
            let delay = self.policy.delay_for_attempt(attempt);
            tokio::select! {
                _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
                _ = sleep_until_expired(expires) => return Err(deadline_exceeded(attempt)),
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;

            let polled = tokio::select! {
                _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
                _ = sleep_until_expired(expires) => return Err(deadline_exceeded(attempt)),
                polled = self.provider.poll(handle) => polled,
            };

            match polled {
                Ok(poll) if poll.status.is_terminal() => return Ok((poll, attempt)),
                Ok(poll) => {
                    debug!(
                        task_id = %handle.id,
                        attempt,
                        progress = poll.progress.unwrap_or(0.0),
                        "Task still running"
                    );
                }
                Err(e) => {
                    warn!(task_id = %handle.id, attempt, error = %e, "Poll failed, will retry");
                }
            }
        }

        Err(ProviderError::Timeout {
            task_id: handle.id.clone(),
            attempts: attempt,
        })
    }

    async fn finish(&self, handle: TaskHandle, remote: String, attempts: u32) -> TaskOutcome {
        let (result_url, persisted) = self.persister.persist_or_remote(&handle.id, &remote).await;

        info!(task_id = %handle.id, attempts, persisted, "Task completed");

        TaskOutcome {
            task_id: Some(handle.id),
            status: TaskStatus::Completed,
            result_url: Some(result_url),
            remote_url: Some(remote),
            persisted,
            error: None,
            attempts,
        }
    }
}

/// Resolves at `expires`, or never when there is no deadline
async fn sleep_until_expired(expires: Option<Instant>) {
    match expires {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
