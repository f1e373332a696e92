use super::persist::ResultPersister;
use super::policy::PollPolicy;
use super::{TaskHandle, TaskProvider, TaskStatus};
use crate::types::{Sizing, Values};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Aggregate state of a batch of tasks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    /// At least one task is still pending or processing
    Running,
    /// Every task completed
    Done,
    /// Every task is terminal and some, but not all, completed
    Partial,
    /// Every task is terminal and none completed
    Failed,
}

/// Per-task state within a batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchEntry {
    pub index: usize,
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handle: Option<TaskHandle>,
    pub status: TaskStatus,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_url: Option<String>,
    pub persisted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BatchEntry {
    fn new(index: usize, prompt: String) -> Self {
        Self {
            index,
            prompt,
            handle: None,
            status: TaskStatus::Pending,
            attempts: 0,
            progress: None,
            result_url: None,
            remote_url: None,
            persisted: false,
            error: None,
        }
    }

    fn fail(&mut self, status: TaskStatus, error: impl Into<String>) {
        self.status = status;
        self.error = Some(error.into());
    }
}

/// N independently polled tasks.
///
/// One task's failure or timeout never blocks the others; a task that used up
/// its poll budget is marked `TimedOut` and is never polled again.
pub struct TaskBatch {
    provider: Arc<dyn TaskProvider>,
    persister: Arc<dyn ResultPersister>,
    policy: PollPolicy,
    entries: Vec<BatchEntry>,
    rounds: u32,
}

impl TaskBatch {
    /// Submit every prompt concurrently. Submission failures mark that entry
    /// failed without affecting the rest.
    pub async fn submit(
        provider: Arc<dyn TaskProvider>,
        persister: Arc<dyn ResultPersister>,
        policy: PollPolicy,
        prompts: Vec<String>,
        sizing: Sizing,
        extras: &Values,
    ) -> Self {
        let mut entries: Vec<BatchEntry> = prompts
            .into_iter()
            .enumerate()
            .map(|(index, prompt)| BatchEntry::new(index, prompt))
            .collect();

        let submissions = entries.iter().map(|entry| {
            let provider = provider.clone();
            async move { provider.submit(&entry.prompt, sizing, extras).await }
        });
        let results = join_all(submissions).await;

        for (entry, result) in entries.iter_mut().zip(results) {
            match result {
                Ok(handle) => {
                    debug!(index = entry.index, task_id = %handle.id, "Batch task submitted");
                    entry.handle = Some(handle);
                    entry.status = TaskStatus::Processing;
                }
                Err(e) => {
                    warn!(index = entry.index, error = %e, "Batch task submission failed");
                    entry.fail(TaskStatus::Failed, e.to_string());
                }
            }
        }

        info!(
            provider = provider.name(),
            tasks = entries.len(),
            "Submitted task batch"
        );

        Self {
            provider,
            persister,
            policy,
            entries,
            rounds: 0,
        }
    }

    pub fn entries(&self) -> &[BatchEntry] {
        &self.entries
    }

    pub fn is_finished(&self) -> bool {
        self.entries.iter().all(|e| e.status.is_terminal())
    }

    pub fn status(&self) -> BatchStatus {
        if !self.is_finished() {
            return BatchStatus::Running;
        }
        let completed = self
            .entries
            .iter()
            .filter(|e| e.status == TaskStatus::Completed)
            .count();

        if completed == self.entries.len() {
            BatchStatus::Done
        } else if completed > 0 {
            BatchStatus::Partial
        } else {
            BatchStatus::Failed
        }
    }

    /// Fraction of tasks in a terminal state
    pub fn progress(&self) -> f64 {
        if self.entries.is_empty() {
            return 1.0;
        }
        let terminal = self.entries.iter().filter(|e| e.status.is_terminal()).count();
        terminal as f64 / self.entries.len() as f64
    }

    /// Poll every non-terminal task once, concurrently
    pub async fn poll_once(&mut self) {
        let provider = self.provider.clone();
        let persister = self.persister.clone();
        let max_attempts = self.policy.max_attempts;

        let polls = self
            .entries
            .iter_mut()
            .filter(|e| !e.status.is_terminal())
            .map(|entry| poll_entry(provider.as_ref(), persister.as_ref(), entry, max_attempts));
        join_all(polls).await;

        self.rounds += 1;
    }

    /// Keep polling with the policy's delays until every task is terminal
    pub async fn run_to_completion(&mut self, cancel: &CancellationToken) -> BatchStatus {
        self.run_observed(cancel, |_| {}).await
    }

    /// Like [`TaskBatch::run_to_completion`], calling `on_round` after every
    /// polling round
    pub async fn run_observed<F>(&mut self, cancel: &CancellationToken, mut on_round: F) -> BatchStatus
    where
        F: FnMut(&TaskBatch),
    {
        while !self.is_finished() {
            let delay = self.policy.delay_for_attempt(self.rounds);
            tokio::select! {
                _ = cancel.cancelled() => {
                    for entry in self.entries.iter_mut().filter(|e| !e.status.is_terminal()) {
                        entry.fail(TaskStatus::Failed, "Cancelled");
                    }
                    break;
                }
                _ = tokio::time::sleep(delay) => {}
            }
            self.poll_once().await;
            on_round(self);
        }

        let status = self.status();
        info!(status = ?status, rounds = self.rounds, "Task batch finished");
        status
    }
}

async fn poll_entry(
    provider: &dyn TaskProvider,
    persister: &dyn ResultPersister,
    entry: &mut BatchEntry,
    max_attempts: u32,
) {
    let Some(handle) = entry.handle.clone() else {
        entry.fail(TaskStatus::Failed, "Task was never submitted");
        return;
    };

    if entry.attempts >= max_attempts {
        entry.fail(
            TaskStatus::TimedOut,
            format!("Task {} timed out after {} polls", handle.id, entry.attempts),
        );
        return;
    }

    entry.attempts += 1;
    match provider.poll(&handle).await {
        Ok(poll) => {
            entry.progress = poll.progress.or(entry.progress);
            match (poll.status, poll.result_locator) {
                (TaskStatus::Completed, Some(remote)) => {
                    let (result_url, persisted) =
                        persister.persist_or_remote(&handle.id, &remote).await;
                    entry.result_url = Some(result_url);
                    entry.persisted = persisted;
                    entry.remote_url = Some(remote);
                    entry.status = TaskStatus::Completed;
                }
                (TaskStatus::Completed, None) => {
                    entry.fail(TaskStatus::Failed, "Task completed without a result");
                }
                (TaskStatus::Failed, _) | (TaskStatus::TimedOut, _) => {
                    let error = poll.error.unwrap_or_else(|| "Task failed".to_string());
                    entry.fail(TaskStatus::Failed, error);
                }
                (status, _) => entry.status = status,
            }
        }
        Err(e) => {
            warn!(task_id = %handle.id, attempt = entry.attempts, error = %e, "Poll failed");
        }
    }

    if !entry.status.is_terminal() && entry.attempts >= max_attempts {
        entry.fail(
            TaskStatus::TimedOut,
            format!("Task {} timed out after {} polls", handle.id, entry.attempts),
        );
    }
}
