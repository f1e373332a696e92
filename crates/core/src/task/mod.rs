//! Lifecycle of long-running external generation tasks.
//!
//! A task is submitted to a provider, polled until it reaches a terminal
//! state, and its result persisted locally. Exhausting the poll budget yields
//! `TimedOut`, which callers treat the same as `Failed`.

pub mod batch;
pub mod persist;
pub mod policy;
pub mod runner;

pub use batch::{BatchEntry, BatchStatus, TaskBatch};
pub use persist::{BlobResultPersister, PassthroughPersister, ResultPersister};
pub use policy::PollPolicy;
pub use runner::{TaskOutcome, TaskRunner};

use crate::error::ProviderError;
use crate::types::{Sizing, Values};
use serde::{Deserialize, Serialize};

/// Status of an external task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    TimedOut,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::TimedOut
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::TimedOut => "timed_out",
        }
    }
}

/// Opaque reference to a submitted task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskHandle {
    pub id: String,
    /// Where to poll for status (usually a provider URL)
    pub poll_target: String,
}

/// One observation of a task's state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskPoll {
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    /// Where the finished result lives (typically a remote URL)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_locator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskPoll {
    pub fn processing(progress: Option<f64>) -> Self {
        Self {
            status: TaskStatus::Processing,
            progress,
            result_locator: None,
            error: None,
        }
    }

    pub fn completed(locator: impl Into<String>) -> Self {
        Self {
            status: TaskStatus::Completed,
            progress: Some(1.0),
            result_locator: Some(locator.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: TaskStatus::Failed,
            progress: None,
            result_locator: None,
            error: Some(error.into()),
        }
    }
}

/// Submit/poll adapter for a generation provider.
///
/// `poll` must be safe to call repeatedly and must not change provider state.
#[async_trait::async_trait]
pub trait TaskProvider: Send + Sync {
    /// Short provider name for logs
    fn name(&self) -> &str;

    /// Submit a generation task
    async fn submit(
        &self,
        prompt: &str,
        sizing: Sizing,
        extras: &Values,
    ) -> Result<TaskHandle, ProviderError>;

    /// Observe the current state of a task
    async fn poll(&self, handle: &TaskHandle) -> Result<TaskPoll, ProviderError>;
}
