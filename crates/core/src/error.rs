//! Error types for workflow execution and provider calls.

use crate::types::NodeId;

/// Fatal errors raised before any node runs.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    /// The graph itself is malformed (missing node, dangling edge, cycle).
    #[error("Structural error: {0}")]
    Structural(String),

    /// Node configuration or caller input is invalid.
    #[error("Validation error: {0}")]
    Validation(String),
}

impl WorkflowError {
    pub fn cycle(node: &NodeId) -> Self {
        Self::Structural(format!("Workflow contains a cycle through node {}", node))
    }

    pub fn missing_node(node: &NodeId, referenced_by: &str) -> Self {
        Self::Structural(format!(
            "Node {} referenced by {} is not defined",
            node, referenced_by
        ))
    }

    pub fn is_structural(&self) -> bool {
        matches!(self, Self::Structural(_))
    }
}

/// Errors from external generation providers.
///
/// These are recovered at node granularity: a node that hits one reports
/// `success=false` with the message instead of propagating it.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// HTTP transport failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Provider answered with an error payload.
    #[error("Provider error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// Task could not be submitted.
    #[error("Submission failed: {0}")]
    Submission(String),

    /// Response did not have the expected shape.
    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),

    /// Poll budget exhausted before a terminal state.
    #[error("Task {task_id} timed out after {attempts} polls")]
    Timeout { task_id: String, attempts: u32 },

    /// Overall wall-clock bound on a task ran out.
    #[error("Task {task_id} exceeded deadline of {deadline:?}")]
    DeadlineExceeded {
        task_id: String,
        deadline: std::time::Duration,
        attempts: u32,
    },

    /// Downloading or storing a result failed.
    #[error("Failed to persist result: {0}")]
    Persist(String),

    /// Caller cancelled the operation.
    #[error("Cancelled")]
    Cancelled,
}

impl ProviderError {
    /// Build an API error from a status code and response body, extracting the
    /// provider's message when the body has one.
    pub fn from_response(status: u16, body: &str) -> Self {
        let message = serde_json::from_str::<serde_json::Value>(body)
            .ok()
            .and_then(|v| extract_message(&v))
            .unwrap_or_else(|| body.trim().to_string());

        Self::Api { status, message }
    }
}

fn extract_message(body: &serde_json::Value) -> Option<String> {
    // {"error": {"message": ..}}, {"error": ".."}, {"detail": ".."}, {"message": ".."}
    let error = body.get("error");
    error
        .and_then(|e| e.get("message"))
        .or(error)
        .or_else(|| body.get("detail"))
        .or_else(|| body.get("message"))
        .and_then(|v| v.as_str())
        .map(str::to_string)
}
