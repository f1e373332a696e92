// Core engine for SceneFlow: workflow graphs, node runtime, external task lifecycle

pub mod error;
pub mod jobs;
pub mod node;
pub mod providers;
pub mod storage;
pub mod task;
pub mod types;
pub mod workflow;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{ProviderError, WorkflowError};
pub use types::*;
