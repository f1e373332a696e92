pub mod condition;
pub mod context;
pub mod dag;
pub mod engine;
pub mod executor;
pub mod presets;

pub use condition::evaluate_condition;
pub use context::ExecutionContext;
pub use dag::WorkflowDag;
pub use engine::WorkflowEngine;
pub use executor::{NodeReport, WorkflowExecutor, WorkflowRun};
