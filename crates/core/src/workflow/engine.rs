use super::dag;
use super::executor::{WorkflowExecutor, WorkflowRun};
use super::presets;
use crate::error::WorkflowError;
use crate::node::{NodeInstance, NodeServices, ProgressFn};
use crate::types::{Values, WorkflowGraph};
use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// Holds the active workflow definition and runs it.
///
/// The definition is replaced atomically; runs already in flight keep the
/// definition they started with.
pub struct WorkflowEngine {
    definition: RwLock<Arc<WorkflowGraph>>,
    executor: WorkflowExecutor,
}

impl WorkflowEngine {
    pub fn new(graph: WorkflowGraph, services: Arc<NodeServices>) -> Result<Self, WorkflowError> {
        check(&graph)?;
        Ok(Self {
            definition: RwLock::new(Arc::new(graph)),
            executor: WorkflowExecutor::new(services),
        })
    }

    /// Load the definition document at `path`, falling back to the built-in
    /// storyboard graph when the file does not exist
    pub async fn load(path: &Path, services: Arc<NodeServices>) -> Result<Self> {
        let graph = if tokio::fs::try_exists(path).await.unwrap_or(false) {
            let doc = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read workflow {}", path.display()))?;
            let graph: WorkflowGraph = serde_json::from_str(&doc)
                .with_context(|| format!("Failed to parse workflow {}", path.display()))?;
            tracing::info!(path = %path.display(), nodes = graph.nodes.len(), "Loaded workflow definition");
            graph
        } else {
            tracing::info!(path = %path.display(), "No workflow definition found, using built-in storyboard");
            presets::storyboard()
        };

        Ok(Self::new(graph, services)?)
    }

    pub async fn definition(&self) -> Arc<WorkflowGraph> {
        self.definition.read().await.clone()
    }

    /// Validate and swap in a new definition
    pub async fn replace(&self, graph: WorkflowGraph) -> Result<(), WorkflowError> {
        check(&graph)?;
        let nodes = graph.nodes.len();
        *self.definition.write().await = Arc::new(graph);
        tracing::warn!(nodes, "Workflow definition replaced");
        Ok(())
    }

    /// Write the current definition to `path`
    pub async fn save(&self, path: &Path) -> Result<()> {
        let graph = self.definition().await;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let doc = serde_json::to_string_pretty(graph.as_ref())?;
        tokio::fs::write(path, doc)
            .await
            .with_context(|| format!("Failed to write workflow {}", path.display()))?;
        Ok(())
    }

    pub async fn execute(
        &self,
        inputs: Values,
        on_progress: Option<ProgressFn>,
    ) -> Result<Values, WorkflowError> {
        let graph = self.definition().await;
        self.executor.execute(&graph, inputs, on_progress).await
    }

    pub async fn execute_detailed(
        &self,
        inputs: Values,
        on_progress: Option<ProgressFn>,
        cancel: CancellationToken,
    ) -> Result<WorkflowRun, WorkflowError> {
        let graph = self.definition().await;
        self.executor
            .execute_detailed(&graph, inputs, on_progress, cancel)
            .await
    }
}

/// Structure and node configuration checks
fn check(graph: &WorkflowGraph) -> Result<(), WorkflowError> {
    dag::validate(graph)?;
    for node in &graph.nodes {
        NodeInstance::build(node)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{PassthroughPersister, PollPolicy, TaskRunner};
    use crate::testing::{Script, ScriptedTaskProvider, StaticTextGenerator};
    use crate::types::{EdgeDef, NodeDef, NodeType};
    use serde_json::json;
    use tempfile::TempDir;

    fn services() -> Arc<NodeServices> {
        Arc::new(NodeServices {
            text: Arc::new(StaticTextGenerator::replying("ok")),
            images: Arc::new(TaskRunner::new(
                Arc::new(ScriptedTaskProvider::new(Script::CompleteAfter(1))),
                Arc::new(PassthroughPersister),
                PollPolicy::default(),
            )),
        })
    }

    fn echo_graph() -> WorkflowGraph {
        WorkflowGraph::new(
            vec![
                NodeDef::new("input", NodeType::Input),
                NodeDef::new("out", NodeType::Output),
            ],
            vec![EdgeDef::new("input", "out").with_mapping([("text", "echo")])],
        )
    }

    #[tokio::test]
    async fn test_load_falls_back_to_storyboard() {
        let dir = TempDir::new().unwrap();
        let engine = WorkflowEngine::load(&dir.path().join("missing.json"), services())
            .await
            .unwrap();
        assert!(engine.definition().await.node(&"scenes".into()).is_some());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("workflows").join("active.json");

        let engine = WorkflowEngine::new(echo_graph(), services()).unwrap();
        engine.save(&path).await.unwrap();

        let reloaded = WorkflowEngine::load(&path, services()).await.unwrap();
        let output = reloaded
            .execute(json!({"text": "hello"}).as_object().cloned().unwrap(), None)
            .await
            .unwrap();
        assert_eq!(output["echo"], json!("hello"));
    }

    #[tokio::test]
    async fn test_replace_rejects_invalid_definition() {
        let engine = WorkflowEngine::new(echo_graph(), services()).unwrap();

        let mut cyclic = echo_graph();
        cyclic.edges.push(EdgeDef::new("out", "input"));
        assert!(matches!(
            engine.replace(cyclic).await.unwrap_err(),
            WorkflowError::Structural(_)
        ));

        let mut bad_config = echo_graph();
        bad_config.nodes[1].config = json!({"fields": "not-a-list"});
        assert!(matches!(
            engine.replace(bad_config).await.unwrap_err(),
            WorkflowError::Validation(_)
        ));

        assert_eq!(engine.definition().await.nodes.len(), 2);
    }

    #[tokio::test]
    async fn test_replace_does_not_affect_held_definition() {
        let engine = WorkflowEngine::new(echo_graph(), services()).unwrap();
        let before = engine.definition().await;

        engine.replace(crate::workflow::presets::storyboard()).await.unwrap();

        assert_eq!(before.nodes.len(), 2);
        assert_eq!(engine.definition().await.nodes.len(), 5);
    }
}
