use super::condition::evaluate_condition;
use super::context::ExecutionContext;
use super::dag::WorkflowDag;
use crate::error::WorkflowError;
use crate::node::{NodeInstance, NodeServices, ProgressFn, RunEnv};
use crate::types::{EdgeDef, NodeId, NodeStatus, NodeType, Values, WorkflowGraph};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Per-node record of one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeReport {
    pub id: NodeId,
    pub kind: NodeType,
    pub status: NodeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub elapsed_ms: u64,
}

/// Result of a run with per-node detail
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub run_id: Uuid,
    /// Merged outputs of the Output nodes
    pub output: Values,
    pub nodes: Vec<NodeReport>,
    pub elapsed_ms: u64,
}

impl WorkflowRun {
    pub fn failed_nodes(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| n.status == NodeStatus::Failed)
            .count()
    }
}

/// Runs a workflow graph once per call.
///
/// Nodes execute sequentially in topological order. Each node's inputs are
/// resolved from the outputs of its upstream nodes through edge mappings;
/// edge and node conditions are evaluated against everything produced so far.
pub struct WorkflowExecutor {
    services: Arc<NodeServices>,
}

impl WorkflowExecutor {
    pub fn new(services: Arc<NodeServices>) -> Self {
        Self { services }
    }

    /// Execute and return the aggregated Output-node values
    pub async fn execute(
        &self,
        graph: &WorkflowGraph,
        inputs: Values,
        on_progress: Option<ProgressFn>,
    ) -> Result<Values, WorkflowError> {
        let run = self
            .execute_detailed(graph, inputs, on_progress, CancellationToken::new())
            .await?;
        Ok(run.output)
    }

    pub async fn execute_detailed(
        &self,
        graph: &WorkflowGraph,
        inputs: Values,
        on_progress: Option<ProgressFn>,
        cancel: CancellationToken,
    ) -> Result<WorkflowRun, WorkflowError> {
        let run_id = Uuid::new_v4();
        let started = Instant::now();

        let dag = WorkflowDag::from_graph(graph)?;
        let order = dag.execution_order()?;

        let mut instances = order
            .iter()
            .map(|def| NodeInstance::build(def))
            .collect::<Result<Vec<_>, _>>()?;

        for instance in &instances {
            instance.validate_inputs(&inputs)?;
        }

        tracing::info!(
            run_id = %run_id,
            nodes = instances.len(),
            "Starting workflow execution"
        );

        let env = RunEnv {
            services: self.services.clone(),
            progress: on_progress,
            cancel,
        };
        let mut context = ExecutionContext::from_values(inputs.clone());
        let mut reports = Vec::with_capacity(instances.len());

        for instance in instances.iter_mut() {
            let node_started = Instant::now();

            let mut node_inputs = if instance.kind == NodeType::Input {
                inputs.clone()
            } else {
                Values::new()
            };
            for edge in dag.incoming_edges(&instance.id)? {
                if let Some(condition) = edge.condition.as_deref() {
                    if !evaluate_condition(condition, &context) {
                        tracing::debug!(
                            source = %edge.source,
                            target = %edge.target,
                            condition,
                            "Edge condition false, not wiring"
                        );
                        continue;
                    }
                }
                if let Some(upstream) = context.outputs_of(&edge.source) {
                    apply_mapping(edge, upstream, &mut node_inputs);
                }
            }

            if let Some(condition) = instance.condition.clone() {
                let mut scope = context.clone();
                for (k, v) in &node_inputs {
                    scope.set(k.clone(), v.clone());
                }
                if !evaluate_condition(&condition, &scope) {
                    tracing::info!(node_id = %instance.id, condition = %condition, "Skipping node");
                    instance.bind(node_inputs);
                    context.record(&instance.id, &Values::new());
                    reports.push(NodeReport {
                        id: instance.id.clone(),
                        kind: instance.kind,
                        status: NodeStatus::Skipped,
                        error: None,
                        elapsed_ms: 0,
                    });
                    continue;
                }
            }

            tracing::debug!(node_id = %instance.id, kind = %instance.kind, "Executing node");
            instance.bind(node_inputs);
            instance.execute(&env).await;

            let status = instance.status();
            let error = instance.error().map(str::to_string);
            if status == NodeStatus::Failed {
                tracing::warn!(
                    node_id = %instance.id,
                    error = error.as_deref().unwrap_or("unknown"),
                    "Node failed"
                );
            }

            context.record(&instance.id, &instance.outputs);
            reports.push(NodeReport {
                id: instance.id.clone(),
                kind: instance.kind,
                status,
                error,
                elapsed_ms: node_started.elapsed().as_millis() as u64,
            });
        }

        let mut output = Values::new();
        let mut output_nodes = 0;
        for instance in instances.iter().filter(|i| i.kind == NodeType::Output) {
            output_nodes += 1;
            for (k, v) in &instance.outputs {
                output.insert(k.clone(), v.clone());
            }
        }
        if output_nodes == 0 {
            tracing::warn!(run_id = %run_id, "Workflow has no output node, result is empty");
        }

        let run = WorkflowRun {
            run_id,
            output,
            elapsed_ms: started.elapsed().as_millis() as u64,
            nodes: reports,
        };

        tracing::info!(
            run_id = %run_id,
            elapsed_ms = run.elapsed_ms,
            failed_nodes = run.failed_nodes(),
            "Workflow execution completed"
        );

        Ok(run)
    }
}

/// Copy upstream outputs into a node's inputs. Without a mapping the
/// upstream `output` becomes `value`.
fn apply_mapping(edge: &EdgeDef, upstream: &Values, inputs: &mut Values) {
    match &edge.mapping {
        Some(mapping) => {
            for (from, to) in mapping {
                if let Some(value) = upstream.get(from) {
                    inputs.insert(to.clone(), value.clone());
                }
            }
        }
        None => {
            if let Some(value) = upstream.get("output") {
                inputs.insert("value".into(), value.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{PassthroughPersister, PollPolicy, TaskRunner};
    use crate::testing::{Script, ScriptedTaskProvider, StaticTextGenerator};
    use crate::types::{EdgeDef, NodeDef};
    use serde_json::{json, Value};
    use std::sync::Mutex;
    use std::time::Duration;

    fn executor_with(provider: ScriptedTaskProvider, text: StaticTextGenerator) -> WorkflowExecutor {
        WorkflowExecutor::new(Arc::new(NodeServices {
            text: Arc::new(text),
            images: Arc::new(TaskRunner::new(
                Arc::new(provider),
                Arc::new(PassthroughPersister),
                PollPolicy::fixed(Duration::from_secs(2), 5),
            )),
        }))
    }

    fn executor() -> WorkflowExecutor {
        executor_with(
            ScriptedTaskProvider::new(Script::CompleteAfter(2)),
            StaticTextGenerator::replying("ok"),
        )
    }

    fn values(v: Value) -> Values {
        v.as_object().cloned().unwrap()
    }

    fn storyboard(sentences_per_scene: usize, max_scenes: usize) -> WorkflowGraph {
        WorkflowGraph::new(
            vec![
                NodeDef::new("input", NodeType::Input),
                NodeDef::new("split", NodeType::TextSplitter).with_config(json!({
                    "sentences_per_scene": sentences_per_scene,
                    "max_scenes": max_scenes
                })),
                NodeDef::new("each", NodeType::Loop).with_children(vec![
                    NodeDef::new("build", NodeType::PromptBuilder),
                    NodeDef::new("render", NodeType::ImageGenerator),
                ]),
                NodeDef::new("out", NodeType::Output),
            ],
            vec![
                EdgeDef::new("input", "split"),
                EdgeDef::new("split", "each").with_mapping([("scenes", "items")]),
                EdgeDef::new("each", "out").with_mapping([("results", "results")]),
            ],
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_storyboard_end_to_end() {
        let text = "The fog rolled in. A ship appeared. Its sails were torn. \
                    The captain waved. Nobody answered. The bell rang once. \
                    Then silence. Morning came.";
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = seen.clone();
        let progress: ProgressFn = Arc::new(move |p: f64| recorder.lock().unwrap().push(p));

        let output = executor()
            .execute(&storyboard(2, 3), values(json!({"text": text})), Some(progress))
            .await
            .unwrap();

        let results = output["results"].as_array().unwrap();
        assert!(results.len() <= 3);
        assert_eq!(results.len(), 3);
        for result in results {
            assert!(result.get("imageUrl").is_some() || result.get("error").is_some());
        }
        assert_eq!(output.len(), 1);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.last().copied(), Some(1.0));
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test]
    async fn test_cycle_is_structural_error() {
        let graph = WorkflowGraph::new(
            vec![
                NodeDef::new("a", NodeType::Output),
                NodeDef::new("b", NodeType::Output),
            ],
            vec![EdgeDef::new("a", "b"), EdgeDef::new("b", "a")],
        );

        let err = executor()
            .execute(&graph, Values::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Structural(_)));
    }

    #[tokio::test]
    async fn test_missing_required_input_is_validation_error() {
        let graph = WorkflowGraph::new(
            vec![NodeDef::new("input", NodeType::Input).with_config(json!({"required": ["text"]}))],
            vec![],
        );
        let err = executor()
            .execute(&graph, Values::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Validation(_)));
    }

    #[tokio::test]
    async fn test_default_mapping_and_edge_condition() {
        let graph = WorkflowGraph::new(
            vec![
                NodeDef::new("input", NodeType::Input),
                NodeDef::new("style", NodeType::StyleDetector),
                NodeDef::new("out", NodeType::Output),
            ],
            vec![
                EdgeDef::new("input", "style"),
                EdgeDef::new("style", "out").with_mapping([("style", "style")]),
                EdgeDef::new("input", "out")
                    .with_mapping([("text", "original")])
                    .with_condition("includeText"),
            ],
        );

        let output = executor()
            .execute(&graph, values(json!({"text": "A dragon woke."})), None)
            .await
            .unwrap();
        assert_eq!(output["style"], json!("fantasy"));
        assert!(output.get("original").is_none());

        let output = executor()
            .execute(
                &graph,
                values(json!({"text": "A dragon woke.", "includeText": "yes"})),
                None,
            )
            .await
            .unwrap();
        assert_eq!(output["original"], json!("A dragon woke."));
    }

    #[tokio::test]
    async fn test_node_condition_skips_and_downstream_sees_nothing() {
        let graph = WorkflowGraph::new(
            vec![
                NodeDef::new("input", NodeType::Input),
                NodeDef::new("summary", NodeType::Prompt)
                    .with_config(json!({"template": "Summarise {text}"}))
                    .with_condition("plan==pro"),
                NodeDef::new("out", NodeType::Output),
            ],
            vec![
                EdgeDef::new("input", "summary"),
                EdgeDef::new("summary", "out").with_mapping([("response", "summary")]),
            ],
        );

        let run = executor()
            .execute_detailed(
                &graph,
                values(json!({"text": "x", "plan": "free"})),
                None,
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(run.nodes[1].status, NodeStatus::Skipped);
        assert!(run.output.get("summary").is_none());
    }

    #[tokio::test]
    async fn test_failed_node_is_data_not_error() {
        let graph = WorkflowGraph::new(
            vec![
                NodeDef::new("input", NodeType::Input),
                NodeDef::new("ask", NodeType::Prompt)
                    .with_config(json!({"template": "{text}", "response_format": "json"})),
                NodeDef::new("out", NodeType::Output),
            ],
            vec![
                EdgeDef::new("input", "ask"),
                EdgeDef::new("ask", "out").with_mapping([("success", "ok"), ("error", "why")]),
            ],
        );
        let executor = executor_with(
            ScriptedTaskProvider::new(Script::CompleteAfter(1)),
            StaticTextGenerator::replying("not json"),
        );

        let run = executor
            .execute_detailed(
                &graph,
                values(json!({"text": "hi"})),
                None,
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(run.failed_nodes(), 1);
        assert_eq!(run.output["ok"], json!(false));
        assert!(run.output["why"].as_str().unwrap().contains("parse"));
    }

    #[tokio::test]
    async fn test_no_output_node_yields_empty_result() {
        let graph = WorkflowGraph::new(vec![NodeDef::new("input", NodeType::Input)], vec![]);
        let output = executor()
            .execute(&graph, values(json!({"text": "x"})), None)
            .await
            .unwrap();
        assert!(output.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_are_independent() {
        let graph = storyboard(1, 10);
        let executor = executor();
        let (a, b) = tokio::join!(
            executor.execute(&graph, values(json!({"text": "One."})), None),
            executor.execute(&graph, values(json!({"text": "One. Two."})), None),
        );
        assert_eq!(a.unwrap()["results"].as_array().unwrap().len(), 1);
        assert_eq!(b.unwrap()["results"].as_array().unwrap().len(), 2);
    }
}
