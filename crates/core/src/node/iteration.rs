use super::{is_failure, succeed, NodeInstance, RunEnv};
use crate::types::Values;
use crate::workflow::condition::evaluate_condition;
use crate::workflow::context::ExecutionContext;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

/// Loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    /// Input holding the items; falls back to `value`
    pub items_key: String,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            items_key: "items".to_string(),
        }
    }
}

/// Runs its child nodes once per item.
///
/// Children are built once and rebound each iteration. Within an iteration
/// they run in definition order and each sees the loop's inputs, the current
/// `item`/`index`/`total`, and the outputs of the children before it. A failing
/// child marks only its own item as failed.
pub struct LoopNode {
    items_key: String,
    children: Vec<NodeInstance>,
}

impl LoopNode {
    pub fn new(config: LoopConfig, children: Vec<NodeInstance>) -> Self {
        Self {
            items_key: config.items_key,
            children,
        }
    }

    fn items(&self, inputs: &Values) -> Vec<Value> {
        match inputs.get(&self.items_key).or_else(|| inputs.get("value")) {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items.clone(),
            Some(single) => vec![single.clone()],
        }
    }

    pub async fn execute(&mut self, inputs: &Values, env: &RunEnv) -> Values {
        let items = self.items(inputs);
        let total = items.len();
        let mut results = Vec::with_capacity(total);
        let mut failed = 0usize;

        info!(items = total, children = self.children.len(), "Starting loop");

        for (index, item) in items.into_iter().enumerate() {
            let mut scope = inputs.clone();
            scope.insert("item".into(), item);
            scope.insert("index".into(), json!(index));
            scope.insert("total".into(), json!(total));

            let result = if env.cancel.is_cancelled() {
                let mut result = Values::new();
                result.insert("success".into(), Value::Bool(false));
                result.insert("error".into(), Value::String("Cancelled".into()));
                result
            } else {
                self.run_iteration(&scope, env).await
            };

            if is_failure(&result) {
                failed += 1;
            }
            let mut result = result;
            result.insert("index".into(), json!(index));
            results.push(Value::Object(result));

            env.report_progress((index + 1) as f64 / total as f64);
        }

        if failed > 0 {
            warn!(failed, total, "Loop finished with failed items");
        } else {
            debug!(total, "Loop finished");
        }

        let mut outputs = Values::new();
        outputs.insert("count".into(), json!(total));
        outputs.insert("succeeded".into(), json!(total - failed));
        outputs.insert("failed".into(), json!(failed));
        let results = Value::Array(results);
        outputs.insert("results".into(), results.clone());
        outputs.insert("output".into(), results);
        succeed(outputs)
    }

    async fn run_iteration(&mut self, scope: &Values, env: &RunEnv) -> Values {
        let mut merged = Values::new();
        let mut errors = Vec::new();

        for child in self.children.iter_mut() {
            let mut child_inputs = scope.clone();
            for (k, v) in &merged {
                child_inputs.insert(k.clone(), v.clone());
            }

            if let Some(condition) = child.condition.as_deref() {
                let context = ExecutionContext::from_values(child_inputs.clone());
                if !evaluate_condition(condition, &context) {
                    debug!(node_id = %child.id, condition, "Skipping loop child");
                    child.bind(child_inputs);
                    continue;
                }
            }

            child.bind(child_inputs);
            child.execute(env).await;

            if is_failure(&child.outputs) {
                errors.push(format!(
                    "{}: {}",
                    child.id,
                    child.error().unwrap_or("failed")
                ));
            }
            for (k, v) in &child.outputs {
                merged.insert(k.clone(), v.clone());
            }
        }

        if errors.is_empty() {
            succeed(merged)
        } else {
            merged.insert("success".into(), Value::Bool(false));
            merged.insert("error".into(), Value::String(errors.join("; ")));
            merged
        }
    }
}
