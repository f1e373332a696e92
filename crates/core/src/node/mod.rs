//! Node runtime: one implementation per node kind behind a closed enum.
//!
//! Every node reads `inputs` and writes `outputs`. Expected failures
//! (provider errors, unparseable responses) never escape `execute`; the node
//! writes `success=false` and `error` instead, so siblings and downstream
//! nodes keep running.

pub mod image;
pub mod io;
pub mod iteration;
pub mod prompt;
pub mod prompt_builder;
pub mod splitter;
pub mod style;

pub use image::{ImageGeneratorConfig, ImageGeneratorNode};
pub use io::{InputConfig, InputNode, OutputConfig, OutputNode};
pub use iteration::{LoopConfig, LoopNode};
pub use prompt::{PromptConfig, PromptNode, ResponseFormat};
pub use prompt_builder::{PromptBuilderConfig, PromptBuilderNode};
pub use splitter::{SceneSplitter, TextSplitterConfig, TextSplitterNode};
pub use style::{StyleDetectorConfig, StyleDetectorNode, StyleRule};

use crate::error::WorkflowError;
use crate::providers::TextGenerator;
use crate::task::TaskRunner;
use crate::types::{NodeDef, NodeId, NodeStatus, NodeType, Values};
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Progress callback, invoked with a fraction in `0.0..=1.0`
pub type ProgressFn = Arc<dyn Fn(f64) + Send + Sync>;

/// External collaborators nodes call into
pub struct NodeServices {
    pub text: Arc<dyn TextGenerator>,
    pub images: Arc<TaskRunner>,
}

/// Per-run environment threaded through node execution
#[derive(Clone)]
pub struct RunEnv {
    pub services: Arc<NodeServices>,
    pub progress: Option<ProgressFn>,
    pub cancel: CancellationToken,
}

impl RunEnv {
    pub fn new(services: Arc<NodeServices>) -> Self {
        Self {
            services,
            progress: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn report_progress(&self, fraction: f64) {
        if let Some(progress) = &self.progress {
            progress(fraction.clamp(0.0, 1.0));
        }
    }
}

enum Node {
    Input(InputNode),
    TextSplitter(TextSplitterNode),
    StyleDetector(StyleDetectorNode),
    PromptBuilder(PromptBuilderNode),
    Prompt(PromptNode),
    ImageGenerator(ImageGeneratorNode),
    Loop(LoopNode),
    Output(OutputNode),
}

impl Node {
    async fn execute(&mut self, inputs: &Values, env: &RunEnv) -> Values {
        match self {
            Node::Input(node) => node.execute(inputs),
            Node::TextSplitter(node) => node.execute(inputs),
            Node::StyleDetector(node) => node.execute(inputs),
            Node::PromptBuilder(node) => node.execute(inputs),
            Node::Prompt(node) => node.execute(inputs, env).await,
            Node::ImageGenerator(node) => node.execute(inputs, env).await,
            Node::Loop(node) => node.execute(inputs, env).await,
            Node::Output(node) => node.execute(inputs),
        }
    }
}

/// Runtime object for one node, private to a single run
pub struct NodeInstance {
    pub id: NodeId,
    pub kind: NodeType,
    pub condition: Option<String>,
    pub inputs: Values,
    pub outputs: Values,
    node: Node,
}

impl NodeInstance {
    /// Build an instance, parsing its typed configuration
    pub fn build(def: &NodeDef) -> Result<Self, WorkflowError> {
        let node = match def.kind {
            NodeType::Input => Node::Input(InputNode::new(parse_config(def)?)),
            NodeType::TextSplitter => {
                Node::TextSplitter(TextSplitterNode::new(parse_config(def)?).map_err(|e| invalid(def, e))?)
            }
            NodeType::StyleDetector => {
                Node::StyleDetector(StyleDetectorNode::new(parse_config(def)?).map_err(|e| invalid(def, e))?)
            }
            NodeType::PromptBuilder => Node::PromptBuilder(PromptBuilderNode::new(parse_config(def)?)),
            NodeType::Prompt => {
                Node::Prompt(PromptNode::new(parse_config(def)?).map_err(|e| invalid(def, e))?)
            }
            NodeType::ImageGenerator => {
                Node::ImageGenerator(ImageGeneratorNode::new(parse_config(def)?))
            }
            NodeType::Loop => {
                let children = def
                    .children
                    .iter()
                    .map(NodeInstance::build)
                    .collect::<Result<Vec<_>, _>>()?;
                Node::Loop(LoopNode::new(parse_config(def)?, children))
            }
            NodeType::Output => Node::Output(OutputNode::new(parse_config(def)?)),
        };

        Ok(Self {
            id: def.id.clone(),
            kind: def.kind,
            condition: def.condition.clone(),
            inputs: Values::new(),
            outputs: Values::new(),
            node,
        })
    }

    /// Replace inputs and clear outputs ahead of (re-)execution
    pub fn bind(&mut self, inputs: Values) {
        self.inputs = inputs;
        self.outputs.clear();
    }

    /// Check caller-supplied inputs against this node's requirements
    pub fn validate_inputs(&self, inputs: &Values) -> Result<(), WorkflowError> {
        match &self.node {
            Node::Input(node) => node.validate(inputs),
            _ => Ok(()),
        }
    }

    /// Run the node against its bound inputs
    pub fn execute<'a>(&'a mut self, env: &'a RunEnv) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            self.outputs = self.node.execute(&self.inputs, env).await;
        })
    }

    /// Status implied by the outputs of the last execution
    pub fn status(&self) -> NodeStatus {
        if is_failure(&self.outputs) {
            NodeStatus::Failed
        } else {
            NodeStatus::Completed
        }
    }

    pub fn error(&self) -> Option<&str> {
        self.outputs.get("error").and_then(Value::as_str)
    }
}

fn parse_config<T>(def: &NodeDef) -> Result<T, WorkflowError>
where
    T: DeserializeOwned + Default,
{
    if def.config.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(def.config.clone()).map_err(|e| invalid(def, e))
}

fn invalid(def: &NodeDef, err: impl std::fmt::Display) -> WorkflowError {
    WorkflowError::Validation(format!(
        "Invalid config for node {} ({}): {}",
        def.id, def.kind, err
    ))
}

/// Mark outputs as successful
pub(crate) fn succeed(mut outputs: Values) -> Values {
    outputs.insert("success".into(), Value::Bool(true));
    outputs
}

/// Outputs for an expected failure
pub(crate) fn fail(error: impl Into<String>) -> Values {
    let mut outputs = Values::new();
    outputs.insert("success".into(), Value::Bool(false));
    outputs.insert("error".into(), Value::String(error.into()));
    outputs
}

pub(crate) fn is_failure(outputs: &Values) -> bool {
    outputs.get("success") == Some(&Value::Bool(false))
}

/// First string found under any of `keys`
pub(crate) fn read_str<'a>(inputs: &'a Values, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter(|k| !k.is_empty())
        .find_map(|k| inputs.get(*k).and_then(Value::as_str))
}

/// Integer from a JSON number or numeric string
pub(crate) fn read_u64(inputs: &Values, key: &str) -> Option<u64> {
    match inputs.get(key)? {
        Value::Number(n) => n.as_u64().or_else(|| n.as_f64().map(|f| f.max(0.0) as u64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_build_with_default_config() {
        let def = NodeDef::new("split", NodeType::TextSplitter);
        let instance = NodeInstance::build(&def).unwrap();
        assert_eq!(instance.kind, NodeType::TextSplitter);
        assert!(instance.inputs.is_empty());
    }

    #[test]
    fn test_bad_config_is_validation_error() {
        let def = NodeDef::new("split", NodeType::TextSplitter)
            .with_config(json!({"sentences_per_scene": "lots"}));
        let err = NodeInstance::build(&def).err().unwrap();
        assert!(matches!(err, WorkflowError::Validation(_)));
        assert!(err.to_string().contains("split"));
    }

    #[test]
    fn test_bad_regex_is_validation_error() {
        let def = NodeDef::new("style", NodeType::StyleDetector)
            .with_config(json!({"rules": [{"style": "x", "pattern": "(unclosed"}]}));
        assert!(matches!(
            NodeInstance::build(&def).err().unwrap(),
            WorkflowError::Validation(_)
        ));
    }

    #[test]
    fn test_loop_children_are_built() {
        let def = NodeDef::new("each", NodeType::Loop).with_children(vec![NodeDef::new(
            "bad",
            NodeType::PromptBuilder,
        )
        .with_config(json!({"max_concept_words": -1}))]);
        assert!(NodeInstance::build(&def).is_err());
    }

    #[test]
    fn test_read_helpers() {
        let inputs: Values = json!({"a": "x", "n": 3, "s": " 7 "})
            .as_object()
            .cloned()
            .unwrap();
        assert_eq!(read_str(&inputs, &["missing", "a"]), Some("x"));
        assert_eq!(read_str(&inputs, &["n"]), None);
        assert_eq!(read_u64(&inputs, "n"), Some(3));
        assert_eq!(read_u64(&inputs, "s"), Some(7));
        assert_eq!(read_u64(&inputs, "a"), None);
    }
}
