use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Key/value bag flowing between nodes
pub type Values = serde_json::Map<String, serde_json::Value>;

/// Unique identifier for a node within a workflow graph
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a job record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// Kind of a workflow node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Input,
    TextSplitter,
    StyleDetector,
    PromptBuilder,
    Prompt,
    ImageGenerator,
    Loop,
    Output,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Input => "input",
            NodeType::TextSplitter => "text_splitter",
            NodeType::StyleDetector => "style_detector",
            NodeType::PromptBuilder => "prompt_builder",
            NodeType::Prompt => "prompt",
            NodeType::ImageGenerator => "image_generator",
            NodeType::Loop => "loop",
            NodeType::Output => "output",
        }
    }
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Definition of a single node in a workflow graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDef {
    pub id: NodeId,
    #[serde(rename = "type")]
    pub kind: NodeType,
    /// Kind-specific configuration, parsed into a typed struct at build time
    #[serde(default)]
    pub config: serde_json::Value,
    /// Gate evaluated against the execution context before the node runs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    /// Per-iteration body (loop nodes only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<NodeDef>,
}

impl NodeDef {
    pub fn new(id: impl Into<String>, kind: NodeType) -> Self {
        Self {
            id: NodeId::new(id),
            kind,
            config: serde_json::Value::Null,
            condition: None,
            children: Vec::new(),
        }
    }

    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = config;
        self
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    pub fn with_children(mut self, children: Vec<NodeDef>) -> Self {
        self.children = children;
        self
    }
}

/// Directed dependency between two nodes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeDef {
    pub source: NodeId,
    pub target: NodeId,
    /// Upstream output key -> downstream input key. Absent means `output -> value`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mapping: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

impl EdgeDef {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: NodeId::new(source),
            target: NodeId::new(target),
            mapping: None,
            condition: None,
        }
    }

    pub fn with_mapping<K, V>(mut self, pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.mapping = Some(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );
        self
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }
}

/// A workflow definition: nodes plus the edges wiring them together
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowGraph {
    pub nodes: Vec<NodeDef>,
    #[serde(default)]
    pub edges: Vec<EdgeDef>,
}

impl WorkflowGraph {
    pub fn new(nodes: Vec<NodeDef>, edges: Vec<EdgeDef>) -> Self {
        Self { nodes, edges }
    }

    pub fn node(&self, id: &NodeId) -> Option<&NodeDef> {
        self.nodes.iter().find(|n| &n.id == id)
    }
}

/// Outcome of a single node within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Completed,
    Failed,
    Skipped,
}

/// Target resolution for a generated image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sizing {
    pub width: u32,
    pub height: u32,
}

impl Sizing {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}
