use crate::types::{NodeId, Values};
use serde_json::Value;
use std::collections::HashMap;

/// Everything produced so far during one run.
///
/// Keeps a flat union of initial inputs and node outputs (later writes win)
/// alongside per-node outputs, which conditions can address as `node.key`.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    values: Values,
    node_outputs: HashMap<NodeId, Values>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_values(values: Values) -> Self {
        Self {
            values,
            node_outputs: HashMap::new(),
        }
    }

    /// Look up a flat key, falling back to `node_id.key`
    pub fn get(&self, name: &str) -> Option<&Value> {
        if let Some(value) = self.values.get(name) {
            return Some(value);
        }
        let (node, key) = name.split_once('.')?;
        self.node_outputs
            .get(&NodeId::new(node))
            .and_then(|outputs| outputs.get(key))
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    /// Record a node's outputs, merging them into the flat view
    pub fn record(&mut self, node_id: &NodeId, outputs: &Values) {
        for (k, v) in outputs {
            self.values.insert(k.clone(), v.clone());
        }
        self.node_outputs.insert(node_id.clone(), outputs.clone());
    }

    pub fn outputs_of(&self, node_id: &NodeId) -> Option<&Values> {
        self.node_outputs.get(node_id)
    }

    pub fn values(&self) -> &Values {
        &self.values
    }
}
