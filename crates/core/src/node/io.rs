use super::succeed;
use crate::error::WorkflowError;
use crate::types::Values;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Input node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// Seeded key exposed as `output`
    pub field: String,
    /// Keys the caller must supply (non-empty)
    pub required: Vec<String>,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            field: "text".to_string(),
            required: Vec::new(),
        }
    }
}

/// Passes pre-seeded caller inputs through
pub struct InputNode {
    config: InputConfig,
}

impl InputNode {
    pub fn new(config: InputConfig) -> Self {
        Self { config }
    }

    pub fn validate(&self, inputs: &Values) -> Result<(), WorkflowError> {
        let missing: Vec<&str> = self
            .config
            .required
            .iter()
            .filter(|key| match inputs.get(key.as_str()) {
                None | Some(Value::Null) => true,
                Some(Value::String(s)) => s.trim().is_empty(),
                Some(_) => false,
            })
            .map(String::as_str)
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(WorkflowError::Validation(format!(
                "Missing required input: {}",
                missing.join(", ")
            )))
        }
    }

    pub fn execute(&self, inputs: &Values) -> Values {
        let mut outputs = inputs.clone();
        if let Some(value) = inputs.get(&self.config.field) {
            outputs.insert("output".into(), value.clone());
        }
        succeed(outputs)
    }
}

/// Output node configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Only aggregate these keys (all inputs when unset)
    pub fields: Option<Vec<String>>,
}

/// Aggregates its inputs into the run's final result
pub struct OutputNode {
    config: OutputConfig,
}

impl OutputNode {
    pub fn new(config: OutputConfig) -> Self {
        Self { config }
    }

    pub fn execute(&self, inputs: &Values) -> Values {
        match &self.config.fields {
            Some(fields) => fields
                .iter()
                .filter_map(|f| inputs.get(f).map(|v| (f.clone(), v.clone())))
                .collect(),
            None => inputs.clone(),
        }
    }
}
