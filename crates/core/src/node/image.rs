use super::{fail, read_str, succeed, RunEnv};
use crate::task::TaskStatus;
use crate::types::{Sizing, Values};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;

pub const DEFAULT_SIZING: Sizing = Sizing {
    width: 1344,
    height: 768,
};

/// Pixel dimensions for the supported aspect ratios
pub fn sizing_for_aspect_ratio(ratio: &str) -> Option<Sizing> {
    let (width, height) = match ratio.trim() {
        "1:1" => (1024, 1024),
        "16:9" => (1344, 768),
        "9:16" => (768, 1344),
        "4:3" => (1152, 896),
        "3:4" => (896, 1152),
        "3:2" => (1216, 832),
        "2:3" => (832, 1216),
        "21:9" => (1536, 640),
        _ => return None,
    };
    Some(Sizing::new(width, height))
}

/// ImageGenerator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageGeneratorConfig {
    pub prompt_key: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub aspect_ratio: Option<String>,
    /// Provider-specific parameters passed through on submission
    pub extras: Values,
}

impl Default for ImageGeneratorConfig {
    fn default() -> Self {
        Self {
            prompt_key: "prompt".to_string(),
            width: None,
            height: None,
            aspect_ratio: None,
            extras: Values::new(),
        }
    }
}

impl ImageGeneratorConfig {
    /// Explicit dimensions win over the aspect ratio, which wins over the default
    pub fn sizing(&self) -> Sizing {
        if let (Some(width), Some(height)) = (self.width, self.height) {
            if width > 0 && height > 0 {
                return Sizing::new(width, height);
            }
        }
        match self.aspect_ratio.as_deref() {
            Some(ratio) => sizing_for_aspect_ratio(ratio).unwrap_or_else(|| {
                warn!(aspect_ratio = ratio, "Unknown aspect ratio, using default size");
                DEFAULT_SIZING
            }),
            None => DEFAULT_SIZING,
        }
    }
}

/// Runs one image generation task through the task lifecycle
pub struct ImageGeneratorNode {
    config: ImageGeneratorConfig,
}

impl ImageGeneratorNode {
    pub fn new(config: ImageGeneratorConfig) -> Self {
        Self { config }
    }

    pub async fn execute(&self, inputs: &Values, env: &RunEnv) -> Values {
        let Some(prompt) = read_str(inputs, &[self.config.prompt_key.as_str(), "prompt", "value"])
            .filter(|p| !p.trim().is_empty())
        else {
            return fail("No prompt provided");
        };

        let sizing = self.config.sizing();
        let outcome = env
            .services
            .images
            .run(prompt, sizing, &self.config.extras, &env.cancel)
            .await;

        let mut outputs = if outcome.is_success() {
            let mut outputs = Values::new();
            outputs.insert("imageUrl".into(), json!(outcome.result_url));
            outputs.insert("remoteUrl".into(), json!(outcome.remote_url));
            outputs.insert("persisted".into(), Value::Bool(outcome.persisted));
            outputs.insert("width".into(), json!(sizing.width));
            outputs.insert("height".into(), json!(sizing.height));
            outputs.insert("output".into(), json!(outcome.result_url));
            succeed(outputs)
        } else {
            fail(
                outcome
                    .error
                    .clone()
                    .unwrap_or_else(|| "Image generation failed".to_string()),
            )
        };

        outputs.insert("status".into(), json!(outcome.status));
        if let Some(task_id) = outcome.task_id {
            outputs.insert("taskId".into(), Value::String(task_id));
        }
        if outcome.status == TaskStatus::TimedOut {
            outputs.insert("attempts".into(), json!(outcome.attempts));
        }
        outputs
    }
}
