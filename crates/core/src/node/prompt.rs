use super::{fail, succeed, RunEnv};
use crate::providers::GenerationOptions;
use crate::types::Values;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseFormat {
    #[default]
    Text,
    Json,
}

/// Prompt (text generation) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptConfig {
    /// Template with `{key}` placeholders filled from inputs
    pub template: String,
    pub response_format: ResponseFormat,
    pub model: Option<String>,
    pub system: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            template: "{value}".to_string(),
            response_format: ResponseFormat::Text,
            model: None,
            system: None,
            temperature: None,
            max_tokens: None,
        }
    }
}

/// Fills a template, calls the text generator and optionally parses JSON
pub struct PromptNode {
    config: PromptConfig,
    placeholder: Regex,
    fenced: Regex,
}

impl PromptNode {
    pub fn new(config: PromptConfig) -> Result<Self, regex::Error> {
        Ok(Self {
            config,
            placeholder: Regex::new(r"\{([A-Za-z0-9_.\-]+)\}")?,
            fenced: Regex::new(r"(?s)```[A-Za-z]*\s*(.*?)```")?,
        })
    }

    /// Substitute `{key}` placeholders; unknown keys are left as written
    pub fn render(&self, inputs: &Values) -> String {
        self.placeholder
            .replace_all(&self.config.template, |caps: &regex::Captures| {
                match inputs.get(&caps[1]) {
                    Some(Value::String(s)) => s.clone(),
                    Some(Value::Null) => String::new(),
                    Some(other) => other.to_string(),
                    None => caps[0].to_string(),
                }
            })
            .into_owned()
    }

    /// Body of the first fenced code block, or the trimmed text
    pub fn extract_json<'a>(&self, text: &'a str) -> &'a str {
        self.fenced
            .captures(text)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim())
            .unwrap_or_else(|| text.trim())
    }

    pub async fn execute(&self, inputs: &Values, env: &RunEnv) -> Values {
        let prompt = self.render(inputs);
        let options = GenerationOptions {
            model: self.config.model.clone(),
            system: self.config.system.clone(),
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };

        let response = tokio::select! {
            _ = env.cancel.cancelled() => return fail("Cancelled"),
            response = env.services.text.generate(&prompt, &options) => response,
        };

        let text = match response {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "Text generation failed");
                return fail(e.to_string());
            }
        };

        let mut outputs = Values::new();
        match self.config.response_format {
            ResponseFormat::Text => {
                outputs.insert("response".into(), Value::String(text.clone()));
                outputs.insert("output".into(), Value::String(text));
            }
            ResponseFormat::Json => {
                let parsed: Value = match serde_json::from_str(self.extract_json(&text)) {
                    Ok(value) => value,
                    Err(e) => {
                        debug!(error = %e, "Response is not valid JSON");
                        let mut outputs = fail(format!("Failed to parse JSON response: {}", e));
                        outputs.insert("raw".into(), Value::String(text));
                        return outputs;
                    }
                };
                if let Value::Object(fields) = &parsed {
                    for (key, value) in fields {
                        outputs.insert(key.clone(), value.clone());
                    }
                }
                outputs.insert("output".into(), parsed);
            }
        }
        succeed(outputs)
    }
}
