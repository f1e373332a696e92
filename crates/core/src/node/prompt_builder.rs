use super::{fail, read_str, read_u64, succeed};
use crate::types::Values;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};

const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "been", "but", "by", "for", "from", "had", "has",
    "have", "he", "her", "his", "i", "in", "into", "is", "it", "its", "of", "on", "or", "she",
    "so", "that", "the", "their", "them", "then", "there", "they", "this", "to", "was", "were",
    "with", "would", "you",
];

fn default_templates() -> BTreeMap<String, String> {
    [
        ("cinematic", "cinematic still, dramatic lighting, shallow depth of field"),
        ("anime", "anime style, cel shading, vibrant colors, clean line art"),
        ("watercolor", "watercolor painting, soft washes, textured paper"),
        ("noir", "film noir, high-contrast black and white, hard shadows"),
        ("fantasy", "epic fantasy art, rich colors, volumetric light"),
        ("sci-fi", "science fiction concept art, neon accents, sleek surfaces"),
        ("storybook", "children's book illustration, gentle colors, rounded shapes"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

/// PromptBuilder configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptBuilderConfig {
    pub foundation: String,
    /// Style name to style phrase
    pub templates: BTreeMap<String, String>,
    pub default_template: String,
    pub stop_words: Vec<String>,
    pub max_concept_words: usize,
    pub max_concept_chars: usize,
    pub opening: String,
    pub middle: String,
    pub closing: String,
    pub technical_suffix: String,
    pub separator: String,
}

impl Default for PromptBuilderConfig {
    fn default() -> Self {
        Self {
            foundation: "highly detailed illustration".to_string(),
            templates: default_templates(),
            default_template: "cinematic composition, natural lighting".to_string(),
            stop_words: STOP_WORDS.iter().map(|w| w.to_string()).collect(),
            max_concept_words: 12,
            max_concept_chars: 160,
            opening: "establishing shot".to_string(),
            middle: "continuing the story".to_string(),
            closing: "closing scene, sense of resolution".to_string(),
            technical_suffix: "high resolution, sharp focus, no text, no watermark".to_string(),
            separator: ", ".to_string(),
        }
    }
}

/// Deterministic image prompt from scene text, style and scene position
pub struct PromptBuilderNode {
    config: PromptBuilderConfig,
    stop_words: HashSet<String>,
}

impl PromptBuilderNode {
    pub fn new(config: PromptBuilderConfig) -> Self {
        let stop_words = config.stop_words.iter().map(|w| w.to_lowercase()).collect();
        Self { config, stop_words }
    }

    /// Key words of the scene, stop words removed, capped by words and chars
    pub fn concept(&self, text: &str) -> String {
        let words: Vec<&str> = text
            .split_whitespace()
            .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()))
            .filter(|w| !w.is_empty() && !self.stop_words.contains(&w.to_lowercase()))
            .take(self.config.max_concept_words)
            .collect();

        let concept = words.join(" ");
        if concept.chars().count() <= self.config.max_concept_chars {
            return concept;
        }
        concept
            .chars()
            .take(self.config.max_concept_chars)
            .collect::<String>()
            .trim_end()
            .to_string()
    }

    fn position(&self, index: u64, total: u64) -> &str {
        if index == 0 {
            &self.config.opening
        } else if total > 0 && index >= total - 1 {
            &self.config.closing
        } else {
            &self.config.middle
        }
    }

    pub fn build(&self, text: &str, style: Option<&str>, index: u64, total: u64) -> String {
        let style_phrase = style
            .and_then(|s| self.config.templates.get(&s.to_lowercase()))
            .unwrap_or(&self.config.default_template);

        let concept = self.concept(text);
        let parts: [&str; 5] = [
            &self.config.foundation,
            style_phrase,
            &concept,
            self.position(index, total),
            &self.config.technical_suffix,
        ];
        parts
            .into_iter()
            .filter(|part| !part.trim().is_empty())
            .collect::<Vec<_>>()
            .join(&self.config.separator)
    }

    pub fn execute(&self, inputs: &Values) -> Values {
        let Some(text) = read_str(inputs, &["item", "text", "value"]).filter(|t| !t.trim().is_empty())
        else {
            return fail("No scene text provided");
        };

        let style = read_str(inputs, &["style"]);
        let index = read_u64(inputs, "index").unwrap_or(0);
        let total = read_u64(inputs, "total").unwrap_or(1);
        let prompt = self.build(text, style, index, total);

        let mut outputs = Values::new();
        outputs.insert("concept".into(), Value::String(self.concept(text)));
        outputs.insert("prompt".into(), Value::String(prompt.clone()));
        outputs.insert("output".into(), Value::String(prompt));
        succeed(outputs)
    }
}
