use super::{read_str, succeed};
use crate::types::Values;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One keyword rule matched against lower-cased text; the first matching
/// rule wins
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StyleRule {
    pub style: String,
    pub pattern: String,
}

impl StyleRule {
    pub fn new(style: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            style: style.into(),
            pattern: pattern.into(),
        }
    }
}

fn default_rules() -> Vec<StyleRule> {
    vec![
        StyleRule::new("anime", r"\b(anime|manga|chibi|kawaii|shonen)\b"),
        StyleRule::new("watercolor", r"\b(watercolou?r|painterly|pastel|brushstrokes?)\b"),
        StyleRule::new("noir", r"\b(noir|detective|gangster|smoke-filled|femme fatale)\b"),
        StyleRule::new(
            "fantasy",
            r"\b(dragons?|wizards?|castles?|elf|elves|sorcer\w*|enchanted|magic\w*)\b",
        ),
        StyleRule::new(
            "sci-fi",
            r"\b(spaceships?|starships?|robots?|androids?|galaxy|cyberpunk|aliens?)\b",
        ),
        StyleRule::new(
            "storybook",
            r"\b(bunny|puppy|kitten|teddy|fairy tale|once upon a time)\b",
        ),
    ]
}

/// StyleDetector configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StyleDetectorConfig {
    pub input_key: String,
    pub rules: Vec<StyleRule>,
    pub default_style: String,
}

impl Default for StyleDetectorConfig {
    fn default() -> Self {
        Self {
            input_key: "text".to_string(),
            rules: default_rules(),
            default_style: "cinematic".to_string(),
        }
    }
}

/// Picks a visual style from keyword rules, in rule order
pub struct StyleDetectorNode {
    input_key: String,
    rules: Vec<(String, Regex)>,
    default_style: String,
}

impl StyleDetectorNode {
    pub fn new(config: StyleDetectorConfig) -> Result<Self, regex::Error> {
        let rules = config
            .rules
            .into_iter()
            .map(|rule| {
                let regex = Regex::new(&rule.pattern)?;
                Ok((rule.style, regex))
            })
            .collect::<Result<Vec<_>, regex::Error>>()?;

        Ok(Self {
            input_key: config.input_key,
            rules,
            default_style: config.default_style,
        })
    }

    /// Rules see the lower-cased text, so patterns are written in lower case
    pub fn detect(&self, text: &str) -> Option<&str> {
        let text = text.to_lowercase();
        self.rules
            .iter()
            .find(|(_, regex)| regex.is_match(&text))
            .map(|(style, _)| style.as_str())
    }

    pub fn execute(&self, inputs: &Values) -> Values {
        let text = read_str(inputs, &[self.input_key.as_str(), "value", "text"]).unwrap_or("");
        let detected = self.detect(text);
        let style = detected.unwrap_or(&self.default_style).to_string();

        let mut outputs = Values::new();
        outputs.insert("matched".into(), Value::Bool(detected.is_some()));
        outputs.insert("style".into(), Value::String(style.clone()));
        outputs.insert("output".into(), Value::String(style));
        succeed(outputs)
    }
}
