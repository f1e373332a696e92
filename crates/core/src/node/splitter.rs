use super::{read_str, succeed};
use crate::types::Values;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// TextSplitter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TextSplitterConfig {
    pub input_key: String,
    pub sentences_per_scene: usize,
    pub max_scenes: usize,
    /// Remove headings, bracketed and emphasised asides before splitting
    pub strip_annotations: bool,
}

impl Default for TextSplitterConfig {
    fn default() -> Self {
        Self {
            input_key: "text".to_string(),
            sentences_per_scene: 3,
            max_scenes: 10,
            strip_annotations: true,
        }
    }
}

/// Splits prose into sentence groups ("scenes").
///
/// Splitting is idempotent: splitting the space-joined output again yields
/// the same scenes.
pub struct SceneSplitter {
    sentences_per_scene: usize,
    max_scenes: usize,
    strip_annotations: bool,
    heading: Regex,
    bracketed: Regex,
    emphasised_aside: Regex,
    sentence: Regex,
}

impl SceneSplitter {
    pub fn new(
        sentences_per_scene: usize,
        max_scenes: usize,
        strip_annotations: bool,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            sentences_per_scene: sentences_per_scene.max(1),
            max_scenes,
            strip_annotations,
            heading: Regex::new(r"(?m)^[ \t]*#{1,6}[ \t].*$")?,
            bracketed: Regex::new(r"\[[^\]]*\]")?,
            emphasised_aside: Regex::new(r"[*_]+\([^)]*\)[*_]+")?,
            sentence: Regex::new(r#"[^.!?。！？]+[.!?。！？]+["'”’)\]]*"#)?,
        })
    }

    /// Strip annotations and collapse whitespace, repeating until stable.
    ///
    /// The first round sees the original line structure. Later rounds catch
    /// headings that only reach the start of the text once an aside before
    /// them is gone.
    pub fn clean(&self, text: &str) -> String {
        let mut text = text.to_string();
        loop {
            let next = self.clean_once(&text);
            if next == text {
                return next;
            }
            text = next;
        }
    }

    fn clean_once(&self, text: &str) -> String {
        let mut text = text.to_string();
        if self.strip_annotations {
            text = self.bracketed.replace_all(&text, " ").into_owned();
            text = self.emphasised_aside.replace_all(&text, " ").into_owned();
            text = self.heading.replace_all(&text, " ").into_owned();
        }
        text.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    /// Sentence-like units of cleaned text
    pub fn sentences(&self, text: &str) -> Vec<String> {
        let cleaned = self.clean(text);
        let mut sentences = Vec::new();
        let mut last_end = 0;

        for m in self.sentence.find_iter(&cleaned) {
            let sentence = m.as_str().trim();
            if !sentence.is_empty() {
                sentences.push(sentence.to_string());
            }
            last_end = m.end();
        }

        let tail = cleaned[last_end..].trim();
        if tail.chars().any(char::is_alphanumeric) {
            sentences.push(tail.to_string());
        }

        sentences
    }

    pub fn split(&self, text: &str) -> Vec<String> {
        self.sentences(text)
            .chunks(self.sentences_per_scene)
            .map(|group| group.join(" "))
            .take(self.max_scenes)
            .collect()
    }
}

pub struct TextSplitterNode {
    input_key: String,
    splitter: SceneSplitter,
}

impl TextSplitterNode {
    pub fn new(config: TextSplitterConfig) -> Result<Self, regex::Error> {
        Ok(Self {
            splitter: SceneSplitter::new(
                config.sentences_per_scene,
                config.max_scenes,
                config.strip_annotations,
            )?,
            input_key: config.input_key,
        })
    }

    pub fn execute(&self, inputs: &Values) -> Values {
        let text = read_str(inputs, &[self.input_key.as_str(), "value", "text"]).unwrap_or("");
        let scenes = self.splitter.split(text);

        let mut outputs = Values::new();
        outputs.insert("count".into(), json!(scenes.len()));
        let scenes = Value::from(scenes);
        outputs.insert("scenes".into(), scenes.clone());
        outputs.insert("output".into(), scenes);
        succeed(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn splitter(per_scene: usize, max: usize) -> SceneSplitter {
        SceneSplitter::new(per_scene, max, true).unwrap()
    }

    #[test]
    fn test_groups_sentences_into_scenes() {
        let text = "One. Two! Three? Four. Five.";
        let scenes = splitter(2, 10).split(text);
        assert_eq!(scenes, vec!["One. Two!", "Three? Four.", "Five."]);
    }

    #[test]
    fn test_caps_scene_count() {
        let text = "A. B. C. D. E. F. G. H.";
        let scenes = splitter(2, 3).split(text);
        assert_eq!(scenes.len(), 3);
        assert_eq!(scenes[2], "E. F.");
    }

    #[test]
    fn test_strips_annotations_and_whitespace() {
        let text = "# Chapter One\nThe   rain fell. [Narrator pauses]\n\nShe waited *(softly)* by the door.\n## Part 2\nThe end";
        let sentences = splitter(1, 10).sentences(text);
        assert_eq!(
            sentences,
            vec!["The rain fell.", "She waited by the door.", "The end"]
        );
    }

    #[test]
    fn test_keeps_closing_quotes_with_sentence() {
        let sentences = splitter(1, 10).sentences(r#""Run!" he said. It was late…"#);
        assert_eq!(sentences[0], r#""Run!""#);
        assert_eq!(sentences[1], "he said.");
    }

    #[test]
    fn test_cjk_punctuation() {
        let sentences = splitter(1, 10).sentences("雨が降った。彼女は待った！");
        assert_eq!(sentences, vec!["雨が降った。", "彼女は待った！"]);
    }

    #[test]
    fn test_idempotent() {
        let inputs = [
            "# Title\nThe ship left port. Gulls cried [sfx]. *(beat)* The captain smiled!\nNight fell? Stars rose. The end",
            "\"Wait!\" she called. He turned... Nothing moved.   Then the door opened.",
            "No punctuation at all here",
            "[note] # Big storm. Next day.",
            "*(aside)* ## Heading. Then prose.",
            "#\nhello. world.",
            "",
        ];

        for text in inputs {
            for (per_scene, max) in [(1, 10), (2, 3), (3, 10)] {
                let s = splitter(per_scene, max);
                let first = s.split(text);
                let second = s.split(&first.join(" "));
                assert_eq!(first, second, "not idempotent for {text:?}");
            }
        }
    }

    #[test]
    fn test_heading_exposed_by_stripped_aside() {
        let s = splitter(1, 10);
        assert!(s.sentences("[note] # Big storm. Next day.").is_empty());
        assert_eq!(
            s.sentences("[note] # Big storm.\nNext day."),
            vec!["Next day."]
        );
        assert_eq!(s.clean("# Title\n[sfx] Rain."), "Rain.");
    }

    #[test]
    fn test_node_outputs() {
        let node = TextSplitterNode::new(TextSplitterConfig {
            sentences_per_scene: 2,
            ..Default::default()
        })
        .unwrap();

        let mut inputs = Values::new();
        inputs.insert("value".into(), json!("A. B. C."));
        let outputs = node.execute(&inputs);

        assert_eq!(outputs["count"], json!(2));
        assert_eq!(outputs["scenes"], json!(["A. B.", "C."]));
        assert_eq!(outputs["output"], outputs["scenes"]);
        assert_eq!(outputs["success"], json!(true));
    }

    #[test]
    fn test_empty_text_yields_no_scenes() {
        let node = TextSplitterNode::new(TextSplitterConfig::default()).unwrap();
        let outputs = node.execute(&Values::new());
        assert_eq!(outputs["count"], json!(0));
        assert_eq!(outputs["success"], json!(true));
    }
}
