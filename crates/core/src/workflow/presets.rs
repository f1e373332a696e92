use crate::types::{EdgeDef, NodeDef, NodeType, WorkflowGraph};
use serde_json::json;

/// Built-in story-to-storyboard graph: split the text into scenes, detect a
/// style, build one prompt per scene and render it.
pub fn storyboard() -> WorkflowGraph {
    WorkflowGraph::new(
        vec![
            NodeDef::new("input", NodeType::Input).with_config(json!({
                "field": "text",
                "required": ["text"]
            })),
            NodeDef::new("split", NodeType::TextSplitter).with_config(json!({
                "sentences_per_scene": 3,
                "max_scenes": 10
            })),
            NodeDef::new("style", NodeType::StyleDetector),
            NodeDef::new("scenes", NodeType::Loop)
                .with_config(json!({"items_key": "items"}))
                .with_children(vec![
                    NodeDef::new("prompt", NodeType::PromptBuilder),
                    NodeDef::new("image", NodeType::ImageGenerator)
                        .with_config(json!({"aspect_ratio": "16:9"})),
                ]),
            NodeDef::new("output", NodeType::Output).with_config(json!({
                "fields": ["results", "count", "succeeded", "failed", "style"]
            })),
        ],
        vec![
            EdgeDef::new("input", "split"),
            EdgeDef::new("input", "style"),
            EdgeDef::new("split", "scenes").with_mapping([("scenes", "items")]),
            EdgeDef::new("style", "scenes").with_mapping([("style", "style")]),
            EdgeDef::new("scenes", "output").with_mapping([
                ("results", "results"),
                ("count", "count"),
                ("succeeded", "succeeded"),
                ("failed", "failed"),
            ]),
            EdgeDef::new("style", "output").with_mapping([("style", "style")]),
        ],
    )
}
