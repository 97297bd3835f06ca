//! Transcript messages: `AgentMessage` with a closed `Part` variant
//! set. Planners read/write transcripts; memory events carry these parts too.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tool::ToolId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One piece of an [`AgentMessage`]. Closed set: adding a variant is a wire
/// format change, not an extension point.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Part {
    Text { text: String },
    Thinking { text: String },
    /// References a prior call scheduled by this message's turn.
    ToolUse {
        tool_call_id: String,
        tool_id: ToolId,
        payload: Value,
    },
    /// Carries the correlated id of the `ToolUse` it answers.
    ToolResult {
        tool_call_id: String,
        result: Option<Value>,
        error: Option<String>,
    },
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AgentMessage {
    pub role: Role,
    pub parts: Vec<Part>,
    #[serde(default)]
    pub meta: HashMap<String, Value>,
}

impl Default for Role {
    fn default() -> Self {
        Role::User
    }
}

impl AgentMessage {
    pub fn new(role: Role, parts: Vec<Part>) -> Self {
        Self {
            role,
            parts,
            meta: HashMap::new(),
        }
    }

    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self::new(role, vec![Part::Text { text: text.into() }])
    }

    /// Concatenates every `Text` part's content; empty if there are none.
    pub fn text_content(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_content_concatenates_text_parts_only() {
        let msg = AgentMessage::new(
            Role::Assistant,
            vec![
                Part::Thinking {
                    text: "reasoning".into(),
                },
                Part::Text {
                    text: "hello".into(),
                },
                Part::Text {
                    text: " world".into(),
                },
            ],
        );
        assert_eq!(msg.text_content(), "hello world");
    }

    #[test]
    fn round_trips_through_json_with_tagged_parts() {
        let msg = AgentMessage::text(Role::User, "hi");
        let v = serde_json::to_value(&msg).unwrap();
        assert_eq!(v["parts"][0]["kind"], "text");
        let back: AgentMessage = serde_json::from_value(v).unwrap();
        assert_eq!(back.text_content(), "hi");
    }
}
