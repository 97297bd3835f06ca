//! `ToolID`: `<toolset>.<tool>`, globally unique within a deployment.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Error returned when a string does not parse as `<toolset>.<tool>`.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid tool id {0:?}: expected <toolset>.<tool>")]
pub struct ToolIdParseError(pub String);

/// Identity of one tool: `<toolset>.<tool>`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ToolId {
    toolset: String,
    tool: String,
}

impl ToolId {
    pub fn new(toolset: impl Into<String>, tool: impl Into<String>) -> Self {
        Self {
            toolset: toolset.into(),
            tool: tool.into(),
        }
    }

    pub fn toolset(&self) -> &str {
        &self.toolset
    }

    pub fn tool(&self) -> &str {
        &self.tool
    }
}

impl fmt::Display for ToolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.toolset, self.tool)
    }
}

impl std::str::FromStr for ToolId {
    type Err = ToolIdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('.') {
            Some((toolset, tool)) if !toolset.is_empty() && !tool.is_empty() => {
                Ok(ToolId::new(toolset, tool))
            }
            _ => Err(ToolIdParseError(s.to_string())),
        }
    }
}

impl TryFrom<String> for ToolId {
    type Error = ToolIdParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<ToolId> for String {
    fn from(id: ToolId) -> Self {
        id.to_string()
    }
}
