//! `TypeSpec` and `ToolSpec`: immutable-after-registration
//! identity and schema for one tool.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::id::ToolId;

/// A named JSON Schema (draft 2020-12 compatible). Immutable once built; only
/// used for model-facing schema advertising and registry-side validation —
/// never consulted for decode/encode (that is the codec's job, see
/// [`super::codec::CodecJson`]). Activity-backed tools additionally register
/// an [`super::codec::ErasedResultCodec`] on their executor so a result is
/// decoded through the tool's own type before it is accepted.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TypeSpec {
    pub name: String,
    pub schema: Value,
}

impl TypeSpec {
    pub fn new(name: impl Into<String>, schema: Value) -> Self {
        Self {
            name: name.into(),
            schema,
        }
    }
}

/// Identity + schema for one tool. Built once at registration; immutable
/// afterward.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolSpec {
    pub id: ToolId,
    pub description: String,
    pub tags: Vec<String>,
    pub payload: TypeSpec,
    pub result: TypeSpec,
}

impl ToolSpec {
    pub fn new(
        id: ToolId,
        description: impl Into<String>,
        payload: TypeSpec,
        result: TypeSpec,
    ) -> Self {
        Self {
            id,
            description: description.into(),
            tags: Vec::new(),
            payload,
            result,
        }
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_spec_round_trips_through_json() {
        let spec = ToolSpec::new(
            ToolId::new("search", "query"),
            "Searches the docs index",
            TypeSpec::new("SearchQuery", serde_json::json!({"type": "object"})),
            TypeSpec::new("SearchHits", serde_json::json!({"type": "object"})),
        )
        .with_tags(vec!["search".into()]);
        let v = serde_json::to_value(&spec).unwrap();
        let back: ToolSpec = serde_json::from_value(v).unwrap();
        assert_eq!(back.id, spec.id);
        assert_eq!(back.tags, spec.tags);
    }
}
