//! `Toolset` model and JSON Schema validation.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RegistryError;

/// One tool advertised by a registered toolset.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    #[serde(default)]
    pub output_schema: Option<Value>,
}

/// A provider-registered bundle of tools, keyed by name in the registry map
///. `stream_id` and `registered_at` are filled in
/// by the service at registration time.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Toolset {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub tools: Vec<ToolSchema>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    /// The toolset's dispatch stream id (`<name>:requests`), set at register
    /// time; never supplied by the caller.
    #[serde(default)]
    pub stream_id: Option<String>,
    /// Registration timestamp, set by the service; not caller-supplied.
    #[serde(default)]
    pub registered_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl Toolset {
    pub fn tool(&self, name: &str) -> Option<&ToolSchema> {
        self.tools.iter().find(|t| t.name == name)
    }
}

/// Validates that `schema` is itself a well-formed JSON Schema document.
pub fn validate_schema_document(schema: &Value) -> Result<(), RegistryError> {
    if schema.is_null() {
        return Err(RegistryError::ValidationError(
            "schema must not be empty".into(),
        ));
    }
    jsonschema::validator_for(schema)
        .map_err(|e| RegistryError::ValidationError(format!("invalid json schema: {e}")))?;
    Ok(())
}

/// Validates a `Toolset` at `Register` time: every tool's `input_schema` must
/// be valid; `output_schema`, if present, must be valid too.
pub fn validate_toolset(toolset: &Toolset) -> Result<(), RegistryError> {
    if toolset.name.is_empty() {
        return Err(RegistryError::ValidationError(
            "toolset name must not be empty".into(),
        ));
    }
    for tool in &toolset.tools {
        validate_schema_document(&tool.input_schema).map_err(|e| {
            RegistryError::ValidationError(format!("tool {}: {e}", tool.name))
        })?;
        if let Some(output_schema) = &tool.output_schema {
            validate_schema_document(output_schema).map_err(|e| {
                RegistryError::ValidationError(format!("tool {} output_schema: {e}", tool.name))
            })?;
        }
    }
    Ok(())
}

/// Validates `payload` against `tool`'s `input_schema`.
pub fn validate_payload(tool: &ToolSchema, payload: &Value) -> Result<(), RegistryError> {
    let validator = jsonschema::validator_for(&tool.input_schema)
        .map_err(|e| RegistryError::Internal(format!("stored schema is invalid: {e}")))?;
    if !validator.is_valid(payload) {
        return Err(RegistryError::ValidationError(format!(
            "payload does not match input schema for tool {}",
            tool.name
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toolset() -> Toolset {
        Toolset {
            name: "data".into(),
            description: None,
            version: None,
            tags: vec!["db".into()],
            tools: vec![ToolSchema {
                name: "query".into(),
                description: "run a query".into(),
                input_schema: serde_json::json!({
                    "type": "object",
                    "properties": { "sql": { "type": "string" } },
                    "required": ["sql"]
                }),
                output_schema: None,
            }],
            metadata: HashMap::new(),
            stream_id: None,
            registered_at: None,
        }
    }

    #[test]
    fn valid_toolset_passes_validation() {
        assert!(validate_toolset(&toolset()).is_ok());
    }

    #[test]
    fn empty_input_schema_is_rejected() {
        let mut t = toolset();
        t.tools[0].input_schema = Value::Null;
        assert!(validate_toolset(&t).is_err());
    }

    #[test]
    fn payload_missing_required_field_is_rejected() {
        let t = toolset();
        let tool = t.tool("query").unwrap();
        assert!(validate_payload(tool, &serde_json::json!({})).is_err());
        assert!(validate_payload(tool, &serde_json::json!({"sql": "select 1"})).is_ok());
    }
}
