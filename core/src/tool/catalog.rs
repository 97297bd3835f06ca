//! In-process tool catalog: `ToolId -> ToolSpec`, read-mostly.
//!
//! Populated at agent/toolset registration time, before any run starts; the
//! hot path (policy filtering, planner schema advertising) only reads.

use dashmap::DashMap;

use super::id::ToolId;
use super::spec::ToolSpec;

/// Read-mostly map of registered tool specs, keyed by [`ToolId`].
pub struct ToolCatalog {
    specs: DashMap<ToolId, ToolSpec>,
}

impl Default for ToolCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolCatalog {
    pub fn new() -> Self {
        Self {
            specs: DashMap::new(),
        }
    }

    /// Registers or replaces a tool spec. Call only during setup.
    pub fn register(&self, spec: ToolSpec) {
        self.specs.insert(spec.id.clone(), spec);
    }

    pub fn get(&self, id: &ToolId) -> Option<ToolSpec> {
        self.specs.get(id).map(|e| e.value().clone())
    }

    pub fn contains(&self, id: &ToolId) -> bool {
        self.specs.contains_key(id)
    }

    pub fn list(&self) -> Vec<ToolSpec> {
        self.specs.iter().map(|e| e.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::TypeSpec;

    fn spec(toolset: &str, tool: &str) -> ToolSpec {
        ToolSpec::new(
            ToolId::new(toolset, tool),
            "desc",
            TypeSpec::new("In", serde_json::json!({})),
            TypeSpec::new("Out", serde_json::json!({})),
        )
    }

    #[test]
    fn register_then_get_round_trips() {
        let catalog = ToolCatalog::new();
        catalog.register(spec("search", "query"));
        let got = catalog.get(&ToolId::new("search", "query")).unwrap();
        assert_eq!(got.description, "desc");
    }

    #[test]
    fn registering_same_id_replaces() {
        let catalog = ToolCatalog::new();
        catalog.register(spec("search", "query"));
        let mut replacement = spec("search", "query");
        replacement.description = "updated".into();
        catalog.register(replacement);
        assert_eq!(catalog.len(), 1);
        assert_eq!(
            catalog.get(&ToolId::new("search", "query")).unwrap().description,
            "updated"
        );
    }
}
