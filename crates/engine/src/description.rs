//! The workflow description JSON shape the builder consumes (spec §4.3, §6).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// `{ form, config }` — the `data` section of a node description.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeData {
    #[serde(default)]
    pub form: Map<String, Value>,
    #[serde(default)]
    pub config: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDescription {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub data: NodeData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeDescription {
    pub source: String,
    pub target: String,
    #[serde(default, rename = "sourceHandle")]
    pub source_handle: Option<String>,
}

/// The full workflow description: `{ nodes: [...], edges: [...] }`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowDescription {
    #[serde(default)]
    pub nodes: Vec<NodeDescription>,
    #[serde(default)]
    pub edges: Vec<EdgeDescription>,
}

/// Normalize a raw `sourceHandle` into a branch label (spec §4.3):
/// `null → "default"`, `"Yes" → "yes"`, `"No" → "no"`, else verbatim.
pub fn normalize_handle(source_handle: &Option<String>) -> String {
    match source_handle.as_deref() {
        None => "default".to_string(),
        Some("Yes") => "yes".to_string(),
        Some("No") => "no".to_string(),
        Some(other) => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_normalization_matches_spec_rules() {
        assert_eq!(normalize_handle(&None), "default");
        assert_eq!(normalize_handle(&Some("Yes".into())), "yes");
        assert_eq!(normalize_handle(&Some("No".into())), "no");
        assert_eq!(normalize_handle(&Some("custom".into())), "custom");
    }

    #[test]
    fn deserializes_the_documented_wire_shape() {
        let json = serde_json::json!({
            "nodes": [
                {"id": "a", "type": "mock-producer", "data": {"form": {}, "config": {}}},
                {"id": "b", "type": "mock-blocking", "data": {"form": {}, "config": {}}},
            ],
            "edges": [
                {"source": "a", "target": "b", "sourceHandle": null},
            ],
        });
        let description: WorkflowDescription = serde_json::from_value(json).unwrap();
        assert_eq!(description.nodes.len(), 2);
        assert_eq!(description.edges[0].source, "a");
    }
}
