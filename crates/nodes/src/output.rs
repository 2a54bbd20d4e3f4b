//! `NodeOutput` — the runtime payload moving between nodes.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Metadata carried alongside a `NodeOutput`'s data, matching the wire shape
/// from spec §6: `{ id, data, metadata: { source, destination, route? } }`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<String>,
}

/// The payload passed between nodes during a single traversal step.
///
/// `ExecutionCompleted` is the terminal sentinel a producer returns to signal
/// its stream is exhausted (spec §3); every other payload carries opaque
/// `data` plus routing metadata. Implementations MUST accept unknown JSON
/// fields without failing (spec §6) — `#[serde(flatten)]` combined with
/// `Value`'s own tolerance gives us that for free.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NodeOutput {
    ExecutionCompleted {
        #[serde(rename = "executionCompleted")]
        execution_completed: bool,
    },
    Data {
        #[serde(default)]
        id: Option<String>,
        #[serde(default)]
        data: Map<String, Value>,
        #[serde(default)]
        metadata: OutputMetadata,
    },
}

impl NodeOutput {
    /// Build a plain data payload with no routing metadata.
    pub fn data(data: Map<String, Value>) -> Self {
        Self::Data {
            id: None,
            data,
            metadata: OutputMetadata::default(),
        }
    }

    /// Build an empty payload — what the runner feeds a producer on its
    /// first invocation (spec §4.6, step 2).
    pub fn empty() -> Self {
        Self::data(Map::new())
    }

    /// The terminal sentinel signalling a producer's stream is exhausted.
    pub fn execution_completed() -> Self {
        Self::ExecutionCompleted {
            execution_completed: true,
        }
    }

    pub fn is_execution_completed(&self) -> bool {
        matches!(self, Self::ExecutionCompleted { .. })
    }

    /// The `route` label set by a conditional node, if any.
    pub fn route(&self) -> Option<&str> {
        match self {
            Self::Data { metadata, .. } => metadata.route.as_deref(),
            Self::ExecutionCompleted { .. } => None,
        }
    }

    /// Attach a `route` label, returning a new payload (conditional nodes use
    /// this to select the branch the runner should follow).
    pub fn with_route(mut self, route: impl Into<String>) -> Self {
        if let Self::Data { metadata, .. } = &mut self {
            metadata.route = Some(route.into());
        }
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        if let Self::Data { metadata, .. } = &mut self {
            metadata.source = Some(source.into());
        }
        self
    }

    pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
        if let Self::Data { metadata, .. } = &mut self {
            metadata.destination = Some(destination.into());
        }
        self
    }

    /// Borrow the `data` map, or an empty map for `ExecutionCompleted`.
    pub fn data_map(&self) -> Map<String, Value> {
        match self {
            Self::Data { data, .. } => data.clone(),
            Self::ExecutionCompleted { .. } => Map::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execution_completed_round_trips() {
        let out = NodeOutput::execution_completed();
        let json = serde_json::to_value(&out).unwrap();
        let back: NodeOutput = serde_json::from_value(json).unwrap();
        assert!(back.is_execution_completed());
    }

    #[test]
    fn unknown_fields_do_not_fail_deserialization() {
        let json = serde_json::json!({
            "id": "n1",
            "data": {"x": 1},
            "metadata": {"source": "a", "destination": "b"},
            "somethingElseEntirely": 42,
        });
        let out: NodeOutput = serde_json::from_value(json).expect("tolerant of unknown fields");
        assert_eq!(out.data_map()["x"], 1);
    }

    #[test]
    fn route_round_trip() {
        let out = NodeOutput::empty().with_route("yes");
        assert_eq!(out.route(), Some("yes"));
    }
}
