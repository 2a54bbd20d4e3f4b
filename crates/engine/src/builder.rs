//! Builder — turns a `WorkflowDescription` into a `FlowGraph` via the node
//! registry (spec §4.3).

use std::sync::{Arc, RwLock};

use thiserror::Error;

use nodes::{NodeConfig, NodeRegistry};

use crate::description::{normalize_handle, WorkflowDescription};
use crate::graph::{FlowGraph, FlowNode, QueueRole};

/// Read the writer/reader tag the `QueueMapper` post-processor needs off a
/// node description's opaque `config` bag (spec §4.4).
fn queue_role(config: &serde_json::Map<String, serde_json::Value>) -> Option<QueueRole> {
    match config.get("role").and_then(serde_json::Value::as_str) {
        Some("queue-writer") => Some(QueueRole::Writer),
        Some("queue-reader") => Some(QueueRole::Reader),
        _ => None,
    }
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("unknown node type '{node_type}' for node '{node_id}'")]
    UnknownNodeType { node_id: String, node_type: String },

    #[error("edge references unknown node '{node_id}' ({side} side)")]
    DanglingEdge { node_id: String, side: &'static str },

    #[error("duplicate node id: '{0}'")]
    DuplicateNodeId(String),

    #[error("failed to construct node '{node_id}': {message}")]
    ConstructionFailed { node_id: String, message: String },
}

/// Consume a workflow description and produce a `FlowGraph`.
///
/// For each node: look up the factory, instantiate, wrap in a `FlowNode`,
/// add to the graph. For each edge: normalize `sourceHandle` and connect.
/// Duplicate targets under the same label are permitted (fan-out).
pub struct Builder<'a> {
    registry: &'a NodeRegistry,
}

impl<'a> Builder<'a> {
    pub fn new(registry: &'a NodeRegistry) -> Self {
        Self { registry }
    }

    pub fn build(&self, description: &WorkflowDescription) -> Result<FlowGraph, BuildError> {
        let mut graph = FlowGraph::new();

        for node_desc in &description.nodes {
            if graph.contains(&node_desc.id) {
                return Err(BuildError::DuplicateNodeId(node_desc.id.clone()));
            }

            let config = Arc::new(RwLock::new(
                NodeConfig::new(node_desc.id.clone(), node_desc.node_type.clone())
                    .with_form(node_desc.data.form.clone())
                    .with_config(node_desc.data.config.clone()),
            ));

            if !self.registry.is_registered(&node_desc.node_type) {
                return Err(BuildError::UnknownNodeType {
                    node_id: node_desc.id.clone(),
                    node_type: node_desc.node_type.clone(),
                });
            }

            let node = self
                .registry
                .create(config.clone())
                .map_err(|e| BuildError::ConstructionFailed {
                    node_id: node_desc.id.clone(),
                    message: e.to_string(),
                })?;

            let role = queue_role(&node_desc.data.config);
            graph.add(FlowNode::new(node_desc.id.clone(), node, config).with_queue_role(role));
        }

        for edge in &description.edges {
            if !graph.contains(&edge.source) {
                return Err(BuildError::DanglingEdge {
                    node_id: edge.source.clone(),
                    side: "source",
                });
            }
            if !graph.contains(&edge.target) {
                return Err(BuildError::DanglingEdge {
                    node_id: edge.target.clone(),
                    side: "target",
                });
            }

            let label = normalize_handle(&edge.source_handle);
            graph.connect(&edge.source, &edge.target, label);
        }

        Ok(graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::description::{EdgeDescription, NodeData, NodeDescription};
    use nodes::builtin;

    fn registry() -> NodeRegistry {
        let mut registry = NodeRegistry::new();
        builtin::register_all(&mut registry).unwrap();
        registry
    }

    fn node_desc(id: &str, node_type: &str) -> NodeDescription {
        NodeDescription {
            id: id.to_string(),
            node_type: node_type.to_string(),
            data: NodeData::default(),
        }
    }

    #[test]
    fn builds_a_linear_graph_with_default_labels() {
        let registry = registry();
        let description = WorkflowDescription {
            nodes: vec![
                node_desc("p", "mock-producer"),
                node_desc("b", "mock-blocking"),
            ],
            edges: vec![EdgeDescription {
                source: "p".into(),
                target: "b".into(),
                source_handle: None,
            }],
        };

        let graph = Builder::new(&registry).build(&description).unwrap();
        assert_eq!(graph.len(), 2);
        assert_eq!(
            graph.get("p").unwrap().branches.get("default").unwrap(),
            &vec!["b".to_string()]
        );
    }

    #[test]
    fn unknown_node_type_is_rejected() {
        let registry = registry();
        let description = WorkflowDescription {
            nodes: vec![node_desc("p", "not-a-real-type")],
            edges: vec![],
        };
        let err = Builder::new(&registry).build(&description).unwrap_err();
        assert!(matches!(err, BuildError::UnknownNodeType { .. }));
    }

    #[test]
    fn dangling_edge_is_rejected() {
        let registry = registry();
        let description = WorkflowDescription {
            nodes: vec![node_desc("p", "mock-producer")],
            edges: vec![EdgeDescription {
                source: "p".into(),
                target: "ghost".into(),
                source_handle: None,
            }],
        };
        let err = Builder::new(&registry).build(&description).unwrap_err();
        assert!(matches!(err, BuildError::DanglingEdge { node_id, .. } if node_id == "ghost"));
    }

    #[test]
    fn duplicate_node_id_is_rejected() {
        let registry = registry();
        let description = WorkflowDescription {
            nodes: vec![node_desc("p", "mock-producer"), node_desc("p", "mock-producer")],
            edges: vec![],
        };
        let err = Builder::new(&registry).build(&description).unwrap_err();
        assert!(matches!(err, BuildError::DuplicateNodeId(id) if id == "p"));
    }

    #[test]
    fn yes_no_handles_normalize_to_lowercase_labels() {
        let registry = registry();
        let description = WorkflowDescription {
            nodes: vec![
                node_desc("c", "mock-conditional"),
                node_desc("y", "mock-blocking"),
                node_desc("n", "mock-blocking"),
            ],
            edges: vec![
                EdgeDescription { source: "c".into(), target: "y".into(), source_handle: Some("Yes".into()) },
                EdgeDescription { source: "c".into(), target: "n".into(), source_handle: Some("No".into()) },
            ],
        };
        let graph = Builder::new(&registry).build(&description).unwrap();
        let c = graph.get("c").unwrap();
        assert_eq!(c.branches.get("yes").unwrap(), &vec!["y".to_string()]);
        assert_eq!(c.branches.get("no").unwrap(), &vec!["n".to_string()]);
    }

    #[test]
    fn fan_out_permits_duplicate_targets_under_one_label() {
        let registry = registry();
        let description = WorkflowDescription {
            nodes: vec![node_desc("p", "mock-producer"), node_desc("b", "mock-blocking")],
            edges: vec![
                EdgeDescription { source: "p".into(), target: "b".into(), source_handle: None },
                EdgeDescription { source: "p".into(), target: "b".into(), source_handle: None },
            ],
        };
        let graph = Builder::new(&registry).build(&description).unwrap();
        assert_eq!(graph.get("p").unwrap().branches.get("default").unwrap().len(), 2);
    }
}
