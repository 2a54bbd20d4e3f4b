//! Post-Processors — run in order after the Builder succeeds, before the
//! Engine starts runners. Each receives the graph and mutates it in place
//! (spec §4.4).
//!
//! The list is open: `Engine::load` runs `default_pipeline()`, but callers
//! may assemble their own (e.g. to add cycle detection ahead of it).

use indexmap::IndexMap;
use serde_json::Value;
use thiserror::Error;

use crate::graph::{FlowGraph, QueueRole};
use queue::keys::queue_name;

#[derive(Debug, Error)]
pub enum PostProcessError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Raised by `ReadinessValidator` when one or more nodes fail their
/// (non-strict) readiness predicate at load time.
#[derive(Debug, Error)]
#[error("workflow failed readiness validation: {violations:?}")]
pub struct ValidationError {
    pub violations: IndexMap<String, Vec<String>>,
}

pub trait PostProcessor: Send + Sync {
    fn process(&self, graph: &mut FlowGraph) -> Result<(), PostProcessError>;
}

/// For every queue-writer node with an outgoing edge to a queue-reader node,
/// synthesize `queue_{writerId}_{readerId}` and stamp it into both sides'
/// `form` under `queue_name`. A writer or reader missing its counterpart is
/// left untouched — the engine treats an empty `queue_name` as misconfigured
/// at runtime, not at load time (spec §4.4).
pub struct QueueMapper;

impl PostProcessor for QueueMapper {
    fn process(&self, graph: &mut FlowGraph) -> Result<(), PostProcessError> {
        // Collect candidate pairs first (`graph.iter()`/`graph.get()` borrow
        // the graph immutably; the actual mutation below goes through each
        // node's interior-mutable `SharedConfig`, so no `&mut` is needed).
        let mut pairs: Vec<(String, String)> = Vec::new();
        for node in graph.iter() {
            if node.queue_role != Some(QueueRole::Writer) {
                continue;
            }
            for targets in node.branches.values() {
                for target_id in targets {
                    if let Some(target) = graph.get(target_id) {
                        if target.queue_role == Some(QueueRole::Reader) {
                            pairs.push((node.id.clone(), target_id.clone()));
                        }
                    }
                }
            }
        }

        for (writer_id, reader_id) in pairs {
            let name = queue_name(&writer_id, &reader_id);
            if let Some(writer) = graph.get(&writer_id) {
                writer
                    .config
                    .write()
                    .expect("node config lock poisoned")
                    .set_form_field("queue_name", Value::String(name.clone()));
            }
            if let Some(reader) = graph.get(&reader_id) {
                reader
                    .config
                    .write()
                    .expect("node config lock poisoned")
                    .set_form_field("queue_name", Value::String(name));
            }
        }

        Ok(())
    }
}

/// Rejects topologies where a node is reachable from more than one
/// producer's subgraph. A `FlowRunner`'s init-once bookkeeping (§4.6 "DFS
/// from the producer, init() each unique node instance exactly once") is
/// tracked per Runner, so a node shared across two producers would be
/// `init()`'d once per owning Runner instead of once overall — the Engine
/// "SHOULD detect and reject such topologies in a post-processor" rather
/// than rely on node implementations being re-entrant (spec §5).
pub struct SharedOwnershipValidator;

impl PostProcessor for SharedOwnershipValidator {
    fn process(&self, graph: &mut FlowGraph) -> Result<(), PostProcessError> {
        use std::collections::HashSet;

        let mut owning_producers: IndexMap<String, Vec<String>> = IndexMap::new();

        for producer in graph.producers() {
            let mut seen = HashSet::new();
            let mut stack = vec![producer.id.clone()];
            while let Some(id) = stack.pop() {
                if !seen.insert(id.clone()) {
                    continue;
                }
                let Some(node) = graph.get(&id) else { continue };
                owning_producers.entry(id.clone()).or_default().push(producer.id.clone());
                for targets in node.branches.values() {
                    for target in targets {
                        if !seen.contains(target) {
                            stack.push(target.clone());
                        }
                    }
                }
            }
        }

        let mut violations = IndexMap::new();
        for (node_id, producers) in owning_producers {
            if producers.len() > 1 {
                violations.insert(
                    node_id,
                    vec![format!(
                        "node is reachable from multiple producers: {}",
                        producers.join(", ")
                    )],
                );
            }
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { violations }.into())
        }
    }
}

/// Invokes each node's (non-strict) readiness predicate; collects violations
/// and aborts loading with a `ValidationError` listing every offending node
/// (spec §4.4).
pub struct ReadinessValidator;

impl PostProcessor for ReadinessValidator {
    fn process(&self, graph: &mut FlowGraph) -> Result<(), PostProcessError> {
        let mut violations = IndexMap::new();
        for node in graph.iter() {
            let reasons = node.node.is_ready(false);
            if !reasons.is_empty() {
                violations.insert(node.id.clone(), reasons);
            }
        }
        if violations.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { violations }.into())
        }
    }
}

/// The default pipeline `Engine::load` runs: queue wiring before readiness,
/// so a queue-writer's synthesized `queue_name` is present by the time its
/// readiness predicate is checked. Shared-ownership rejection runs before
/// readiness, since a topology it rejects makes per-node readiness moot.
pub fn default_pipeline() -> Vec<Box<dyn PostProcessor>> {
    vec![
        Box::new(QueueMapper),
        Box::new(SharedOwnershipValidator),
        Box::new(ReadinessValidator),
    ]
}

/// Run every processor in declaration order, short-circuiting on the first
/// failure.
pub fn run_pipeline(pipeline: &[Box<dyn PostProcessor>], graph: &mut FlowGraph) -> Result<(), PostProcessError> {
    for processor in pipeline {
        processor.process(graph)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::Builder;
    use crate::description::{EdgeDescription, NodeData, NodeDescription, WorkflowDescription};
    use nodes::builtin;
    use nodes::NodeRegistry;
    use serde_json::{json, Map};

    fn registry() -> NodeRegistry {
        let mut registry = NodeRegistry::new();
        builtin::register_all(&mut registry).unwrap();
        registry
    }

    fn node_desc(id: &str, node_type: &str, config: Map<String, Value>) -> NodeDescription {
        NodeDescription {
            id: id.to_string(),
            node_type: node_type.to_string(),
            data: NodeData {
                form: Map::new(),
                config,
            },
        }
    }

    #[test]
    fn queue_mapper_stamps_both_sides_of_a_writer_reader_pair() {
        let registry = registry();
        let description = WorkflowDescription {
            nodes: vec![
                node_desc("w", "mock-blocking", Map::from_iter([("role".into(), json!("queue-writer"))])),
                node_desc("r", "mock-producer", Map::from_iter([("role".into(), json!("queue-reader"))])),
            ],
            edges: vec![EdgeDescription {
                source: "w".into(),
                target: "r".into(),
                source_handle: None,
            }],
        };

        let mut graph = Builder::new(&registry).build(&description).unwrap();
        QueueMapper.process(&mut graph).unwrap();

        let writer_name = graph.get("w").unwrap().config.read().unwrap().form_field("queue_name").cloned();
        let reader_name = graph.get("r").unwrap().config.read().unwrap().form_field("queue_name").cloned();
        assert_eq!(writer_name, Some(json!("queue_w_r")));
        assert_eq!(writer_name, reader_name);
    }

    #[test]
    fn queue_mapper_leaves_unmatched_writer_untouched() {
        let registry = registry();
        let description = WorkflowDescription {
            nodes: vec![node_desc("w", "mock-blocking", Map::from_iter([("role".into(), json!("queue-writer"))]))],
            edges: vec![],
        };
        let mut graph = Builder::new(&registry).build(&description).unwrap();
        QueueMapper.process(&mut graph).unwrap();
        assert!(graph.get("w").unwrap().config.read().unwrap().form_field("queue_name").is_none());
    }

    #[test]
    fn rebuilding_the_same_description_yields_identical_assignments() {
        let registry = registry();
        let description = WorkflowDescription {
            nodes: vec![
                node_desc("w1", "mock-blocking", Map::from_iter([("role".into(), json!("queue-writer"))])),
                node_desc("w2", "mock-blocking", Map::from_iter([("role".into(), json!("queue-writer"))])),
                node_desc("r", "mock-producer", Map::from_iter([("role".into(), json!("queue-reader"))])),
            ],
            edges: vec![
                EdgeDescription { source: "w1".into(), target: "r".into(), source_handle: None },
                EdgeDescription { source: "w2".into(), target: "r".into(), source_handle: Some("extra".into()) },
            ],
        };

        let assign = || {
            let mut graph = Builder::new(&registry).build(&description).unwrap();
            QueueMapper.process(&mut graph).unwrap();
            let w1 = graph.get("w1").unwrap().config.read().unwrap().form_field("queue_name").cloned();
            let w2 = graph.get("w2").unwrap().config.read().unwrap().form_field("queue_name").cloned();
            (w1, w2)
        };

        assert_eq!(assign(), assign());
    }

    #[test]
    fn shared_ownership_validator_passes_disjoint_producer_subgraphs() {
        let registry = registry();
        let description = WorkflowDescription {
            nodes: vec![
                node_desc("p1", "mock-producer", Map::new()),
                node_desc("b1", "mock-blocking", Map::new()),
                node_desc("p2", "mock-producer", Map::new()),
                node_desc("b2", "mock-blocking", Map::new()),
            ],
            edges: vec![
                EdgeDescription { source: "p1".into(), target: "b1".into(), source_handle: None },
                EdgeDescription { source: "p2".into(), target: "b2".into(), source_handle: None },
            ],
        };
        let mut graph = Builder::new(&registry).build(&description).unwrap();
        assert!(SharedOwnershipValidator.process(&mut graph).is_ok());
    }

    #[test]
    fn shared_ownership_validator_rejects_a_node_reachable_from_two_producers() {
        let registry = registry();
        let description = WorkflowDescription {
            nodes: vec![
                node_desc("p1", "mock-producer", Map::new()),
                node_desc("p2", "mock-producer", Map::new()),
                node_desc("shared", "mock-blocking", Map::new()),
            ],
            edges: vec![
                EdgeDescription { source: "p1".into(), target: "shared".into(), source_handle: None },
                EdgeDescription { source: "p2".into(), target: "shared".into(), source_handle: None },
            ],
        };
        let mut graph = Builder::new(&registry).build(&description).unwrap();
        let err = SharedOwnershipValidator.process(&mut graph).unwrap_err();
        let PostProcessError::Validation(ValidationError { violations }) = err;
        assert!(violations.contains_key("shared"));
    }
}
