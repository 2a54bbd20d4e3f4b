//! `FlowNode` / `FlowGraph` — the graph model (spec §3, §4.3, §9).
//!
//! Branch targets are stored as ids, not owned references, so a node
//! reachable from multiple producers is represented once and shared by
//! identity rather than duplicated (spec §9 "Cyclic ownership").

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use indexmap::IndexMap;
use nodes::traits::SharedConfig;
use nodes::{Node, NodeKind};

/// Tags a node as one half of a writer/reader pair the `QueueMapper`
/// post-processor wires together (spec §4.4). Parsed by the builder from the
/// node description's `config.role` field; `None` for nodes that don't
/// participate in cross-loop queueing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueRole {
    Writer,
    Reader,
}

/// A graph vertex: an id, the node instance it wraps, its live configuration
/// handle, and its outgoing branch map (`label → ordered target ids`).
pub struct FlowNode {
    pub id: String,
    pub node: Arc<dyn Node>,
    pub config: SharedConfig,
    pub branches: IndexMap<String, Vec<String>>,
    pub queue_role: Option<QueueRole>,
}

impl FlowNode {
    pub fn new(id: impl Into<String>, node: Arc<dyn Node>, config: SharedConfig) -> Self {
        Self {
            id: id.into(),
            node,
            config,
            branches: IndexMap::new(),
            queue_role: None,
        }
    }

    pub fn with_queue_role(mut self, role: Option<QueueRole>) -> Self {
        self.queue_role = role;
        self
    }

    /// Append `target_id` under `label`, preserving declared edge order and
    /// permitting duplicate targets under the same label (fan-out).
    pub fn connect(&mut self, label: impl Into<String>, target_id: impl Into<String>) {
        self.branches.entry(label.into()).or_default().push(target_id.into());
    }
}

/// The aggregate owner of every `FlowNode`, keyed by id. Built once per
/// workflow load; immutable during execution (spec §3, §5).
///
/// Backed by an `IndexMap` rather than a `HashMap` so that iteration replays
/// description order — the `QueueMapper` post-processor's assignments, and
/// `Engine::run_development_node`'s upstream-merge precedence, depend on
/// that determinism (spec §4.4 P9, §4.7 P8).
#[derive(Default)]
pub struct FlowGraph {
    nodes: IndexMap<String, FlowNode>,
    upstream_cache: Mutex<Option<HashMap<String, Vec<String>>>>,
}

impl FlowGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, node: FlowNode) {
        *self.upstream_cache.lock().expect("upstream cache poisoned") = None;
        self.nodes.insert(node.id.clone(), node);
    }

    pub fn connect(&mut self, src_id: &str, dst_id: &str, label: impl Into<String>) -> bool {
        *self.upstream_cache.lock().expect("upstream cache poisoned") = None;
        match self.nodes.get_mut(src_id) {
            Some(node) => {
                node.connect(label, dst_id.to_string());
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: &str) -> Option<&FlowNode> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FlowNode> {
        self.nodes.values()
    }

    /// Every node whose `kind()` is `Producer` (spec §4.7 "for each
    /// discovered ProducerNode, construct a Runner").
    pub fn producers(&self) -> Vec<&FlowNode> {
        self.nodes
            .values()
            .filter(|n| n.node.kind() == NodeKind::Producer)
            .collect()
    }

    fn rebuild_upstream_cache(&self) -> HashMap<String, Vec<String>> {
        let mut upstream: HashMap<String, Vec<String>> = HashMap::new();
        for node in self.nodes.values() {
            for targets in node.branches.values() {
                for target in targets {
                    upstream.entry(target.clone()).or_default().push(node.id.clone());
                }
            }
        }
        upstream
    }

    /// Nodes with an outgoing edge into `id`, computed by scanning every
    /// node's branch map and memoized until the next mutation (spec §4.3).
    pub fn upstream(&self, id: &str) -> Vec<&FlowNode> {
        let mut cache = self.upstream_cache.lock().expect("upstream cache poisoned");
        if cache.is_none() {
            *cache = Some(self.rebuild_upstream_cache());
        }
        let ids = cache.as_ref().and_then(|m| m.get(id)).cloned().unwrap_or_default();
        drop(cache);
        ids.iter().filter_map(|upstream_id| self.get(upstream_id)).collect()
    }
}
