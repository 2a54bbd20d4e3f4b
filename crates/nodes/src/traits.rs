//! The `Node` trait — the contract every node kind must fulfil (spec §3, §6).

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::Value;

use crate::{NodeConfig, NodeError, NodeOutput};

/// Discriminates how a node participates in traversal (spec §3, §9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// Drives iterations; has no upstream in-graph edge.
    Producer,
    /// Completion precedes descendants in the same iteration.
    Blocking,
    /// Marks iteration end; descendants (if any) are not run this iteration.
    NonBlocking,
    /// A blocking node that also selects a branch label for routing.
    Conditional,
}

/// Which execution substrate a node prefers (spec §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolKind {
    Async,
    Thread,
    Process,
}

/// A shared, mutable handle to a node's configuration.
///
/// Post-processors (e.g. `QueueMapper`) mutate a node's `form` fields after
/// the node instance has already been constructed (spec §4.4); node
/// implementations that need to observe those mutations — a queue writer
/// picking up its synthesized queue name — hold a clone of the same handle
/// rather than a private copy.
pub type SharedConfig = Arc<RwLock<NodeConfig>>;

/// The core node trait. All built-in nodes and externally supplied node
/// kinds implement this; the engine only ever holds `Arc<dyn Node>`.
#[async_trait]
pub trait Node: Send + Sync {
    /// Which variant of the traversal state machine this node is.
    fn kind(&self) -> NodeKind;

    /// Preferred execution substrate for `run`.
    fn pool(&self) -> PoolKind {
        PoolKind::Async
    }

    /// One-shot resource setup. Called exactly once per node instance before
    /// any `run` (spec §3 invariant, P2).
    async fn init(&self) -> Result<(), NodeError> {
        Ok(())
    }

    /// The per-iteration entry point.
    async fn run(&self, input: NodeOutput) -> Result<NodeOutput, NodeError>;

    /// Called on shutdown or on receipt of `ExecutionCompleted`. Called at
    /// most once per node instance (spec §3 invariant, P3).
    async fn cleanup(&self) -> Result<(), NodeError> {
        Ok(())
    }

    /// Readiness predicate consulted before first execution.
    ///
    /// `strict` distinguishes the builder-time check (`false`, spec §4.4
    /// `ReadinessValidator`) from the post-template-render check performed
    /// right before a non-producer node's `run` (`true`, spec §4.9). Returns
    /// the list of violation messages, empty when ready.
    fn is_ready(&self, _strict: bool) -> Vec<String> {
        Vec::new()
    }

    /// Optional configuration surface consumed by the builder's validation
    /// step (spec §6 "Node contract").
    fn get_form(&self) -> Option<Value> {
        None
    }
}
