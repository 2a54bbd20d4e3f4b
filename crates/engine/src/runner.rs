//! Flow Runner — the per-producer loop: traversal, branch selection,
//! lifecycle, DLQ (spec §4.6, §5, §7).

use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tracing::{info, instrument, warn};

use nodes::{NodeKind, NodeOutput};
use queue::Backend;

use crate::dispatcher::PoolDispatcher;
use crate::graph::{FlowGraph, FlowNode};
use crate::template::TemplateRenderer;
use crate::tracker::EventTracker;
use crate::EngineError;

/// Mirrors spec §4.6's state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunnerState {
    Idle,
    Initializing,
    Running,
    Stopping,
    Stopped,
    Failed(String),
}

/// One Runner per `ProducerNode`. Owns its producer's subgraph slice for
/// traversal ordering only — a node reachable from two producers is still a
/// single shared instance (spec §3 "Ownership").
pub struct FlowRunner {
    producer_id: String,
    graph: Arc<FlowGraph>,
    dispatcher: Arc<PoolDispatcher>,
    backend: Arc<dyn Backend>,
    tracker: Arc<EventTracker>,
    template: Arc<TemplateRenderer>,
    dlq_key: Option<String>,
    state: watch::Sender<RunnerState>,
    initialized: Mutex<HashSet<String>>,
    cleaned: Mutex<HashSet<String>>,
}

impl FlowRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        producer_id: String,
        graph: Arc<FlowGraph>,
        dispatcher: Arc<PoolDispatcher>,
        backend: Arc<dyn Backend>,
        tracker: Arc<EventTracker>,
        template: Arc<TemplateRenderer>,
        dlq_key: Option<String>,
    ) -> Self {
        let (state, _) = watch::channel(RunnerState::Idle);
        Self {
            producer_id,
            graph,
            dispatcher,
            backend,
            tracker,
            template,
            dlq_key,
            state,
            initialized: Mutex::new(HashSet::new()),
            cleaned: Mutex::new(HashSet::new()),
        }
    }

    pub fn producer_id(&self) -> &str {
        &self.producer_id
    }

    pub fn state(&self) -> RunnerState {
        self.state.borrow().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<RunnerState> {
        self.state.subscribe()
    }

    /// Cooperative stop: sets the flag the loop checks at the next
    /// iteration boundary (spec §4.6 "Stopping", §5).
    pub fn stop(&self) {
        self.state.send_if_modified(|s| {
            if matches!(s, RunnerState::Running | RunnerState::Initializing) {
                *s = RunnerState::Stopping;
                true
            } else {
                false
            }
        });
    }

    /// DFS from the producer, `init()` each unique node exactly once (P2).
    async fn initialize(&self) -> Result<(), EngineError> {
        let mut seen = HashSet::new();
        let mut stack = vec![self.producer_id.clone()];
        let mut initialized = self.initialized.lock().await;

        while let Some(id) = stack.pop() {
            if !seen.insert(id.clone()) {
                continue;
            }
            let Some(flow_node) = self.graph.get(&id) else {
                continue;
            };
            if !initialized.contains(&id) {
                flow_node.node.init().await.map_err(|e| EngineError::Node {
                    node_id: id.clone(),
                    message: e.to_string(),
                })?;
                initialized.insert(id.clone());
            }
            for targets in flow_node.branches.values() {
                for target in targets {
                    if !seen.contains(target) {
                        stack.push(target.clone());
                    }
                }
            }
        }
        Ok(())
    }

    /// `cleanup()` at most once per node instance (P3), idempotent so the
    /// producer's on-`ExecutionCompleted` cleanup and the end-of-loop sweep
    /// don't double-invoke it.
    async fn cleanup_node(&self, id: &str) {
        let mut cleaned = self.cleaned.lock().await;
        if cleaned.contains(id) {
            return;
        }
        if let Some(flow_node) = self.graph.get(id) {
            if let Err(e) = flow_node.node.cleanup().await {
                warn!(node_id = id, error = %e, "cleanup failed");
            }
        }
        cleaned.insert(id.to_string());
    }

    async fn cleanup_all_initialized(&self) {
        let ids: Vec<String> = self.initialized.lock().await.iter().cloned().collect();
        for id in ids {
            self.cleanup_node(&id).await;
        }
    }

    async fn dead_letter(&self, node_id: &str, input: &NodeOutput, error: &str) {
        let Some(dlq_key) = &self.dlq_key else {
            return;
        };
        let payload = serde_json::json!({
            "nodeId": node_id,
            "input": input,
            "error": error,
        });
        match serde_json::to_vec(&payload) {
            Ok(bytes) => {
                if let Err(e) = self.backend.push(dlq_key, bytes).await {
                    warn!(node_id, error = %e, "dead-letter push failed; swallowing");
                }
            }
            Err(e) => warn!(node_id, error = %e, "failed to serialize dead-letter payload"),
        }
    }

    /// Dispatch a single non-producer node: render its form against
    /// `input`, run the strict readiness check, dispatch, and restore the
    /// node's original (un-rendered) form afterwards so the next iteration
    /// re-renders from the pristine template (spec §4.9).
    async fn run_non_producer(&self, flow_node: &FlowNode, input: NodeOutput) -> Result<NodeOutput, String> {
        let original_form = flow_node.config.read().expect("node config lock poisoned").form.clone();
        let rendered = self
            .template
            .render_form(&original_form, &input)
            .map_err(|e| e.to_string())?;

        flow_node.config.write().expect("node config lock poisoned").form = rendered;

        let violations = flow_node.node.is_ready(true);
        if !violations.is_empty() {
            flow_node.config.write().expect("node config lock poisoned").form = original_form;
            return Err(format!("strict readiness check failed: {}", violations.join("; ")));
        }

        let result = self.dispatcher.dispatch(&flow_node.node, &flow_node.config, input).await;

        flow_node.config.write().expect("node config lock poisoned").form = original_form;

        result.map_err(|e| e.to_string())
    }

    /// Determine which branch labels of `node` to follow given its own
    /// output (`input`). Returns `Err` with the violation message already
    /// reported (DLQ'd, `nodeFailed` emitted) when `input` names a route
    /// `node` has no branch for (spec §4.6 "Traversal", TraversalError).
    async fn branch_keys(&self, node: &FlowNode, input: &NodeOutput) -> Result<Vec<String>, ()> {
        if node.node.kind() == NodeKind::Conditional {
            if let Some(route) = input.route() {
                if node.branches.contains_key(route) {
                    return Ok(vec![route.to_string()]);
                }
                let message = format!("unknown branch label '{route}'");
                self.tracker.node_failed(&node.id, &message);
                self.dead_letter(&node.id, input, &message).await;
                return Err(());
            }
        }
        Ok(node.branches.keys().cloned().collect())
    }

    /// Recursive traversal (spec §4.6 "Traversal"). Any node failure
    /// anywhere in the subtree aborts the *entire* iteration — siblings of
    /// the failed node, and anything past it, are never invoked (P4).
    fn traverse<'a>(
        &'a self,
        node: &'a FlowNode,
        input: NodeOutput,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<(), ()>> + Send + 'a>> {
        Box::pin(async move {
            let keys = self.branch_keys(node, &input).await?;

            for key in keys {
                let Some(targets) = node.branches.get(&key) else {
                    continue;
                };
                for target_id in targets {
                    let Some(child) = self.graph.get(target_id) else {
                        continue;
                    };

                    self.tracker.node_started(&child.id);
                    match self.run_non_producer(child, input.clone()).await {
                        Ok(out) => {
                            self.tracker.node_completed(&child.id, &out);
                            if child.node.kind() == NodeKind::NonBlocking {
                                // Loop-end (P5): don't descend further down
                                // this path, but sibling branches/targets
                                // still run.
                                continue;
                            }
                            self.traverse(child, out).await?;
                        }
                        Err(message) => {
                            self.tracker.node_failed(&child.id, &message);
                            self.dead_letter(&child.id, &input, &message).await;
                            return Err(());
                        }
                    }
                }
            }
            Ok(())
        })
    }

    /// The producer's per-iteration loop (spec §4.6 "Main loop").
    #[instrument(skip(self), fields(producer_id = %self.producer_id))]
    pub async fn run(self: &Arc<Self>) -> Result<(), EngineError> {
        self.state.send_replace(RunnerState::Initializing);
        if let Err(e) = self.initialize().await {
            self.state.send_replace(RunnerState::Failed(e.to_string()));
            return Err(e);
        }

        let producer = self
            .graph
            .get(&self.producer_id)
            .ok_or_else(|| EngineError::UnknownNode(self.producer_id.clone()))?;

        self.tracker.runner_registered(&self.producer_id);

        // `stop()` can land while we were still `Initializing`; it already
        // moved the state to `Stopping`, so don't stomp that back to
        // `Running` — skip the loop entirely and go straight to cleanup.
        let mut stop_requested_during_init = false;
        self.state.send_if_modified(|s| {
            if matches!(s, RunnerState::Stopping) {
                stop_requested_during_init = true;
                false
            } else {
                *s = RunnerState::Running;
                true
            }
        });

        if stop_requested_during_init {
            self.cleanup_all_initialized().await;
            self.state.send_replace(RunnerState::Stopped);
            self.tracker.runner_unregistered(&self.producer_id);
            info!(producer_id = %self.producer_id, "runner stopped during initialization");
            return Ok(());
        }

        loop {
            if matches!(*self.state.borrow(), RunnerState::Stopping) {
                break;
            }

            self.tracker.node_started(&self.producer_id);
            let produced = self.dispatcher.dispatch(&producer.node, &producer.config, NodeOutput::empty()).await;

            let data = match produced {
                Ok(out) => out,
                Err(e) => {
                    self.tracker.node_failed(&self.producer_id, &e.to_string());
                    warn!(producer_id = %self.producer_id, error = %e, "producer failed; pausing before retry");
                    tokio::time::sleep(retry_jitter(&self.producer_id)).await;
                    continue;
                }
            };

            if data.is_execution_completed() {
                self.tracker.node_completed(&self.producer_id, &data);
                self.cleanup_node(&self.producer_id).await;
                self.state.send_replace(RunnerState::Stopping);
                break;
            }

            self.tracker.node_completed(&self.producer_id, &data);
            let _ = self.traverse(producer, data).await;
        }

        self.cleanup_all_initialized().await;
        self.state.send_replace(RunnerState::Stopped);
        self.tracker.runner_unregistered(&self.producer_id);
        info!(producer_id = %self.producer_id, "runner stopped");
        Ok(())
    }
}

/// A bounded (≤1s), per-producer-deterministic pause between producer
/// retries — deterministic so tests are reproducible, and derived from the
/// producer id rather than a process-wide RNG singleton (spec §4.6, §9
/// "Global state").
fn retry_jitter(producer_id: &str) -> Duration {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    producer_id.hash(&mut hasher);
    let jitter_ms = 100 + (hasher.finish() % 900);
    Duration::from_millis(jitter_ms)
}
