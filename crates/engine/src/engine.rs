//! Engine — owns the graph for a loaded workflow and drives it in either
//! production (every producer's Runner, concurrently, to exhaustion) or
//! development (one node, one shot) mode (spec §4.7).

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use nodes::{NodeOutput, NodeRegistry};
use queue::Backend;

use crate::description::WorkflowDescription;
use crate::dispatcher::PoolDispatcher;
use crate::graph::FlowGraph;
use crate::post_processors::{default_pipeline, run_pipeline};
use crate::runner::FlowRunner;
use crate::template::TemplateRenderer;
use crate::tracker::EventTracker;
use crate::{Builder, EngineError};

/// Owns everything a loaded workflow needs to run: the graph, one `FlowRunner`
/// per producer, and the shared collaborators (dispatcher, backend, tracker,
/// template renderer) every Runner is handed a clone of.
pub struct Engine {
    registry: NodeRegistry,
    backend: Arc<dyn Backend>,
    dispatcher: Arc<PoolDispatcher>,
    tracker: Arc<EventTracker>,
    template: Arc<TemplateRenderer>,
    graph: Option<Arc<FlowGraph>>,
    runners: Vec<Arc<FlowRunner>>,
    workflow_id: Option<String>,
    dev_initialized: Mutex<HashSet<String>>,
}

impl Engine {
    pub fn new(registry: NodeRegistry, backend: Arc<dyn Backend>) -> Self {
        Self {
            registry,
            backend,
            dispatcher: Arc::new(PoolDispatcher::new()),
            tracker: Arc::new(EventTracker::new(0)),
            template: Arc::new(TemplateRenderer::new()),
            graph: None,
            runners: Vec::new(),
            workflow_id: None,
            dev_initialized: Mutex::new(HashSet::new()),
        }
    }

    pub fn tracker(&self) -> Arc<EventTracker> {
        self.tracker.clone()
    }

    pub fn graph(&self) -> Option<&FlowGraph> {
        self.graph.as_deref()
    }

    /// Build the graph, run the default post-processor pipeline, and stand up
    /// one (not-yet-started) `FlowRunner` per producer (spec §4.7).
    #[instrument(skip(self, description))]
    pub fn load(&mut self, workflow_id: impl Into<String>, description: &WorkflowDescription) -> Result<(), EngineError> {
        let mut graph = Builder::new(&self.registry).build(description)?;
        run_pipeline(&default_pipeline(), &mut graph)?;

        let graph = Arc::new(graph);
        self.tracker = Arc::new(EventTracker::new(graph.len()));
        self.workflow_id = Some(workflow_id.into());

        let dlq_key = self.workflow_id.as_deref().map(queue::keys::dlq_key);
        self.runners = graph
            .producers()
            .iter()
            .map(|producer| {
                Arc::new(FlowRunner::new(
                    producer.id.clone(),
                    graph.clone(),
                    self.dispatcher.clone(),
                    self.backend.clone(),
                    self.tracker.clone(),
                    self.template.clone(),
                    dlq_key.clone(),
                ))
            })
            .collect();

        self.graph = Some(graph);
        info!(runners = self.runners.len(), "workflow loaded");
        Ok(())
    }

    /// Run every producer's Runner concurrently to exhaustion (spec §4.7).
    /// Returns once every Runner has stopped, whether by `ExecutionCompleted`,
    /// `stop()`, or an unrecoverable failure.
    #[instrument(skip(self), fields(execution_id = %uuid::Uuid::new_v4()))]
    pub async fn run_production(&self) -> Result<(), EngineError> {
        self.tracker.workflow_started();

        let mut joins = tokio::task::JoinSet::new();
        for runner in &self.runners {
            let runner = runner.clone();
            joins.spawn(async move { runner.run().await });
        }

        let mut first_error = None;
        while let Some(result) = joins.join_next().await {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(error = %e, "runner returned an error");
                    self.tracker.workflow_failed(&e.to_string());
                    first_error.get_or_insert(e);
                }
                Err(join_err) => {
                    warn!(error = %join_err, "runner task panicked");
                    self.tracker.workflow_failed(&join_err.to_string());
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Cooperatively stop every Runner (spec §4.6 "Stopping").
    pub fn stop_all(&self) {
        for runner in &self.runners {
            runner.stop();
        }
    }

    /// Run a single node once, outside any Runner's loop: resolve its
    /// upstream neighbours' last cached outputs, merge them (later upstream
    /// wins on key conflict, `input_override` wins over all), lazily `init()`
    /// the node exactly once across however many dev invocations follow, run
    /// it, and cache its output under `dev:out:{node_id}` for downstream dev
    /// calls to pick up (spec §4.7 scenario 5, P8).
    #[instrument(skip(self, input_override))]
    pub async fn run_development_node(
        &self,
        node_id: &str,
        input_override: Option<Map<String, Value>>,
    ) -> Result<NodeOutput, EngineError> {
        let graph = self.graph.as_ref().ok_or_else(|| EngineError::UnknownNode(node_id.to_string()))?;
        let flow_node = graph.get(node_id).ok_or_else(|| EngineError::UnknownNode(node_id.to_string()))?;

        let mut merged = Map::new();
        for upstream in graph.upstream(node_id) {
            let key = queue::keys::dev_output_key(&upstream.id);
            if let Some(bytes) = self.backend.cache_get(&key).await? {
                if let Ok(cached) = serde_json::from_slice::<NodeOutput>(&bytes) {
                    for (k, v) in cached.data_map() {
                        merged.insert(k, v);
                    }
                }
            }
        }
        if let Some(overrides) = input_override {
            for (k, v) in overrides {
                merged.insert(k, v);
            }
        }
        let input = NodeOutput::data(merged);

        {
            let mut dev_initialized = self.dev_initialized.lock().await;
            if !dev_initialized.contains(node_id) {
                flow_node.node.init().await.map_err(|e| EngineError::Node {
                    node_id: node_id.to_string(),
                    message: e.to_string(),
                })?;
                dev_initialized.insert(node_id.to_string());
            }
        }

        let output = self.dispatcher.dispatch(&flow_node.node, &flow_node.config, input).await?;

        let key = queue::keys::dev_output_key(node_id);
        let payload = serde_json::to_vec(&output).map_err(|e| EngineError::Node {
            node_id: node_id.to_string(),
            message: e.to_string(),
        })?;
        self.backend.cache_set(&key, payload, None).await?;

        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::description::{EdgeDescription, NodeData, NodeDescription};
    use nodes::builtin;
    use queue::InMemoryBackend;
    use serde_json::json;

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

    fn linear_description() -> WorkflowDescription {
        WorkflowDescription {
            nodes: vec![
                node_desc("p", "mock-producer"),
                node_desc("b", "mock-blocking"),
                node_desc("n", "mock-non-blocking"),
            ],
            edges: vec![
                EdgeDescription { source: "p".into(), target: "b".into(), source_handle: None },
                EdgeDescription { source: "b".into(), target: "n".into(), source_handle: None },
            ],
        }
    }

    #[tokio::test]
    async fn load_constructs_one_runner_per_producer() {
        let mut engine = Engine::new(registry(), Arc::new(InMemoryBackend::new()));
        engine.load("wf-1", &linear_description()).unwrap();
        assert_eq!(engine.runners.len(), 1);
    }

    #[tokio::test]
    async fn run_production_drains_a_finite_producer() {
        let mut engine = Engine::new(registry(), Arc::new(InMemoryBackend::new()));
        engine.load("wf-1", &linear_description()).unwrap();
        engine.run_production().await.unwrap();
        assert_eq!(engine.tracker().status(), crate::tracker::WorkflowStatus::Succeeded);
    }

    #[tokio::test]
    async fn run_development_node_merges_upstream_cache_with_override_precedence() {
        let mut engine = Engine::new(registry(), Arc::new(InMemoryBackend::new()));
        let description = WorkflowDescription {
            nodes: vec![node_desc("a", "mock-producer"), node_desc("b", "mock-blocking")],
            edges: vec![EdgeDescription { source: "a".into(), target: "b".into(), source_handle: None }],
        };
        engine.load("wf-dev", &description).unwrap();

        let a_output = NodeOutput::data(Map::from_iter([
            ("x".to_string(), json!(1)),
            ("y".to_string(), json!("from-upstream")),
        ]));
        let key = queue::keys::dev_output_key("a");
        engine
            .backend
            .cache_set(&key, serde_json::to_vec(&a_output).unwrap(), None)
            .await
            .unwrap();

        let overrides = Map::from_iter([("y".to_string(), json!("from-override"))]);
        let out = engine.run_development_node("b", Some(overrides)).await.unwrap();

        assert_eq!(out.data_map()["x"], 1);
        assert_eq!(out.data_map()["y"], "from-override");
    }

    #[tokio::test]
    async fn run_development_node_caches_its_own_output_for_downstream_reads() {
        let mut engine = Engine::new(registry(), Arc::new(InMemoryBackend::new()));
        let description = WorkflowDescription {
            nodes: vec![node_desc("a", "mock-producer")],
            edges: vec![],
        };
        engine.load("wf-dev2", &description).unwrap();

        engine.run_development_node("a", None).await.unwrap();
        let cached = engine.backend.cache_get(&queue::keys::dev_output_key("a")).await.unwrap();
        assert!(cached.is_some());
    }

    #[tokio::test]
    async fn unknown_config_node_build_error_surfaces() {
        let mut engine = Engine::new(registry(), Arc::new(InMemoryBackend::new()));
        let description = WorkflowDescription {
            nodes: vec![node_desc("a", "not-a-real-type")],
            edges: vec![],
        };
        assert!(engine.load("wf-err", &description).is_err());
    }
}
