//! Built-in node kinds — one concrete type per [`NodeKind`], used by the
//! engine crate's tests and by the CLI's demo workflows.
//!
//! Generalized from a single `MockNode` test double (the shape the teacher
//! repo used for its executor tests) into one implementation per traversal
//! variant, since this engine's runner branches on `kind()` at decision
//! points the old linear executor never had to make.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::registry::{NodeFactory, NodeRegistry, RegistryError};
use crate::traits::SharedConfig;
use crate::{Node, NodeError, NodeKind, NodeOutput, PoolKind};

/// What a mock blocking/non-blocking/conditional node does when `run`.
#[derive(Clone)]
pub enum MockBehavior {
    /// Merge the given fields into the incoming input's data and return it.
    Merge(Map<String, Value>),
    /// Like `Merge`, but also sets the named branch label (conditional only).
    Route(String, Map<String, Value>),
    /// Always fail with this message.
    Fail(String),
}

fn merged_output(input: &NodeOutput, fields: &Map<String, Value>) -> NodeOutput {
    let mut data = input.data_map();
    for (k, v) in fields {
        data.insert(k.clone(), v.clone());
    }
    NodeOutput::data(data)
}

/// Records every input a mock node has been invoked with, for assertions.
#[derive(Default, Clone)]
pub struct CallLog(Arc<Mutex<Vec<NodeOutput>>>);

impl CallLog {
    fn record(&self, input: &NodeOutput) {
        self.0.lock().expect("call log poisoned").push(input.clone());
    }

    pub fn count(&self) -> usize {
        self.0.lock().expect("call log poisoned").len()
    }

    pub fn calls(&self) -> Vec<NodeOutput> {
        self.0.lock().expect("call log poisoned").clone()
    }
}

// ---------------------------------------------------------------------------
// MockProducer
// ---------------------------------------------------------------------------

/// A producer that replays a fixed script of outputs, then emits
/// `ExecutionCompleted` forever after (spec §4.6 scenario 1).
pub struct MockProducer {
    config: SharedConfig,
    script: Mutex<VecDeque<NodeOutput>>,
    pub calls: CallLog,
}

impl MockProducer {
    pub fn new(config: SharedConfig, script: Vec<NodeOutput>) -> Self {
        Self {
            config,
            script: Mutex::new(script.into()),
            calls: CallLog::default(),
        }
    }

    pub fn id(&self) -> String {
        self.config.read().expect("config lock poisoned").id.clone()
    }
}

#[async_trait]
impl Node for MockProducer {
    fn kind(&self) -> NodeKind {
        NodeKind::Producer
    }

    async fn run(&self, input: NodeOutput) -> Result<NodeOutput, NodeError> {
        self.calls.record(&input);
        let mut script = self.script.lock().expect("script lock poisoned");
        Ok(script.pop_front().unwrap_or_else(NodeOutput::execution_completed))
    }
}

// ---------------------------------------------------------------------------
// MockBlocking
// ---------------------------------------------------------------------------

/// A blocking node whose completion precedes its descendants in the same
/// iteration (spec §3, GLOSSARY).
pub struct MockBlocking {
    config: SharedConfig,
    behavior: MockBehavior,
    pub calls: CallLog,
}

impl MockBlocking {
    pub fn new(config: SharedConfig, behavior: MockBehavior) -> Self {
        Self {
            config,
            behavior,
            calls: CallLog::default(),
        }
    }

    pub fn id(&self) -> String {
        self.config.read().expect("config lock poisoned").id.clone()
    }
}

#[async_trait]
impl Node for MockBlocking {
    fn kind(&self) -> NodeKind {
        NodeKind::Blocking
    }

    async fn run(&self, input: NodeOutput) -> Result<NodeOutput, NodeError> {
        self.calls.record(&input);
        match &self.behavior {
            MockBehavior::Merge(fields) => Ok(merged_output(&input, fields)),
            MockBehavior::Route(_, fields) => Ok(merged_output(&input, fields)),
            MockBehavior::Fail(message) => Err(NodeError::new(message.clone())),
        }
    }
}

// ---------------------------------------------------------------------------
// MockNonBlocking
// ---------------------------------------------------------------------------

/// A node marking iteration end — its descendants, if any, are not executed
/// in the same iteration (spec §3, P5).
pub struct MockNonBlocking {
    config: SharedConfig,
    pub calls: CallLog,
}

impl MockNonBlocking {
    pub fn new(config: SharedConfig) -> Self {
        Self {
            config,
            calls: CallLog::default(),
        }
    }

    pub fn id(&self) -> String {
        self.config.read().expect("config lock poisoned").id.clone()
    }
}

#[async_trait]
impl Node for MockNonBlocking {
    fn kind(&self) -> NodeKind {
        NodeKind::NonBlocking
    }

    async fn run(&self, input: NodeOutput) -> Result<NodeOutput, NodeError> {
        self.calls.record(&input);
        Ok(merged_output(&input, &Map::new()))
    }
}

// ---------------------------------------------------------------------------
// MockConditional
// ---------------------------------------------------------------------------

/// A blocking node that also selects a branch label (spec §3, P6). The route
/// to emit is read fresh from `form.route` on every call so tests can change
/// it between iterations without rebuilding the graph.
pub struct MockConditional {
    config: SharedConfig,
    pub calls: CallLog,
}

impl MockConditional {
    pub fn new(config: SharedConfig) -> Self {
        Self {
            config,
            calls: CallLog::default(),
        }
    }

    pub fn id(&self) -> String {
        self.config.read().expect("config lock poisoned").id.clone()
    }

    /// Set the route this node will emit on its next `run` — test helper,
    /// mirrors how a real conditional node would derive `route` from `input`.
    pub fn set_route(&self, route: impl Into<String>) {
        let mut guard = self.config.write().expect("config lock poisoned");
        guard.set_form_field("route", Value::String(route.into()));
    }
}

#[async_trait]
impl Node for MockConditional {
    fn kind(&self) -> NodeKind {
        NodeKind::Conditional
    }

    async fn run(&self, input: NodeOutput) -> Result<NodeOutput, NodeError> {
        self.calls.record(&input);
        let route = self
            .config
            .read()
            .expect("config lock poisoned")
            .form_field("route")
            .and_then(Value::as_str)
            .unwrap_or("yes")
            .to_string();
        Ok(input.with_route(route))
    }
}

// ---------------------------------------------------------------------------
// MockQueueWriter / MockQueueReader
// ---------------------------------------------------------------------------

/// A blocking node that pushes its incoming data onto `form.queue_name`
/// (stamped in by the builder's `QueueMapper`) — the writer half of a
/// cross-loop queue pair (spec §4.1, §8 scenario 3).
pub struct MockQueueWriter {
    config: SharedConfig,
    backend: Arc<dyn queue::Backend>,
    pub calls: CallLog,
}

impl MockQueueWriter {
    pub fn new(config: SharedConfig, backend: Arc<dyn queue::Backend>) -> Self {
        Self {
            config,
            backend,
            calls: CallLog::default(),
        }
    }

    fn queue_name(&self) -> Option<String> {
        self.config
            .read()
            .expect("config lock poisoned")
            .form_field("queue_name")
            .and_then(Value::as_str)
            .map(str::to_string)
    }
}

#[async_trait]
impl Node for MockQueueWriter {
    fn kind(&self) -> NodeKind {
        NodeKind::Blocking
    }

    fn is_ready(&self, _strict: bool) -> Vec<String> {
        match self.queue_name() {
            Some(_) => Vec::new(),
            None => vec!["queue_name is not set".to_string()],
        }
    }

    async fn run(&self, input: NodeOutput) -> Result<NodeOutput, NodeError> {
        self.calls.record(&input);
        let queue_name = self.queue_name().ok_or_else(|| NodeError::new("queue_name is not set"))?;
        let payload = serde_json::to_vec(&input).map_err(|e| NodeError::new(e.to_string()))?;
        self.backend
            .push(&queue_name, payload)
            .await
            .map_err(|e| NodeError::new(e.to_string()))?;
        Ok(input)
    }
}

/// A blocking node that blocks-pops a single payload off `form.queue_name`
/// and forwards it downstream — the reader half of a cross-loop queue pair
/// (spec §4.1, §8 scenario 3).
pub struct MockQueueReader {
    config: SharedConfig,
    backend: Arc<dyn queue::Backend>,
    timeout_ms: u64,
    pub calls: CallLog,
}

impl MockQueueReader {
    pub fn new(config: SharedConfig, backend: Arc<dyn queue::Backend>, timeout_ms: u64) -> Self {
        Self {
            config,
            backend,
            timeout_ms,
            calls: CallLog::default(),
        }
    }

    fn queue_name(&self) -> Option<String> {
        self.config
            .read()
            .expect("config lock poisoned")
            .form_field("queue_name")
            .and_then(Value::as_str)
            .map(str::to_string)
    }
}

#[async_trait]
impl Node for MockQueueReader {
    fn kind(&self) -> NodeKind {
        NodeKind::Blocking
    }

    fn is_ready(&self, _strict: bool) -> Vec<String> {
        match self.queue_name() {
            Some(_) => Vec::new(),
            None => vec!["queue_name is not set".to_string()],
        }
    }

    async fn run(&self, input: NodeOutput) -> Result<NodeOutput, NodeError> {
        self.calls.record(&input);
        let queue_name = self.queue_name().ok_or_else(|| NodeError::new("queue_name is not set"))?;
        let payload = self
            .backend
            .pop(&queue_name, self.timeout_ms)
            .await
            .map_err(|e| NodeError::new(e.to_string()))?;
        match payload {
            Some(bytes) => serde_json::from_slice(&bytes).map_err(|e| NodeError::new(e.to_string())),
            None => Ok(input),
        }
    }
}

// ---------------------------------------------------------------------------
// Registration
// ---------------------------------------------------------------------------

struct ProducerFactory;
impl NodeFactory for ProducerFactory {
    fn create(&self, config: SharedConfig) -> Result<Arc<dyn Node>, RegistryError> {
        Ok(Arc::new(MockProducer::new(config, Vec::new())))
    }
}

struct BlockingFactory;
impl NodeFactory for BlockingFactory {
    fn create(&self, config: SharedConfig) -> Result<Arc<dyn Node>, RegistryError> {
        Ok(Arc::new(MockBlocking::new(config, MockBehavior::Merge(Map::new()))))
    }
}

struct NonBlockingFactory;
impl NodeFactory for NonBlockingFactory {
    fn create(&self, config: SharedConfig) -> Result<Arc<dyn Node>, RegistryError> {
        Ok(Arc::new(MockNonBlocking::new(config)))
    }
}

struct ConditionalFactory;
impl NodeFactory for ConditionalFactory {
    fn create(&self, config: SharedConfig) -> Result<Arc<dyn Node>, RegistryError> {
        Ok(Arc::new(MockConditional::new(config)))
    }
}

/// Register every built-in demo/test node kind under its kebab-case type id.
pub fn register_all(registry: &mut NodeRegistry) -> Result<(), RegistryError> {
    registry.register("mock-producer", ProducerFactory)?;
    registry.register("mock-blocking", BlockingFactory)?;
    registry.register("mock-non-blocking", NonBlockingFactory)?;
    registry.register("mock-conditional", ConditionalFactory)?;
    Ok(())
}

struct QueueWriterFactory(Arc<dyn queue::Backend>);
impl NodeFactory for QueueWriterFactory {
    fn create(&self, config: SharedConfig) -> Result<Arc<dyn Node>, RegistryError> {
        Ok(Arc::new(MockQueueWriter::new(config, self.0.clone())))
    }
}

struct QueueReaderFactory(Arc<dyn queue::Backend>, u64);
impl NodeFactory for QueueReaderFactory {
    fn create(&self, config: SharedConfig) -> Result<Arc<dyn Node>, RegistryError> {
        Ok(Arc::new(MockQueueReader::new(config, self.0.clone(), self.1)))
    }
}

/// Register the queue-backed writer/reader pair under a concrete `Backend` —
/// kept separate from `register_all` since, unlike the other built-ins, these
/// two need a backend handle at construction time (spec §8 scenario 3).
pub fn register_queue_nodes(
    registry: &mut NodeRegistry,
    backend: Arc<dyn queue::Backend>,
    reader_timeout_ms: u64,
) -> Result<(), RegistryError> {
    registry.register("mock-queue-writer", QueueWriterFactory(backend.clone()))?;
    registry.register("mock-queue-reader", QueueReaderFactory(backend, reader_timeout_ms))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NodeConfig;
    use serde_json::json;
    use std::sync::RwLock;

    fn config(id: &str, node_type: &str) -> SharedConfig {
        Arc::new(RwLock::new(NodeConfig::new(id, node_type)))
    }

    #[tokio::test]
    async fn producer_replays_script_then_completes() {
        let producer = MockProducer::new(
            config("p", "mock-producer"),
            vec![NodeOutput::data(Map::from_iter([("i".to_string(), json!(1))]))],
        );

        let first = producer.run(NodeOutput::empty()).await.unwrap();
        assert_eq!(first.data_map()["i"], 1);

        let second = producer.run(NodeOutput::empty()).await.unwrap();
        assert!(second.is_execution_completed());

        assert_eq!(producer.calls.count(), 2);
    }

    #[tokio::test]
    async fn blocking_merges_fields_into_input() {
        let node = MockBlocking::new(
            config("b", "mock-blocking"),
            MockBehavior::Merge(Map::from_iter([("seen".to_string(), json!(true))])),
        );
        let input = NodeOutput::data(Map::from_iter([("i".to_string(), json!(1))]));
        let out = node.run(input).await.unwrap();
        assert_eq!(out.data_map()["i"], 1);
        assert_eq!(out.data_map()["seen"], true);
    }

    #[tokio::test]
    async fn conditional_emits_configured_route() {
        let node = MockConditional::new(config("c", "mock-conditional"));
        node.set_route("no");
        let out = node.run(NodeOutput::empty()).await.unwrap();
        assert_eq!(out.route(), Some("no"));
    }

    #[test]
    fn register_all_is_idempotent_guarded() {
        let mut registry = NodeRegistry::new();
        register_all(&mut registry).unwrap();
        assert!(registry.is_registered("mock-producer"));
        assert!(register_all(&mut registry).is_err());
    }

    #[tokio::test]
    async fn queue_writer_then_reader_round_trips_a_payload() {
        let backend: Arc<dyn queue::Backend> = Arc::new(queue::InMemoryBackend::new());

        let writer_config = config("w", "mock-queue-writer");
        writer_config.write().unwrap().set_form_field("queue_name", json!("queue_w_r"));
        let writer = MockQueueWriter::new(writer_config, backend.clone());

        let reader_config = config("r", "mock-queue-reader");
        reader_config.write().unwrap().set_form_field("queue_name", json!("queue_w_r"));
        let reader = MockQueueReader::new(reader_config, backend.clone(), 50);

        let input = NodeOutput::data(Map::from_iter([("i".to_string(), json!(7))]));
        writer.run(input.clone()).await.unwrap();

        let forwarded = reader.run(NodeOutput::empty()).await.unwrap();
        assert_eq!(forwarded.data_map()["i"], 7);
    }

    #[tokio::test]
    async fn queue_writer_without_queue_name_fails_readiness_and_run() {
        let backend: Arc<dyn queue::Backend> = Arc::new(queue::InMemoryBackend::new());
        let writer = MockQueueWriter::new(config("w", "mock-queue-writer"), backend);
        assert!(!writer.is_ready(false).is_empty());
        assert!(writer.run(NodeOutput::empty()).await.is_err());
    }

    #[test]
    fn register_queue_nodes_adds_writer_and_reader_types() {
        let mut registry = NodeRegistry::new();
        let backend: Arc<dyn queue::Backend> = Arc::new(queue::InMemoryBackend::new());
        register_queue_nodes(&mut registry, backend, 50).unwrap();
        assert!(registry.is_registered("mock-queue-writer"));
        assert!(registry.is_registered("mock-queue-reader"));
    }
}
