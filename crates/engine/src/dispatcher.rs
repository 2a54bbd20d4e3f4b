//! Pool Dispatcher — runs a node body on one of three execution substrates
//! (spec §4.5, §5, §9).
//!
//! The Runner never awaits a thread/process primitive directly; it always
//! goes through `dispatch`, so a deterministic in-process dispatcher could
//! stand in for tests if one is ever needed (spec §9).

use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::instrument;

use nodes::traits::SharedConfig;
use nodes::{Node, NodeConfig, NodeError, NodeOutput, PoolKind};

#[derive(Debug, Error)]
pub enum DispatchError {
    /// The node body itself returned an error — still a pool failure from
    /// the dispatcher's point of view, since `dispatch` is the single choke
    /// point callers see (spec §7 disposition table: both count as
    /// "node-level failure").
    #[error("node execution failed: {0}")]
    NodeFailed(#[from] NodeError),

    #[error("worker thread panicked")]
    WorkerPanicked,

    #[error("worker process failed: {0}")]
    WorkerFailed(String),

    #[error("serialization failed: {0}")]
    Serialization(String),
}

/// The `(node_type, config, input)` envelope shipped to a `process`-pool
/// worker over stdin, and the `NodeOutput` read back over stdout — the
/// `cli` crate's hidden `worker-exec` subcommand speaks this shape.
#[derive(Debug, Serialize, Deserialize)]
pub struct WorkerEnvelope {
    pub config: NodeConfig,
    pub input: NodeOutput,
}

/// Owns the lazily-used worker substrates. The `async` path needs nothing
/// extra — it runs on the caller's own task; `thread` rides Tokio's own
/// bounded blocking pool; `process` shells out to this binary's own
/// `worker-exec` subcommand.
pub struct PoolDispatcher {
    inflight: AtomicUsize,
}

impl PoolDispatcher {
    pub fn new() -> Self {
        Self {
            inflight: AtomicUsize::new(0),
        }
    }

    /// Run `node.run(input)` on the substrate it prefers.
    #[instrument(skip(self, node, config, input), fields(pool = ?node.pool()))]
    pub async fn dispatch(
        &self,
        node: &Arc<dyn Node>,
        config: &SharedConfig,
        input: NodeOutput,
    ) -> Result<NodeOutput, DispatchError> {
        self.inflight.fetch_add(1, Ordering::SeqCst);
        let result = match node.pool() {
            PoolKind::Async => node.run(input).await.map_err(DispatchError::from),
            PoolKind::Thread => self.dispatch_thread(node.clone(), input).await,
            PoolKind::Process => self.dispatch_process(config, input).await,
        };
        self.inflight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    /// Marshal the call onto one of Tokio's blocking-pool threads; the node
    /// body is still async, so the worker thread drives it with a fresh
    /// single-threaded runtime for the duration of this one call (spec
    /// §4.5).
    async fn dispatch_thread(&self, node: Arc<dyn Node>, input: NodeOutput) -> Result<NodeOutput, DispatchError> {
        let handle = tokio::task::spawn_blocking(move || {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("failed to build worker thread runtime");
            rt.block_on(node.run(input))
        });

        match handle.await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(node_err)) => Err(DispatchError::NodeFailed(node_err)),
            Err(_join_err) => Err(DispatchError::WorkerPanicked),
        }
    }

    /// Serialize `(node_type, config, input)`, spawn `current_exe()
    /// worker-exec`, write the envelope to stdin, read the `NodeOutput`
    /// back from stdout. External resources are reacquired inside the
    /// worker via `init` — they never traverse the process boundary (spec
    /// §4.5).
    async fn dispatch_process(&self, config: &SharedConfig, input: NodeOutput) -> Result<NodeOutput, DispatchError> {
        let node_config = config.read().expect("node config lock poisoned").clone();
        let envelope = WorkerEnvelope {
            config: node_config,
            input,
        };
        let payload =
            serde_json::to_vec(&envelope).map_err(|e| DispatchError::Serialization(e.to_string()))?;

        let exe = std::env::current_exe().map_err(|e| DispatchError::WorkerFailed(e.to_string()))?;
        let mut child = tokio::process::Command::new(exe)
            .arg("worker-exec")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| DispatchError::WorkerFailed(e.to_string()))?;

        let mut stdin = child.stdin.take().expect("child stdin was piped");
        stdin
            .write_all(&payload)
            .await
            .map_err(|e| DispatchError::WorkerFailed(e.to_string()))?;
        drop(stdin);

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| DispatchError::WorkerFailed(e.to_string()))?;

        if !output.status.success() {
            return Err(DispatchError::WorkerFailed(
                String::from_utf8_lossy(&output.stderr).into_owned(),
            ));
        }

        serde_json::from_slice(&output.stdout).map_err(|e| DispatchError::Serialization(e.to_string()))
    }

    /// Join both worker pools with a grace period; Tokio's blocking pool
    /// does not support hard cancellation, so past the grace period
    /// in-flight calls are abandoned rather than force-stopped.
    pub async fn shutdown(&self, grace: Duration) {
        let deadline = Instant::now() + grace;
        while self.inflight.load(Ordering::SeqCst) > 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

impl Default for PoolDispatcher {
    fn default() -> Self {
        Self::new()
    }
}
