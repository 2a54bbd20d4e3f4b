//! Node-level error type.

use thiserror::Error;

/// Error returned by a node's `init`, `run`, or `cleanup`.
///
/// The engine does not distinguish node failures by cause: every `NodeError`
/// is a node-level failure (spec §7) — the enclosing runner dead-letters the
/// payload, emits `nodeFailed`, and returns control to the producer.
/// Automatic retries are a declared non-goal.
#[derive(Debug, Error, Clone)]
#[error("{0}")]
pub struct NodeError(pub String);

impl NodeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<String> for NodeError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

impl From<&str> for NodeError {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}
