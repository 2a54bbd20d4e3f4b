//! Engine-level error taxonomy (spec §7).
//!
//! Load-time errors (`Build`/`Validation`) bubble to the caller. Runtime
//! node-level failures (`Template`, `Dispatch`, `Backend`, `Node`,
//! `Traversal`, `Timeout`) are always contained inside the runner — they
//! never escape as an `EngineError` except when surfaced through
//! `Engine::run_development_node`, which propagates them unchanged.

use thiserror::Error;

use crate::builder::BuildError;
use crate::post_processors::ValidationError;
use crate::template::TemplateError;
use nodes::registry::RegistryError;
use queue::BackendError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error("dispatch failed: {0}")]
    Dispatch(#[from] crate::dispatcher::DispatchError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("node '{node_id}' failed: {message}")]
    Node { node_id: String, message: String },

    #[error("traversal error at node '{node_id}': unknown branch label '{label}'")]
    Traversal { node_id: String, label: String },

    #[error("operation on node '{node_id}' timed out")]
    Timeout { node_id: String },

    #[error("node registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("node '{0}' not found in the graph")]
    UnknownNode(String),
}
