//! `NodeConfig` — the immutable per-instance configuration a factory receives.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Configuration for a single node instance, as produced by the builder from
/// a workflow description (spec §3, §6).
///
/// `form` holds the fields a node's own validation/readiness logic cares
/// about (and what the template renderer scans before a non-producer node's
/// `run`); `config` is an opaque bag a node implementation may use for
/// anything else.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Unique identifier within the owning workflow.
    pub id: String,
    /// Maps to a registered node factory's type identifier.
    pub node_type: String,
    /// User-facing form fields (string keys, arbitrary JSON values).
    pub form: Map<String, Value>,
    /// Opaque configuration not surfaced to the form layer.
    pub config: Map<String, Value>,
}

impl NodeConfig {
    pub fn new(id: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            form: Map::new(),
            config: Map::new(),
        }
    }

    pub fn with_form(mut self, form: Map<String, Value>) -> Self {
        self.form = form;
        self
    }

    pub fn with_config(mut self, config: Map<String, Value>) -> Self {
        self.config = config;
        self
    }

    /// Read a single form field, if present.
    pub fn form_field(&self, key: &str) -> Option<&Value> {
        self.form.get(key)
    }

    /// Set (or overwrite) a single form field — used by `QueueMapper` to
    /// stamp synthesized queue names into both sides of a writer/reader pair.
    pub fn set_form_field(&mut self, key: impl Into<String>, value: Value) {
        self.form.insert(key.into(), value);
    }
}
