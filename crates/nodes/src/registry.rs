//! Node Registry — maps type identifiers to node factories (spec §4.2).

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::traits::SharedConfig;
use crate::Node;

/// Errors raised while registering or instantiating node types.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("node type '{0}' is already registered")]
    DuplicateType(String),

    #[error("no node type registered for '{0}'")]
    UnknownType(String),

    #[error("failed to construct node '{node_id}' of type '{node_type}': {message}")]
    ConstructionFailed {
        node_id: String,
        node_type: String,
        message: String,
    },
}

/// A factory that turns a [`SharedConfig`] into a concrete node instance.
pub trait NodeFactory: Send + Sync {
    fn create(&self, config: SharedConfig) -> Result<Arc<dyn Node>, RegistryError>;
}

/// Blanket impl so a plain closure can act as a factory — handy for tests and
/// for registering built-ins without a dedicated struct per kind.
impl<F> NodeFactory for F
where
    F: Fn(SharedConfig) -> Result<Arc<dyn Node>, RegistryError> + Send + Sync,
{
    fn create(&self, config: SharedConfig) -> Result<Arc<dyn Node>, RegistryError> {
        (self)(config)
    }
}

/// Maps case-sensitive kebab-case type identifiers to factories.
///
/// Populated either by static registration at program start or by scanning a
/// known module set (spec §4.2); this crate only provides the former — the
/// `nodes::builtin::register_all` helper registers every built-in kind.
#[derive(Default)]
pub struct NodeRegistry {
    factories: HashMap<String, Arc<dyn NodeFactory>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under `type_id`. Duplicate registrations fail
    /// loudly (spec §4.2) rather than silently overwriting.
    pub fn register(
        &mut self,
        type_id: impl Into<String>,
        factory: impl NodeFactory + 'static,
    ) -> Result<(), RegistryError> {
        let type_id = type_id.into();
        if self.factories.contains_key(&type_id) {
            return Err(RegistryError::DuplicateType(type_id));
        }
        debug!(type_id = %type_id, "node type registered");
        self.factories.insert(type_id, Arc::new(factory));
        Ok(())
    }

    pub fn lookup(&self, type_id: &str) -> Option<Arc<dyn NodeFactory>> {
        self.factories.get(type_id).cloned()
    }

    /// Instantiate a node from its shared configuration.
    pub fn create(&self, config: SharedConfig) -> Result<Arc<dyn Node>, RegistryError> {
        let (node_id, node_type) = {
            let guard = config.read().expect("node config lock poisoned");
            (guard.id.clone(), guard.node_type.clone())
        };

        let factory = self
            .lookup(&node_type)
            .ok_or_else(|| RegistryError::UnknownType(node_type.clone()))?;

        debug!(node_id = %node_id, node_type = %node_type, "constructing node instance");
        factory.create(config).map_err(|e| match e {
            RegistryError::ConstructionFailed { message, .. } => RegistryError::ConstructionFailed {
                node_id,
                node_type,
                message,
            },
            other => other,
        })
    }

    pub fn is_registered(&self, type_id: &str) -> bool {
        self.factories.contains_key(type_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::MockNonBlocking;
    use crate::NodeConfig;
    use std::sync::RwLock;

    #[test]
    fn duplicate_registration_fails_loudly() {
        let mut registry = NodeRegistry::new();
        registry
            .register("mock-non-blocking", |cfg: SharedConfig| {
                Ok(Arc::new(MockNonBlocking::new(cfg)) as Arc<dyn Node>)
            })
            .unwrap();

        let err = registry
            .register("mock-non-blocking", |cfg: SharedConfig| {
                Ok(Arc::new(MockNonBlocking::new(cfg)) as Arc<dyn Node>)
            })
            .unwrap_err();

        assert!(matches!(err, RegistryError::DuplicateType(t) if t == "mock-non-blocking"));
    }

    #[test]
    fn unknown_type_is_rejected() {
        let registry = NodeRegistry::new();
        let config = Arc::new(RwLock::new(NodeConfig::new("n1", "does-not-exist")));
        let err = registry.create(config).unwrap_err();
        assert!(matches!(err, RegistryError::UnknownType(t) if t == "does-not-exist"));
    }
}
