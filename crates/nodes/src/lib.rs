//! `nodes` crate — the `Node` contract, `NodeOutput`/`NodeConfig` wire types,
//! the type registry, and a set of built-in nodes used in tests and demos.
//!
//! Every node kind — built-in or externally supplied — implements [`Node`].
//! The engine crate dispatches execution through this trait object; it never
//! knows about a node's concrete type.

pub mod builtin;
pub mod config;
pub mod error;
pub mod output;
pub mod registry;
pub mod traits;

pub use config::NodeConfig;
pub use error::NodeError;
pub use output::NodeOutput;
pub use registry::{NodeFactory, NodeRegistry, RegistryError};
pub use traits::{Node, NodeKind, PoolKind};
