//! `engine` crate — the graph model, builder, post-processors, pool
//! dispatcher, flow runner, and orchestrating `Engine` that together form the
//! workflow execution core.

pub mod builder;
pub mod description;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod graph;
pub mod post_processors;
pub mod runner;
pub mod template;
pub mod tracker;

pub use builder::Builder;
pub use description::{EdgeDescription, NodeData, NodeDescription, WorkflowDescription};
pub use engine::Engine;
pub use error::EngineError;
pub use graph::{FlowGraph, FlowNode, QueueRole};
pub use runner::{FlowRunner, RunnerState};
pub use tracker::{Event, EventTracker, WorkflowStatus};
