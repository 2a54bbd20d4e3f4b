//! `rusty-automation-tool` CLI entry-point.
//!
//! Available sub-commands:
//! - `run`         — load a workflow and run every producer to exhaustion.
//! - `dev`         — run a single node once against cached upstream output.
//! - `validate`    — build + post-process a workflow without running it.
//! - `worker-exec` — hidden; the `process` pool's worker body.

use std::io::Read as _;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;

use engine::{Engine, WorkflowDescription};
use nodes::{builtin, Node, NodeRegistry};
use queue::{Backend, InMemoryBackend, RedisBackend};

#[derive(Parser)]
#[command(
    name = "rusty-automation-tool",
    about = "Concurrent workflow orchestration engine",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load a workflow and run every producer concurrently to exhaustion.
    Run {
        /// Path to the workflow JSON file.
        path: PathBuf,
    },
    /// Run a single node once, against its upstream neighbours' cached
    /// output plus any `--input` override.
    Dev {
        /// Path to the workflow JSON file.
        path: PathBuf,
        /// Id of the node to run.
        node_id: String,
        /// JSON object merged over (and taking precedence over) the
        /// resolved upstream input.
        #[arg(long)]
        input: Option<String>,
    },
    /// Build and post-process a workflow without running it; reports the
    /// discovered producers and any readiness violations.
    Validate {
        /// Path to the workflow JSON file.
        path: PathBuf,
    },
    /// Hidden: the `process` pool's worker body. Reads a `WorkerEnvelope`
    /// from stdin, runs the node once, writes the resulting `NodeOutput` to
    /// stdout.
    #[command(hide = true)]
    WorkerExec,
}

fn build_registry(backend: Arc<dyn Backend>) -> anyhow::Result<NodeRegistry> {
    let mut registry = NodeRegistry::new();
    builtin::register_all(&mut registry)?;
    builtin::register_queue_nodes(&mut registry, backend, 5_000)?;
    Ok(registry)
}

async fn resolve_backend() -> anyhow::Result<Arc<dyn Backend>> {
    match std::env::var("REDIS_URL") {
        Ok(url) => {
            info!(%url, "connecting to Redis backend");
            Ok(Arc::new(RedisBackend::connect(&url).await?))
        }
        Err(_) => {
            info!("no REDIS_URL set; using the in-memory backend");
            Ok(Arc::new(InMemoryBackend::new()))
        }
    }
}

fn load_description(path: &PathBuf) -> anyhow::Result<WorkflowDescription> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

fn workflow_id_from_path(path: &PathBuf) -> String {
    path.file_stem().and_then(|s| s.to_str()).unwrap_or("workflow").to_string()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run { path } => {
            let description = load_description(&path)?;
            let backend = resolve_backend().await?;
            let registry = build_registry(backend.clone())?;

            let mut engine = Engine::new(registry, backend);
            engine.load(workflow_id_from_path(&path), &description)?;
            let engine = Arc::new(engine);

            let running = engine.clone();
            let mut run = tokio::spawn(async move { running.run_production().await });

            tokio::select! {
                result = &mut run => {
                    result??;
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Ctrl-C received; stopping all runners");
                    engine.stop_all();
                    run.await??;
                }
            }
        }
        Command::Dev { path, node_id, input } => {
            let description = load_description(&path)?;
            let backend = resolve_backend().await?;
            let registry = build_registry(backend.clone())?;

            let mut engine = Engine::new(registry, backend);
            engine.load(workflow_id_from_path(&path), &description)?;

            let input_override = input.map(|raw| serde_json::from_str(&raw)).transpose()?;
            let output = engine.run_development_node(&node_id, input_override).await?;
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        Command::Validate { path } => {
            let description = load_description(&path)?;
            let backend: Arc<dyn Backend> = Arc::new(InMemoryBackend::new());
            let registry = build_registry(backend.clone())?;

            let mut engine = Engine::new(registry, backend);
            match engine.load(workflow_id_from_path(&path), &description) {
                Ok(()) => {
                    let producers: Vec<&str> = engine
                        .graph()
                        .map(|g| g.producers().into_iter().map(|n| n.id.as_str()).collect())
                        .unwrap_or_default();
                    println!("workflow is valid; producers: {producers:?}");
                }
                Err(e) => {
                    eprintln!("validation failed: {e}");
                    std::process::exit(1);
                }
            }
        }
        Command::WorkerExec => {
            let mut raw = String::new();
            std::io::stdin().read_to_string(&mut raw)?;
            let envelope: engine::dispatcher::WorkerEnvelope = serde_json::from_str(&raw)?;

            let backend: Arc<dyn Backend> = Arc::new(InMemoryBackend::new());
            let registry = build_registry(backend)?;
            let config = Arc::new(std::sync::RwLock::new(envelope.config));
            let node = registry.create(config)?;

            node.init().await?;
            let output = node.run(envelope.input).await?;
            println!("{}", serde_json::to_string(&output)?);
        }
    }

    Ok(())
}
