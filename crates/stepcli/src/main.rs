// crates/stepcli/src/main.rs

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use stepcore::{param_map, ExecutionEvent, FlowSpec, NodeSpec, SharedStore};
use stepruntime::{load_flow, FlowRuntime, NodeRegistry, RuntimeConfig};
use tokio::sync::broadcast::{self, error::RecvError};

#[derive(Parser)]
#[command(name = "stepflow")]
#[command(about = "Step Flow CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a flow file
    Run {
        /// Path to flow JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Initial shared store as a JSON object
        #[arg(short, long)]
        shared: Option<String>,

        /// Runtime configuration JSON file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Validate a flow file by building its graph
    Validate {
        /// Path to flow JSON file
        file: PathBuf,
    },

    /// Print a flow as a Mermaid diagram
    Graph {
        /// Path to flow JSON file
        file: PathBuf,
    },

    /// List available node types
    Nodes,

    /// Create a new example flow
    Init {
        /// Output file path
        #[arg(short, long, default_value = "flow.json")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            file,
            shared,
            config,
            verbose,
        } => {
            // Initialize logging
            let level = if verbose {
                tracing::Level::DEBUG
            } else {
                tracing::Level::INFO
            };
            tracing_subscriber::fmt().with_max_level(level).init();

            let config = load_config(config.as_deref())?;
            run_flow(&file, shared.as_deref(), config, verbose).await?;
        }

        Commands::Validate { file } => {
            validate_flow(&file)?;
        }

        Commands::Graph { file } => {
            let spec = read_spec(&file)?;
            let flow = load_flow(&spec, &registry())?;
            println!("{}", flow.to_mermaid());
        }

        Commands::Nodes => {
            list_nodes();
        }

        Commands::Init { output } => {
            create_example_flow(&output)?;
        }
    }

    Ok(())
}

fn registry() -> NodeRegistry {
    stepnodes::standard_registry()
}

fn read_spec(file: &Path) -> Result<FlowSpec> {
    FlowSpec::from_path(file).with_context(|| format!("failed to read flow from {}", file.display()))
}

fn load_config(path: Option<&Path>) -> Result<RuntimeConfig> {
    let Some(path) = path else {
        return Ok(RuntimeConfig::default());
    };
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config from {}", path.display()))?;
    serde_json::from_str(&json).with_context(|| format!("invalid runtime config in {}", path.display()))
}

async fn run_flow(file: &Path, shared: Option<&str>, config: RuntimeConfig, verbose: bool) -> Result<()> {
    println!("🚀 Loading flow from: {}", file.display());

    let spec = read_spec(file)?;

    println!("📋 Flow: {}", spec.name);
    println!("   Nodes: {}", spec.nodes.len());
    println!("   Edges: {}", spec.edges.len());
    println!();

    let mut store: SharedStore = match shared {
        Some(json) => serde_json::from_str(json).context("--shared must be a JSON object")?,
        None => SharedStore::new(),
    };

    let runtime = FlowRuntime::with_registry(Arc::new(registry()), config);
    let flow = runtime.load(&spec)?;

    // Subscribe to events for real-time output
    let events = runtime.subscribe_events();
    let event_task = tokio::spawn(print_events(events, verbose));

    let result = runtime.execute(&flow, &mut store).await;

    // Closing the bus ends the listener once it has drained
    drop(runtime);
    if let Err(err) = event_task.await {
        tracing::warn!(error = %err, "event listener failed");
    }

    let result = result?;
    println!();
    println!("📊 Execution Summary:");
    println!("   Execution ID: {}", result.execution_id);
    println!("   Terminal action: {}", result.action);
    println!("   Duration: {}ms", result.duration_ms);
    println!();
    println!("📤 Shared store:");
    println!("{}", serde_json::to_string_pretty(&store)?);

    Ok(())
}

/// Print events until the bus closes, returning how many were printed.
async fn print_events(mut events: broadcast::Receiver<ExecutionEvent>, verbose: bool) -> usize {
    let mut printed = 0;
    loop {
        match events.recv().await {
            Ok(event) => {
                print_event(event, verbose);
                printed += 1;
            }
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "event listener lagged, some events were dropped");
            }
            Err(RecvError::Closed) => break,
        }
    }
    printed
}

fn print_event(event: ExecutionEvent, verbose: bool) {
    match event {
        ExecutionEvent::FlowStarted { flow, .. } => {
            println!("▶️  Flow '{}' started", flow);
        }
        ExecutionEvent::FlowCompleted { flow, action, duration_ms, .. } => match action {
            Some(action) => println!("✨ Flow '{}' finished with '{}' in {}ms", flow, action, duration_ms),
            None => println!("💥 Flow '{}' failed after {}ms", flow, duration_ms),
        },
        ExecutionEvent::NodeStarted { node, .. } => {
            println!("  ⚡ Starting node: {}", node);
        }
        ExecutionEvent::NodePrepared { node, input, .. } if verbose => {
            println!("     ℹ️  [{}] prep: {}", node, input);
        }
        ExecutionEvent::NodeExecuted { node, output, .. } if verbose => {
            println!("     ℹ️  [{}] exec: {}", node, output);
        }
        ExecutionEvent::NodeRetrying { node, attempt, error, wait_ms, .. } => {
            println!("     ⚠️  [{}] attempt {} failed: {} (retrying in {}ms)", node, attempt + 1, error, wait_ms);
        }
        ExecutionEvent::NodeFallback { node, attempts, error, .. } => {
            println!("     ⚠️  [{}] fallback after {} attempts: {}", node, attempts, error);
        }
        ExecutionEvent::NodeRouted { node, action, .. } => {
            println!("  ✅ Node {} -> {}", node, action);
        }
        ExecutionEvent::NodeFailed { node, error, .. } => {
            println!("  ❌ Node {} failed: {}", node, error);
        }
        _ => {}
    }
}

fn validate_flow(file: &Path) -> Result<()> {
    println!("🔍 Validating flow: {}", file.display());

    let spec = read_spec(file)?;
    let flow = load_flow(&spec, &registry())?;

    println!("✅ Flow is valid:");
    println!("   Name: {}", spec.name);
    println!("   Nodes: {}", flow.node_count());
    println!("   Edges: {}", spec.edges.len());

    Ok(())
}

fn list_nodes() {
    println!("📦 Available Node Types:");
    println!();

    let registry = registry();

    for node_type in registry.list_node_types() {
        if let Some(metadata) = registry.get_metadata(&node_type) {
            println!("  • {} ({})", node_type, metadata.category);
            println!("    {}", metadata.description);
            for config in &metadata.config {
                let marker = if config.required { "*" } else { " " };
                println!("      {}{}: {}", marker, config.name, config.description);
            }
            if !metadata.actions.is_empty() {
                println!("      actions: {}", metadata.actions.join(", "));
            }
        } else {
            println!("  • {}", node_type);
        }
    }
}

fn create_example_flow(output: &Path) -> Result<()> {
    let mut per_item = FlowSpec::new("Per Item");
    per_item.add_node(
        NodeSpec::new("collect", "shared.set")
            .with_name("Collect Item")
            .with_config("key", "processed")
            .with_config("from_param", "item")
            .with_config("append", true),
    );

    let mut spec = FlowSpec::new("Example Loop Flow");
    spec.description = Some("Counts to three, then processes a batch of items".to_string());

    let count = spec.add_node(
        NodeSpec::new("count", "control.counter")
            .with_name("Count")
            .with_config("key", "iterations")
            .with_config("limit", 3i64),
    );
    let log = spec.add_node(
        NodeSpec::new("log", "debug.log")
            .with_name("Log Counter")
            .with_config("key", "iterations")
            .with_config("message", "looping"),
    );
    let items = spec.add_node(NodeSpec::batch_flow(
        "items",
        per_item,
        vec![
            param_map([("item", "alpha")]),
            param_map([("item", "beta")]),
        ],
    ));

    spec.connect(&count, "continue", &log);
    spec.chain(&log, &count);
    spec.connect(&count, "done", &items);

    let json = serde_json::to_string_pretty(&spec)?;
    std::fs::write(output, json)?;

    println!("✨ Created example flow: {}", output.display());
    println!();
    println!("Run it with:");
    println!("  stepflow run --file {}", output.display());

    Ok(())
}
