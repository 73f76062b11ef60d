use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use futures::future::BoxFuture;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use weft_core::config::{EngineConfig, StoreBackend};
use weft_core::execution::{ExecutionStatus, WorkflowExecutionEvent};
use weft_core::traits::AgentClient;
use weft_core::types::{AgentRequest, AgentResponse, CallerContext};
use weft_core::workflow::WorkflowDefinition;
use weft_core::{Value, WeftError};
use weft_engine::graph::validate_graph;
use weft_engine::WorkflowEngine;
use weft_tools::{HttpAgentClient, ToolRegistry};

#[derive(Parser)]
#[command(name = "weft", version, about = "Graph-based workflow execution engine")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "weft.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a workflow definition without storing it
    Validate {
        /// Definition file (.json or .toml)
        file: PathBuf,
    },
    /// Run a workflow definition once and print the final execution
    Run {
        /// Definition file (.json or .toml)
        file: PathBuf,
        /// Execution input as a JSON object
        #[arg(long, default_value = "{}")]
        input: String,
        #[arg(long, env = "WEFT_TENANT", default_value = "local")]
        tenant: String,
        #[arg(long, env = "WEFT_USER", default_value = "cli")]
        user: String,
    },
    /// Store a definition as a new draft version
    Import {
        /// Definition file (.json or .toml)
        file: PathBuf,
    },
    /// Make a version the active one of its workflow
    Activate {
        workflow_id: String,
        version_id: String,
    },
    /// List stored versions
    List {
        /// Only versions of this workflow
        workflow_id: Option<String>,
    },
}

/// Stand-in used when no `[agent]` section is configured; agent nodes fail.
struct UnconfiguredAgent;

impl AgentClient for UnconfiguredAgent {
    fn invoke(&self, request: AgentRequest) -> BoxFuture<'_, weft_core::Result<AgentResponse>> {
        Box::pin(async move {
            Err(WeftError::AgentRequest(format!(
                "node '{}' needs an agent but no [agent] section is configured",
                request.node_id
            )))
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("weft=info,warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    // Validation needs no config
    let command = match cli.command {
        Commands::Validate { file } => return validate_file(&file),
        other => other,
    };

    let config = if cli.config.exists() {
        EngineConfig::load(&cli.config)?
    } else {
        info!(path = %cli.config.display(), "No config file, using defaults");
        EngineConfig::default()
    };
    let engine = build_engine(&config)?;

    match command {
        Commands::Validate { file } => validate_file(&file),
        Commands::Run {
            file,
            input,
            tenant,
            user,
        } => run_file(&engine, &file, &input, CallerContext::new(tenant, user)).await,
        Commands::Import { file } => {
            warn_if_volatile(&config);
            let version = engine.create_workflow(load_definition(&file)?)?;
            println!("{}", serde_json::to_string_pretty(&version)?);
            Ok(())
        }
        Commands::Activate {
            workflow_id,
            version_id,
        } => {
            warn_if_volatile(&config);
            engine.activate_version(&workflow_id, &version_id)?;
            println!("{} is now the active version of {}", version_id, workflow_id);
            Ok(())
        }
        Commands::List { workflow_id } => {
            let versions = engine.list_versions(workflow_id.as_deref())?;
            if versions.is_empty() {
                println!("No versions stored.");
            }
            for v in versions {
                println!(
                    "{}  {:<24} v{:<6} {:<10} {}",
                    v.id, v.workflow_id, v.version, v.status, v.name
                );
            }
            Ok(())
        }
    }
}

fn validate_file(file: &Path) -> anyhow::Result<()> {
    let def = load_definition(file)?;
    validate_graph(&def.nodes, &def.edges, &def.start_node_id)?;
    println!(
        "{}: ok ({} nodes, {} edges)",
        file.display(),
        def.nodes.len(),
        def.edges.len()
    );
    Ok(())
}

fn build_engine(config: &EngineConfig) -> anyhow::Result<WorkflowEngine> {
    let agent: Arc<dyn AgentClient> = match &config.agent {
        Some(agent) => Arc::new(HttpAgentClient::new(agent.clone())?),
        None => Arc::new(UnconfiguredAgent),
    };
    Ok(WorkflowEngine::from_config(
        config,
        agent,
        ToolRegistry::with_builtins(),
    )?)
}

fn warn_if_volatile(config: &EngineConfig) {
    if config.store.backend == StoreBackend::Memory {
        warn!("The memory store keeps nothing after exit; set [store] backend = \"sqlite\"");
    }
}

fn load_definition(path: &Path) -> anyhow::Result<WorkflowDefinition> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let def = match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => toml::from_str(&content)
            .with_context(|| format!("Invalid workflow definition in {}", path.display()))?,
        _ => serde_json::from_str(&content)
            .with_context(|| format!("Invalid workflow definition in {}", path.display()))?,
    };
    Ok(def)
}

async fn run_file(
    engine: &WorkflowEngine,
    file: &Path,
    input: &str,
    caller: CallerContext,
) -> anyhow::Result<()> {
    let input: serde_json::Value =
        serde_json::from_str(input).context("--input must be a JSON value")?;
    let version = engine.create_workflow(load_definition(file)?)?;

    // Subscribe before starting so the first node_started is printed
    let mut rx = engine.subscribe();
    let execution = engine.start_execution(&version.id, Value::from(input), caller)?;
    let id = execution.id.clone();

    let finished = loop {
        tokio::select! {
            result = engine.wait_for_execution(&id) => break result?,
            event = rx.recv() => match event {
                Ok(event) if event.execution_id == id => print_event(&event),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "Event output lagged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    break engine.wait_for_execution(&id).await?;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                eprintln!("\n[interrupted, cancelling]");
                engine.cancel_execution(&id)?;
            }
        }
    };
    while let Ok(event) = rx.try_recv() {
        if event.execution_id == id {
            print_event(&event);
        }
    }

    println!("{}", serde_json::to_string_pretty(&finished)?);
    match finished.status {
        ExecutionStatus::Completed => Ok(()),
        status => match finished.error {
            Some(failure) => bail!("execution {}: {} ({})", status, failure.message, failure.kind),
            None => bail!("execution {}", status),
        },
    }
}

fn print_event(event: &WorkflowExecutionEvent) {
    let node = event.node_id.as_deref().unwrap_or("-");
    match event.metadata.duration_ms {
        Some(ms) => eprintln!("[{}] {} {} ({}ms)", event.seq, event.kind, node, ms),
        None => eprintln!("[{}] {} {}", event.seq, event.kind, node),
    }
}
