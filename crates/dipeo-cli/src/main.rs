//! Command-line runner for the execution engine (spec §6 "CLI surface").
//!
//! Grounded on `langgraph-cli` (clap-derive `Cli`/`Commands`, one free
//! function per subcommand) adapted to this engine's async scheduler:
//! `#[tokio::main]` instead of `langgraph-cli`'s synchronous `main`, and
//! structured logging via `tracing_subscriber::fmt().with_env_filter(..)`
//! the way `orchestrator-server` initializes it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::Mutex;

use dipeo_checkpoint::{FileSnapshotStore, Snapshot, SnapshotStore};
use dipeo_core::conversation::ConversationStore;
use dipeo_core::diagram::CompiledDiagram;
use dipeo_core::event::{EventKind, EventBus};
use dipeo_core::{CancellationToken, ExecutionState, ExecutionStatus, RunOptions};
use dipeo_handlers::PendingResponses;
use dipeo_services::{llm::echo_cache, ApiKeyStore, FilesystemService, ServiceRegistry, SubDiagramLoader};

mod sub_diagram_loader;
use sub_diagram_loader::FileSubDiagramLoader;

#[derive(Parser)]
#[command(name = "dipeo")]
#[command(about = "Run and inspect DiPeO diagram executions", long_about = None)]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a compiled diagram to completion.
    Run {
        /// Path to a compiled-diagram JSON file.
        diagram: PathBuf,
        /// Initial variables as a JSON object (default: `{}`).
        #[arg(long)]
        variables: Option<String>,
        /// Directory snapshots are written to after the run.
        #[arg(long, default_value = ".dipeo/snapshots")]
        snapshot_dir: PathBuf,
        /// Working directory the `db`/`endpoint` file I/O handlers are rooted at.
        #[arg(long, default_value = ".")]
        workdir: PathBuf,
        /// Caps the number of node activations dispatched concurrently.
        #[arg(long)]
        max_parallel: Option<usize>,
    },

    /// Diagram format conversion. Out of scope for this engine.
    Convert {
        #[arg(value_name = "INPUT")]
        _input: PathBuf,
        #[arg(value_name = "OUTPUT")]
        _output: Option<PathBuf>,
    },

    /// Print per-node execution counts and token totals from a saved snapshot.
    Stats {
        /// The execution id passed to `run` (or printed by it on completion).
        execution_id: String,
        #[arg(long, default_value = ".dipeo/snapshots")]
        snapshot_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt().with_env_filter(rust_log).init();

    let cli = Cli::parse();

    let code = match cli.command {
        Commands::Run { diagram, variables, snapshot_dir, workdir, max_parallel } => {
            run_diagram(diagram, variables, snapshot_dir, workdir, max_parallel).await
        }
        Commands::Convert { .. } => {
            eprintln!(
                "out of scope: diagram format conversion is a transport/authoring concern, not an execution-engine responsibility"
            );
            1
        }
        Commands::Stats { execution_id, snapshot_dir } => print_stats(execution_id, snapshot_dir).await,
    };

    std::process::ExitCode::from(code)
}

async fn run_diagram(
    diagram_path: PathBuf,
    variables: Option<String>,
    snapshot_dir: PathBuf,
    workdir: PathBuf,
    max_parallel: Option<usize>,
) -> u8 {
    let diagram = match load_diagram(&diagram_path) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("failed to load diagram: {e}");
            return 1;
        }
    };

    let variables = match variables {
        Some(raw) => match serde_json::from_str(&raw) {
            Ok(v) => v,
            Err(e) => {
                eprintln!("--variables is not valid JSON: {e}");
                return 1;
            }
        },
        None => serde_json::json!({}),
    };

    let execution_id = uuid::Uuid::new_v4().to_string();
    tracing::info!(execution_id = %execution_id, diagram = %diagram_path.display(), "starting execution");

    let sub_diagrams: Arc<dyn SubDiagramLoader> =
        Arc::new(FileSubDiagramLoader::new(diagram_path.parent().unwrap_or_else(|| Path::new(".")).to_path_buf()));
    let services = Arc::new(ServiceRegistry::new(
        echo_cache(),
        FilesystemService::new(workdir),
        ApiKeyStore::new(diagram.api_keys.clone()),
        sub_diagrams,
    ));

    let events = EventBus::new();
    let conversations = Arc::new(Mutex::new(ConversationStore::new()));
    let pending_responses = Arc::new(PendingResponses::new());
    let registry = dipeo_handlers::build_default_registry(services, events.clone(), conversations, pending_responses.clone());
    let state = dipeo_core::ExecutionStateStore::new(events.clone());

    let cancellation = CancellationToken::new();
    let interrupt_token = cancellation.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("received interrupt, cancelling execution");
            interrupt_token.cancel();
        }
    });

    // Subscribed (and awaited) before the run starts so the printer never
    // races `scheduler::run`'s immediate `ExecutionStarted` publish.
    let subscription = events.subscribe(format!("cli:{execution_id}"), Some(execution_id.clone())).await;
    let printer_pending = pending_responses.clone();
    let printer = tokio::spawn(async move {
        while let Some(event) = subscription.recv().await {
            print_event(&event, &printer_pending).await;
            if matches!(event.kind, EventKind::ExecutionCompleted | EventKind::ExecutionFailed | EventKind::ExecutionAborted) {
                break;
            }
        }
    });

    let options = RunOptions { max_parallel, timeout_seconds: None, retry_policy: None };
    let run_result = dipeo_core::scheduler::run(
        &execution_id,
        Arc::new(diagram),
        registry,
        state.clone(),
        variables,
        options,
        cancellation,
        dipeo_handlers::template_fn::render_template,
    )
    .await;

    let _ = printer.await;

    let code = match &run_result {
        Err(dipeo_core::EngineError::Validation(message)) => {
            eprintln!("validation error: {message}");
            1
        }
        Err(e) => {
            eprintln!("runtime failure: {e}");
            2
        }
        Ok(()) => match state.get(&execution_id).await.map(|s| s.status) {
            Some(ExecutionStatus::Completed) => 0,
            Some(ExecutionStatus::Aborted) => 130,
            Some(ExecutionStatus::Failed) | None => 2,
            Some(ExecutionStatus::Running) => 2,
        },
    };

    if let Some(final_state) = state.get(&execution_id).await {
        if let Err(e) = save_snapshot(&snapshot_dir, &execution_id, &final_state).await {
            eprintln!("warning: failed to write snapshot: {e}");
        }
        println!("execution_id: {execution_id}");
        println!("status: {:?}", final_state.status);
        println!("tokens used: {}", final_state.token_usage_total.total());
    }

    code
}

async fn print_event(event: &dipeo_core::Event, pending: &Arc<PendingResponses>) {
    match event.kind {
        EventKind::ExecutionStarted => println!("[execution] started"),
        EventKind::NodeStarted => println!("[node {}] started", event.node_id.as_deref().unwrap_or("?")),
        EventKind::NodeCompleted => println!("[node {}] completed", event.node_id.as_deref().unwrap_or("?")),
        EventKind::NodeFailed => println!(
            "[node {}] failed: {}",
            event.node_id.as_deref().unwrap_or("?"),
            event.payload.get("error").and_then(|v| v.as_str()).unwrap_or("unknown error")
        ),
        EventKind::NodeRetry => println!("[node {}] retrying", event.node_id.as_deref().unwrap_or("?")),
        EventKind::ExecutionCompleted => println!("[execution] completed"),
        EventKind::ExecutionFailed => println!(
            "[execution] failed: {}",
            event.payload.get("error").and_then(|v| v.as_str()).unwrap_or("unknown error")
        ),
        EventKind::ExecutionAborted => println!("[execution] cancelled"),
        EventKind::TokenUsage => {}
        EventKind::InteractivePromptRequired => {
            let prompt = event.payload.get("prompt").and_then(|v| v.as_str()).unwrap_or("");
            let correlation_id = event.payload.get("correlation_id").and_then(|v| v.as_str()).unwrap_or("").to_string();
            println!("{prompt}");
            let pending = pending.clone();
            tokio::spawn(async move {
                let mut line = String::new();
                if std::io::stdin().read_line(&mut line).is_ok() {
                    pending.resolve(&correlation_id, serde_json::Value::String(line.trim().to_string())).await;
                }
            });
        }
        EventKind::InteractiveResponse => {}
    }
}

async fn save_snapshot(snapshot_dir: &Path, execution_id: &str, state: &ExecutionState) -> dipeo_checkpoint::Result<()> {
    let store = FileSnapshotStore::new(snapshot_dir);
    let data = serde_json::to_value(state).map_err(dipeo_checkpoint::CheckpointError::from)?;
    store.save(Snapshot::new(execution_id, data)).await
}

async fn print_stats(execution_id: String, snapshot_dir: PathBuf) -> u8 {
    let store = FileSnapshotStore::new(&snapshot_dir);
    let snapshot = match store.load(&execution_id).await {
        Ok(s) => s,
        Err(e) => {
            eprintln!("failed to load snapshot: {e}");
            return 1;
        }
    };

    let state: ExecutionState = match serde_json::from_value(snapshot.data) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("snapshot for '{execution_id}' is not a recognized execution-state shape: {e}");
            return 1;
        }
    };

    println!("execution_id: {}", state.execution_id);
    println!("status:       {:?}", state.status);
    println!();
    println!("{:<24} {:<10} {:<10} {:<10}", "node", "status", "execs", "tokens");
    println!("{}", "-".repeat(60));
    let mut node_ids: Vec<&String> = state.node_states.keys().collect();
    node_ids.sort();
    for node_id in node_ids {
        let node_state = &state.node_states[node_id];
        println!(
            "{:<24} {:<10} {:<10} {:<10}",
            node_id,
            node_state.status.map(|s| format!("{s:?}")).unwrap_or_else(|| "-".to_string()),
            node_state.exec_count,
            node_state.token_usage.total(),
        );
    }
    println!();
    println!("total tokens: {}", state.token_usage_total.total());
    0
}

fn load_diagram(path: &Path) -> anyhow::Result<CompiledDiagram> {
    let bytes = std::fs::read(path)?;
    let diagram: CompiledDiagram = serde_json::from_slice(&bytes)?;
    Ok(diagram)
}
