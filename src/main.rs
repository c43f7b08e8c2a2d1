use std::io::{self, BufRead, IsTerminal};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use chrono::Utc;
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use flowloom_core::config::AppConfig;
use flowloom_core::event::EventBus;
use flowloom_core::types::{truncate_chars, value_to_text, SessionId};

use flowloom_engine::{
    execution_order, run_with_fallback, ChatflowBackend, ExecutionResult, FlowDefinition,
    FlowExecutor, FlowGraph, HttpChatflowBackend, NodeRegistry, NodeStatus, ReviewDecision,
    RunLogger, RunStatus, SuspendedRun, SuspensionStore,
};

#[derive(Parser)]
#[command(name = "flowloom", version, about = "Flow graph execution engine with human review")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "flowloom.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a flow document
    Run {
        /// Flow document (JSON)
        flow: PathBuf,
        /// Run input; read from stdin when omitted
        #[arg(short, long)]
        input: Option<String>,
        /// Session ID (auto-generated if not provided)
        #[arg(short, long)]
        session: Option<String>,
        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
        /// Never delegate to the external chat-flow platform
        #[arg(long)]
        local: bool,
    },
    /// Answer the pending review of a suspended run
    Resume {
        /// Session ID of the suspended run
        session: String,
        #[arg(long, value_enum)]
        decision: DecisionArg,
        /// Replacement output for `edit` (JSON, or plain text)
        #[arg(long)]
        edited: Option<String>,
        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Check a flow document without running it
    Validate {
        /// Flow document (JSON)
        flow: PathBuf,
    },
    /// List suspended runs awaiting review
    Pending,
    /// Fail suspended runs whose review timed out
    Sweep,
    /// Show current configuration
    Config,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum DecisionArg {
    Approve,
    Reject,
    Edit,
}

impl DecisionArg {
    fn as_str(self) -> &'static str {
        match self {
            DecisionArg::Approve => "approve",
            DecisionArg::Reject => "reject",
            DecisionArg::Edit => "edit",
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("flowloom=info,warn")),
        )
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "flowloom", &mut io::stdout());
        return Ok(());
    }

    let config = AppConfig::load_or_default(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    match cli.command {
        Commands::Run {
            flow,
            input,
            session,
            json,
            local,
        } => {
            let definition = load_flow(&flow)?;
            let input = match input {
                Some(text) => text,
                None => read_stdin(),
            };
            let session_id = session.map(|s| SessionId::from_str(&s)).unwrap_or_default();
            let (executor, bus) = build_executor(&config);
            let logger = spawn_run_logger(&config, bus.as_ref(), &session_id);

            let backend = if local { None } else { delegation_backend(&config)? };
            let result = run_with_fallback(
                &executor,
                backend.as_ref().map(|b| b as &dyn ChatflowBackend),
                &definition,
                parse_value(input),
                Some(session_id),
            )
            .await;

            if result.is_suspended() {
                park(&config, &definition.graph, &result)?;
            }
            finish_logger(logger).await;
            print_result(&result, json)?;
            exit_on_failure(&result);
        }
        Commands::Resume {
            session,
            decision,
            edited,
            json,
        } => {
            let store = open_store(&config)?;
            let Some(run) = store.load(&session)? else {
                bail!("No suspended run for session {}", session);
            };
            let (executor, bus) = build_executor(&config);

            let result = if run.is_expired(Utc::now()) {
                warn!(session_id = %session, "Review expired before a decision arrived");
                store.delete(&session)?;
                executor.expire_review(run.context)
            } else {
                let decision =
                    ReviewDecision::from_parts(decision.as_str(), edited.map(parse_value))?;
                let logger = spawn_run_logger(&config, bus.as_ref(), &run.context.session_id);
                let snapshot = run.context.clone();
                let result = executor
                    .process_review_decision(&run.graph, snapshot, &run.review_node_id, decision)
                    .await;
                match (result.status, result.failure) {
                    // Refused decision: the stored snapshot stays as it was
                    (RunStatus::Suspended, Some(_)) => {}
                    (RunStatus::Suspended, None) => park(&config, &run.graph, &result)?,
                    _ => {
                        store.delete(&session)?;
                    }
                }
                finish_logger(logger).await;
                result
            };

            print_result(&result, json)?;
            exit_on_failure(&result);
        }
        Commands::Validate { flow } => {
            let definition = load_flow(&flow)?;
            let (executor, _) = build_executor(&config);
            let graph = &definition.graph;
            graph.validate_structure()?;
            for node in &graph.nodes {
                executor.registry().resolve(node)?;
            }
            let order = execution_order(graph)?;
            println!(
                "OK: {} nodes, {} edges",
                graph.nodes.len(),
                graph.edges.len()
            );
            println!("Order: {}", order.join(" -> "));
        }
        Commands::Pending => {
            let store = open_store(&config)?;
            let runs = store.list()?;
            if runs.is_empty() {
                println!("No suspended runs.");
            }
            for run in runs {
                let expires = run
                    .expires_at
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "never".to_string());
                println!(
                    "{}  node={}  since={}  expires={}  \"{}\"",
                    run.session_id,
                    run.review_node_id,
                    run.created_at.to_rfc3339(),
                    expires,
                    truncate_chars(&run.message, 60)
                );
            }
        }
        Commands::Sweep => {
            let store = open_store(&config)?;
            let (executor, _) = build_executor(&config);
            let expired = store.sweep_expired(Utc::now())?;
            for run in &expired {
                let result = executor.expire_review(run.context.clone());
                println!(
                    "{}: {}",
                    run.session_id,
                    result.error.as_deref().unwrap_or("review timed out")
                );
            }
            info!(count = expired.len(), "Sweep finished");
            println!("Expired {} suspended run(s).", expired.len());
        }
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
        Commands::Completions { .. } => unreachable!("handled before config load"),
    }

    Ok(())
}

fn load_flow(path: &Path) -> anyhow::Result<FlowDefinition> {
    FlowDefinition::load(path).with_context(|| format!("loading {}", path.display()))
}

fn build_executor(config: &AppConfig) -> (FlowExecutor, Option<Arc<EventBus>>) {
    let llm = flowloom_llm::build_client(config);
    let registry = Arc::new(NodeRegistry::with_builtins(llm, config));
    let executor =
        FlowExecutor::new(registry).with_preview_chars(config.engine.output_preview_chars);
    if config.engine.log_events {
        let bus = Arc::new(EventBus::default());
        (executor.with_event_bus(bus.clone()), Some(bus))
    } else {
        (executor, None)
    }
}

fn delegation_backend(config: &AppConfig) -> anyhow::Result<Option<HttpChatflowBackend>> {
    match &config.delegation {
        Some(d) if d.enabled => Ok(Some(HttpChatflowBackend::new(d)?)),
        _ => Ok(None),
    }
}

fn open_store(config: &AppConfig) -> anyhow::Result<SuspensionStore> {
    let path = config.suspension_db_path();
    SuspensionStore::open(&path).with_context(|| format!("opening {}", path.display()))
}

/// Persist a suspended result so `resume` can pick it up.
fn park(config: &AppConfig, graph: &FlowGraph, result: &ExecutionResult) -> anyhow::Result<()> {
    if !config.suspension.enabled {
        return Ok(());
    }
    if let Some(run) = SuspendedRun::from_result(graph, result) {
        open_store(config)?.save(&run)?;
        info!(session_id = %run.session_id, node_id = %run.review_node_id, "Suspended run saved");
    }
    Ok(())
}

type LoggerHandle = Option<(CancellationToken, tokio::task::JoinHandle<()>)>;

fn spawn_run_logger(
    config: &AppConfig,
    bus: Option<&Arc<EventBus>>,
    session_id: &SessionId,
) -> LoggerHandle {
    let (Some(dir), Some(bus)) = (config.log_dir(), bus) else {
        return None;
    };
    // Must subscribe before the run publishes RunStarted
    let rx = bus.subscribe();
    let cancel = CancellationToken::new();
    let logger = RunLogger::new(dir, 2);
    let handle = tokio::spawn(logger.run(rx, session_id.clone(), cancel.clone()));
    Some((cancel, handle))
}

async fn finish_logger(logger: LoggerHandle) {
    if let Some((cancel, mut handle)) = logger {
        // Runs that end without a terminal event (refused edits, delegated runs)
        if tokio::time::timeout(std::time::Duration::from_millis(500), &mut handle)
            .await
            .is_err()
        {
            cancel.cancel();
            handle.await.ok();
        }
    }
}

fn read_stdin() -> String {
    let stdin = io::stdin();
    if stdin.is_terminal() {
        return String::new();
    }
    stdin
        .lock()
        .lines()
        .map_while(|l| l.ok())
        .collect::<Vec<_>>()
        .join("\n")
}

/// JSON objects and arrays are passed through; anything else is text.
fn parse_value(text: String) -> Value {
    match serde_json::from_str::<Value>(&text) {
        Ok(v) if v.is_object() || v.is_array() => v,
        _ => Value::String(text),
    }
}

fn print_result(result: &ExecutionResult, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
        return Ok(());
    }

    for log in &result.node_execution_logs {
        let status = match log.status {
            NodeStatus::Success => "ok",
            NodeStatus::Error => "ERROR",
            NodeStatus::PendingReview => "review",
            NodeStatus::Skipped => "skipped",
        };
        eprintln!(
            "[{}: {}] {}ms {}",
            log.node_name,
            status,
            log.execution_time_ms,
            log.error.as_deref().or(log.output.as_deref()).unwrap_or("")
        );
    }

    match result.status {
        RunStatus::Completed => println!("{}", value_to_text(&result.output)),
        RunStatus::Suspended => {
            if let Some(review) = &result.pending_review {
                println!("Awaiting review at node {}: {}", review.node_id, review.message);
                let tentative = truncate_chars(&value_to_text(&review.output), 500);
                println!("Tentative output: {}", tentative);
                println!(
                    "Resume with: flowloom resume {} --decision approve|reject{}",
                    result.session_id,
                    if review.allow_edit { "|edit --edited <VALUE>" } else { "" }
                );
            }
            if let Some(error) = &result.error {
                eprintln!("Error: {}", error);
            }
        }
        RunStatus::Failed => {
            eprintln!("Run failed: {}", result.error.as_deref().unwrap_or("unknown error"));
        }
    }
    Ok(())
}

fn exit_on_failure(result: &ExecutionResult) {
    if !result.success {
        std::process::exit(1);
    }
}
