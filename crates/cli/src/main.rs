//! Thin command-line front end: loads a templates directory into the
//! registry and exposes listing, planning, and no-op dry runs.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};

use flowpilot_engine::{merge, resolve, ChannelSink, NoopExecutor, Orchestrator, Registry};
use flowpilot_types::ExecutionEvent;

#[derive(Parser)]
#[command(name = "flowpilot", about = "Workflow template planning and execution", version)]
struct Cli {
    /// Directory holding workflow definition files.
    #[arg(long, global = true, default_value = "templates")]
    templates: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List registered workflows, optionally filtered by search query.
    List {
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        query: Option<String>,
    },
    /// Show one workflow definition as JSON.
    Show { workflow_id: String },
    /// Resolve and merge a plan without executing it.
    Plan {
        workflow_id: String,
        /// Field values, repeatable: --set field_id=value
        #[arg(long = "set", value_parser = parse_key_val)]
        values: Vec<(String, String)>,
        /// Confirmed facts for dependency questions: --fact field=true
        #[arg(long = "fact", value_parser = parse_key_val)]
        facts: Vec<(String, String)>,
    },
    /// Execute a plan against the no-op executor, streaming events.
    Run {
        workflow_id: String,
        #[arg(long = "set", value_parser = parse_key_val)]
        values: Vec<(String, String)>,
        #[arg(long = "fact", value_parser = parse_key_val)]
        facts: Vec<(String, String)>,
    },
}

fn parse_key_val(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw.split_once('=').ok_or_else(|| format!("expected key=value, got '{raw}'"))?;
    Ok((key.to_string(), value.to_string()))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut registry = Registry::new();
    registry
        .load_dir(&cli.templates)
        .with_context(|| format!("loading templates from {}", cli.templates.display()))?;

    match cli.command {
        Command::List { category, query } => list(&registry, category.as_deref(), query.as_deref()),
        Command::Show { workflow_id } => show(&registry, &workflow_id),
        Command::Plan {
            workflow_id,
            values,
            facts,
        } => plan(&registry, &workflow_id, values, facts),
        Command::Run {
            workflow_id,
            values,
            facts,
        } => run(&registry, &workflow_id, values, facts).await,
    }
}

fn init_tracing() {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into());
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

fn list(registry: &Registry, category: Option<&str>, query: Option<&str>) -> Result<()> {
    let definitions: Vec<_> = match query {
        Some(query) => registry.search(query, category),
        None => registry
            .list_all()
            .filter(|d| category.map_or(true, |c| d.category.eq_ignore_ascii_case(c)))
            .collect(),
    };
    for definition in definitions {
        println!(
            "{:<24} {:<14} {:>5}s  {}",
            definition.id, definition.category, definition.estimated_duration, definition.name
        );
    }
    Ok(())
}

fn show(registry: &Registry, workflow_id: &str) -> Result<()> {
    let definition = registry.get(workflow_id)?;
    println!("{}", serde_json::to_string_pretty(definition)?);
    Ok(())
}

fn build_plan(
    registry: &Registry,
    workflow_id: &str,
    values: Vec<(String, String)>,
    facts: Vec<(String, String)>,
) -> Result<flowpilot_types::ExecutionPlan> {
    let mut fact_map = Map::new();
    for (key, raw) in facts {
        let flag: bool = raw.parse().with_context(|| format!("fact '{key}' must be true or false"))?;
        fact_map.insert(key, Value::Bool(flag));
    }
    let mut value_map = Map::new();
    for (key, value) in values {
        value_map.insert(key, Value::String(value));
    }

    let chain = resolve(registry, workflow_id, &fact_map)?;
    let plan = merge(registry, &chain, &value_map)?;
    Ok(plan)
}

fn plan(registry: &Registry, workflow_id: &str, values: Vec<(String, String)>, facts: Vec<(String, String)>) -> Result<()> {
    let plan = build_plan(registry, workflow_id, values, facts)?;
    println!("{}", serde_json::to_string_pretty(&plan)?);
    Ok(())
}

async fn run(registry: &Registry, workflow_id: &str, values: Vec<(String, String)>, facts: Vec<(String, String)>) -> Result<()> {
    let plan = build_plan(registry, workflow_id, values, facts)?;

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let orchestrator = Orchestrator::new(Arc::new(NoopExecutor), Arc::new(ChannelSink::new(tx)));
    let execution_id = orchestrator.start(plan);
    println!("execution {execution_id}");

    let printer = tokio::spawn(async move {
        while let Some((_, event)) = rx.recv().await {
            match &event {
                ExecutionEvent::StepStarted { index, description, .. } => {
                    println!("  [{index}] {description}");
                }
                ExecutionEvent::Progress { percent } => println!("  progress {percent}%"),
                ExecutionEvent::Completed { status, summary, .. } => {
                    println!(
                        "done: {status} (passed {}, failed {}, skipped {})",
                        summary.passed, summary.failed, summary.skipped
                    );
                }
                _ => {}
            }
        }
    });

    let snapshot = orchestrator.join(&execution_id).await?;
    drop(orchestrator);
    let _ = printer.await;

    if snapshot.status != flowpilot_types::ExecutionStatus::Completed {
        anyhow::bail!("execution finished as {}", snapshot.status);
    }
    Ok(())
}
