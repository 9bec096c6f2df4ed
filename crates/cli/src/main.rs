use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result, anyhow, bail};
use clap::{Args, Parser, Subcommand};
use serde_json::json;
use stepline_engine::{Engine, EngineOptions, ExecutionContext, TracingObserver, parse_workflow_file};
use stepline_types::RunStatus;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod prompts;
mod remote;
mod services;
mod store;

use prompts::TerminalPrompts;
use remote::{ModelEndpoint, RemoteClient};
use services::LocalServices;
use store::DirectoryStore;

#[derive(Debug, Parser)]
#[command(name = "stepline", version, about = "Run YAML workflows from the terminal")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Execute a workflow and print its final variables as JSON
    Run(RunArgs),
    /// Parse a workflow and print its node order and edges
    Validate(ValidateArgs),
}

#[derive(Debug, Args)]
struct RunArgs {
    /// Path to the workflow YAML file
    file: PathBuf,
    /// Workflow to run when the file holds several
    #[arg(long)]
    name: Option<String>,
    /// Initial variable, repeatable
    #[arg(long = "var", value_name = "KEY=VALUE", value_parser = parse_var)]
    vars: Vec<(String, String)>,
    /// Directory backing file nodes (defaults to $STEPLINE_ROOT, then the current directory)
    #[arg(long)]
    root: Option<PathBuf>,
    /// Write the run history as JSON to this path
    #[arg(long)]
    history_out: Option<PathBuf>,
    /// Answer every prompt with its default
    #[arg(long)]
    yes: bool,
    /// Include step outputs in progress logs
    #[arg(long)]
    log_values: bool,
    /// Keep previous revisions of files written by the run
    #[arg(long)]
    keep_history: bool,
}

#[derive(Debug, Args)]
struct ValidateArgs {
    /// Path to the workflow YAML file
    file: PathBuf,
    /// Workflow to validate when the file holds several
    #[arg(long)]
    name: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => run(args).await,
        Command::Validate(args) => validate(&args),
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(log_filter(std::env::var("RUST_LOG").ok().as_deref()))
        .with_writer(std::io::stderr)
        .try_init();
}

/// `RUST_LOG` directives, defaulting to `info`.
fn log_filter(directives: Option<&str>) -> EnvFilter {
    EnvFilter::new(directives.filter(|directives| !directives.trim().is_empty()).unwrap_or("info"))
}

fn parse_var(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw.split_once('=').ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("missing variable name in '{raw}'"));
    }
    Ok((key.to_string(), value.to_string()))
}

fn store_root(explicit: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(root) = explicit {
        return Ok(root);
    }
    if let Some(root) = std::env::var_os("STEPLINE_ROOT").filter(|root| !root.is_empty()) {
        return Ok(PathBuf::from(root));
    }
    std::env::current_dir().context("resolve current directory")
}

async fn run(args: RunArgs) -> Result<()> {
    let workflow = parse_workflow_file(&args.file, args.name.as_deref())?;
    let workflow_ref = args.file.display().to_string();
    let workflow_dir = args.file.parent().map(Path::to_path_buf).unwrap_or_default();

    let remote = RemoteClient::new(ModelEndpoint::from_env())?;
    if !remote.has_model() {
        info!("no AI model configured; command nodes will fail");
    }
    let root = store_root(args.root)?;
    info!(root = %root.display(), "using file store");
    let services = LocalServices::new(DirectoryStore::new(root), remote, workflow_dir).with_edit_history(args.keep_history);

    let engine = Engine::new(Arc::new(services))
        .with_prompts(Arc::new(TerminalPrompts::stdin(args.yes)))
        .with_observer(Arc::new(TracingObserver))
        .with_options(EngineOptions {
            log_values: args.log_values,
            ..EngineOptions::default()
        });

    let handle = engine.spawn(Arc::new(workflow), workflow_ref, ExecutionContext::with_variables(args.vars));
    let abort = handle.abort_signal();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling run");
            abort.cancel();
        }
    });

    let outcome = handle.wait().await.context("run task failed")?;
    println!("{}", serde_json::to_string_pretty(outcome.variables.variables())?);

    if let Some(path) = &args.history_out {
        let history = serde_json::to_string_pretty(&outcome.history)?;
        tokio::fs::write(path, history)
            .await
            .with_context(|| format!("write history to {}", path.display()))?;
    }

    match outcome.status {
        RunStatus::Completed => Ok(()),
        RunStatus::Cancelled => bail!("run cancelled"),
        status => Err(outcome
            .error
            .map(anyhow::Error::from)
            .unwrap_or_else(|| anyhow!("run ended in state {}", status.as_str()))),
    }
}

fn validate(args: &ValidateArgs) -> Result<()> {
    let workflow = parse_workflow_file(&args.file, args.name.as_deref())?;
    let summary = json!({
        "name": workflow.name,
        "order": workflow.order().collect::<Vec<_>>(),
        "edges": workflow.edges(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_variable_assignments() {
        assert_eq!(parse_var("city=Paris").unwrap(), ("city".to_string(), "Paris".to_string()));
        assert_eq!(parse_var("query=a=b").unwrap(), ("query".to_string(), "a=b".to_string()));
        assert!(parse_var("novalue").is_err());
        assert!(parse_var("=x").is_err());
    }

    #[test]
    fn cli_accepts_run_and_validate() {
        let cli = Cli::try_parse_from(["stepline", "run", "flow.yaml", "--var", "a=1", "--var", "b=2", "--yes"]).unwrap();
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.vars.len(), 2);
        assert!(args.yes);

        let cli = Cli::try_parse_from(["stepline", "validate", "flow.yaml", "--name", "main"]).unwrap();
        assert!(matches!(cli.command, Command::Validate(ValidateArgs { name: Some(_), .. })));
    }

    #[test]
    fn rust_log_directives_control_verbosity() {
        use tracing::level_filters::LevelFilter;

        assert_eq!(log_filter(Some("debug")).max_level_hint(), Some(LevelFilter::DEBUG));
        assert_eq!(log_filter(Some("stepline_engine=trace")).max_level_hint(), Some(LevelFilter::TRACE));
        assert_eq!(log_filter(None).max_level_hint(), Some(LevelFilter::INFO));
    }

    #[test]
    fn explicit_root_wins() {
        assert_eq!(store_root(Some(PathBuf::from("/data"))).unwrap(), PathBuf::from("/data"));
    }
}
