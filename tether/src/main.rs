//! `tether` command-line entry point.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::thread;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use tether::agent::{Agent, AgentEvent, RunOutcome};
use tether::core::cancel::CancelToken;
use tether::exit_codes;
use tether::io::audit::{AuditLog, new_session_id};
use tether::io::config::{TetherConfig, load_config};
use tether::io::context::WorkspaceContext;
use tether::io::model::HttpModelClient;
use tether::io::snapshot::{GitSnapshots, Snapshotter};
use tether::io::tools::Toolbox;
use tether::logging;

const DEFAULT_CONFIG_FILE: &str = "tether.toml";

#[derive(Parser)]
#[command(
    name = "tether",
    version,
    about = "Model-driven agent loop with safety gates, snapshots, and an audit log"
)]
struct Cli {
    /// Workspace root every tool path is resolved against.
    #[arg(short, long, global = true, default_value = ".")]
    workspace: PathBuf,
    /// Config file (defaults to `<workspace>/tether.toml`).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the agent loop until the model declares the task done.
    Run {
        /// Natural-language task.
        task: String,
        /// Model to use (must be in `model.allowed_models`).
        #[arg(short, long)]
        model: Option<String>,
        /// Only print the final outcome.
        #[arg(short, long)]
        quiet: bool,
    },
    /// Restore the most recent snapshot and drop it from the stack.
    Undo,
    /// List snapshots, most recent first.
    Snapshots {
        /// Drop every snapshot instead of listing them. Workspace files are untouched.
        #[arg(long)]
        clear: bool,
    },
    /// Inspect configuration.
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Load and validate the config file.
    Validate,
}

fn main() -> ExitCode {
    logging::init();
    let cli = Cli::parse();
    match dispatch(cli) {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(exit_codes::INVALID as u8)
        }
    }
}

fn dispatch(cli: Cli) -> Result<u8> {
    let root = cli
        .workspace
        .canonicalize()
        .with_context(|| format!("resolve workspace {}", cli.workspace.display()))?;
    let config_path = cli
        .config
        .unwrap_or_else(|| root.join(DEFAULT_CONFIG_FILE));
    let config = load_config(&config_path)?;

    let code = match cli.command {
        Command::Run { task, model, quiet } => {
            cmd_run(&root, &config, &task, model.as_deref(), quiet)?
        }
        Command::Undo => cmd_undo(&root, &config)?,
        Command::Snapshots { clear } => cmd_snapshots(&root, &config, clear)?,
        Command::Config {
            command: ConfigCommand::Validate,
        } => {
            println!("{}: ok", config_path.display());
            exit_codes::OK
        }
    };
    Ok(code as u8)
}

fn cmd_run(
    root: &Path,
    config: &TetherConfig,
    task: &str,
    model: Option<&str>,
    quiet: bool,
) -> Result<i32> {
    let model_name = model.unwrap_or(config.model.default_model.as_str());
    let log_dir = config.audit.resolve_log_dir(root);
    let context = WorkspaceContext::load(root)?;
    let client = HttpModelClient::from_config(&config.model)?;
    let snapshots = GitSnapshots::open(root, &log_dir)?;
    let audit = AuditLog::new(&log_dir, new_session_id());
    let cancel = CancelToken::new();
    listen_for_interrupt(cancel.clone());

    let agent = Agent {
        root,
        config,
        model_name,
        model: &client,
        tools: &Toolbox,
        snapshots: &snapshots,
        audit: &audit,
        context: &context,
        cancel: &cancel,
    };
    let outcome = agent.run(task, |event| {
        if !quiet {
            print_event(event);
        }
    })?;
    print_outcome(&outcome);
    Ok(exit_codes::for_termination(&outcome.termination))
}

fn cmd_undo(root: &Path, config: &TetherConfig) -> Result<i32> {
    let snapshots = GitSnapshots::open(root, &config.audit.resolve_log_dir(root))?;
    let restored = snapshots.undo()?;
    println!(
        "restored {} ({}) from {}",
        restored.id, restored.message, restored.created_at
    );
    Ok(exit_codes::OK)
}

fn cmd_snapshots(root: &Path, config: &TetherConfig, clear: bool) -> Result<i32> {
    let snapshots = GitSnapshots::open(root, &config.audit.resolve_log_dir(root))?;
    if clear {
        println!("cleared {} snapshots", snapshots.clear()?);
        return Ok(exit_codes::OK);
    }
    let list = snapshots.list()?;
    if list.is_empty() {
        println!("no snapshots");
    }
    for snapshot in list {
        println!(
            "{}\t{}\t{}",
            snapshot.id, snapshot.created_at, snapshot.message
        );
    }
    Ok(exit_codes::OK)
}

/// Cancel `token` on Ctrl-C. The signal is awaited on a dedicated runtime so
/// the agent loop itself stays synchronous.
fn listen_for_interrupt(token: CancelToken) {
    thread::spawn(move || {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(err) => {
                tracing::warn!(err = %err, "cannot install Ctrl-C handler");
                return;
            }
        };
        runtime.block_on(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("interrupt received, stopping after the current step");
                token.cancel();
            }
        });
    });
}

fn print_event(event: &AgentEvent<'_>) {
    match event {
        AgentEvent::Decision {
            iteration,
            decision,
        } => {
            let action = decision
                .tool_call()
                .map(|call| call.name().as_str())
                .unwrap_or("done");
            eprintln!("[{iteration}] {action}: {}", decision.message);
        }
        AgentEvent::Malformed { iteration, error } => {
            eprintln!("[{iteration}] malformed reply: {error}");
        }
        AgentEvent::SnapshotTaken(snapshot) => {
            eprintln!("    snapshot {} ({})", snapshot.id, snapshot.message);
        }
        AgentEvent::SnapshotFailed(error) => {
            eprintln!("    snapshot failed: {error}");
        }
        AgentEvent::ToolFinished { tool, result } => {
            for warning in result.warnings() {
                eprintln!("    warning: {warning}");
            }
            match result.error() {
                None => eprintln!("    {tool}: ok"),
                Some(error) => eprintln!("    {tool}: {error}"),
            }
        }
    }
}

fn print_outcome(outcome: &RunOutcome) {
    println!("{}", outcome.termination);
    if let Some(message) = &outcome.last_message {
        println!("{message}");
    }
    println!(
        "session {}: {} iterations, {} tool calls, {} files touched",
        outcome.session_id,
        outcome.iterations,
        outcome.tool_calls,
        outcome.files_touched.len()
    );
}
