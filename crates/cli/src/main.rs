//! `brokerdesk`: run order workflow scripts against an in-memory store.
//!
//! ```bash
//! brokerdesk run demo.json
//! brokerdesk --log debug run demo.json --config workflow.json
//! brokerdesk config
//! ```

mod script;

use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use brokerdesk_infra::WorkflowConfig;

use crate::script::{in_memory_workflow, parse_script, ScriptRunner};

#[derive(Parser)]
#[command(name = "brokerdesk")]
#[command(version)]
#[command(about = "Order workflow operator tool")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Log filter directives (overrides BROKERDESK_LOG / RUST_LOG)
    #[arg(long, global = true)]
    log: Option<String>,

    /// JSON configuration file (defaults plus BROKERDESK_* variables otherwise)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Execute a JSON array of workflow steps and print one JSON line per step
    Run {
        /// Script file
        script: PathBuf,

        /// Exit non-zero if any step failed
        #[arg(long)]
        strict: bool,
    },
    /// Print the effective configuration as JSON
    Config,
}

fn load_config(path: Option<&PathBuf>) -> Result<WorkflowConfig> {
    match path {
        Some(path) => {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            WorkflowConfig::from_json_str(&raw)
                .with_context(|| format!("parsing config {}", path.display()))
        }
        None => Ok(WorkflowConfig::from_env()),
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let config = load_config(cli.config.as_ref())?;
    let stdout = io::stdout();
    let mut out = stdout.lock();

    match cli.command {
        Command::Config => {
            serde_json::to_writer_pretty(&mut out, &config)?;
            writeln!(out)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Run { script, strict } => {
            let raw = fs::read_to_string(&script)
                .with_context(|| format!("reading script {}", script.display()))?;
            let steps = parse_script(&raw)
                .with_context(|| format!("parsing script {}", script.display()))?;
            info!(steps = steps.len(), script = %script.display(), "running script");

            let mut runner = ScriptRunner::new(in_memory_workflow(config));
            let results = runner.run(steps);

            let mut failed = 0;
            for result in &results {
                if result.is_error() {
                    failed += 1;
                }
                serde_json::to_writer(&mut out, result)?;
                writeln!(out)?;
            }
            info!(steps = results.len(), failed, "script finished");

            if strict && failed > 0 {
                Ok(ExitCode::FAILURE)
            } else {
                Ok(ExitCode::SUCCESS)
            }
        }
    }
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    match cli.log.as_deref() {
        Some(directives) => brokerdesk_observability::init_with_filter(directives),
        None => brokerdesk_observability::init(),
    }
    run(cli)
}
