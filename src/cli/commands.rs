//! CLI command dispatch

use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::errors::HarnessError;
use crate::injector::{CrashInjector, KillDelay};
use crate::orchestrator::Orchestrator;
use crate::report::ScenarioReport;
use crate::scenario::{builtin_scenarios, Scenario};
use crate::server::{free_port, ServerCommand, ServerController};

use super::args::{Cli, Command, RunArgs};

#[derive(Debug, Error)]
pub enum CliError {
    #[error("unknown scenario: {0}")]
    UnknownScenario(String),

    #[error("harness error: {0}")]
    Harness(#[from] HarnessError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("{failed} of {total} scenarios failed")]
    ScenariosFailed { failed: usize, total: usize },
}

pub type CliResult<T> = Result<T, CliError>;

/// Parse arguments and dispatch.
pub async fn run() -> CliResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    match Cli::parse_args().command {
        Command::List => list(),
        Command::Run(args) => run_scenarios(args).await,
    }
}

fn list() -> CliResult<()> {
    for scenario in builtin_scenarios() {
        println!(
            "{:32} {} index(es), {} seed record(s), {} assertion(s)",
            scenario.name,
            scenario.indexes.len(),
            scenario.seed.len(),
            scenario.assertions.len(),
        );
    }
    Ok(())
}

fn select_scenarios(names: &[String]) -> CliResult<Vec<Scenario>> {
    let table = builtin_scenarios();
    if names.is_empty() {
        return Ok(table);
    }
    names
        .iter()
        .map(|name| {
            table
                .iter()
                .find(|s| &s.name == name)
                .cloned()
                .ok_or_else(|| CliError::UnknownScenario(name.clone()))
        })
        .collect()
}

fn delay_policy(args: &RunArgs) -> KillDelay {
    if let Some(ms) = args.delay_ms {
        if ms == 0 {
            KillDelay::Immediate
        } else {
            KillDelay::Fixed(Duration::from_millis(ms))
        }
    } else if let Some(ms) = args.jitter_ms {
        KillDelay::Jittered(Duration::from_millis(ms))
    } else {
        KillDelay::Immediate
    }
}

/// Fresh data directory per scenario under the configured root.
fn scenario_data_dir(root: &Option<PathBuf>, scenario: &str) -> PathBuf {
    let root = root
        .clone()
        .unwrap_or_else(std::env::temp_dir);
    root.join(format!("crashcheck_{}_{}", scenario, std::process::id()))
}

async fn run_scenarios(args: RunArgs) -> CliResult<()> {
    let scenarios = select_scenarios(&args.scenarios)?;

    let mut command = ServerCommand::new(&args.server_bin);
    if let Some(engine) = &args.storage_engine {
        command = command.storage_engine(engine.clone());
    }
    let controller = ServerController::new(command);
    let injector = CrashInjector::new(delay_policy(&args));
    let orchestrator = Orchestrator::new(controller, injector);

    let total = scenarios.len();
    let mut failed = 0;
    for scenario in &scenarios {
        let data_dir = scenario_data_dir(&args.data_root, &scenario.name);
        if data_dir.exists() {
            std::fs::remove_dir_all(&data_dir)?;
        }
        let port = free_port()?;
        let started_at = Utc::now();
        info!(scenario = %scenario.name, data_dir = %data_dir.display(), port, "running");

        let report = match orchestrator.run(scenario, &data_dir, port).await {
            Ok(verdict) => ScenarioReport::from_verdict(started_at, verdict),
            Err(e) => ScenarioReport::from_error(&scenario.name, started_at, &e),
        };
        if !report.passed() {
            failed += 1;
        }
        println!("{}", serde_json::to_string(&report)?);

        if !args.keep_data {
            let _ = std::fs::remove_dir_all(&data_dir);
        }
    }

    eprintln!("{}/{} scenarios passed", total - failed, total);
    if failed > 0 {
        return Err(CliError::ScenariosFailed { failed, total });
    }
    Ok(())
}
