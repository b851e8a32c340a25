//! CLI argument definitions using clap

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// crashcheck - crash-consistency test harness for document databases
#[derive(Parser, Debug)]
#[command(name = "crashcheck")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List the built-in scenarios
    List,

    /// Run crash/recover scenarios against a server binary
    Run(RunArgs),
}

#[derive(clap::Args, Debug)]
pub struct RunArgs {
    /// Path to the server binary under test
    #[arg(long)]
    pub server_bin: PathBuf,

    /// Storage engine name passed through to the server
    #[arg(long)]
    pub storage_engine: Option<String>,

    /// Scenario names to run; default is the whole table
    #[arg(long = "scenario")]
    pub scenarios: Vec<String>,

    /// Fixed delay between workload start and the kill, in milliseconds
    #[arg(long, conflicts_with = "jitter_ms")]
    pub delay_ms: Option<u64>,

    /// Random delay bound between workload start and the kill, in milliseconds
    #[arg(long)]
    pub jitter_ms: Option<u64>,

    /// Root directory for per-scenario data directories (default: system temp)
    #[arg(long)]
    pub data_root: Option<PathBuf>,

    /// Keep data directories after the run instead of removing them
    #[arg(long)]
    pub keep_data: bool,
}

impl Cli {
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
