//! CLI module for crashcheck
//!
//! Commands:
//! - crashcheck list
//! - crashcheck run --server-bin <path> [--scenario <name>]...

mod args;
mod commands;

pub use args::{Cli, Command, RunArgs};
pub use commands::{run, CliError};
