//! crashcheck-testd - the bundled fixture server
//!
//! A crash-consistent document store bound to one data directory and one
//! port. Exists so the harness (and its test suite) has a target whose
//! durability contract is known good.

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

/// crashcheck fixture server
#[derive(Parser, Debug)]
#[command(name = "crashcheck-testd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Directory holding the commit log
    #[arg(long)]
    data_dir: PathBuf,

    /// Port to listen on (localhost only)
    #[arg(long)]
    port: u16,

    /// Storage engine name; accepted for launcher compatibility
    #[arg(long, default_value = "memlog")]
    storage_engine: String,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    tracing::info!(engine = %args.storage_engine, "starting fixture server");

    if let Err(e) = crashcheck::testserver::serve(&args.data_dir, args.port).await {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}
