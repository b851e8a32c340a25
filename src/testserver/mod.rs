//! Bundled fixture server
//!
//! A deliberately small document store with real crash consistency, used to
//! exercise the harness end-to-end: every committed operation is one fsynced
//! commit-log record, and indexes are derived state rebuilt on startup, so a
//! hard kill can lose the racing operation but can never tear it across data
//! and indexes.
//!
//! This is test tooling, not an engine anyone should store data in.

mod commitlog;
mod server;
mod store;

pub use commitlog::CommitLog;
pub use server::{serve, Engine};
pub use store::{LogOp, Store};

use thiserror::Error;

/// Fixture engine failures.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Non-tail commit-log damage. Startup halts; no partial replay, no
    /// repair attempts.
    #[error("commit log corrupt at record {record}: {reason}")]
    Corrupt { record: usize, reason: String },

    #[error("unknown collection: {0}")]
    UnknownCollection(String),

    #[error("unknown index: {0}")]
    UnknownIndex(String),

    #[error("collection {0} already exists")]
    CollectionExists(String),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;
