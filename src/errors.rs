//! Harness error taxonomy
//!
//! Errors here are harness or setup faults: they abort a scenario with no
//! verdict. Engine faults (invalid structure, count mismatch) are not errors;
//! they are carried in the `ConsistencyVerdict` so CI triage can tell "the
//! test broke" from "the engine is broken".

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Harness result type
pub type HarnessResult<T> = Result<T, HarnessError>;

/// Setup phase in which a command failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupStage {
    /// Dropping any pre-existing collection
    DropCollection,
    /// Creating the collection (capped or uncapped)
    CreateCollection,
    /// Creating the secondary indexes
    CreateIndexes,
    /// Inserting the seed records
    SeedRecords,
}

impl std::fmt::Display for SetupStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SetupStage::DropCollection => "drop_collection",
            SetupStage::CreateCollection => "create_collection",
            SetupStage::CreateIndexes => "create_indexes",
            SetupStage::SeedRecords => "seed_records",
        };
        write!(f, "{}", s)
    }
}

/// Fatal harness errors; no verdict is produced when one of these is raised.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// The server process could not be launched or exited before becoming ready
    #[error("failed to launch server on port {port}: {reason}")]
    Launch { port: u16, reason: String },

    /// The data directory could not be created or accessed
    #[error("data directory {path} is inaccessible: {source}")]
    DataDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The server did not accept connections within the readiness window
    #[error("server on port {port} not ready after {waited:?}")]
    ReadinessTimeout { port: u16, waited: Duration },

    /// The server process survived a hard kill beyond the kill window
    #[error("server pid {pid:?} did not die within {waited:?} after hard kill")]
    KillTimeout { pid: Option<u32>, waited: Duration },

    /// The server did not exit after an orderly shutdown request
    #[error("server on port {port} did not stop within {waited:?}")]
    StopTimeout { port: u16, waited: Duration },

    /// A setup command failed; indicates a harness/configuration defect
    #[error("setup failed during {stage}: {reason}")]
    Setup { stage: SetupStage, reason: String },

    /// Restart against the recovered data directory failed
    #[error("reopen of {data_dir} failed: {reason}")]
    Reopen { data_dir: PathBuf, reason: String },

    /// A second instance was requested against a directory still held by a
    /// running server
    #[error("data directory {data_dir} is still held by a running server")]
    DataDirBusy { data_dir: PathBuf },

    /// A post-recovery command (validate, count) failed at the transport level
    #[error("verification command failed: {0}")]
    Verification(String),

    /// Underlying I/O fault in the controller itself
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
