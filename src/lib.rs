//! crashcheck - crash-consistency test harness for document databases
//!
//! Drives a mutating workload against a live server process, hard-kills the
//! process at an unpredictable point relative to that workload, restarts it
//! against the same data directory, and checks that the recovered state is
//! structurally valid and count-consistent across every access path.
//!
//! The engine under test is an external collaborator reached through a small
//! command protocol; `testserver` provides a bundled crash-consistent fixture
//! so the harness can be exercised end-to-end.

pub mod client;
pub mod errors;
pub mod injector;
pub mod orchestrator;
pub mod protocol;
pub mod report;
pub mod scenario;
pub mod server;
pub mod testserver;
pub mod verifier;
pub mod workload;

pub mod cli;

pub use errors::{HarnessError, HarnessResult};
pub use injector::{CrashInjector, KillDelay};
pub use orchestrator::Orchestrator;
pub use scenario::{builtin_scenarios, find_builtin, Scenario};
pub use server::{free_port, ServerCommand, ServerController, ServerHandle};
pub use verifier::{ConsistencyVerdict, RecoveryVerifier, ValidationReport};
pub use workload::WorkloadResult;
