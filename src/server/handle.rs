//! Handle to one running server instance

use std::path::{Path, PathBuf};

use tokio::process::Child;

/// Lifecycle state of a server instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Spawned, not yet accepting connections
    Starting,
    /// Accepting connections
    Running,
    /// Hard-killed; the data directory is left exactly as the process left it
    Killed,
    /// Orderly shutdown completed
    Stopped,
}

/// Identifies one running server instance.
///
/// Exclusively owned by the controller's caller; the workload driver only
/// reads the address, the injector borrows mutably for the kill. At most one
/// handle may be Running against a given data directory; the verifier's
/// reopen consumes the killed handle to keep that invariant visible in the
/// types.
#[derive(Debug)]
pub struct ServerHandle {
    data_dir: PathBuf,
    port: u16,
    pub(crate) child: Child,
    pub(crate) state: Lifecycle,
}

impl ServerHandle {
    pub(crate) fn new(data_dir: PathBuf, port: u16, child: Child) -> Self {
        ServerHandle {
            data_dir,
            port,
            child,
            state: Lifecycle::Starting,
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn state(&self) -> Lifecycle {
        self.state
    }

    /// OS process id, if the process has not yet been reaped.
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self.state, Lifecycle::Killed | Lifecycle::Stopped)
    }
}
