//! Process-level control of the target server

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::Command;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::client::DbClient;
use crate::errors::{HarnessError, HarnessResult};
use crate::server::{Lifecycle, ServerHandle};

/// How to launch the target server.
///
/// The harness does not know the target's flag vocabulary beyond the three
/// options it owns: data directory, port, and storage engine name. Anything
/// else goes in as fixed extra arguments.
#[derive(Debug, Clone)]
pub struct ServerCommand {
    program: PathBuf,
    extra_args: Vec<String>,
    storage_engine: Option<String>,
}

impl ServerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        ServerCommand {
            program: program.into(),
            extra_args: Vec::new(),
            storage_engine: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.extra_args.push(arg.into());
        self
    }

    pub fn storage_engine(mut self, name: impl Into<String>) -> Self {
        self.storage_engine = Some(name.into());
        self
    }

    fn build(&self, data_dir: &Path, port: u16) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.extra_args)
            .arg("--data-dir")
            .arg(data_dir)
            .arg("--port")
            .arg(port.to_string());
        if let Some(engine) = &self.storage_engine {
            cmd.arg("--storage-engine").arg(engine);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        cmd
    }
}

/// Starts, kills, and stops server instances.
#[derive(Debug, Clone)]
pub struct ServerController {
    command: ServerCommand,
    readiness_timeout: Duration,
    poll_interval: Duration,
    kill_timeout: Duration,
    stop_timeout: Duration,
}

impl ServerController {
    pub fn new(command: ServerCommand) -> Self {
        ServerController {
            command,
            readiness_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(25),
            kill_timeout: Duration::from_secs(5),
            stop_timeout: Duration::from_secs(5),
        }
    }

    pub fn readiness_timeout(mut self, timeout: Duration) -> Self {
        self.readiness_timeout = timeout;
        self
    }

    pub fn kill_timeout(mut self, timeout: Duration) -> Self {
        self.kill_timeout = timeout;
        self
    }

    /// Launch the server bound to `data_dir` and `port`, and wait until it
    /// accepts connections.
    ///
    /// A child that exits during the readiness window (port already bound,
    /// unreadable data directory, corrupt state) surfaces as a launch error;
    /// a child that stays up without answering surfaces as a readiness
    /// timeout.
    pub async fn start(&self, data_dir: &Path, port: u16) -> HarnessResult<ServerHandle> {
        std::fs::create_dir_all(data_dir).map_err(|source| HarnessError::DataDir {
            path: data_dir.to_path_buf(),
            source,
        })?;

        let child = self
            .command
            .build(data_dir, port)
            .spawn()
            .map_err(|e| HarnessError::Launch {
                port,
                reason: format!("spawn failed: {}", e),
            })?;
        let mut handle = ServerHandle::new(data_dir.to_path_buf(), port, child);
        debug!(port, pid = ?handle.pid(), "server spawned, polling readiness");

        let started = Instant::now();
        loop {
            if let Some(status) = handle.child.try_wait()? {
                return Err(HarnessError::Launch {
                    port,
                    reason: format!("server exited during startup: {}", status),
                });
            }

            // Bounded probe: a port held by something that never answers
            // must not wedge the poll loop.
            let probe = timeout(Duration::from_millis(250), async {
                let mut client = DbClient::connect(port).await?;
                client.ping().await
            })
            .await;
            if matches!(probe, Ok(Ok(()))) {
                handle.state = Lifecycle::Running;
                info!(port, pid = ?handle.pid(), elapsed = ?started.elapsed(), "server ready");
                return Ok(handle);
            }

            if started.elapsed() >= self.readiness_timeout {
                // Best effort: do not leak an unready child.
                let _ = handle.child.start_kill();
                let _ = timeout(self.kill_timeout, handle.child.wait()).await;
                return Err(HarnessError::ReadinessTimeout {
                    port,
                    waited: started.elapsed(),
                });
            }
            sleep(self.poll_interval).await;
        }
    }

    /// Non-cooperative termination: no flush, no checkpoint, no cleanup of
    /// the data directory. Idempotent on an already-terminated handle.
    pub async fn kill_hard(&self, handle: &mut ServerHandle) -> HarnessResult<()> {
        if handle.is_terminated() {
            debug!(port = handle.port(), "kill_hard on terminated handle, no-op");
            return Ok(());
        }

        let pid = handle.pid();
        match handle.child.start_kill() {
            Ok(()) => {}
            // InvalidInput means the child already exited; that still counts
            // as killed for our purposes.
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => {}
            Err(e) => return Err(HarnessError::Io(e)),
        }

        match timeout(self.kill_timeout, handle.child.wait()).await {
            Ok(status) => {
                status?;
                handle.state = Lifecycle::Killed;
                info!(port = handle.port(), ?pid, "server hard-killed");
                Ok(())
            }
            Err(_) => Err(HarnessError::KillTimeout {
                pid,
                waited: self.kill_timeout,
            }),
        }
    }

    /// Orderly shutdown via the data plane. Setup-phase use only; crash
    /// scenarios go through `kill_hard`.
    pub async fn stop_gracefully(&self, handle: &mut ServerHandle) -> HarnessResult<()> {
        if handle.is_terminated() {
            return Ok(());
        }

        match DbClient::connect(handle.port()).await {
            Ok(mut client) => {
                // The ack races the process exit; a closed connection here is
                // not a failure.
                if let Err(e) = client.shutdown().await {
                    debug!(port = handle.port(), error = %e, "shutdown ack not received");
                }
            }
            Err(e) => {
                warn!(port = handle.port(), error = %e, "could not reach server for shutdown");
            }
        }

        match timeout(self.stop_timeout, handle.child.wait()).await {
            Ok(status) => {
                status?;
                handle.state = Lifecycle::Stopped;
                info!(port = handle.port(), "server stopped");
                Ok(())
            }
            Err(_) => Err(HarnessError::StopTimeout {
                port: handle.port(),
                waited: self.stop_timeout,
            }),
        }
    }
}

/// Allocate a free localhost port by binding port zero and reading back the
/// assignment.
pub fn free_port() -> std::io::Result<u16> {
    let listener = std::net::TcpListener::bind(("127.0.0.1", 0))?;
    Ok(listener.local_addr()?.port())
}
