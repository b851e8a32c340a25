//! Harness-level properties, exercised against the fixture server
//!
//! Covers the guarantees the harness itself makes, as opposed to the
//! consistency oracle: idempotent kills, single-writer data directories,
//! no kill before the workload-start signal, and distinct failure shapes for
//! launch problems.

use std::time::Duration;

use crashcheck::client::DbClient;
use crashcheck::errors::HarnessError;
use crashcheck::scenario::find_builtin;
use crashcheck::server::Lifecycle;
use crashcheck::workload::{self, WorkloadResult};
use crashcheck::{
    CrashInjector, KillDelay, RecoveryVerifier, ServerCommand, ServerController,
};
use tempfile::TempDir;
use tokio::sync::oneshot;

fn fixture_command() -> ServerCommand {
    ServerCommand::new(env!("CARGO_BIN_EXE_crashcheck-testd"))
}

fn controller() -> ServerController {
    ServerController::new(fixture_command())
}

/// Hard kill on an already-terminated handle is a no-op and leaves the
/// data directory untouched.
#[tokio::test]
async fn kill_hard_is_idempotent() {
    let data_dir = TempDir::new().unwrap();
    let port = crashcheck::free_port().unwrap();
    let controller = controller();

    let mut handle = controller.start(data_dir.path(), port).await.unwrap();
    let mut client = DbClient::connect(port).await.unwrap();
    client.create_collection("testt", None).await.unwrap();
    drop(client);

    controller.kill_hard(&mut handle).await.unwrap();
    assert_eq!(handle.state(), Lifecycle::Killed);
    let log_before = std::fs::read(data_dir.path().join("commit.log")).unwrap();

    // Second kill: no error, no directory changes.
    controller.kill_hard(&mut handle).await.unwrap();
    let log_after = std::fs::read(data_dir.path().join("commit.log")).unwrap();
    assert_eq!(log_before, log_after);
}

/// Reopen refuses a handle that is still running, so two instances can
/// never share a data directory.
#[tokio::test]
async fn reopen_rejects_running_handle() {
    let data_dir = TempDir::new().unwrap();
    let port = crashcheck::free_port().unwrap();
    let controller = controller();

    let handle = controller.start(data_dir.path(), port).await.unwrap();
    let result = RecoveryVerifier::new().reopen(&controller, handle).await;
    match result {
        Err(HarnessError::DataDirBusy { data_dir: dir }) => {
            assert_eq!(dir, data_dir.path());
        }
        other => panic!("expected DataDirBusy, got {:?}", other.map(|h| h.state())),
    }
}

/// The injector never kills before the workload-start signal fires.
#[tokio::test]
async fn kill_waits_for_workload_start_signal() {
    let data_dir = TempDir::new().unwrap();
    let port = crashcheck::free_port().unwrap();
    let controller = controller();
    let injector = CrashInjector::new(KillDelay::Immediate);

    let mut handle = controller.start(data_dir.path(), port).await.unwrap();
    let (tx, rx) = oneshot::channel::<()>();

    {
        let inject = injector.inject_after(&controller, &mut handle, rx);
        tokio::pin!(inject);

        tokio::select! {
            _ = &mut inject => panic!("kill happened before the workload started"),
            _ = tokio::time::sleep(Duration::from_millis(300)) => {}
        }

        tx.send(()).unwrap();
        inject.await.unwrap();
    }
    assert_eq!(handle.state(), Lifecycle::Killed);
}

/// The racing operation against a dead server is swallowed into Unknown,
/// never surfaced as an error.
#[tokio::test]
async fn workload_against_dead_server_reports_unknown() {
    let data_dir = TempDir::new().unwrap();
    let port = crashcheck::free_port().unwrap();
    let controller = controller();

    let mut handle = controller.start(data_dir.path(), port).await.unwrap();
    controller.kill_hard(&mut handle).await.unwrap();

    let scenario = find_builtin("insert_one_primary_only").unwrap();
    let (workload, started) = workload::run_racing_operation(&handle, &scenario);
    // The signal still fires so an injector would not hang.
    started.await.unwrap();
    assert_eq!(workload.result().await, WorkloadResult::Unknown);
}

/// Orderly stop flushes nothing extra but must leave committed state
/// reopenable.
#[tokio::test]
async fn graceful_stop_preserves_committed_state() {
    let data_dir = TempDir::new().unwrap();
    let port = crashcheck::free_port().unwrap();
    let controller = controller();

    let mut handle = controller.start(data_dir.path(), port).await.unwrap();
    let mut client = DbClient::connect(port).await.unwrap();
    client.create_collection("testt", None).await.unwrap();
    client
        .insert_one("testt", serde_json::json!({"a": "a"}).as_object().cloned().unwrap())
        .await
        .unwrap();
    drop(client);

    controller.stop_gracefully(&mut handle).await.unwrap();
    assert_eq!(handle.state(), Lifecycle::Stopped);

    let handle = RecoveryVerifier::new()
        .reopen(&controller, handle)
        .await
        .unwrap();
    let mut client = DbClient::connect(handle.port()).await.unwrap();
    assert_eq!(client.count("testt", None, None).await.unwrap(), 1);
}

/// A binary that cannot be spawned is a launch error, not a timeout.
#[tokio::test]
async fn missing_binary_is_a_launch_error() {
    let data_dir = TempDir::new().unwrap();
    let controller = ServerController::new(ServerCommand::new("/nonexistent/crashcheck-testd"));
    let result = controller
        .start(data_dir.path(), crashcheck::free_port().unwrap())
        .await;
    match result {
        Err(HarnessError::Launch { .. }) => {}
        other => panic!("expected Launch error, got {:?}", other.map(|h| h.state())),
    }
}

/// A process that stays alive but never listens exhausts the readiness
/// window; this is a readiness timeout, not a launch failure, and the unready
/// child is killed before the error returns.
#[tokio::test]
async fn unresponsive_server_is_a_readiness_timeout() {
    let data_dir = TempDir::new().unwrap();
    let command = ServerCommand::new("/bin/sh").arg("-c").arg("sleep 30");
    let controller =
        ServerController::new(command).readiness_timeout(Duration::from_millis(600));

    let port = crashcheck::free_port().unwrap();
    let result = controller.start(data_dir.path(), port).await;
    match result {
        Err(HarnessError::ReadinessTimeout { port: p, waited }) => {
            assert_eq!(p, port);
            assert!(waited >= Duration::from_millis(600));
        }
        other => panic!("expected ReadinessTimeout, got {:?}", other.map(|h| h.state())),
    }
}

/// A listener that accepts connections but never answers the readiness ping
/// must not wedge the poll loop; the bounded probe keeps retrying until the
/// window closes.
#[tokio::test]
async fn silent_listener_is_a_readiness_timeout() {
    let data_dir = TempDir::new().unwrap();
    let listener = std::net::TcpListener::bind(("127.0.0.1", 0)).unwrap();
    let port = listener.local_addr().unwrap().port();

    // The child has to stay alive for the whole window; the test's listener
    // holds the port and swallows every probe.
    let command = ServerCommand::new("/bin/sh").arg("-c").arg("sleep 30");
    let controller =
        ServerController::new(command).readiness_timeout(Duration::from_millis(600));

    let result = controller.start(data_dir.path(), port).await;
    match result {
        Err(HarnessError::ReadinessTimeout { port: p, .. }) => assert_eq!(p, port),
        other => panic!("expected ReadinessTimeout, got {:?}", other.map(|h| h.state())),
    }
}

/// A port that is already bound makes the server exit during startup, which
/// the controller reports as a launch failure.
#[tokio::test]
async fn bound_port_is_a_launch_error() {
    let data_dir = TempDir::new().unwrap();
    let listener = std::net::TcpListener::bind(("127.0.0.1", 0)).unwrap();
    let port = listener.local_addr().unwrap().port();

    let controller = controller().readiness_timeout(Duration::from_secs(3));
    let result = controller.start(data_dir.path(), port).await;
    match result {
        Err(HarnessError::Launch { .. }) => {}
        other => panic!("expected Launch error, got {:?}", other.map(|h| h.state())),
    }
}
