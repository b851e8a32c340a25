//! Workload Driver
//!
//! Runs the scenario's racing operation on its own task with its own
//! connection, so it can genuinely race the injected kill. The driver never
//! retries and never reports the operation's own failure as an error: a call
//! that dies with the server is the expected shape of this test.

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::client::DbClient;
use crate::scenario::{RacingOp, Scenario};
use crate::server::ServerHandle;

/// Outcome of the racing operation attempt.
///
/// `Unknown` is the expected case: the kill may land before the operation's
/// effect is observable, so nothing about the operation itself is ever
/// asserted — only the recovered state's consistency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkloadResult {
    /// The server acknowledged the operation before the kill
    Completed,
    /// No acknowledgement was observed; the operation may or may not have
    /// applied
    Unknown,
}

/// Join handle for an in-flight racing operation.
pub struct WorkloadHandle {
    task: JoinHandle<WorkloadResult>,
}

impl WorkloadHandle {
    /// Collect the result, mapping a panicked or cancelled task to Unknown.
    pub async fn result(self) -> WorkloadResult {
        self.task.await.unwrap_or(WorkloadResult::Unknown)
    }

    /// Abandon the in-flight operation. Its connection dies with the task.
    pub fn abandon(self) {
        self.task.abort();
    }
}

/// Start the racing operation against `handle` on an independent task.
///
/// Returns immediately; the caller must not wait for the result before
/// letting the injector proceed. The returned receiver fires when the driver
/// is about to put the operation on the wire — the injector keys its delay
/// off that signal so the kill can never precede the workload (a trivially
/// vacuous race). If the driver cannot even connect, the signal still fires
/// so the run proceeds to the kill rather than hanging.
pub fn run_racing_operation(
    handle: &ServerHandle,
    scenario: &Scenario,
) -> (WorkloadHandle, oneshot::Receiver<()>) {
    let port = handle.port();
    let collection = scenario.collection.clone();
    let op = scenario.racing_op.clone();
    let (started_tx, started_rx) = oneshot::channel();

    let task = tokio::spawn(async move {
        let mut client = match DbClient::connect(port).await {
            Ok(client) => client,
            Err(e) => {
                debug!(port, error = %e, "workload connect failed");
                let _ = started_tx.send(());
                return WorkloadResult::Unknown;
            }
        };

        let _ = started_tx.send(());
        let outcome = match op {
            RacingOp::InsertOne { document } => client.insert_one(&collection, document).await,
            RacingOp::InsertMany { documents } => client.insert_many(&collection, documents).await,
            RacingOp::UpdateOne { filter, set } => {
                client.update_one(&collection, filter, set).await
            }
            RacingOp::DeleteOne { filter } => client.delete_one(&collection, filter).await,
            RacingOp::DeleteMany { filter } => client.delete_many(&collection, filter).await,
        };

        match outcome {
            Ok(()) => WorkloadResult::Completed,
            Err(e) => {
                debug!(port, error = %e, "racing operation did not complete");
                WorkloadResult::Unknown
            }
        }
    });

    (WorkloadHandle { task }, started_rx)
}
