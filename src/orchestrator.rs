//! Scenario Orchestrator
//!
//! Sequences one crash/recover cycle: setup, concurrent workload plus kill,
//! reopen, structural validation, count cross-check. One cycle per run is the
//! unit of reproducibility; nothing is retried, because a retry would mask a
//! nondeterministic engine bug.
//!
//! Ordering guarantees: workload start precedes kill; kill precedes reopen;
//! reopen precedes validation; validation precedes the count cross-check.
//! There is deliberately no ordering between workload completion and the
//! kill — that is the race under test.

use std::path::Path;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{info, warn};

use crate::client::{ClientError, DbClient};
use crate::errors::{HarnessError, HarnessResult, SetupStage};
use crate::injector::CrashInjector;
use crate::scenario::Scenario;
use crate::server::{ServerController, ServerHandle};
use crate::verifier::{ConsistencyVerdict, RecoveryVerifier};
use crate::workload::{self, WorkloadResult};

/// How long to wait for the abandoned workload task after the kill before
/// writing its result off as Unknown.
const WORKLOAD_DRAIN: Duration = Duration::from_secs(2);

/// Composes controller, driver, injector, and verifier into one run.
pub struct Orchestrator {
    controller: ServerController,
    injector: CrashInjector,
    verifier: RecoveryVerifier,
}

impl Orchestrator {
    pub fn new(controller: ServerController, injector: CrashInjector) -> Self {
        Orchestrator {
            controller,
            injector,
            verifier: RecoveryVerifier::new(),
        }
    }

    pub fn controller(&self) -> &ServerController {
        &self.controller
    }

    /// Run one scenario against a fresh server on `data_dir`/`port`.
    ///
    /// `Err` means the harness itself failed (launch, setup, timeout);
    /// `Ok(verdict)` carries the engine's pass/fail, including structural
    /// invalidity and count mismatches.
    pub async fn run(
        &self,
        scenario: &Scenario,
        data_dir: &Path,
        port: u16,
    ) -> HarnessResult<ConsistencyVerdict> {
        info!(scenario = %scenario.name, %port, "scenario starting");
        let mut handle = self.controller.start(data_dir, port).await?;

        if let Err(e) = self.setup(&handle, scenario).await {
            // Setup failures are harness defects; do not leave the server up.
            let _ = self.controller.kill_hard(&mut handle).await;
            return Err(e);
        }

        // The race: the driver returns immediately, the injector keys off the
        // start signal.
        let (workload, started) = workload::run_racing_operation(&handle, scenario);
        self.injector
            .inject_after(&self.controller, &mut handle, started)
            .await?;

        let workload_result = match timeout(WORKLOAD_DRAIN, workload.result()).await {
            Ok(result) => result,
            Err(_) => WorkloadResult::Unknown,
        };
        info!(scenario = %scenario.name, ?workload_result, "kill complete");

        // Recovery path under test: reopen replays whatever the engine needs.
        let mut handle = self.verifier.reopen(&self.controller, handle).await?;
        let mut client = self.connect_verifier(&handle).await?;

        let validation = self
            .verifier
            .validate_structure(&mut client, &scenario.collection)
            .await?;

        let (full_scan_count, checks) = if validation.valid {
            self.verifier.cross_check_counts(&mut client, scenario).await?
        } else {
            // Invalid structure fails the scenario immediately; counts from a
            // structurally broken collection would prove nothing.
            (0, Vec::new())
        };

        if let Err(e) = self.controller.stop_gracefully(&mut handle).await {
            warn!(scenario = %scenario.name, error = %e, "post-run stop failed");
            let _ = self.controller.kill_hard(&mut handle).await;
        }

        let verdict = ConsistencyVerdict {
            scenario: scenario.name.clone(),
            workload: workload_result,
            validation,
            full_scan_count,
            checks,
        };
        info!(scenario = %scenario.name, passed = verdict.passed(), "scenario finished");
        Ok(verdict)
    }

    /// Drop/create the collection, create the indexes, insert the seed
    /// records. Failures here indicate a harness or configuration defect and
    /// abort the scenario with no verdict.
    async fn setup(&self, handle: &ServerHandle, scenario: &Scenario) -> HarnessResult<()> {
        let mut client = DbClient::connect(handle.port())
            .await
            .map_err(|e| setup_error(SetupStage::DropCollection, e))?;

        client
            .drop_collection(&scenario.collection)
            .await
            .map_err(|e| setup_error(SetupStage::DropCollection, e))?;

        client
            .create_collection(&scenario.collection, scenario.capped)
            .await
            .map_err(|e| setup_error(SetupStage::CreateCollection, e))?;

        if !scenario.indexes.is_empty() {
            client
                .create_indexes(&scenario.collection, &scenario.indexes)
                .await
                .map_err(|e| setup_error(SetupStage::CreateIndexes, e))?;
        }

        if !scenario.seed.is_empty() {
            client
                .insert_many(&scenario.collection, scenario.seed.clone())
                .await
                .map_err(|e| setup_error(SetupStage::SeedRecords, e))?;
        }

        Ok(())
    }

    async fn connect_verifier(&self, handle: &ServerHandle) -> HarnessResult<DbClient> {
        DbClient::connect(handle.port())
            .await
            .map_err(|e| HarnessError::Verification(e.to_string()))
    }
}

fn setup_error(stage: SetupStage, e: ClientError) -> HarnessError {
    HarnessError::Setup {
        stage,
        reason: e.to_string(),
    }
}
