//! Recovery Verifier
//!
//! Restarts the killed server against the untouched data directory, runs the
//! engine's structural self-check, and cross-checks record counts through
//! every access path the scenario names. Count equality across paths is the
//! core oracle: it does not matter whether the racing write survived, only
//! that its presence or absence is consistent everywhere.

use serde::Serialize;
use serde_json::Value;

use crate::client::DbClient;
use crate::errors::{HarnessError, HarnessResult};
use crate::scenario::{CountAssertion, Scenario};
use crate::server::{ServerController, ServerHandle};
use crate::workload::WorkloadResult;

/// Result of the post-restart structural self-check.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub details: Value,
}

/// Outcome of one count assertion.
#[derive(Debug, Clone, Serialize)]
pub struct CountCheck {
    pub label: String,
    /// Observed count per access path, in assertion order
    pub observed: Vec<(String, u64)>,
    pub passed: bool,
}

/// Final scenario result: structural validity plus every count assertion.
#[derive(Debug, Clone, Serialize)]
pub struct ConsistencyVerdict {
    pub scenario: String,
    pub workload: WorkloadResult,
    pub validation: ValidationReport,
    /// Baseline: unfiltered full-scan record count
    pub full_scan_count: u64,
    pub checks: Vec<CountCheck>,
}

impl ConsistencyVerdict {
    pub fn passed(&self) -> bool {
        self.validation.valid && self.checks.iter().all(|c| c.passed)
    }

    /// Labels of failed checks, for reporting.
    pub fn failures(&self) -> Vec<String> {
        let mut out = Vec::new();
        if !self.validation.valid {
            out.push("structural validation".to_string());
        }
        out.extend(
            self.checks
                .iter()
                .filter(|c| !c.passed)
                .map(|c| c.label.clone()),
        );
        out
    }
}

/// Pure evaluation of one assertion against observed counts.
///
/// `counts` holds one entry per access path, in the assertion's path order.
pub fn check_assertion(assertion: &CountAssertion, full_scan: u64, counts: &[u64]) -> bool {
    match assertion {
        CountAssertion::MatchesFullScan { .. } => counts.first() == Some(&full_scan),
        CountAssertion::AllEqual { .. } => counts.windows(2).all(|w| w[0] == w[1]),
        CountAssertion::Partition { .. } => counts.iter().sum::<u64>() == full_scan,
    }
}

/// Drives the recovery path of a scenario.
#[derive(Debug, Default, Clone, Copy)]
pub struct RecoveryVerifier;

impl RecoveryVerifier {
    pub fn new() -> Self {
        RecoveryVerifier
    }

    /// Restart against the data directory the killed instance left behind.
    ///
    /// Consumes the old handle; a handle that is still running is rejected so
    /// two instances can never hold the same directory.
    pub async fn reopen(
        &self,
        controller: &ServerController,
        handle: ServerHandle,
    ) -> HarnessResult<ServerHandle> {
        if !handle.is_terminated() {
            return Err(HarnessError::DataDirBusy {
                data_dir: handle.data_dir().to_path_buf(),
            });
        }
        let data_dir = handle.data_dir().to_path_buf();
        let port = handle.port();
        drop(handle);

        controller
            .start(&data_dir, port)
            .await
            .map_err(|e| HarnessError::Reopen {
                data_dir,
                reason: e.to_string(),
            })
    }

    /// Engine structural self-check. Invalid structure fails the scenario;
    /// it is never retried.
    pub async fn validate_structure(
        &self,
        client: &mut DbClient,
        collection: &str,
    ) -> HarnessResult<ValidationReport> {
        let (valid, details) = client
            .validate(collection)
            .await
            .map_err(|e| HarnessError::Verification(e.to_string()))?;
        Ok(ValidationReport { valid, details })
    }

    /// Compute the full-scan baseline and every access-path count, then
    /// evaluate the scenario's assertion set.
    pub async fn cross_check_counts(
        &self,
        client: &mut DbClient,
        scenario: &Scenario,
    ) -> HarnessResult<(u64, Vec<CountCheck>)> {
        let full_scan = client
            .count(&scenario.collection, None, None)
            .await
            .map_err(|e| HarnessError::Verification(e.to_string()))?;

        let mut checks = Vec::with_capacity(scenario.assertions.len());
        for assertion in &scenario.assertions {
            let mut observed = Vec::new();
            let mut counts = Vec::new();
            for path in assertion.paths() {
                let n = client
                    .count(&scenario.collection, path.filter.clone(), path.hint.as_deref())
                    .await
                    .map_err(|e| HarnessError::Verification(e.to_string()))?;
                observed.push((path.name.clone(), n));
                counts.push(n);
            }
            checks.push(CountCheck {
                label: assertion.label(),
                observed,
                passed: check_assertion(assertion, full_scan, &counts),
            });
        }
        Ok((full_scan, checks))
    }
}
