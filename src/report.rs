//! Per-run report emitted by the CLI
//!
//! One JSON object per scenario run, fit for CI log scraping: the verdict
//! when the run produced one, the harness error when it did not. The outcome
//! field keeps "the test broke" and "the engine is broken" triagable without
//! parsing details.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::errors::HarnessError;
use crate::verifier::ConsistencyVerdict;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Structure valid and every count assertion held
    Pass,
    /// One or more count assertions failed — the primary signal under test
    ConsistencyFailure,
    /// The engine's structural self-check reported invalid
    StructuralFailure,
    /// The harness itself failed; no verdict was produced
    HarnessError,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub scenario: String,
    pub outcome: Outcome,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verdict: Option<ConsistencyVerdict>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ScenarioReport {
    pub fn from_verdict(
        started_at: DateTime<Utc>,
        verdict: ConsistencyVerdict,
    ) -> Self {
        let outcome = if verdict.passed() {
            Outcome::Pass
        } else if !verdict.validation.valid {
            Outcome::StructuralFailure
        } else {
            Outcome::ConsistencyFailure
        };
        ScenarioReport {
            scenario: verdict.scenario.clone(),
            outcome,
            started_at,
            finished_at: Utc::now(),
            verdict: Some(verdict),
            error: None,
        }
    }

    pub fn from_error(
        scenario: &str,
        started_at: DateTime<Utc>,
        error: &HarnessError,
    ) -> Self {
        ScenarioReport {
            scenario: scenario.to_string(),
            outcome: Outcome::HarnessError,
            started_at,
            finished_at: Utc::now(),
            verdict: None,
            error: Some(error.to_string()),
        }
    }

    pub fn passed(&self) -> bool {
        self.outcome == Outcome::Pass
    }
}
