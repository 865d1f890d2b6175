//! JSON summary of a finished tuning run.

use anyhow::Result;
use kerneltune_autotune::{report, ReportRow, SearchOutcome};
use kerneltune_kernels::{MatmulParams, MatmulProblem, MatmulSpace};
use kerneltune_space::{Candidate, SearchDomain};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TuneReport {
    pub target: String,
    pub device: String,
    pub generated_at_unix_ms: u128,
    pub problem: MatmulProblem,
    pub winner: Candidate,
    /// Decoded form of `winner`.
    pub params: Option<MatmulParams>,
    /// `name=value` rendering of the packed extra parameter.
    pub extra: String,
    pub mean_gflops: f64,
    pub std_dev_gflops: f64,
    pub rounds: usize,
    pub iterations: usize,
    pub converged: bool,
    pub retries: usize,
    pub survivors: Vec<ReportRow>,
}

impl TuneReport {
    pub fn from_outcome(
        target: impl Into<String>,
        device: impl Into<String>,
        domain: &MatmulSpace,
        outcome: &SearchOutcome,
    ) -> Self {
        let stats = outcome.survivors.stats(outcome.winner_index);
        let generated_at_unix_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_else(|_| Duration::from_secs(0))
            .as_millis();

        Self {
            target: target.into(),
            device: device.into(),
            generated_at_unix_ms,
            problem: domain.problem(),
            winner: outcome.winner.clone(),
            params: domain.params_for(outcome.winner.values()),
            extra: domain.space().describe(outcome.winner.extra()),
            mean_gflops: stats.mean(),
            std_dev_gflops: stats.std_dev(),
            rounds: outcome.survivors.rounds(),
            iterations: outcome.iterations,
            converged: outcome.converged,
            retries: outcome.retries,
            survivors: report(&outcome.survivors),
        }
    }

    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}
