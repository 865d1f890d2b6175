//! Tuning session orchestration.

use crate::config::TuneConfig;
use crate::report::TuneReport;
use anyhow::Result;
use kerneltune_autotune::SearchOrchestrator;
use kerneltune_journal::{RunJournal, RunState};
use kerneltune_kernels::{Device, MatmulProblem, MatmulSpace, TiledMatmulKernel};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;

/// Seed for the pseudo-random kernel inputs.
pub const INPUT_SEED: u64 = 0x6b74_756e;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    Cpu,
    Gpu,
}

impl Target {
    pub fn as_str(self) -> &'static str {
        match self {
            Target::Cpu => "cpu",
            Target::Gpu => "gpu",
        }
    }
}

/// Owns a device and the journal every run on it writes to.
pub struct TuneSession<D: Device> {
    target: Target,
    device: D,
    config: TuneConfig,
    journal: RunJournal,
}

impl<D: Device> TuneSession<D> {
    pub fn new(target: Target, device: D, config: TuneConfig) -> Result<Self> {
        let journal = RunJournal::load(&config.journal_path)?;
        info!(
            target = target.as_str(),
            device = %device.name(),
            journal = %config.journal_path.display(),
            keys = journal.len(),
            dangling = journal.dangling_keys().len(),
            "tuning session ready"
        );
        Ok(Self {
            target,
            device,
            config,
            journal,
        })
    }

    pub fn config(&self) -> &TuneConfig {
        &self.config
    }

    pub fn journal(&self) -> &RunJournal {
        &self.journal
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn tune_matmul(&mut self, problem: MatmulProblem) -> Result<TuneReport> {
        let domain = MatmulSpace::new(problem)?;
        let mut kernel = TiledMatmulKernel::<D>::new(domain.clone(), INPUT_SEED);
        let orchestrator = SearchOrchestrator::new(&domain, self.config.options.clone());
        let outcome = orchestrator.run(&mut self.journal, &mut kernel, &mut self.device)?;

        let report = TuneReport::from_outcome(
            self.target.as_str(),
            self.device.name(),
            &domain,
            &outcome,
        );
        info!(
            problem = %problem,
            winner = %report.winner,
            extra = %report.extra,
            gflops = report.mean_gflops,
            std_dev = report.std_dev_gflops,
            converged = report.converged,
            "matmul tuned"
        );
        Ok(report)
    }

    /// Rewrite the journal in place; returns the number of bad keys kept.
    pub fn compact(&mut self, drop_timings: bool) -> Result<usize> {
        Ok(self.journal.compact(drop_timings)?)
    }

    pub fn inspect(&self) -> JournalSummary {
        JournalSummary::of(&self.journal, self.config.journal_path.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DanglingKey {
    pub key: String,
    pub state: RunState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalSummary {
    pub path: PathBuf,
    pub keys: usize,
    pub good: usize,
    pub bad: usize,
    pub dangling: Vec<DanglingKey>,
}

impl JournalSummary {
    pub fn of(journal: &RunJournal, path: PathBuf) -> Self {
        Self {
            path,
            keys: journal.len(),
            good: journal.memo_good(),
            bad: journal.memo_bad(),
            dangling: journal
                .dangling_keys()
                .into_iter()
                .map(|(key, state)| DanglingKey {
                    key: key.to_string(),
                    state,
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kerneltune_backend_cpu::HostDevice;
    use kerneltune_kernels::RhsLayout;
    use tempfile::TempDir;

    fn config_in(dir: &TempDir) -> TuneConfig {
        let mut config = TuneConfig {
            journal_path: dir.path().join("tune.journal"),
            ..TuneConfig::default()
        };
        config.options.trials = 2;
        config.options.max_iterations = 4;
        config
    }

    #[test]
    fn tunes_a_small_problem_on_the_host() {
        let dir = TempDir::new().unwrap();
        let mut session = TuneSession::new(Target::Cpu, HostDevice::new(), config_in(&dir)).unwrap();

        let problem = MatmulProblem::new(8, 8, 4).with_rhs_layout(RhsLayout::Transposed);
        let report = session.tune_matmul(problem).unwrap();
        let params = report.params.unwrap();
        assert_eq!(params.problem, problem);
        assert!(report.mean_gflops > 0.0);
        assert_eq!(report.target, "cpu");
        assert!(!report.survivors.is_empty());

        let summary = session.inspect();
        assert!(summary.good > 0);
        assert!(summary.dangling.is_empty());
    }

    #[test]
    fn rerun_is_served_from_the_journal() {
        let dir = TempDir::new().unwrap();
        let problem = MatmulProblem::new(4, 4, 4);

        let mut first = TuneSession::new(Target::Cpu, HostDevice::new(), config_in(&dir)).unwrap();
        let winner = first.tune_matmul(problem).unwrap().winner;

        let mut second = TuneSession::new(Target::Cpu, HostDevice::new(), config_in(&dir)).unwrap();
        let report = second.tune_matmul(problem).unwrap();
        assert_eq!(report.winner, winner);
        assert_eq!(second.device().launches(), 0);
    }
}
