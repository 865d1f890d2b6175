//! Two-phase search over geometry and the packed extra parameter.

use crate::error::SearchError;
use crate::executor::TrialExecutor;
use crate::options::TuneOptions;
use crate::ranking::{rank, Metric};
use crate::set::CandidateSet;
use crate::trial_loop::TrialLoop;
use kerneltune_journal::RunJournal;
use kerneltune_kernels::{Device, Kernel};
use kerneltune_space::{Candidate, CandidateEnumerator, SearchDomain, Selection};
use tracing::{info, warn};

/// Result of a search.
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub winner: Candidate,
    /// Position of the winner inside `survivors`.
    pub winner_index: usize,
    /// Measurements backing the winner: the confirmation pass when one ran,
    /// otherwise the last pass that selected it.
    pub survivors: CandidateSet,
    pub iterations: usize,
    /// False when the iteration cap stopped the search first.
    pub converged: bool,
    pub retries: usize,
}

pub struct SearchOrchestrator<'a, S: ?Sized> {
    domain: &'a S,
    options: TuneOptions,
}

impl<'a, S: SearchDomain + ?Sized> SearchOrchestrator<'a, S> {
    pub fn new(domain: &'a S, options: TuneOptions) -> Self {
        Self { domain, options }
    }

    pub fn options(&self) -> &TuneOptions {
        &self.options
    }

    pub fn run<D, K>(
        &self,
        journal: &mut RunJournal,
        kernel: &mut K,
        device: &mut D,
    ) -> Result<SearchOutcome, SearchError>
    where
        D: Device,
        K: Kernel<D> + ?Sized,
    {
        let total = self.domain.space().total_variations();
        if self.options.initial_extra >= total {
            return Err(SearchError::InitialExtraOutOfRange {
                extra: self.options.initial_extra,
                total,
            });
        }
        if self.options.two_phase {
            self.two_phase(journal, kernel, device)
        } else {
            self.exhaustive(journal, kernel, device)
        }
    }

    /// Every valid candidate, `trials` rounds, pruned after each round.
    fn exhaustive<D, K>(
        &self,
        journal: &mut RunJournal,
        kernel: &mut K,
        device: &mut D,
    ) -> Result<SearchOutcome, SearchError>
    where
        D: Device,
        K: Kernel<D> + ?Sized,
    {
        let candidates = CandidateEnumerator::new(self.domain).enumerate();
        info!(candidates = candidates.len(), "exhaustive search");
        let survivors = TrialLoop::new(journal, TrialExecutor::from_options(&self.options))
            .rounds(self.options.trials.max(1))
            .prune(self.options.top_n, self.options.prune_by)
            .run(kernel, device, candidates);

        let winner_index = rank(0, &survivors).ok_or(SearchError::NoViableConfiguration {
            retries: 0,
            space_size: self.domain.total_size(),
        })?;
        Ok(SearchOutcome {
            winner: survivors.candidate(winner_index).clone(),
            winner_index,
            survivors,
            iterations: 1,
            converged: true,
            retries: 0,
        })
    }

    fn two_phase<D, K>(
        &self,
        journal: &mut RunJournal,
        kernel: &mut K,
        device: &mut D,
    ) -> Result<SearchOutcome, SearchError>
    where
        D: Device,
        K: Kernel<D> + ?Sized,
    {
        let executor = TrialExecutor::from_options(&self.options);
        let total = self.domain.space().total_variations();
        let max_iterations = self.options.max_iterations.max(1);

        let mut extra = self.options.initial_extra;
        let mut retries = 0usize;
        let mut previous: Option<Selection> = None;
        let mut selected: Option<(CandidateSet, usize)> = None;
        let mut converged = false;
        let mut iterations = 0usize;

        while iterations < max_iterations {
            let iteration = iterations + 1;

            // Phase E: extra pinned, geometry free.
            let candidates = CandidateEnumerator::new(self.domain)
                .pin_extra(extra)
                .enumerate();
            let phase_e = TrialLoop::new(journal, executor).run(kernel, device, candidates);
            let Some(best_e) = rank(0, &phase_e) else {
                self.retry(&mut retries)?;
                warn!(extra, retries, "no viable geometry for this extra parameter");
                extra = (extra + 1) % total;
                continue;
            };
            let geometry = phase_e.candidate(best_e).geometry().to_vec();
            info!(iteration, extra, geometry = ?geometry, "phase E selected geometry");

            // Phase M: geometry pinned, extra free. The phase E winner is
            // part of this set and replays from the journal, so it always
            // has a finisher.
            let candidates = CandidateEnumerator::new(self.domain)
                .pin_geometry(geometry)
                .enumerate();
            let phase_m = TrialLoop::new(journal, executor).run(kernel, device, candidates);
            let index = rank(0, &phase_m).ok_or(SearchError::NoViableConfiguration {
                retries,
                space_size: self.domain.total_size(),
            })?;
            iterations = iteration;

            let selection = phase_m.candidate(index).selection();
            info!(
                iteration,
                %selection,
                extra = %self.domain.space().describe(selection.extra),
                "phase M selected candidate"
            );
            extra = selection.extra;
            selected = Some((phase_m, index));
            if previous.as_ref() == Some(&selection) {
                converged = true;
                info!(iterations, %selection, "search reached a fixed point");
                break;
            }
            previous = Some(selection);
        }

        let Some((phase_set, phase_index)) = selected else {
            return Err(SearchError::NoViableConfiguration {
                retries,
                space_size: self.domain.total_size(),
            });
        };
        if !converged {
            warn!(max_iterations, "iteration cap reached before a fixed point; keeping last selection");
        }

        let winner = phase_set.candidate(phase_index).clone();
        let (survivors, winner_index) = if self.options.confirm && self.options.trials > 0 {
            self.confirm(journal, kernel, device, executor, &winner)
                .unwrap_or((phase_set, phase_index))
        } else {
            (phase_set, phase_index)
        };

        Ok(SearchOutcome {
            winner,
            winner_index,
            survivors,
            iterations,
            converged,
            retries,
        })
    }

    /// Re-measure the winner for `trials` rounds. `None` when it failed
    /// along the way.
    fn confirm<D, K>(
        &self,
        journal: &mut RunJournal,
        kernel: &mut K,
        device: &mut D,
        executor: TrialExecutor,
        winner: &Candidate,
    ) -> Option<(CandidateSet, usize)>
    where
        D: Device,
        K: Kernel<D> + ?Sized,
    {
        let set = TrialLoop::new(journal, executor)
            .rounds(self.options.trials)
            .prune(None, Metric::default())
            .run(kernel, device, vec![winner.clone()]);
        if set.is_ok(0) {
            let stats = set.stats(0);
            info!(
                %winner,
                mean_gflops = stats.mean(),
                std_dev = stats.std_dev(),
                rounds = set.rounds(),
                "confirmed winner"
            );
            Some((set, 0))
        } else {
            warn!(%winner, "winner failed during confirmation; keeping search measurements");
            None
        }
    }

    fn retry(&self, retries: &mut usize) -> Result<(), SearchError> {
        *retries += 1;
        let space_size = self.domain.total_size();
        if *retries > space_size {
            return Err(SearchError::NoViableConfiguration {
                retries: *retries,
                space_size,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Behavior, Fault, GridDomain, ScriptedDevice, ScriptedKernel};
    use kerneltune_space::{GeometryAxis, ParameterSpace};

    const FLOPS: u64 = 1_000_000;

    fn domain() -> GridDomain {
        let space = ParameterSpace::new().with("variant", 4).unwrap();
        GridDomain::new(
            vec![
                GeometryAxis::new("a", [1, 2, 3]),
                GeometryAxis::new("b", [2, 4]),
            ],
            space,
        )
    }

    /// Separable cost with its minimum at geometry (2, 4), extra 3.
    fn cost(params: &[usize]) -> u64 {
        let (a, b, extra) = (params[0] as u64, params[1] as u64, params[2] as u64);
        100 + 20 * a.abs_diff(2) + 10 * (4 - b) + 5 * (3 - extra)
    }

    fn options() -> TuneOptions {
        TuneOptions {
            trials: 3,
            top_n: None,
            ..TuneOptions::default()
        }
    }

    #[test]
    fn converges_after_a_repeated_selection() {
        let domain = domain();
        let mut journal = RunJournal::in_memory();
        let mut device = ScriptedDevice::new();
        let mut kernel = ScriptedKernel::new("grid", FLOPS, |p: &[usize]| Behavior::costing(cost(p)));

        let outcome = SearchOrchestrator::new(&domain, options())
            .run(&mut journal, &mut kernel, &mut device)
            .unwrap();
        assert_eq!(outcome.winner.values(), &[2, 4, 3]);
        assert!(outcome.converged);
        assert_eq!(outcome.iterations, 2);
        assert_eq!(outcome.retries, 0);
        assert_eq!(outcome.survivors.rounds(), 3);
        assert_eq!(outcome.survivors.stats(outcome.winner_index).samples(), 3);
        // Round 0 of the confirmation pass reuses the phase timing.
        assert_eq!(kernel.launches_of(&[2, 4, 3]), 3);
    }

    #[test]
    fn phase_m_replays_the_phase_e_winner() {
        let domain = domain();
        let mut journal = RunJournal::in_memory();
        let mut device = ScriptedDevice::new();
        let mut kernel = ScriptedKernel::new("grid", FLOPS, |p: &[usize]| Behavior::costing(cost(p)));

        let options = TuneOptions {
            initial_extra: 0,
            max_iterations: 1,
            confirm: false,
            ..options()
        };
        let outcome = SearchOrchestrator::new(&domain, options)
            .run(&mut journal, &mut kernel, &mut device)
            .unwrap();
        assert_eq!(outcome.survivors.len(), 4);
        assert_eq!(outcome.winner.values(), &[2, 4, 3]);
        assert_eq!(kernel.launches_of(&[2, 4, 0]), 1);
        // Six geometries in phase E plus three new extras in phase M.
        assert_eq!(kernel.executed().len(), 6 + 3);
    }

    #[test]
    fn phase_e_cycles_the_extra_parameter_on_failure() {
        let domain = domain();
        let mut journal = RunJournal::in_memory();
        let mut device = ScriptedDevice::new();
        let mut kernel = ScriptedKernel::new("grid", FLOPS, |p: &[usize]| match p[2] {
            0 => Behavior::fault(Fault::Build),
            _ => Behavior::costing(cost(p)),
        });

        let outcome = SearchOrchestrator::new(&domain, options())
            .run(&mut journal, &mut kernel, &mut device)
            .unwrap();
        assert_eq!(outcome.winner.values(), &[2, 4, 3]);
        assert_eq!(outcome.retries, 1);
        assert!(outcome.converged);
    }

    #[test]
    fn nothing_viable_is_fatal() {
        let domain = domain();
        let mut journal = RunJournal::in_memory();
        let mut device = ScriptedDevice::new();
        let mut kernel =
            ScriptedKernel::new("grid", FLOPS, |_: &[usize]| Behavior::fault(Fault::Execute));

        let err = SearchOrchestrator::new(&domain, options())
            .run(&mut journal, &mut kernel, &mut device)
            .unwrap_err();
        match err {
            SearchError::NoViableConfiguration { retries, space_size } => {
                assert_eq!(space_size, 24);
                assert_eq!(retries, 25);
            }
            other => panic!("unexpected error: {other}"),
        }
        // Every candidate was tried exactly once.
        assert_eq!(kernel.executed().len(), 0);
        assert_eq!(device.builds(), 24);
    }

    #[test]
    fn iteration_cap_stops_without_fixed_point() {
        let domain = domain();
        let mut journal = RunJournal::in_memory();
        let mut device = ScriptedDevice::new();
        let mut kernel = ScriptedKernel::new("grid", FLOPS, |p: &[usize]| Behavior::costing(cost(p)));

        let options = TuneOptions {
            max_iterations: 1,
            confirm: false,
            ..options()
        };
        let outcome = SearchOrchestrator::new(&domain, options)
            .run(&mut journal, &mut kernel, &mut device)
            .unwrap();
        assert!(!outcome.converged);
        assert_eq!(outcome.iterations, 1);
        assert_eq!(outcome.winner.values(), &[2, 4, 3]);
        assert_eq!(outcome.survivors.rounds(), 1);
    }

    #[test]
    fn exhaustive_mode_ranks_the_whole_space() {
        let domain = domain();
        let mut journal = RunJournal::in_memory();
        let mut device = ScriptedDevice::new();
        let mut kernel = ScriptedKernel::new("grid", FLOPS, |p: &[usize]| Behavior::costing(cost(p)));

        let options = TuneOptions {
            two_phase: false,
            top_n: Some(4),
            ..options()
        };
        let outcome = SearchOrchestrator::new(&domain, options)
            .run(&mut journal, &mut kernel, &mut device)
            .unwrap();
        assert_eq!(outcome.winner.values(), &[2, 4, 3]);
        assert_eq!(outcome.survivors.len(), 24);
        assert_eq!(outcome.survivors.live_count(), 4);
        assert_eq!(kernel.executed().len(), 24 + 4 + 4);
    }

    #[test]
    fn out_of_range_initial_extra_is_rejected() {
        let domain = domain();
        let mut journal = RunJournal::in_memory();
        let mut device = ScriptedDevice::new();
        let mut kernel = ScriptedKernel::new("grid", FLOPS, |p: &[usize]| Behavior::costing(cost(p)));

        let options = TuneOptions {
            initial_extra: 4,
            ..options()
        };
        let result = SearchOrchestrator::new(&domain, options).run(&mut journal, &mut kernel, &mut device);
        assert!(matches!(
            result,
            Err(SearchError::InitialExtraOutOfRange { extra: 4, total: 4 })
        ));
    }
}
