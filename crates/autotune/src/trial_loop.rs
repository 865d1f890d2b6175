//! Repeated trial rounds over a candidate list.

use crate::error::TrialFailure;
use crate::executor::TrialExecutor;
use crate::ranking::{mark_top_n, Metric};
use crate::set::CandidateSet;
use kerneltune_journal::{JournalKey, RunJournal};
use kerneltune_kernels::{Device, Kernel};
use kerneltune_space::Candidate;
use tracing::{debug, info};

/// Runs `rounds` trial rounds over every live candidate, replaying whatever
/// the journal already knows instead of executing it again.
pub struct TrialLoop<'j> {
    journal: &'j mut RunJournal,
    executor: TrialExecutor,
    rounds: usize,
    top_n: Option<usize>,
    metric: Metric,
}

impl<'j> TrialLoop<'j> {
    pub fn new(journal: &'j mut RunJournal, executor: TrialExecutor) -> Self {
        Self {
            journal,
            executor,
            rounds: 1,
            top_n: None,
            metric: Metric::default(),
        }
    }

    pub fn rounds(mut self, rounds: usize) -> Self {
        self.rounds = rounds;
        self
    }

    /// Keep only the best `top_n` after every round.
    pub fn prune(mut self, top_n: Option<usize>, metric: Metric) -> Self {
        self.top_n = top_n;
        self.metric = metric;
        self
    }

    pub fn run<D, K>(
        &mut self,
        kernel: &mut K,
        device: &mut D,
        candidates: Vec<Candidate>,
    ) -> CandidateSet
    where
        D: Device,
        K: Kernel<D> + ?Sized,
    {
        let mut set = CandidateSet::new(candidates);
        let mut flops = Vec::with_capacity(set.len());
        for index in 0..set.len() {
            kernel.set_parameters(set.candidate(index).values());
            flops.push(kernel.flop_count());
            set.set_extra_digits(index, kernel.sub_parameter_digits());
        }

        for round in 0..self.rounds {
            let live: Vec<usize> = set.live().collect();
            for index in live {
                let key = JournalKey::new(kernel.name(), set.candidate(index).values());
                match self.measure(kernel, device, &set, index, &key, round) {
                    Ok(micros) => set.record(index, micros, flops[index]),
                    Err(failure) => {
                        debug!(key = %key, round, %failure, "candidate retired");
                        set.mark_bad(index);
                    }
                }
            }
            set.finish_round();

            if let Some(n) = self.top_n {
                mark_top_n(n, &mut set, self.metric);
            }
            info!(round, survivors = set.live_count(), total = set.len(), "trial round complete");
        }
        set
    }

    fn measure<D, K>(
        &mut self,
        kernel: &mut K,
        device: &mut D,
        set: &CandidateSet,
        index: usize,
        key: &JournalKey,
        round: usize,
    ) -> Result<u64, TrialFailure>
    where
        D: Device,
        K: Kernel<D> + ?Sized,
    {
        if let Some(micros) = self.journal.query_time(key, round) {
            debug!(key = %key, round, micros, "reusing journaled timing");
            return match micros {
                0 => Err(TrialFailure::Validation),
                micros => Ok(micros),
            };
        }

        let state = self.journal.query_state(key);
        if state.is_known_bad() {
            info!(key = %key, %state, "skipping candidate that failed in an earlier run");
            return Err(TrialFailure::PriorCrash(state));
        }

        self.executor
            .run(&mut *self.journal, kernel, device, set.candidate(index))
    }
}
