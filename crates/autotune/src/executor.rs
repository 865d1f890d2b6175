//! One checkpointed, timed trial of one candidate.

use crate::error::TrialFailure;
use crate::options::TuneOptions;
use kerneltune_journal::{Checkpoint, JournalEntry, JournalKey, RunJournal};
use kerneltune_kernels::{Device, Kernel};
use kerneltune_space::Candidate;
use tracing::{debug, warn};

/// Runs the build/bind/run sequence for a candidate, journaling a checkpoint
/// before every step that can take the process down with it.
///
/// A crash or hang inside a risky call leaves a `*_IN_PROGRESS` record as
/// the last state for the key; a restarted process reads it back and never
/// tries that candidate again.
#[derive(Debug, Clone, Copy)]
pub struct TrialExecutor {
    paranoid: bool,
    include_transfer_cost: bool,
}

impl Default for TrialExecutor {
    fn default() -> Self {
        Self::new(true, false)
    }
}

impl TrialExecutor {
    pub fn new(paranoid: bool, include_transfer_cost: bool) -> Self {
        Self {
            paranoid,
            include_transfer_cost,
        }
    }

    pub fn from_options(options: &TuneOptions) -> Self {
        Self::new(options.paranoid, options.include_transfer_cost)
    }

    pub fn paranoid(&self) -> bool {
        self.paranoid
    }

    /// Execute one trial and return its elapsed microseconds (always > 0).
    ///
    /// Journal append failures are logged and the trial carries on.
    pub fn run<D, K>(
        &self,
        journal: &mut RunJournal,
        kernel: &mut K,
        device: &mut D,
        candidate: &Candidate,
    ) -> Result<u64, TrialFailure>
    where
        D: Device,
        K: Kernel<D> + ?Sized,
    {
        let key = JournalKey::new(kernel.name(), candidate.values());
        kernel.set_parameters(candidate.values());

        checkpoint(journal, &key, Checkpoint::BuildInProgress);
        kernel.rebuild_source(device).map_err(TrialFailure::Build)?;

        checkpoint(journal, &key, Checkpoint::BuildOk);
        kernel
            .bind_arguments(device, self.include_transfer_cost)
            .map_err(TrialFailure::Bind)?;

        checkpoint(journal, &key, Checkpoint::RunInProgress);
        let start = device.timestamp();
        let event = kernel.enqueue(device, &[]).map_err(TrialFailure::Execution)?;
        device
            .wait(std::slice::from_ref(&event))
            .map_err(TrialFailure::Execution)?;
        kernel
            .read_back_output(device)
            .map_err(TrialFailure::Execution)?;
        let elapsed = device.elapsed_micros(start).max(1);

        let valid = !self.paranoid || kernel.validate_output();

        checkpoint(journal, &key, Checkpoint::RunOk);
        let recorded = if valid { elapsed } else { 0 };
        if let Err(e) = journal.append(&key, JournalEntry::Elapsed(recorded)) {
            warn!(key = %key, error = %e, "failed to journal trial timing");
        }

        if !valid {
            return Err(TrialFailure::Validation);
        }
        debug!(key = %key, elapsed_us = elapsed, "trial finished");
        Ok(elapsed)
    }
}

fn checkpoint(journal: &mut RunJournal, key: &JournalKey, checkpoint: Checkpoint) {
    if let Err(e) = journal.append(key, JournalEntry::Checkpoint(checkpoint)) {
        warn!(key = %key, ?checkpoint, error = %e, "failed to journal checkpoint");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Behavior, Fault, ScriptedDevice, ScriptedKernel};
    use kerneltune_journal::RunState;

    fn candidate(value: usize) -> Candidate {
        Candidate::new(&[], &[value], 0)
    }

    fn key(value: usize) -> JournalKey {
        JournalKey::new("scripted", candidate(value).values())
    }

    fn kernel() -> ScriptedKernel<impl Fn(&[usize]) -> Behavior> {
        ScriptedKernel::new("scripted", 1_000_000, |params: &[usize]| match params[0] {
            1 => Behavior::fault(Fault::Build),
            2 => Behavior::fault(Fault::Bind),
            3 => Behavior::fault(Fault::Execute),
            4 => Behavior::fault(Fault::WrongOutput),
            _ => Behavior::costing(250),
        })
    }

    #[test]
    fn successful_trial_writes_all_checkpoints() {
        let mut journal = RunJournal::in_memory();
        let mut device = ScriptedDevice::new();
        let mut kernel = kernel();

        let elapsed = TrialExecutor::default()
            .run(&mut journal, &mut kernel, &mut device, &candidate(0))
            .unwrap();
        assert_eq!(elapsed, 250);
        assert_eq!(journal.query_state(&key(0)), RunState::RunOk);
        assert_eq!(journal.timings(&key(0)), &[250]);
    }

    #[test]
    fn failures_stop_at_the_matching_checkpoint() {
        let executor = TrialExecutor::default();
        let mut journal = RunJournal::in_memory();
        let mut device = ScriptedDevice::new();
        let mut kernel = kernel();

        let cases = [
            (1, RunState::BuildInProgress),
            (2, RunState::BuildOk),
            (3, RunState::RunInProgress),
        ];
        for (value, state) in cases {
            let result = executor.run(&mut journal, &mut kernel, &mut device, &candidate(value));
            assert!(result.is_err());
            assert_eq!(journal.query_state(&key(value)), state);
            assert!(journal.timings(&key(value)).is_empty());
        }
    }

    #[test]
    fn wrong_output_is_journaled_as_zero() {
        let mut journal = RunJournal::in_memory();
        let mut device = ScriptedDevice::new();
        let mut kernel = kernel();

        let result =
            TrialExecutor::default().run(&mut journal, &mut kernel, &mut device, &candidate(4));
        assert!(matches!(result, Err(TrialFailure::Validation)));
        assert_eq!(journal.query_state(&key(4)), RunState::RunOk);
        assert_eq!(journal.timings(&key(4)), &[0]);

        // Without validation the same output is accepted.
        let mut journal = RunJournal::in_memory();
        let elapsed = TrialExecutor::new(false, false)
            .run(&mut journal, &mut kernel, &mut device, &candidate(4))
            .unwrap();
        assert!(elapsed > 0);
    }

    #[test]
    fn zero_elapsed_is_clamped() {
        let mut journal = RunJournal::in_memory();
        let mut device = ScriptedDevice::new();
        let mut kernel = ScriptedKernel::new("free", 10, |_: &[usize]| Behavior::costing(0));

        let elapsed = TrialExecutor::default()
            .run(&mut journal, &mut kernel, &mut device, &candidate(0))
            .unwrap();
        assert_eq!(elapsed, 1);
    }
}
