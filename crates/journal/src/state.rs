//! Lifecycle states and on-disk record values.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Checkpoint written before (or after) each risky step of a trial.
///
/// Encoded on disk as negative integers; non-negative integers are elapsed
/// microsecond measurements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Checkpoint {
    BuildInProgress,
    BuildOk,
    RunInProgress,
    RunOk,
}

impl Checkpoint {
    pub const fn sentinel(self) -> i64 {
        match self {
            Checkpoint::BuildInProgress => -1,
            Checkpoint::BuildOk => -2,
            Checkpoint::RunInProgress => -3,
            Checkpoint::RunOk => -4,
        }
    }

    pub const fn from_sentinel(value: i64) -> Option<Self> {
        match value {
            -1 => Some(Checkpoint::BuildInProgress),
            -2 => Some(Checkpoint::BuildOk),
            -3 => Some(Checkpoint::RunInProgress),
            -4 => Some(Checkpoint::RunOk),
            _ => None,
        }
    }
}

/// Last known lifecycle state of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunState {
    Missing,
    BuildInProgress,
    BuildOk,
    RunInProgress,
    RunOk,
}

impl RunState {
    /// The previous process died or hung inside a risky call for this key.
    pub fn is_dangling(self) -> bool {
        matches!(self, RunState::BuildInProgress | RunState::RunInProgress)
    }

    /// Anything that was attempted and never reached `RunOk` is bad for good.
    pub fn is_known_bad(self) -> bool {
        !matches!(self, RunState::Missing | RunState::RunOk)
    }

    pub fn checkpoint(self) -> Option<Checkpoint> {
        match self {
            RunState::Missing => None,
            RunState::BuildInProgress => Some(Checkpoint::BuildInProgress),
            RunState::BuildOk => Some(Checkpoint::BuildOk),
            RunState::RunInProgress => Some(Checkpoint::RunInProgress),
            RunState::RunOk => Some(Checkpoint::RunOk),
        }
    }
}

impl From<Checkpoint> for RunState {
    fn from(checkpoint: Checkpoint) -> Self {
        match checkpoint {
            Checkpoint::BuildInProgress => RunState::BuildInProgress,
            Checkpoint::BuildOk => RunState::BuildOk,
            Checkpoint::RunInProgress => RunState::RunInProgress,
            Checkpoint::RunOk => RunState::RunOk,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RunState::Missing => "MISSING",
            RunState::BuildInProgress => "BUILD_IN_PROGRESS",
            RunState::BuildOk => "BUILD_OK",
            RunState::RunInProgress => "RUN_IN_PROGRESS",
            RunState::RunOk => "RUN_OK",
        };
        f.write_str(label)
    }
}

/// One journal line's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JournalEntry {
    Checkpoint(Checkpoint),
    /// Elapsed microseconds of one trial; 0 records a failed validation.
    Elapsed(u64),
}

impl JournalEntry {
    pub fn encode(self) -> i64 {
        match self {
            JournalEntry::Checkpoint(checkpoint) => checkpoint.sentinel(),
            JournalEntry::Elapsed(micros) => i64::try_from(micros).unwrap_or(i64::MAX),
        }
    }

    pub fn decode(value: i64) -> Option<Self> {
        if value >= 0 {
            Some(JournalEntry::Elapsed(value as u64))
        } else {
            Checkpoint::from_sentinel(value).map(JournalEntry::Checkpoint)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinels_match_on_disk_contract() {
        assert_eq!(Checkpoint::BuildInProgress.sentinel(), -1);
        assert_eq!(Checkpoint::BuildOk.sentinel(), -2);
        assert_eq!(Checkpoint::RunInProgress.sentinel(), -3);
        assert_eq!(Checkpoint::RunOk.sentinel(), -4);
        assert_eq!(JournalEntry::decode(-5), None);
        assert_eq!(JournalEntry::decode(0), Some(JournalEntry::Elapsed(0)));
    }

    #[test]
    fn bad_states() {
        assert!(!RunState::Missing.is_known_bad());
        assert!(!RunState::RunOk.is_known_bad());
        assert!(RunState::BuildOk.is_known_bad());
        assert!(RunState::BuildInProgress.is_dangling());
        assert!(RunState::RunInProgress.is_dangling());
        assert!(!RunState::BuildOk.is_dangling());
    }
}
