//! Tuning knobs.

use crate::ranking::Metric;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TuneOptions {
    /// Rounds per confirmation pass, and per pass in exhaustive mode.
    pub trials: usize,
    /// Survivors kept after each round; `None` disables pruning.
    pub top_n: Option<usize>,
    pub two_phase: bool,
    /// Validate every output against the reference result.
    pub paranoid: bool,
    /// Count host-to-device input uploads as part of the measured time.
    pub include_transfer_cost: bool,
    pub max_iterations: usize,
    /// Extra parameter held fixed by the first geometry phase.
    pub initial_extra: usize,
    pub prune_by: Metric,
    /// Re-measure the converged winner for `trials` rounds.
    pub confirm: bool,
}

impl Default for TuneOptions {
    fn default() -> Self {
        Self {
            trials: 5,
            top_n: Some(8),
            two_phase: true,
            paranoid: true,
            include_transfer_cost: false,
            max_iterations: 16,
            initial_extra: 0,
            prune_by: Metric::AccumulatedTime,
            confirm: true,
        }
    }
}
