//! Per-candidate measurement state for one trial loop.

use crate::stats::RunningStats;
use kerneltune_space::Candidate;

/// Candidates plus parallel per-candidate accumulators.
///
/// `ok` only ever goes from true to false; every other field of a retired
/// candidate is frozen from that point.
#[derive(Debug, Clone)]
pub struct CandidateSet {
    candidates: Vec<Candidate>,
    ok: Vec<bool>,
    accumulated_time_micros: Vec<u64>,
    accumulated_flops: Vec<u64>,
    stats: Vec<RunningStats>,
    extra_digits: Vec<Vec<usize>>,
    rounds: usize,
}

impl CandidateSet {
    pub fn new(candidates: Vec<Candidate>) -> Self {
        let len = candidates.len();
        Self {
            candidates,
            ok: vec![true; len],
            accumulated_time_micros: vec![0; len],
            accumulated_flops: vec![0; len],
            stats: vec![RunningStats::new(); len],
            extra_digits: vec![Vec::new(); len],
            rounds: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn candidate(&self, index: usize) -> &Candidate {
        &self.candidates[index]
    }

    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    pub fn is_ok(&self, index: usize) -> bool {
        self.ok[index]
    }

    pub fn mark_bad(&mut self, index: usize) {
        self.ok[index] = false;
    }

    /// Indices of candidates still in the running, in enumeration order.
    pub fn live(&self) -> impl Iterator<Item = usize> + '_ {
        self.ok
            .iter()
            .enumerate()
            .filter_map(|(index, ok)| ok.then_some(index))
    }

    pub fn live_count(&self) -> usize {
        self.ok.iter().filter(|ok| **ok).count()
    }

    /// Fold one successful trial into the accumulators. Ignored for retired
    /// candidates.
    pub fn record(&mut self, index: usize, elapsed_micros: u64, flops: u64) {
        if !self.ok[index] {
            return;
        }
        let elapsed_micros = elapsed_micros.max(1);
        self.accumulated_time_micros[index] += elapsed_micros;
        self.accumulated_flops[index] += flops;
        self.stats[index].push(throughput(flops, elapsed_micros));
    }

    pub fn set_extra_digits(&mut self, index: usize, digits: Vec<usize>) {
        self.extra_digits[index] = digits;
    }

    pub fn extra_digits(&self, index: usize) -> &[usize] {
        &self.extra_digits[index]
    }

    pub fn accumulated_time_micros(&self, index: usize) -> u64 {
        self.accumulated_time_micros[index]
    }

    pub fn accumulated_flops(&self, index: usize) -> u64 {
        self.accumulated_flops[index]
    }

    pub fn stats(&self, index: usize) -> &RunningStats {
        &self.stats[index]
    }

    /// Running mean throughput in GFLOP/s.
    pub fn average_throughput(&self, index: usize) -> f64 {
        self.stats[index].mean()
    }

    pub fn finish_round(&mut self) {
        self.rounds += 1;
    }

    /// Completed trial rounds.
    pub fn rounds(&self) -> usize {
        self.rounds
    }
}

/// GFLOP/s for `flops` operations in `elapsed_micros`.
pub fn throughput(flops: u64, elapsed_micros: u64) -> f64 {
    flops as f64 / elapsed_micros.max(1) as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn set_of(len: usize) -> CandidateSet {
        CandidateSet::new((0..len).map(|i| Candidate::new(&[], &[i], 0)).collect())
    }

    #[test]
    fn records_accumulate() {
        let mut set = set_of(1);
        set.record(0, 100, 2_000_000);
        set.record(0, 50, 2_000_000);
        assert_eq!(set.accumulated_time_micros(0), 150);
        assert_eq!(set.accumulated_flops(0), 4_000_000);
        assert_relative_eq!(set.average_throughput(0), (20.0 + 40.0) / 2.0);
    }

    #[test]
    fn retired_candidates_are_frozen() {
        let mut set = set_of(3);
        set.record(1, 100, 1000);
        set.mark_bad(1);
        set.record(1, 1, 1000);
        assert_eq!(set.accumulated_time_micros(1), 100);
        assert!(!set.is_ok(1));
        assert_eq!(set.live().collect::<Vec<_>>(), vec![0, 2]);
        assert_eq!(set.live_count(), 2);
    }
}
