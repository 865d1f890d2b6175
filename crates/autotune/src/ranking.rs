//! Pruning and ranking of measured candidates.

use crate::set::CandidateSet;
use kerneltune_space::Candidate;
use serde::{Deserialize, Serialize};
use std::cmp::{Ordering, Reverse};
use std::collections::BTreeMap;
use tracing::debug;

/// Ordering used when pruning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// Smaller accumulated time is better.
    #[default]
    AccumulatedTime,
    /// Larger running mean throughput is better.
    AverageThroughput,
}

impl Metric {
    pub fn value(self, set: &CandidateSet, index: usize) -> f64 {
        match self {
            Metric::AccumulatedTime => set.accumulated_time_micros(index) as f64,
            Metric::AverageThroughput => set.average_throughput(index),
        }
    }

    /// `Less` when `a` is better than `b`.
    fn compare(self, a: f64, b: f64) -> Ordering {
        match self {
            Metric::AccumulatedTime => a.total_cmp(&b),
            Metric::AverageThroughput => b.total_cmp(&a),
        }
    }
}

/// Retire every live candidate outside the best `n`.
///
/// Values are walked best first with equal values collapsed into one rank;
/// a rank is kept whole while fewer than `n` candidates have been kept, so
/// ties at the cut are never split. Returns the number of candidates
/// retired.
pub fn mark_top_n(n: usize, set: &mut CandidateSet, metric: Metric) -> usize {
    let live: Vec<(usize, f64)> = set
        .live()
        .map(|index| (index, metric.value(set, index)))
        .collect();

    let mut sorted: Vec<f64> = live.iter().map(|(_, value)| *value).collect();
    sorted.sort_by(|a, b| metric.compare(*a, *b));

    let mut kept = 0usize;
    let mut cut: Option<f64> = None;
    for value in &sorted {
        let same_rank = cut.is_some_and(|c| c.total_cmp(value).is_eq());
        if !same_rank && kept >= n {
            break;
        }
        kept += 1;
        cut = Some(*value);
    }

    let mut retired = 0;
    for (index, value) in live {
        let keep = cut.is_some_and(|c| metric.compare(value, c) != Ordering::Greater);
        if !keep {
            set.mark_bad(index);
            retired += 1;
        }
    }
    debug!(n, ?metric, retired, survivors = set.live_count(), "pruned to top n");
    retired
}

#[derive(Debug, Clone, Copy)]
struct Throughput(f64);

impl PartialEq for Throughput {
    fn eq(&self, other: &Self) -> bool {
        self.0.total_cmp(&other.0).is_eq()
    }
}

impl Eq for Throughput {}

impl PartialOrd for Throughput {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Throughput {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

fn by_throughput(set: &CandidateSet) -> BTreeMap<Reverse<Throughput>, usize> {
    let mut map = BTreeMap::new();
    for index in set.live() {
        // Later candidates overwrite earlier ones with the same throughput.
        map.insert(Reverse(Throughput(set.average_throughput(index))), index);
    }
    map
}

/// Index of the `nth` best survivor by mean throughput (0 = best). Equal
/// throughputs collapse to the last-enumerated candidate.
pub fn rank(nth: usize, set: &CandidateSet) -> Option<usize> {
    by_throughput(set).into_values().nth(nth)
}

/// Every distinct-throughput survivor, best first.
pub fn ranking(set: &CandidateSet) -> Vec<usize> {
    by_throughput(set).into_values().collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRow {
    pub index: usize,
    pub candidate: Candidate,
    pub accumulated_time_micros: u64,
    pub average_throughput: f64,
    pub std_dev: f64,
    pub samples: usize,
    pub extra_digits: Vec<usize>,
}

/// Survivors, fastest accumulated time first.
pub fn report(set: &CandidateSet) -> Vec<ReportRow> {
    let mut live: Vec<usize> = set.live().collect();
    live.sort_by_key(|index| (set.accumulated_time_micros(*index), *index));
    live.into_iter()
        .map(|index| {
            let stats = set.stats(index);
            ReportRow {
                index,
                candidate: set.candidate(index).clone(),
                accumulated_time_micros: set.accumulated_time_micros(index),
                average_throughput: stats.mean(),
                std_dev: stats.std_dev(),
                samples: stats.samples(),
                extra_digits: set.extra_digits(index).to_vec(),
            }
        })
        .collect()
}
