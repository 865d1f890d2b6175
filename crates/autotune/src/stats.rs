//! Online mean and variance.

use serde::{Deserialize, Serialize};

/// Welford accumulator over throughput samples.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RunningStats {
    mean: f64,
    variance_acc: f64,
    samples: usize,
}

impl RunningStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, value: f64) {
        let k = self.samples as f64;
        let delta = value - self.mean;
        self.mean += delta / (k + 1.0);
        self.variance_acc += k / (k + 1.0) * delta * delta;
        self.samples += 1;
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn samples(&self) -> usize {
        self.samples
    }

    pub fn variance_acc(&self) -> f64 {
        self.variance_acc
    }

    /// Population variance; 0 before the first sample.
    pub fn variance(&self) -> f64 {
        if self.samples == 0 {
            0.0
        } else {
            self.variance_acc / self.samples as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }
}

impl FromIterator<f64> for RunningStats {
    fn from_iter<I: IntoIterator<Item = f64>>(iter: I) -> Self {
        let mut stats = Self::new();
        iter.into_iter().for_each(|value| stats.push(value));
        stats
    }
}
