//! Matmul problem and tiling configuration structures.

use crate::device::LaunchGeometry;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Storage order of the right-hand operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum RhsLayout {
    /// `k x n`, row major.
    #[default]
    RowMajor,
    /// `n x k`, row major (the transpose is stored).
    Transposed,
}

impl RhsLayout {
    pub fn flag(self) -> usize {
        match self {
            RhsLayout::RowMajor => 0,
            RhsLayout::Transposed => 1,
        }
    }

    pub fn from_flag(flag: usize) -> Option<Self> {
        match flag {
            0 => Some(RhsLayout::RowMajor),
            1 => Some(RhsLayout::Transposed),
            _ => None,
        }
    }

    pub fn keyword(self) -> &'static str {
        match self {
            RhsLayout::RowMajor => "row_major",
            RhsLayout::Transposed => "transposed",
        }
    }

    pub fn from_keyword(word: &str) -> Option<Self> {
        match word {
            "row_major" => Some(RhsLayout::RowMajor),
            "transposed" => Some(RhsLayout::Transposed),
            _ => None,
        }
    }
}

/// Nesting of the per-invocation block loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum LoopOrder {
    #[default]
    Row,
    Column,
}

impl LoopOrder {
    pub fn keyword(self) -> &'static str {
        match self {
            LoopOrder::Row => "row",
            LoopOrder::Column => "column",
        }
    }

    pub fn from_keyword(word: &str) -> Option<Self> {
        match word {
            "row" => Some(LoopOrder::Row),
            "column" => Some(LoopOrder::Column),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MatmulProblem {
    pub m: usize,
    pub n: usize,
    pub k: usize,
    pub rhs_layout: RhsLayout,
}

impl MatmulProblem {
    pub fn new(m: usize, n: usize, k: usize) -> Self {
        Self {
            m,
            n,
            k,
            rhs_layout: RhsLayout::RowMajor,
        }
    }

    pub fn with_rhs_layout(mut self, rhs_layout: RhsLayout) -> Self {
        self.rhs_layout = rhs_layout;
        self
    }

    pub fn flops(&self) -> u64 {
        2 * self.m as u64 * self.n as u64 * self.k as u64
    }

    /// Leading part of every candidate: `[m, n, k, rhs_layout]`.
    pub fn fixed_values(&self) -> Vec<usize> {
        vec![self.m, self.n, self.k, self.rhs_layout.flag()]
    }
}

impl fmt::Display for MatmulProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{}x{} ({})",
            self.m,
            self.n,
            self.k,
            self.rhs_layout.keyword()
        )
    }
}

/// Device limits the search stays inside of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatmulLimits {
    pub max_group_invocations: usize,
    pub max_group_dim: usize,
    /// Larger per-invocation blocks are known to hang some drivers.
    pub max_block_elements: usize,
}

impl Default for MatmulLimits {
    fn default() -> Self {
        Self {
            max_group_invocations: 256,
            max_group_dim: 256,
            max_block_elements: 64,
        }
    }
}

/// Fully decoded configuration of one tiled matmul launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MatmulParams {
    pub problem: MatmulProblem,
    pub group_m: usize,
    pub group_n: usize,
    pub block_m: usize,
    pub block_n: usize,
    pub tile_k: usize,
    pub unroll: usize,
    pub order: LoopOrder,
}

impl MatmulParams {
    /// One invocation per `block_m x block_n` output block.
    pub fn launch(&self) -> LaunchGeometry {
        LaunchGeometry {
            global: [
                (self.problem.m / self.block_m.max(1)) as u32,
                (self.problem.n / self.block_n.max(1)) as u32,
                1,
            ],
            local: [self.group_m as u32, self.group_n as u32, 1],
        }
    }

    pub fn fits(&self, limits: &MatmulLimits) -> bool {
        let p = &self.problem;
        [
            self.group_m,
            self.group_n,
            self.block_m,
            self.block_n,
            self.tile_k,
            self.unroll,
        ]
        .iter()
        .all(|v| *v > 0)
            && p.m % (self.group_m * self.block_m) == 0
            && p.n % (self.group_n * self.block_n) == 0
            && self.group_m <= limits.max_group_dim
            && self.group_n <= limits.max_group_dim
            && self.group_m * self.group_n <= limits.max_group_invocations
            && self.block_m * self.block_n <= limits.max_block_elements
            && p.k % self.tile_k == 0
            && self.tile_k % self.unroll == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(group: (usize, usize), block: (usize, usize), tile_k: usize, unroll: usize) -> MatmulParams {
        MatmulParams {
            problem: MatmulProblem::new(64, 32, 16),
            group_m: group.0,
            group_n: group.1,
            block_m: block.0,
            block_n: block.1,
            tile_k,
            unroll,
            order: LoopOrder::Row,
        }
    }

    #[test]
    fn flops_count_multiply_add() {
        assert_eq!(MatmulProblem::new(64, 32, 16).flops(), 2 * 64 * 32 * 16);
    }

    #[test]
    fn limits_and_divisibility() {
        let limits = MatmulLimits::default();
        assert!(params((8, 4), (2, 2), 4, 2).fits(&limits));
        // 64 % (16 * 8) != 0
        assert!(!params((16, 4), (8, 1), 4, 2).fits(&limits));
        // block too large
        assert!(!params((1, 1), (16, 8), 4, 2).fits(&limits));
        // unroll must divide tile_k
        assert!(!params((8, 4), (2, 2), 2, 4).fits(&limits));
        // k % tile_k
        assert!(!params((8, 4), (2, 2), 32, 1).fits(&limits));
    }

    #[test]
    fn launch_counts_blocks() {
        let launch = params((8, 4), (2, 4), 4, 2).launch();
        assert_eq!(launch.global, [32, 8, 1]);
        assert_eq!(launch.local, [8, 4, 1]);
        assert_eq!(launch.groups(), [4, 2, 1]);
    }

    #[test]
    fn keywords_round_trip() {
        for layout in [RhsLayout::RowMajor, RhsLayout::Transposed] {
            assert_eq!(RhsLayout::from_keyword(layout.keyword()), Some(layout));
            assert_eq!(RhsLayout::from_flag(layout.flag()), Some(layout));
        }
        assert_eq!(LoopOrder::from_keyword("column"), Some(LoopOrder::Column));
        assert_eq!(LoopOrder::from_keyword("diagonal"), None);
    }
}
