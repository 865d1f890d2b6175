//! Deterministic enumeration of valid candidates.

use crate::candidate::{Candidate, SearchDomain};
use tracing::{debug, warn};

/// Walks the free parameters of a [`SearchDomain`] in nested-loop order:
/// geometry outermost (first axis slowest), extra parameter innermost.
///
/// Pruning and ranking break ties by first-seen order, so this order is part
/// of the contract.
pub struct CandidateEnumerator<'a, S: ?Sized> {
    domain: &'a S,
    pinned_geometry: Option<Vec<usize>>,
    pinned_extra: Option<usize>,
}

impl<'a, S: SearchDomain + ?Sized> CandidateEnumerator<'a, S> {
    pub fn new(domain: &'a S) -> Self {
        Self {
            domain,
            pinned_geometry: None,
            pinned_extra: None,
        }
    }

    /// Hold every geometry axis at the given values.
    pub fn pin_geometry(mut self, geometry: impl Into<Vec<usize>>) -> Self {
        self.pinned_geometry = Some(geometry.into());
        self
    }

    /// Hold the packed extra parameter at `extra`.
    pub fn pin_extra(mut self, extra: usize) -> Self {
        self.pinned_extra = Some(extra);
        self
    }

    pub fn enumerate(&self) -> Vec<Candidate> {
        let fixed = self.domain.fixed();
        let space = self.domain.space();
        let total = space.total_variations();

        let geometries = match &self.pinned_geometry {
            Some(pinned) if pinned.len() == self.domain.geometry_axes().len() => {
                vec![pinned.clone()]
            }
            Some(pinned) => {
                warn!(
                    pinned = ?pinned,
                    axes = self.domain.geometry_axes().len(),
                    "pinned geometry does not match the domain axes"
                );
                return Vec::new();
            }
            None => self.geometry_combinations(),
        };
        let extras: Vec<usize> = match self.pinned_extra {
            Some(extra) if extra < total => vec![extra],
            Some(_) => Vec::new(),
            None => (0..total).collect(),
        };

        let mut candidates = Vec::new();
        for geometry in &geometries {
            for &extra in &extras {
                let candidate = Candidate::new(&fixed, geometry, extra);
                let digits = space.decode(extra);
                if self.domain.is_valid(&candidate, &digits) {
                    candidates.push(candidate);
                }
            }
        }

        debug!(
            considered = geometries.len() * extras.len(),
            valid = candidates.len(),
            "enumerated candidates"
        );
        candidates
    }

    fn geometry_combinations(&self) -> Vec<Vec<usize>> {
        let axes = self.domain.geometry_axes();
        if axes.iter().any(|axis| axis.choices.is_empty()) {
            return Vec::new();
        }

        let mut combinations = Vec::new();
        let mut cursor = vec![0usize; axes.len()];
        loop {
            combinations.push(
                cursor
                    .iter()
                    .zip(axes)
                    .map(|(&i, axis)| axis.choices[i])
                    .collect(),
            );

            // Odometer step, last axis fastest.
            let mut pos = axes.len();
            loop {
                if pos == 0 {
                    return combinations;
                }
                pos -= 1;
                cursor[pos] += 1;
                if cursor[pos] < axes[pos].choices.len() {
                    break;
                }
                cursor[pos] = 0;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::GeometryAxis;
    use crate::space::ParameterSpace;

    struct Grid {
        axes: Vec<GeometryAxis>,
        space: ParameterSpace,
        size: usize,
    }

    impl Grid {
        fn new(size: usize) -> Self {
            Self {
                axes: vec![
                    GeometryAxis::new("group", vec![1, 2, 4]),
                    GeometryAxis::new("block", vec![1, 2]),
                ],
                space: ParameterSpace::new().with("unroll", 2).unwrap(),
                size,
            }
        }
    }

    impl SearchDomain for Grid {
        fn fixed(&self) -> Vec<usize> {
            vec![self.size]
        }

        fn geometry_axes(&self) -> &[GeometryAxis] {
            &self.axes
        }

        fn space(&self) -> &ParameterSpace {
            &self.space
        }

        fn is_valid(&self, candidate: &Candidate, _digits: &[usize]) -> bool {
            let g = candidate.geometry();
            self.size % (g[0] * g[1]) == 0
        }
    }

    #[test]
    fn enumeration_order_is_nested_loop_order() {
        let grid = Grid::new(8);
        let candidates = CandidateEnumerator::new(&grid).enumerate();
        let selections: Vec<(Vec<usize>, usize)> = candidates
            .iter()
            .map(|c| (c.geometry().to_vec(), c.extra()))
            .collect();
        assert_eq!(
            selections,
            vec![
                (vec![1, 1], 0),
                (vec![1, 1], 1),
                (vec![1, 2], 0),
                (vec![1, 2], 1),
                (vec![2, 1], 0),
                (vec![2, 1], 1),
                (vec![2, 2], 0),
                (vec![2, 2], 1),
                (vec![4, 1], 0),
                (vec![4, 1], 1),
                (vec![4, 2], 0),
                (vec![4, 2], 1),
            ]
        );
        assert_eq!(grid.total_size(), 12);
    }

    #[test]
    fn validity_filter_drops_combinations() {
        let grid = Grid::new(4);
        let candidates = CandidateEnumerator::new(&grid).enumerate();
        assert!(candidates.iter().all(|c| {
            let g = c.geometry();
            g[0] * g[1] <= 4
        }));
        assert_eq!(candidates.len(), 10);
    }

    #[test]
    fn pins_restrict_free_parameters() {
        let grid = Grid::new(8);
        let by_extra = CandidateEnumerator::new(&grid).pin_extra(1).enumerate();
        assert_eq!(by_extra.len(), 6);
        assert!(by_extra.iter().all(|c| c.extra() == 1));

        let by_geometry = CandidateEnumerator::new(&grid)
            .pin_geometry(vec![2, 2])
            .enumerate();
        assert_eq!(by_geometry.len(), 2);
        assert!(by_geometry.iter().all(|c| c.geometry() == [2, 2]));
    }

    #[test]
    fn out_of_range_pins_yield_nothing() {
        let grid = Grid::new(8);
        assert!(CandidateEnumerator::new(&grid)
            .pin_extra(2)
            .enumerate()
            .is_empty());
        assert!(CandidateEnumerator::new(&grid)
            .pin_geometry(vec![1])
            .enumerate()
            .is_empty());
    }
}
