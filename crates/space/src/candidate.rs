//! Candidate parameter tuples and the domain they are drawn from.

use crate::space::ParameterSpace;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One concrete configuration: `fixed ++ geometry ++ [extra]`.
///
/// The fixed prefix carries problem sizes and layout flags, the geometry
/// carries work-group and inner-block shape, and the last value is the
/// packed extra parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Candidate {
    values: Vec<usize>,
    fixed_len: usize,
}

impl Candidate {
    pub fn new(fixed: &[usize], geometry: &[usize], extra: usize) -> Self {
        let mut values = Vec::with_capacity(fixed.len() + geometry.len() + 1);
        values.extend_from_slice(fixed);
        values.extend_from_slice(geometry);
        values.push(extra);
        Self {
            values,
            fixed_len: fixed.len(),
        }
    }

    /// Full parameter vector handed to the kernel.
    pub fn values(&self) -> &[usize] {
        &self.values
    }

    pub fn fixed(&self) -> &[usize] {
        &self.values[..self.fixed_len]
    }

    pub fn geometry(&self) -> &[usize] {
        &self.values[self.fixed_len..self.values.len() - 1]
    }

    pub fn extra(&self) -> usize {
        self.values[self.values.len() - 1]
    }

    /// The part of the candidate the search actually chooses.
    pub fn selection(&self) -> Selection {
        Selection {
            geometry: self.geometry().to_vec(),
            extra: self.extra(),
        }
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |values: &[usize]| {
            values
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(",")
        };
        write!(
            f,
            "[{}|{}|{}]",
            join(self.fixed()),
            join(self.geometry()),
            self.extra()
        )
    }
}

/// Geometry plus extra parameter; compared across search iterations to
/// detect a fixed point.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Selection {
    pub geometry: Vec<usize>,
    pub extra: usize,
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "geometry={:?} extra={}", self.geometry, self.extra)
    }
}

/// A geometry dimension and the values worth trying for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeometryAxis {
    pub name: String,
    pub choices: Vec<usize>,
}

impl GeometryAxis {
    pub fn new(name: impl Into<String>, choices: impl Into<Vec<usize>>) -> Self {
        Self {
            name: name.into(),
            choices: choices.into(),
        }
    }
}

/// Problem-specific description of what can be tuned and what is legal.
pub trait SearchDomain {
    /// Problem sizes and layout flags, identical for every candidate.
    fn fixed(&self) -> Vec<usize>;

    fn geometry_axes(&self) -> &[GeometryAxis];

    fn space(&self) -> &ParameterSpace;

    /// Pure validity check; `digits` is `space().decode(candidate.extra())`.
    fn is_valid(&self, candidate: &Candidate, digits: &[usize]) -> bool;

    /// Number of (geometry, extra) combinations before filtering.
    fn total_size(&self) -> usize {
        self.geometry_axes()
            .iter()
            .map(|axis| axis.choices.len())
            .fold(self.space().total_variations(), usize::saturating_mul)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidate_views_split_values() {
        let candidate = Candidate::new(&[64, 64, 32, 0], &[8, 8, 2, 2], 11);
        assert_eq!(candidate.values(), &[64, 64, 32, 0, 8, 8, 2, 2, 11]);
        assert_eq!(candidate.fixed(), &[64, 64, 32, 0]);
        assert_eq!(candidate.geometry(), &[8, 8, 2, 2]);
        assert_eq!(candidate.extra(), 11);
        assert_eq!(candidate.to_string(), "[64,64,32,0|8,8,2,2|11]");
    }

    #[test]
    fn selection_equality_ignores_fixed_prefix() {
        let a = Candidate::new(&[1], &[2, 4], 3);
        let b = Candidate::new(&[9], &[2, 4], 3);
        assert_eq!(a.selection(), b.selection());
        assert_ne!(a, b);
    }

    #[test]
    fn candidate_serializes() {
        let candidate = Candidate::new(&[16], &[2], 1);
        let json = serde_json::to_string(&candidate).unwrap();
        let parsed: Candidate = serde_json::from_str(&json).unwrap();
        assert_eq!(candidate, parsed);
    }
}
