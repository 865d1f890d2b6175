//! Numerical comparison of kernel output against a reference.

use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tolerance {
    pub max_abs_error: f64,
    pub max_rel_error: f64,
}

impl Default for Tolerance {
    fn default() -> Self {
        Self {
            max_abs_error: 1e-3,
            max_rel_error: 1e-3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OutputComparison {
    pub max_abs_error: f64,
    pub mean_abs_error: f64,
    pub l2_error: f64,
    /// Elements outside `abs + rel * |expected|`.
    pub mismatches: usize,
}

impl OutputComparison {
    pub fn passed(&self) -> bool {
        self.mismatches == 0
    }
}

/// Element-wise comparison; a shape mismatch counts every element as wrong.
pub fn compare_outputs(
    actual: ArrayView2<'_, f32>,
    expected: ArrayView2<'_, f32>,
    tolerance: Tolerance,
) -> OutputComparison {
    if actual.shape() != expected.shape() {
        return OutputComparison {
            max_abs_error: f64::INFINITY,
            mean_abs_error: f64::INFINITY,
            l2_error: f64::INFINITY,
            mismatches: expected.len().max(actual.len()),
        };
    }

    let mut max_abs_error = 0.0_f64;
    let mut sum_abs = 0.0_f64;
    let mut sum_sq = 0.0_f64;
    let mut mismatches = 0usize;
    for (a, e) in actual.iter().zip(expected.iter()) {
        let (a, e) = (*a as f64, *e as f64);
        let diff = (a - e).abs();
        // NaN never compares within tolerance.
        if !(diff <= tolerance.max_abs_error + tolerance.max_rel_error * e.abs()) {
            mismatches += 1;
        }
        max_abs_error = max_abs_error.max(if diff.is_nan() { f64::INFINITY } else { diff });
        sum_abs += diff;
        sum_sq += diff * diff;
    }

    OutputComparison {
        max_abs_error,
        mean_abs_error: sum_abs / expected.len().max(1) as f64,
        l2_error: sum_sq.sqrt(),
        mismatches,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::Array2;

    #[test]
    fn identical_outputs_pass() {
        let a = Array2::from_shape_fn((4, 3), |(i, j)| (i * 3 + j) as f32);
        let cmp = compare_outputs(a.view(), a.view(), Tolerance::default());
        assert!(cmp.passed());
        assert_abs_diff_eq!(cmp.max_abs_error, 0.0);
    }

    #[test]
    fn reports_error_metrics() {
        let expected = Array2::<f32>::zeros((2, 2));
        let mut actual = expected.clone();
        actual[(1, 0)] = 0.5;
        let cmp = compare_outputs(actual.view(), expected.view(), Tolerance::default());
        assert!(!cmp.passed());
        assert_eq!(cmp.mismatches, 1);
        assert_abs_diff_eq!(cmp.max_abs_error, 0.5);
        assert_abs_diff_eq!(cmp.mean_abs_error, 0.125);
        assert_abs_diff_eq!(cmp.l2_error, 0.5);
    }

    #[test]
    fn nan_and_shape_mismatch_fail() {
        let expected = Array2::<f32>::ones((2, 2));
        let mut actual = expected.clone();
        actual[(0, 0)] = f32::NAN;
        assert!(!compare_outputs(actual.view(), expected.view(), Tolerance::default()).passed());

        let wrong_shape = Array2::<f32>::ones((2, 3));
        assert!(!compare_outputs(wrong_shape.view(), expected.view(), Tolerance::default()).passed());
    }

    #[test]
    fn relative_tolerance_scales_with_magnitude() {
        let expected = Array2::from_elem((1, 1), 1000.0_f32);
        let actual = Array2::from_elem((1, 1), 1000.5_f32);
        assert!(compare_outputs(actual.view(), expected.view(), Tolerance::default()).passed());
    }
}
