//! Tiled matrix multiplication: search domain and tunable kernel.

use crate::config::{LoopOrder, MatmulLimits, MatmulParams, MatmulProblem, RhsLayout};
use crate::device::{Device, DeviceError, KernelArgs};
use crate::kernel::Kernel;
use crate::source::{matmul_source, ENTRY_POINT};
use crate::verify::{compare_outputs, OutputComparison, Tolerance};
use anyhow::{ensure, Result};
use kerneltune_space::{Candidate, GeometryAxis, ParameterSpace, SearchDomain};
use ndarray::Array2;
use tracing::debug;

pub const TILE_K_CHOICES: [usize; 5] = [1, 2, 4, 8, 16];
pub const UNROLL_CHOICES: [usize; 3] = [1, 2, 4];
pub const ORDER_CHOICES: [LoopOrder; 2] = [LoopOrder::Row, LoopOrder::Column];

const GROUP_CHOICES: [usize; 5] = [1, 2, 4, 8, 16];
const BLOCK_CHOICES: [usize; 4] = [1, 2, 4, 8];

/// Candidate layout: `[m, n, k, rhs_layout, group_m, group_n, block_m,
/// block_n, extra]`, where `extra` packs `tile_k`, `unroll` and `order`.
#[derive(Debug, Clone)]
pub struct MatmulSpace {
    problem: MatmulProblem,
    limits: MatmulLimits,
    axes: Vec<GeometryAxis>,
    space: ParameterSpace,
}

impl MatmulSpace {
    pub fn new(problem: MatmulProblem) -> Result<Self> {
        Self::with_limits(problem, MatmulLimits::default())
    }

    pub fn with_limits(problem: MatmulProblem, limits: MatmulLimits) -> Result<Self> {
        ensure!(
            problem.m > 0 && problem.n > 0 && problem.k > 0,
            "matmul dimensions must be non-zero, got {problem}"
        );
        ensure!(
            [problem.m, problem.n, problem.k]
                .iter()
                .all(|dim| u32::try_from(*dim).is_ok()),
            "matmul dimensions must fit in u32, got {problem}"
        );

        let space = ParameterSpace::new()
            .with("tile_k", TILE_K_CHOICES.len())?
            .with("unroll", UNROLL_CHOICES.len())?
            .with("order", ORDER_CHOICES.len())?;
        let axes = vec![
            GeometryAxis::new("group_m", GROUP_CHOICES),
            GeometryAxis::new("group_n", GROUP_CHOICES),
            GeometryAxis::new("block_m", BLOCK_CHOICES),
            GeometryAxis::new("block_n", BLOCK_CHOICES),
        ];

        Ok(Self {
            problem,
            limits,
            axes,
            space,
        })
    }

    pub fn problem(&self) -> MatmulProblem {
        self.problem
    }

    pub fn limits(&self) -> MatmulLimits {
        self.limits
    }

    /// Decode a full parameter vector. `None` when the vector has the wrong
    /// shape or an out-of-range value.
    pub fn params_for(&self, values: &[usize]) -> Option<MatmulParams> {
        let &[m, n, k, layout, group_m, group_n, block_m, block_n, extra] = values else {
            return None;
        };
        if extra >= self.space.total_variations() {
            return None;
        }
        let digits = self.space.decode(extra);
        Some(MatmulParams {
            problem: MatmulProblem {
                m,
                n,
                k,
                rhs_layout: RhsLayout::from_flag(layout)?,
            },
            group_m,
            group_n,
            block_m,
            block_n,
            tile_k: *TILE_K_CHOICES.get(digits[0])?,
            unroll: *UNROLL_CHOICES.get(digits[1])?,
            order: *ORDER_CHOICES.get(digits[2])?,
        })
    }

    /// Packed extra parameter for explicit `tile_k`/`unroll`/`order` values.
    pub fn extra_for(&self, tile_k: usize, unroll: usize, order: LoopOrder) -> Option<usize> {
        let digits = [
            TILE_K_CHOICES.iter().position(|v| *v == tile_k)?,
            UNROLL_CHOICES.iter().position(|v| *v == unroll)?,
            ORDER_CHOICES.iter().position(|v| *v == order)?,
        ];
        self.space.encode(&digits)
    }
}

impl SearchDomain for MatmulSpace {
    fn fixed(&self) -> Vec<usize> {
        self.problem.fixed_values()
    }

    fn geometry_axes(&self) -> &[GeometryAxis] {
        &self.axes
    }

    fn space(&self) -> &ParameterSpace {
        &self.space
    }

    fn is_valid(&self, candidate: &Candidate, _digits: &[usize]) -> bool {
        self.params_for(candidate.values())
            .is_some_and(|params| params.fits(&self.limits))
    }
}

struct MatmulBuffers<B> {
    lhs: B,
    rhs: B,
    out: B,
}

/// Tiled matmul kernel over deterministic pseudo-random inputs.
///
/// Inputs and the reference product are computed once on construction;
/// buffers are allocated on the first bind and reused for every later
/// parameter vector.
pub struct TiledMatmulKernel<D: Device> {
    domain: MatmulSpace,
    tolerance: Tolerance,
    lhs: Vec<f32>,
    rhs: Vec<f32>,
    expected: Array2<f32>,
    output: Array2<f32>,
    params: Vec<usize>,
    current: Option<MatmulParams>,
    program: Option<D::Program>,
    buffers: Option<MatmulBuffers<D::Buffer>>,
    inputs_resident: bool,
    upload_on_enqueue: bool,
}

impl<D: Device> TiledMatmulKernel<D> {
    pub fn new(domain: MatmulSpace, seed: u64) -> Self {
        let problem = domain.problem();
        let mut rng = fastrand::Rng::with_seed(seed);
        let lhs = Array2::from_shape_simple_fn((problem.m, problem.k), || rng.f32() * 2.0 - 1.0);
        let rhs = Array2::from_shape_simple_fn((problem.k, problem.n), || rng.f32() * 2.0 - 1.0);
        let expected = lhs.dot(&rhs);

        let rhs_stored = match problem.rhs_layout {
            RhsLayout::RowMajor => rhs.iter().copied().collect(),
            RhsLayout::Transposed => rhs.t().iter().copied().collect(),
        };

        Self {
            domain,
            tolerance: Tolerance::default(),
            lhs: lhs.iter().copied().collect(),
            rhs: rhs_stored,
            expected,
            output: Array2::zeros((problem.m, problem.n)),
            params: Vec::new(),
            current: None,
            program: None,
            buffers: None,
            inputs_resident: false,
            upload_on_enqueue: false,
        }
    }

    pub fn with_tolerance(mut self, tolerance: Tolerance) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn domain(&self) -> &MatmulSpace {
        &self.domain
    }

    /// Decoded parameters of the last successful rebuild.
    pub fn current(&self) -> Option<&MatmulParams> {
        self.current.as_ref()
    }

    pub fn compare(&self) -> OutputComparison {
        compare_outputs(self.output.view(), self.expected.view(), self.tolerance)
    }

    fn upload_inputs(&mut self, device: &mut D) -> Result<(), DeviceError> {
        let buffers = self
            .buffers
            .as_ref()
            .ok_or_else(|| DeviceError::Transfer("buffers not bound".to_string()))?;
        device.write_buffer(&buffers.lhs, &self.lhs)?;
        device.write_buffer(&buffers.rhs, &self.rhs)?;
        self.inputs_resident = true;
        Ok(())
    }
}

impl<D: Device> Kernel<D> for TiledMatmulKernel<D> {
    fn name(&self) -> &str {
        ENTRY_POINT
    }

    fn set_parameters(&mut self, params: &[usize]) {
        self.params = params.to_vec();
        self.current = None;
        self.program = None;
    }

    fn parameters(&self) -> &[usize] {
        &self.params
    }

    fn flop_count(&self) -> u64 {
        self.domain.problem().flops()
    }

    fn rebuild_source(&mut self, device: &mut D) -> Result<(), DeviceError> {
        let params = self
            .domain
            .params_for(&self.params)
            .filter(|params| params.problem == self.domain.problem())
            .ok_or_else(|| {
                DeviceError::Build(format!("parameters {:?} do not decode", self.params))
            })?;

        let source = matmul_source(&params, device.dialect());
        debug!(params = ?self.params, bytes = source.len(), "building tiled matmul");
        self.program = Some(device.build_program(&source, ENTRY_POINT)?);
        self.current = Some(params);
        Ok(())
    }

    fn bind_arguments(
        &mut self,
        device: &mut D,
        include_transfer_cost: bool,
    ) -> Result<(), DeviceError> {
        let problem = self.domain.problem();
        if self.buffers.is_none() {
            self.buffers = Some(MatmulBuffers {
                lhs: device.create_buffer("lhs", self.lhs.len())?,
                rhs: device.create_buffer("rhs", self.rhs.len())?,
                out: device.create_buffer("out", problem.m * problem.n)?,
            });
            self.inputs_resident = false;
        }

        // Stale results from a previous candidate must not validate.
        self.output.fill(0.0);
        if let Some(buffers) = &self.buffers {
            device.write_buffer(&buffers.out, &vec![0.0; problem.m * problem.n])?;
        }

        self.upload_on_enqueue = include_transfer_cost;
        if !include_transfer_cost && !self.inputs_resident {
            self.upload_inputs(device)?;
        }
        Ok(())
    }

    fn enqueue(&mut self, device: &mut D, wait_for: &[D::Event]) -> Result<D::Event, DeviceError> {
        if self.upload_on_enqueue {
            self.upload_inputs(device)?;
        }
        let (Some(params), Some(program), Some(buffers)) =
            (self.current.as_ref(), self.program.as_ref(), self.buffers.as_ref())
        else {
            return Err(DeviceError::Launch(
                "kernel enqueued before build and bind".to_string(),
            ));
        };

        let problem = params.problem;
        let bound = [&buffers.lhs, &buffers.rhs, &buffers.out];
        let scalars = [problem.m as u32, problem.n as u32, problem.k as u32];
        let args = KernelArgs {
            buffers: &bound,
            scalars: &scalars,
        };
        device.enqueue(program, &args, params.launch(), wait_for)
    }

    fn read_back_output(&mut self, device: &mut D) -> Result<(), DeviceError> {
        let buffers = self
            .buffers
            .as_ref()
            .ok_or_else(|| DeviceError::Transfer("output buffer not bound".to_string()))?;
        let out = self
            .output
            .as_slice_mut()
            .ok_or_else(|| DeviceError::Transfer("host output is not contiguous".to_string()))?;
        device.read_buffer(&buffers.out, out)
    }

    fn validate_output(&self) -> bool {
        let comparison = self.compare();
        if !comparison.passed() {
            debug!(
                params = ?self.params,
                mismatches = comparison.mismatches,
                max_abs_error = comparison.max_abs_error,
                "output mismatch"
            );
        }
        comparison.passed()
    }

    fn global_extent(&self) -> Vec<usize> {
        self.current
            .map(|params| params.launch().global.iter().map(|v| *v as usize).collect())
            .unwrap_or_default()
    }

    fn local_extent(&self) -> Vec<usize> {
        self.current
            .map(|params| params.launch().local.iter().map(|v| *v as usize).collect())
            .unwrap_or_default()
    }

    fn sub_parameter_digits(&self) -> Vec<usize> {
        self.params
            .last()
            .filter(|extra| **extra < self.domain.space().total_variations())
            .map(|extra| self.domain.space().decode(*extra))
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kerneltune_space::CandidateEnumerator;

    fn domain() -> MatmulSpace {
        MatmulSpace::new(MatmulProblem::new(32, 16, 8)).unwrap()
    }

    #[test]
    fn extra_packs_tile_unroll_order() {
        let domain = domain();
        assert_eq!(domain.space().total_variations(), 30);
        let extra = domain.extra_for(4, 2, LoopOrder::Column).unwrap();
        // tile_k digit 2, unroll digit 1, order digit 1: 2 + 5 * (1 + 3 * 1)
        assert_eq!(extra, 22);
        let params = domain
            .params_for(&[32, 16, 8, 0, 4, 4, 2, 2, extra])
            .unwrap();
        assert_eq!(params.tile_k, 4);
        assert_eq!(params.unroll, 2);
        assert_eq!(params.order, LoopOrder::Column);
    }

    #[test]
    fn enumeration_respects_validity() {
        let domain = domain();
        let candidates = CandidateEnumerator::new(&domain).enumerate();
        assert!(!candidates.is_empty());
        assert!(candidates.len() < domain.total_size());
        for candidate in &candidates {
            let params = domain.params_for(candidate.values()).unwrap();
            assert!(params.fits(&domain.limits()));
            assert_eq!(candidate.fixed(), &[32, 16, 8, 0]);
        }
    }

    #[test]
    fn rejects_degenerate_problems() {
        assert!(MatmulSpace::new(MatmulProblem::new(0, 16, 8)).is_err());
    }

    #[test]
    fn malformed_vectors_do_not_decode() {
        let domain = domain();
        assert!(domain.params_for(&[32, 16, 8]).is_none());
        assert!(domain.params_for(&[32, 16, 8, 2, 1, 1, 1, 1, 0]).is_none());
        assert!(domain.params_for(&[32, 16, 8, 0, 1, 1, 1, 1, 30]).is_none());
    }
}
