//! Host device: buffers in memory, launches executed eagerly with rayon.

use crate::program::{parse_program, HostLimits, HostProgram};
use kerneltune_kernels::{
    Device, DeviceError, KernelArgs, LaunchGeometry, LoopOrder, RhsLayout, SourceDialect,
};
use ndarray::ArrayView2;
use rayon::prelude::*;
use std::time::Instant;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HostBuffer(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HostEvent(u64);

#[derive(Debug, Default)]
pub struct HostDevice {
    limits: HostLimits,
    buffers: Vec<Vec<f32>>,
    labels: Vec<String>,
    launches: u64,
}

impl HostDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(limits: HostLimits) -> Self {
        Self {
            limits,
            ..Self::default()
        }
    }

    /// Number of launches executed so far.
    pub fn launches(&self) -> u64 {
        self.launches
    }

    fn slot(&self, buffer: &HostBuffer) -> Result<&Vec<f32>, DeviceError> {
        self.buffers
            .get(buffer.0)
            .ok_or_else(|| DeviceError::Transfer(format!("unknown buffer {}", buffer.0)))
    }

    fn execute(
        &mut self,
        program: &HostProgram,
        args: &KernelArgs<'_, HostBuffer>,
        launch: LaunchGeometry,
    ) -> Result<(), DeviceError> {
        let (&[lhs, rhs, out], &[m, n, k, ..]) = (args.buffers, args.scalars) else {
            return Err(DeviceError::Launch(
                "expected buffers [lhs, rhs, out] and scalars [m, n, k]".to_string(),
            ));
        };
        let (m, n, k) = (m as usize, n as usize, k as usize);

        if m % program.block_m != 0 || n % program.block_n != 0 || k % program.tile_k != 0 {
            return Err(DeviceError::Launch(format!(
                "problem {m}x{n}x{k} not divisible by block {}x{} / tile_k {}",
                program.block_m, program.block_n, program.tile_k
            )));
        }
        let expected_global = [(m / program.block_m) as u32, (n / program.block_n) as u32, 1];
        let expected_local = [program.group_m as u32, program.group_n as u32, 1];
        if launch.global != expected_global
            || launch.local != expected_local
            || !launch.divides_evenly()
        {
            return Err(DeviceError::Launch(format!(
                "launch {:?}/{:?} does not match program {:?}/{:?}",
                launch.global, launch.local, expected_global, expected_local
            )));
        }

        let rhs_shape = match program.rhs_layout {
            RhsLayout::RowMajor => (k, n),
            RhsLayout::Transposed => (n, k),
        };
        let mut output = std::mem::take(
            self.buffers
                .get_mut(out.0)
                .ok_or_else(|| DeviceError::Launch(format!("unknown buffer {}", out.0)))?,
        );
        let result = (|| -> Result<(), DeviceError> {
            let lhs = ArrayView2::from_shape((m, k), self.slot(lhs)?.as_slice())
                .map_err(|e| DeviceError::Launch(format!("lhs: {e}")))?;
            let rhs = ArrayView2::from_shape(rhs_shape, self.slot(rhs)?.as_slice())
                .map_err(|e| DeviceError::Launch(format!("rhs: {e}")))?;
            if output.len() != m * n {
                return Err(DeviceError::Launch(format!(
                    "output holds {} elements, expected {}",
                    output.len(),
                    m * n
                )));
            }
            run_tiled(program, lhs, rhs, &mut output, n, k);
            Ok(())
        })();
        self.buffers[out.0] = output;
        result
    }
}

/// Each rayon task owns one band of `block_m` output rows.
fn run_tiled(
    program: &HostProgram,
    lhs: ArrayView2<'_, f32>,
    rhs: ArrayView2<'_, f32>,
    output: &mut [f32],
    n: usize,
    k: usize,
) {
    let (bm, bn) = (program.block_m, program.block_n);
    let rhs_at = |q: usize, c: usize| match program.rhs_layout {
        RhsLayout::RowMajor => rhs[[q, c]],
        RhsLayout::Transposed => rhs[[c, q]],
    };

    output
        .par_chunks_mut(bm * n)
        .enumerate()
        .for_each(|(band, rows)| {
            let row0 = band * bm;
            let mut acc = vec![0.0f32; bm * bn];
            for col0 in (0..n).step_by(bn) {
                acc.iter_mut().for_each(|v| *v = 0.0);
                for t in (0..k).step_by(program.tile_k) {
                    for s in (0..program.tile_k).step_by(program.unroll) {
                        for u in 0..program.unroll {
                            let q = t + s + u;
                            match program.order {
                                LoopOrder::Row => {
                                    for i in 0..bm {
                                        for j in 0..bn {
                                            acc[i * bn + j] +=
                                                lhs[[row0 + i, q]] * rhs_at(q, col0 + j);
                                        }
                                    }
                                }
                                LoopOrder::Column => {
                                    for j in 0..bn {
                                        for i in 0..bm {
                                            acc[i * bn + j] +=
                                                lhs[[row0 + i, q]] * rhs_at(q, col0 + j);
                                        }
                                    }
                                }
                            }
                        }
                    }
                }
                for i in 0..bm {
                    let start = i * n + col0;
                    rows[start..start + bn].copy_from_slice(&acc[i * bn..(i + 1) * bn]);
                }
            }
        });
}

impl Device for HostDevice {
    type Program = HostProgram;
    type Buffer = HostBuffer;
    type Event = HostEvent;
    type Timestamp = Instant;

    fn name(&self) -> String {
        format!("host ({} threads)", rayon::current_num_threads())
    }

    fn dialect(&self) -> SourceDialect {
        SourceDialect::Host
    }

    fn build_program(&mut self, source: &str, entry: &str) -> Result<HostProgram, DeviceError> {
        parse_program(source, entry, &self.limits)
    }

    fn create_buffer(&mut self, label: &str, len: usize) -> Result<HostBuffer, DeviceError> {
        self.buffers.push(vec![0.0; len]);
        self.labels.push(label.to_string());
        Ok(HostBuffer(self.buffers.len() - 1))
    }

    fn write_buffer(&mut self, buffer: &HostBuffer, data: &[f32]) -> Result<(), DeviceError> {
        let slot = self
            .buffers
            .get_mut(buffer.0)
            .ok_or_else(|| DeviceError::Transfer(format!("unknown buffer {}", buffer.0)))?;
        if slot.len() != data.len() {
            return Err(DeviceError::Transfer(format!(
                "buffer `{}` holds {} elements, got {}",
                self.labels[buffer.0],
                slot.len(),
                data.len()
            )));
        }
        slot.copy_from_slice(data);
        Ok(())
    }

    fn read_buffer(&mut self, buffer: &HostBuffer, out: &mut [f32]) -> Result<(), DeviceError> {
        let slot = self.slot(buffer)?;
        if slot.len() != out.len() {
            return Err(DeviceError::Transfer(format!(
                "buffer `{}` holds {} elements, destination {}",
                self.labels[buffer.0],
                slot.len(),
                out.len()
            )));
        }
        out.copy_from_slice(slot);
        Ok(())
    }

    fn enqueue(
        &mut self,
        program: &HostProgram,
        args: &KernelArgs<'_, HostBuffer>,
        launch: LaunchGeometry,
        wait_for: &[HostEvent],
    ) -> Result<HostEvent, DeviceError> {
        // Launches run to completion in order, so dependencies are met.
        self.wait(wait_for)?;
        self.execute(program, args, launch)?;
        self.launches += 1;
        trace!(launch = self.launches, groups = ?launch.groups(), "host launch complete");
        Ok(HostEvent(self.launches))
    }

    fn wait(&mut self, events: &[HostEvent]) -> Result<(), DeviceError> {
        match events.iter().find(|event| event.0 == 0 || event.0 > self.launches) {
            Some(event) => Err(DeviceError::Wait(format!("unknown event {}", event.0))),
            None => Ok(()),
        }
    }

    fn timestamp(&self) -> Instant {
        Instant::now()
    }

    fn elapsed_micros(&self, since: Instant) -> u64 {
        u64::try_from(since.elapsed().as_micros()).unwrap_or(u64::MAX)
    }
}
