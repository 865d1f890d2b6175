//! The narrow device capability a tunable kernel runs against.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Source language a device compiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceDialect {
    /// WebGPU shading language, compiled by wgpu.
    Wgsl,
    /// Line-oriented kernel description interpreted by the host device.
    Host,
}

/// Global and local (work-group) extents of one launch, in work items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LaunchGeometry {
    pub global: [u32; 3],
    pub local: [u32; 3],
}

impl LaunchGeometry {
    /// Work groups per dimension, rounding partial groups up.
    pub fn groups(&self) -> [u32; 3] {
        let mut groups = [0u32; 3];
        for (dim, slot) in groups.iter_mut().enumerate() {
            *slot = self.global[dim].div_ceil(self.local[dim].max(1));
        }
        groups
    }

    pub fn divides_evenly(&self) -> bool {
        self.global
            .iter()
            .zip(self.local.iter())
            .all(|(global, local)| *local > 0 && global % local == 0)
    }
}

/// Buffers bound in binding order plus a small block of `u32` scalars.
#[derive(Debug, Clone, Copy)]
pub struct KernelArgs<'a, B> {
    pub buffers: &'a [&'a B],
    pub scalars: &'a [u32],
}

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("program build failed: {0}")]
    Build(String),
    #[error("buffer allocation failed: {0}")]
    Allocation(String),
    #[error("buffer transfer failed: {0}")]
    Transfer(String),
    #[error("launch failed: {0}")]
    Launch(String),
    #[error("wait failed: {0}")]
    Wait(String),
    #[error("unsupported: {0}")]
    Unsupported(String),
}

/// Compile, allocate, enqueue, wait and time.
///
/// Every method may block. A misbehaving program is allowed to hang or kill
/// the process inside `build_program`, `enqueue` or `wait`; callers that
/// care checkpoint before calling.
pub trait Device {
    type Program;
    type Buffer;
    type Event: Clone;
    type Timestamp: Copy;

    fn name(&self) -> String;

    fn dialect(&self) -> SourceDialect;

    fn build_program(&mut self, source: &str, entry: &str) -> Result<Self::Program, DeviceError>;

    /// Allocate a zeroed buffer of `len` `f32` elements.
    fn create_buffer(&mut self, label: &str, len: usize) -> Result<Self::Buffer, DeviceError>;

    fn write_buffer(&mut self, buffer: &Self::Buffer, data: &[f32]) -> Result<(), DeviceError>;

    fn read_buffer(&mut self, buffer: &Self::Buffer, out: &mut [f32]) -> Result<(), DeviceError>;

    /// Enqueue one launch after every event in `wait_for` completes.
    fn enqueue(
        &mut self,
        program: &Self::Program,
        args: &KernelArgs<'_, Self::Buffer>,
        launch: LaunchGeometry,
        wait_for: &[Self::Event],
    ) -> Result<Self::Event, DeviceError>;

    /// Block until every event has completed.
    fn wait(&mut self, events: &[Self::Event]) -> Result<(), DeviceError>;

    fn timestamp(&self) -> Self::Timestamp;

    fn elapsed_micros(&self, since: Self::Timestamp) -> u64;
}
