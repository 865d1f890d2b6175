//! Deterministic stand-ins for a device, a kernel and a search domain.
//!
//! The scripted device keeps a virtual clock that only moves when a launch
//! runs, so measured times are exactly what the script says they are. The
//! scripted kernel looks up a [`Behavior`] for every parameter vector and
//! can fail at any stage, return wrong output, or panic mid-launch the way a
//! hung driver takes a process down.

use kerneltune_kernels::{
    Device, DeviceError, Kernel, KernelArgs, LaunchGeometry, SourceDialect,
};
use kerneltune_space::{Candidate, GeometryAxis, ParameterSpace, SearchDomain};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Build,
    Bind,
    Execute,
    WrongOutput,
    /// Panic inside the launch, after the run checkpoint is on disk.
    Crash,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Behavior {
    pub cost_micros: u64,
    pub fault: Option<Fault>,
}

impl Behavior {
    pub fn costing(cost_micros: u64) -> Self {
        Self {
            cost_micros,
            fault: None,
        }
    }

    pub fn fault(fault: Fault) -> Self {
        Self {
            cost_micros: 1,
            fault: Some(fault),
        }
    }
}

/// Device with a virtual microsecond clock.
#[derive(Debug, Default)]
pub struct ScriptedDevice {
    clock: u64,
    builds: usize,
    launches: u64,
}

impl ScriptedDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builds(&self) -> usize {
        self.builds
    }

    pub fn launches(&self) -> u64 {
        self.launches
    }
}

impl Device for ScriptedDevice {
    type Program = ();
    type Buffer = ();
    type Event = u64;
    type Timestamp = u64;

    fn name(&self) -> String {
        "scripted".to_string()
    }

    fn dialect(&self) -> SourceDialect {
        SourceDialect::Host
    }

    fn build_program(&mut self, _source: &str, _entry: &str) -> Result<(), DeviceError> {
        self.builds += 1;
        Ok(())
    }

    fn create_buffer(&mut self, _label: &str, _len: usize) -> Result<(), DeviceError> {
        Ok(())
    }

    fn write_buffer(&mut self, _buffer: &(), _data: &[f32]) -> Result<(), DeviceError> {
        Ok(())
    }

    fn read_buffer(&mut self, _buffer: &(), _out: &mut [f32]) -> Result<(), DeviceError> {
        Ok(())
    }

    /// The first scalar argument is the launch cost in microseconds.
    fn enqueue(
        &mut self,
        _program: &(),
        args: &KernelArgs<'_, ()>,
        _launch: LaunchGeometry,
        _wait_for: &[u64],
    ) -> Result<u64, DeviceError> {
        let cost = args.scalars.first().copied().unwrap_or(0);
        self.clock += u64::from(cost);
        self.launches += 1;
        Ok(self.launches)
    }

    fn wait(&mut self, events: &[u64]) -> Result<(), DeviceError> {
        match events.iter().find(|event| **event == 0 || **event > self.launches) {
            Some(event) => Err(DeviceError::Wait(format!("unknown event {event}"))),
            None => Ok(()),
        }
    }

    fn timestamp(&self) -> u64 {
        self.clock
    }

    fn elapsed_micros(&self, since: u64) -> u64 {
        self.clock.saturating_sub(since)
    }
}

/// Kernel whose every outcome comes from `script(parameters)`.
pub struct ScriptedKernel<F> {
    name: String,
    flops: u64,
    script: F,
    params: Vec<usize>,
    current: Behavior,
    executed: Vec<Vec<usize>>,
}

impl<F: Fn(&[usize]) -> Behavior> ScriptedKernel<F> {
    pub fn new(name: impl Into<String>, flops: u64, script: F) -> Self {
        Self {
            name: name.into(),
            flops,
            script,
            params: Vec::new(),
            current: Behavior::costing(1),
            executed: Vec::new(),
        }
    }

    /// Parameter vectors that reached a launch, in order.
    pub fn executed(&self) -> &[Vec<usize>] {
        &self.executed
    }

    pub fn launches_of(&self, params: &[usize]) -> usize {
        self.executed.iter().filter(|p| p.as_slice() == params).count()
    }

    fn failing(&self, fault: Fault) -> bool {
        self.current.fault == Some(fault)
    }
}

impl<F: Fn(&[usize]) -> Behavior> Kernel<ScriptedDevice> for ScriptedKernel<F> {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_parameters(&mut self, params: &[usize]) {
        self.params = params.to_vec();
        self.current = (self.script)(params);
    }

    fn parameters(&self) -> &[usize] {
        &self.params
    }

    fn flop_count(&self) -> u64 {
        self.flops
    }

    fn rebuild_source(&mut self, device: &mut ScriptedDevice) -> Result<(), DeviceError> {
        if self.failing(Fault::Build) {
            return Err(DeviceError::Build(format!("scripted build failure for {:?}", self.params)));
        }
        device.build_program(&self.name, "main")
    }

    fn bind_arguments(
        &mut self,
        device: &mut ScriptedDevice,
        _include_transfer_cost: bool,
    ) -> Result<(), DeviceError> {
        if self.failing(Fault::Bind) {
            return Err(DeviceError::Allocation("scripted bind failure".to_string()));
        }
        device.create_buffer("out", 1)
    }

    fn enqueue(
        &mut self,
        device: &mut ScriptedDevice,
        wait_for: &[u64],
    ) -> Result<u64, DeviceError> {
        if self.failing(Fault::Crash) {
            panic!("scripted device crash for {:?}", self.params);
        }
        if self.failing(Fault::Execute) {
            return Err(DeviceError::Launch("scripted launch failure".to_string()));
        }
        self.executed.push(self.params.clone());
        let cost = u32::try_from(self.current.cost_micros).unwrap_or(u32::MAX);
        let args = KernelArgs {
            buffers: &[],
            scalars: &[cost],
        };
        let launch = LaunchGeometry {
            global: [1, 1, 1],
            local: [1, 1, 1],
        };
        device.enqueue(&(), &args, launch, wait_for)
    }

    fn read_back_output(&mut self, device: &mut ScriptedDevice) -> Result<(), DeviceError> {
        device.read_buffer(&(), &mut [])
    }

    fn validate_output(&self) -> bool {
        !self.failing(Fault::WrongOutput)
    }

    fn global_extent(&self) -> Vec<usize> {
        vec![1]
    }

    fn local_extent(&self) -> Vec<usize> {
        vec![1]
    }

    fn sub_parameter_digits(&self) -> Vec<usize> {
        self.params.last().copied().into_iter().collect()
    }
}

/// Cartesian product of geometry axes and an extra-parameter space, with
/// every combination valid.
#[derive(Debug, Clone)]
pub struct GridDomain {
    fixed: Vec<usize>,
    axes: Vec<GeometryAxis>,
    space: ParameterSpace,
}

impl GridDomain {
    pub fn new(axes: Vec<GeometryAxis>, space: ParameterSpace) -> Self {
        Self {
            fixed: Vec::new(),
            axes,
            space,
        }
    }

    pub fn with_fixed(mut self, fixed: Vec<usize>) -> Self {
        self.fixed = fixed;
        self
    }
}

impl SearchDomain for GridDomain {
    fn fixed(&self) -> Vec<usize> {
        self.fixed.clone()
    }

    fn geometry_axes(&self) -> &[GeometryAxis] {
        &self.axes
    }

    fn space(&self) -> &ParameterSpace {
        &self.space
    }

    fn is_valid(&self, _candidate: &Candidate, _digits: &[usize]) -> bool {
        true
    }
}
