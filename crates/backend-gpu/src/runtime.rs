//! wgpu device: WGSL compilation, storage buffers and compute dispatch.
//!
//! wgpu maps to Metal on macOS and Vulkan/DX12 elsewhere. Validation errors
//! are captured with error scopes so that a rejected shader or launch shows
//! up as a `DeviceError` instead of the default uncaptured-error panic.

use anyhow::{anyhow, Result};
use bytemuck::cast_slice;
use kerneltune_kernels::{Device, DeviceError, KernelArgs, LaunchGeometry, SourceDialect};
use pollster::block_on;
use std::sync::mpsc;
use std::time::Instant;
use tracing::{debug, info};
use wgpu::util::DeviceExt;

/// Information about the GPU adapter.
#[derive(Debug, Clone)]
pub struct GpuDeviceInfo {
    pub name: String,
    pub backend: String,
}

pub struct GpuProgram {
    pipeline: wgpu::ComputePipeline,
    layout: wgpu::BindGroupLayout,
}

pub struct GpuBuffer {
    buffer: wgpu::Buffer,
    len: usize,
}

impl GpuBuffer {
    fn byte_size(&self) -> u64 {
        (self.len * std::mem::size_of::<f32>()) as u64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuEvent(u64);

pub struct GpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    info: GpuDeviceInfo,
    submitted: u64,
}

impl GpuDevice {
    pub fn new() -> Result<Self> {
        let instance = wgpu::Instance::default();
        let adapter = block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .ok_or_else(|| anyhow!("no suitable GPU adapter found"))?;

        let adapter_info = adapter.get_info();
        let (device, queue) = block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("kerneltune device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
            },
            None,
        ))?;

        let info = GpuDeviceInfo {
            name: adapter_info.name.clone(),
            backend: format!("{:?}", adapter_info.backend),
        };
        info!(adapter = %info.name, backend = %info.backend, "gpu device ready");

        Ok(Self {
            device,
            queue,
            info,
            submitted: 0,
        })
    }

    pub fn info(&self) -> &GpuDeviceInfo {
        &self.info
    }

    fn scoped<T>(&self, f: impl FnOnce(&wgpu::Device) -> T) -> (T, Option<wgpu::Error>) {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = f(&self.device);
        let error = block_on(self.device.pop_error_scope());
        (value, error)
    }
}

impl Device for GpuDevice {
    type Program = GpuProgram;
    type Buffer = GpuBuffer;
    type Event = GpuEvent;
    type Timestamp = Instant;

    fn name(&self) -> String {
        format!("{} ({})", self.info.name, self.info.backend)
    }

    fn dialect(&self) -> SourceDialect {
        SourceDialect::Wgsl
    }

    fn build_program(&mut self, source: &str, entry: &str) -> Result<GpuProgram, DeviceError> {
        let (pipeline, error) = self.scoped(|device| {
            let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("tuned_kernel"),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            });
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some("tuned_pipeline"),
                layout: None,
                module: &module,
                entry_point: entry,
            })
        });
        if let Some(error) = error {
            return Err(DeviceError::Build(error.to_string()));
        }

        let (layout, error) = self.scoped(|_| pipeline.get_bind_group_layout(0));
        match error {
            Some(error) => Err(DeviceError::Build(error.to_string())),
            None => Ok(GpuProgram { pipeline, layout }),
        }
    }

    fn create_buffer(&mut self, label: &str, len: usize) -> Result<GpuBuffer, DeviceError> {
        if len == 0 {
            return Err(DeviceError::Allocation(format!(
                "buffer `{label}` must not be empty"
            )));
        }
        let size = (len * std::mem::size_of::<f32>()) as u64;
        let (buffer, error) = self.scoped(|device| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size,
                usage: wgpu::BufferUsages::STORAGE
                    | wgpu::BufferUsages::COPY_SRC
                    | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        });
        match error {
            Some(error) => Err(DeviceError::Allocation(error.to_string())),
            None => Ok(GpuBuffer { buffer, len }),
        }
    }

    fn write_buffer(&mut self, buffer: &GpuBuffer, data: &[f32]) -> Result<(), DeviceError> {
        if data.len() != buffer.len {
            return Err(DeviceError::Transfer(format!(
                "buffer holds {} elements, got {}",
                buffer.len,
                data.len()
            )));
        }
        self.queue.write_buffer(&buffer.buffer, 0, cast_slice(data));
        Ok(())
    }

    fn read_buffer(&mut self, buffer: &GpuBuffer, out: &mut [f32]) -> Result<(), DeviceError> {
        if out.len() != buffer.len {
            return Err(DeviceError::Transfer(format!(
                "buffer holds {} elements, destination {}",
                buffer.len,
                out.len()
            )));
        }

        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("staging"),
            size: buffer.byte_size(),
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("read_back"),
            });
        encoder.copy_buffer_to_buffer(&buffer.buffer, 0, &staging, 0, buffer.byte_size());
        self.queue.submit(Some(encoder.finish()));

        let slice = staging.slice(..);
        let (sender, receiver) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |res| {
            let _ = sender.send(res);
        });
        self.device.poll(wgpu::Maintain::Wait);
        receiver
            .recv()
            .map_err(|_| DeviceError::Transfer("failed to receive GPU map signal".to_string()))?
            .map_err(|e| DeviceError::Transfer(e.to_string()))?;

        let data = slice.get_mapped_range();
        out.copy_from_slice(cast_slice(&data));
        drop(data);
        staging.unmap();
        Ok(())
    }

    fn enqueue(
        &mut self,
        program: &GpuProgram,
        args: &KernelArgs<'_, GpuBuffer>,
        launch: LaunchGeometry,
        _wait_for: &[GpuEvent],
    ) -> Result<GpuEvent, DeviceError> {
        // A single queue executes submissions in order, so earlier events
        // are always complete before this launch starts.
        let mut scalars = args.scalars.to_vec();
        scalars.resize(scalars.len().div_ceil(4).max(1) * 4, 0);
        let groups = launch.groups();

        let ((command, _uniform, _bind_group), error) = self.scoped(|device| {
            let uniform = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("scalars"),
                contents: cast_slice(&scalars),
                usage: wgpu::BufferUsages::UNIFORM,
            });
            let mut entries: Vec<wgpu::BindGroupEntry<'_>> = args
                .buffers
                .iter()
                .enumerate()
                .map(|(binding, buffer)| wgpu::BindGroupEntry {
                    binding: binding as u32,
                    resource: buffer.buffer.as_entire_binding(),
                })
                .collect();
            entries.push(wgpu::BindGroupEntry {
                binding: args.buffers.len() as u32,
                resource: uniform.as_entire_binding(),
            });
            let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("tuned_bind_group"),
                layout: &program.layout,
                entries: &entries,
            });

            let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("tuned_dispatch"),
            });
            {
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some("tuned_pass"),
                    timestamp_writes: None,
                });
                pass.set_pipeline(&program.pipeline);
                pass.set_bind_group(0, &bind_group, &[]);
                pass.dispatch_workgroups(groups[0], groups[1], groups[2]);
            }
            (encoder.finish(), uniform, bind_group)
        });
        if let Some(error) = error {
            return Err(DeviceError::Launch(error.to_string()));
        }

        self.queue.submit(Some(command));
        self.submitted += 1;
        debug!(submission = self.submitted, ?groups, "gpu dispatch submitted");
        Ok(GpuEvent(self.submitted))
    }

    fn wait(&mut self, events: &[GpuEvent]) -> Result<(), DeviceError> {
        if let Some(event) = events.iter().find(|event| event.0 > self.submitted) {
            return Err(DeviceError::Wait(format!("unknown submission {}", event.0)));
        }
        if !events.is_empty() {
            self.device.poll(wgpu::Maintain::Wait);
        }
        Ok(())
    }

    fn timestamp(&self) -> Instant {
        Instant::now()
    }

    fn elapsed_micros(&self, since: Instant) -> u64 {
        u64::try_from(since.elapsed().as_micros()).unwrap_or(u64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kerneltune_kernels::{Kernel, MatmulProblem, MatmulSpace, TiledMatmulKernel};
    use kerneltune_space::CandidateEnumerator;

    #[test]
    fn tiled_matmul_runs_on_gpu() {
        let Ok(mut device) = GpuDevice::new() else {
            eprintln!("no GPU adapter available, skipping");
            return;
        };
        let domain = MatmulSpace::new(MatmulProblem::new(32, 32, 16)).unwrap();
        let candidates = CandidateEnumerator::new(&domain)
            .pin_geometry(vec![4, 4, 2, 2])
            .enumerate();
        let mut kernel = TiledMatmulKernel::new(domain, 11);

        for candidate in candidates.iter().take(4) {
            kernel.set_parameters(candidate.values());
            kernel.rebuild_source(&mut device).unwrap();
            kernel.bind_arguments(&mut device, false).unwrap();
            let event = kernel.enqueue(&mut device, &[]).unwrap();
            device.wait(&[event]).unwrap();
            kernel.read_back_output(&mut device).unwrap();
            assert!(kernel.validate_output(), "{candidate}");
        }
    }

    #[test]
    fn invalid_shader_is_a_build_failure() {
        let Ok(mut device) = GpuDevice::new() else {
            return;
        };
        let result = device.build_program("fn broken( {", "tiled_matmul");
        assert!(matches!(result, Err(DeviceError::Build(_))));
    }
}
