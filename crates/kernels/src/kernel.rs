//! The tunable kernel capability.

use crate::device::{Device, DeviceError};

/// A kernel whose source is regenerated for every parameter vector.
///
/// `name()` must be unique across kernel implementations: run journals key
/// results by the kernel name and parameter vector alone.
pub trait Kernel<D: Device> {
    fn name(&self) -> &str;

    /// Store a new parameter vector. Takes effect on the next rebuild.
    fn set_parameters(&mut self, params: &[usize]);

    fn parameters(&self) -> &[usize];

    /// Floating point operations performed by one launch.
    fn flop_count(&self) -> u64;

    /// Emit source for the current parameters and build it on `device`.
    fn rebuild_source(&mut self, device: &mut D) -> Result<(), DeviceError>;

    /// Allocate or reuse buffers and prepare inputs. With
    /// `include_transfer_cost` the input upload is deferred to `enqueue` so
    /// that it lands inside the timed region.
    fn bind_arguments(&mut self, device: &mut D, include_transfer_cost: bool)
        -> Result<(), DeviceError>;

    fn enqueue(&mut self, device: &mut D, wait_for: &[D::Event]) -> Result<D::Event, DeviceError>;

    fn read_back_output(&mut self, device: &mut D) -> Result<(), DeviceError>;

    /// Compare the last read-back output with the reference result.
    fn validate_output(&self) -> bool;

    fn global_extent(&self) -> Vec<usize>;

    fn local_extent(&self) -> Vec<usize>;

    /// Decoded sub-parameter values of the packed extra parameter.
    fn sub_parameter_digits(&self) -> Vec<usize>;
}
