//! GPU backend: a wgpu `Device` for WGSL kernels.

pub mod runtime;

pub use runtime::*;
