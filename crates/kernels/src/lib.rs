//! Device and kernel abstractions plus the tiled matmul tuning domain.

pub mod config;
pub mod device;
pub mod kernel;
pub mod matmul;
pub mod source;
pub mod verify;

pub use config::*;
pub use device::*;
pub use kernel::*;
pub use matmul::*;
pub use source::*;
pub use verify::*;
