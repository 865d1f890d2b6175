//! kerneltune: crash-resilient search and measurement for tunable kernels.
//!
//! The member crates are re-exported under short names.

pub use kerneltune_autotune as autotune;
pub use kerneltune_backend_cpu as backend_cpu;
pub use kerneltune_driver as driver;
pub use kerneltune_journal as journal;
pub use kerneltune_kernels as kernels;
pub use kerneltune_space as space;
