//! Host backend: a `Device` that interprets the host kernel dialect.

pub mod program;
pub mod runtime;

pub use program::*;
pub use runtime::*;
