//! Parameter spaces and candidate enumeration for kernel autotuning.

pub mod candidate;
pub mod enumerate;
pub mod space;

pub use candidate::*;
pub use enumerate::*;
pub use space::*;
