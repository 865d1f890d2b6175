//! Tuning sessions, configuration and reporting for kerneltune.

#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod report;
pub mod session;

#[cfg(feature = "cli")]
pub use cli::*;
pub use config::*;
pub use report::*;
pub use session::*;
