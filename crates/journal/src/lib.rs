//! Crash-resilient run journal for kernel autotuning.

pub mod error;
pub mod journal;
pub mod key;
pub mod state;

pub use error::JournalError;
pub use journal::RunJournal;
pub use key::JournalKey;
pub use state::{Checkpoint, JournalEntry, RunState};
