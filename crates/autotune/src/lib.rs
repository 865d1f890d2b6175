//! Checkpointed trial execution, pruning, ranking and two-phase search.

pub mod error;
pub mod executor;
pub mod options;
pub mod ranking;
pub mod search;
pub mod set;
pub mod stats;
pub mod testing;
pub mod trial_loop;

pub use error::*;
pub use executor::*;
pub use options::*;
pub use ranking::*;
pub use search::*;
pub use set::*;
pub use stats::*;
pub use trial_loop::*;
