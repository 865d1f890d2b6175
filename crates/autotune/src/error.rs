use kerneltune_journal::RunState;
use kerneltune_kernels::DeviceError;
use thiserror::Error;

/// Why a single trial produced no usable timing. Every variant retires the
/// candidate for the rest of the run.
#[derive(Debug, Error)]
pub enum TrialFailure {
    #[error("build failed: {0}")]
    Build(DeviceError),
    #[error("argument binding failed: {0}")]
    Bind(DeviceError),
    #[error("execution failed: {0}")]
    Execution(DeviceError),
    #[error("output failed validation")]
    Validation,
    /// A previous process never got past this checkpoint.
    #[error("an earlier attempt stopped at {0}")]
    PriorCrash(RunState),
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error(
        "no viable configuration exists: {retries} retries exceeded the space of {space_size} combinations"
    )]
    NoViableConfiguration { retries: usize, space_size: usize },
    #[error("initial extra parameter {extra} is outside 0..{total}")]
    InitialExtraOutOfRange { extra: usize, total: usize },
}
