use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("journal {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("journal {}:{line}: malformed record {content:?}", .path.display())]
    Malformed {
        path: PathBuf,
        line: usize,
        content: String,
    },
    #[error("journal key {0:?} is empty or contains a tab or newline")]
    InvalidKey(String),
}

impl JournalError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        JournalError::Io {
            path: path.into(),
            source,
        }
    }
}
