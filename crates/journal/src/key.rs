//! Journal keys.

use std::fmt;

/// `kernel(p0,p1,...)` rendering of a kernel name and parameter vector.
///
/// Uniqueness relies on kernel names being unique across kernel classes and
/// free of `(`; the journal rejects keys containing tabs or newlines.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JournalKey(String);

impl JournalKey {
    pub fn new(kernel: &str, params: &[usize]) -> Self {
        let rendered = params
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");
        Self(format!("{kernel}({rendered})"))
    }

    pub(crate) fn from_raw(raw: &str) -> Self {
        Self(raw.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub(crate) fn is_writable(&self) -> bool {
        !self.0.is_empty() && !self.0.contains(|c: char| matches!(c, '\t' | '\n' | '\r'))
    }
}

impl fmt::Display for JournalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
