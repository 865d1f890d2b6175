//! Tuning configuration file and overrides.

use anyhow::{Context, Result};
use kerneltune_autotune::TuneOptions;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Overrides the journal path when no explicit path is given.
pub const JOURNAL_ENV: &str = "KERNELTUNE_JOURNAL";

pub const DEFAULT_JOURNAL: &str = "kerneltune.journal";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TuneConfig {
    #[serde(flatten)]
    pub options: TuneOptions,
    pub journal_path: PathBuf,
}

impl Default for TuneConfig {
    fn default() -> Self {
        Self {
            options: TuneOptions::default(),
            journal_path: PathBuf::from(DEFAULT_JOURNAL),
        }
    }
}

impl TuneConfig {
    /// Missing file means defaults.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        let config = serde_json::from_slice(&data)
            .with_context(|| format!("parsing tuning config {}", path.display()))?;
        Ok(config)
    }

    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let blob = serde_json::to_vec_pretty(self)?;
        fs::write(path, blob)?;
        Ok(())
    }

    /// Journal path precedence: explicit flag, then `KERNELTUNE_JOURNAL`,
    /// then the configured value.
    pub fn resolve_journal(&mut self, flag: Option<PathBuf>) {
        if let Some(path) = flag.or_else(|| std::env::var_os(JOURNAL_ENV).map(PathBuf::from)) {
            self.journal_path = path;
        }
    }
}
