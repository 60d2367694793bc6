//! Optional extractor configuration file
//!
//! ```yaml
//! threads: 8
//! memory_mb: 4096
//! ```
//!
//! Values given on the command line win over the file; the file wins over
//! the built-in defaults.

use std::path::Path;

use butterfly_common::{Error, Result};
use serde::Deserialize;
use tracing::debug;

pub const DEFAULT_CONFIG_FILE: &str = "extractor.yaml";
pub const DEFAULT_MEMORY_MB: usize = 2048;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExtractorConfig {
    /// Decode threads, 0 for all cores
    pub threads: Option<usize>,
    pub memory_mb: Option<usize>,
}

impl ExtractorConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::InvalidInput(format!("cannot read config {}: {e}", path.display()))
        })?;
        Self::from_yaml(&text)
            .map_err(|reason| Error::InvalidInput(format!("config {}: {reason}", path.display())))
    }

    pub fn from_yaml(text: &str) -> std::result::Result<Self, String> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(text).map_err(|e| e.to_string())?;
        if config.memory_mb == Some(0) {
            return Err("memory_mb must be positive".to_string());
        }
        Ok(config)
    }

    /// Load the explicit file if given, else `extractor.yaml` in `dir` if present
    pub fn discover(explicit: Option<&Path>, dir: &Path) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        let candidate = dir.join(DEFAULT_CONFIG_FILE);
        if candidate.is_file() {
            debug!("Using config {}", candidate.display());
            Self::load(&candidate)
        } else {
            Ok(Self::default())
        }
    }

    /// CLI value, then file value, then default
    pub fn threads(&self, cli: Option<usize>) -> usize {
        cli.or(self.threads).unwrap_or(0)
    }

    pub fn memory_mb(&self, cli: Option<usize>) -> usize {
        cli.or(self.memory_mb).unwrap_or(DEFAULT_MEMORY_MB)
    }
}
