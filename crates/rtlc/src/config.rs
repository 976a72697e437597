use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read `{path}`: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("Invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Knobs of the compilation pipeline.
///
/// Loaded from a TOML table; every key is optional.
///
/// ```toml
/// optimize = true
/// max_cluster_size = 7000
/// wide_threshold = 64
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompileOptions {
    /// Run the structural optimizer passes.
    pub optimize: bool,
    /// Upper bound on the number of nodes merged into one cluster.
    pub max_cluster_size: usize,
    /// Signals wider than this use arbitrary-precision storage.
    pub wide_threshold: usize,
    /// Allow registers without real feedback to update their current value in place.
    pub merge_registers: bool,
    /// Split registers whose bit-ranges are written independently.
    pub split_registers: bool,
    /// Maximum number of alias-analysis rounds.
    pub alias_fixpoint_limit: usize,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            optimize: true,
            max_cluster_size: 7000,
            wide_threshold: 64,
            merge_registers: true,
            split_registers: true,
            alias_fixpoint_limit: 16,
        }
    }
}

impl CompileOptions {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Storage threshold clamped to the widest native integer.
    pub fn native_limit(&self) -> usize {
        self.wide_threshold.clamp(1, 64)
    }
}
