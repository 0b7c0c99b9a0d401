//! Pipeline configuration.
//!
//! Loaded once at startup from TOML:
//!
//! ```toml
//! arena_pool_size = 4
//! worker_threads = 4
//! high_priority_quota = 2
//!
//! [arena]
//! initial_capacity = 262144
//! max_growth_step = 2097152
//! ```
//!
//! Every field is optional.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tessera_core::ArenaConfig;

use crate::error::{MeshError, MeshResult};

/// Default number of high-priority tasks started per low-priority task.
pub const DEFAULT_HIGH_PRIORITY_QUOTA: u32 = 2;

/// Dispatcher configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Arena packs in the pool; bounds how many compiles run at once.
    pub arena_pool_size: usize,
    /// Threads compiling or re-sorting sections at once.
    pub worker_threads: usize,
    /// High-priority tasks started before one low-priority task must run.
    pub high_priority_quota: u32,
    /// Sizing of every scratch arena.
    pub arena: ArenaConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let threads = std::thread::available_parallelism().map_or(2, std::num::NonZeroUsize::get);
        Self {
            arena_pool_size: threads,
            worker_threads: threads,
            high_priority_quota: DEFAULT_HIGH_PRIORITY_QUOTA,
            arena: ArenaConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// Returns an error on malformed TOML, unknown keys or invalid values.
    pub fn from_toml_str(source: &str) -> MeshResult<Self> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is invalid.
    pub fn load(path: impl AsRef<Path>) -> MeshResult<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| MeshError::ConfigIo {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&source)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::InvalidConfig`] naming the offending field.
    pub fn validate(&self) -> MeshResult<()> {
        if self.arena_pool_size == 0 {
            return Err(MeshError::InvalidConfig(
                "arena_pool_size must be at least 1".into(),
            ));
        }
        if self.worker_threads == 0 {
            return Err(MeshError::InvalidConfig(
                "worker_threads must be at least 1".into(),
            ));
        }
        if self.high_priority_quota == 0 {
            return Err(MeshError::InvalidConfig(
                "high_priority_quota must be at least 1".into(),
            ));
        }
        if self.arena.max_growth_step == 0 {
            return Err(MeshError::InvalidConfig(
                "arena.max_growth_step must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = PipelineConfig::from_toml_str("").unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.high_priority_quota, 2);
    }

    #[test]
    fn test_partial_document() {
        let config = PipelineConfig::from_toml_str(
            "arena_pool_size = 3\n[arena]\ninitial_capacity = 1024\n",
        )
        .unwrap();
        assert_eq!(config.arena_pool_size, 3);
        assert_eq!(config.arena.initial_capacity, 1024);
        assert_eq!(config.arena.max_growth_step, ArenaConfig::default().max_growth_step);
    }

    #[test]
    fn test_rejects_unknown_keys() {
        let err = PipelineConfig::from_toml_str("arena_pool = 3").unwrap_err();
        assert!(matches!(err, MeshError::ConfigParse(_)));
    }

    #[test]
    fn test_rejects_zero_values() {
        for doc in [
            "arena_pool_size = 0",
            "worker_threads = 0",
            "high_priority_quota = 0",
            "[arena]\nmax_growth_step = 0",
        ] {
            let err = PipelineConfig::from_toml_str(doc).unwrap_err();
            assert!(matches!(err, MeshError::InvalidConfig(_)), "{doc}");
        }
    }

    #[test]
    fn test_missing_file() {
        let err = PipelineConfig::load("/nonexistent/tessera.toml").unwrap_err();
        assert!(matches!(err, MeshError::ConfigIo { .. }));
    }
}
