//! Run settings loaded from a TOML file.
//!
//! ```toml
//! log_depth = 5
//! initial_batch_size = 10
//! checkpoint_dir = ".waypoint-sync/checkpoints"
//!
//! [sizer]
//! min_batch = 5
//! max_batch = 50
//! step = 5
//! min_target_ms = 1000
//! max_target_ms = 4000
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::controller::{ControllerConfig, DEFAULT_LOG_DEPTH};
use crate::sizer::{SizerConfig, INITIAL_BATCH};

/// Largest log depth the remote service accepts.
pub const MAX_LOG_DEPTH: u32 = 30;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncSettings {
    /// Logs fetched per record.
    pub log_depth: u32,
    pub initial_batch_size: usize,
    pub sizer: SizerConfig,
    /// Directory for run checkpoints; runs are not resumable without one.
    pub checkpoint_dir: Option<PathBuf>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            log_depth: DEFAULT_LOG_DEPTH,
            initial_batch_size: INITIAL_BATCH,
            sizer: SizerConfig::default(),
            checkpoint_dir: None,
        }
    }
}

impl SyncSettings {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings from {}", path.display()))?;
        Self::from_toml(&content)
            .with_context(|| format!("Failed to parse settings from {}", path.display()))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let settings: SyncSettings = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        self.sizer.validate()?;
        if self.log_depth > MAX_LOG_DEPTH {
            anyhow::bail!(
                "log_depth ({}) must not exceed {}",
                self.log_depth,
                MAX_LOG_DEPTH
            );
        }
        if self.initial_batch_size == 0 {
            anyhow::bail!("initial_batch_size must be at least 1");
        }
        Ok(())
    }

    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            initial_batch_size: self.initial_batch_size,
            log_depth: self.log_depth,
            sizer: self.sizer,
        }
    }
}
