//! Adaptive batch sizing.
//!
//! Keeps each remote round trip inside a latency band by growing the batch
//! when requests are fast and shrinking it when they are slow.

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const MIN_BATCH: usize = 5;
pub const MAX_BATCH: usize = 50;
pub const STEP: usize = 5;
pub const MIN_TARGET_MS: u64 = 1_000;
pub const MAX_TARGET_MS: u64 = 4_000;
pub const INITIAL_BATCH: usize = 10;

/// Bounds and step of the batch size control loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SizerConfig {
    pub min_batch: usize,
    pub max_batch: usize,
    pub step: usize,
    pub min_target_ms: u64,
    pub max_target_ms: u64,
}

impl Default for SizerConfig {
    fn default() -> Self {
        Self {
            min_batch: MIN_BATCH,
            max_batch: MAX_BATCH,
            step: STEP,
            min_target_ms: MIN_TARGET_MS,
            max_target_ms: MAX_TARGET_MS,
        }
    }
}

impl SizerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.min_batch == 0 {
            anyhow::bail!("sizer.min_batch must be at least 1");
        }
        if self.min_batch > self.max_batch {
            anyhow::bail!(
                "sizer.min_batch ({}) must not exceed sizer.max_batch ({})",
                self.min_batch,
                self.max_batch
            );
        }
        if self.step == 0 {
            anyhow::bail!("sizer.step must be at least 1");
        }
        if self.min_target_ms > self.max_target_ms {
            anyhow::bail!(
                "sizer.min_target_ms ({}) must not exceed sizer.max_target_ms ({})",
                self.min_target_ms,
                self.max_target_ms
            );
        }
        Ok(())
    }

    /// Clamps `size` into `[min_batch, max_batch]`.
    pub fn clamp(&self, size: usize) -> usize {
        size.max(self.min_batch).min(self.max_batch)
    }

    /// Next batch size after a request of `size` items took `elapsed`.
    pub fn next(&self, size: usize, elapsed: Duration) -> usize {
        let elapsed_ms = elapsed.as_millis();
        let next = if elapsed_ms < u128::from(self.min_target_ms) {
            size.saturating_add(self.step)
        } else if elapsed_ms > u128::from(self.max_target_ms) {
            size.saturating_sub(self.step)
        } else {
            size
        };
        self.clamp(next)
    }
}

/// Next batch size under the default bounds.
pub fn next_batch_size(size: usize, elapsed_ms: u64) -> usize {
    SizerConfig::default().next(size, Duration::from_millis(elapsed_ms))
}
