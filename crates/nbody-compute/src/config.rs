//! Slot pool configuration.

use nbody_core::constants::DEFAULT_SLOT_COUNT;
use nbody_core::distribution::DEFAULT_SEED;
use nbody_gpu::{GpuError, Result};

/// Fewest slots that keep both threads moving: one computing, one rendering.
pub const MIN_SLOT_COUNT: usize = 2;

/// Configuration for [`ComputeSlotPool`](crate::ComputeSlotPool).
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of buffer slots cycled between compute and render.
    pub slot_count: usize,
    /// Seed for the initial particle distribution.
    pub seed: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            slot_count: DEFAULT_SLOT_COUNT,
            seed: DEFAULT_SEED,
        }
    }
}

impl PoolConfig {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_slot_count(mut self, slot_count: usize) -> Self {
        self.slot_count = slot_count;
        self
    }

    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Check the configuration before any GPU object is created.
    pub fn validate(&self) -> Result<()> {
        if self.slot_count < MIN_SLOT_COUNT {
            return Err(GpuError::InvalidState(format!(
                "Need at least {MIN_SLOT_COUNT} buffer slots, got {}",
                self.slot_count
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_setup() {
        let config = PoolConfig::new();
        assert_eq!(config.slot_count, 3);
        assert_eq!(config.seed, DEFAULT_SEED);
        config.validate().unwrap();
    }

    #[test]
    fn rejects_single_slot() {
        assert!(PoolConfig::new().with_slot_count(1).validate().is_err());
        PoolConfig::new().with_slot_count(2).validate().unwrap();
    }
}
