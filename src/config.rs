//! Build-time engine parameters.
//!
//! The core exposes no environment variables, files or CLI; everything is
//! fixed when the matcher is constructed.

use thiserror::Error;

/// A configuration value the engine cannot run with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Capacities must be non-zero
    #[error("capacity must be non-zero")]
    ZeroCapacity,
    /// The SPSC ring indexes with a power-of-two mask
    #[error("ring capacity {0} is not a power of two")]
    RingCapacityNotPowerOfTwo(usize),
}

/// Engine sizing, fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Maximum number of simultaneously resting orders (arena size)
    pub order_capacity: u32,
    /// Output ring capacity; must be a power of two
    pub ring_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            order_capacity: 1 << 16,
            ring_capacity: 1 << 12,
        }
    }
}

impl Config {
    /// Check the configuration for values the engine cannot honour.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.order_capacity == 0 || self.ring_capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if !self.ring_capacity.is_power_of_two() {
            return Err(ConfigError::RingCapacityNotPowerOfTwo(self.ring_capacity));
        }
        Ok(())
    }
}
