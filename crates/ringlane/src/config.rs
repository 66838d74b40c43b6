use thiserror::Error;

/// Configuration for a lane channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Number of independent lanes (default: 5)
    pub lanes: usize,
    /// Slots per lane (default: 300). Any positive value, not only powers of two.
    pub lane_capacity: usize,
    /// Count offered/drained items (the drop counter is always maintained)
    pub enable_metrics: bool,
}

/// Rejected channel configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A channel needs at least one lane.
    #[error("lane count must be at least 1")]
    ZeroLanes,
    /// A lane needs at least one slot.
    #[error("lane capacity must be at least 1")]
    ZeroLaneCapacity,
}

impl Config {
    /// Creates a new configuration with custom settings.
    pub const fn new(lanes: usize, lane_capacity: usize, enable_metrics: bool) -> Self {
        Self {
            lanes,
            lane_capacity,
            enable_metrics,
        }
    }

    /// Checks the configured ranges. Invalid values are rejected, never clamped.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lanes == 0 {
            return Err(ConfigError::ZeroLanes);
        }
        if self.lane_capacity == 0 {
            return Err(ConfigError::ZeroLaneCapacity);
        }
        Ok(())
    }

    /// Total number of slots across all lanes.
    #[inline]
    pub const fn total_capacity(&self) -> usize {
        self.lanes * self.lane_capacity
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            lanes: 5,
            lane_capacity: 300,
            enable_metrics: true,
        }
    }
}
