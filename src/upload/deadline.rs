//! Size-scaled attempt deadlines
//!
//! Coarse bands, not a formula: bigger files get more time, and the large
//! band is a hard ceiling.

use super::MIB;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Files up to this size use the small band
pub const SMALL_FILE_LIMIT: u64 = 10 * MIB;

/// Files up to this size use the medium band
pub const MEDIUM_FILE_LIMIT: u64 = 20 * MIB;

/// Deadline bands, in seconds
///
/// # Example
///
/// ```yaml
/// deadlines:
///   small_secs: 180
///   medium_secs: 300
///   large_secs: 600
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadlinePolicy {
    #[serde(default = "default_small_secs")]
    pub small_secs: u64,
    #[serde(default = "default_medium_secs")]
    pub medium_secs: u64,
    #[serde(default = "default_large_secs")]
    pub large_secs: u64,
}

impl Default for DeadlinePolicy {
    fn default() -> Self {
        Self {
            small_secs: default_small_secs(),
            medium_secs: default_medium_secs(),
            large_secs: default_large_secs(),
        }
    }
}

fn default_small_secs() -> u64 {
    180
}

fn default_medium_secs() -> u64 {
    300
}

fn default_large_secs() -> u64 {
    600
}

impl DeadlinePolicy {
    /// Deadline for one attempt at a file of `declared_size` bytes
    pub fn deadline_for(&self, declared_size: u64) -> Duration {
        let secs = if declared_size <= SMALL_FILE_LIMIT {
            self.small_secs
        } else if declared_size <= MEDIUM_FILE_LIMIT {
            self.medium_secs
        } else {
            self.large_secs
        };
        Duration::from_secs(secs)
    }

    /// Bands must be non-zero and non-decreasing
    pub fn is_monotonic(&self) -> bool {
        self.small_secs > 0 && self.small_secs <= self.medium_secs && self.medium_secs <= self.large_secs
    }
}
