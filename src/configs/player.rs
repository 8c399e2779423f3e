use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::common::types::AnyResult;

/// Lookahead and buffering knobs for a playback session.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PlayerConfig {
    /// Seconds of not-yet-played material the scheduler keeps requested.
    #[serde(default = "default_buffer_duration_secs")]
    pub buffer_duration_secs: u32,
    /// Seconds between scheduler passes. Must be smaller than the buffer window.
    #[serde(default = "default_interval_duration_secs")]
    pub interval_duration_secs: f64,
    /// How many indices behind the playback cursor stay buffered.
    #[serde(default = "default_retention_margin")]
    pub retention_margin: u32,
    /// Upper bound on fetch+decode requests in flight within one pass.
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
    /// Times a failed slot is re-issued while still ahead of playback. 0 disables retries.
    #[serde(default)]
    pub max_retries: u32,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            buffer_duration_secs: default_buffer_duration_secs(),
            interval_duration_secs: default_interval_duration_secs(),
            retention_margin: default_retention_margin(),
            max_concurrent_requests: default_max_concurrent_requests(),
            max_retries: 0,
        }
    }
}

impl PlayerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(self.interval_duration_secs)
    }

    pub fn validate(&self) -> AnyResult<()> {
        if self.buffer_duration_secs == 0 {
            return Err("player.buffer_duration_secs must be at least 1".into());
        }
        if !(self.interval_duration_secs > 0.0)
            || self.interval_duration_secs >= self.buffer_duration_secs as f64
        {
            return Err(format!(
                "player.interval_duration_secs ({}) must be positive and below buffer_duration_secs ({})",
                self.interval_duration_secs, self.buffer_duration_secs
            )
            .into());
        }
        if self.max_concurrent_requests == 0 {
            return Err("player.max_concurrent_requests must be at least 1".into());
        }
        Ok(())
    }
}

/// Texture quality adaptation thresholds.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AbrConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Number of fetch/play ratio samples evaluated together.
    #[serde(default = "default_abr_window")]
    pub window: usize,
    /// Mean ratio at or below which the next-higher target is tried.
    #[serde(default = "default_upgrade_threshold")]
    pub upgrade_threshold: f64,
    /// Mean ratio above which the next-lower target is used.
    #[serde(default = "default_downgrade_threshold")]
    pub downgrade_threshold: f64,
}

impl Default for AbrConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window: default_abr_window(),
            upgrade_threshold: default_upgrade_threshold(),
            downgrade_threshold: default_downgrade_threshold(),
        }
    }
}

impl AbrConfig {
    pub fn validate(&self) -> AnyResult<()> {
        if self.window == 0 {
            return Err("abr.window must be at least 1".into());
        }
        if !(0.0..self.downgrade_threshold).contains(&self.upgrade_threshold) {
            return Err(format!(
                "abr.upgrade_threshold ({}) must lie in [0, downgrade_threshold = {})",
                self.upgrade_threshold, self.downgrade_threshold
            )
            .into());
        }
        Ok(())
    }
}

fn default_buffer_duration_secs() -> u32 {
    4
}

fn default_interval_duration_secs() -> f64 {
    2.0
}

fn default_retention_margin() -> u32 {
    1
}

fn default_max_concurrent_requests() -> usize {
    32
}

fn default_true() -> bool {
    true
}

fn default_abr_window() -> usize {
    3
}

fn default_upgrade_threshold() -> f64 {
    0.3
}

fn default_downgrade_threshold() -> f64 {
    0.6
}
