//! Tunables of the playback engine. All buffer thresholds are expressed in seconds.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DashError, DashResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Share of the bandwidth estimate the ABR controller is allowed to spend.
    pub bandwidth_fraction: f64,
    /// `estimate = estimate * smoothing_factor + sample * (1 - smoothing_factor)`
    pub smoothing_factor: f64,
    /// Bandwidth (bps) assumed before the first transfer completes.
    pub initial_bitrate: f64,
    /// Below this buffer level the ABR controller never switches up.
    pub panic_buffer: f64,
    /// Above this buffer level the ABR controller never switches down.
    pub safe_buffer: f64,
    /// The scheduler stops prefetching while the buffer holds more than this.
    pub max_buffer_duration: f64,
    /// Buffer needed before playback starts for the first time.
    pub min_start_buffer: f64,
    /// Buffer needed to resume after a stall.
    pub min_rebuffer: f64,
    /// Clock tick of the player loop and backoff of the scheduler, in seconds.
    pub update_interval: f64,
    /// Refresh period for dynamic manifests without `minimumUpdatePeriod`.
    pub manifest_update_interval: f64,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            bandwidth_fraction: 0.7,
            smoothing_factor: 0.5,
            initial_bitrate: 1_000_000.0,
            panic_buffer: 2.0,
            safe_buffer: 4.0,
            max_buffer_duration: 5.0,
            min_start_buffer: 2.0,
            min_rebuffer: 1.0,
            update_interval: 0.05,
            manifest_update_interval: 1.0,
        }
    }
}

impl PlayerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(self.update_interval)
    }

    pub fn manifest_refresh_interval(&self) -> Duration {
        Duration::from_secs_f64(self.manifest_update_interval)
    }

    pub fn validate(&self) -> DashResult<()> {
        if !(self.bandwidth_fraction > 0.0 && self.bandwidth_fraction <= 1.0) {
            return Err(DashError::Config(format!(
                "bandwidth_fraction must be in (0, 1], got {}",
                self.bandwidth_fraction
            )));
        }
        if !(0.0..1.0).contains(&self.smoothing_factor) {
            return Err(DashError::Config(format!(
                "smoothing_factor must be in [0, 1), got {}",
                self.smoothing_factor
            )));
        }
        if self.initial_bitrate <= 0.0 {
            return Err(DashError::Config("initial_bitrate must be positive".to_string()));
        }
        if self.panic_buffer < 0.0 || self.panic_buffer >= self.safe_buffer {
            return Err(DashError::Config(format!(
                "expected 0 <= panic_buffer < safe_buffer, got {} and {}",
                self.panic_buffer, self.safe_buffer
            )));
        }
        if self.max_buffer_duration <= 0.0 {
            return Err(DashError::Config("max_buffer_duration must be positive".to_string()));
        }
        if self.min_start_buffer < 0.0 || self.min_rebuffer < 0.0 {
            return Err(DashError::Config(
                "start and rebuffer thresholds must not be negative".to_string(),
            ));
        }
        if self.update_interval <= 0.0 || self.manifest_update_interval <= 0.0 {
            return Err(DashError::Config("update intervals must be positive".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = PlayerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.tick_interval(), Duration::from_millis(50));
    }

    #[test]
    fn panic_must_stay_below_safe() {
        let config = PlayerConfig {
            panic_buffer: 4.0,
            safe_buffer: 4.0,
            ..PlayerConfig::default()
        };
        assert!(matches!(config.validate(), Err(DashError::Config(_))));
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config: PlayerConfig = serde_json::from_str(r#"{"safe_buffer": 8.0}"#).unwrap();
        assert_eq!(config.safe_buffer, 8.0);
        assert_eq!(config.bandwidth_fraction, 0.7);
    }
}
