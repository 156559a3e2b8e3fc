//! # Renderer Configuration
//!
//! Global settings of the dispatch core, loaded once at startup.
//!
//! ```toml
//! default_min_frame_duration_us = 16667
//! max_dispatch_loops_without_event_drain = 300
//! watchdog_notification_interval_ms = 1000
//! frame_timing_reporting_period_ms = 0
//! ```

use crate::error::{RendererError, RendererResult};
use lumen_shared::constants::{
    DEFAULT_MIN_FRAME_DURATION, DEFAULT_WATCHDOG_NOTIFICATION_INTERVAL,
    MAX_DISPATCH_LOOPS_WITHOUT_EVENT_DRAIN,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Configuration of the renderer dispatch core.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RendererConfig {
    /// Minimum frame duration of displays without their own override (us).
    pub default_min_frame_duration_us: u64,
    /// Dispatch cycles without an event drain before warning.
    pub max_dispatch_loops_without_event_drain: u32,
    /// Heartbeat interval of the command dispatching thread (ms).
    pub watchdog_notification_interval_ms: u64,
    /// Period of frame timing reports per display (ms); 0 disables them.
    pub frame_timing_reporting_period_ms: u64,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            default_min_frame_duration_us: duration_micros(DEFAULT_MIN_FRAME_DURATION),
            max_dispatch_loops_without_event_drain: MAX_DISPATCH_LOOPS_WITHOUT_EVENT_DRAIN,
            watchdog_notification_interval_ms: duration_millis(
                DEFAULT_WATCHDOG_NOTIFICATION_INTERVAL,
            ),
            frame_timing_reporting_period_ms: 0,
        }
    }
}

impl RendererConfig {
    /// Production config: periodic frame timing reports, tighter heartbeat.
    #[must_use]
    pub const fn production() -> Self {
        Self {
            default_min_frame_duration_us: 16_667,
            max_dispatch_loops_without_event_drain: 300,
            watchdog_notification_interval_ms: 500,
            frame_timing_reporting_period_ms: 5_000,
        }
    }

    /// Parses and validates a TOML document.
    pub fn from_toml_str(text: &str) -> RendererResult<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| RendererError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> RendererResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| RendererError::ConfigIo {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml_str(&text)
    }

    /// Rejects values the dispatch core cannot run with.
    pub fn validate(&self) -> RendererResult<()> {
        if self.default_min_frame_duration_us == 0 {
            return Err(RendererError::InvalidConfig(
                "default_min_frame_duration_us must be positive".to_string(),
            ));
        }
        if self.watchdog_notification_interval_ms == 0 {
            return Err(RendererError::InvalidConfig(
                "watchdog_notification_interval_ms must be positive".to_string(),
            ));
        }
        if self.max_dispatch_loops_without_event_drain == 0 {
            return Err(RendererError::InvalidConfig(
                "max_dispatch_loops_without_event_drain must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Default minimum frame duration of a display loop.
    #[must_use]
    pub const fn default_min_frame_duration(&self) -> Duration {
        Duration::from_micros(self.default_min_frame_duration_us)
    }

    /// Heartbeat interval of the command dispatching thread.
    #[must_use]
    pub const fn watchdog_notification_interval(&self) -> Duration {
        Duration::from_millis(self.watchdog_notification_interval_ms)
    }

    /// Frame timing reporting period, `None` when disabled.
    #[must_use]
    pub const fn frame_timing_reporting_period(&self) -> Option<Duration> {
        if self.frame_timing_reporting_period_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.frame_timing_reporting_period_ms))
        }
    }

    /// Dispatch loops between two stuck display-thread checks.
    ///
    /// Half the number of default-length frames per second, at least one.
    #[must_use]
    pub fn stuck_display_check_period(&self) -> u64 {
        let frames_per_second = 1_000_000 / self.default_min_frame_duration_us.max(1);
        (frames_per_second / 2).max(1)
    }
}

fn duration_micros(duration: Duration) -> u64 {
    u64::try_from(duration.as_micros()).unwrap_or(u64::MAX)
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_matches_constants() {
        let config = RendererConfig::default();
        assert_eq!(config.default_min_frame_duration(), DEFAULT_MIN_FRAME_DURATION);
        assert_eq!(config.max_dispatch_loops_without_event_drain, 300);
        assert!(config.frame_timing_reporting_period().is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = RendererConfig::from_toml_str("watchdog_notification_interval_ms = 250\n")
            .unwrap();
        assert_eq!(config.watchdog_notification_interval(), Duration::from_millis(250));
        assert_eq!(config.default_min_frame_duration_us, 16_667);
    }

    #[test]
    fn test_zero_frame_duration_rejected() {
        let err = RendererConfig::from_toml_str("default_min_frame_duration_us = 0").unwrap_err();
        assert!(matches!(err, RendererError::InvalidConfig(_)));
    }

    #[test]
    fn test_unknown_key_rejected() {
        assert!(RendererConfig::from_toml_str("frame_budget = 3").is_err());
    }

    #[test]
    fn test_missing_file_reports_path() {
        let err = RendererConfig::from_toml_file("/nonexistent/lumen.toml").unwrap_err();
        assert!(matches!(err, RendererError::ConfigIo { ref path, .. } if path.contains("lumen.toml")));
    }

    #[test]
    fn test_stuck_display_check_period() {
        // 59 whole frames per second at 16.667 ms
        assert_eq!(RendererConfig::default().stuck_display_check_period(), 29);
        let slow = RendererConfig {
            default_min_frame_duration_us: 2_000_000,
            ..RendererConfig::default()
        };
        assert_eq!(slow.stuck_display_check_period(), 1);
    }
}
