//! Engine timing configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Which view hosts the canvas. Decides how often the store is polled.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewProfile {
    /// The full project canvas.
    #[default]
    Canvas,
    /// Lighter views that only need eventual freshness.
    Light,
}

impl ViewProfile {
    pub fn poll_interval(&self) -> Duration {
        match self {
            ViewProfile::Canvas => Duration::from_millis(500),
            ViewProfile::Light => Duration::from_secs(2),
        }
    }
}

impl std::str::FromStr for ViewProfile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "canvas" => Ok(ViewProfile::Canvas),
            "light" => Ok(ViewProfile::Light),
            other => Err(format!("unknown view profile: {other}")),
        }
    }
}

/// Timers and buffer sizes used by [`CanvasEngine`](crate::CanvasEngine).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Store poll period.
    pub poll_interval: Duration,
    /// Run status poll period.
    pub status_poll_interval: Duration,
    /// Quiet period before a resize is persisted.
    pub resize_debounce: Duration,
    /// How long a fresh run ignores "not running" status answers.
    pub run_status_grace: Duration,
    /// Capacity of the engine event bus.
    pub event_capacity: usize,
}

impl EngineConfig {
    pub fn for_profile(profile: ViewProfile) -> Self {
        Self {
            poll_interval: profile.poll_interval(),
            status_poll_interval: Duration::from_secs(2),
            resize_debounce: Duration::from_millis(100),
            run_status_grace: Duration::from_secs(2),
            event_capacity: 256,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::for_profile(ViewProfile::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_intervals() {
        assert_eq!(
            EngineConfig::for_profile(ViewProfile::Canvas).poll_interval,
            Duration::from_millis(500)
        );
        assert_eq!(
            EngineConfig::for_profile(ViewProfile::Light).poll_interval,
            Duration::from_secs(2)
        );
        assert_eq!(EngineConfig::default().resize_debounce, Duration::from_millis(100));
    }

    #[test]
    fn test_profile_parse() {
        assert_eq!("Light".parse::<ViewProfile>().unwrap(), ViewProfile::Light);
        assert!("dense".parse::<ViewProfile>().is_err());
    }
}
