use crate::audio::MonitorConfig;
use std::time::Duration;

/// Timing knobs for a recording session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How often progress is republished while recording
    pub tick: Duration,

    /// Wait after the graceful-stop signal before killing the pipeline
    pub grace_period: Duration,

    /// Recording length when the start command does not give one
    pub default_duration: Duration,

    /// How long finalization waits for the level monitor before aborting it
    pub monitor_join_timeout: Duration,

    pub monitor: MonitorConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
            grace_period: Duration::from_secs(5),
            default_duration: Duration::from_secs(120 * 60),
            monitor_join_timeout: Duration::from_millis(500),
            monitor: MonitorConfig::default(),
        }
    }
}
