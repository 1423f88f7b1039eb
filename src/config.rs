use crate::audio::MonitorConfig;
use crate::nats::NatsSubjects;
use crate::session::SessionConfig;
use crate::storage::RecordingStorage;
use crate::worker::WorkerConfig;
use anyhow::Result;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub nats: NatsConfig,
    pub storage: StorageConfig,
    pub capture: CaptureConfig,
    pub monitor: LevelMonitorConfig,
    pub worker: WorkerSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "pi-recorder".to_string(),
            http: HttpConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NatsConfig {
    pub url: String,
    pub command_subject: String,
    pub queue_stream: String,
    pub queue_subject: String,
    pub queue_consumer: String,
    pub status_bucket: String,
    pub status_key: String,
    pub status_notify_subject: String,
    pub level_subject: String,
    /// Upper bound on a controller-side publish
    pub publish_timeout_ms: u64,
}

impl Default for NatsConfig {
    fn default() -> Self {
        let subjects = NatsSubjects::default();
        Self {
            url: "nats://localhost:4222".to_string(),
            command_subject: subjects.commands,
            queue_stream: subjects.queue_stream,
            queue_subject: subjects.queue_subject,
            queue_consumer: subjects.queue_consumer,
            status_bucket: subjects.status_bucket,
            status_key: subjects.status_key,
            status_notify_subject: subjects.status_notify,
            level_subject: subjects.levels,
            publish_timeout_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Active recordings; should be tmpfs
    pub scratch_dir: String,
    /// Finished recordings; `~` is expanded
    pub recordings_dir: String,
    pub extension: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            scratch_dir: "/dev/shm/pi-recorder".to_string(),
            recordings_dir: "~/recordings".to_string(),
            extension: "ogg".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub program: String,
    /// `{source}` and `{output}` are substituted
    pub args: Vec<String>,
    /// Signal name passed to `kill` for a graceful stop
    pub stop_signal: String,
    pub grace_period_ms: u64,
    pub resolver_program: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        let args = [
            "-nostdin", "-hide_banner", "-loglevel", "error", "-f", "pulse", "-i", "{source}",
            "-ac", "1", "-ar", "22050", "-c:a", "libvorbis", "-q:a", "4", "-f", "ogg",
            "{output}",
        ];
        Self {
            program: "ffmpeg".to_string(),
            args: args.iter().map(|arg| arg.to_string()).collect(),
            stop_signal: "INT".to_string(),
            grace_period_ms: 5000,
            resolver_program: "pactl".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LevelMonitorConfig {
    pub program: String,
    /// `{source}` and `{rate}` are substituted
    pub args: Vec<String>,
    pub sample_rate: u32,
    pub block_size: usize,
    pub update_hz: f32,
    pub peak_decay: f32,
    pub join_timeout_ms: u64,
}

impl Default for LevelMonitorConfig {
    fn default() -> Self {
        let args = [
            "--raw", "--format=s16le", "--rate={rate}", "--channels=1", "--device={source}",
        ];
        Self {
            program: "parec".to_string(),
            args: args.iter().map(|arg| arg.to_string()).collect(),
            sample_rate: 22050,
            block_size: 2048,
            update_hz: 10.0,
            peak_decay: 0.95,
            join_timeout_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    pub tick_ms: u64,
    pub poll_timeout_ms: u64,
    pub stop_timeout_ms: u64,
    pub shutdown_timeout_ms: u64,
    pub retry_delay_ms: u64,
    /// Age after which observers consider the worker dead
    pub stale_after_secs: u64,
    pub default_duration_minutes: u64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            tick_ms: 1000,
            poll_timeout_ms: 1000,
            stop_timeout_ms: 8000,
            shutdown_timeout_ms: 8000,
            retry_delay_ms: 2000,
            stale_after_secs: 10,
            default_duration_minutes: 120,
        }
    }
}

impl Config {
    /// Defaults, then the optional file at `path`, then `RECORDER__SECTION__KEY` variables
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("RECORDER")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    pub fn subjects(&self) -> NatsSubjects {
        NatsSubjects {
            commands: self.nats.command_subject.clone(),
            queue_stream: self.nats.queue_stream.clone(),
            queue_subject: self.nats.queue_subject.clone(),
            queue_consumer: self.nats.queue_consumer.clone(),
            status_bucket: self.nats.status_bucket.clone(),
            status_key: self.nats.status_key.clone(),
            status_notify: self.nats.status_notify_subject.clone(),
            levels: self.nats.level_subject.clone(),
        }
    }

    pub fn storage(&self) -> RecordingStorage {
        RecordingStorage::new(
            expand_path(&self.storage.scratch_dir),
            expand_path(&self.storage.recordings_dir),
            self.storage.extension.clone(),
        )
    }

    pub fn session(&self) -> SessionConfig {
        SessionConfig {
            tick: Duration::from_millis(self.worker.tick_ms),
            grace_period: Duration::from_millis(self.capture.grace_period_ms),
            default_duration: Duration::from_secs(self.worker.default_duration_minutes.saturating_mul(60)),
            monitor_join_timeout: Duration::from_millis(self.monitor.join_timeout_ms),
            monitor: MonitorConfig {
                block_size: self.monitor.block_size,
                update_hz: self.monitor.update_hz,
                peak_decay: self.monitor.peak_decay,
            },
        }
    }

    pub fn worker(&self) -> WorkerConfig {
        WorkerConfig {
            tick: Duration::from_millis(self.worker.tick_ms),
            poll_timeout: Duration::from_millis(self.worker.poll_timeout_ms),
            stop_timeout: Duration::from_millis(self.worker.stop_timeout_ms),
            shutdown_timeout: Duration::from_millis(self.worker.shutdown_timeout_ms),
            retry_delay: Duration::from_millis(self.worker.retry_delay_ms),
        }
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.worker.stale_after_secs)
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.nats.publish_timeout_ms)
    }
}

fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).into_owned())
}
