use super::bus::LevelBus;
use super::level::{decode_s16le, LevelMeter};
use super::tap::AudioTap;
use std::io::ErrorKind;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Tuning for the level monitor
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Samples per analysed block
    pub block_size: usize,
    /// Upper bound on published samples per second
    pub update_hz: f32,
    /// Peak-hold decay per block, just below 1.0
    pub peak_decay: f32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            block_size: 2048,
            update_hz: 10.0,
            peak_decay: 0.95,
        }
    }
}

impl MonitorConfig {
    fn min_interval(&self) -> Duration {
        Duration::from_secs_f32(1.0 / self.update_hz.max(0.1))
    }
}

/// Publishes loudness of the live source while a session records
///
/// Failures here are logged and end the monitor only; the recording carries on.
pub struct LevelMonitor {
    tap: Arc<dyn AudioTap>,
    levels: Arc<dyn LevelBus>,
    config: MonitorConfig,
}

impl LevelMonitor {
    pub fn new(tap: Arc<dyn AudioTap>, levels: Arc<dyn LevelBus>, config: MonitorConfig) -> Self {
        Self { tap, levels, config }
    }

    pub async fn run(self, source: String, cancel: CancellationToken) {
        let mut reader = tokio::select! {
            _ = cancel.cancelled() => return,
            opened = self.tap.open(&source) => match opened {
                Ok(reader) => reader,
                Err(e) => {
                    warn!("Level monitor could not open {}: {:#}", source, e);
                    return;
                }
            },
        };

        info!("Level monitor started on {}", source);

        let mut meter = LevelMeter::new(self.config.peak_decay);
        let min_interval = self.config.min_interval();
        let mut last_publish: Option<Instant> = None;
        let mut block = vec![0u8; self.config.block_size.max(1) * 2];

        loop {
            let read = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                read = reader.read_exact(&mut block) => read,
            };

            match read {
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                    info!("Level tap on {} ended", source);
                    break;
                }
                Err(e) => {
                    warn!("Level tap read failed: {}", e);
                    break;
                }
            }

            let sample = meter.process(&decode_s16le(&block));

            let due = last_publish.map_or(true, |at| at.elapsed() >= min_interval);
            if due {
                if let Err(e) = self.levels.publish_level(&sample).await {
                    debug!("Dropping level sample: {:#}", e);
                }
                last_publish = Some(Instant::now());
            }
        }

        info!("Level monitor stopped");
    }
}
