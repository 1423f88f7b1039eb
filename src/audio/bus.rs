use super::level::AudioLevelSample;
use anyhow::Result;
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

/// Fire-and-forget fan-out of audio level samples
#[async_trait]
pub trait LevelBus: Send + Sync {
    async fn publish_level(&self, sample: &AudioLevelSample) -> Result<()>;

    /// Samples published after subscribing. Slow subscribers miss samples.
    async fn subscribe_levels(&self) -> Result<BoxStream<'static, AudioLevelSample>>;
}

/// In-process level bus
pub struct MemoryLevelBus {
    tx: broadcast::Sender<AudioLevelSample>,
}

impl MemoryLevelBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(32);
        Self { tx }
    }
}

impl Default for MemoryLevelBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LevelBus for MemoryLevelBus {
    async fn publish_level(&self, sample: &AudioLevelSample) -> Result<()> {
        // Nobody listening is fine
        let _ = self.tx.send(sample.clone());
        Ok(())
    }

    async fn subscribe_levels(&self) -> Result<BoxStream<'static, AudioLevelSample>> {
        let rx = self.tx.subscribe();
        let samples = stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(sample) => return Some((sample, rx)),
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => return None,
                }
            }
        });
        Ok(samples.boxed())
    }
}
