use super::{Command, CommandChannel, CommandStream};
use anyhow::Result;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, Mutex, Notify};
use tracing::warn;

/// In-process command channel used when controller and worker share a process
pub struct MemoryCommandChannel {
    live: broadcast::Sender<Command>,
    queue: Mutex<VecDeque<Command>>,
    queued: Notify,
}

impl MemoryCommandChannel {
    pub fn new() -> Self {
        let (live, _) = broadcast::channel(64);
        Self {
            live,
            queue: Mutex::new(VecDeque::new()),
            queued: Notify::new(),
        }
    }
}

impl Default for MemoryCommandChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandChannel for MemoryCommandChannel {
    async fn publish(&self, command: &Command) -> Result<()> {
        // No subscriber means nobody is listening; the command is lost, as on a real bus
        if self.live.send(command.clone()).is_err() {
            warn!("No live subscriber for {:?} command", command.action);
        }
        Ok(())
    }

    async fn enqueue(&self, command: &Command) -> Result<()> {
        self.queue.lock().await.push_back(command.clone());
        self.queued.notify_one();
        Ok(())
    }

    async fn subscribe(&self) -> Result<CommandStream> {
        let rx = self.live.subscribe();
        let commands = stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(command) => return Some((command, rx)),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Live command subscriber lagged, {} commands skipped", skipped);
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        });
        Ok(commands.boxed())
    }

    async fn pop_queued(&self, timeout: Duration) -> Result<Option<Command>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.queued.notified();
            if let Some(command) = self.queue.lock().await.pop_front() {
                return Ok(Some(command));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }
}
