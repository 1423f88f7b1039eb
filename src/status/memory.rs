use super::{ChangeStream, SessionStatus, StatusStore, StatusUpdate};
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use tokio::sync::watch;

/// In-process status store
///
/// Backed by a `watch` channel so readers always get a whole record.
pub struct MemoryStatusStore {
    tx: watch::Sender<SessionStatus>,
}

impl MemoryStatusStore {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(SessionStatus::default());
        Self { tx }
    }
}

impl Default for MemoryStatusStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StatusStore for MemoryStatusStore {
    async fn write(&self, update: StatusUpdate) -> Result<SessionStatus> {
        let mut snapshot = SessionStatus::default();
        self.tx.send_modify(|status| {
            status.apply(update, Utc::now());
            snapshot = status.clone();
        });
        Ok(snapshot)
    }

    async fn read(&self) -> Result<SessionStatus> {
        Ok(self.tx.borrow().clone())
    }

    async fn subscribe_changes(&self) -> Result<ChangeStream> {
        let rx = self.tx.subscribe();
        let changes = stream::unfold(rx, |mut rx| async move {
            rx.changed().await.ok()?;
            Some(((), rx))
        });
        Ok(changes.boxed())
    }
}
