//! Worker status shared with the controller and any other observer
//!
//! The worker is the only writer. Every write merges a [`StatusUpdate`]
//! into the current [`SessionStatus`] and advances the `updated_at`
//! heartbeat. Observers treat a status older than the staleness threshold as
//! "worker possibly dead".

mod memory;

pub use memory::MemoryStatusStore;

use crate::command::DeviceRef;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Lifecycle of the worker as seen from outside
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Idle,
    Recording,
    Converting,
    Completed,
    Error,
    Offline,
}

/// Live progress of the active recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub duration_seconds: u64,
    pub byte_size: u64,
    pub format: String,
}

/// The single status record of a worker instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStatus {
    pub recording: bool,
    pub lifecycle_state: LifecycleState,
    pub start_time: Option<DateTime<Utc>>,
    pub filename: Option<String>,
    pub device: Option<DeviceRef>,
    pub error_message: Option<String>,
    pub progress: Option<Progress>,
    pub updated_at: DateTime<Utc>,
    pub pid: u32,
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self {
            recording: false,
            lifecycle_state: LifecycleState::Offline,
            start_time: None,
            filename: None,
            device: None,
            error_message: None,
            progress: None,
            updated_at: DateTime::<Utc>::UNIX_EPOCH,
            pid: 0,
        }
    }
}

impl SessionStatus {
    /// Merge `update` and advance the heartbeat
    ///
    /// `updated_at` strictly increases even if the wall clock stalls or
    /// steps backwards.
    pub fn apply(&mut self, update: StatusUpdate, now: DateTime<Utc>) {
        if let Some(recording) = update.recording {
            self.recording = recording;
        }
        if let Some(state) = update.lifecycle_state {
            self.lifecycle_state = state;
        }
        if let Some(start_time) = update.start_time {
            self.start_time = start_time;
        }
        if let Some(filename) = update.filename {
            self.filename = filename;
        }
        if let Some(device) = update.device {
            self.device = device;
        }
        if let Some(error_message) = update.error_message {
            self.error_message = error_message;
        }
        if let Some(progress) = update.progress {
            self.progress = progress;
        }
        if let Some(pid) = update.pid {
            self.pid = pid;
        }

        let floor = self.updated_at + chrono::Duration::microseconds(1);
        self.updated_at = if now > self.updated_at { now } else { floor };
    }

    /// Whether the heartbeat is too old to trust
    pub fn is_stale(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        match now.signed_duration_since(self.updated_at).to_std() {
            Ok(age) => age > threshold,
            // updated_at is in the future: clock skew, not death
            Err(_) => false,
        }
    }
}

/// A partial write against [`SessionStatus`]
///
/// `None` leaves a field untouched. For nullable fields `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusUpdate {
    pub recording: Option<bool>,
    pub lifecycle_state: Option<LifecycleState>,
    pub start_time: Option<Option<DateTime<Utc>>>,
    pub filename: Option<Option<String>>,
    pub device: Option<Option<DeviceRef>>,
    pub error_message: Option<Option<String>>,
    pub progress: Option<Option<Progress>>,
    pub pid: Option<u32>,
}

impl StatusUpdate {
    /// Touch the heartbeat only
    pub fn heartbeat() -> Self {
        Self::default()
    }

    /// Known-idle state with every session field cleared
    pub fn idle() -> Self {
        Self {
            recording: Some(false),
            lifecycle_state: Some(LifecycleState::Idle),
            start_time: Some(None),
            filename: Some(None),
            device: Some(None),
            error_message: Some(None),
            progress: Some(None),
            pid: None,
        }
    }

    /// Idle state claimed by a freshly started worker
    pub fn reset(pid: u32) -> Self {
        Self {
            pid: Some(pid),
            ..Self::idle()
        }
    }

    pub fn recording(filename: String, device: DeviceRef, start_time: DateTime<Utc>) -> Self {
        Self {
            recording: Some(true),
            lifecycle_state: Some(LifecycleState::Recording),
            start_time: Some(Some(start_time)),
            filename: Some(Some(filename)),
            device: Some(Some(device)),
            error_message: Some(None),
            progress: Some(None),
            pid: None,
        }
    }

    pub fn progress(progress: Progress) -> Self {
        Self {
            progress: Some(Some(progress)),
            ..Self::default()
        }
    }

    pub fn converting() -> Self {
        Self {
            lifecycle_state: Some(LifecycleState::Converting),
            ..Self::default()
        }
    }

    pub fn completed(progress: Option<Progress>) -> Self {
        Self {
            recording: Some(false),
            lifecycle_state: Some(LifecycleState::Completed),
            progress: Some(progress),
            ..Self::default()
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            recording: Some(false),
            lifecycle_state: Some(LifecycleState::Error),
            start_time: Some(None),
            filename: Some(None),
            device: Some(None),
            error_message: Some(Some(message.into())),
            progress: Some(None),
            pid: None,
        }
    }

    pub fn offline() -> Self {
        Self {
            recording: Some(false),
            lifecycle_state: Some(LifecycleState::Offline),
            start_time: Some(None),
            filename: Some(None),
            device: Some(None),
            progress: Some(None),
            ..Self::default()
        }
    }
}

/// Push notification that the status changed; read the store for the payload
pub type ChangeStream = BoxStream<'static, ()>;

/// Shared status record with change notifications
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Merge `update` into the record, refresh the heartbeat and return the new snapshot
    async fn write(&self, update: StatusUpdate) -> Result<SessionStatus>;

    /// Latest complete snapshot
    async fn read(&self) -> Result<SessionStatus>;

    /// Notifications fired after each write
    async fn subscribe_changes(&self) -> Result<ChangeStream>;
}
