//! Control commands sent from the controller to the recording worker
//!
//! Commands travel over a [`CommandChannel`]. Delivery is at-least-once, so
//! the worker treats every command as possibly redelivered.

mod memory;

pub use memory::MemoryCommandChannel;

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

/// What the worker is asked to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Start,
    Stop,
    Shutdown,
}

/// Identifies a Bluetooth audio input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRef {
    pub mac: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub adapter: String,
}

impl DeviceRef {
    pub fn new(mac: impl Into<String>, name: impl Into<String>, adapter: impl Into<String>) -> Self {
        Self {
            mac: mac.into(),
            name: name.into(),
            adapter: adapter.into(),
        }
    }
}

/// A single control instruction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub action: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<DeviceRef>,
    /// Recording length in minutes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
}

impl Command {
    pub fn start(device: DeviceRef, duration_minutes: Option<u64>) -> Self {
        Self {
            action: Action::Start,
            device: Some(device),
            duration: duration_minutes,
        }
    }

    pub fn stop() -> Self {
        Self {
            action: Action::Stop,
            device: None,
            duration: None,
        }
    }

    pub fn shutdown() -> Self {
        Self {
            action: Action::Shutdown,
            device: None,
            duration: None,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(payload)?)
    }
}

/// Decode a raw payload, logging and dropping anything malformed
pub fn decode_payload(payload: &[u8], origin: &str) -> Option<Command> {
    match Command::decode(payload) {
        Ok(command) => Some(command),
        Err(e) => {
            warn!(
                "Dropping malformed command from {} ({} bytes): {}",
                origin,
                payload.len(),
                e
            );
            None
        }
    }
}

/// Lazy, unbounded sequence of commands from a live subscription
pub type CommandStream = BoxStream<'static, Command>;

/// Transport carrying commands from controller to worker
///
/// Two delivery paths exist: a live subscription and a legacy queue that is
/// popped with a timeout. Ordering between the two is not guaranteed.
#[async_trait]
pub trait CommandChannel: Send + Sync {
    /// Publish on the live path. Must return promptly.
    async fn publish(&self, command: &Command) -> Result<()>;

    /// Push onto the legacy queue
    async fn enqueue(&self, command: &Command) -> Result<()>;

    /// Subscribe to the live path
    async fn subscribe(&self) -> Result<CommandStream>;

    /// Pop the next queued command, waiting at most `timeout`
    async fn pop_queued(&self, timeout: Duration) -> Result<Option<Command>>;
}
