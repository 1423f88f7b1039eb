use crate::audio::LevelBus;
use crate::command::CommandChannel;
use crate::status::StatusStore;
use crate::storage::RecordingStorage;
use std::sync::Arc;
use std::time::Duration;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub commands: Arc<dyn CommandChannel>,
    pub status: Arc<dyn StatusStore>,
    pub levels: Arc<dyn LevelBus>,
    pub storage: RecordingStorage,
    /// Status older than this means the worker is probably gone
    pub stale_after: Duration,
    /// Bound on publishing a command from a request handler
    pub publish_timeout: Duration,
}
