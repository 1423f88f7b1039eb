use crate::status::{LifecycleState, SessionStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Subjects and JetStream names used by the recorder
#[derive(Debug, Clone)]
pub struct NatsSubjects {
    /// Live command subject (core NATS)
    pub commands: String,
    /// Legacy command queue: JetStream work-queue stream name
    pub queue_stream: String,
    /// Subject bound to the queue stream
    pub queue_subject: String,
    /// Durable pull consumer draining the queue
    pub queue_consumer: String,
    /// KV bucket holding the status record
    pub status_bucket: String,
    pub status_key: String,
    /// Change notifications fired after every status write
    pub status_notify: String,
    /// Audio level samples
    pub levels: String,
}

impl Default for NatsSubjects {
    fn default() -> Self {
        Self {
            commands: "recorder.commands".to_string(),
            queue_stream: "RECORDER_QUEUE".to_string(),
            queue_subject: "recorder.queue.commands".to_string(),
            queue_consumer: "recorder-worker".to_string(),
            status_bucket: "recorder".to_string(),
            status_key: "status".to_string(),
            status_notify: "recorder.status_update".to_string(),
            levels: "recorder.audio_level".to_string(),
        }
    }
}

/// Body of a status change notification
///
/// Carries just enough for cheap filtering; subscribers read the KV record
/// for the full status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusNotice {
    pub lifecycle_state: LifecycleState,
    pub recording: bool,
    pub updated_at: DateTime<Utc>,
}

impl From<&SessionStatus> for StatusNotice {
    fn from(status: &SessionStatus) -> Self {
        Self {
            lifecycle_state: status.lifecycle_state,
            recording: status.recording,
            updated_at: status.updated_at,
        }
    }
}
