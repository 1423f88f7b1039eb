pub mod audio;
pub mod command;
pub mod config;
pub mod http;
pub mod nats;
pub mod session;
pub mod status;
pub mod storage;
pub mod worker;

pub use audio::{
    AudioLevelSample, AudioTap, CapturePipeline, CaptureProcess, ExternalPipeline, LevelBus,
    LevelMonitor, MemoryLevelBus, MonitorConfig, PactlResolver, ParecTap, PipelineExit,
    SourceResolver,
};
pub use command::{Action, Command, CommandChannel, DeviceRef, MemoryCommandChannel};
pub use config::Config;
pub use http::{create_router, AppState};
pub use nats::{NatsClient, NatsSubjects};
pub use session::{
    RecordingSession, SessionBackends, SessionConfig, SessionError, SessionOutcome, StartRequest,
};
pub use status::{LifecycleState, MemoryStatusStore, Progress, SessionStatus, StatusStore, StatusUpdate};
pub use storage::RecordingStorage;
pub use worker::{CommandOutcome, Supervisor, WorkerConfig};
