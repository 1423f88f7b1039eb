pub mod bus;
pub mod level;
pub mod monitor;
pub mod pipeline;
pub mod resolver;
pub mod tap;

pub use bus::{LevelBus, MemoryLevelBus};
pub use level::{AudioLevelSample, LevelMeter};
pub use monitor::{LevelMonitor, MonitorConfig};
pub use pipeline::{shutdown_process, CapturePipeline, CaptureProcess, ExternalPipeline, PipelineExit};
pub use resolver::{PactlResolver, SourceResolver};
pub use tap::{AudioTap, ParecTap, TapStream};
