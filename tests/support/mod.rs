#![allow(dead_code)]

use anyhow::{bail, Result};
use async_trait::async_trait;
use pi_recorder::audio::TapStream;
use pi_recorder::command::CommandStream;
use pi_recorder::status::ChangeStream;
use pi_recorder::{
    AudioTap, CapturePipeline, CaptureProcess, Command, CommandChannel, DeviceRef, LevelBus, LifecycleState,
    MemoryCommandChannel, MemoryLevelBus, MemoryStatusStore, PipelineExit, RecordingStorage, SessionBackends,
    SessionConfig, SessionStatus, SourceResolver, StatusStore, StatusUpdate, WorkerConfig,
};
use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::Instant;

pub const HEADSET_MAC: &str = "AA:BB:CC:DD:EE:FF";
pub const UNKNOWN_MAC: &str = "00:00:00:00:00:00";

pub fn headset() -> DeviceRef {
    DeviceRef::new(HEADSET_MAC, "Headset", "hci0")
}

/// Resolves every device except [`UNKNOWN_MAC`]
pub struct FakeResolver;

#[async_trait]
impl SourceResolver for FakeResolver {
    async fn resolve(&self, device: &DeviceRef) -> Result<String> {
        if device.mac == UNKNOWN_MAC {
            bail!("audio source for {} not found", device.mac);
        }
        Ok(format!("bluez_source.{}.a2dp_source", device.mac.replace(':', "_")))
    }
}

/// Capture pipeline that writes a fixed payload and then waits to be stopped
#[derive(Clone, Default)]
pub struct FakePipeline {
    /// Bytes written to the output when the process starts
    pub bytes: usize,
    /// Exit with code 1 on its own after this long
    pub exit_after: Option<Duration>,
    /// Only a kill ends the process
    pub ignore_stop: bool,
    pub spawned: Arc<AtomicUsize>,
}

impl FakePipeline {
    pub fn writing(bytes: usize) -> Self {
        Self {
            bytes,
            ..Self::default()
        }
    }

    pub fn spawn_count(&self) -> usize {
        self.spawned.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CapturePipeline for FakePipeline {
    async fn spawn(&self, _source: &str, output: &Path) -> Result<Box<dyn CaptureProcess>> {
        self.spawned.fetch_add(1, Ordering::SeqCst);
        tokio::fs::write(output, vec![0x4f; self.bytes]).await?;

        Ok(Box::new(FakeProcess {
            exit_at: self.exit_after.map(|after| Instant::now() + after),
            ignore_stop: self.ignore_stop,
            stopped: false,
            killed: false,
        }))
    }
}

struct FakeProcess {
    exit_at: Option<Instant>,
    ignore_stop: bool,
    stopped: bool,
    killed: bool,
}

#[async_trait]
impl CaptureProcess for FakeProcess {
    fn id(&self) -> Option<u32> {
        Some(4242)
    }

    async fn wait(&mut self) -> Result<PipelineExit> {
        if self.killed {
            return Ok(PipelineExit { code: None });
        }
        if self.stopped && !self.ignore_stop {
            return Ok(PipelineExit { code: Some(0) });
        }
        match self.exit_at {
            Some(at) => {
                tokio::time::sleep_until(at).await;
                Ok(PipelineExit { code: Some(1) })
            }
            None => futures::future::pending().await,
        }
    }

    async fn request_stop(&mut self) -> Result<()> {
        self.stopped = true;
        Ok(())
    }

    async fn kill(&mut self) -> Result<()> {
        self.killed = true;
        Ok(())
    }
}

/// Tap that plays back a constant-amplitude block stream and then ends
pub struct FakeTap {
    pub amplitude: i16,
    pub samples: usize,
}

impl Default for FakeTap {
    fn default() -> Self {
        Self {
            amplitude: 16384,
            samples: 2048 * 4,
        }
    }
}

#[async_trait]
impl AudioTap for FakeTap {
    async fn open(&self, _source: &str) -> Result<TapStream> {
        let pcm: Vec<u8> = std::iter::repeat(self.amplitude)
            .take(self.samples)
            .flat_map(|s| s.to_le_bytes())
            .collect();
        Ok(Box::new(Cursor::new(pcm)))
    }
}

pub fn backends(pipeline: FakePipeline) -> (SessionBackends, Arc<MemoryLevelBus>) {
    let levels = Arc::new(MemoryLevelBus::new());
    let backends = SessionBackends {
        resolver: Arc::new(FakeResolver),
        pipeline: Arc::new(pipeline),
        tap: Arc::new(FakeTap::default()),
        levels: levels.clone() as Arc<dyn LevelBus>,
    };
    (backends, levels)
}

/// Scratch and durable directories inside one temp dir
pub fn storage(dir: &TempDir) -> RecordingStorage {
    RecordingStorage::new(dir.path().join("scratch"), dir.path().join("recordings"), "ogg")
}

pub fn session_config() -> SessionConfig {
    SessionConfig {
        tick: Duration::from_millis(50),
        grace_period: Duration::from_millis(200),
        monitor_join_timeout: Duration::from_millis(200),
        ..SessionConfig::default()
    }
}

pub fn worker_config() -> WorkerConfig {
    WorkerConfig {
        tick: Duration::from_millis(50),
        poll_timeout: Duration::from_millis(50),
        stop_timeout: Duration::from_secs(3),
        shutdown_timeout: Duration::from_secs(3),
        retry_delay: Duration::from_millis(50),
    }
}

/// Poll the store until `check` holds or `limit` passes
pub async fn wait_for_status<F>(store: &dyn StatusStore, limit: Duration, check: F) -> Result<SessionStatus>
where
    F: Fn(&SessionStatus) -> bool,
{
    let deadline = Instant::now() + limit;
    loop {
        let status = store.read().await?;
        if check(&status) {
            return Ok(status);
        }
        if Instant::now() >= deadline {
            bail!("status condition not met within {:?}; last status: {:?}", limit, status);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Names of the files in `dir`, sorted
pub fn files_in(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect(),
        Err(_) => Vec::new(),
    };
    names.sort();
    names
}

/// Status store that remembers the lifecycle state after every write
#[derive(Default)]
pub struct HistoryStore {
    inner: MemoryStatusStore,
    history: Mutex<Vec<LifecycleState>>,
}

impl HistoryStore {
    pub fn states(&self) -> Vec<LifecycleState> {
        self.history.lock().unwrap().clone()
    }
}

#[async_trait]
impl StatusStore for HistoryStore {
    async fn write(&self, update: StatusUpdate) -> Result<SessionStatus> {
        let status = self.inner.write(update).await?;
        let mut history = self.history.lock().unwrap();
        if history.last() != Some(&status.lifecycle_state) {
            history.push(status.lifecycle_state);
        }
        Ok(status)
    }

    async fn read(&self) -> Result<SessionStatus> {
        self.inner.read().await
    }

    async fn subscribe_changes(&self) -> Result<ChangeStream> {
        self.inner.subscribe_changes().await
    }
}

/// Status store whose first `failures` writes error out
pub struct FlakyStore {
    inner: MemoryStatusStore,
    failures: AtomicUsize,
}

impl FlakyStore {
    pub fn failing(failures: usize) -> Self {
        Self {
            inner: MemoryStatusStore::new(),
            failures: AtomicUsize::new(failures),
        }
    }

    pub fn failures_left(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }
}

/// Take one failure off `counter`, true if there was one left
fn consume_failure(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl StatusStore for FlakyStore {
    async fn write(&self, update: StatusUpdate) -> Result<SessionStatus> {
        if consume_failure(&self.failures) {
            bail!("status store unreachable");
        }
        self.inner.write(update).await
    }

    async fn read(&self) -> Result<SessionStatus> {
        self.inner.read().await
    }

    async fn subscribe_changes(&self) -> Result<ChangeStream> {
        self.inner.subscribe_changes().await
    }
}

/// Command channel whose first subscribes and queue polls error out
pub struct FlakyChannel {
    pub inner: MemoryCommandChannel,
    subscribe_failures: AtomicUsize,
    pop_failures: AtomicUsize,
    pub subscribe_attempts: AtomicUsize,
}

impl FlakyChannel {
    pub fn failing(subscribe_failures: usize, pop_failures: usize) -> Self {
        Self {
            inner: MemoryCommandChannel::new(),
            subscribe_failures: AtomicUsize::new(subscribe_failures),
            pop_failures: AtomicUsize::new(pop_failures),
            subscribe_attempts: AtomicUsize::new(0),
        }
    }

    pub fn pop_failures_left(&self) -> usize {
        self.pop_failures.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CommandChannel for FlakyChannel {
    async fn publish(&self, command: &Command) -> Result<()> {
        self.inner.publish(command).await
    }

    async fn enqueue(&self, command: &Command) -> Result<()> {
        self.inner.enqueue(command).await
    }

    async fn subscribe(&self) -> Result<CommandStream> {
        self.subscribe_attempts.fetch_add(1, Ordering::SeqCst);
        if consume_failure(&self.subscribe_failures) {
            bail!("command subject unreachable");
        }
        self.inner.subscribe().await
    }

    async fn pop_queued(&self, timeout: Duration) -> Result<Option<Command>> {
        if consume_failure(&self.pop_failures) {
            bail!("command queue unreachable");
        }
        self.inner.pop_queued(timeout).await
    }
}
