use super::config::SessionConfig;
use super::error::{SessionError, SessionOutcome};
use crate::audio::{
    shutdown_process, AudioTap, CapturePipeline, LevelBus, LevelMonitor, PipelineExit,
    SourceResolver,
};
use crate::command::DeviceRef;
use crate::status::{Progress, StatusStore, StatusUpdate};
use crate::storage::RecordingStorage;
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What to record
#[derive(Debug, Clone)]
pub struct StartRequest {
    pub device: DeviceRef,
    /// Stop on our own after this long; `None` uses the configured default
    pub duration: Option<Duration>,
}

/// External collaborators a session drives
#[derive(Clone)]
pub struct SessionBackends {
    pub resolver: Arc<dyn SourceResolver>,
    pub pipeline: Arc<dyn CapturePipeline>,
    pub tap: Arc<dyn AudioTap>,
    pub levels: Arc<dyn LevelBus>,
}

/// Why the recording phase ended
#[derive(Debug)]
enum EndReason {
    StopRequested,
    DurationElapsed,
    PipelineExited(PipelineExit),
    WaitFailed(String),
}

/// One capture-convert-finalize attempt
///
/// While it runs, the session is the only writer of the status store. Every
/// path out of [`RecordingSession::run`] leaves `recording=false`.
pub struct RecordingSession {
    config: SessionConfig,
    status: Arc<dyn StatusStore>,
    backends: SessionBackends,
    storage: RecordingStorage,
}

impl RecordingSession {
    pub fn new(
        config: SessionConfig,
        status: Arc<dyn StatusStore>,
        backends: SessionBackends,
        storage: RecordingStorage,
    ) -> Self {
        Self {
            config,
            status,
            backends,
            storage,
        }
    }

    /// Record until `cancel` fires, the duration elapses or the pipeline dies
    pub async fn run(self, request: StartRequest, cancel: CancellationToken) -> SessionOutcome {
        let outcome = match self.record(&request, &cancel).await {
            Ok(outcome) => outcome,
            Err(e) => SessionOutcome::Failed(e),
        };
        self.settle(&outcome).await;
        outcome
    }

    async fn record(
        &self,
        request: &StartRequest,
        cancel: &CancellationToken,
    ) -> Result<SessionOutcome, SessionError> {
        let device = &request.device;
        info!("Resolving audio source for {} ({})", device.mac, device.name);

        let source = self
            .backends
            .resolver
            .resolve(device)
            .await
            .map_err(|e| SessionError::Resolution(format!("{:#}", e)))?;

        let filename = self.storage.new_filename();
        let scratch = self.storage.scratch_path(&filename);

        let mut process = self
            .backends
            .pipeline
            .spawn(&source, &scratch)
            .await
            .map_err(|e| SessionError::Spawn(format!("{:#}", e)))?;

        let started = Instant::now();
        self.publish(StatusUpdate::recording(filename.clone(), device.clone(), Utc::now()))
            .await;
        info!("Recording {} from {}", filename, source);

        let monitor_cancel = cancel.child_token();
        let monitor = LevelMonitor::new(
            Arc::clone(&self.backends.tap),
            Arc::clone(&self.backends.levels),
            self.config.monitor.clone(),
        );
        let monitor_handle = tokio::spawn(monitor.run(source.clone(), monitor_cancel.clone()));

        let limit = request.duration.unwrap_or(self.config.default_duration);
        let deadline = tokio::time::sleep(limit);
        tokio::pin!(deadline);

        let mut ticker = tokio::time::interval(self.config.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        let reason = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break EndReason::StopRequested,
                exit = process.wait() => {
                    break match exit {
                        Ok(exit) => EndReason::PipelineExited(exit),
                        Err(e) => EndReason::WaitFailed(format!("{:#}", e)),
                    };
                }
                _ = &mut deadline => break EndReason::DurationElapsed,
                _ = ticker.tick() => {
                    let progress = self.progress(&filename, started).await;
                    self.publish(StatusUpdate::progress(progress)).await;
                }
            }
        };

        info!("Recording {} ended: {:?}", filename, reason);
        monitor_cancel.cancel();
        self.publish(StatusUpdate::converting()).await;

        let unexpected_exit = match reason {
            EndReason::PipelineExited(exit) => Some(exit),
            EndReason::StopRequested | EndReason::DurationElapsed => None,
            EndReason::WaitFailed(e) => {
                warn!("Lost track of capture process: {}", e);
                None
            }
        };

        let duration_seconds = started.elapsed().as_secs();
        let finalized = self
            .with_heartbeat(async {
                if unexpected_exit.is_none() {
                    match shutdown_process(process.as_mut(), self.config.grace_period).await {
                        Ok(exit) if exit.success() => debug!("Capture process exited cleanly"),
                        Ok(exit) => info!("Capture process exited with {:?}", exit.code),
                        Err(e) => warn!("Capture process shutdown failed: {:#}", e),
                    }
                }
                drop(process);

                self.join_monitor(monitor_handle).await;
                self.storage.finalize(&filename).await
            })
            .await;
        let path = finalized?;

        if let Some(exit) = unexpected_exit {
            warn!(
                "Capture pipeline died with {:?}; partial recording kept at {}",
                exit.code,
                path.display()
            );
            return Err(SessionError::PipelineExited {
                code: exit.code,
                saved: Some(path),
            });
        }

        let bytes = tokio::fs::metadata(&path)
            .await
            .map(|meta| meta.len())
            .unwrap_or(0);

        Ok(SessionOutcome::Completed {
            filename,
            path,
            bytes,
            duration_seconds,
        })
    }

    /// Publish the terminal status for `outcome`
    async fn settle(&self, outcome: &SessionOutcome) {
        match outcome {
            SessionOutcome::Completed {
                filename,
                bytes,
                duration_seconds,
                ..
            } => {
                info!(
                    "Recording {} completed ({}s, {} bytes)",
                    filename, duration_seconds, bytes
                );
                self.publish(StatusUpdate::completed(Some(Progress {
                    duration_seconds: *duration_seconds,
                    byte_size: *bytes,
                    format: self.storage.extension().to_string(),
                })))
                .await;
                self.publish(StatusUpdate::idle()).await;
            }
            SessionOutcome::Failed(e) => {
                error!("Recording session failed: {}", e);
                self.publish(StatusUpdate::failed(e.to_string())).await;
            }
        }
    }

    async fn progress(&self, filename: &str, started: Instant) -> Progress {
        Progress {
            duration_seconds: started.elapsed().as_secs(),
            byte_size: self.storage.scratch_size(filename).await,
            format: self.storage.extension().to_string(),
        }
    }

    /// Drive `work` while keeping `updated_at` moving on the session tick
    async fn with_heartbeat<F: Future>(&self, work: F) -> F::Output {
        tokio::pin!(work);

        let mut ticker = tokio::time::interval(self.config.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;
                output = &mut work => return output,
                _ = ticker.tick() => self.publish(StatusUpdate::heartbeat()).await,
            }
        }
    }

    async fn join_monitor(&self, mut handle: JoinHandle<()>) {
        let joined = tokio::time::timeout(self.config.monitor_join_timeout, &mut handle).await;
        if joined.is_err() {
            debug!("Level monitor did not stop in time, aborting it");
            handle.abort();
        }
    }

    /// Status writes never fail the session; the next tick retries implicitly
    async fn publish(&self, update: StatusUpdate) {
        if let Err(e) = self.status.write(update).await {
            warn!("Status write failed: {:#}", e);
        }
    }
}
