use super::intake::{live_intake, queue_intake};
use crate::command::{Action, Command, CommandChannel};
use crate::session::{
    RecordingSession, SessionBackends, SessionConfig, SessionError, SessionOutcome, StartRequest,
};
use crate::status::{StatusStore, StatusUpdate};
use crate::storage::RecordingStorage;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Timing knobs for the supervisor loop
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Heartbeat and reaping cadence
    pub tick: Duration,
    /// Blocking wait on the legacy queue per poll
    pub poll_timeout: Duration,
    /// How long a `stop` waits for the session to settle
    pub stop_timeout: Duration,
    /// How long shutdown waits before abandoning the session
    pub shutdown_timeout: Duration,
    /// Back-off after a transport failure
    pub retry_delay: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
            poll_timeout: Duration::from_secs(1),
            stop_timeout: Duration::from_secs(8),
            shutdown_timeout: Duration::from_secs(8),
            retry_delay: Duration::from_secs(2),
        }
    }
}

/// Result of processing one command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    Started,
    /// `finished` is false when the session had not settled within the stop timeout
    Stopped { finished: bool },
    Rejected(String),
    ShuttingDown,
}

struct ActiveSession {
    cancel: CancellationToken,
    handle: JoinHandle<SessionOutcome>,
}

/// Owns the command intake and enforces a single active session
pub struct Supervisor {
    config: WorkerConfig,
    session_config: SessionConfig,
    status: Arc<dyn StatusStore>,
    commands: Arc<dyn CommandChannel>,
    backends: SessionBackends,
    storage: RecordingStorage,
    active: Option<ActiveSession>,
}

impl Supervisor {
    pub fn new(
        config: WorkerConfig,
        session_config: SessionConfig,
        status: Arc<dyn StatusStore>,
        commands: Arc<dyn CommandChannel>,
        backends: SessionBackends,
        storage: RecordingStorage,
    ) -> Self {
        Self {
            config,
            session_config,
            status,
            commands,
            backends,
            storage,
            active: None,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.active.is_some()
    }

    /// Reset the status to idle and deal with leftovers from a crashed run
    pub async fn startup(&mut self) -> Result<()> {
        if let Err(e) = self.storage.prepare().await {
            self.write(StatusUpdate::offline()).await;
            return Err(e);
        }
        self.write(StatusUpdate::reset(std::process::id())).await;

        match self.storage.recover_orphans().await {
            Ok(report) => {
                if !report.recovered.is_empty() || !report.discarded.is_empty() {
                    info!(
                        "Scratch recovery: {} recovered, {} discarded, {} failed",
                        report.recovered.len(),
                        report.discarded.len(),
                        report.failed.len()
                    );
                }
            }
            Err(e) => warn!("Scratch recovery failed: {:#}", e),
        }
        Ok(())
    }

    /// Run until a `shutdown` command arrives or `shutdown` is cancelled
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<()> {
        self.startup().await?;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let intake_cancel = shutdown.child_token();
        let live = tokio::spawn(live_intake(
            Arc::clone(&self.commands),
            tx.clone(),
            self.config.retry_delay,
            intake_cancel.clone(),
        ));
        let queue = tokio::spawn(queue_intake(
            Arc::clone(&self.commands),
            tx,
            self.config.poll_timeout,
            self.config.retry_delay,
            intake_cancel.clone(),
        ));

        let mut heartbeat = tokio::time::interval(self.config.tick);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Recorder worker ready (pid {})", std::process::id());

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested");
                    break;
                }
                received = rx.recv() => {
                    let Some((origin, command)) = received else {
                        warn!("Command intake closed");
                        break;
                    };
                    debug!("Command {:?} via {:?}", command.action, origin);
                    if self.handle_command(command).await == CommandOutcome::ShuttingDown {
                        break;
                    }
                }
                _ = heartbeat.tick() => self.on_tick().await,
            }
        }

        intake_cancel.cancel();
        self.shutdown_active().await;
        self.write(StatusUpdate::offline()).await;

        for intake in [live, queue] {
            if let Err(e) = intake.await {
                warn!("Command intake task failed: {}", e);
            }
        }

        info!("Recorder worker stopped");
        Ok(())
    }

    /// Process one command. Commands are handled strictly one at a time.
    pub async fn handle_command(&mut self, command: Command) -> CommandOutcome {
        self.reap().await;

        match command.action {
            Action::Start => self.start(command).await,
            Action::Stop => self.stop().await,
            Action::Shutdown => {
                info!("Shutdown command received");
                self.shutdown_active().await;
                CommandOutcome::ShuttingDown
            }
        }
    }

    /// Heartbeat while idle, and collect sessions that ended on their own
    pub async fn on_tick(&mut self) {
        self.reap().await;
        if self.active.is_none() {
            self.write(StatusUpdate::heartbeat()).await;
        }
    }

    async fn start(&mut self, command: Command) -> CommandOutcome {
        if self.active.is_some() {
            info!("Rejected start: already recording");
            return CommandOutcome::Rejected("already recording".to_string());
        }

        let Some(device) = command.device else {
            let reason = "no device specified";
            warn!("Rejected start: {}", reason);
            self.write(StatusUpdate::failed(reason)).await;
            return CommandOutcome::Rejected(reason.to_string());
        };

        let duration = command
            .duration
            .filter(|minutes| *minutes > 0)
            .map(|minutes| Duration::from_secs(minutes.saturating_mul(60)));

        info!("Starting recording from {} ({})", device.mac, device.name);

        let cancel = CancellationToken::new();
        let session = RecordingSession::new(
            self.session_config.clone(),
            Arc::clone(&self.status),
            self.backends.clone(),
            self.storage.clone(),
        );
        let handle = tokio::spawn(session.run(StartRequest { device, duration }, cancel.clone()));

        self.active = Some(ActiveSession { cancel, handle });
        CommandOutcome::Started
    }

    async fn stop(&mut self) -> CommandOutcome {
        let Some(active) = self.active.as_ref() else {
            info!("Rejected stop: not recording");
            return CommandOutcome::Rejected("not recording".to_string());
        };

        info!("Stopping active recording");
        active.cancel.cancel();
        let finished = self.wait_active(self.config.stop_timeout).await;
        CommandOutcome::Stopped { finished }
    }

    async fn shutdown_active(&mut self) {
        let Some(active) = self.active.as_ref() else {
            return;
        };
        active.cancel.cancel();

        if !self.wait_active(self.config.shutdown_timeout).await {
            if let Some(active) = self.active.take() {
                warn!("Abandoning recording session that did not stop in time");
                active.handle.abort();
            }
        }
    }

    async fn reap(&mut self) {
        let finished = self
            .active
            .as_ref()
            .map_or(false, |active| active.handle.is_finished());
        if finished {
            self.wait_active(self.config.tick).await;
        }
    }

    /// Wait up to `limit` for the active session; true once it has been collected
    async fn wait_active(&mut self, limit: Duration) -> bool {
        let Some(active) = self.active.as_mut() else {
            return true;
        };

        let joined = tokio::time::timeout(limit, &mut active.handle).await;
        match joined {
            Ok(result) => {
                self.active = None;
                self.collect(result).await;
                true
            }
            Err(_) => {
                warn!("Recording session still finalizing after {:?}", limit);
                false
            }
        }
    }

    async fn collect(&self, result: Result<SessionOutcome, JoinError>) {
        match result {
            Ok(SessionOutcome::Completed { filename, .. }) => {
                info!("Session finished: {}", filename);
            }
            Ok(SessionOutcome::Failed(e)) => {
                info!("Session finished with error: {}", e);
            }
            Err(e) => {
                let failure = SessionError::Crashed(e.to_string());
                error!("{}", failure);
                self.write(StatusUpdate::failed(failure.to_string())).await;
            }
        }
    }

    /// The store may be unreachable; log and carry on
    async fn write(&self, update: StatusUpdate) {
        if let Err(e) = self.status.write(update).await {
            warn!("Status write failed: {:#}", e);
        }
    }
}
