use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pi_recorder::{
    create_router, AppState, Command, CommandChannel, Config, DeviceRef, ExternalPipeline,
    LevelBus, MemoryCommandChannel, MemoryLevelBus, MemoryStatusStore, NatsClient, PactlResolver,
    ParecTap, SessionBackends, StatusStore, Supervisor,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pi-recorder", version, about = "Bluetooth audio recorder for the Raspberry Pi")]
struct Cli {
    /// Config file (extension optional)
    #[arg(short, long, default_value = "config/recorder")]
    config: String,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Run the recording worker
    Worker,
    /// Run the HTTP controller
    Controller,
    /// Run controller and worker in one process without NATS
    Standalone,
    /// Send a single command to the worker
    Send {
        #[command(subcommand)]
        action: SendAction,

        /// Use the legacy queue instead of the live subject
        #[arg(long, global = true)]
        queue: bool,
    },
}

#[derive(Subcommand)]
enum SendAction {
    Start {
        #[arg(long)]
        mac: String,
        #[arg(long, default_value = "")]
        name: String,
        #[arg(long, default_value = "hci0")]
        adapter: String,
        /// Minutes
        #[arg(long)]
        duration: Option<u64>,
    },
    Stop,
    Shutdown,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let cfg = Config::load(&cli.config)?;

    info!("{} v{}", cfg.service.name, env!("CARGO_PKG_VERSION"));

    match cli.mode {
        Mode::Worker => run_worker(&cfg).await,
        Mode::Controller => run_controller(&cfg).await,
        Mode::Standalone => run_standalone(&cfg).await,
        Mode::Send { action, queue } => send_command(&cfg, action, queue).await,
    }
}

fn system_backends(cfg: &Config, levels: Arc<dyn LevelBus>) -> SessionBackends {
    SessionBackends {
        resolver: Arc::new(PactlResolver::new(cfg.capture.resolver_program.clone())),
        pipeline: Arc::new(ExternalPipeline::new(
            cfg.capture.program.clone(),
            cfg.capture.args.clone(),
            cfg.capture.stop_signal.clone(),
        )),
        tap: Arc::new(ParecTap::new(
            cfg.monitor.program.clone(),
            cfg.monitor.args.clone(),
            cfg.monitor.sample_rate,
        )),
        levels,
    }
}

async fn run_worker(cfg: &Config) -> Result<()> {
    let nats = Arc::new(NatsClient::connect(&cfg.nats.url, cfg.subjects()).await?);
    let shutdown = shutdown_on_signal();

    let supervisor = Supervisor::new(
        cfg.worker(),
        cfg.session(),
        nats.clone(),
        nats.clone(),
        system_backends(cfg, nats.clone()),
        cfg.storage(),
    );
    supervisor.run(shutdown).await
}

async fn run_controller(cfg: &Config) -> Result<()> {
    let nats = Arc::new(NatsClient::connect(&cfg.nats.url, cfg.subjects()).await?);
    let state = AppState {
        commands: nats.clone(),
        status: nats.clone(),
        levels: nats.clone(),
        storage: cfg.storage(),
        stale_after: cfg.stale_after(),
        publish_timeout: cfg.publish_timeout(),
    };
    serve(cfg, state, shutdown_on_signal()).await
}

async fn run_standalone(cfg: &Config) -> Result<()> {
    let commands: Arc<dyn CommandChannel> = Arc::new(MemoryCommandChannel::new());
    let status: Arc<dyn StatusStore> = Arc::new(MemoryStatusStore::new());
    let levels: Arc<dyn LevelBus> = Arc::new(MemoryLevelBus::new());
    let shutdown = shutdown_on_signal();

    let supervisor = Supervisor::new(
        cfg.worker(),
        cfg.session(),
        status.clone(),
        commands.clone(),
        system_backends(cfg, levels.clone()),
        cfg.storage(),
    );
    let worker = tokio::spawn(supervisor.run(shutdown.clone()));

    let state = AppState {
        commands,
        status,
        levels,
        storage: cfg.storage(),
        stale_after: cfg.stale_after(),
        publish_timeout: cfg.publish_timeout(),
    };
    let served = serve(cfg, state, shutdown.clone()).await;
    shutdown.cancel();

    worker.await.context("Worker task panicked")??;
    served
}

async fn serve(cfg: &Config, state: AppState, shutdown: CancellationToken) -> Result<()> {
    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("HTTP server listening on {}", addr);

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("HTTP server failed")
}

async fn send_command(cfg: &Config, action: SendAction, queue: bool) -> Result<()> {
    let command = match action {
        SendAction::Start {
            mac,
            name,
            adapter,
            duration,
        } => Command::start(DeviceRef::new(mac, name, adapter), duration),
        SendAction::Stop => Command::stop(),
        SendAction::Shutdown => Command::shutdown(),
    };

    let nats = NatsClient::connect(&cfg.nats.url, cfg.subjects()).await?;
    if queue {
        nats.enqueue(&command).await?;
    } else {
        nats.publish(&command).await?;
    }

    info!("Sent {:?}", command.action);
    Ok(())
}

/// Token cancelled on ctrl-c or SIGTERM
fn shutdown_on_signal() -> CancellationToken {
    let token = CancellationToken::new();
    let cancel = token.clone();

    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Signal received, shutting down");
        cancel.cancel();
    });

    token
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            warn!("SIGTERM handler unavailable: {}", e);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
