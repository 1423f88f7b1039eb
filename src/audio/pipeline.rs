//! External capture+encode process supervised by the recording session
//!
//! The session never encodes audio itself. It starts an encoder process
//! (ffmpeg by default) that writes compressed output straight to scratch
//! storage, asks it to stop with a signal, and kills it if it lingers.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// How the capture process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineExit {
    /// Exit code, `None` when terminated by a signal
    pub code: Option<i32>,
}

impl PipelineExit {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// A running capture process
#[async_trait]
pub trait CaptureProcess: Send {
    fn id(&self) -> Option<u32>;

    /// Wait for exit. Cancel-safe, so it can sit in a `select!`.
    async fn wait(&mut self) -> Result<PipelineExit>;

    /// Deliver the graceful-stop signal
    async fn request_stop(&mut self) -> Result<()>;

    /// Forced termination
    async fn kill(&mut self) -> Result<()>;
}

/// Starts capture processes
#[async_trait]
pub trait CapturePipeline: Send + Sync {
    async fn spawn(&self, source: &str, output: &Path) -> Result<Box<dyn CaptureProcess>>;
}

/// Ask the process to stop, escalating to a kill after `grace`
pub async fn shutdown_process(
    process: &mut dyn CaptureProcess,
    grace: Duration,
) -> Result<PipelineExit> {
    if let Err(e) = process.request_stop().await {
        warn!("Graceful stop signal failed: {:#}", e);
    }

    let waited = tokio::time::timeout(grace, process.wait()).await;
    match waited {
        Ok(exit) => exit,
        Err(_) => {
            warn!(
                "Capture process {:?} still running after {:?}, killing it",
                process.id(),
                grace
            );
            process.kill().await?;
            process.wait().await
        }
    }
}

/// Capture pipeline that runs a configurable external program
///
/// `{source}` and `{output}` in the argument list are replaced with the
/// resolved source name and the scratch output path.
#[derive(Debug, Clone)]
pub struct ExternalPipeline {
    program: String,
    args: Vec<String>,
    stop_signal: String,
}

impl ExternalPipeline {
    pub fn new(program: impl Into<String>, args: Vec<String>, stop_signal: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args,
            stop_signal: stop_signal.into(),
        }
    }

    fn render_args(&self, source: &str, output: &Path) -> Vec<String> {
        let output = output.display().to_string();
        self.args
            .iter()
            .map(|arg| arg.replace("{source}", source).replace("{output}", &output))
            .collect()
    }
}

#[async_trait]
impl CapturePipeline for ExternalPipeline {
    async fn spawn(&self, source: &str, output: &Path) -> Result<Box<dyn CaptureProcess>> {
        let args = self.render_args(source, output);
        info!("Starting capture: {} {}", self.program, args.join(" "));

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to start {}", self.program))?;

        if let Some(stderr) = child.stderr.take() {
            let program = self.program.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!("{}: {}", program, line);
                }
            });
        }

        Ok(Box::new(ExternalProcess {
            child,
            stop_signal: self.stop_signal.clone(),
        }))
    }
}

struct ExternalProcess {
    child: Child,
    stop_signal: String,
}

#[async_trait]
impl CaptureProcess for ExternalProcess {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    async fn wait(&mut self) -> Result<PipelineExit> {
        let status = self
            .child
            .wait()
            .await
            .context("Failed to wait for capture process")?;
        Ok(PipelineExit {
            code: status.code(),
        })
    }

    async fn request_stop(&mut self) -> Result<()> {
        match self.child.id() {
            Some(pid) => send_signal(pid, &self.stop_signal).await,
            // Already reaped
            None => Ok(()),
        }
    }

    async fn kill(&mut self) -> Result<()> {
        self.child
            .kill()
            .await
            .context("Failed to kill capture process")
    }
}

/// Deliver `signal` (e.g. "INT", "TERM") to `pid`
pub async fn send_signal(pid: u32, signal: &str) -> Result<()> {
    let status = Command::new("kill")
        .arg(format!("-{}", signal))
        .arg(pid.to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .context("Failed to run kill")?;

    if !status.success() {
        anyhow::bail!("kill -{} {} exited with {}", signal, pid, status);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn placeholders_are_substituted() {
        let pipeline = ExternalPipeline::new(
            "ffmpeg",
            vec!["-i".into(), "{source}".into(), "{output}".into(), "-y".into()],
            "INT",
        );
        let args = pipeline.render_args("bluez_source.X", &PathBuf::from("/dev/shm/r.ogg"));
        assert_eq!(args, vec!["-i", "bluez_source.X", "/dev/shm/r.ogg", "-y"]);
    }
}
