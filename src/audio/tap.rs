use anyhow::{Context, Result};
use async_trait::async_trait;
use std::io;
use std::pin::Pin;
use std::process::Stdio;
use std::task::{Context as TaskContext, Poll};
use tokio::io::{AsyncRead, ReadBuf};
use tokio::process::{Child, ChildStdout, Command};
use tracing::info;

/// Raw little-endian 16-bit mono PCM
pub type TapStream = Box<dyn AsyncRead + Send + Unpin>;

/// Opens a second, read-only capture of a source for level metering
#[async_trait]
pub trait AudioTap: Send + Sync {
    async fn open(&self, source: &str) -> Result<TapStream>;
}

/// Tap backed by `parec --raw`
///
/// Runs alongside the encoder as its own PulseAudio stream, so a stalled
/// reader never backs up the recording.
pub struct ParecTap {
    program: String,
    args: Vec<String>,
    sample_rate: u32,
}

impl ParecTap {
    pub fn new(program: impl Into<String>, args: Vec<String>, sample_rate: u32) -> Self {
        Self {
            program: program.into(),
            args,
            sample_rate,
        }
    }
}

#[async_trait]
impl AudioTap for ParecTap {
    async fn open(&self, source: &str) -> Result<TapStream> {
        let rate = self.sample_rate.to_string();
        let args: Vec<String> = self
            .args
            .iter()
            .map(|arg| arg.replace("{source}", source).replace("{rate}", &rate))
            .collect();

        info!("Opening level tap: {} {}", self.program, args.join(" "));

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to start {}", self.program))?;

        let stdout = child
            .stdout
            .take()
            .context("Level tap has no stdout")?;

        Ok(Box::new(ChildReader {
            _child: Box::new(child),
            stdout,
        }))
    }
}

/// Keeps the tap process alive for as long as its output is read
struct ChildReader {
    _child: Box<Child>,
    stdout: ChildStdout,
}

impl AsyncRead for ChildReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stdout).poll_read(cx, buf)
    }
}
