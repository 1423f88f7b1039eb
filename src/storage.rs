//! Scratch and durable storage for recordings
//!
//! Active recordings are written to a scratch directory on tmpfs so the SD
//! card does not take continuous writes. Finished files are moved to the
//! durable recordings directory in one step.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::{info, warn};

const FILENAME_PREFIX: &str = "recording_";

/// Why a scratch file could not be finalized
#[derive(Debug, Error)]
pub enum FinalizeError {
    #[error("no data captured (scratch file {0} missing)")]
    Missing(PathBuf),

    #[error("no data captured")]
    Empty(PathBuf),

    #[error("failed to move {from} to {to}: {source}")]
    Move {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// What startup recovery did with leftovers from a previous run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub recovered: Vec<String>,
    pub discarded: Vec<String>,
    pub failed: Vec<String>,
}

/// A finished recording in durable storage
#[derive(Debug, Clone, Serialize)]
pub struct RecordingFile {
    pub name: String,
    pub size: u64,
    pub modified: DateTime<Utc>,
}

/// Output filename for a recording started at `at`
pub fn recording_filename(at: DateTime<Local>, extension: &str) -> String {
    format!("{}{}.{}", FILENAME_PREFIX, at.format("%Y%m%d_%H%M%S"), extension)
}

#[derive(Debug, Clone)]
pub struct RecordingStorage {
    scratch_dir: PathBuf,
    recordings_dir: PathBuf,
    extension: String,
}

impl RecordingStorage {
    pub fn new(scratch_dir: impl Into<PathBuf>, recordings_dir: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            scratch_dir: scratch_dir.into(),
            recordings_dir: recordings_dir.into(),
            extension: extension.into(),
        }
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn recordings_dir(&self) -> &Path {
        &self.recordings_dir
    }

    /// Create both directories if needed
    pub async fn prepare(&self) -> Result<()> {
        fs::create_dir_all(&self.scratch_dir)
            .await
            .with_context(|| format!("Failed to create scratch dir {}", self.scratch_dir.display()))?;
        fs::create_dir_all(&self.recordings_dir)
            .await
            .with_context(|| format!("Failed to create recordings dir {}", self.recordings_dir.display()))?;
        Ok(())
    }

    pub fn new_filename(&self) -> String {
        recording_filename(Local::now(), &self.extension)
    }

    pub fn scratch_path(&self, filename: &str) -> PathBuf {
        self.scratch_dir.join(filename)
    }

    pub fn durable_path(&self, filename: &str) -> PathBuf {
        self.recordings_dir.join(filename)
    }

    /// Current size of the scratch file, 0 if it does not exist yet
    pub async fn scratch_size(&self, filename: &str) -> u64 {
        fs::metadata(self.scratch_path(filename))
            .await
            .map(|meta| meta.len())
            .unwrap_or(0)
    }

    /// Move a finished scratch file into durable storage
    ///
    /// A missing or empty scratch file is a failure; an empty one is removed
    /// so it never lands in durable storage. On a failed move the scratch file
    /// is left in place for manual recovery.
    pub async fn finalize(&self, filename: &str) -> Result<PathBuf, FinalizeError> {
        let from = self.scratch_path(filename);
        let to = self.durable_path(filename);

        let size = match fs::metadata(&from).await {
            Ok(meta) => meta.len(),
            Err(_) => return Err(FinalizeError::Missing(from)),
        };

        if size == 0 {
            warn!("Removing empty scratch file {}", from.display());
            if let Err(e) = fs::remove_file(&from).await {
                warn!("Failed to remove {}: {}", from.display(), e);
            }
            return Err(FinalizeError::Empty(from));
        }

        move_file(&from, &to)
            .await
            .map_err(|source| FinalizeError::Move {
                from: from.clone(),
                to: to.clone(),
                source,
            })?;

        info!("Saved {} ({} bytes) to {}", filename, size, to.display());
        Ok(to)
    }

    /// Deal with scratch files left behind by a crashed run
    pub async fn recover_orphans(&self) -> Result<RecoveryReport> {
        let mut report = RecoveryReport::default();
        let mut entries = match fs::read_dir(&self.scratch_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(report),
            Err(e) => return Err(e).context("Failed to scan scratch dir"),
        };

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !self.is_recording_name(&name) {
                continue;
            }

            match self.finalize(&name).await {
                Ok(path) => {
                    info!("Recovered orphaned recording {}", path.display());
                    report.recovered.push(name);
                }
                Err(FinalizeError::Empty(_)) | Err(FinalizeError::Missing(_)) => {
                    info!("Discarded empty orphaned scratch file {}", name);
                    report.discarded.push(name);
                }
                Err(e) => {
                    warn!("Could not recover {}: {}", name, e);
                    report.failed.push(name);
                }
            }
        }

        Ok(report)
    }

    /// Finished recordings, newest first
    pub async fn list(&self) -> Result<Vec<RecordingFile>> {
        let mut files = Vec::new();
        let mut entries = fs::read_dir(&self.recordings_dir)
            .await
            .with_context(|| format!("Failed to read {}", self.recordings_dir.display()))?;

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !self.is_recording_name(&name) {
                continue;
            }
            let meta = entry.metadata().await?;
            if !meta.is_file() {
                continue;
            }
            let modified = meta
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
            files.push(RecordingFile {
                name,
                size: meta.len(),
                modified,
            });
        }

        files.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| b.name.cmp(&a.name)));
        Ok(files)
    }

    /// Delete a finished recording by name
    pub async fn delete(&self, name: &str) -> Result<()> {
        if !is_plain_name(name) || !self.is_recording_name(name) {
            bail!("invalid recording name: {}", name);
        }
        fs::remove_file(self.durable_path(name))
            .await
            .with_context(|| format!("Failed to delete {}", name))?;
        info!("Deleted recording {}", name);
        Ok(())
    }

    fn is_recording_name(&self, name: &str) -> bool {
        name.starts_with(FILENAME_PREFIX)
            && Path::new(name).extension().and_then(|e| e.to_str()) == Some(self.extension.as_str())
    }
}

/// Reject anything that could escape the recordings directory
pub fn is_plain_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains('/')
        && !name.contains('\\')
        && !name.contains('\0')
}

/// Rename, falling back to copy+remove when scratch and durable storage are
/// on different filesystems
async fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    if fs::rename(from, to).await.is_ok() {
        return Ok(());
    }

    let partial = to.with_extension("partial");
    if let Err(e) = fs::copy(from, &partial).await {
        let _ = fs::remove_file(&partial).await;
        return Err(e);
    }
    if let Err(e) = fs::rename(&partial, to).await {
        let _ = fs::remove_file(&partial).await;
        return Err(e);
    }
    if let Err(e) = fs::remove_file(from).await {
        warn!("Copied {} but could not remove it: {}", from.display(), e);
    }
    Ok(())
}
