//! Rolling local log.
//!
//! Each channel owns one [`RollingLogger`], which owns at most one open
//! [`LogWindow`]. A window is a plain text file in the staging directory,
//! named after its start epoch, that receives one line per sample:
//!
//! ```text
//! 1739110800	23.6
//! 1739110805	OR
//! 1739110810	FAULT:1:23.10
//! ```
//!
//! When the window's duration has elapsed (or on shutdown) the file is flushed,
//! closed and renamed into the output directory. Finalized files are never
//! touched again.
//!
//! # Degraded mode
//!
//! If a window cannot be opened, or an append fails, the logger drops local
//! persistence until the next [`RollingLogger::maybe_rotate`] succeeds in
//! opening a fresh window. Publishing is unaffected.
//!
//! ```text
//! open(now) ──ok──▶ Open ──append──▶ Open
//!     │              │ maybe_rotate(now ≥ start + window)
//!     │              ▼
//!     │           finalize ──rename──▶ <output>/<channel>/<epoch>.txt
//!     ▼
//!  Degraded ──maybe_rotate──▶ open(now)
//! ```

use crate::error::{AppResult, DaqError};
use crate::reading::NormalizedSample;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// One rolling output file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogWindow {
    /// UNIX second at which the window was opened; also the file stem
    pub start_epoch: i64,
    /// Current location of the file (staging while open)
    pub path: PathBuf,
    /// Whether the window still accepts appends
    pub is_open: bool,
}

/// Where a finalized window ended up
///
/// An existing file in the output directory is never replaced; a window whose
/// name is already taken stays in staging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalizeOutcome {
    /// Renamed into the output directory
    Completed(PathBuf),
    /// Rename failed; file left in staging
    LeftInStaging(PathBuf),
}

impl FinalizeOutcome {
    /// Path of the sealed file
    pub fn path(&self) -> &Path {
        match self {
            FinalizeOutcome::Completed(path) | FinalizeOutcome::LeftInStaging(path) => path,
        }
    }
}

/// Directory layout and window length for one channel
#[derive(Debug, Clone)]
pub struct RollingLogConfig {
    /// Open windows live here
    pub staging_dir: PathBuf,
    /// Finalized windows are renamed into here
    pub output_dir: PathBuf,
    /// Window length
    pub window: Duration,
}

impl RollingLogConfig {
    /// Per-channel layout under shared staging/output roots
    pub fn for_channel(staging_root: &Path, output_root: &Path, channel: &str, window: Duration) -> Self {
        Self {
            staging_dir: staging_root.join(channel),
            output_dir: output_root.join(channel),
            window,
        }
    }
}

struct ActiveWindow {
    window: LogWindow,
    writer: BufWriter<File>,
}

/// Append-only rolling logger
pub struct RollingLogger {
    name: String,
    config: RollingLogConfig,
    active: Option<ActiveWindow>,
    finalized: Vec<FinalizeOutcome>,
}

impl RollingLogger {
    /// Create a logger; no window is opened until [`RollingLogger::open`]
    pub fn new(name: impl Into<String>, config: RollingLogConfig) -> Self {
        Self {
            name: name.into(),
            config,
            active: None,
            finalized: Vec::new(),
        }
    }

    /// Logger name (the channel id)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Currently open window, if any
    pub fn window(&self) -> Option<&LogWindow> {
        self.active.as_ref().map(|a| &a.window)
    }

    /// Whether the logger is running without local persistence
    pub fn is_degraded(&self) -> bool {
        self.active.is_none()
    }

    /// Every window sealed so far, in order
    pub fn finalized(&self) -> &[FinalizeOutcome] {
        &self.finalized
    }

    /// Open a new window starting at `now`
    ///
    /// Any window still open is finalized first. On failure the logger stays
    /// degraded and the error is returned for logging.
    pub fn open(&mut self, now: i64) -> AppResult<&LogWindow> {
        if self.active.is_some() {
            self.close_and_finalize();
        }

        fs::create_dir_all(&self.config.staging_dir)
            .map_err(|e| DaqError::persistence(&self.config.staging_dir, e))?;

        let path = self.config.staging_dir.join(format!("{now}.txt"));
        let file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&path)
            .map_err(|e| DaqError::persistence(&path, e))?;

        tracing::info!(logger = %self.name, path = %path.display(), "Opened log window");
        let active = self.active.insert(ActiveWindow {
            window: LogWindow {
                start_epoch: now,
                path,
                is_open: true,
            },
            writer: BufWriter::new(file),
        });
        Ok(&active.window)
    }

    /// Append one sample to the open window
    ///
    /// Returns `Ok(false)` when degraded (sample not persisted). A write error
    /// seals what was written so far and degrades the logger.
    pub fn append(&mut self, sample: &NormalizedSample) -> AppResult<bool> {
        let Some(active) = self.active.as_mut() else {
            return Ok(false);
        };

        let line = sample.local_line();
        let result = writeln!(active.writer, "{line}").and_then(|_| active.writer.flush());
        match result {
            Ok(()) => Ok(true),
            Err(e) => {
                let err = DaqError::persistence(&active.window.path, e);
                self.close_and_finalize();
                Err(err)
            }
        }
    }

    /// Rotate when the window has elapsed; reopen when degraded
    ///
    /// Returns the sealed window when a rotation happened.
    pub fn maybe_rotate(&mut self, now: i64) -> AppResult<Option<FinalizeOutcome>> {
        let window_secs = i64::try_from(self.config.window.as_secs()).unwrap_or(i64::MAX);

        match &self.active {
            Some(active) if now.saturating_sub(active.window.start_epoch) >= window_secs => {
                let sealed = self.close_and_finalize();
                self.open(now)?;
                Ok(sealed)
            }
            Some(_) => Ok(None),
            None => {
                self.open(now)?;
                Ok(None)
            }
        }
    }

    /// Flush, close and move the open window into the output directory
    ///
    /// No-op when nothing is open. A failed rename leaves the file in staging.
    pub fn close_and_finalize(&mut self) -> Option<FinalizeOutcome> {
        let ActiveWindow { mut window, writer } = self.active.take()?;
        window.is_open = false;

        match writer.into_inner() {
            Ok(file) => {
                if let Err(e) = file.sync_all() {
                    tracing::warn!(logger = %self.name, error = %e, "fsync before finalize failed");
                }
            }
            Err(e) => {
                tracing::warn!(
                    logger = %self.name,
                    path = %window.path.display(),
                    error = %e.error(),
                    "Flush before finalize failed; tail of window may be lost"
                );
            }
        }

        let outcome = match self.move_to_output(&window.path) {
            Ok(destination) => {
                tracing::info!(
                    logger = %self.name,
                    path = %destination.display(),
                    "Finalized log window"
                );
                FinalizeOutcome::Completed(destination)
            }
            Err(e) => {
                tracing::error!(
                    logger = %self.name,
                    path = %window.path.display(),
                    error = %e,
                    "Could not move window to output directory; left in staging"
                );
                FinalizeOutcome::LeftInStaging(window.path.clone())
            }
        };

        self.finalized.push(outcome.clone());
        Some(outcome)
    }

    fn move_to_output(&self, staged: &Path) -> AppResult<PathBuf> {
        fs::create_dir_all(&self.config.output_dir)
            .map_err(|e| DaqError::persistence(&self.config.output_dir, e))?;

        let file_name = staged
            .file_name()
            .ok_or_else(|| DaqError::Configuration(format!("bad window path {}", staged.display())))?;
        let destination = self.config.output_dir.join(file_name);
        // A sealed window with the same start epoch exists when the clock stepped back
        if destination.try_exists().map_err(|e| DaqError::persistence(&destination, e))? {
            return Err(DaqError::persistence(
                &destination,
                std::io::Error::new(std::io::ErrorKind::AlreadyExists, "finalized window already exists"),
            ));
        }
        fs::rename(staged, &destination).map_err(|e| DaqError::persistence(&destination, e))?;
        Ok(destination)
    }
}

impl Drop for RollingLogger {
    fn drop(&mut self) {
        if self.active.is_some() {
            self.close_and_finalize();
        }
    }
}
