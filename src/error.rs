//! Custom error types for the daemon.
//!
//! `DaqError` collects every failure the acquisition pipeline can observe. Each
//! variant maps to one recovery policy:
//!
//! - **`Config`** / **`Configuration`**: parse or semantic problems in the
//!   configuration. Fatal, but only at startup.
//! - **`Transport`**: an instrument could not be reached this tick. The loop
//!   skips that instrument's channels and carries on.
//! - **`LocalPersistence`**: the rolling logger could not open, write or
//!   finalize a window. The logger degrades to publish-only and retries on the
//!   next tick.
//! - **`RemoteDelivery`**: the remote write failed. Logged and dropped, never
//!   retried.
//! - **`NoSensors`**: no instrument could be initialized. The only fatal
//!   steady-state precondition.
//!
//! Value classification (unparseable text, device fault codes) is not an
//! error; see [`crate::reading::Validity`].

use std::path::PathBuf;
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

/// Every failure the daemon reports.
#[derive(Error, Debug)]
pub enum DaqError {
    /// Configuration file or environment could not be parsed.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Configuration parsed but failed validation.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// I/O failure outside the rolling log.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An instrument read failed or timed out.
    #[error("Instrument '{instrument}' unreachable: {message}")]
    Transport {
        /// Instrument id from configuration
        instrument: String,
        /// Underlying driver error
        message: String,
    },

    /// A log window could not be opened, written or finalized.
    #[error("Local persistence failed for {}: {source}", path.display())]
    LocalPersistence {
        /// File or directory involved
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// A remote write was rejected or never answered.
    #[error("Remote write failed: {0}")]
    RemoteDelivery(String),

    /// No instrument could be opened.
    #[error("No sensor could be initialized")]
    NoSensors,
}

impl From<figment::Error> for DaqError {
    fn from(err: figment::Error) -> Self {
        DaqError::Config(Box::new(err))
    }
}

impl DaqError {
    /// Wrap an I/O failure on a local log path.
    pub fn persistence(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DaqError::LocalPersistence {
            path: path.into(),
            source,
        }
    }

    /// Whether the acquisition loop may keep running after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            DaqError::Transport { .. }
                | DaqError::LocalPersistence { .. }
                | DaqError::RemoteDelivery(_)
        )
    }
}
