//! # Chamber DAQ Core Library
//!
//! Periodic acquisition of pressure and temperature readings from a test
//! chamber. Each tick the daemon polls its instruments, normalizes every
//! reading against the channel calibration, appends it to a rolling local log
//! and publishes valid values to an InfluxDB-compatible time-series store.
//!
//! ## Crate Structure
//!
//! - **`acquisition`**: The `AcquisitionLoop`, sole owner of scheduling, sensor
//!   handles and log windows, and the cooperative shutdown protocol.
//! - **`clock`**: Wall-clock seconds behind a trait so tests can drive time.
//! - **`config`**: `DaemonConfig` loaded with figment from TOML and
//!   `CHAMBER_DAQ_*` environment variables, plus semantic validation.
//! - **`data`**: The `RollingLogger`, which writes windows into a staging
//!   directory and moves completed ones to the output directory.
//! - **`error`**: The `DaqError` enum for centralized error handling.
//! - **`hardware`**: The `Readable` capability and the TPG362, MAX31865 and mock
//!   drivers.
//! - **`logging`**: tracing-subscriber initialization.
//! - **`normalize`**: Pure classification of raw readings into calibrated
//!   values, sentinels, faults or unparseable input.
//! - **`publish`**: Fire-and-forget line-protocol writes over HTTP.
//! - **`reading`**: `Reading` and `NormalizedSample` data types.

pub mod acquisition;
pub mod clock;
pub mod config;
pub mod data;
pub mod error;
pub mod hardware;
pub mod logging;
pub mod normalize;
pub mod publish;
pub mod reading;

pub use acquisition::{AcquisitionLoop, RunSummary};
pub use config::DaemonConfig;
pub use error::{AppResult, DaqError};
