//! Local persistence of normalized samples.
pub mod rolling_log;

pub use rolling_log::{FinalizeOutcome, LogWindow, RollingLogConfig, RollingLogger};
