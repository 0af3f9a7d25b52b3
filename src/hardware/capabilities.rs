//! Instrument Capabilities
//!
//! The acquisition loop only knows instruments through [`Readable`]. A driver
//! reports one [`Reading`] per channel it owns on every successful read:
//!
//! - the TPG362 controller returns both gauges from a single `PRX` frame
//! - a MAX31865 bridge returns its one RTD channel
//!
//! # Design Philosophy
//!
//! Each capability trait:
//! - Is async (uses #[async_trait])
//! - Is thread-safe (requires Send + Sync)
//! - Uses anyhow::Result for errors
//!
//! A read error means the transport failed and none of the instrument's
//! channels produced a sample this tick. Device-reported problems (overrange,
//! fault codes) are *not* errors; they travel inside the [`Reading`].
//!
//! # Example
//!
//! ```rust,ignore
//! struct Thermocouple { channel: String }
//!
//! #[async_trait]
//! impl Readable for Thermocouple {
//!     fn id(&self) -> &str { "tc0" }
//!     fn channels(&self) -> Vec<String> { vec![self.channel.clone()] }
//!     async fn read(&self) -> Result<Vec<Reading>> {
//!         Ok(vec![Reading::new(self.channel.clone(), 21.5, 0)])
//!     }
//! }
//! ```

use crate::reading::Reading;
use anyhow::Result;
use async_trait::async_trait;

/// Capability: Scalar Readout
///
/// Devices that return one value per channel per poll (gauge controllers,
/// RTD bridges, power meters).
///
/// # Contract
/// - `read` performs exactly one poll of the device
/// - An `Err` means no channel of this instrument has a sample this tick
/// - `configure` is called once before the first `read`; its failure is not fatal
/// - `release` is called once at shutdown, after the last `read`
#[async_trait]
pub trait Readable: Send + Sync {
    /// Instrument identifier from configuration
    fn id(&self) -> &str;

    /// Channel ids produced by `read`
    fn channels(&self) -> Vec<String>;

    /// Poll the device once
    async fn read(&self) -> Result<Vec<Reading>>;

    /// One-time device setup (units, filters, identification)
    ///
    /// # Default Implementation
    /// Nothing to configure.
    async fn configure(&self) -> Result<()> {
        Ok(())
    }

    /// Return the device to an idle state and free its resources
    ///
    /// # Default Implementation
    /// Nothing to release.
    async fn release(&self) -> Result<()> {
        Ok(())
    }
}
