//! Instrument construction from configuration
//!
//! Turns every `[[instruments]]` entry into a boxed [`Readable`]. An entry
//! whose driver cannot be opened is logged and skipped; only an empty result
//! is fatal.
//!
//! | `type`     | Driver                     | Feature            |
//! |------------|----------------------------|--------------------|
//! | `tpg362`   | `Tpg362Driver` (serial)    | `instrument_tpg362` |
//! | `max31865` | `Max31865` on spidev       | `rtd_spidev`       |
//! | `mock`     | `MockSensor`               | always             |

use crate::config::InstrumentConfig;
use crate::error::{AppResult, DaqError};
use crate::hardware::capabilities::Readable;
use anyhow::Result;
use std::time::Duration;

/// Share of the loop's read timeout given to each serial line
///
/// A TPG362 read takes at most three line timeouts: one discarding stale
/// input and one per answer line.
pub const SERIAL_LINE_SHARE: u32 = 4;

/// Build one instrument
///
/// `read_timeout` is the loop's bound on a whole read; serial instruments get
/// `read_timeout / SERIAL_LINE_SHARE` per line.
pub fn create_instrument(config: &InstrumentConfig, read_timeout: Duration) -> Result<Box<dyn Readable>> {
    match config {
        InstrumentConfig::Mock {
            id,
            channels,
            base,
            amplitude,
        } => Ok(Box::new(crate::hardware::mock::MockSensor::new(
            id.clone(),
            channels.clone(),
            *base,
            *amplitude,
        ))),

        #[cfg(feature = "instrument_tpg362")]
        InstrumentConfig::Tpg362 {
            id,
            port,
            baud_rate,
            channels,
        } => {
            let driver = crate::hardware::tpg362::Tpg362Driver::open(id.clone(), port, *baud_rate, channels.clone())?
                .with_timeout(read_timeout / SERIAL_LINE_SHARE);
            Ok(Box::new(driver))
        }

        #[cfg(feature = "rtd_spidev")]
        InstrumentConfig::Max31865 {
            id,
            device,
            channel,
            reference_ohms,
            nominal_ohms,
            wires,
            mains_hz,
        } => {
            let settings = crate::hardware::max31865::RtdSettings {
                reference_ohms: *reference_ohms,
                nominal_ohms: *nominal_ohms,
                wires: *wires,
                mains_hz: *mains_hz,
            };
            let driver = crate::hardware::max31865::Max31865::open_spidev(id.clone(), device, channel.clone(), settings)?;
            Ok(Box::new(driver))
        }

        // Handle disabled features
        #[cfg(not(feature = "instrument_tpg362"))]
        InstrumentConfig::Tpg362 { .. } => {
            let _ = read_timeout;
            Err(anyhow::anyhow!("TPG362 driver requires 'instrument_tpg362' feature"))
        }

        #[cfg(not(feature = "rtd_spidev"))]
        InstrumentConfig::Max31865 { .. } => Err(anyhow::anyhow!("MAX31865 driver requires 'rtd_spidev' feature")),
    }
}

/// Build every configured instrument, skipping the ones that fail to open
///
/// # Errors
/// [`DaqError::NoSensors`] when not a single instrument could be created.
pub fn create_instruments(configs: &[InstrumentConfig], read_timeout: Duration) -> AppResult<Vec<Box<dyn Readable>>> {
    let mut instruments = Vec::with_capacity(configs.len());
    for config in configs {
        match create_instrument(config, read_timeout) {
            Ok(instrument) => {
                tracing::info!(
                    instrument = config.id(),
                    channels = ?config.channel_ids(),
                    "Instrument ready"
                );
                instruments.push(instrument);
            }
            Err(e) => {
                tracing::error!(
                    instrument = config.id(),
                    error = %format!("{e:#}"),
                    "Instrument unavailable; its channels will not be sampled"
                );
            }
        }
    }

    if instruments.is_empty() {
        return Err(DaqError::NoSensors);
    }
    Ok(instruments)
}
