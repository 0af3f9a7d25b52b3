//! MAX31865 RTD-to-Digital Converter Driver
//!
//! Reference: Maxim MAX31865 datasheet (19-6478)
//!
//! The bridge runs in automatic-conversion mode, so a read is a single burst
//! of two register reads (RTD MSB/LSB) and, when the fault bit is set, one
//! read of the fault status register. Temperature follows Callendar–Van Dusen
//! above 0 °C and a fifth-order polynomial fit below.
//!
//! The driver is generic over an `embedded-hal` 1.0 [`SpiDevice`]. On Linux the
//! `rtd_spidev` feature provides [`Max31865::open_spidev`] for `/dev/spidevX.Y`.

use crate::hardware::capabilities::Readable;
use crate::reading::Reading;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use embedded_hal::spi::{Operation, SpiDevice};
use std::sync::Mutex;

const REG_CONFIG: u8 = 0x00;
const REG_RTD_MSB: u8 = 0x01;
const REG_FAULT_STATUS: u8 = 0x07;
const WRITE_FLAG: u8 = 0x80;

const CFG_VBIAS: u8 = 0x80;
const CFG_AUTO_CONVERT: u8 = 0x40;
const CFG_THREE_WIRE: u8 = 0x10;
const CFG_FAULT_CLEAR: u8 = 0x02;
const CFG_FILTER_50HZ: u8 = 0x01;

// IEC 60751 coefficients
const RTD_A: f64 = 3.9083e-3;
const RTD_B: f64 = -5.775e-7;

/// Wiring and calibration of one RTD bridge
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RtdSettings {
    /// Reference resistor (430 Ω on PT100 breakouts)
    pub reference_ohms: f64,
    /// RTD resistance at 0 °C (100 Ω for PT100)
    pub nominal_ohms: f64,
    /// 2, 3 or 4 wire connection
    pub wires: u8,
    /// Mains rejection, 50 or 60 Hz
    pub mains_hz: u8,
}

impl Default for RtdSettings {
    fn default() -> Self {
        Self {
            reference_ohms: 430.0,
            nominal_ohms: 100.0,
            wires: 3,
            mains_hz: 50,
        }
    }
}

impl RtdSettings {
    /// Configuration register value for continuous measurement
    pub fn config_byte(&self) -> u8 {
        let mut config = CFG_VBIAS | CFG_AUTO_CONVERT;
        if self.wires == 3 {
            config |= CFG_THREE_WIRE;
        }
        if self.mains_hz == 50 {
            config |= CFG_FILTER_50HZ;
        }
        config
    }
}

/// Driver for one MAX31865 bridge
pub struct Max31865<SPI> {
    id: String,
    channel: String,
    settings: RtdSettings,
    spi: Mutex<SPI>,
}

#[cfg(feature = "rtd_spidev")]
impl Max31865<linux_embedded_hal::SpidevDevice> {
    /// Open a bridge on a Linux spidev node (SPI mode 1, 500 kHz)
    pub fn open_spidev(
        id: impl Into<String>,
        device: &str,
        channel: impl Into<String>,
        settings: RtdSettings,
    ) -> Result<Self> {
        use linux_embedded_hal::spidev::{SpiModeFlags, SpidevOptions};

        let mut spi = linux_embedded_hal::SpidevDevice::open(device)
            .map_err(|e| anyhow!("Failed to open {}: {:?}", device, e))?;
        let options = SpidevOptions::new()
            .bits_per_word(8)
            .max_speed_hz(500_000)
            .mode(SpiModeFlags::SPI_MODE_1)
            .build();
        spi.0
            .configure(&options)
            .map_err(|e| anyhow!("Failed to configure {}: {}", device, e))?;

        Ok(Self::new(id, spi, channel, settings))
    }
}

impl<SPI> Max31865<SPI>
where
    SPI: SpiDevice + Send,
{
    /// Wrap an SPI device
    pub fn new(id: impl Into<String>, spi: SPI, channel: impl Into<String>, settings: RtdSettings) -> Self {
        Self {
            id: id.into(),
            channel: channel.into(),
            settings,
            spi: Mutex::new(spi),
        }
    }

    fn write_register(&self, register: u8, value: u8) -> Result<()> {
        let mut spi = self.spi.lock().map_err(|_| anyhow!("SPI lock poisoned"))?;
        spi.transaction(&mut [Operation::Write(&[register | WRITE_FLAG, value])])
            .map_err(|e| anyhow!("{}: SPI write failed: {:?}", self.id, e))
    }

    fn read_registers(&self, register: u8, buf: &mut [u8]) -> Result<()> {
        let mut spi = self.spi.lock().map_err(|_| anyhow!("SPI lock poisoned"))?;
        spi.transaction(&mut [Operation::Write(&[register]), Operation::Read(buf)])
            .map_err(|e| anyhow!("{}: SPI read failed: {:?}", self.id, e))
    }

    /// Read the RTD resistance and the fault status (0 when healthy)
    pub fn read_resistance(&self) -> Result<(f64, u8)> {
        let mut rtd = [0u8; 2];
        self.read_registers(REG_RTD_MSB, &mut rtd)?;
        let raw = u16::from_be_bytes(rtd);

        let mut fault = 0u8;
        if raw & 0x0001 != 0 {
            let mut status = [0u8; 1];
            self.read_registers(REG_FAULT_STATUS, &mut status)?;
            // Fault bit set with an empty status register still means "do not trust"
            fault = if status[0] == 0 { 0xFF } else { status[0] };
            self.write_register(REG_CONFIG, self.settings.config_byte() | CFG_FAULT_CLEAR)?;
        }

        let code = f64::from(raw >> 1);
        Ok((code * self.settings.reference_ohms / 32768.0, fault))
    }
}

/// Convert RTD resistance to °C
pub fn resistance_to_celsius(resistance: f64, nominal_ohms: f64) -> f64 {
    let z1 = -RTD_A;
    let z2 = RTD_A * RTD_A - 4.0 * RTD_B;
    let z3 = (4.0 * RTD_B) / nominal_ohms;
    let z4 = 2.0 * RTD_B;

    let temperature = ((z2 + z3 * resistance).sqrt() + z1) / z4;
    if temperature >= 0.0 {
        return temperature;
    }

    // Below 0 °C: polynomial fit in PT100-equivalent ohms
    let r = resistance / nominal_ohms * 100.0;
    -242.02 + 2.2228 * r + 2.5859e-3 * r.powi(2) - 4.8260e-6 * r.powi(3) - 2.8183e-8 * r.powi(4)
        + 1.5243e-10 * r.powi(5)
}

#[async_trait]
impl<SPI> Readable for Max31865<SPI>
where
    SPI: SpiDevice + Send,
{
    fn id(&self) -> &str {
        &self.id
    }

    fn channels(&self) -> Vec<String> {
        vec![self.channel.clone()]
    }

    async fn read(&self) -> Result<Vec<Reading>> {
        let (resistance, fault) = self.read_resistance()?;
        let celsius = resistance_to_celsius(resistance, self.settings.nominal_ohms);
        tracing::trace!(instrument = %self.id, resistance, celsius, fault, "RTD sample");
        Ok(vec![Reading::new(self.channel.clone(), celsius, i32::from(fault))])
    }

    async fn configure(&self) -> Result<()> {
        self.write_register(REG_CONFIG, self.settings.config_byte() | CFG_FAULT_CLEAR)?;
        tracing::info!(
            instrument = %self.id,
            wires = self.settings.wires,
            mains_hz = self.settings.mains_hz,
            "MAX31865 configured for continuous conversion"
        );
        Ok(())
    }

    async fn release(&self) -> Result<()> {
        // Bias off stops self-heating of the element
        self.write_register(REG_CONFIG, 0x00)
    }
}
