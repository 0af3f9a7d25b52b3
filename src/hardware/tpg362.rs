//! Pfeiffer TPG362 Dual Gauge Controller Driver
//!
//! Reference: Pfeiffer Vacuum TPG 361/362 Operating Instructions, "Communication Protocol"
//!
//! Protocol Overview:
//! - Format: ASCII mnemonics (NOT SCPI)
//! - Baud: 9600, 8N1, no flow control
//! - Terminator: CR LF
//! - Two-phase exchange: host sends `MNE\r\n`, controller answers `ACK\r\n`
//!   (or `NAK\r\n`); host then sends `ENQ` and the controller answers with the
//!   data line
//! - A reply that arrives after its timeout is discarded before the next
//!   exchange, so one late answer never shifts later ones
//!
//! # Pressure Readout
//!
//! `PRX` returns `status1,value1,status2,value2`. Status 0 means the gauge is
//! measuring; the value field may also be the text `OR`/`UR` when the gauge is
//! outside its range. Both fields are passed through untouched; classification
//! happens in the normalizer.
//!
//! # Example Usage
//!
//! ```no_run
//! use chamber_daq::hardware::tpg362::Tpg362Driver;
//! use chamber_daq::hardware::capabilities::Readable;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let gauge = Tpg362Driver::open("gauge", "/dev/ttyUSB0", 9600, ["sens-1".into(), "sens-2".into()])?;
//!     gauge.configure().await?;
//!     for reading in gauge.read().await? {
//!         println!("{} = {}", reading.channel_id, reading.raw_value);
//!     }
//!     Ok(())
//! }
//! ```

use crate::hardware::capabilities::Readable;
use crate::reading::Reading;
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tokio::time::Instant;

const ACK: u8 = 0x06;
const NAK: u8 = 0x15;
const ENQ: u8 = 0x05;

/// One-time settings applied before acquisition starts:
/// backlight off, mbar, floating point, air/N2, linear ranges, normal filter, save.
pub const SETUP_COMMANDS: &[&str] = &[
    "BAL,0", "UNI,0", "FMT,0", "GAS,0,0", "FSR,6,5", "FIL,2,2", "SAV,1",
];

/// Driver for the Pfeiffer TPG362 controller
///
/// Generic over the byte stream so the protocol can be exercised against an
/// in-memory duplex in tests. Implements [`Readable`] with two channels.
pub struct Tpg362<P> {
    id: String,
    /// Serial stream protected by Mutex for exclusive access
    port: Mutex<BufReader<P>>,
    /// Channel ids for gauge 1 and gauge 2
    channels: [String; 2],
    /// Per-line timeout
    timeout: Duration,
    /// False while an exchange is in progress or after one failed
    in_sync: AtomicBool,
}

/// TPG362 on a native serial port
#[cfg(feature = "instrument_tpg362")]
pub type Tpg362Driver = Tpg362<tokio_serial::SerialStream>;

#[cfg(feature = "instrument_tpg362")]
impl Tpg362<tokio_serial::SerialStream> {
    /// Open the controller's serial port
    ///
    /// # Arguments
    /// * `port_path` - Serial port path (e.g., "/dev/ttyUSB0")
    /// * `baud_rate` - Controller baud rate (factory default 9600)
    ///
    /// # Errors
    /// Returns error if the serial port cannot be opened
    pub fn open(
        id: impl Into<String>,
        port_path: &str,
        baud_rate: u32,
        channels: [String; 2],
    ) -> Result<Self> {
        use tokio_serial::SerialPortBuilderExt;

        let port = tokio_serial::new(port_path, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .with_context(|| format!("Failed to open TPG362 serial port {port_path}"))?;

        Ok(Self::with_stream(id, port, channels))
    }
}

impl<P> Tpg362<P>
where
    P: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap an already-open byte stream
    pub fn with_stream(id: impl Into<String>, stream: P, channels: [String; 2]) -> Self {
        Self {
            id: id.into(),
            port: Mutex::new(BufReader::new(stream)),
            channels,
            timeout: Duration::from_secs(1),
            in_sync: AtomicBool::new(true),
        }
    }

    /// Set the per-line read timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Send a mnemonic and wait for the acknowledgement
    pub async fn send_command(&self, mnemonic: &str) -> Result<()> {
        let mut port = self.port.lock().await;
        self.begin_exchange(&mut port).await;
        self.command_locked(&mut port, mnemonic).await?;
        self.in_sync.store(true, Ordering::Release);
        Ok(())
    }

    /// Send a mnemonic, then request and return its data line
    pub async fn query(&self, mnemonic: &str) -> Result<String> {
        let mut port = self.port.lock().await;
        self.begin_exchange(&mut port).await;
        self.command_locked(&mut port, mnemonic).await?;

        port.get_mut()
            .write_all(&[ENQ])
            .await
            .context("TPG362 write failed")?;
        let deadline = Instant::now() + self.timeout;
        loop {
            let line = self.read_line(&mut port, deadline).await?;
            // A late acknowledgement from an earlier exchange
            if matches!(line.as_bytes().first(), Some(&ACK) | Some(&NAK)) {
                tracing::debug!(instrument = %self.id, "Discarding stale TPG362 acknowledgement");
                continue;
            }
            self.in_sync.store(true, Ordering::Release);
            return Ok(line);
        }
    }

    /// Mark the link busy and, if the previous exchange was cut short, drop
    /// whatever it left on the line.
    ///
    /// The flag is only set back once an exchange completes, so an exchange
    /// cancelled by an outer timeout also triggers the discard.
    async fn begin_exchange(&self, port: &mut BufReader<P>) {
        if !self.in_sync.swap(false, Ordering::AcqRel) {
            self.discard_pending(port).await;
        }
    }

    /// Read and drop input until the line stays quiet for a quarter of the
    /// line timeout, or one line timeout has passed.
    async fn discard_pending(&self, port: &mut BufReader<P>) {
        let quiet = (self.timeout / 4).max(Duration::from_millis(5));
        let deadline = Instant::now() + self.timeout;
        let mut discarded = 0usize;
        while Instant::now() < deadline {
            let wait = quiet.min(deadline.saturating_duration_since(Instant::now()));
            let pending = match tokio::time::timeout(wait, port.fill_buf()).await {
                Ok(Ok(buf)) => buf.len(),
                _ => 0,
            };
            if pending == 0 {
                break;
            }
            port.consume(pending);
            discarded += pending;
        }
        if discarded > 0 {
            tracing::debug!(instrument = %self.id, bytes = discarded, "Discarded stale TPG362 input");
        }
    }

    async fn command_locked(&self, port: &mut BufReader<P>, mnemonic: &str) -> Result<()> {
        port.get_mut()
            .write_all(format!("{mnemonic}\r\n").as_bytes())
            .await
            .context("TPG362 write failed")?;

        let deadline = Instant::now() + self.timeout;
        loop {
            let answer = self.read_line(port, deadline).await?;
            match answer.as_bytes().first() {
                Some(&ACK) => return Ok(()),
                Some(&NAK) => bail!("TPG362 rejected '{}'", mnemonic),
                // A late data line from an earlier exchange
                _ => tracing::debug!(
                    instrument = %self.id,
                    mnemonic,
                    answer = ?answer,
                    "Discarding stale TPG362 line"
                ),
            }
        }
    }

    async fn read_line(&self, port: &mut BufReader<P>, deadline: Instant) -> Result<String> {
        let mut line = String::new();
        let read = tokio::time::timeout_at(deadline, port.read_line(&mut line))
            .await
            .context("TPG362 read timeout")??;
        if read == 0 {
            bail!("TPG362 closed the connection");
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    /// Query and log identification, operating hours, temperature, network
    /// settings and gauge types
    pub async fn identify(&self) -> Result<DeviceInfo> {
        let info = DeviceInfo::parse(&self.query("AYT").await?)?;
        tracing::info!(
            instrument = %self.id,
            device = %info.device_type,
            model = %info.model,
            serial = %info.serial,
            firmware = %info.firmware,
            hardware = %info.hardware,
            "TPG362 identified"
        );

        match self.query("RHR").await {
            Ok(hours) => tracing::info!(instrument = %self.id, hours = %hours, "Operating hours"),
            Err(e) => tracing::warn!(instrument = %self.id, error = %e, "RHR query failed"),
        }
        match self.query("TMP").await {
            Ok(temp) => tracing::info!(instrument = %self.id, celsius = %temp, "Inner temperature"),
            Err(e) => tracing::warn!(instrument = %self.id, error = %e, "TMP query failed"),
        }
        match self.query("ETH").await {
            Ok(eth) => {
                let fields: Vec<&str> = eth.split(',').collect();
                let mode = match fields.first() {
                    Some(&"0") => "static",
                    _ => "dhcp",
                };
                tracing::info!(
                    instrument = %self.id,
                    mode,
                    ip = fields.get(1).copied().unwrap_or("?"),
                    subnet = fields.get(2).copied().unwrap_or("?"),
                    gateway = fields.get(3).copied().unwrap_or("?"),
                    "Ethernet settings"
                );
            }
            Err(e) => tracing::warn!(instrument = %self.id, error = %e, "ETH query failed"),
        }
        match self.query("TID").await {
            Ok(tid) => {
                let mut gauges = tid.split(',');
                tracing::info!(
                    instrument = %self.id,
                    gauge1 = gauges.next().unwrap_or("?"),
                    gauge2 = gauges.next().unwrap_or("?"),
                    "Gauge identification"
                );
            }
            Err(e) => tracing::warn!(instrument = %self.id, error = %e, "TID query failed"),
        }

        Ok(info)
    }
}

#[async_trait]
impl<P> Readable for Tpg362<P>
where
    P: AsyncRead + AsyncWrite + Unpin + Send,
{
    fn id(&self) -> &str {
        &self.id
    }

    fn channels(&self) -> Vec<String> {
        self.channels.to_vec()
    }

    async fn read(&self) -> Result<Vec<Reading>> {
        let answer = self.query("PRX").await?;
        Ok(parse_prx(&answer, &self.channels)?.to_vec())
    }

    async fn configure(&self) -> Result<()> {
        if let Err(e) = self.identify().await {
            tracing::warn!(instrument = %self.id, error = %e, "TPG362 identification failed");
        }
        for command in SETUP_COMMANDS {
            if let Err(e) = self.send_command(command).await {
                tracing::warn!(instrument = %self.id, command, error = %e, "Setup command not accepted");
            }
        }
        Ok(())
    }
}

/// Identification returned by `AYT`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Controller type, e.g. `TPG362`
    pub device_type: String,
    /// Part number
    pub model: String,
    /// Serial number
    pub serial: String,
    /// Firmware version
    pub firmware: String,
    /// Hardware version
    pub hardware: String,
}

impl DeviceInfo {
    fn parse(answer: &str) -> Result<Self> {
        let fields: Vec<&str> = answer.split(',').map(str::trim).collect();
        if fields.len() < 5 {
            return Err(anyhow!("Incomplete AYT answer: '{}'", answer));
        }
        Ok(Self {
            device_type: fields[0].to_string(),
            model: fields[1].to_string(),
            serial: fields[2].to_string(),
            firmware: fields[3].to_string(),
            hardware: fields[4].to_string(),
        })
    }
}

/// Split a `PRX` answer into one reading per gauge
///
/// Malformed frames (fewer than four fields, non-integer status) are transport
/// errors: the whole frame is discarded.
pub fn parse_prx(answer: &str, channels: &[String; 2]) -> Result<[Reading; 2]> {
    let fields: Vec<&str> = answer.split(',').collect();
    if fields.len() < 4 {
        bail!("Incomplete PRX frame: '{}'", answer);
    }

    let status = |field: &str| -> Result<i32> {
        field
            .trim()
            .parse::<i32>()
            .with_context(|| format!("Bad status field '{}' in PRX frame '{}'", field, answer))
    };

    Ok([
        Reading::new(channels[0].clone(), fields[1].trim(), status(fields[0])?),
        Reading::new(channels[1].clone(), fields[3].trim(), status(fields[2])?),
    ])
}
