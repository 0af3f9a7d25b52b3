//! Configuration System using Figment
//!
//! Strongly-typed daemon configuration, built once at startup and passed into
//! each component. Loaded from:
//! 1. a TOML file (default `config/chamber_daq.toml`)
//! 2. environment variables prefixed with `CHAMBER_DAQ_`, nested keys split on `__`
//!
//! The remote credential is not part of the file. It is read from the
//! environment variable named by `remote.token_env` (default `INFLUXDB_TOKEN`).
//!
//! # Example
//! ```no_run
//! use chamber_daq::config::DaemonConfig;
//!
//! let config = DaemonConfig::load()?;
//! config.validate()?;
//! println!("Sampling every {:?}", config.acquisition.period);
//! # Ok::<(), chamber_daq::error::DaqError>(())
//! ```

use crate::error::{AppResult, DaqError};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/chamber_daq.toml";

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "CHAMBER_DAQ_";

/// Top-level daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Sampling cadence
    #[serde(default)]
    pub acquisition: AcquisitionConfig,
    /// Rolling local log settings
    #[serde(default)]
    pub storage: StorageConfig,
    /// Remote time-series store; absent means local-only
    #[serde(default)]
    pub remote: RemoteConfig,
    /// Calibrated channels
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
    /// Instruments that produce readings for the channels
    #[serde(default)]
    pub instruments: Vec<InstrumentConfig>,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

/// Sampling cadence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    /// Tick period
    #[serde(with = "humantime_serde", default = "default_period")]
    pub period: Duration,
    /// Upper bound on a single instrument read
    #[serde(with = "humantime_serde", default = "default_read_timeout")]
    pub read_timeout: Duration,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            period: default_period(),
            read_timeout: default_read_timeout(),
        }
    }
}

/// Rolling local log configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Disable to run publish-only
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Where open windows are written
    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,
    /// Where finalized windows are moved
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Length of one window
    #[serde(with = "humantime_serde", default = "default_window")]
    pub window: Duration,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            staging_dir: default_staging_dir(),
            output_dir: default_output_dir(),
            window: default_window(),
        }
    }
}

/// InfluxDB v2 write endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Disable to run local-only
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Base URL, e.g. `http://localhost:8086` (plain http only)
    #[serde(default)]
    pub base_url: String,
    /// Organization
    #[serde(default)]
    pub org: String,
    /// Bucket
    #[serde(default)]
    pub bucket: String,
    /// Environment variable holding the API token
    #[serde(default = "default_token_env")]
    pub token_env: String,
    /// Per-request bound; must be shorter than the sampling period
    #[serde(with = "humantime_serde", default = "default_remote_timeout")]
    pub timeout: Duration,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: String::new(),
            org: String::new(),
            bucket: String::new(),
            token_env: default_token_env(),
            timeout: default_remote_timeout(),
        }
    }
}

impl RemoteConfig {
    /// Full write URL with second precision; `org` and `bucket` are
    /// percent-encoded into the query.
    ///
    /// # Errors
    /// [`DaqError::Configuration`] when `base_url` is not an absolute `http://` URL.
    pub fn write_url(&self) -> AppResult<Url> {
        let mut url = Url::parse(&self.base_url).map_err(|e| {
            DaqError::Configuration(format!("Invalid remote.base_url '{}': {}", self.base_url, e))
        })?;
        if url.scheme() != "http" {
            return Err(DaqError::Configuration(format!(
                "remote.base_url '{}' uses scheme '{}'; only http is supported",
                self.base_url,
                url.scheme()
            )));
        }

        let path = format!("{}/api/v2/write", url.path().trim_end_matches('/'));
        url.set_path(&path);
        url.query_pairs_mut()
            .clear()
            .append_pair("org", &self.org)
            .append_pair("bucket", &self.bucket)
            .append_pair("precision", "s");
        Ok(url)
    }

    /// Read the API token from the process environment.
    pub fn token_from_env(&self) -> Option<String> {
        std::env::var(&self.token_env).ok().filter(|t| !t.is_empty())
    }
}

/// One calibrated channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Channel identifier; also the line-protocol tag value
    pub id: String,
    /// Line-protocol measurement name (`pressure`, `temperature`)
    pub measurement: String,
    /// Line-protocol tag key
    #[serde(default = "default_tag_key")]
    pub tag_key: String,
    /// Added to every parsed value
    #[serde(default)]
    pub offset: f64,
}

/// Instrument definition in configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InstrumentConfig {
    /// Pfeiffer TPG362 dual gauge controller
    Tpg362 {
        /// Unique instrument identifier
        id: String,
        /// Serial port path (e.g. `/dev/ttyUSB0`)
        port: String,
        /// Baud rate
        #[serde(default = "default_baud")]
        baud_rate: u32,
        /// Channel ids for gauge 1 and gauge 2
        channels: [String; 2],
    },
    /// MAX31865 RTD bridge on spidev
    Max31865 {
        /// Unique instrument identifier
        id: String,
        /// spidev node (e.g. `/dev/spidev0.0`)
        device: String,
        /// Channel id
        channel: String,
        /// Reference resistor in ohms
        #[serde(default = "default_rref")]
        reference_ohms: f64,
        /// RTD nominal resistance at 0 °C
        #[serde(default = "default_r0")]
        nominal_ohms: f64,
        /// 2, 3 or 4 wire connection
        #[serde(default = "default_wires")]
        wires: u8,
        /// Mains filter in Hz (50 or 60)
        #[serde(default = "default_mains")]
        mains_hz: u8,
    },
    /// Simulated instrument
    Mock {
        /// Unique instrument identifier
        id: String,
        /// Channels produced on every read
        channels: Vec<String>,
        /// Mean value
        #[serde(default)]
        base: f64,
        /// Sine amplitude
        #[serde(default)]
        amplitude: f64,
    },
}

impl InstrumentConfig {
    /// Instrument identifier
    pub fn id(&self) -> &str {
        match self {
            InstrumentConfig::Tpg362 { id, .. }
            | InstrumentConfig::Max31865 { id, .. }
            | InstrumentConfig::Mock { id, .. } => id,
        }
    }

    /// Channel ids this instrument reports
    pub fn channel_ids(&self) -> Vec<&str> {
        match self {
            InstrumentConfig::Tpg362 { channels, .. } => {
                channels.iter().map(String::as_str).collect()
            }
            InstrumentConfig::Max31865 { channel, .. } => vec![channel.as_str()],
            InstrumentConfig::Mock { channels, .. } => {
                channels.iter().map(String::as_str).collect()
            }
        }
    }
}

// Default value functions
fn default_name() -> String {
    "chamber_daq".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "compact".to_string()
}

fn default_period() -> Duration {
    Duration::from_secs(5)
}

fn default_read_timeout() -> Duration {
    Duration::from_secs(2)
}

fn default_true() -> bool {
    true
}

fn default_staging_dir() -> PathBuf {
    PathBuf::from("/tmp/scdata")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_window() -> Duration {
    Duration::from_secs(3600)
}

fn default_token_env() -> String {
    "INFLUXDB_TOKEN".to_string()
}

fn default_remote_timeout() -> Duration {
    Duration::from_secs(2)
}

fn default_tag_key() -> String {
    "sens".to_string()
}

fn default_baud() -> u32 {
    9600
}

fn default_rref() -> f64 {
    430.0
}

fn default_r0() -> f64 {
    100.0
}

fn default_wires() -> u8 {
    3
}

fn default_mains() -> u8 {
    50
}

impl DaemonConfig {
    /// Load configuration from the default path and environment variables
    ///
    /// Environment variables override the file with prefix `CHAMBER_DAQ_`.
    /// Example: `CHAMBER_DAQ_APPLICATION__LOG_LEVEL=debug`
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(DaqError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.application.log_format.as_str()) {
            return Err(DaqError::Configuration(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                valid_formats.join(", ")
            )));
        }

        if self.acquisition.period.is_zero() {
            return Err(DaqError::Configuration(
                "acquisition.period must be greater than zero".into(),
            ));
        }

        if self.storage.window.as_secs() == 0 {
            return Err(DaqError::Configuration(
                "storage.window must be at least one second".into(),
            ));
        }

        if self.remote.enabled
            && (self.remote.base_url.is_empty()
                || self.remote.org.is_empty()
                || self.remote.bucket.is_empty())
        {
            return Err(DaqError::Configuration(
                "remote.base_url, remote.org and remote.bucket are required when remote.enabled"
                    .into(),
            ));
        }

        if self.remote.enabled {
            self.remote.write_url()?;
        }

        if self.remote.enabled && self.remote.timeout >= self.acquisition.period {
            return Err(DaqError::Configuration(format!(
                "remote.timeout ({:?}) must be shorter than acquisition.period ({:?})",
                self.remote.timeout, self.acquisition.period
            )));
        }

        let mut channel_ids = HashSet::new();
        for channel in &self.channels {
            if !channel.offset.is_finite() {
                return Err(DaqError::Configuration(format!(
                    "Channel '{}' has a non-finite offset",
                    channel.id
                )));
            }
            if !channel_ids.insert(channel.id.as_str()) {
                return Err(DaqError::Configuration(format!(
                    "Duplicate channel ID: {}",
                    channel.id
                )));
            }
        }

        let mut instrument_ids = HashSet::new();
        let mut claimed = HashSet::new();
        for instrument in &self.instruments {
            if !instrument_ids.insert(instrument.id()) {
                return Err(DaqError::Configuration(format!(
                    "Duplicate instrument ID: {}",
                    instrument.id()
                )));
            }
            for channel in instrument.channel_ids() {
                if !channel_ids.contains(channel) {
                    return Err(DaqError::Configuration(format!(
                        "Instrument '{}' reports unknown channel '{}'",
                        instrument.id(),
                        channel
                    )));
                }
                if !claimed.insert(channel) {
                    return Err(DaqError::Configuration(format!(
                        "Channel '{}' is reported by more than one instrument",
                        channel
                    )));
                }
            }
            if let InstrumentConfig::Max31865 {
                wires, mains_hz, ..
            } = instrument
            {
                if !(2..=4).contains(wires) {
                    return Err(DaqError::Configuration(format!(
                        "Instrument '{}': wires must be 2, 3 or 4",
                        instrument.id()
                    )));
                }
                if *mains_hz != 50 && *mains_hz != 60 {
                    return Err(DaqError::Configuration(format!(
                        "Instrument '{}': mains_hz must be 50 or 60",
                        instrument.id()
                    )));
                }
            }
        }

        Ok(())
    }

    /// Look up a channel by id
    pub fn channel(&self, id: &str) -> Option<&ChannelConfig> {
        self.channels.iter().find(|c| c.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    const SAMPLE: &str = r#"
        [application]
        name = "evapchamber"
        log_level = "info"

        [acquisition]
        period = "5s"
        read_timeout = "1s"

        [storage]
        staging_dir = "/tmp/scdata/pressures"
        output_dir = "data"
        window = "1h"

        [remote]
        base_url = "http://localhost:8086/"
        org = "lhep"
        bucket = "ArCLight_QA_QC"
        timeout = "2s"

        [[channels]]
        id = "sens-1"
        measurement = "pressure"

        [[channels]]
        id = "sens-2"
        measurement = "pressure"
        offset = -0.5

        [[instruments]]
        type = "tpg362"
        id = "gauge"
        port = "/dev/ttyUSB0"
        channels = ["sens-1", "sens-2"]
    "#;

    fn base_config() -> DaemonConfig {
        DaemonConfig {
            application: ApplicationConfig::default(),
            acquisition: AcquisitionConfig::default(),
            storage: StorageConfig::default(),
            remote: RemoteConfig {
                enabled: true,
                base_url: "http://localhost:8086".into(),
                org: "lhep".into(),
                bucket: "test".into(),
                token_env: "INFLUXDB_TOKEN".into(),
                timeout: Duration::from_secs(1),
            },
            channels: vec![ChannelConfig {
                id: "0".into(),
                measurement: "temperature".into(),
                tag_key: "sens".into(),
                offset: 0.0,
            }],
            instruments: vec![InstrumentConfig::Mock {
                id: "sim".into(),
                channels: vec!["0".into()],
                base: 20.0,
                amplitude: 1.0,
            }],
        }
    }

    #[test]
    fn test_load_from_file() {
        Jail::expect_with(|jail| {
            jail.create_file("daq.toml", SAMPLE)?;
            let config = DaemonConfig::load_from("daq.toml").map_err(|e| e.to_string())?;

            assert_eq!(config.application.name, "evapchamber");
            assert_eq!(config.acquisition.period, Duration::from_secs(5));
            assert_eq!(config.storage.window, Duration::from_secs(3600));
            assert_eq!(config.channels.len(), 2);
            assert_eq!(config.channels[1].offset, -0.5);
            assert_eq!(config.channels[0].tag_key, "sens");
            assert!(matches!(
                &config.instruments[0],
                InstrumentConfig::Tpg362 { baud_rate: 9600, .. }
            ));
            assert!(config.validate().is_ok());
            assert_eq!(
                config.remote.write_url().unwrap().as_str(),
                "http://localhost:8086/api/v2/write?org=lhep&bucket=ArCLight_QA_QC&precision=s"
            );
            Ok(())
        });
    }

    #[test]
    fn test_env_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file("daq.toml", SAMPLE)?;
            jail.set_env("CHAMBER_DAQ_APPLICATION__LOG_LEVEL", "debug");
            jail.set_env("CHAMBER_DAQ_REMOTE__BUCKET", "scratch");
            let config = DaemonConfig::load_from("daq.toml").map_err(|e| e.to_string())?;
            assert_eq!(config.application.log_level, "debug");
            assert_eq!(config.remote.bucket, "scratch");
            Ok(())
        });
    }

    #[test]
    fn test_token_from_env() {
        Jail::expect_with(|jail| {
            let mut config = base_config();
            config.remote.token_env = "CHAMBER_TEST_TOKEN".into();
            assert_eq!(config.remote.token_from_env(), None);
            jail.set_env("CHAMBER_TEST_TOKEN", "s3cret");
            assert_eq!(config.remote.token_from_env().as_deref(), Some("s3cret"));
            Ok(())
        });
    }

    #[test]
    fn test_config_validation() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn test_missing_remote_section_is_local_only() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "local.toml",
                r#"
                [[channels]]
                id = "0"
                measurement = "temperature"

                [[instruments]]
                type = "mock"
                id = "sim"
                channels = ["0"]
                "#,
            )?;
            let config = DaemonConfig::load_from("local.toml").map_err(|e| e.to_string())?;
            assert!(!config.remote.enabled);
            assert!(config.validate().is_ok());
            Ok(())
        });
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = base_config();
        config.application.log_level = "loud".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_timeout_must_be_shorter_than_period() {
        let mut config = base_config();
        config.remote.timeout = config.acquisition.period;
        assert!(config.validate().is_err());

        config.remote.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_only_plain_http_endpoint_accepted() {
        let mut config = base_config();
        config.remote.base_url = "https://127.0.0.1:8086".into();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("only http"), "{err}");

        config.remote.base_url = "localhost:8086".into();
        assert!(config.validate().is_err());

        config.remote.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_write_url_encodes_org_and_bucket() {
        let mut config = base_config();
        config.remote.base_url = "http://db.lab:8086/influx/".into();
        config.remote.org = "lhep bern".into();
        config.remote.bucket = "qa&qc=1".into();
        assert_eq!(
            config.remote.write_url().unwrap().as_str(),
            "http://db.lab:8086/influx/api/v2/write?org=lhep+bern&bucket=qa%26qc%3D1&precision=s"
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_duplicate_channel_ids() {
        let mut config = base_config();
        config.channels.push(config.channels[0].clone());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_instrument_channel_must_be_configured() {
        let mut config = base_config();
        config.instruments.push(InstrumentConfig::Mock {
            id: "other".into(),
            channels: vec!["missing".into()],
            base: 0.0,
            amplitude: 0.0,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_channel_claimed_twice() {
        let mut config = base_config();
        config.instruments.push(InstrumentConfig::Mock {
            id: "twin".into(),
            channels: vec!["0".into()],
            base: 0.0,
            amplitude: 0.0,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rtd_wiring_checked() {
        let mut config = base_config();
        config.instruments = vec![InstrumentConfig::Max31865 {
            id: "rtd0".into(),
            device: "/dev/spidev0.0".into(),
            channel: "0".into(),
            reference_ohms: 430.0,
            nominal_ohms: 100.0,
            wires: 5,
            mains_hz: 50,
        }];
        assert!(config.validate().is_err());
    }
}
