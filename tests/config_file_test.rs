//! The shipped configuration file loads and validates.

use chamber_daq::config::{DaemonConfig, InstrumentConfig};
use std::time::Duration;

#[test]
fn test_shipped_config_is_valid() {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config/chamber_daq.toml");
    let config = DaemonConfig::load_from(path).unwrap();
    config.validate().unwrap();

    assert_eq!(config.acquisition.period, Duration::from_secs(5));
    assert_eq!(config.storage.window, Duration::from_secs(3600));
    assert!(config.remote.timeout < config.acquisition.period);
    assert_eq!(config.channels.len(), 3);
    assert!(matches!(
        config.instruments.first(),
        Some(InstrumentConfig::Tpg362 { baud_rate: 9600, .. })
    ));
    assert_eq!(config.channel("sens-2").map(|c| c.measurement.as_str()), Some("pressure"));
}
