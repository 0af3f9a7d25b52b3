//! Sample data types shared by the drivers, the logger and the publisher.
//!
//! A [`Reading`] is what an instrument hands back for one channel on one tick.
//! The normalizer turns it into a [`NormalizedSample`], which is the only type
//! the logger and the publisher ever see.

use std::fmt;

/// Physical value substituted when a gauge reports overrange (mbar).
pub const OVERRANGE_VALUE: f64 = 1000.0;

/// Physical value substituted when a gauge reports underrange (mbar).
pub const UNDERRANGE_VALUE: f64 = -1.0;

/// Raw device output for a single channel.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    /// ASCII field as sent by the device (e.g. `"1.2300E-03"`, `"OR"`).
    Text(String),
    /// Value already converted by the driver (e.g. RTD temperature in °C).
    Number(f64),
}

impl fmt::Display for RawValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawValue::Text(text) => f.write_str(text.trim()),
            RawValue::Number(value) => write!(f, "{value:?}"),
        }
    }
}

impl From<&str> for RawValue {
    fn from(text: &str) -> Self {
        RawValue::Text(text.to_string())
    }
}

impl From<String> for RawValue {
    fn from(text: String) -> Self {
        RawValue::Text(text)
    }
}

impl From<f64> for RawValue {
    fn from(value: f64) -> Self {
        RawValue::Number(value)
    }
}

/// One raw sample from one channel, produced once per tick.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    /// Channel identifier, matched against the configured channels.
    pub channel_id: String,
    /// Unconverted device output.
    pub raw_value: RawValue,
    /// Device status; 0 means the instrument certifies the value.
    pub status_code: i32,
}

impl Reading {
    /// Create a reading.
    pub fn new(channel_id: impl Into<String>, raw_value: impl Into<RawValue>, status_code: i32) -> Self {
        Self {
            channel_id: channel_id.into(),
            raw_value: raw_value.into(),
            status_code,
        }
    }
}

/// Classification of a normalized value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Validity {
    /// Parsed measurement with offset applied.
    Valid,
    /// Device reported overrange; value is [`OVERRANGE_VALUE`].
    SentinelOverrange,
    /// Device reported underrange; value is [`UNDERRANGE_VALUE`].
    SentinelUnderrange,
    /// Empty, placeholder or non-numeric field.
    Unparseable,
    /// Non-zero device status code.
    DeviceFault,
}

impl Validity {
    /// Whether samples of this class may be forwarded to the remote store.
    pub fn is_publishable(self) -> bool {
        matches!(
            self,
            Validity::Valid | Validity::SentinelOverrange | Validity::SentinelUnderrange
        )
    }
}

/// A reading after calibration and classification.
///
/// `value` is `Some` exactly when `validity` is `Valid` or one of the sentinels.
/// Construct through [`crate::normalize::normalize_reading`] to keep that true.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedSample {
    /// Channel identifier.
    pub channel_id: String,
    /// Acquisition time in whole UNIX seconds.
    pub timestamp: i64,
    /// Calibrated physical value, if any.
    pub value: Option<f64>,
    /// Classification.
    pub validity: Validity,
    /// Device status code, kept for local diagnostics.
    pub status_code: i32,
    /// Trimmed raw device text, kept for local diagnostics.
    pub raw: String,
}

impl NormalizedSample {
    /// Whether the publisher should see this sample.
    pub fn is_publishable(&self) -> bool {
        self.validity.is_publishable() && self.value.is_some()
    }

    /// Value or marker field for the local log line.
    pub fn local_field(&self) -> String {
        match (self.validity, self.value) {
            (Validity::Valid, Some(value)) => format_value(value),
            (Validity::SentinelOverrange, _) => "OR".to_string(),
            (Validity::SentinelUnderrange, _) => "UR".to_string(),
            (Validity::DeviceFault, _) => {
                let raw: String = self
                    .raw
                    .chars()
                    .map(|c| if c.is_whitespace() { '_' } else { c })
                    .collect();
                format!("FAULT:{}:{}", self.status_code, raw)
            }
            _ => "INVALID".to_string(),
        }
    }

    /// Full local log line, without trailing newline.
    pub fn local_line(&self) -> String {
        format!("{}\t{}", self.timestamp, self.local_field())
    }
}

/// Shortest text that round-trips the value, always with a decimal point or
/// exponent so line-protocol readers keep it a float.
pub fn format_value(value: f64) -> String {
    format!("{value:?}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(validity: Validity, value: Option<f64>) -> NormalizedSample {
        NormalizedSample {
            channel_id: "sens-1".into(),
            timestamp: 1_739_110_800,
            value,
            validity,
            status_code: 0,
            raw: "23.10".into(),
        }
    }

    #[test]
    fn publishable_classes() {
        assert!(Validity::Valid.is_publishable());
        assert!(Validity::SentinelOverrange.is_publishable());
        assert!(Validity::SentinelUnderrange.is_publishable());
        assert!(!Validity::Unparseable.is_publishable());
        assert!(!Validity::DeviceFault.is_publishable());
    }

    #[test]
    fn local_markers() {
        assert_eq!(
            sample(Validity::Valid, Some(23.5)).local_line(),
            "1739110800\t23.5"
        );
        assert_eq!(
            sample(Validity::SentinelOverrange, Some(OVERRANGE_VALUE)).local_field(),
            "OR"
        );
        assert_eq!(
            sample(Validity::SentinelUnderrange, Some(UNDERRANGE_VALUE)).local_field(),
            "UR"
        );
        assert_eq!(sample(Validity::Unparseable, None).local_field(), "INVALID");

        let mut fault = sample(Validity::DeviceFault, None);
        fault.status_code = 3;
        fault.raw = "1.2 E-3".into();
        assert_eq!(fault.local_field(), "FAULT:3:1.2_E-3");
    }

    #[test]
    fn format_value_keeps_float_shape() {
        assert_eq!(format_value(1000.0), "1000.0");
        assert_eq!(format_value(-1.0), "-1.0");
        assert_eq!(format_value(23.5), "23.5");
    }
}
