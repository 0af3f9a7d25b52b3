//! InfluxDB line protocol formatting.
//!
//! One line per sample:
//!
//! ```text
//! pressure,sens=sens-1 value=0.00123 1739110800
//! ```
//!
//! Timestamps are whole seconds; the write URL carries `precision=s`.

use crate::reading::{format_value, NormalizedSample};

/// Field key used for every sample
pub const FIELD_KEY: &str = "value";

/// Measurement name and tag key for one channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesKey {
    /// Measurement name
    pub measurement: String,
    /// Tag key; the tag value is the channel id
    pub tag_key: String,
}

impl SeriesKey {
    /// Create a series key
    pub fn new(measurement: impl Into<String>, tag_key: impl Into<String>) -> Self {
        Self {
            measurement: measurement.into(),
            tag_key: tag_key.into(),
        }
    }

    /// Format one sample; `None` when the sample carries no value
    pub fn line(&self, sample: &NormalizedSample) -> Option<String> {
        let value = sample.value?;
        Some(format_line(
            &self.measurement,
            &self.tag_key,
            &sample.channel_id,
            value,
            sample.timestamp,
        ))
    }
}

/// Build `<measurement>,<tag_key>=<tag_value> value=<value> <timestamp>`
pub fn format_line(measurement: &str, tag_key: &str, tag_value: &str, value: f64, timestamp: i64) -> String {
    format!(
        "{},{}={} {}={} {}",
        escape_measurement(measurement),
        escape_key(tag_key),
        escape_key(tag_value),
        FIELD_KEY,
        format_value(value),
        timestamp
    )
}

fn escape_measurement(text: &str) -> String {
    escape(text, &[',', ' '])
}

fn escape_key(text: &str) -> String {
    escape(text, &[',', '=', ' '])
}

fn escape(text: &str, special: &[char]) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if special.contains(&c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reading::Validity;

    #[test]
    fn test_basic_line() {
        assert_eq!(
            format_line("temperature", "sens", "0", 23.5, 1_739_110_800),
            "temperature,sens=0 value=23.5 1739110800"
        );
        assert_eq!(
            format_line("pressure", "sens", "sens-1", 1000.0, 1),
            "pressure,sens=sens-1 value=1000.0 1"
        );
    }

    #[test]
    fn test_escaping() {
        assert_eq!(
            format_line("chamber pressure", "gauge id", "a,b=c", -1.0, 2),
            r"chamber\ pressure,gauge\ id=a\,b\=c value=-1.0 2"
        );
    }

    #[test]
    fn test_sample_without_value_has_no_line() {
        let key = SeriesKey::new("pressure", "sens");
        let mut sample = NormalizedSample {
            channel_id: "sens-2".into(),
            timestamp: 10,
            value: None,
            validity: Validity::Unparseable,
            status_code: 0,
            raw: "---".into(),
        };
        assert_eq!(key.line(&sample), None);

        sample.value = Some(-1.0);
        sample.validity = Validity::SentinelUnderrange;
        assert_eq!(
            key.line(&sample).as_deref(),
            Some("pressure,sens=sens-2 value=-1.0 10")
        );
    }
}
