//! Value normalizer.
//!
//! Pure conversion from raw device output to a calibrated, classified value.
//! Rules are applied in this order:
//!
//! 1. trimmed, case-folded `or` → [`Validity::SentinelOverrange`]
//! 2. trimmed, case-folded `ur` → [`Validity::SentinelUnderrange`]
//! 3. empty or `---` → [`Validity::Unparseable`]
//! 4. numeric parse; success adds the channel offset
//!
//! A non-zero status code overrides all of the above with
//! [`Validity::DeviceFault`]. Sentinels never get the offset.

use crate::reading::{
    NormalizedSample, RawValue, Reading, Validity, OVERRANGE_VALUE, UNDERRANGE_VALUE,
};

const OVERRANGE_TOKEN: &str = "or";
const UNDERRANGE_TOKEN: &str = "ur";
const PLACEHOLDER_TOKENS: &[&str] = &["", "---"];

/// Classification plus value, before it is stamped with channel and time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Normalized {
    /// Classification.
    pub validity: Validity,
    /// Calibrated value, present only for valid and sentinel classes.
    pub value: Option<f64>,
}

impl Normalized {
    const fn with_value(validity: Validity, value: f64) -> Self {
        Self {
            validity,
            value: Some(value),
        }
    }

    const fn without_value(validity: Validity) -> Self {
        Self {
            validity,
            value: None,
        }
    }
}

/// Classify a raw text field.
pub fn normalize(raw: &str, status_code: i32, offset: f64) -> Normalized {
    if status_code != 0 {
        return Normalized::without_value(Validity::DeviceFault);
    }

    let folded = raw.trim().to_lowercase();
    if folded == OVERRANGE_TOKEN {
        return Normalized::with_value(Validity::SentinelOverrange, OVERRANGE_VALUE);
    }
    if folded == UNDERRANGE_TOKEN {
        return Normalized::with_value(Validity::SentinelUnderrange, UNDERRANGE_VALUE);
    }
    if PLACEHOLDER_TOKENS.contains(&folded.as_str()) {
        return Normalized::without_value(Validity::Unparseable);
    }

    match folded.parse::<f64>() {
        Ok(parsed) => normalize_number(parsed, offset),
        Err(_) => Normalized::without_value(Validity::Unparseable),
    }
}

/// Classify a value the driver already converted.
pub fn normalize_number(value: f64, offset: f64) -> Normalized {
    let corrected = value + offset;
    if corrected.is_finite() {
        Normalized::with_value(Validity::Valid, corrected)
    } else {
        Normalized::without_value(Validity::Unparseable)
    }
}

/// Normalize a [`Reading`] and stamp it with its acquisition time.
pub fn normalize_reading(reading: &Reading, offset: f64, timestamp: i64) -> NormalizedSample {
    let normalized = match &reading.raw_value {
        RawValue::Text(text) => normalize(text, reading.status_code, offset),
        RawValue::Number(_) if reading.status_code != 0 => {
            Normalized::without_value(Validity::DeviceFault)
        }
        RawValue::Number(value) => normalize_number(*value, offset),
    };

    NormalizedSample {
        channel_id: reading.channel_id.clone(),
        timestamp,
        value: normalized.value,
        validity: normalized.validity,
        status_code: reading.status_code,
        raw: reading.raw_value.to_string(),
    }
}
