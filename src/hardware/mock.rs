//! Mock Hardware Implementations
//!
//! Simulated instruments for running the daemon without a gauge controller or
//! RTD bridge attached, and for driving the acquisition loop in tests.
//!
//! # Available Mocks
//!
//! - `MockSensor` - sine-wave readings around a base value on every channel
//! - `ScriptedSensor` - replays a fixed sequence of read outcomes

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::hardware::capabilities::Readable;
use crate::reading::Reading;

// =============================================================================
// MockSensor - Simulated Instrument
// =============================================================================

/// Mock instrument producing a slow sine wave
///
/// Each read advances the phase by one step; all channels report the same
/// value with status 0.
///
/// # Example
///
/// ```
/// use chamber_daq::hardware::mock::MockSensor;
/// use chamber_daq::hardware::Readable;
///
/// # tokio_test::block_on(async {
/// let sensor = MockSensor::new("sim", vec!["0".into()], 21.0, 0.5);
/// let readings = sensor.read().await.unwrap();
/// assert_eq!(readings.len(), 1);
/// # })
/// ```
pub struct MockSensor {
    id: String,
    channels: Vec<String>,
    base: f64,
    amplitude: f64,
    step: AtomicU64,
}

impl MockSensor {
    /// Create a mock instrument
    pub fn new(id: impl Into<String>, channels: Vec<String>, base: f64, amplitude: f64) -> Self {
        Self {
            id: id.into(),
            channels,
            base,
            amplitude,
            step: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl Readable for MockSensor {
    fn id(&self) -> &str {
        &self.id
    }

    fn channels(&self) -> Vec<String> {
        self.channels.clone()
    }

    async fn read(&self) -> Result<Vec<Reading>> {
        let step = self.step.fetch_add(1, Ordering::Relaxed) as f64;
        let value = self.base + self.amplitude * (step / 60.0 * std::f64::consts::TAU).sin();
        Ok(self
            .channels
            .iter()
            .map(|channel| Reading::new(channel.clone(), value, 0))
            .collect())
    }
}

// =============================================================================
// ScriptedSensor - Replay Instrument
// =============================================================================

/// Outcome of one scripted read
#[derive(Debug, Clone)]
pub enum ScriptedRead {
    /// Readings returned as-is
    Readings(Vec<Reading>),
    /// Transport failure with message
    Fail(String),
}

/// Instrument that replays a fixed script of read outcomes
///
/// Once the script is exhausted the last outcome repeats. Counters are shared
/// through [`ScriptedSensorProbe`] so tests can observe the sensor after it has
/// been moved into the acquisition loop.
pub struct ScriptedSensor {
    id: String,
    channels: Vec<String>,
    script: Mutex<VecDeque<ScriptedRead>>,
    last: Mutex<Option<ScriptedRead>>,
    probe: ScriptedSensorProbe,
}

/// Shared view on a [`ScriptedSensor`]'s call counters
#[derive(Debug, Clone, Default)]
pub struct ScriptedSensorProbe {
    reads: Arc<AtomicU64>,
    configured: Arc<AtomicBool>,
    released: Arc<AtomicBool>,
}

impl ScriptedSensorProbe {
    /// Number of `read` calls so far
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }

    /// Whether `configure` was called
    pub fn configured(&self) -> bool {
        self.configured.load(Ordering::SeqCst)
    }

    /// Whether `release` was called
    pub fn released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

impl ScriptedSensor {
    /// Create a scripted instrument
    pub fn new(id: impl Into<String>, channels: Vec<String>, script: Vec<ScriptedRead>) -> Self {
        Self {
            id: id.into(),
            channels,
            script: Mutex::new(script.into()),
            last: Mutex::new(None),
            probe: ScriptedSensorProbe::default(),
        }
    }

    /// Shorthand for a single-channel sensor that always returns the same reading
    pub fn constant(id: impl Into<String>, reading: Reading) -> Self {
        let channels = vec![reading.channel_id.clone()];
        Self::new(id, channels, vec![ScriptedRead::Readings(vec![reading])])
    }

    /// Shorthand for a sensor whose transport is always down
    pub fn unreachable(id: impl Into<String>, channels: Vec<String>) -> Self {
        Self::new(
            id,
            channels,
            vec![ScriptedRead::Fail("device not responding".into())],
        )
    }

    /// Counter handle that stays valid after the sensor is moved
    pub fn probe(&self) -> ScriptedSensorProbe {
        self.probe.clone()
    }
}

#[async_trait]
impl Readable for ScriptedSensor {
    fn id(&self) -> &str {
        &self.id
    }

    fn channels(&self) -> Vec<String> {
        self.channels.clone()
    }

    async fn read(&self) -> Result<Vec<Reading>> {
        self.probe.reads.fetch_add(1, Ordering::SeqCst);

        let next = {
            let mut script = self
                .script
                .lock()
                .map_err(|_| anyhow!("script lock poisoned"))?;
            script.pop_front()
        };
        let mut last = self
            .last
            .lock()
            .map_err(|_| anyhow!("script lock poisoned"))?;
        if let Some(outcome) = next {
            *last = Some(outcome);
        }

        match last.as_ref() {
            Some(ScriptedRead::Readings(readings)) => Ok(readings.clone()),
            Some(ScriptedRead::Fail(message)) => Err(anyhow!("{}: {}", self.id, message)),
            None => Ok(Vec::new()),
        }
    }

    async fn configure(&self) -> Result<()> {
        self.probe.configured.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn release(&self) -> Result<()> {
        self.probe.released.store(true, Ordering::SeqCst);
        Ok(())
    }
}
