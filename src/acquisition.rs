//! Acquisition loop.
//!
//! The only component with scheduling authority. On every tick it:
//!
//! 1. rotates any log window whose duration has elapsed (and retries opening a
//!    window for loggers running degraded)
//! 2. polls each instrument once, bounded by the read timeout
//! 3. normalizes every reading with its channel's offset
//! 4. appends every sample to that channel's logger
//! 5. hands publishable samples to the publisher, unless cancellation has
//!    been observed
//!
//! # Architecture
//!
//! ```text
//! Readable ──Reading──▶ normalize ──NormalizedSample──┬──▶ RollingLogger (sync, ordered)
//!                                                     └──▶ SamplePublisher (spawned, unordered)
//! ```
//!
//! Cancellation is checked only between ticks and before each publish; a tick
//! that has started always finishes its appends. Ticks never overlap: a slow
//! tick delays the next one instead of queueing a burst.

use crate::clock::{Clock, SystemClock};
use crate::config::DaemonConfig;
use crate::data::{FinalizeOutcome, RollingLogConfig, RollingLogger};
use crate::error::DaqError;
use crate::hardware::Readable;
use crate::normalize::normalize_reading;
use crate::publish::SamplePublisher;
use crate::reading::NormalizedSample;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Counters reported when the loop stops
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    /// Completed ticks
    pub ticks: u64,
    /// Normalized samples (valid or not)
    pub samples: u64,
    /// Samples handed to the publisher
    pub published: u64,
    /// Samples written to a local window
    pub persisted: u64,
    /// Instrument reads that failed or timed out
    pub read_failures: u64,
    /// Every window sealed during the run, across all channels
    pub finalized: Vec<FinalizeOutcome>,
}

struct ChannelState {
    offset: f64,
    logger: Option<RollingLogger>,
}

/// Periodic sampler driving sensors, loggers and the publisher
pub struct AcquisitionLoop {
    period: Duration,
    read_timeout: Duration,
    sensors: Vec<Box<dyn Readable>>,
    channels: BTreeMap<String, ChannelState>,
    publisher: Arc<dyn SamplePublisher>,
    clock: Arc<dyn Clock>,
    summary: RunSummary,
}

impl AcquisitionLoop {
    /// Build a loop from configuration
    ///
    /// One rolling logger is created per configured channel when local storage
    /// is enabled. Windows are not opened until [`AcquisitionLoop::start`].
    pub fn new(
        config: &DaemonConfig,
        sensors: Vec<Box<dyn Readable>>,
        publisher: Arc<dyn SamplePublisher>,
    ) -> Self {
        let channels = config
            .channels
            .iter()
            .map(|channel| {
                let logger = config.storage.enabled.then(|| {
                    RollingLogger::new(
                        &channel.id,
                        RollingLogConfig::for_channel(
                            &config.storage.staging_dir,
                            &config.storage.output_dir,
                            &channel.id,
                            config.storage.window,
                        ),
                    )
                });
                (
                    channel.id.clone(),
                    ChannelState {
                        offset: channel.offset,
                        logger,
                    },
                )
            })
            .collect();

        Self {
            period: config.acquisition.period,
            read_timeout: config.acquisition.read_timeout,
            sensors,
            channels,
            publisher,
            clock: Arc::new(SystemClock),
            summary: RunSummary::default(),
        }
    }

    /// Replace the wall clock (tests, replay)
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Counters so far
    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    /// Channels currently running without local persistence
    pub fn degraded_channels(&self) -> Vec<&str> {
        self.channels
            .iter()
            .filter(|(_, state)| state.logger.as_ref().is_some_and(RollingLogger::is_degraded))
            .map(|(id, _)| id.as_str())
            .collect()
    }

    /// Configure every instrument and open the first windows
    pub async fn start(&mut self) {
        for sensor in &self.sensors {
            if let Err(e) = sensor.configure().await {
                tracing::warn!(instrument = sensor.id(), error = %e, "Device setup failed; continuing");
            }
        }

        let now = self.clock.now();
        for (id, state) in &mut self.channels {
            if let Some(logger) = state.logger.as_mut() {
                if let Err(e) = logger.open(now) {
                    tracing::warn!(
                        channel = %id,
                        error = %e,
                        "Cannot open log window; samples will only be published"
                    );
                }
            }
        }
    }

    /// Run one acquisition cycle
    pub async fn tick(&mut self, cancel: &CancellationToken) {
        let now = self.clock.now();
        for (id, state) in &mut self.channels {
            let Some(logger) = state.logger.as_mut() else {
                continue;
            };
            let was_degraded = logger.is_degraded();
            match logger.maybe_rotate(now) {
                Ok(Some(sealed)) => {
                    tracing::debug!(channel = %id, path = %sealed.path().display(), "Window rotated");
                }
                Ok(None) if was_degraded => {
                    tracing::info!(channel = %id, "Local logging recovered");
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(channel = %id, error = %e, "Local logging unavailable");
                }
            }
        }

        for sensor in &self.sensors {
            let readings = match tokio::time::timeout(self.read_timeout, sensor.read()).await {
                Ok(Ok(readings)) => readings,
                Ok(Err(e)) => {
                    self.summary.read_failures += 1;
                    let err = DaqError::Transport {
                        instrument: sensor.id().to_string(),
                        message: format!("{e:#}"),
                    };
                    tracing::warn!(error = %err, "Read failed; skipping this tick");
                    continue;
                }
                Err(_) => {
                    self.summary.read_failures += 1;
                    let err = DaqError::Transport {
                        instrument: sensor.id().to_string(),
                        message: format!("no answer within {:?}", self.read_timeout),
                    };
                    tracing::warn!(error = %err, "Read timed out; skipping this tick");
                    continue;
                }
            };

            let timestamp = self.clock.now();
            for reading in readings {
                let Some(state) = self.channels.get_mut(&reading.channel_id) else {
                    tracing::warn!(
                        instrument = sensor.id(),
                        channel = %reading.channel_id,
                        "Reading for unconfigured channel dropped"
                    );
                    continue;
                };

                let sample = normalize_reading(&reading, state.offset, timestamp);
                self.summary.samples += 1;
                log_sample(&sample);

                if let Some(logger) = state.logger.as_mut() {
                    match logger.append(&sample) {
                        Ok(true) => self.summary.persisted += 1,
                        Ok(false) => {}
                        Err(e) => tracing::warn!(
                            channel = %sample.channel_id,
                            error = %e,
                            "Append failed; local logging degraded until next tick"
                        ),
                    }
                }

                if sample.is_publishable() && !cancel.is_cancelled() {
                    self.publisher.publish(&sample);
                    self.summary.published += 1;
                }
            }
        }

        self.summary.ticks += 1;
    }

    /// Finalize windows, release instruments and drain in-flight publishes
    pub async fn finish(mut self) -> RunSummary {
        for (id, state) in &mut self.channels {
            if let Some(logger) = state.logger.as_mut() {
                logger.close_and_finalize();
                self.summary.finalized.extend_from_slice(logger.finalized());
                tracing::debug!(channel = %id, windows = logger.finalized().len(), "Logger closed");
            }
        }

        for sensor in &self.sensors {
            if let Err(e) = sensor.release().await {
                tracing::warn!(instrument = sensor.id(), error = %e, "Release failed");
            }
        }

        self.publisher.shutdown().await;

        tracing::info!(
            ticks = self.summary.ticks,
            samples = self.summary.samples,
            published = self.summary.published,
            persisted = self.summary.persisted,
            read_failures = self.summary.read_failures,
            windows = self.summary.finalized.len(),
            "Acquisition stopped"
        );
        self.summary
    }

    /// Sample until `cancel` fires, then shut down in order
    pub async fn run(mut self, cancel: CancellationToken) -> RunSummary {
        self.start().await;

        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            period = ?self.period,
            instruments = self.sensors.len(),
            channels = self.channels.len(),
            "Acquisition started"
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = interval.tick() => self.tick(&cancel).await,
            }
        }

        tracing::info!("Cancellation observed; finalizing");
        self.finish().await
    }
}

fn log_sample(sample: &NormalizedSample) {
    match sample.value {
        Some(value) => tracing::info!(
            channel = %sample.channel_id,
            value,
            validity = ?sample.validity,
            status = sample.status_code,
            "Sample"
        ),
        None => tracing::info!(
            channel = %sample.channel_id,
            raw = %sample.raw,
            validity = ?sample.validity,
            status = sample.status_code,
            "Sample INVALID"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::{AcquisitionConfig, ApplicationConfig, ChannelConfig, RemoteConfig, StorageConfig};
    use crate::hardware::mock::{ScriptedRead, ScriptedSensor};
    use crate::publish::RecordingPublisher;
    use crate::reading::{Reading, Validity};
    use tempfile::TempDir;

    fn config(root: &TempDir, window_secs: u64) -> DaemonConfig {
        DaemonConfig {
            application: ApplicationConfig::default(),
            acquisition: AcquisitionConfig {
                period: Duration::from_millis(10),
                read_timeout: Duration::from_millis(50),
            },
            storage: StorageConfig {
                enabled: true,
                staging_dir: root.path().join("staging"),
                output_dir: root.path().join("out"),
                window: Duration::from_secs(window_secs),
            },
            remote: RemoteConfig::default(),
            channels: vec![
                ChannelConfig {
                    id: "sens-1".into(),
                    measurement: "pressure".into(),
                    tag_key: "sens".into(),
                    offset: 0.0,
                },
                ChannelConfig {
                    id: "sens-2".into(),
                    measurement: "pressure".into(),
                    tag_key: "sens".into(),
                    offset: 0.0,
                },
            ],
            instruments: vec![],
        }
    }

    #[tokio::test]
    async fn test_failed_instrument_does_not_skip_others() {
        let root = TempDir::new().unwrap();
        let publisher = RecordingPublisher::new();
        let sensors: Vec<Box<dyn Readable>> = vec![
            Box::new(ScriptedSensor::unreachable("dead", vec!["sens-1".into()])),
            Box::new(ScriptedSensor::constant("alive", Reading::new("sens-2", "5.0E-03", 0))),
        ];
        let clock = ManualClock::new(1_000);
        let mut daq = AcquisitionLoop::new(&config(&root, 3600), sensors, Arc::new(publisher.clone()))
            .with_clock(Arc::new(clock));
        let cancel = CancellationToken::new();

        daq.start().await;
        daq.tick(&cancel).await;
        daq.tick(&cancel).await;

        let summary = daq.finish().await;
        assert_eq!(summary.ticks, 2);
        assert_eq!(summary.read_failures, 2);
        assert_eq!(summary.samples, 2);
        assert_eq!(publisher.samples().len(), 2);
        assert!(publisher.samples().iter().all(|s| s.channel_id == "sens-2"));
    }

    #[tokio::test]
    async fn test_slow_instrument_times_out() {
        struct Stuck;

        #[async_trait::async_trait]
        impl Readable for Stuck {
            fn id(&self) -> &str {
                "stuck"
            }
            fn channels(&self) -> Vec<String> {
                vec!["sens-1".into()]
            }
            async fn read(&self) -> anyhow::Result<Vec<Reading>> {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(vec![])
            }
        }

        let root = TempDir::new().unwrap();
        let publisher = RecordingPublisher::new();
        let mut daq =
            AcquisitionLoop::new(&config(&root, 3600), vec![Box::new(Stuck)], Arc::new(publisher));
        daq.start().await;
        daq.tick(&CancellationToken::new()).await;
        assert_eq!(daq.summary().read_failures, 1);
        daq.finish().await;
    }

    #[tokio::test]
    async fn test_unconfigured_channel_dropped() {
        let root = TempDir::new().unwrap();
        let publisher = RecordingPublisher::new();
        let sensors: Vec<Box<dyn Readable>> = vec![Box::new(ScriptedSensor::new(
            "gauge",
            vec!["sens-9".into()],
            vec![ScriptedRead::Readings(vec![Reading::new("sens-9", "1.0", 0)])],
        ))];
        let mut daq = AcquisitionLoop::new(&config(&root, 3600), sensors, Arc::new(publisher.clone()));
        daq.start().await;
        daq.tick(&CancellationToken::new()).await;
        let summary = daq.finish().await;
        assert_eq!(summary.samples, 0);
        assert!(publisher.samples().is_empty());
    }

    #[tokio::test]
    async fn test_no_publish_after_cancellation() {
        let root = TempDir::new().unwrap();
        let publisher = RecordingPublisher::new();
        let sensors: Vec<Box<dyn Readable>> = vec![Box::new(ScriptedSensor::constant(
            "gauge",
            Reading::new("sens-1", "OR", 0),
        ))];
        let mut daq = AcquisitionLoop::new(&config(&root, 3600), sensors, Arc::new(publisher.clone()))
            .with_clock(Arc::new(ManualClock::new(500)));
        let cancel = CancellationToken::new();
        daq.start().await;
        cancel.cancel();
        daq.tick(&cancel).await;
        let summary = daq.finish().await;

        // The in-flight tick still persists its sample
        assert_eq!(summary.persisted, 1);
        assert!(publisher.samples().is_empty());
        let logged = std::fs::read_to_string(root.path().join("out/sens-1/500.txt")).unwrap();
        assert_eq!(logged, "500\tOR\n");
    }

    #[tokio::test]
    async fn test_storage_disabled_is_publish_only() {
        let root = TempDir::new().unwrap();
        let mut cfg = config(&root, 3600);
        cfg.storage.enabled = false;
        let publisher = RecordingPublisher::new();
        let sensors: Vec<Box<dyn Readable>> = vec![Box::new(ScriptedSensor::constant(
            "gauge",
            Reading::new("sens-1", "2.0", 0),
        ))];
        let mut daq = AcquisitionLoop::new(&cfg, sensors, Arc::new(publisher.clone()));
        daq.start().await;
        daq.tick(&CancellationToken::new()).await;
        let summary = daq.finish().await;

        assert_eq!(summary.persisted, 0);
        assert_eq!(publisher.samples()[0].validity, Validity::Valid);
        assert!(!root.path().join("staging").exists());
    }
}
