//! Remote publishing of normalized samples.
//!
//! [`SamplePublisher::publish`] never blocks the caller and never reports
//! failure; delivery is best-effort. The acquisition loop decides *whether* a
//! sample is published, the publisher only decides *how*.

pub mod influx;
pub mod line_protocol;

pub use influx::InfluxPublisher;

use crate::reading::NormalizedSample;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

/// Sink for publishable samples
#[async_trait]
pub trait SamplePublisher: Send + Sync {
    /// Dispatch one sample without waiting for delivery
    fn publish(&self, sample: &NormalizedSample);

    /// Stop accepting samples and wait for dispatched ones to settle
    async fn shutdown(&self) {}
}

/// Publisher used when the remote store is disabled
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPublisher;

#[async_trait]
impl SamplePublisher for NoopPublisher {
    fn publish(&self, _sample: &NormalizedSample) {}
}

/// In-memory publisher that records every sample it is handed
#[derive(Debug, Default, Clone)]
pub struct RecordingPublisher {
    samples: Arc<Mutex<Vec<NormalizedSample>>>,
}

impl RecordingPublisher {
    /// Create an empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything published so far
    pub fn samples(&self) -> Vec<NormalizedSample> {
        self.samples
            .lock()
            .map(|samples| samples.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl SamplePublisher for RecordingPublisher {
    fn publish(&self, sample: &NormalizedSample) {
        if let Ok(mut samples) = self.samples.lock() {
            samples.push(sample.clone());
        }
    }
}

#[async_trait]
impl<P: SamplePublisher + ?Sized> SamplePublisher for Arc<P> {
    fn publish(&self, sample: &NormalizedSample) {
        (**self).publish(sample);
    }

    async fn shutdown(&self) {
        (**self).shutdown().await;
    }
}
