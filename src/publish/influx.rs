//! Fire-and-forget InfluxDB v2 writer over HTTP.
//!
//! Every publish becomes one spawned task that POSTs a single line to
//! `/api/v2/write`. Tasks are tracked only so shutdown can wait for them; the
//! acquisition loop never awaits a write. Failures are logged at warn and
//! dropped: there is no retry and no backlog.

use super::line_protocol::SeriesKey;
use super::SamplePublisher;
use crate::config::{ChannelConfig, RemoteConfig};
use crate::error::{AppResult, DaqError};
use crate::reading::NormalizedSample;
use async_trait::async_trait;
use hyper::client::HttpConnector;
use hyper::header::{AUTHORIZATION, CONTENT_TYPE};
use hyper::{Body, Client, Method, Request, Uri};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::task::TaskTracker;

/// HTTP line-protocol publisher
pub struct InfluxPublisher {
    inner: Arc<Inner>,
    series: HashMap<String, SeriesKey>,
    tracker: TaskTracker,
}

struct Inner {
    client: Client<HttpConnector, Body>,
    uri: Uri,
    authorization: Option<String>,
    timeout: Duration,
}

impl InfluxPublisher {
    /// Build a publisher for the configured channels
    ///
    /// `token` is the credential read once from the environment at startup.
    pub fn new(remote: &RemoteConfig, token: Option<String>, channels: &[ChannelConfig]) -> AppResult<Self> {
        let url = remote.write_url()?;
        let uri: Uri = url
            .as_str()
            .parse()
            .map_err(|e| DaqError::Configuration(format!("Invalid remote URL '{}': {}", url, e)))?;

        if token.is_none() {
            tracing::warn!(
                env = %remote.token_env,
                "No remote API token in environment; writes will be unauthenticated"
            );
        }

        let series = channels
            .iter()
            .map(|c| (c.id.clone(), SeriesKey::new(&c.measurement, &c.tag_key)))
            .collect();

        Ok(Self {
            inner: Arc::new(Inner {
                client: Client::new(),
                uri,
                authorization: token.map(|t| format!("Token {t}")),
                timeout: remote.timeout,
            }),
            series,
            tracker: TaskTracker::new(),
        })
    }

    /// Send one line and wait for the response, bounded by the timeout
    pub async fn send_line(&self, line: String) -> AppResult<()> {
        self.inner.send(line).await
    }

    /// Number of writes still in flight
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }
}

impl Inner {
    async fn send(&self, line: String) -> AppResult<()> {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(self.uri.clone())
            .header(CONTENT_TYPE, "text/plain; charset=utf-8");
        if let Some(auth) = &self.authorization {
            builder = builder.header(AUTHORIZATION, auth.as_str());
        }
        let request = builder
            .body(Body::from(line))
            .map_err(|e| DaqError::RemoteDelivery(e.to_string()))?;

        let response = tokio::time::timeout(self.timeout, async {
            let response = self.client.request(request).await?;
            let status = response.status();
            let body = hyper::body::to_bytes(response.into_body()).await?;
            Ok::<_, hyper::Error>((status, body))
        })
        .await
        .map_err(|_| DaqError::RemoteDelivery(format!("timed out after {:?}", self.timeout)))?
        .map_err(|e| DaqError::RemoteDelivery(e.to_string()))?;

        let (status, body) = response;
        if status.is_success() {
            Ok(())
        } else {
            Err(DaqError::RemoteDelivery(format!(
                "HTTP {}: {}",
                status,
                String::from_utf8_lossy(&body).trim()
            )))
        }
    }
}

#[async_trait]
impl SamplePublisher for InfluxPublisher {
    fn publish(&self, sample: &NormalizedSample) {
        if self.tracker.is_closed() {
            return;
        }
        let Some(series) = self.series.get(&sample.channel_id) else {
            tracing::warn!(channel = %sample.channel_id, "No series configured; sample not published");
            return;
        };
        let Some(line) = series.line(sample) else {
            return;
        };

        let inner = Arc::clone(&self.inner);
        let channel = sample.channel_id.clone();
        self.tracker.spawn(async move {
            match inner.send(line).await {
                Ok(()) => tracing::debug!(channel = %channel, "Remote write accepted"),
                Err(e) => tracing::warn!(channel = %channel, error = %e, "Remote write dropped"),
            }
        });
    }

    async fn shutdown(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote(base_url: &str) -> RemoteConfig {
        RemoteConfig {
            enabled: true,
            base_url: base_url.into(),
            org: "lhep".into(),
            bucket: "test".into(),
            token_env: "INFLUXDB_TOKEN".into(),
            timeout: Duration::from_millis(200),
        }
    }

    #[test]
    fn test_invalid_url_rejected() {
        assert!(InfluxPublisher::new(&remote("not a url"), None, &[]).is_err());
    }

    #[test]
    fn test_https_endpoint_rejected() {
        assert!(matches!(
            InfluxPublisher::new(&remote("https://127.0.0.1:1"), None, &[]),
            Err(DaqError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_channel_is_ignored() {
        let publisher = InfluxPublisher::new(&remote("http://127.0.0.1:9"), None, &[]).unwrap();
        publisher.publish(&NormalizedSample {
            channel_id: "ghost".into(),
            timestamp: 1,
            value: Some(1.0),
            validity: crate::reading::Validity::Valid,
            status_code: 0,
            raw: "1.0".into(),
        });
        assert_eq!(publisher.in_flight(), 0);
        publisher.shutdown().await;
    }
}
