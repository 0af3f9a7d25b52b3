//! InfluxPublisher against a local hyper server and against dead endpoints.

use chamber_daq::config::{ChannelConfig, RemoteConfig};
use chamber_daq::error::DaqError;
use chamber_daq::publish::{InfluxPublisher, SamplePublisher};
use chamber_daq::reading::{NormalizedSample, Validity};
use hyper::header::AUTHORIZATION;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server, StatusCode};
use std::convert::Infallible;
use std::net::{SocketAddr, TcpListener};
use std::time::Duration;
use tokio::sync::mpsc;

/// One request as seen by the fake store
#[derive(Debug)]
struct Captured {
    uri: String,
    authorization: Option<String>,
    body: String,
}

/// Start a fake write endpoint answering every request with `status`
fn spawn_store(status: StatusCode) -> (SocketAddr, mpsc::UnboundedReceiver<Captured>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.set_nonblocking(true).unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    let make_svc = make_service_fn(move |_| {
        let tx = tx.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                let tx = tx.clone();
                async move {
                    let uri = req.uri().to_string();
                    let authorization = req
                        .headers()
                        .get(AUTHORIZATION)
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    let body = hyper::body::to_bytes(req.into_body()).await.unwrap();
                    let _ = tx.send(Captured {
                        uri,
                        authorization,
                        body: String::from_utf8_lossy(&body).into_owned(),
                    });
                    Ok::<_, Infallible>(
                        Response::builder()
                            .status(status)
                            .body(Body::from("store says no"))
                            .unwrap(),
                    )
                }
            }))
        }
    });

    let server = Server::from_tcp(listener).unwrap().serve(make_svc);
    tokio::spawn(server);
    (addr, rx)
}

fn remote(base_url: String) -> RemoteConfig {
    RemoteConfig {
        enabled: true,
        base_url,
        org: "lhep".into(),
        bucket: "ArCLight_QA_QC".into(),
        token_env: "INFLUX_TEST_TOKEN_UNSET".into(),
        timeout: Duration::from_millis(500),
    }
}

fn channels() -> Vec<ChannelConfig> {
    vec![ChannelConfig {
        id: "sens-1".into(),
        measurement: "pressure".into(),
        tag_key: "sens".into(),
        offset: 0.0,
    }]
}

fn sample(value: f64, validity: Validity) -> NormalizedSample {
    NormalizedSample {
        channel_id: "sens-1".into(),
        timestamp: 1_739_110_800,
        value: Some(value),
        validity,
        status_code: 0,
        raw: value.to_string(),
    }
}

#[tokio::test]
async fn test_publish_posts_line_with_token() {
    let (addr, mut rx) = spawn_store(StatusCode::NO_CONTENT);
    let publisher =
        InfluxPublisher::new(&remote(format!("http://{addr}/")), Some("s3cret".into()), &channels()).unwrap();

    publisher.publish(&sample(1.2e-3, Validity::Valid));
    publisher.publish(&sample(1000.0, Validity::SentinelOverrange));
    publisher.shutdown().await;
    assert_eq!(publisher.in_flight(), 0);

    let mut received = Vec::new();
    while let Ok(captured) = rx.try_recv() {
        received.push(captured);
    }
    assert_eq!(received.len(), 2);
    for captured in &received {
        assert_eq!(
            captured.uri,
            "/api/v2/write?org=lhep&bucket=ArCLight_QA_QC&precision=s"
        );
        assert_eq!(captured.authorization.as_deref(), Some("Token s3cret"));
    }

    // Publishes are unordered
    let mut bodies: Vec<&str> = received.iter().map(|c| c.body.as_str()).collect();
    bodies.sort_unstable();
    assert_eq!(
        bodies,
        vec![
            "pressure,sens=sens-1 value=0.0012 1739110800",
            "pressure,sens=sens-1 value=1000.0 1739110800",
        ]
    );
}

#[tokio::test]
async fn test_missing_token_sends_unauthenticated() {
    let (addr, mut rx) = spawn_store(StatusCode::NO_CONTENT);
    let publisher = InfluxPublisher::new(&remote(format!("http://{addr}")), None, &channels()).unwrap();

    publisher
        .send_line("pressure,sens=sens-1 value=1.0 1".into())
        .await
        .unwrap();

    let captured = rx.recv().await.unwrap();
    assert_eq!(captured.authorization, None);
}

#[tokio::test]
async fn test_rejected_write_is_remote_delivery_error() {
    let (addr, _rx) = spawn_store(StatusCode::UNAUTHORIZED);
    let publisher = InfluxPublisher::new(&remote(format!("http://{addr}")), None, &channels()).unwrap();

    let err = publisher
        .send_line("pressure,sens=sens-1 value=1.0 1".into())
        .await
        .unwrap_err();
    match err {
        DaqError::RemoteDelivery(message) => {
            assert!(message.contains("401"), "{message}");
            assert!(message.contains("store says no"), "{message}");
        }
        other => panic!("unexpected error: {other:?}"),
    }

    // Fire-and-forget path swallows the same failure
    publisher.publish(&sample(2.0, Validity::Valid));
    publisher.shutdown().await;
}

#[tokio::test]
async fn test_unreachable_endpoint_is_swallowed() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let publisher =
        InfluxPublisher::new(&remote(format!("http://127.0.0.1:{port}")), None, &channels()).unwrap();

    assert!(matches!(
        publisher.send_line("pressure,sens=sens-1 value=1.0 1".into()).await,
        Err(DaqError::RemoteDelivery(_))
    ));

    for _ in 0..5 {
        publisher.publish(&sample(3.0, Validity::Valid));
    }
    tokio::time::timeout(Duration::from_secs(5), publisher.shutdown())
        .await
        .expect("shutdown waits at most one request timeout");
    assert_eq!(publisher.in_flight(), 0);
}

#[tokio::test]
async fn test_silent_endpoint_times_out() {
    // Accepts connections but never answers
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });

    let mut config = remote(format!("http://{addr}"));
    config.timeout = Duration::from_millis(100);
    let publisher = InfluxPublisher::new(&config, None, &channels()).unwrap();

    let err = publisher
        .send_line("pressure,sens=sens-1 value=1.0 1".into())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("timed out"), "{err}");
}

#[tokio::test]
async fn test_no_publish_after_shutdown() {
    let (addr, mut rx) = spawn_store(StatusCode::NO_CONTENT);
    let publisher = InfluxPublisher::new(&remote(format!("http://{addr}")), None, &channels()).unwrap();

    publisher.shutdown().await;
    publisher.publish(&sample(4.0, Validity::Valid));
    assert_eq!(publisher.in_flight(), 0);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err());
}
