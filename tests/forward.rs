mod common;

use std::time::Duration;

use serde_json::json;

use common::*;
use discord_bridge::config::HttpConfig;
use discord_bridge::forward::{ForwardJob, HttpForwarder};

fn forwarder(retry_attempts: u32, retry_delay: f64) -> HttpForwarder {
    HttpForwarder::new(&HttpConfig {
        timeout: 5.0,
        retry_attempts,
        retry_delay,
    })
    .unwrap()
}

fn job(url: &str) -> ForwardJob {
    ForwardJob {
        event_name: "MESSAGE_CREATE".to_string(),
        url: url.to_string(),
        envelope: json!({
            "event_type": "MESSAGE_CREATE",
            "data": {"id": "42"},
            "timestamp": "2026-01-01T00:00:00.000Z",
            "source": "discord-bridge",
        }),
    }
}

#[tokio::test]
async fn test_retries_5xx_with_linear_backoff() {
    let sink = spawn_sink(&statuses(&[503, 503, 200])).await;

    forwarder(3, 1.0).forward(job(&sink.url)).await;

    let times = sink.timestamps();
    assert_eq!(times.len(), 3, "503, 503, 200 must take exactly three POSTs");
    let first_gap = times[1] - times[0];
    let second_gap = times[2] - times[1];
    assert!(
        first_gap >= Duration::from_millis(900) && first_gap < Duration::from_millis(1800),
        "first retry should wait ~1 s, waited {first_gap:?}"
    );
    assert!(
        second_gap >= Duration::from_millis(1800) && second_gap < Duration::from_millis(3000),
        "second retry should wait ~2 s, waited {second_gap:?}"
    );
}

#[tokio::test]
async fn test_client_error_is_terminal() {
    let sink = spawn_sink(&statuses(&[404])).await;

    forwarder(3, 0.1).forward(job(&sink.url)).await;
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(sink.request_count(), 1, "4xx must not be retried");
}

#[tokio::test]
async fn test_408_is_retried() {
    let sink = spawn_sink(&statuses(&[408, 200])).await;

    forwarder(3, 0.05).forward(job(&sink.url)).await;

    assert_eq!(sink.request_count(), 2);
}

#[tokio::test]
async fn test_gives_up_once_retries_are_exhausted() {
    let sink = spawn_sink(&statuses(&[500, 500, 500, 500, 500])).await;

    forwarder(2, 0.05).forward(job(&sink.url)).await;
    tokio::time::sleep(Duration::from_millis(300)).await;

    // Initial try plus two retries, then the job is dropped.
    assert_eq!(sink.request_count(), 3);
}

#[tokio::test]
async fn test_429_honours_retry_after() {
    let sink = spawn_sink(&[
        SinkResponse {
            status: 429,
            retry_after: Some("2".to_string()),
        },
        SinkResponse {
            status: 200,
            retry_after: None,
        },
    ])
    .await;

    let started = std::time::Instant::now();
    forwarder(3, 0.05).forward(job(&sink.url)).await;

    assert_eq!(sink.request_count(), 2);
    assert!(
        started.elapsed() >= Duration::from_secs(2),
        "Retry-After must override the configured delay"
    );
}

#[tokio::test]
async fn test_connection_error_is_absorbed() {
    // Nothing listens on port 1; the forwarder retries, then drops the job
    // without surfacing anything.
    forwarder(1, 0.05).forward(job("http://127.0.0.1:1/")).await;
}
