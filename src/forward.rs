use std::fmt;
use std::time::{Duration, Instant};

use reqwest::header::{HeaderMap, CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use serde_json::Value;

use crate::config::HttpConfig;
use crate::error::BridgeError;

/// Ceiling for server-provided `Retry-After` waits.
const RETRY_AFTER_CAP: Duration = Duration::from_secs(60);

/// One pending delivery of one event envelope to one endpoint. Lives from
/// router dispatch until the delivery succeeds or is dropped.
#[derive(Debug, Clone)]
pub struct ForwardJob {
    pub event_name: String,
    pub url: String,
    pub envelope: Value,
}

/// Why a single delivery attempt failed.
#[derive(Debug)]
enum AttemptError {
    Status {
        status: StatusCode,
        retry_after: Option<Duration>,
    },
    Transport(reqwest::Error),
}

impl AttemptError {
    fn retryable(&self) -> bool {
        match self {
            AttemptError::Status { status, .. } => {
                status.is_server_error()
                    || *status == StatusCode::REQUEST_TIMEOUT
                    || *status == StatusCode::TOO_MANY_REQUESTS
            }
            AttemptError::Transport(_) => true,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            AttemptError::Status { .. } => "status",
            AttemptError::Transport(e) if e.is_timeout() => "timeout",
            AttemptError::Transport(e) if e.is_connect() => "connect",
            AttemptError::Transport(_) => "network",
        }
    }
}

impl fmt::Display for AttemptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptError::Status { status, .. } => write!(f, "http status {status}"),
            AttemptError::Transport(e) => write!(f, "{e}"),
        }
    }
}

/// Best-effort HTTP delivery with bounded retries. One shared client keeps
/// connections pooled across all forwards; failures are logged here and
/// never surface to the caller.
pub struct HttpForwarder {
    client: Client,
    retry_attempts: u32,
    retry_delay: Duration,
}

impl HttpForwarder {
    pub fn new(config: &HttpConfig) -> Result<Self, BridgeError> {
        let client = Client::builder()
            .timeout(Duration::from_secs_f64(config.timeout))
            .user_agent(concat!("discord-bridge/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| BridgeError::Config(format!("failed to build http client: {e}")))?;
        Ok(Self {
            client,
            retry_attempts: config.retry_attempts,
            retry_delay: Duration::from_secs_f64(config.retry_delay),
        })
    }

    /// Deliver one job: the initial try plus up to `retry_attempts` retries,
    /// with linear backoff (`retry_delay * attempt`) between attempts and
    /// `Retry-After` honoured on 429.
    pub async fn forward(&self, job: ForwardJob) {
        let started = Instant::now();
        let max_attempts = self.retry_attempts + 1;
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let error = match self.attempt(&job).await {
                Ok(status) => {
                    tracing::info!(
                        event = %job.event_name,
                        url = %job.url,
                        attempt,
                        status = status.as_u16(),
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "event forwarded"
                    );
                    return;
                }
                Err(error) => error,
            };

            if !error.retryable() {
                tracing::warn!(
                    event = %job.event_name,
                    url = %job.url,
                    attempt,
                    error_kind = error.kind(),
                    error = %error,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "dropping event, endpoint rejected it"
                );
                return;
            }
            if attempt >= max_attempts {
                tracing::error!(
                    event = %job.event_name,
                    url = %job.url,
                    attempt,
                    error_kind = error.kind(),
                    error = %error,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "dropping event, retries exhausted"
                );
                return;
            }

            let delay = match &error {
                AttemptError::Status {
                    retry_after: Some(after),
                    ..
                } => *after,
                _ => self.retry_delay * attempt,
            };
            tracing::warn!(
                event = %job.event_name,
                url = %job.url,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error_kind = error.kind(),
                error = %error,
                "forward attempt failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn attempt(&self, job: &ForwardJob) -> Result<StatusCode, AttemptError> {
        let response = self
            .client
            .post(&job.url)
            .header(CONTENT_TYPE, "application/json; charset=utf-8")
            .body(job.envelope.to_string())
            .send()
            .await
            .map_err(AttemptError::Transport)?;

        let status = response.status();
        if status.is_success() {
            return Ok(status);
        }
        let retry_after = if status == StatusCode::TOO_MANY_REQUESTS {
            parse_retry_after(response.headers())
        } else {
            None
        };
        Err(AttemptError::Status {
            status,
            retry_after,
        })
    }
}

/// Parse `Retry-After` as delta-seconds or an HTTP-date, clamped to the cap.
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    let secs = if let Ok(n) = raw.parse::<u64>() {
        n as f64
    } else {
        let when = chrono::DateTime::parse_from_rfc2822(raw).ok()?;
        let delta = when.with_timezone(&chrono::Utc) - chrono::Utc::now();
        delta.num_milliseconds().max(0) as f64 / 1000.0
    };
    Some(Duration::from_secs_f64(secs).min(RETRY_AFTER_CAP))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn headers_with(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_retry_after_delta_seconds() {
        assert_eq!(
            parse_retry_after(&headers_with("3")),
            Some(Duration::from_secs(3))
        );
    }

    #[test]
    fn test_retry_after_clamped() {
        assert_eq!(parse_retry_after(&headers_with("600")), Some(RETRY_AFTER_CAP));
    }

    #[test]
    fn test_retry_after_http_date() {
        let when = chrono::Utc::now() + chrono::Duration::seconds(30);
        let parsed = parse_retry_after(&headers_with(&when.to_rfc2822())).unwrap();
        assert!(parsed <= Duration::from_secs(30));
        assert!(parsed >= Duration::from_secs(25));
    }

    #[test]
    fn test_retry_after_past_date_is_zero() {
        let parsed = parse_retry_after(&headers_with("Wed, 21 Oct 2015 07:28:00 GMT")).unwrap();
        assert_eq!(parsed, Duration::ZERO);
    }

    #[test]
    fn test_retry_after_garbage_is_none() {
        assert_eq!(parse_retry_after(&headers_with("soon")), None);
        assert_eq!(parse_retry_after(&HeaderMap::new()), None);
    }

    #[test]
    fn test_status_retryability() {
        let retryable = |code: u16| AttemptError::Status {
            status: StatusCode::from_u16(code).unwrap(),
            retry_after: None,
        }
        .retryable();

        assert!(retryable(500));
        assert!(retryable(503));
        assert!(retryable(408));
        assert!(retryable(429));
        assert!(!retryable(400));
        assert!(!retryable(404));
        assert!(!retryable(410));
    }
}
