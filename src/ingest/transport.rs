// src/ingest/transport.rs
//! reqwest-backed [`Transport`] with a small, deadline-aware retry loop.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use tokio::time::Instant;

use crate::error::{AdapterError, ConfigError};
use crate::ingest::config::{AggregatorConfig, MAX_ATTEMPTS_CAP};
use crate::ingest::types::Transport;

pub struct HttpTransport {
    client: reqwest::Client,
    max_attempts: u32,
    backoff_base: Duration,
}

impl HttpTransport {
    pub fn new(user_agent: &str, max_attempts: u32, backoff_base: Duration) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .connect_timeout(Duration::from_secs(4))
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;
        Ok(Self {
            client,
            max_attempts: max_attempts.clamp(1, MAX_ATTEMPTS_CAP),
            backoff_base,
        })
    }

    pub fn from_config(cfg: &AggregatorConfig) -> Result<Self, ConfigError> {
        Self::new(
            &cfg.user_agent,
            cfg.effective_max_attempts(),
            cfg.backoff_base(),
        )
    }

    async fn attempt(&self, url: &str, deadline: Instant) -> Result<String, Failure> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(Failure::Final(AdapterError::Timeout));
        }
        let resp = self
            .client
            .get(url)
            .timeout(remaining)
            .send()
            .await
            .map_err(classify_reqwest)?;

        let status = resp.status();
        if !status.is_success() {
            let err = AdapterError::unreachable(format!("HTTP {status} from {url}"));
            return Err(if is_retryable_status(status) {
                Failure::Retryable(err)
            } else {
                Failure::Final(err)
            });
        }
        resp.text().await.map_err(classify_reqwest)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get_text(&self, url: &str, deadline: Instant) -> Result<String, AdapterError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let err = match self.attempt(url, deadline).await {
                Ok(body) => return Ok(body),
                Err(Failure::Final(e)) => return Err(e),
                Err(Failure::Retryable(e)) => e,
            };
            if attempt >= self.max_attempts {
                return Err(err);
            }
            let delay = backoff_delay(self.backoff_base, attempt);
            if Instant::now() + delay >= deadline {
                // Sleeping would overrun the cutoff; report what we have.
                return Err(err);
            }
            tracing::debug!(url, attempt, error = %err, ?delay, "retrying request");
            tokio::time::sleep(delay).await;
        }
    }
}

/// `base * 2^(attempt-1)`: 1x, 2x, 4x.
pub(crate) fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(1u32 << attempt.saturating_sub(1).min(8))
}

/// Outcome of one attempt, split by whether another attempt could help.
enum Failure {
    Retryable(AdapterError),
    Final(AdapterError),
}

fn classify_reqwest(e: reqwest::Error) -> Failure {
    if e.is_timeout() {
        Failure::Retryable(AdapterError::Timeout)
    } else if e.is_decode() || e.is_body() {
        Failure::Final(AdapterError::malformed(e.to_string()))
    } else if e.is_connect() || e.is_request() {
        Failure::Retryable(AdapterError::unreachable(e.to_string()))
    } else {
        Failure::Final(AdapterError::unreachable(e.to_string()))
    }
}

/// Connection failures, 429 and 5xx are worth another try; other statuses are not.
fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_per_attempt() {
        let base = Duration::from_millis(100);
        assert_eq!(backoff_delay(base, 1), Duration::from_millis(100));
        assert_eq!(backoff_delay(base, 2), Duration::from_millis(200));
        assert_eq!(backoff_delay(base, 3), Duration::from_millis(400));
    }

    #[test]
    fn retry_policy_matches_status_classes() {
        assert!(is_retryable_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(is_retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(!is_retryable_status(StatusCode::NOT_FOUND));
        assert!(!is_retryable_status(StatusCode::FORBIDDEN));
    }

    #[test]
    fn attempts_are_clamped_to_three() {
        let t = HttpTransport::new("test", 9, Duration::from_millis(1)).unwrap();
        assert_eq!(t.max_attempts, 3);
    }

    #[tokio::test]
    async fn expired_deadline_fails_fast_without_network() {
        let t = HttpTransport::new("test", 3, Duration::from_millis(1)).unwrap();
        let past = Instant::now() - Duration::from_millis(5);
        let err = t.get_text("http://127.0.0.1:9/", past).await.unwrap_err();
        assert_eq!(err, AdapterError::Timeout);
    }
}
