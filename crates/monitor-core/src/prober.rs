//! HTTP Prober (spec §4.1): executes one HTTP attempt, with retry, against
//! an Endpoint and returns a structured [`HttpResponse`] or a [`ProbeError`].
//!
//! Grounded on `hook-worker::worker::{build_http_client, send_webhook}`
//! (client construction, header defaulting, status-based retry
//! classification) and on the attempt-loop-with-jitter shape of
//! `rust-healthcheck::check_with_retries`.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use rand::Rng;
use reqwest::{header, Client};
use tracing::{debug, warn};

use monitor_common::model::Endpoint;

use crate::error::ProbeError;

/// Recognised Prober configuration options (spec §4.1).
#[derive(Debug, Clone)]
pub struct ProberConfig {
    pub connect_timeout: Duration,
    pub max_retries: u32,
    pub base_retry_delay: Duration,
    pub max_retry_delay: Duration,
    /// Hard cap on bytes read from any single response body.
    pub max_response_body_bytes: usize,
    /// Length of the body sample retained on a `MonitoringResult`.
    pub sample_size: usize,
    pub follow_redirects: bool,
    pub max_redirects: usize,
    pub tls_insecure_skip_verify: bool,
    pub user_agent: String,
}

impl Default for ProberConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            max_retries: 2,
            base_retry_delay: Duration::from_millis(500),
            max_retry_delay: Duration::from_secs(10),
            max_response_body_bytes: 64 * 1024,
            sample_size: 500,
            follow_redirects: true,
            max_redirects: 10,
            tls_insecure_skip_verify: false,
            user_agent: "monitor-core-prober/1.0".to_owned(),
        }
    }
}

/// A successfully-executed HTTP request (any status code — the Validator
/// decides pass/fail).
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body_sample: String,
    pub truncated: bool,
    pub response_time: Duration,
}

/// Executes probes against endpoints using one shared `reqwest::Client`.
pub struct Prober {
    client: Client,
    config: ProberConfig,
}

impl Prober {
    pub fn new(config: ProberConfig) -> Result<Self, ProbeError> {
        let client = build_http_client(&config)?;
        Ok(Self { client, config })
    }

    /// Run one probe (including its internal retries) against `endpoint`.
    pub async fn probe(&self, endpoint: &Endpoint) -> Result<HttpResponse, ProbeError> {
        let mut last_err: Option<ProbeError> = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let delay = delay_for_attempt(attempt, &self.config);
                debug!(attempt, ?delay, endpoint = %endpoint.url, "retrying probe after backoff");
                tokio::time::sleep(delay).await;
            }

            match self.attempt_once(endpoint).await {
                Ok(response) if response.status >= 500 => {
                    warn!(
                        endpoint = %endpoint.url,
                        status = response.status,
                        attempt,
                        "transient server error, will retry"
                    );
                    last_err = Some(ProbeError::Transport(format!(
                        "server returned {}",
                        response.status
                    )));
                    continue;
                }
                Ok(response) => return Ok(response),
                Err(err) if is_retryable(&err) => {
                    last_err = Some(err);
                    continue;
                }
                Err(err) => return Err(err),
            }
        }

        Err(ProbeError::RetriesExhausted {
            attempts: self.config.max_retries + 1,
            last_error: last_err
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown error".to_owned()),
        })
    }

    async fn attempt_once(&self, endpoint: &Endpoint) -> Result<HttpResponse, ProbeError> {
        let url: reqwest::Url = endpoint.url.parse().map_err(ProbeError::InvalidUrl)?;
        let method: http::Method = endpoint.method.into();

        let mut headers = header::HeaderMap::new();
        for (k, v) in &endpoint.headers {
            let name = header::HeaderName::from_bytes(k.as_bytes())
                .map_err(|e| ProbeError::InvalidHeader(e.to_string()))?;
            let value = header::HeaderValue::from_str(v)
                .map_err(|e| ProbeError::InvalidHeader(e.to_string()))?;
            headers.insert(name, value);
        }
        if !headers.contains_key(header::USER_AGENT) {
            headers.insert(
                header::USER_AGENT,
                header::HeaderValue::from_str(&self.config.user_agent)
                    .unwrap_or_else(|_| header::HeaderValue::from_static("monitor-core-prober")),
            );
        }
        if endpoint.body.is_some() && !headers.contains_key(header::CONTENT_TYPE) {
            headers.insert(
                header::CONTENT_TYPE,
                header::HeaderValue::from_static("application/json"),
            );
        }

        let mut request = self
            .client
            .request(method, url)
            .headers(headers)
            .timeout(endpoint.timeout);
        if let Some(body) = endpoint.body.clone() {
            request = request.body(body);
        }

        let start = Instant::now();
        let response = request.send().await.map_err(classify_transport_error)?;
        let status = response.status().as_u16();

        let mut response_headers = HashMap::new();
        for (name, value) in response.headers().iter() {
            let key = name.as_str().to_owned();
            if response_headers.contains_key(&key) {
                continue; // first value wins
            }
            if let Ok(value) = value.to_str() {
                response_headers.insert(key, value.to_owned());
            }
        }

        let (body, hard_truncated) =
            read_capped_body(response, self.config.max_response_body_bytes).await?;
        let response_time = start.elapsed();

        let (body_sample, sample_truncated) = sample_of(&body, self.config.sample_size);

        Ok(HttpResponse {
            status,
            headers: response_headers,
            body_sample,
            truncated: hard_truncated || sample_truncated,
            response_time,
        })
    }
}

fn build_http_client(config: &ProberConfig) -> Result<Client, ProbeError> {
    let redirect_policy = if config.follow_redirects {
        reqwest::redirect::Policy::limited(config.max_redirects)
    } else {
        reqwest::redirect::Policy::none()
    };

    Client::builder()
        .connect_timeout(config.connect_timeout)
        .redirect(redirect_policy)
        .danger_accept_invalid_certs(config.tls_insecure_skip_verify)
        .build()
        .map_err(|e| ProbeError::Transport(e.to_string()))
}

fn delay_for_attempt(attempt: u32, config: &ProberConfig) -> Duration {
    let policy = monitor_common::retry::RetryPolicy::new(config.base_retry_delay, config.max_retry_delay);
    let base = policy.delay_for_attempt(attempt);
    // A touch of jitter avoids synchronized retry storms across endpoints.
    let jitter_ms = rand::thread_rng().gen_range(0..=50u64);
    base + Duration::from_millis(jitter_ms)
}

fn is_retryable(err: &ProbeError) -> bool {
    matches!(err, ProbeError::Timeout(_) | ProbeError::Transport(_))
}

fn classify_transport_error(err: reqwest::Error) -> ProbeError {
    if err.is_timeout() {
        ProbeError::Timeout(Duration::default())
    } else {
        ProbeError::Transport(err.to_string())
    }
}

/// Read up to `cap` bytes from `response`, returning the decoded text and
/// whether the body was truncated by the cap. Never reads more than `cap`
/// bytes from the underlying stream (spec §8 invariant).
async fn read_capped_body(
    mut response: reqwest::Response,
    cap: usize,
) -> Result<(String, bool), ProbeError> {
    use futures::StreamExt;

    let mut buf: Vec<u8> = Vec::new();
    let mut truncated = false;

    while let Some(chunk) = response.chunk().await.map_err(classify_transport_error)? {
        if buf.len() >= cap {
            truncated = true;
            break;
        }
        let remaining = cap - buf.len();
        if chunk.len() > remaining {
            buf.extend_from_slice(&chunk[..remaining]);
            truncated = true;
            break;
        }
        buf.extend_from_slice(&chunk);
    }
    // Drain any leftover bytes so the connection can be reused even when we
    // stopped reading early.
    if truncated {
        while response.chunk().await.map_err(classify_transport_error)?.is_some() {}
    }

    Ok((String::from_utf8_lossy(&buf).into_owned(), truncated))
}

fn sample_of(body: &str, sample_size: usize) -> (String, bool) {
    if body.chars().count() <= sample_size {
        (body.to_owned(), false)
    } else {
        let truncated: String = body.chars().take(sample_size).collect();
        (format!("{truncated}..."), true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use httpmock::prelude::*;
    use std::collections::HashMap as Map;
    use uuid::Uuid;

    fn endpoint(url: String) -> Endpoint {
        Endpoint {
            id: Uuid::new_v4(),
            name: "test".to_owned(),
            url,
            method: monitor_common::model::HttpMethod::Get,
            headers: Map::new(),
            body: None,
            expected_status_code: 200,
            timeout: Duration::from_secs(5),
            check_interval: Duration::from_secs(60),
            enabled: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn happy_path_returns_response() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/ok");
            then.status(200).body(r#"{"ok":true}"#);
        });

        let prober = Prober::new(ProberConfig::default()).unwrap();
        let response = prober
            .probe(&endpoint(server.url("/ok")))
            .await
            .expect("probe should succeed");

        mock.assert();
        assert_eq!(response.status, 200);
        assert!(response.body_sample.starts_with(r#"{"ok":true}"#));
    }

    #[tokio::test]
    async fn retries_on_5xx_then_succeeds() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/flaky");
            then.status(500);
        });

        let prober = Prober::new(ProberConfig {
            max_retries: 1,
            base_retry_delay: Duration::from_millis(1),
            max_retry_delay: Duration::from_millis(5),
            ..Default::default()
        })
        .unwrap();

        let result = prober.probe(&endpoint(server.url("/flaky"))).await;
        // Every attempt returns 500, so retries are exhausted.
        assert!(result.is_err());
        assert!(mock.hits() >= 2);
    }

    #[tokio::test]
    async fn does_not_retry_4xx() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/missing");
            then.status(404);
        });

        let prober = Prober::new(ProberConfig::default()).unwrap();
        let response = prober
            .probe(&endpoint(server.url("/missing")))
            .await
            .expect("4xx is a valid HttpResponse, not a ProbeError");

        assert_eq!(response.status, 404);
        assert_eq!(mock.hits(), 1);
    }

    #[tokio::test]
    async fn body_sample_is_truncated_past_sample_size() {
        let server = MockServer::start();
        let big_body = "a".repeat(5 * 1024);
        server.mock(|when, then| {
            when.method(GET).path("/big");
            then.status(200).body(&big_body);
        });

        let prober = Prober::new(ProberConfig {
            max_response_body_bytes: 1024,
            sample_size: 500,
            ..Default::default()
        })
        .unwrap();

        let response = prober
            .probe(&endpoint(server.url("/big")))
            .await
            .expect("probe should succeed");

        assert!(response.truncated);
        assert!(response.body_sample.ends_with("..."));
        assert!(response.body_sample.len() <= 503);
    }

    #[test]
    fn sample_exactly_at_cap_is_not_truncated() {
        let body = "x".repeat(500);
        let (sample, truncated) = sample_of(&body, 500);
        assert!(!truncated);
        assert_eq!(sample.len(), 500);
    }

    #[test]
    fn sample_one_over_cap_is_truncated() {
        let body = "x".repeat(501);
        let (sample, truncated) = sample_of(&body, 500);
        assert!(truncated);
        assert!(sample.ends_with("..."));
    }
}
