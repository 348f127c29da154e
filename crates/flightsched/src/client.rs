//! Schedules API client.
//!
//! [`ScheduleSource`] is the seam between collection and the network;
//! [`AviationEdgeClient`] implements it against the future-schedules
//! endpoint. Retry with exponential backoff and call pacing live here too, so
//! the collection runner only composes them.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::ApiConfig;
use crate::error::{Error, Result};
use crate::flight::QueryType;

/// Longest response snippet quoted in an error message.
const ERROR_BODY_LIMIT: usize = 200;

/// A provider of raw schedule objects for one airport, perspective and date.
#[async_trait]
pub trait ScheduleSource: Send + Sync {
    /// Fetch the raw flight objects for one query.
    ///
    /// An empty vector means the source had no schedules for the query.
    async fn fetch(&self, airport_code: &str, query_type: QueryType, date: NaiveDate) -> Result<Vec<Value>>;
}

/// Client for the Aviation Edge `flightsFuture` endpoint.
pub struct AviationEdgeClient {
    client: Client,
    base_url: String,
    api_key: String,
    timeout: Duration,
}

impl fmt::Debug for AviationEdgeClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AviationEdgeClient")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl AviationEdgeClient {
    /// Build a client from the API configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigValidation`] if no API key is configured, or a
    /// transport error if the HTTP client cannot be built.
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .ok_or_else(|| Error::ConfigValidation {
                message: format!(
                    "no API key configured (set api.api_key, FLIGHTSCHED_API__API_KEY or {})",
                    crate::config::API_KEY_ENV
                ),
            })?
            .to_string();

        let client = Client::builder()
            .timeout(config.timeout())
            .user_agent(concat!("flightsched/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            api_key,
            timeout: config.timeout(),
        })
    }

    fn classify(&self, err: reqwest::Error) -> Error {
        if err.is_timeout() {
            Error::Timeout {
                elapsed: self.timeout,
            }
        } else {
            Error::from(err)
        }
    }
}

#[async_trait]
impl ScheduleSource for AviationEdgeClient {
    async fn fetch(&self, airport_code: &str, query_type: QueryType, date: NaiveDate) -> Result<Vec<Value>> {
        let date = date.format("%Y-%m-%d").to_string();
        debug!("GET {} iataCode={} type={} date={}", self.base_url, airport_code, query_type, date);

        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("key", self.api_key.as_str()),
                ("iataCode", airport_code),
                ("type", query_type.as_str()),
                ("date", date.as_str()),
            ])
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(Error::RateLimited);
        }
        let body = response.text().await.map_err(|e| self.classify(e))?;
        if !status.is_success() {
            let snippet: String = body.chars().take(ERROR_BODY_LIMIT).collect();
            return Err(Error::transport(format!("HTTP {status}: {snippet}")));
        }

        parse_body(&body)
    }
}

/// Interpret a response body.
///
/// A JSON array is the result. A JSON object is the API's way of saying there
/// is nothing to return (`{"error": "No Record Found"}`) and yields an empty
/// result.
///
/// # Errors
///
/// Returns [`Error::Transport`] if the body is not JSON, or is JSON but
/// neither an array nor an object.
pub fn parse_body(body: &str) -> Result<Vec<Value>> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| Error::transport(format!("response is not valid JSON: {e}")))?;

    match value {
        Value::Array(items) => Ok(items),
        Value::Object(map) => {
            let message = map
                .get("error")
                .map_or_else(|| Value::Object(map.clone()).to_string(), ToString::to_string);
            info!("API returned no schedules: {}", message);
            Ok(Vec::new())
        }
        other => Err(Error::transport(format!(
            "unexpected response shape: expected a JSON array, got {other}"
        ))),
    }
}

/// Retry budget and backoff for transient API failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubled for each further retry.
    pub backoff_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Build the policy from the API configuration.
    #[must_use]
    pub fn from_config(config: &ApiConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff_base: config.backoff_base(),
        }
    }

    /// Delay after failed attempt `attempt` (0-based): `base × 2^attempt`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff_base.saturating_mul(1_u32 << attempt.min(20))
    }
}

/// Fetch with retries on transient failures.
///
/// Transport, rate-limit and timeout errors are retried up to
/// `policy.max_retries` times; anything else is returned immediately.
///
/// # Errors
///
/// Returns the last error once the retry budget is spent, or the first
/// non-retryable error.
pub async fn fetch_with_retry(
    source: &dyn ScheduleSource,
    airport_code: &str,
    query_type: QueryType,
    date: NaiveDate,
    policy: &RetryPolicy,
) -> Result<Vec<Value>> {
    let mut attempt = 0;
    loop {
        match source.fetch(airport_code, query_type, date).await {
            Ok(items) => return Ok(items),
            Err(e) if e.is_retryable() && attempt < policy.max_retries => {
                let delay = policy.delay_for(attempt);
                warn!(
                    "{} {} {}: {} (retry {}/{} in {}ms)",
                    airport_code,
                    query_type,
                    date,
                    e,
                    attempt + 1,
                    policy.max_retries,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Enforced delay between successive API calls.
///
/// Not a token bucket: every call waits until `spacing` has passed since the
/// previous one.
#[derive(Debug)]
pub struct Pacer {
    spacing: Duration,
    last_call: Option<Instant>,
}

impl Pacer {
    /// A pacer with a fixed spacing.
    #[must_use]
    pub fn new(spacing: Duration) -> Self {
        Self {
            spacing,
            last_call: None,
        }
    }

    /// A pacer for a run of `planned_calls`: the batch spacing applies once
    /// the run reaches the configured threshold.
    #[must_use]
    pub fn for_run(config: &ApiConfig, planned_calls: usize) -> Self {
        let spacing_ms = if planned_calls >= config.batch_threshold {
            config.batch_spacing_ms
        } else {
            config.min_spacing_ms
        };
        Self::new(Duration::from_millis(spacing_ms))
    }

    /// The enforced spacing.
    #[must_use]
    pub fn spacing(&self) -> Duration {
        self.spacing
    }

    /// Wait until the next call is allowed, then mark it as made.
    pub async fn wait(&mut self) {
        if let Some(last) = self.last_call {
            tokio::time::sleep_until(last + self.spacing).await;
        }
        self.last_call = Some(Instant::now());
    }
}

#[cfg(test)]
pub(crate) mod fakes {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;

    /// A source replaying scripted responses; once the script runs out it
    /// answers with `fallback`.
    pub struct ScriptedSource {
        script: Mutex<VecDeque<Result<Vec<Value>>>>,
        fallback: fn() -> Result<Vec<Value>>,
        pub calls: AtomicUsize,
    }

    impl ScriptedSource {
        pub fn new(script: Vec<Result<Vec<Value>>>, fallback: fn() -> Result<Vec<Value>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                fallback,
                calls: AtomicUsize::new(0),
            }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ScheduleSource for ScriptedSource {
        async fn fetch(&self, _airport: &str, _query_type: QueryType, _date: NaiveDate) -> Result<Vec<Value>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.script.lock().unwrap().pop_front();
            next.unwrap_or_else(self.fallback)
        }
    }
}
