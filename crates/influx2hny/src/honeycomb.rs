// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! [`EventEmitter`] that ships events to the Honeycomb batch API.
//!
//! Sent events wait in memory until `flush`, which posts them in chunks of
//! `max_batch_size` to `<api_host>/1/batch/<dataset>`. Each request body is a
//! JSON array, optionally zstd compressed:
//!
//! ```text
//! [{"time":"2024-05-01T10:00:00Z","data":{"host":"web-1","cpu.usage_idle":99.0}}]
//! ```
//!
//! The response carries one status per event; anything that is not 2xx is
//! counted as rejected.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE, USER_AGENT};
use reqwest::{Response, StatusCode, Url};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use zstd::zstd_safe::CompressionLevel;

use crate::emitter::EventEmitter;
use crate::errors::{ConfigError, EmitError};
use crate::event::Event;
use crate::sample::FieldValue;

pub const DEFAULT_DATASET: &str = "telegraf";
pub const DEFAULT_API_HOST: &str = "https://api.honeycomb.io/";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_MAX_BATCH_SIZE: usize = 50;
const DEFAULT_MAX_PENDING_EVENTS: usize = 10_000;
const DEFAULT_COMPRESSION_LEVEL: CompressionLevel = 6;
const TEAM_HEADER: &str = "X-Honeycomb-Team";
const USER_AGENT_VALUE: &str = concat!("influx2hny/", env!("CARGO_PKG_VERSION"));

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RetryStrategy {
    /// Up to `n` attempts, back to back.
    Immediate(u64),
    /// Up to `n` attempts, waiting `ms * attempt` milliseconds between them.
    LinearBackoff(u64, u64),
}

impl RetryStrategy {
    fn max_attempts(&self) -> u64 {
        match self {
            Self::Immediate(attempts) | Self::LinearBackoff(attempts, _) => (*attempts).max(1),
        }
    }

    fn delay(&self, attempt: u64) -> Option<Duration> {
        match self {
            Self::Immediate(_) => None,
            Self::LinearBackoff(_, ms) => Some(Duration::from_millis(ms.saturating_mul(attempt))),
        }
    }
}

#[derive(Clone, Debug)]
pub struct HoneycombConfig {
    pub api_key: String,
    pub dataset: String,
    pub api_host: String,
    pub timeout: Duration,
    pub retry_strategy: RetryStrategy,
    /// `None` sends uncompressed JSON.
    pub compression_level: Option<CompressionLevel>,
    pub max_batch_size: usize,
    pub max_pending_events: usize,
}

impl HoneycombConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            dataset: DEFAULT_DATASET.to_string(),
            api_host: DEFAULT_API_HOST.to_string(),
            timeout: DEFAULT_TIMEOUT,
            retry_strategy: RetryStrategy::LinearBackoff(3, 100),
            compression_level: Some(DEFAULT_COMPRESSION_LEVEL),
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            max_pending_events: DEFAULT_MAX_PENDING_EVENTS,
        }
    }

    /// Endpoint events are posted to. An empty dataset falls back to the default.
    pub fn batch_url(&self) -> Result<Url, ConfigError> {
        let dataset = match self.dataset.trim() {
            "" => DEFAULT_DATASET,
            dataset => dataset,
        };
        let mut url = Url::parse(self.api_host.trim()).map_err(|e| {
            ConfigError::InvalidConfig(format!("invalid API host '{}': {e}", self.api_host))
        })?;
        url.path_segments_mut()
            .map_err(|()| {
                ConfigError::InvalidConfig(format!(
                    "API host '{}' cannot be used as a base URL",
                    self.api_host
                ))
            })?
            .pop_if_empty()
            .extend(["1", "batch", dataset]);
        Ok(url)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_key.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "Honeycomb API key is required".to_string(),
            ));
        }
        if self.api_host.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "Honeycomb API host is required".to_string(),
            ));
        }
        if self.max_batch_size == 0 {
            return Err(ConfigError::InvalidConfig(
                "max batch size must be greater than 0".to_string(),
            ));
        }
        if self.max_pending_events == 0 {
            return Err(ConfigError::InvalidConfig(
                "max pending events must be greater than 0".to_string(),
            ));
        }
        self.batch_url().map(|_| ())
    }
}

#[derive(Serialize)]
struct BatchEvent<'a> {
    time: &'a DateTime<Utc>,
    data: &'a BTreeMap<String, FieldValue>,
}

#[derive(Debug, Deserialize)]
struct BatchEventStatus {
    status: u16,
    #[serde(default)]
    error: Option<String>,
}

pub struct HoneycombEmitter {
    client: reqwest::Client,
    batch_url: Url,
    api_key: String,
    timeout: Duration,
    retry_strategy: RetryStrategy,
    compression_level: Option<CompressionLevel>,
    max_batch_size: usize,
    max_pending_events: usize,
    pending: Mutex<Vec<Event>>,
}

impl HoneycombEmitter {
    pub fn new(config: HoneycombConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let batch_url = config.batch_url()?;
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| ConfigError::InvalidConfig(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            batch_url,
            api_key: config.api_key,
            timeout: config.timeout,
            retry_strategy: config.retry_strategy,
            compression_level: config.compression_level,
            max_batch_size: config.max_batch_size,
            max_pending_events: config.max_pending_events,
            pending: Mutex::new(Vec::new()),
        })
    }

    pub fn pending_len(&self) -> usize {
        #[allow(clippy::expect_used)]
        let pending = self.pending.lock().expect("lock poisoned");
        pending.len()
    }

    fn encode(&self, batch: &[Event]) -> Result<Vec<u8>, EmitError> {
        let payload: Vec<BatchEvent<'_>> = batch
            .iter()
            .map(|event| BatchEvent {
                time: &event.timestamp,
                data: &event.fields,
            })
            .collect();
        let json = serde_json::to_vec(&payload).map_err(|e| EmitError::Payload(e.to_string()))?;
        match self.compression_level {
            Some(level) => zstd::encode_all(json.as_slice(), level)
                .map_err(|e| EmitError::Payload(format!("compression failed: {e}"))),
            None => Ok(json),
        }
    }

    async fn post(&self, body: Vec<u8>) -> Result<Response, EmitError> {
        let mut request = self
            .client
            .post(self.batch_url.clone())
            .header(TEAM_HEADER, &self.api_key)
            .header(CONTENT_TYPE, "application/json")
            .header(USER_AGENT, USER_AGENT_VALUE)
            .timeout(self.timeout)
            .body(body);
        if self.compression_level.is_some() {
            request = request.header(CONTENT_ENCODING, "zstd");
        }

        let response = request
            .send()
            .await
            .map_err(|e| EmitError::Destination(e.status(), e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(EmitError::Destination(Some(status), body))
    }

    /// Posts one batch, retrying network failures and 5xx responses.
    async fn ship_batch(&self, batch: &[Event]) -> Result<(), EmitError> {
        let body = self.encode(batch)?;
        let max_attempts = self.retry_strategy.max_attempts();
        let mut attempt = 0;

        let response = loop {
            attempt += 1;
            match self.post(body.clone()).await {
                Ok(response) => break response,
                Err(err) if attempt < max_attempts && is_transient(&err) => {
                    debug!("Attempt {attempt}/{max_attempts} to ship events failed: {err}");
                    if let Some(delay) = self.retry_strategy.delay(attempt) {
                        tokio::time::sleep(delay).await;
                    }
                }
                Err(err) => return Err(err),
            }
        };

        let statuses = match response.json::<Vec<BatchEventStatus>>().await {
            Ok(statuses) => statuses,
            Err(e) => {
                debug!("Could not read per-event statuses, assuming accepted: {e}");
                return Ok(());
            }
        };
        let rejected: Vec<&BatchEventStatus> = statuses
            .iter()
            .filter(|s| !StatusCode::from_u16(s.status).is_ok_and(|code| code.is_success()))
            .collect();
        match rejected.first() {
            None => Ok(()),
            Some(first) => Err(EmitError::Rejected {
                rejected: rejected.len(),
                total: batch.len(),
                reason: first
                    .error
                    .clone()
                    .unwrap_or_else(|| format!("status {}", first.status)),
            }),
        }
    }
}

fn is_transient(err: &EmitError) -> bool {
    match err {
        EmitError::Destination(None, _) => true,
        EmitError::Destination(Some(status), _) => status.is_server_error(),
        _ => false,
    }
}

#[async_trait]
impl EventEmitter for HoneycombEmitter {
    async fn send(&self, event: Event) -> Result<(), EmitError> {
        #[allow(clippy::expect_used)]
        let mut pending = self.pending.lock().expect("lock poisoned");
        if pending.len() >= self.max_pending_events {
            return Err(EmitError::Overflow(self.max_pending_events));
        }
        pending.push(event);
        Ok(())
    }

    async fn flush(&self) -> Result<(), EmitError> {
        let events = {
            #[allow(clippy::expect_used)]
            let mut pending = self.pending.lock().expect("lock poisoned");
            std::mem::take(&mut *pending)
        };
        if events.is_empty() {
            return Ok(());
        }

        let n_events = events.len();
        debug!("Flushing {n_events} events to Honeycomb");

        let mut first_error = None;
        for batch in events.chunks(self.max_batch_size) {
            match self.ship_batch(batch).await {
                Ok(()) => {}
                // Every later batch would fail the same way.
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    warn!("Dropping batch of {} events: {err}", batch.len());
                    first_error.get_or_insert(err);
                }
            }
        }

        match first_error {
            None => {
                debug!("Successfully flushed {n_events} events");
                Ok(())
            }
            Some(err) => Err(err),
        }
    }
}
