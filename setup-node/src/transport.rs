//! Retrying executor for every call made to the cluster API.
//!
//! Reads are retried on transient failures with exponential backoff; writes
//! are sent once unless a caller explicitly asks for retries, since creating
//! a resource twice is not harmless.

use futures::future::BoxFuture;
use metrics::counter;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::error::Error as StdError;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::ClusterConfig;
use crate::error::{TransportError, TransportErrorKind};

/// Statuses answered with another attempt while the budget lasts
pub const RETRYABLE_STATUS: [u16; 8] = [408, 429, 500, 502, 503, 504, 522, 524];

const DEFAULT_READ_RETRIES: u32 = 4;
const MIN_DELAY_MS: f64 = 100.0;

/// How a `Retry-After` header on a retryable response affects the next delay
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryAfterMode {
    /// Override the delay only when the header is present but not an integer
    /// (a fractional value is taken as milliseconds, garbage as zero).
    /// Valid integer headers are ignored.
    #[default]
    Literal,
    /// Use an integer header as the delay in seconds
    Honor,
}

impl RetryAfterMode {
    /// Delay override in milliseconds for the upcoming retry
    pub fn override_delay(self, header: Option<&str>) -> Option<f64> {
        let raw = header?.trim();
        if raw.is_empty() {
            return None;
        }
        let parsed = raw.parse::<f64>().ok().filter(|v| v.is_finite());

        match self {
            RetryAfterMode::Literal => match parsed {
                Some(value) if value.fract() == 0.0 => None,
                Some(value) => Some(value.max(0.0)),
                None => Some(0.0),
            },
            RetryAfterMode::Honor => parsed
                .filter(|value| value.fract() == 0.0 && *value >= 0.0)
                .map(|secs| secs * 1000.0),
        }
    }
}

/// Retry budget and backoff of a call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Explicit retry count; when unset GET gets 4 and everything else 0
    #[serde(default)]
    pub max_retries: Option<u32>,
    /// Delay before the first retry
    pub initial_delay_ms: u64,
    /// Growth factor applied after every attempt
    pub backoff_multiplier: f64,
    #[serde(default)]
    pub retry_after: RetryAfterMode,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: None,
            initial_delay_ms: 1000,
            backoff_multiplier: 2.0,
            retry_after: RetryAfterMode::Literal,
        }
    }
}

impl RetryPolicy {
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    pub fn with_initial_delay_ms(mut self, delay: u64) -> Self {
        self.initial_delay_ms = delay;
        self
    }

    pub fn retry_budget(&self, method: &Method) -> u32 {
        match self.max_retries {
            Some(retries) => retries,
            None if *method == Method::GET => DEFAULT_READ_RETRIES,
            None => 0,
        }
    }

    /// Delay after an attempt that waited `delay_ms`
    pub fn next_delay(&self, delay_ms: f64) -> f64 {
        if delay_ms == 0.0 {
            MIN_DELAY_MS
        } else {
            delay_ms * self.backoff_multiplier
        }
    }
}

/// Outbound request to the cluster API
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
}

impl ApiRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        Self {
            method,
            url: url.into(),
            headers,
            body: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    /// Attach a bearer token; an empty token sends the request anonymously
    pub fn bearer(mut self, token: &str) -> Self {
        if !token.is_empty() {
            if let Ok(value) = HeaderValue::from_str(&format!("Bearer {token}")) {
                self.headers.insert(AUTHORIZATION, value);
            }
        }
        self
    }

    pub fn json_body<T: Serialize + ?Sized>(
        mut self,
        body: &T,
        content_type: &'static str,
    ) -> serde_json::Result<Self> {
        self.body = Some(serde_json::to_vec(body)?);
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        Ok(self)
    }
}

/// Response as seen by the callers of the transport
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl ApiResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.body)
    }
}

/// One network attempt, without any retry logic
pub trait HttpSender: Send + Sync {
    fn send<'a>(&'a self, request: &'a ApiRequest) -> BoxFuture<'a, Result<ApiResponse, TransportError>>;
}

/// [`HttpSender`] backed by reqwest
#[derive(Debug, Clone)]
pub struct ReqwestSender {
    client: Client,
}

impl ReqwestSender {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn from_config(config: &ClusterConfig) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()
            .map_err(|e| TransportError::new(TransportErrorKind::Unknown, e.to_string()))?;
        Ok(Self::new(client))
    }
}

impl HttpSender for ReqwestSender {
    fn send<'a>(&'a self, request: &'a ApiRequest) -> BoxFuture<'a, Result<ApiResponse, TransportError>> {
        Box::pin(async move {
            let mut builder = self
                .client
                .request(request.method.clone(), &request.url)
                .headers(request.headers.clone());
            if let Some(body) = &request.body {
                builder = builder.body(body.clone());
            }

            let response = builder.send().await.map_err(classify_reqwest_error)?;
            let status = response.status().as_u16();
            let headers = response.headers().clone();
            let body = response.bytes().await.map_err(classify_reqwest_error)?;

            Ok(ApiResponse {
                status,
                headers,
                body: body.to_vec(),
            })
        })
    }
}

/// Map a reqwest failure onto the retry classification.
///
/// Only resets, timeouts and lookup misses are retryable. Resolver failures
/// (ENOTFOUND) surface as `NetworkError`. Any other OS level cause, such as a
/// refused connection, is `Unknown` and fails the first attempt.
pub fn classify_reqwest_error(err: reqwest::Error) -> TransportError {
    let kind = if err.is_timeout() {
        TransportErrorKind::Timeout
    } else if let Some(status) = err.status() {
        TransportErrorKind::HttpStatus(status.as_u16())
    } else if err.is_connect() && is_resolver_failure(&err) {
        TransportErrorKind::NetworkError
    } else if let Some(io_kind) = io_error_kind(&err) {
        match io_kind {
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => TransportErrorKind::ConnectionReset,
            io::ErrorKind::TimedOut => TransportErrorKind::Timeout,
            io::ErrorKind::NotFound => TransportErrorKind::NotFound,
            _ => TransportErrorKind::Unknown,
        }
    } else if err.is_connect() || err.is_request() || err.is_body() {
        TransportErrorKind::NetworkError
    } else {
        TransportErrorKind::Unknown
    };

    TransportError::new(kind, err.to_string())
}

// the connector reports lookups as "dns error" wrapping the resolver's io error
fn is_resolver_failure(err: &reqwest::Error) -> bool {
    let mut source: Option<&(dyn StdError + 'static)> = err.source();
    while let Some(current) = source {
        if current.to_string().starts_with("dns error") {
            return true;
        }
        source = current.source();
    }
    false
}

fn io_error_kind(err: &reqwest::Error) -> Option<io::ErrorKind> {
    let mut source: Option<&(dyn StdError + 'static)> = err.source();
    while let Some(current) = source {
        if let Some(io_err) = current.downcast_ref::<io::Error>() {
            return Some(io_err.kind());
        }
        source = current.source();
    }
    None
}

/// Executes [`ApiRequest`]s with the retry discipline of [`RetryPolicy`]
#[derive(Clone)]
pub struct RetryingTransport {
    sender: Arc<dyn HttpSender>,
    policy: RetryPolicy,
}

impl std::fmt::Debug for RetryingTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryingTransport")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl RetryingTransport {
    pub fn new(sender: Arc<dyn HttpSender>, policy: RetryPolicy) -> Self {
        Self { sender, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Execute with the transport's default policy unless `policy` is given
    pub async fn execute(
        &self,
        request: &ApiRequest,
        policy: Option<&RetryPolicy>,
    ) -> Result<ApiResponse, TransportError> {
        self.execute_until(request, policy, &CancellationToken::new())
            .await
    }

    /// Like [`execute`](Self::execute), giving up with `Aborted` once `abort` fires
    pub async fn execute_until(
        &self,
        request: &ApiRequest,
        policy: Option<&RetryPolicy>,
        abort: &CancellationToken,
    ) -> Result<ApiResponse, TransportError> {
        let policy = policy.unwrap_or(&self.policy);
        let mut retries = policy.retry_budget(&request.method);
        let mut delay_ms = policy.initial_delay_ms as f64;
        let mut attempt: u32 = 0;

        loop {
            if abort.is_cancelled() {
                return Err(TransportError::aborted());
            }
            attempt += 1;
            counter!("setup_transport_attempts_total", 1);

            let outcome = tokio::select! {
                _ = abort.cancelled() => return Err(TransportError::aborted()),
                outcome = self.sender.send(request) => outcome,
            };

            match outcome {
                Ok(response) if RETRYABLE_STATUS.contains(&response.status) => {
                    if let Some(override_ms) = policy
                        .retry_after
                        .override_delay(response.header("retry-after"))
                    {
                        delay_ms = override_ms;
                    }
                    if retries == 0 {
                        debug!(
                            method = %request.method,
                            url = %request.url,
                            status = response.status,
                            attempt,
                            "Retry budget exhausted, returning response"
                        );
                        return Ok(response);
                    }
                    warn!(
                        method = %request.method,
                        url = %request.url,
                        status = response.status,
                        attempt,
                        delay_ms,
                        "Retryable status from cluster API"
                    );
                }
                Ok(response) => return Ok(response),
                Err(err) if err.kind.is_retryable() && retries > 0 => {
                    warn!(
                        method = %request.method,
                        url = %request.url,
                        error = %err,
                        attempt,
                        delay_ms,
                        "Transient cluster API failure"
                    );
                }
                Err(err) => return Err(err),
            }

            retries -= 1;
            counter!("setup_transport_retries_total", 1);

            let wait = delay_ms;
            delay_ms = policy.next_delay(delay_ms);

            let pause = Duration::try_from_secs_f64(wait / 1000.0).unwrap_or(Duration::MAX);
            tokio::select! {
                _ = abort.cancelled() => return Err(TransportError::aborted()),
                _ = tokio::time::sleep(pause) => {}
            }
        }
    }
}
