//! Transport abstraction and the HTTPS collector client.
//!
//! A [`Transport`] sends one encoded batch and reports a [`DeliveryResult`].
//! It never returns an error to the caller: every failure is classified as
//! retryable or rejected and handled by the dispatcher.

use std::{fmt, time::Duration};

use async_trait::async_trait;
use faultline_core::{wire::CLIENT_NAME, WireBatch};
use parking_lot::Mutex;
use reqwest::{header::HeaderMap, Url};
use tracing::{info_span, Instrument};

use crate::error::{DeliveryError, Result};

/// Header carrying the project key.
pub const AUTH_HEADER: &str = "X-Faultline-Auth";

/// Retry delay assumed for a 429 without a usable `Retry-After`.
pub const DEFAULT_RETRY_AFTER_SECONDS: u64 = 60;

const MAX_RESPONSE_BODY_SIZE: usize = 64 * 1024;
const MAX_RECORDED_BODY_SIZE: usize = 1024;

/// Sends encoded batches to a collector.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Sends one batch and classifies the outcome.
    async fn send(&self, batch: &WireBatch) -> DeliveryResult;
}

/// Classified outcome of a single send.
#[derive(Debug, Clone)]
pub enum DeliveryResult {
    /// The collector accepted the batch.
    Delivered {
        /// HTTP status returned
        status: u16,
    },
    /// Transient failure, the batch may be retried.
    Retryable(DeliveryError),
    /// Permanent failure, the batch must be dropped.
    Rejected(DeliveryError),
}

impl DeliveryResult {
    /// Classifies a collector response.
    ///
    /// 2xx is delivered. 408, 429 and 5xx are retryable, with 429 honouring
    /// `Retry-After`. Any other status is rejected.
    pub fn classify(response: DeliveryResponse) -> Self {
        let DeliveryResponse { status_code, body, retry_after_seconds, .. } = response;

        match status_code {
            200..=299 => Self::Delivered { status: status_code },
            429 => Self::Retryable(DeliveryError::rate_limited(
                retry_after_seconds.unwrap_or(DEFAULT_RETRY_AFTER_SECONDS),
                body,
            )),
            408 | 500..=599 => Self::Retryable(DeliveryError::server_error(status_code, body)),
            _ => Self::Rejected(DeliveryError::client_error(status_code, body)),
        }
    }

    /// Classifies a failure that produced no response.
    pub fn from_error(error: DeliveryError) -> Self {
        if error.is_retryable() {
            Self::Retryable(error)
        } else {
            Self::Rejected(error)
        }
    }

    /// Returns `true` if the batch was accepted.
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }

    /// The failure, if the batch was not accepted.
    pub fn error(&self) -> Option<&DeliveryError> {
        match self {
            Self::Delivered { .. } => None,
            Self::Retryable(error) | Self::Rejected(error) => Some(error),
        }
    }
}

/// Raw collector response.
#[derive(Debug, Clone)]
pub struct DeliveryResponse {
    /// HTTP status code.
    pub status_code: u16,
    /// Response body, truncated when oversized.
    pub body: String,
    /// Parsed `Retry-After` header.
    pub retry_after_seconds: Option<u64>,
    /// Time from request start to response body.
    pub duration: Duration,
}

/// Collector endpoint with credentials split out of the URL.
#[derive(Clone, PartialEq, Eq)]
pub struct Endpoint {
    url: Url,
    api_key: Option<String>,
}

impl Endpoint {
    /// Parses an endpoint URL.
    ///
    /// A key embedded as `https://KEY@host/path` is moved out of the URL. An
    /// explicit `api_key` takes precedence over the embedded one.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::ConfigurationError` if the URL does not parse
    /// or is not http(s).
    pub fn parse(raw: &str, api_key: Option<&str>) -> Result<Self> {
        let mut url = Url::parse(raw)
            .map_err(|e| DeliveryError::configuration(format!("invalid endpoint '{raw}': {e}")))?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(DeliveryError::configuration(format!(
                "endpoint scheme must be http or https, got '{}'",
                url.scheme()
            )));
        }

        let embedded = Some(url.username()).filter(|user| !user.is_empty()).map(str::to_string);
        let api_key = api_key.filter(|key| !key.is_empty()).map(str::to_string).or(embedded);

        if url.set_username("").is_err() || url.set_password(None).is_err() {
            return Err(DeliveryError::configuration("endpoint cannot carry credentials"));
        }

        Ok(Self { url, api_key })
    }

    /// Request URL, without credentials.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Project key sent in [`AUTH_HEADER`].
    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("url", &self.url.as_str())
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Transport that POSTs JSON batches over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: Endpoint,
    timeout: Duration,
}

impl HttpTransport {
    /// Creates a transport for an endpoint.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::ConfigurationError` if the HTTP client cannot
    /// be built.
    pub fn new(endpoint: Endpoint, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(CLIENT_NAME)
            .build()
            .map_err(|e| {
                DeliveryError::configuration(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self { client, endpoint, timeout })
    }

    /// Endpoint this transport sends to.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    async fn post(&self, body: Vec<u8>) -> Result<DeliveryResponse> {
        let start_time = std::time::Instant::now();

        let mut request = self
            .client
            .post(self.endpoint.url().clone())
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body);
        if let Some(key) = self.endpoint.api_key() {
            request = request.header(AUTH_HEADER, key);
        }

        let response = request.send().await.map_err(|e| {
            tracing::warn!(duration_ms = start_time.elapsed().as_millis(), "request failed: {}", e);
            if e.is_timeout() {
                DeliveryError::timeout(self.timeout)
            } else if e.is_connect() {
                DeliveryError::network(format!("connection failed: {e}"))
            } else {
                DeliveryError::network(e.to_string())
            }
        })?;

        let status_code = response.status().as_u16();
        let retry_after_seconds = extract_retry_after_seconds(response.headers());

        let body = match response.bytes().await {
            Ok(bytes) if bytes.len() > MAX_RESPONSE_BODY_SIZE => {
                let suffix = "... (truncated)";
                let truncated =
                    String::from_utf8_lossy(&bytes[..MAX_RECORDED_BODY_SIZE - suffix.len()]);
                format!("{truncated}{suffix}")
            },
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) => {
                tracing::warn!("failed to read response body: {}", e);
                format!("[failed to read response body: {e}]")
            },
        };

        Ok(DeliveryResponse {
            status_code,
            body,
            retry_after_seconds,
            duration: start_time.elapsed(),
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, batch: &WireBatch) -> DeliveryResult {
        let span = info_span!(
            "batch_delivery",
            batch_size = batch.len(),
            url = %self.endpoint.url()
        );

        async move {
            let body = match batch.encode() {
                Ok(body) => body,
                Err(e) => {
                    tracing::error!(error = %e, "failed to encode batch");
                    return DeliveryResult::Rejected(DeliveryError::serialization(e.to_string()));
                },
            };

            match self.post(body).await {
                Ok(response) => {
                    tracing::debug!(
                        status = response.status_code,
                        duration_ms = response.duration.as_millis(),
                        "received collector response"
                    );
                    let result = DeliveryResult::classify(response);
                    match &result {
                        DeliveryResult::Delivered { .. } => tracing::debug!("batch delivered"),
                        DeliveryResult::Retryable(error) => {
                            tracing::warn!(error = %error, "batch delivery failed, will retry");
                        },
                        DeliveryResult::Rejected(error) => {
                            tracing::warn!(error = %error, "batch rejected by collector");
                        },
                    }
                    result
                },
                Err(error) => DeliveryResult::from_error(error),
            }
        }
        .instrument(span)
        .await
    }
}

/// Extracts the retry delay from a `Retry-After` header.
///
/// Accepts delta-seconds or an HTTP date. An unparsable value falls back to
/// [`DEFAULT_RETRY_AFTER_SECONDS`]. Returns `None` when the header is absent.
pub fn extract_retry_after_seconds(headers: &HeaderMap) -> Option<u64> {
    let retry_after = headers.get(reqwest::header::RETRY_AFTER)?;
    let Ok(value) = retry_after.to_str() else {
        return Some(DEFAULT_RETRY_AFTER_SECONDS);
    };

    if let Ok(seconds) = value.trim().parse::<u64>() {
        return Some(seconds);
    }

    if let Ok(date_time) = chrono::DateTime::parse_from_rfc2822(value) {
        let now = chrono::Utc::now();
        let retry_time = date_time.with_timezone(&chrono::Utc);
        if let Ok(delay) = retry_time.signed_duration_since(now).to_std() {
            return Some(delay.as_secs());
        }
        return Some(0);
    }

    Some(DEFAULT_RETRY_AFTER_SECONDS)
}

/// Details of the most recent failed send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastError {
    /// HTTP status, if the collector answered.
    pub status: Option<u16>,
    /// Response body, or the failure description.
    pub body: String,
}

impl From<&DeliveryError> for LastError {
    fn from(error: &DeliveryError) -> Self {
        Self { status: error.status_code(), body: error.response_body() }
    }
}

/// Single-slot record of the latest send failure.
///
/// Last write wins. A successful send clears it.
#[derive(Debug, Default)]
pub struct LastErrorSlot {
    slot: Mutex<Option<LastError>>,
}

impl LastErrorSlot {
    /// Creates an empty slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a failed send.
    pub fn record(&self, error: &DeliveryError) {
        *self.slot.lock() = Some(LastError::from(error));
    }

    /// Clears the slot after a successful send.
    pub fn clear(&self) {
        self.slot.lock().take();
    }

    /// Current contents.
    pub fn get(&self) -> Option<LastError> {
        self.slot.lock().clone()
    }
}

pub mod mock {
    //! Scriptable in-memory transport for testing.
    //!
    //! Results are returned in the order they were scripted. Once the script
    //! runs out, the fallback result is returned (200 delivered by default).

    use std::{
        collections::VecDeque,
        sync::atomic::{AtomicBool, AtomicUsize, Ordering},
    };

    use async_trait::async_trait;
    use faultline_core::{WireBatch, WireEvent};
    use parking_lot::Mutex;

    use super::{DeliveryResult, Transport};

    /// Transport double that records every batch it is given.
    #[derive(Debug)]
    pub struct MockTransport {
        script: Mutex<VecDeque<DeliveryResult>>,
        fallback: Mutex<DeliveryResult>,
        batches: Mutex<Vec<WireBatch>>,
        calls: AtomicUsize,
        hang: AtomicBool,
    }

    impl MockTransport {
        /// Creates a transport that accepts everything.
        pub fn new() -> Self {
            Self {
                script: Mutex::new(VecDeque::new()),
                fallback: Mutex::new(DeliveryResult::Delivered { status: 200 }),
                batches: Mutex::new(Vec::new()),
                calls: AtomicUsize::new(0),
                hang: AtomicBool::new(false),
            }
        }

        /// Creates a transport that returns `results` in order.
        pub fn with_results(results: impl IntoIterator<Item = DeliveryResult>) -> Self {
            let transport = Self::new();
            transport.script.lock().extend(results);
            transport
        }

        /// Creates a transport that returns `result` for every send.
        pub fn always(result: DeliveryResult) -> Self {
            let transport = Self::new();
            *transport.fallback.lock() = result;
            transport
        }

        /// Creates a transport whose sends never complete.
        pub fn hanging() -> Self {
            let transport = Self::new();
            transport.hang.store(true, Ordering::SeqCst);
            transport
        }

        /// Lets later sends complete. Sends already hung stay pending.
        pub fn release(&self) {
            self.hang.store(false, Ordering::SeqCst);
        }

        /// Appends a result to the script.
        pub fn push_result(&self, result: DeliveryResult) {
            self.script.lock().push_back(result);
        }

        /// Number of `send` calls so far, including hung ones.
        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        /// Batches received, decoded from their wire bytes.
        pub fn batches(&self) -> Vec<WireBatch> {
            self.batches.lock().clone()
        }

        /// Every event received, in send order.
        pub fn events(&self) -> Vec<WireEvent> {
            self.batches.lock().iter().flat_map(|batch| batch.events.iter().cloned()).collect()
        }
    }

    impl Default for MockTransport {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn send(&self, batch: &WireBatch) -> DeliveryResult {
            self.calls.fetch_add(1, Ordering::SeqCst);

            if let Some(decoded) =
                batch.encode().ok().and_then(|bytes| WireBatch::decode(&bytes).ok())
            {
                self.batches.lock().push(decoded);
            }

            if self.hang.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }

            let scripted = self.script.lock().pop_front();
            scripted.unwrap_or_else(|| self.fallback.lock().clone())
        }
    }
}
