//! Outbound HTTP client for backend services
//!
//! Every backend call is a single JSON `POST` sent through a pooled hyper
//! client. JSON backends have their response decoded; the PDF backend's
//! response is returned untouched so its body can be streamed to the caller.

use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::{Bytes, Incoming};
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Upper bound on how much of an error body is kept for logging
const ERROR_BODY_LOG_LIMIT: usize = 4096;

/// Error type for backend calls
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// Error building the outbound request
    #[error("request build error: {0}")]
    RequestBuild(String),
    /// Connection refused, DNS failure, reset, ...
    #[error("transport error: {0}")]
    Transport(#[from] hyper_util::client::legacy::Error),
    /// Backend answered with a non-2xx status
    #[error("backend responded with status {status}: {body}")]
    Status { status: StatusCode, body: String },
    /// Failed while reading the response body
    #[error("failed to read backend response: {0}")]
    Body(#[source] Box<dyn std::error::Error + Send + Sync>),
    /// JSON response exceeded the configured size
    #[error("backend response exceeds {0} bytes")]
    ResponseTooLarge(usize),
    /// Response body was not JSON
    #[error("backend response is not valid JSON: {0}")]
    Decode(#[from] serde_json::Error),
    /// Backend did not answer within the configured timeout
    #[error("backend did not respond within {} seconds", .0.as_secs())]
    Timeout(Duration),
}

/// Statistics for outbound calls
#[derive(Debug, Default)]
pub struct ClientStats {
    /// Total number of backend calls attempted
    pub total_requests: AtomicU64,
    /// Calls that ended in a [`BackendError`]
    pub failed_requests: AtomicU64,
}

impl ClientStats {
    pub fn record_request(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failed_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    pub fn get_failed_requests(&self) -> u64 {
        self.failed_requests.load(Ordering::Relaxed)
    }
}

/// Configuration for the backend client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Maximum idle connections per host
    pub max_idle_per_host: usize,
    /// Idle connection timeout
    pub idle_timeout: Duration,
    /// Time allowed for the backend to send response headers (None = no limit)
    pub request_timeout: Option<Duration>,
    /// Largest JSON response body read from a backend
    pub max_response_bytes: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_idle_per_host: 10,
            idle_timeout: Duration::from_secs(90),
            request_timeout: None,
            max_response_bytes: 16 * 1024 * 1024,
        }
    }
}

impl From<&crate::config::ServerConfig> for ClientConfig {
    fn from(server: &crate::config::ServerConfig) -> Self {
        Self {
            max_idle_per_host: server.pool_max_idle_per_host,
            idle_timeout: server.pool_idle_timeout(),
            request_timeout: server.request_timeout(),
            max_response_bytes: server.max_backend_response_bytes,
        }
    }
}

/// Pooled HTTP client used by the route handlers
pub struct BackendClient {
    client: Client<HttpConnector, Full<Bytes>>,
    stats: Arc<ClientStats>,
    config: ClientConfig,
}

impl BackendClient {
    pub fn new(config: ClientConfig) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_nodelay(true);
        connector.enforce_http(true);

        let client = Client::builder(TokioExecutor::new())
            .pool_max_idle_per_host(config.max_idle_per_host)
            .pool_idle_timeout(config.idle_timeout)
            .build(connector);

        debug!(
            max_idle = config.max_idle_per_host,
            idle_timeout_secs = config.idle_timeout.as_secs(),
            request_timeout_secs = config.request_timeout.map(|t| t.as_secs()),
            "Backend client initialized"
        );

        Self {
            client,
            stats: Arc::new(ClientStats::default()),
            config,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn stats(&self) -> Arc<ClientStats> {
        Arc::clone(&self.stats)
    }

    /// POST `payload` to `url` and decode the JSON answer
    pub async fn post_json(&self, url: &str, payload: &Value) -> Result<Value, BackendError> {
        let result = async {
            let response = self.send(url, payload).await?;
            let limit = self.config.max_response_bytes;
            let bytes = Limited::new(response.into_body(), limit)
                .collect()
                .await
                .map_err(|e| {
                    if e.is::<LengthLimitError>() {
                        BackendError::ResponseTooLarge(limit)
                    } else {
                        BackendError::Body(e)
                    }
                })?
                .to_bytes();
            Ok::<Value, BackendError>(serde_json::from_slice(&bytes)?)
        }
        .await;

        if result.is_err() {
            self.stats.record_failure();
        }
        result
    }

    /// POST `payload` to `url` and hand back the response with its body unread
    pub async fn post_stream(
        &self,
        url: &str,
        payload: &Value,
    ) -> Result<Response<Incoming>, BackendError> {
        let result = self.send(url, payload).await;
        if result.is_err() {
            self.stats.record_failure();
        }
        result
    }

    /// Send one request and require a 2xx status
    async fn send(&self, url: &str, payload: &Value) -> Result<Response<Incoming>, BackendError> {
        let req = Request::builder()
            .method(Method::POST)
            .uri(url)
            .header(hyper::header::CONTENT_TYPE, "application/json")
            .header(hyper::header::ACCEPT, "application/json, */*")
            .body(Full::new(Bytes::from(payload.to_string())))
            .map_err(|e| BackendError::RequestBuild(e.to_string()))?;

        self.stats.record_request();

        let response = match self.config.request_timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.client.request(req))
                .await
                .map_err(|_| BackendError::Timeout(timeout))??,
            None => self.client.request(req).await?,
        };

        let status = response.status();
        if !status.is_success() {
            return Err(BackendError::Status {
                status,
                body: read_error_body(response.into_body()).await,
            });
        }

        debug!(url, status = %status, "Backend responded");
        Ok(response)
    }
}

/// Read at most [`ERROR_BODY_LOG_LIMIT`] bytes of an error body for the logs
async fn read_error_body(body: Incoming) -> String {
    match Limited::new(body, ERROR_BODY_LOG_LIMIT).collect().await {
        Ok(collected) => String::from_utf8_lossy(&collected.to_bytes()).into_owned(),
        Err(e) => format!("<unreadable body: {}>", e),
    }
}
