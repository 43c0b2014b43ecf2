//! Transport plumbing.
//!
//! `Transport` is the seam between the client and the network: the real
//! implementation is `ReqwestTransport`, tests plug in scripted doubles.
//! `Dispatcher` turns an `ApiRequest` into a `PreparedRequest`, enforces
//! the configured timeout, and reports every non-2xx response as a
//! `TransportError::Status` so callers only see raw failures here.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Client, Method, StatusCode, Url};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use super::request::{ApiRequest, ApiResponse, CORRELATION_ID_HEADER};
use crate::config::ClientConfig;

/// Maximum length for response bodies in log fields
const MAX_LOGGED_BODY_LENGTH: usize = 500;

/// A raw transport-level failure, before classification
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("No response received: {0}")]
    NoResponse(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("Request failed with status {status}")]
    Status { status: StatusCode, body: Value },

    #[error("Invalid request URL: {0}")]
    InvalidUrl(String),

    #[error("Failed to encode request body: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("Failed to decode response body: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("Unexpected response: {0}")]
    UnexpectedBody(String),
}

impl TransportError {
    /// Status of the response, when one arrived
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            TransportError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(StatusCode::UNAUTHORIZED)
    }
}

/// Fully resolved request handed to a `Transport`
#[derive(Debug)]
pub struct PreparedRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Value>,
    pub timeout: Duration,
}

pub trait Transport: Send + Sync {
    /// Send one request. Any response that arrives, whatever its status,
    /// is `Ok`; only failures to obtain a response are errors.
    fn send(&self, request: PreparedRequest) -> BoxFuture<'_, Result<ApiResponse, TransportError>>;
}

/// HTTP transport over a shared reqwest connection pool.
/// Clone is cheap - reqwest::Client uses Arc internally.
#[derive(Clone, Default)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = Client::builder().build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

impl Transport for ReqwestTransport {
    fn send(&self, request: PreparedRequest) -> BoxFuture<'_, Result<ApiResponse, TransportError>> {
        Box::pin(async move {
            let PreparedRequest {
                method,
                url,
                headers,
                body,
                timeout,
            } = request;

            let mut builder = self
                .client
                .request(method, url)
                .headers(headers)
                .timeout(timeout);
            if let Some(ref body) = body {
                builder = builder.json(body);
            }

            let response = builder
                .send()
                .await
                .map_err(|e| from_reqwest(e, timeout))?;
            let status = response.status();
            let headers = response.headers().clone();
            match response.bytes().await {
                Ok(body) => Ok(ApiResponse::new(status, headers, body.to_vec())),
                Err(e) if e.is_timeout() => Err(TransportError::Timeout(timeout)),
                Err(e) => unreadable_body(status, headers, &e),
            }
        })
    }
}

/// The status line arrived but the body could not be read. Error statuses
/// keep their status with an empty body, so they still classify by range.
/// A success status with no readable body is an unexpected body.
fn unreadable_body(
    status: StatusCode,
    headers: HeaderMap,
    error: &dyn std::error::Error,
) -> Result<ApiResponse, TransportError> {
    debug!(status = status.as_u16(), error = %error, "Failed to read response body");
    if status.is_success() {
        Err(TransportError::UnexpectedBody(format!(
            "failed to read {status} response body: {error}"
        )))
    } else {
        Ok(ApiResponse::new(status, headers, Vec::new()))
    }
}

fn from_reqwest(e: reqwest::Error, timeout: Duration) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout(timeout)
    } else if e.is_builder() {
        TransportError::InvalidUrl(e.to_string())
    } else {
        TransportError::NoResponse(Box::new(e))
    }
}

/// Resolves requests against the configured base URL and sends them with
/// the default timeout. Clone is cheap.
#[derive(Clone)]
pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    base_url: String,
    timeout: Duration,
}

impl Dispatcher {
    pub fn new(config: &ClientConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout: config.timeout,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Resolve the URL and headers for `request`
    pub fn prepare(&self, request: &ApiRequest) -> Result<PreparedRequest, TransportError> {
        let path = request.path();
        let raw = if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        };
        let mut url = Url::parse(&raw).map_err(|e| TransportError::InvalidUrl(format!("{raw}: {e}")))?;
        if !request.query_pairs().is_empty() {
            url.query_pairs_mut().extend_pairs(request.query_pairs());
        }

        let mut headers = request.headers().clone();
        headers
            .entry(header::ACCEPT)
            .or_insert(HeaderValue::from_static("application/json"));
        let correlation_id = HeaderValue::from_str(request.correlation_id())
            .map_err(|e| TransportError::InvalidUrl(e.to_string()))?;
        headers.insert(CORRELATION_ID_HEADER, correlation_id);

        Ok(PreparedRequest {
            method: request.method().clone(),
            url,
            headers,
            body: request.body().cloned(),
            timeout: self.timeout,
        })
    }

    /// Send `request` once. Non-2xx responses come back as
    /// `TransportError::Status`; an expired timeout as `TransportError::Timeout`.
    pub async fn dispatch(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
        let prepared = self.prepare(request)?;
        debug!(
            method = %prepared.method,
            url = %prepared.url,
            correlation_id = request.correlation_id(),
            retried = request.is_retried(),
            "Dispatching request"
        );

        let response = match tokio::time::timeout(self.timeout, self.transport.send(prepared)).await {
            Ok(result) => result?,
            Err(_) => return Err(TransportError::Timeout(self.timeout)),
        };

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        debug!(
            status = status.as_u16(),
            correlation_id = request.correlation_id(),
            body = %truncate_body(&response.text()),
            "Request failed"
        );
        Err(TransportError::Status {
            status,
            body: response.json_value(),
        })
    }
}

/// Truncate a response body to avoid logging excessive data
fn truncate_body(body: &str) -> String {
    if body.len() <= MAX_LOGGED_BODY_LENGTH {
        return body.to_string();
    }
    let end = (0..=MAX_LOGGED_BODY_LENGTH)
        .rev()
        .find(|&i| body.is_char_boundary(i))
        .unwrap_or(0);
    format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
}
