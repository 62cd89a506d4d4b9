//! Blocking transport for OCSP, CRL and time-stamp requests.
//!
//! The engine never opens sockets itself. Callers plug in a [`Transport`]
//! (an HTTP client, a cache, a test double); the clients in this crate build
//! the request blobs, call the transport under a [`RetryPolicy`] and decode
//! the answers.

use super::config::RetryPolicy;
use crate::error::{Error, Result};
use std::time::Duration;

/// Media types used by the revocation and timestamp protocols.
pub mod content_type {
    /// OCSP request body
    pub const OCSP_REQUEST: &str = "application/ocsp-request";
    /// OCSP response body
    pub const OCSP_RESPONSE: &str = "application/ocsp-response";
    /// RFC 3161 request body
    pub const TIMESTAMP_QUERY: &str = "application/timestamp-query";
    /// RFC 3161 response body
    pub const TIMESTAMP_REPLY: &str = "application/timestamp-reply";
    /// CRL download
    pub const PKIX_CRL: &str = "application/pkix-crl";
}

/// HTTP basic authentication for a TSA.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Credentials {
    /// User name
    pub username: String,
    /// Password
    pub password: String,
}

impl Credentials {
    /// Create a credentials pair.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

/// A failed exchange.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// No answer within the timeout
    #[error("request timed out")]
    Timeout,
    /// Connection refused, DNS failure and the like
    #[error("endpoint unreachable: {0}")]
    Unreachable(String),
    /// The server answered with an error status
    #[error("HTTP status {0}")]
    Http(u16),
}

impl TransportError {
    /// Whether another attempt may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            TransportError::Timeout | TransportError::Unreachable(_) => true,
            TransportError::Http(status) => *status >= 500 || *status == 429,
        }
    }
}

/// A single outgoing request.
#[derive(Debug, Clone, Copy)]
pub struct Request<'a> {
    /// Endpoint URL
    pub url: &'a str,
    /// Request body; `None` for GET
    pub body: Option<&'a [u8]>,
    /// Media type of the body
    pub content_type: &'a str,
    /// Basic authentication
    pub credentials: Option<&'a Credentials>,
    /// Give up after this long
    pub timeout: Duration,
}

/// Moves request blobs to an endpoint and returns the response body.
pub trait Transport: Send + Sync {
    /// Perform one exchange.
    fn send(&self, request: &Request<'_>) -> std::result::Result<Vec<u8>, TransportError>;
}

impl<T: Transport + ?Sized> Transport for &T {
    fn send(&self, request: &Request<'_>) -> std::result::Result<Vec<u8>, TransportError> {
        (**self).send(request)
    }
}

impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    fn send(&self, request: &Request<'_>) -> std::result::Result<Vec<u8>, TransportError> {
        (**self).send(request)
    }
}

/// Send `request`, retrying transient failures with exponential backoff.
/// Gives up after `policy.max_attempts` and reports [`Error::NetworkUnavailable`].
pub fn send_with_retry(transport: &dyn Transport, policy: &RetryPolicy, request: &Request<'_>) -> Result<Vec<u8>> {
    let attempts = policy.max_attempts.max(1);
    let mut last_error = None;

    for attempt in 1..=attempts {
        let delay = policy.backoff(attempt);
        if !delay.is_zero() {
            log::debug!("Retrying {} in {:?} (attempt {}/{})", request.url, delay, attempt, attempts);
            std::thread::sleep(delay);
        }
        match transport.send(request) {
            Ok(body) => return Ok(body),
            Err(e) if e.is_transient() => {
                log::warn!("{} failed: {} (attempt {}/{})", request.url, e, attempt, attempts);
                last_error = Some(e);
            },
            Err(e) => {
                log::warn!("{} failed permanently: {}", request.url, e);
                return Err(Error::NetworkUnavailable(format!("{}: {}", request.url, e)));
            },
        }
    }

    let reason = last_error.map(|e| e.to_string()).unwrap_or_default();
    Err(Error::NetworkUnavailable(format!(
        "{}: {} after {} attempt(s)",
        request.url, reason, attempts
    )))
}

/// POST `body` to `url`.
pub fn post(
    transport: &dyn Transport,
    policy: &RetryPolicy,
    url: &str,
    content_type: &str,
    body: &[u8],
    credentials: Option<&Credentials>,
) -> Result<Vec<u8>> {
    let request = Request {
        url,
        body: Some(body),
        content_type,
        credentials,
        timeout: policy.timeout(),
    };
    send_with_retry(transport, policy, &request)
}

/// GET `url`.
pub fn get(transport: &dyn Transport, policy: &RetryPolicy, url: &str, content_type: &str) -> Result<Vec<u8>> {
    let request = Request {
        url,
        body: None,
        content_type,
        credentials: None,
        timeout: policy.timeout(),
    };
    send_with_retry(transport, policy, &request)
}
