//! The transport seam: everything this crate needs from an HTTP client,
//! expressed as one async trait.
//!
//! Two implementers exist: [`eas::EasClient`] wraps a concrete HTTP POST
//! (bring-your-own client; this crate depends on `tokio` for
//! synchronization primitives only, not an HTTP stack, so the actual
//! socket work is left to the caller's chosen client behind this trait) and
//! [`mock::MockTransport`], an in-memory double used by the integration
//! tests and available to downstream consumers under the
//! `test-internals` feature.

mod eas;
mod mock;

pub use eas::EasClient;
pub use mock::{MockTransport, RecordedRequest};

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;

/// A single POST request to send.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    /// Full request URL, including query string.
    pub url: String,
    /// Request headers, case-sensitive as provided.
    pub headers: HashMap<String, String>,
    /// Raw request body (WBXML bytes for EAS, UTF-8 SOAP XML for EWS).
    pub body: Vec<u8>,
}

/// The response to a [`TransportRequest`].
#[derive(Debug, Clone)]
pub struct TransportResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers, case-sensitive as received.
    pub headers: HashMap<String, String>,
    /// Raw response body.
    pub body: Vec<u8>,
}

impl TransportResponse {
    /// Looks up a header by case-insensitive name.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// An error from the transport layer: connection failure, timeout, or TLS
/// failure. Protocol-level failures (non-2xx status codes that still
/// carry a parseable EAS/EWS body) are not transport errors; those are
/// handled by the caller inspecting [`TransportResponse::status`].
#[derive(Debug)]
pub struct TransportError {
    message: String,
}

impl TransportError {
    /// Creates a new transport error with the given description.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transport error: {}", self.message)
    }
}

impl std::error::Error for TransportError {}

/// The async HTTP seam every protocol module is written against.
///
/// Implementers only need to perform a single POST and hand back the
/// status/headers/body; redirects, connection pooling, and TLS
/// verification are the implementer's responsibility and are out of scope
/// for this trait.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends `request` and returns the raw response.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] for any failure that prevented a
    /// response from being received at all.
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError>;
}

#[async_trait]
impl<U: Transport + ?Sized> Transport for std::sync::Arc<U> {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        self.as_ref().send(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_lookup_is_case_insensitive() {
        let mut headers = HashMap::new();
        headers.insert("X-MS-PolicyKey".to_string(), "abc123".to_string());
        let resp = TransportResponse {
            status: 200,
            headers,
            body: Vec::new(),
        };
        assert_eq!(resp.header("x-ms-policykey"), Some("abc123"));
        assert_eq!(resp.header("X-Missing"), None);
    }
}
