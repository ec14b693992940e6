//! An in-memory [`Transport`] double for deterministic engine tests.
//!
//! Scripted with a queue of canned [`TransportResponse`]s and records every
//! [`TransportRequest`] it receives so tests can assert on headers (the
//! NTLM handshake, `X-MS-PolicyKey`) and bodies (the WBXML the engine
//! actually sent) without a network.

use std::sync::Mutex;

use async_trait::async_trait;

use super::{Transport, TransportError, TransportRequest, TransportResponse};

/// A request captured by [`MockTransport`], paired with the order it was received in.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    /// The request as sent.
    pub request: TransportRequest,
}

/// An in-memory [`Transport`] that replays a scripted sequence of
/// responses and records every request it was asked to send.
///
/// Available unconditionally so downstream consumers can write their own
/// integration tests against this crate's public `Transport` trait;
/// gated behind the `test-internals` feature only insofar as that feature
/// also pulls in `tracing-subscriber` for test log setup elsewhere.
pub struct MockTransport {
    responses: Mutex<Vec<Result<TransportResponse, String>>>,
    recorded: Mutex<Vec<RecordedRequest>>,
}

impl MockTransport {
    /// Creates an empty mock transport; calling [`Transport::send`] before
    /// [`Self::push_response`] will return a transport error.
    #[must_use]
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(Vec::new()),
            recorded: Mutex::new(Vec::new()),
        }
    }

    /// Queues a response to be returned by the next [`Transport::send`] call.
    pub fn push_response(&self, response: TransportResponse) {
        self.responses.lock().unwrap().push(Ok(response));
    }

    /// Queues a transport-level failure (connection reset, timeout, etc.)
    /// to be returned by the next [`Transport::send`] call.
    pub fn push_error(&self, message: impl Into<String>) {
        self.responses.lock().unwrap().push(Err(message.into()));
    }

    /// Returns every request recorded so far, oldest first.
    #[must_use]
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.recorded.lock().unwrap().clone()
    }

    /// Returns the number of requests recorded so far.
    #[must_use]
    pub fn request_count(&self) -> usize {
        self.recorded.lock().unwrap().len()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        self.recorded.lock().unwrap().push(RecordedRequest {
            request: request.clone(),
        });

        let mut queue = self.responses.lock().unwrap();
        if queue.is_empty() {
            return Err(TransportError::new(format!(
                "MockTransport exhausted: no scripted response for request to {}",
                request.url
            )));
        }
        match queue.remove(0) {
            Ok(response) => Ok(response),
            Err(message) => Err(TransportError::new(message)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn req(url: &str) -> TransportRequest {
        TransportRequest {
            url: url.to_string(),
            headers: HashMap::new(),
            body: Vec::new(),
        }
    }

    #[tokio::test]
    async fn replays_scripted_responses_in_order() {
        let mock = MockTransport::new();
        mock.push_response(TransportResponse {
            status: 200,
            headers: HashMap::new(),
            body: vec![1],
        });
        mock.push_response(TransportResponse {
            status: 401,
            headers: HashMap::new(),
            body: vec![2],
        });

        let first = mock.send(req("https://example.com/a")).await.unwrap();
        assert_eq!(first.status, 200);
        let second = mock.send(req("https://example.com/b")).await.unwrap();
        assert_eq!(second.status, 401);

        assert_eq!(mock.request_count(), 2);
    }

    #[tokio::test]
    async fn exhausted_queue_errors() {
        let mock = MockTransport::new();
        assert!(mock.send(req("https://example.com/a")).await.is_err());
    }

    #[tokio::test]
    async fn push_error_surfaces_as_transport_error() {
        let mock = MockTransport::new();
        mock.push_error("connection reset");
        assert!(mock.send(req("https://example.com/a")).await.is_err());
    }
}
