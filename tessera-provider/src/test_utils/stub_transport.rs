//! StubTransport — canned responses keyed by URL or provider id.

use crate::request::ApiRequest;
use crate::transport::{ApiResponse, Transport, TransportError};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Mutex;
use std::time::Duration;

/// What a stub route answers with.
#[derive(Debug, Clone)]
pub struct Reply {
    outcome: Result<ApiResponse, TransportError>,
    delay: Option<Duration>,
}

impl Reply {
    /// `200 OK` with `body`.
    pub fn ok(body: impl Into<Value>) -> Self {
        Self {
            outcome: Ok(ApiResponse::ok(body)),
            delay: None,
        }
    }

    /// A response with an arbitrary status.
    pub fn status(status: u16, body: impl Into<Value>) -> Self {
        Self {
            outcome: Ok(ApiResponse::with_status(status, body)),
            delay: None,
        }
    }

    /// A network-level failure.
    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            outcome: Err(TransportError::Network(message.into())),
            delay: None,
        }
    }

    /// Wait `delay` (on the tokio clock) before answering.
    #[must_use]
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// A [`Transport`] that never touches the network.
///
/// A route key matches a request when it equals the request URL (with or
/// without query string) or the provider id. Routes are checked in the
/// order they were added. Unrouted requests fail with a network error.
/// Every request is logged; use `.requests()` to inspect them.
pub struct StubTransport {
    routes: Vec<(String, Reply)>,
    requests: Mutex<Vec<ApiRequest>>,
}

impl StubTransport {
    /// A stub with no routes.
    pub fn new() -> Self {
        Self {
            routes: Vec::new(),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Add a route.
    #[must_use]
    pub fn route(mut self, key: impl Into<String>, reply: Reply) -> Self {
        self.routes.push((key.into(), reply));
        self
    }

    /// Every request received so far, in arrival order.
    pub fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Number of requests received.
    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Number of requests received for one provider.
    pub fn requests_to(&self, provider: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.provider.as_str() == provider)
            .count()
    }

    fn find(&self, request: &ApiRequest) -> Option<&Reply> {
        let full = request.full_url();
        self.routes
            .iter()
            .find(|(key, _)| {
                key == &request.url || key == &full || key == request.provider.as_str()
            })
            .map(|(_, reply)| reply)
    }
}

impl Default for StubTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for StubTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
        let reply = self.find(&request).cloned();
        self.requests.lock().unwrap().push(request.clone());
        let Some(reply) = reply else {
            return Err(TransportError::Network(format!(
                "no stub route for {}",
                request.full_url()
            )));
        };
        if let Some(delay) = reply.delay {
            tokio::time::sleep(delay).await;
        }
        reply.outcome
    }
}
