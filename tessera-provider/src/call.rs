//! One provider call, end to end.

use crate::registry::ProviderEntry;
use crate::request::{ApiRequest, Method};
use crate::transport::{Transport, TransportError, classify_status};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use tessera_core::EngineError;
use tokio::time::Instant;

/// What to call on a provider, with parameters already resolved.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallSpec {
    /// Endpoint name from the provider manifest.
    pub endpoint: String,
    /// Path and query parameters.
    #[serde(default)]
    pub params: Map<String, Value>,
    /// HTTP method.
    #[serde(default)]
    pub method: Method,
    /// JSON body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl CallSpec {
    /// A GET against `endpoint` with no parameters.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    /// Replace the parameters.
    #[must_use]
    pub fn with_params(mut self, params: Map<String, Value>) -> Self {
        self.params = params;
        self
    }

    /// Set the method.
    #[must_use]
    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Set the body.
    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// Issue one call against `entry`.
///
/// Fails with `RateLimited` without sending anything when the provider's
/// window is full. Otherwise the call is bounded by the provider's
/// `timeoutMs` (or `default_timeout`), its status is classified, and the
/// outcome is recorded on the provider's counters.
pub async fn dispatch(
    entry: &ProviderEntry,
    transport: &dyn Transport,
    spec: &CallSpec,
    default_timeout: Duration,
) -> Result<Value, EngineError> {
    let provider = entry.id().as_str();
    let timeout = entry
        .manifest()
        .timeout_ms
        .map_or(default_timeout, Duration::from_millis);
    let request = ApiRequest::build(entry.id(), entry.manifest(), spec, timeout)?;

    if !entry.try_admit(Instant::now()) {
        tracing::warn!(provider, "rate-limit window full, call not sent");
        return Err(EngineError::RateLimited(format!(
            "{provider}: local request budget exhausted"
        )));
    }

    tracing::debug!(provider, method = %request.method, url = %request.url, "sending provider request");

    let result = match tokio::time::timeout(timeout, transport.send(request)).await {
        Ok(Ok(response)) => classify_status(provider, &response).map(|()| response.body),
        Ok(Err(err)) => Err(err.into()),
        Err(_) => Err(TransportError::Timeout(timeout).into()),
    };
    entry.record_call(result.is_ok());

    if let Err(err) = &result {
        tracing::debug!(provider, error = %err, "provider call failed");
    }
    result
}
