//! The network seam.

use crate::request::ApiRequest;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tessera_core::EngineError;
use tessera_core::value::display;
use thiserror::Error;

/// A raw provider response.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    /// HTTP status code.
    pub status: u16,
    /// Parsed JSON body, or the body text as a JSON string when it is not JSON.
    pub body: Value,
}

impl ApiResponse {
    /// A `200 OK` response.
    pub fn ok(body: impl Into<Value>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }

    /// A response with the given status.
    pub fn with_status(status: u16, body: impl Into<Value>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Whether the status is 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Failures below the HTTP layer.
#[non_exhaustive]
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The call did not complete in time.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Connection-level failure.
    #[error("network error: {0}")]
    Network(String),

    /// The response could not be read.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl From<TransportError> for EngineError {
    fn from(err: TransportError) -> Self {
        EngineError::ApiFailure(err.to_string())
    }
}

/// Sends resolved requests. Implementations must be shareable across tasks.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one request and return the raw response, whatever its status.
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, TransportError>;
}

/// Map a non-2xx status to its error kind.
///
/// 401/403 → authentication, 429 → rate limited, 5xx → provider
/// unavailable, any other non-2xx → invalid parameters.
pub fn classify_status(provider: &str, response: &ApiResponse) -> Result<(), EngineError> {
    if response.is_success() {
        return Ok(());
    }
    let detail = format!("{provider} returned HTTP {}: {}", response.status, display(&response.body));
    Err(match response.status {
        401 | 403 => EngineError::AuthenticationFailure(detail),
        429 => EngineError::RateLimited(detail),
        500..=599 => EngineError::ProviderUnavailable(detail),
        _ => EngineError::InvalidParameters(detail),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tessera_core::ErrorKind;

    #[test]
    fn transport_errors_become_api_failures() {
        let err: EngineError = TransportError::Timeout(Duration::from_millis(50)).into();
        assert_eq!(err.kind(), ErrorKind::ApiFailure);
        assert!(err.is_retryable());
    }

    #[test]
    fn known_statuses() {
        let kind = |status| {
            classify_status("p", &ApiResponse::with_status(status, "x"))
                .unwrap_err()
                .kind()
        };
        assert_eq!(kind(401), ErrorKind::AuthenticationFailure);
        assert_eq!(kind(403), ErrorKind::AuthenticationFailure);
        assert_eq!(kind(429), ErrorKind::RateLimited);
        assert_eq!(kind(503), ErrorKind::ProviderUnavailable);
        assert_eq!(kind(404), ErrorKind::InvalidParameters);
    }

    proptest! {
        #[test]
        fn success_statuses_pass(status in 200u16..300) {
            prop_assert!(classify_status("p", &ApiResponse::with_status(status, Value::Null)).is_ok());
        }

        #[test]
        fn server_errors_are_retryable(status in 500u16..600) {
            let err = classify_status("p", &ApiResponse::with_status(status, Value::Null)).unwrap_err();
            prop_assert!(err.is_retryable());
        }
    }
}
