//! The failure taxonomy shared by every tessera component.

use crate::intent::Intent;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Classification of a failure.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Network failure or timeout while calling a provider.
    ApiFailure,
    /// The provider (or the local rate-limit window) refused the call.
    RateLimited,
    /// The request cannot be answered without more information.
    AmbiguousIntent,
    /// A step or provider received parameters it cannot use.
    InvalidParameters,
    /// No provider can serve the call, or the provider failed server-side.
    ProviderUnavailable,
    /// The provider rejected our credentials.
    AuthenticationFailure,
    /// A step tag outside the instruction whitelist.
    UnknownOperation,
    /// Anything else.
    Unknown,
}

/// How bad a failure is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Expected in normal operation.
    Low,
    /// Degraded service.
    Medium,
    /// Configuration or security problem.
    High,
}

/// What the caller should do with a failure that survived fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// Do not retry; ask the user for more information.
    NeedsClarification,
    /// The caller may retry with backoff.
    Retryable,
    /// Configuration or security violation; never retry.
    Fatal,
}

impl ErrorKind {
    /// All kinds, in declaration order.
    pub const ALL: [ErrorKind; 8] = [
        ErrorKind::ApiFailure,
        ErrorKind::RateLimited,
        ErrorKind::AmbiguousIntent,
        ErrorKind::InvalidParameters,
        ErrorKind::ProviderUnavailable,
        ErrorKind::AuthenticationFailure,
        ErrorKind::UnknownOperation,
        ErrorKind::Unknown,
    ];

    /// Severity attached to this kind.
    pub fn severity(self) -> Severity {
        match self {
            ErrorKind::RateLimited | ErrorKind::AmbiguousIntent => Severity::Low,
            ErrorKind::ProviderUnavailable
            | ErrorKind::AuthenticationFailure
            | ErrorKind::UnknownOperation => Severity::High,
            ErrorKind::ApiFailure | ErrorKind::InvalidParameters | ErrorKind::Unknown => {
                Severity::Medium
            }
        }
    }

    /// Whether retrying the same call later might succeed.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::ApiFailure | ErrorKind::RateLimited | ErrorKind::ProviderUnavailable
        )
    }

    /// Parse the wire name used by `error` steps (`"RateLimited"`).
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.name() == name)
    }

    /// The wire name of this kind.
    pub fn name(self) -> &'static str {
        match self {
            ErrorKind::ApiFailure => "ApiFailure",
            ErrorKind::RateLimited => "RateLimited",
            ErrorKind::AmbiguousIntent => "AmbiguousIntent",
            ErrorKind::InvalidParameters => "InvalidParameters",
            ErrorKind::ProviderUnavailable => "ProviderUnavailable",
            ErrorKind::AuthenticationFailure => "AuthenticationFailure",
            ErrorKind::UnknownOperation => "UnknownOperation",
            ErrorKind::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Engine errors. Every variant maps onto one [`ErrorKind`].
#[non_exhaustive]
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// Network failure or timeout.
    #[error("api call failed: {0}")]
    ApiFailure(String),

    /// Rate limited, locally or by the provider.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// The intent is ambiguous.
    #[error("ambiguous intent: {0}")]
    AmbiguousIntent(String),

    /// Parameters are missing or malformed.
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    /// No provider can serve the request.
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Credentials were rejected.
    #[error("authentication failed: {0}")]
    AuthenticationFailure(String),

    /// A step tag outside the whitelist, or an unknown library function.
    #[error("unknown operation: {0}")]
    UnknownOperation(String),

    /// An `error` step asked for clarification. Never retried.
    #[error("needs clarification: {0}")]
    Clarification(String),

    /// No plan could be built; the host should route to a general answer path.
    #[error("escalation required: {message}")]
    Escalation {
        /// Why escalation is needed.
        message: String,
        /// The intent that could not be planned.
        intent: Option<Box<Intent>>,
    },

    /// Every branch of a fan-out failed.
    #[error("all {} calls failed: {}", .failures.len(), summarize(.failures))]
    AllCallsFailed {
        /// One error per branch, in declaration order.
        failures: Vec<EngineError>,
    },

    /// The execution was cancelled by its caller.
    #[error("execution cancelled")]
    Cancelled,

    /// Catch-all. Include context.
    #[error("{0}")]
    Unknown(String),
}

fn summarize(failures: &[EngineError]) -> String {
    failures
        .iter()
        .enumerate()
        .map(|(i, e)| format!("[{i}] {e}"))
        .collect::<Vec<_>>()
        .join("; ")
}

impl EngineError {
    /// Build the variant for `kind` carrying `message`.
    pub fn from_kind(kind: ErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        match kind {
            ErrorKind::ApiFailure => EngineError::ApiFailure(message),
            ErrorKind::RateLimited => EngineError::RateLimited(message),
            ErrorKind::AmbiguousIntent => EngineError::AmbiguousIntent(message),
            ErrorKind::InvalidParameters => EngineError::InvalidParameters(message),
            ErrorKind::ProviderUnavailable => EngineError::ProviderUnavailable(message),
            ErrorKind::AuthenticationFailure => EngineError::AuthenticationFailure(message),
            ErrorKind::UnknownOperation => EngineError::UnknownOperation(message),
            ErrorKind::Unknown => EngineError::Unknown(message),
        }
    }

    /// The classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::ApiFailure(_) => ErrorKind::ApiFailure,
            EngineError::RateLimited(_) => ErrorKind::RateLimited,
            EngineError::AmbiguousIntent(_)
            | EngineError::Clarification(_)
            | EngineError::Escalation { .. } => ErrorKind::AmbiguousIntent,
            EngineError::InvalidParameters(_) => ErrorKind::InvalidParameters,
            EngineError::ProviderUnavailable(_) => ErrorKind::ProviderUnavailable,
            EngineError::AuthenticationFailure(_) => ErrorKind::AuthenticationFailure,
            EngineError::UnknownOperation(_) => ErrorKind::UnknownOperation,
            // Retryable as soon as any branch is; declaration order only
            // picks which retryable kind is reported.
            EngineError::AllCallsFailed { failures } => failures
                .iter()
                .find(|e| e.is_retryable())
                .or_else(|| failures.first())
                .map_or(ErrorKind::ApiFailure, EngineError::kind),
            EngineError::Cancelled | EngineError::Unknown(_) => ErrorKind::Unknown,
        }
    }

    /// Severity of this error.
    pub fn severity(&self) -> Severity {
        self.kind().severity()
    }

    /// Whether retrying might succeed. Clarification requests and
    /// escalations are never retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::Clarification(_)
            | EngineError::Escalation { .. }
            | EngineError::Cancelled => false,
            other => other.kind().is_retryable(),
        }
    }

    /// What the caller should do with this error.
    pub fn disposition(&self) -> Disposition {
        match self.kind() {
            ErrorKind::AmbiguousIntent => Disposition::NeedsClarification,
            _ if self.is_retryable() => Disposition::Retryable,
            _ => Disposition::Fatal,
        }
    }

    /// Whether step-level fallback may be attempted for this error: only
    /// retryable failures, never fatal ones or clarification requests.
    pub fn allows_fallback(&self) -> bool {
        self.disposition() == Disposition::Retryable
    }

    /// Whether the host should route the request to a fallback answer path.
    pub fn should_escalate(&self) -> bool {
        matches!(
            self,
            EngineError::Escalation { .. } | EngineError::UnknownOperation(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_round_trip() {
        for kind in ErrorKind::ALL {
            assert_eq!(ErrorKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(ErrorKind::from_name("Nope"), None);
    }

    #[test]
    fn unknown_operation_is_fatal() {
        let err = EngineError::UnknownOperation("eval".into());
        assert_eq!(err.severity(), Severity::High);
        assert!(!err.is_retryable());
        assert_eq!(err.disposition(), Disposition::Fatal);
        assert!(!err.allows_fallback());
    }

    #[test]
    fn clarification_is_not_retried() {
        let err = EngineError::Clarification("which account?".into());
        assert_eq!(err.kind(), ErrorKind::AmbiguousIntent);
        assert_eq!(err.disposition(), Disposition::NeedsClarification);
        assert!(!err.allows_fallback());
    }

    #[test]
    fn network_failures_are_retryable() {
        let err = EngineError::ApiFailure("timed out".into());
        assert_eq!(err.disposition(), Disposition::Retryable);
        assert!(err.allows_fallback());
        assert!(!EngineError::AuthenticationFailure("bad key".into()).allows_fallback());
    }

    #[test]
    fn aggregated_error_enumerates_branches() {
        let err = EngineError::AllCallsFailed {
            failures: vec![
                EngineError::ApiFailure("a down".into()),
                EngineError::RateLimited("b busy".into()),
            ],
        };
        let text = err.to_string();
        assert!(text.starts_with("all 2 calls failed"));
        assert!(text.contains("[0] api call failed: a down"));
        assert!(text.contains("[1] rate limited: b busy"));
        assert_eq!(err.kind(), ErrorKind::ApiFailure);
    }

    #[test]
    fn aggregate_is_retryable_when_any_branch_is() {
        let not_found = || EngineError::InvalidParameters("eth: HTTP 404".into());
        let outage = || EngineError::ProviderUnavailable("btc: HTTP 500".into());
        for failures in [vec![not_found(), outage()], vec![outage(), not_found()]] {
            let err = EngineError::AllCallsFailed { failures };
            assert_eq!(err.kind(), ErrorKind::ProviderUnavailable);
            assert!(err.allows_fallback());
        }

        let fatal = EngineError::AllCallsFailed {
            failures: vec![
                EngineError::AuthenticationFailure("bad key".into()),
                EngineError::InvalidParameters("HTTP 404".into()),
            ],
        };
        assert_eq!(fatal.kind(), ErrorKind::AuthenticationFailure);
        assert!(!fatal.allows_fallback());
    }

    #[test]
    fn display_messages() {
        assert_eq!(
            EngineError::UnknownOperation("eval".into()).to_string(),
            "unknown operation: eval"
        );
        assert_eq!(EngineError::Cancelled.to_string(), "execution cancelled");
    }
}
