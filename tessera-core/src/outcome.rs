//! The result contract handed back to the host.

use crate::duration::DurationMs;
use crate::error::{Disposition, EngineError, ErrorKind, Severity};
use crate::id::ExecutionId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Result of handling one intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Outcome {
    /// Whether the recipe produced a result.
    pub success: bool,
    /// The recipe result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Human-readable text: the result when it is a string, otherwise the
    /// error message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Where the plan came from (`builtin:finance/get_info`,
    /// `capability:weather/forecast`, `escalation`).
    pub source: String,
    /// Wall-clock time of the execution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time_ms: Option<DurationMs>,
    /// Id of the execution record, when a recipe ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<ExecutionId>,
    /// Hint that the host should route to a fallback answer path.
    #[serde(default)]
    pub escalate: bool,
    /// Classification of the failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

/// Classification details of a failed outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// The failure kind.
    pub kind: ErrorKind,
    /// Its severity.
    pub severity: Severity,
    /// Whether the caller may retry.
    pub retryable: bool,
    /// What the caller should do next.
    pub disposition: Disposition,
}

impl From<&EngineError> for ErrorInfo {
    fn from(err: &EngineError) -> Self {
        Self {
            kind: err.kind(),
            severity: err.severity(),
            retryable: err.is_retryable(),
            disposition: err.disposition(),
        }
    }
}

impl Outcome {
    /// A successful outcome carrying `data`.
    pub fn success(data: Value, source: impl Into<String>) -> Self {
        let message = data.as_str().map(str::to_string);
        Self {
            success: true,
            data: Some(data),
            message,
            source: source.into(),
            execution_time_ms: None,
            execution_id: None,
            escalate: false,
            error: None,
        }
    }

    /// A failed outcome classified from `err`.
    pub fn failure(err: &EngineError, source: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(err.to_string()),
            source: source.into(),
            execution_time_ms: None,
            execution_id: None,
            escalate: err.should_escalate(),
            error: Some(ErrorInfo::from(err)),
        }
    }

    /// Attach execution metadata.
    #[must_use]
    pub fn with_execution(mut self, id: ExecutionId, elapsed: Option<DurationMs>) -> Self {
        self.execution_id = Some(id);
        self.execution_time_ms = elapsed;
        self
    }

    /// Force the escalation hint.
    #[must_use]
    pub fn escalating(mut self) -> Self {
        self.escalate = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn success_copies_string_data_into_message() {
        let out = Outcome::success(json!("BTC is $1.00"), "builtin:finance/get_info");
        assert!(out.success);
        assert_eq!(out.message.as_deref(), Some("BTC is $1.00"));
        let wire = serde_json::to_value(&out).unwrap();
        assert_eq!(wire["escalate"], json!(false));
        assert!(wire.get("error").is_none());
    }

    #[test]
    fn failure_carries_classification() {
        let err = EngineError::RateLimited("primary-crypto".into());
        let out = Outcome::failure(&err, "builtin:finance/get_info");
        assert!(!out.success);
        assert!(!out.escalate);
        let info = out.error.unwrap();
        assert_eq!(info.kind, ErrorKind::RateLimited);
        assert!(info.retryable);
        assert_eq!(info.disposition, Disposition::Retryable);
    }

    #[test]
    fn escalation_sets_hint() {
        let err = EngineError::Escalation {
            message: "no plan".into(),
            intent: None,
        };
        let out = Outcome::failure(&err, "escalation");
        assert!(out.escalate);
        assert_eq!(out.error.unwrap().disposition, Disposition::NeedsClarification);
    }
}
