//! Execution records: the audit trail of one recipe execution.

use crate::duration::DurationMs;
use crate::id::ExecutionId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of one step in the trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Started, not finished.
    Running,
    /// Finished on the first attempt.
    Completed,
    /// Finished after substituting a fallback provider.
    CompletedViaFallback,
    /// Failed; the error is recorded alongside.
    Failed,
}

/// Final status of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Still running.
    Running,
    /// Every step ran to the end of the recipe.
    Completed,
    /// A `returns` step halted the recipe early.
    Returned,
    /// A step failed and the failure surfaced.
    Failed,
    /// The caller cancelled the execution.
    Cancelled,
}

/// Trace entry for one executed step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepTrace {
    /// Position of the step: `"3"` at top level, `"2/ifFalse/0"` nested.
    pub path: String,
    /// The step tag.
    pub op: String,
    /// Current status.
    pub status: StepStatus,
    /// Provider that produced the result, for provider-bearing steps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// Wall-clock time spent in the step, fallbacks included.
    pub duration: DurationMs,
    /// Error message if the step failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Audit record of one recipe execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    /// Unique id of this execution.
    pub id: ExecutionId,
    /// When execution started.
    pub started_at: DateTime<Utc>,
    /// When execution ended; `None` while running.
    pub ended_at: Option<DateTime<Utc>>,
    /// Final status.
    pub status: ExecutionStatus,
    /// One entry per executed step, in execution order.
    pub steps: Vec<StepTrace>,
}

impl ExecutionRecord {
    /// Open a new record in the `Running` state.
    pub fn start() -> Self {
        Self {
            id: ExecutionId::generate(),
            started_at: Utc::now(),
            ended_at: None,
            status: ExecutionStatus::Running,
            steps: Vec::new(),
        }
    }

    /// Append a `Running` entry and return its index.
    pub fn begin_step(&mut self, path: String, op: &str) -> usize {
        self.steps.push(StepTrace {
            path,
            op: op.to_string(),
            status: StepStatus::Running,
            provider: None,
            duration: DurationMs::ZERO,
            error: None,
        });
        self.steps.len() - 1
    }

    /// Mutable access to a trace entry opened with [`begin_step`](Self::begin_step).
    pub fn step_mut(&mut self, index: usize) -> Option<&mut StepTrace> {
        self.steps.get_mut(index)
    }

    /// Close the record.
    pub fn finish(&mut self, status: ExecutionStatus) {
        self.status = status;
        self.ended_at = Some(Utc::now());
    }

    /// Find the trace entry for a step path.
    pub fn step(&self, path: &str) -> Option<&StepTrace> {
        self.steps.iter().find(|s| s.path == path)
    }

    /// Total elapsed time, if the record is closed.
    pub fn elapsed(&self) -> Option<DurationMs> {
        self.ended_at
            .map(|ended| DurationMs::between(self.started_at, ended))
    }
}
