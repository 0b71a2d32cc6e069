//! Interpreter settings.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tessera_core::UnresolvedPolicy;

/// Interpreter settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InterpreterConfig {
    /// Timeout for one provider call, unless the provider overrides it.
    pub call_timeout_ms: u64,
    /// What to do with a placeholder that resolves to nothing at run time.
    pub unresolved: UnresolvedPolicy,
    /// Maximum nesting of `conditional` branches.
    pub max_depth: usize,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: 10_000,
            unresolved: UnresolvedPolicy::PassThrough,
            max_depth: 16,
        }
    }
}

impl InterpreterConfig {
    /// The default call timeout as a `Duration`.
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}
