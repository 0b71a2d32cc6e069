//! Typed ID wrappers for executions and providers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Typed ID wrappers keep execution ids and provider ids from being mixed
/// up. Both are plain strings underneath.
macro_rules! typed_id {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Create a new typed ID from anything that converts to String.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Borrow the inner string.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

typed_id!(ExecutionId, "Unique identifier for one recipe execution.");
typed_id!(ProviderId, "Identifier of a registered backing service.");

impl ExecutionId {
    /// Generate a fresh random (UUID v4) execution id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_unique() {
        let a = ExecutionId::generate();
        let b = ExecutionId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 36);
    }

    #[test]
    fn provider_id_serializes_as_plain_string() {
        let id = ProviderId::from("primary-crypto");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"primary-crypto\"");
        assert_eq!(id.to_string(), "primary-crypto");
    }
}
