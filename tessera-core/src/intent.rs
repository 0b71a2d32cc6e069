//! The structured intent produced by an external classifier.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Structured classification of a user request.
///
/// Produced outside tessera (regex or model based classification) and
/// treated as immutable once handed to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    /// Broad area of the request, e.g. `finance`.
    pub domain: String,
    /// What the user wants done within the domain, e.g. `get_info`.
    pub action: String,
    /// Extracted entities.
    #[serde(default)]
    pub entities: Entities,
    /// Classifier confidence in `[0, 1]`.
    #[serde(default)]
    pub confidence: f64,
}

/// Entities extracted from the request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Entities {
    /// The primary subject, e.g. `bitcoin`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// Any further named parameters.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub parameters: Map<String, Value>,
}

impl Intent {
    /// Create an intent with no entities and full confidence.
    pub fn new(domain: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            action: action.into(),
            entities: Entities::default(),
            confidence: 1.0,
        }
    }

    /// Set the target entity.
    #[must_use]
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.entities.target = Some(target.into());
        self
    }

    /// Add a named parameter.
    #[must_use]
    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.entities.parameters.insert(name.into(), value.into());
        self
    }

    /// Set the classifier confidence.
    #[must_use]
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    /// Flatten the entities into a single-level lookup table.
    ///
    /// `target` is exposed under the key `target`; every parameter under its
    /// own name. A parameter literally named `target` wins over the entity.
    pub fn flat_entities(&self) -> Map<String, Value> {
        let mut flat = Map::new();
        if let Some(target) = &self.entities.target {
            flat.insert("target".into(), Value::String(target.clone()));
        }
        for (k, v) in &self.entities.parameters {
            flat.insert(k.clone(), v.clone());
        }
        flat
    }
}
