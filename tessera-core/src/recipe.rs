//! Recipes: concrete, executable plans over a closed instruction set.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A concrete plan instantiated from a template.
///
/// Created once per invocation by the synthesizer and never mutated
/// afterwards. The interpreter only reads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipe {
    /// How well the plan is expected to answer the intent, in `[0, 1]`.
    pub confidence: f64,
    /// Ordered steps.
    pub steps: Vec<Step>,
    /// Alternate providers retried for a failing provider-bearing step.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fallbacks: Vec<Fallback>,
}

/// A recipe template has exactly the shape of a recipe; its string fields
/// simply still contain `${name}` placeholders.
pub type RecipeTemplate = Recipe;

/// An alternate provider for step-level fallback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fallback {
    /// Provider id substituted into the failing step.
    pub provider: String,
    /// Priority; higher is tried first.
    #[serde(default)]
    pub confidence: f64,
}

/// One instruction in a recipe.
///
/// The `type` tag is kept as a raw string so that unknown tags survive
/// deserialization. Whitelisting happens when the interpreter decodes a
/// step, before anything executes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    /// The instruction tag (`apiCall`, `calculate`, `weather.lookup`, ...).
    #[serde(rename = "type")]
    pub op: String,
    /// Context key that receives this step's result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assign_to: Option<String>,
    /// Halt the recipe after this step and yield its result.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub returns: bool,
    /// Tag-specific fields.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Recipe {
    /// Create a recipe with the given confidence and steps and no fallbacks.
    pub fn new(confidence: f64, steps: Vec<Step>) -> Self {
        Self {
            confidence,
            steps,
            fallbacks: Vec::new(),
        }
    }

    /// Append a fallback provider.
    #[must_use]
    pub fn with_fallback(mut self, provider: impl Into<String>, confidence: f64) -> Self {
        self.fallbacks.push(Fallback {
            provider: provider.into(),
            confidence,
        });
        self
    }

    /// Fallbacks in the order they should be tried: descending confidence,
    /// declaration order on ties.
    pub fn fallbacks_by_priority(&self) -> Vec<&Fallback> {
        let mut ordered: Vec<&Fallback> = self.fallbacks.iter().collect();
        ordered.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        ordered
    }

    /// Whether the recipe is confident enough to be executed.
    pub fn meets(&self, threshold: f64) -> bool {
        self.confidence >= threshold
    }
}

impl Step {
    /// Create a step with the given tag and no fields.
    pub fn new(op: impl Into<String>) -> Self {
        Self {
            op: op.into(),
            assign_to: None,
            returns: false,
            fields: Map::new(),
        }
    }

    /// Build a step from a JSON object such as
    /// `{"type": "calculate", "operation": "mean", ...}`.
    pub fn from_json(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    /// Set a tag-specific field.
    #[must_use]
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    /// Store the result under `key`.
    #[must_use]
    pub fn assign_to(mut self, key: impl Into<String>) -> Self {
        self.assign_to = Some(key.into());
        self
    }

    /// Mark this step as the early-return point of the recipe.
    #[must_use]
    pub fn returning(mut self) -> Self {
        self.returns = true;
        self
    }

    /// Read a tag-specific field.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn step_round_trips_wire_names() {
        let step = Step::from_json(json!({
            "type": "formatResponse",
            "template": "hi ${name}",
            "assignTo": "greeting",
            "returns": true
        }))
        .unwrap();
        assert_eq!(step.op, "formatResponse");
        assert_eq!(step.assign_to.as_deref(), Some("greeting"));
        assert!(step.returns);
        assert_eq!(step.field("template"), Some(&json!("hi ${name}")));

        let back = serde_json::to_value(&step).unwrap();
        assert_eq!(back["assignTo"], json!("greeting"));
        assert_eq!(back["type"], json!("formatResponse"));
    }

    #[test]
    fn unknown_tags_still_deserialize() {
        let step = Step::from_json(json!({"type": "eval", "code": "rm -rf /"})).unwrap();
        assert_eq!(step.op, "eval");
        assert!(!step.returns);
    }

    #[test]
    fn fallbacks_sorted_by_confidence_then_declaration() {
        let recipe = Recipe::new(0.9, vec![])
            .with_fallback("a", 0.5)
            .with_fallback("b", 0.8)
            .with_fallback("c", 0.5);
        let order: Vec<&str> = recipe
            .fallbacks_by_priority()
            .iter()
            .map(|f| f.provider.as_str())
            .collect();
        assert_eq!(order, vec!["b", "a", "c"]);
    }

    #[test]
    fn recipe_without_fallbacks_omits_field() {
        let recipe = Recipe::new(0.8, vec![Step::new("calculate")]);
        let json = serde_json::to_value(&recipe).unwrap();
        assert!(json.get("fallbacks").is_none());
        let parsed: Recipe = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, recipe);
    }
}
