//! Capability bundles and their JSON manifest form.

use crate::action::CustomAction;
use indexmap::IndexMap;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tessera_core::{EngineError, RecipeTemplate};
use tessera_provider::ProviderManifest;

/// How a trigger is declared.
///
/// In a manifest a plain string is a literal and `{"pattern": "..."}` is a
/// regular expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TriggerSpec {
    /// Case-insensitive substring.
    Literal(String),
    /// Case-insensitive regular expression.
    Pattern {
        /// The expression.
        pattern: String,
    },
}

/// A compiled trigger.
#[derive(Debug, Clone)]
pub enum Trigger {
    /// Lowercased substring.
    Literal(String),
    /// Case-insensitive regex.
    Pattern(Regex),
}

impl Trigger {
    /// Compile a trigger declaration. An invalid regex is `InvalidParameters`.
    pub fn compile(spec: &TriggerSpec) -> Result<Self, EngineError> {
        match spec {
            TriggerSpec::Literal(text) => Ok(Trigger::Literal(text.to_lowercase())),
            TriggerSpec::Pattern { pattern } => RegexBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .map(Trigger::Pattern)
                .map_err(|e| {
                    EngineError::InvalidParameters(format!("invalid trigger pattern '{pattern}': {e}"))
                }),
        }
    }

    /// Whether the trigger fires on `query`.
    pub fn matches(&self, query: &str) -> bool {
        match self {
            Trigger::Literal(text) => query.to_lowercase().contains(text.as_str()),
            Trigger::Pattern(regex) => regex.is_match(query),
        }
    }
}

/// JSON form of a capability. Custom actions are listed by name only and
/// must be bound in code before install.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityManifest {
    /// Unique capability name.
    pub name: String,
    /// Version string.
    pub version: String,
    /// Triggers, in order.
    #[serde(default)]
    pub triggers: Vec<TriggerSpec>,
    /// Recipe templates by name.
    #[serde(default)]
    pub recipe_templates: IndexMap<String, RecipeTemplate>,
    /// Names of custom actions this capability provides.
    #[serde(default)]
    pub custom_actions: Vec<String>,
    /// Providers this capability brings along.
    #[serde(default)]
    pub providers: IndexMap<String, ProviderManifest>,
}

/// An installable bundle.
#[derive(Clone)]
pub struct Capability {
    pub(crate) name: String,
    pub(crate) version: String,
    pub(crate) triggers: Vec<TriggerSpec>,
    pub(crate) templates: IndexMap<String, RecipeTemplate>,
    pub(crate) actions: IndexMap<String, Option<Arc<dyn CustomAction>>>,
    pub(crate) providers: IndexMap<String, ProviderManifest>,
}

impl fmt::Debug for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capability")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("triggers", &self.triggers)
            .field("templates", &self.templates.keys().collect::<Vec<_>>())
            .field("actions", &self.actions.keys().collect::<Vec<_>>())
            .field("providers", &self.providers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Capability {
    /// An empty capability.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            triggers: Vec::new(),
            templates: IndexMap::new(),
            actions: IndexMap::new(),
            providers: IndexMap::new(),
        }
    }

    /// Build from a manifest. Declared actions stay unbound until
    /// [`action`](Self::action) supplies them.
    pub fn from_manifest(manifest: CapabilityManifest) -> Self {
        Self {
            name: manifest.name,
            version: manifest.version,
            triggers: manifest.triggers,
            templates: manifest.recipe_templates,
            actions: manifest
                .custom_actions
                .into_iter()
                .map(|name| (name, None))
                .collect(),
            providers: manifest.providers,
        }
    }

    /// Capability name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Capability version.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Add a literal trigger.
    #[must_use]
    pub fn trigger(mut self, text: impl Into<String>) -> Self {
        self.triggers.push(TriggerSpec::Literal(text.into()));
        self
    }

    /// Add a regex trigger. Compiled at install.
    #[must_use]
    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.triggers.push(TriggerSpec::Pattern {
            pattern: pattern.into(),
        });
        self
    }

    /// Add a recipe template.
    #[must_use]
    pub fn template(mut self, name: impl Into<String>, recipe: RecipeTemplate) -> Self {
        self.templates.insert(name.into(), recipe);
        self
    }

    /// Bind a custom action.
    #[must_use]
    pub fn action(mut self, name: impl Into<String>, action: impl CustomAction + 'static) -> Self {
        self.actions.insert(name.into(), Some(Arc::new(action)));
        self
    }

    /// Add a provider.
    #[must_use]
    pub fn provider(mut self, id: impl Into<String>, manifest: ProviderManifest) -> Self {
        self.providers.insert(id.into(), manifest);
        self
    }

    /// Check the bundle's shape and compile its triggers.
    pub(crate) fn validate(&self) -> Result<Vec<Trigger>, EngineError> {
        let invalid = |what: String| {
            Err(EngineError::InvalidParameters(format!(
                "capability '{}': {what}",
                self.name
            )))
        };
        if self.name.trim().is_empty() {
            return invalid("empty name".into());
        }
        if self.name.contains('.') {
            return invalid("name must not contain '.'".into());
        }
        if self.version.trim().is_empty() {
            return invalid("empty version".into());
        }
        if self.triggers.is_empty() {
            return invalid("at least one trigger is required".into());
        }
        for (name, recipe) in &self.templates {
            if !(0.0..=1.0).contains(&recipe.confidence) {
                return invalid(format!("template '{name}' confidence must be within [0, 1]"));
            }
            if recipe.steps.is_empty() {
                return invalid(format!("template '{name}' has no steps"));
            }
        }
        for (name, action) in &self.actions {
            if name.is_empty() || name.contains('.') {
                return invalid(format!("invalid action name '{name}'"));
            }
            if action.is_none() {
                return invalid(format!("custom action '{name}' is not callable"));
            }
        }
        self.triggers.iter().map(Trigger::compile).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::action_fn;
    use serde_json::{Value, json};

    fn manifest() -> CapabilityManifest {
        serde_json::from_value(json!({
            "name": "weather",
            "version": "1.0.0",
            "triggers": ["weather", {"pattern": "forecast for \\w+"}],
            "recipeTemplates": {
                "forecast": {
                    "confidence": 0.9,
                    "steps": [{"type": "weather.lookup", "params": {"city": "${target}"}, "returns": true}]
                }
            },
            "customActions": ["lookup"],
            "providers": {
                "weather-api": {"baseAddress": "https://weather.test", "reliability": 0.9}
            }
        }))
        .unwrap()
    }

    #[test]
    fn manifest_parses_triggers_and_templates() {
        let cap = Capability::from_manifest(manifest());
        assert_eq!(cap.name(), "weather");
        assert_eq!(cap.triggers.len(), 2);
        assert!(matches!(cap.triggers[1], TriggerSpec::Pattern { .. }));
        assert_eq!(cap.templates["forecast"].steps[0].op, "weather.lookup");
        assert!(cap.providers.contains_key("weather-api"));
    }

    #[test]
    fn unbound_manifest_action_fails_validation() {
        let cap = Capability::from_manifest(manifest());
        let err = cap.validate().unwrap_err();
        assert!(err.to_string().contains("not callable"));

        let bound = cap.action("lookup", action_fn(|_: Value| async { Ok(json!("sunny")) }));
        assert_eq!(bound.validate().unwrap().len(), 2);
    }

    #[test]
    fn triggers_match_case_insensitively() {
        let literal = Trigger::compile(&TriggerSpec::Literal("Weather".into())).unwrap();
        assert!(literal.matches("what's the WEATHER like"));
        let pattern = Trigger::compile(&TriggerSpec::Pattern {
            pattern: "forecast for \\w+".into(),
        })
        .unwrap();
        assert!(pattern.matches("Forecast for Paris"));
        assert!(!pattern.matches("forecast"));
    }

    #[test]
    fn invalid_pattern_is_rejected() {
        let err = Trigger::compile(&TriggerSpec::Pattern {
            pattern: "(unclosed".into(),
        })
        .unwrap_err();
        assert!(matches!(err, EngineError::InvalidParameters(_)));
    }

    #[test]
    fn shape_rules() {
        assert!(Capability::new("", "1").trigger("x").validate().is_err());
        assert!(Capability::new("a", "").trigger("x").validate().is_err());
        assert!(Capability::new("a", "1").validate().is_err());
        assert!(
            Capability::new("a", "1")
                .trigger("x")
                .template("t", RecipeTemplate::new(1.5, vec![]))
                .validate()
                .is_err()
        );
        assert!(
            Capability::new("a", "1")
                .trigger("x")
                .action("b.c", action_fn(|_: Value| async { Ok(Value::Null) }))
                .validate()
                .is_err()
        );
    }
}
