//! The built-in recipe templates.
//!
//! | Key | Plan |
//! |-----|------|
//! | `finance/get_info` | price lookup on `primary-crypto`, falling back to `backup-crypto` |
//! | `finance/calculate` | compound interest, monthly compounding unless told otherwise |
//! | `finance/compare` | two price lookups in parallel |
//! | `finance/percentage_change` | percentage change between `from` and `to` |

use indexmap::IndexMap;
use serde_json::{Map, Value, json};
use tessera_core::{Recipe, RecipeTemplate, Step};

/// Provider queried first by the finance templates.
pub const PRIMARY_CRYPTO: &str = "primary-crypto";
/// Fallback provider for the finance templates.
pub const BACKUP_CRYPTO: &str = "backup-crypto";

#[derive(Debug, Clone)]
struct Builtin {
    recipe: RecipeTemplate,
    defaults: Map<String, Value>,
}

/// Built-in templates keyed by `domain/action`, each with default entity
/// values used when the intent leaves them out.
#[derive(Debug, Clone, Default)]
pub struct BuiltinTemplates {
    templates: IndexMap<String, Builtin>,
}

fn key(domain: &str, action: &str) -> String {
    format!("{domain}/{action}")
}

impl BuiltinTemplates {
    /// No templates at all.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The standard finance set.
    pub fn standard() -> Self {
        let mut set = Self::empty();
        set.insert("finance", "get_info", price_lookup());
        set.insert_with_defaults(
            "finance",
            "calculate",
            compound_interest(),
            [("compoundFrequency".to_string(), json!(12))].into_iter().collect(),
        );
        set.insert("finance", "compare", compare());
        set.insert("finance", "percentage_change", percentage_change());
        set
    }

    /// Add or replace a template.
    pub fn insert(&mut self, domain: &str, action: &str, recipe: RecipeTemplate) {
        self.insert_with_defaults(domain, action, recipe, Map::new());
    }

    /// Add or replace a template with default entity values.
    pub fn insert_with_defaults(
        &mut self,
        domain: &str,
        action: &str,
        recipe: RecipeTemplate,
        defaults: Map<String, Value>,
    ) {
        self.templates
            .insert(key(domain, action), Builtin { recipe, defaults });
    }

    /// The template for `domain/action`, with its defaults.
    pub fn get(&self, domain: &str, action: &str) -> Option<(&RecipeTemplate, &Map<String, Value>)> {
        self.templates
            .get(&key(domain, action))
            .map(|b| (&b.recipe, &b.defaults))
    }

    /// Registered keys, in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.templates.keys().map(String::as_str)
    }

    /// Number of templates.
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    /// Whether there are no templates.
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

fn price_call(symbol: &str) -> Value {
    json!({
        "provider": PRIMARY_CRYPTO,
        "endpoint": "price",
        "params": {"symbol": symbol},
        "transform": {"function": "parseNumber"}
    })
}

fn price_lookup() -> Recipe {
    let mut lookup = Step::new("apiCall").assign_to("price");
    if let Value::Object(fields) = price_call("${target}") {
        lookup.fields = fields;
    }
    Recipe::new(
        0.9,
        vec![
            lookup,
            Step::new("formatResponse")
                .with("template", "The current price of ${target} is ${price|currency}")
                .returning(),
        ],
    )
    .with_fallback(BACKUP_CRYPTO, 0.8)
}

fn compound_interest() -> Recipe {
    Recipe::new(
        0.95,
        vec![
            Step::new("calculate")
                .with("operation", "compoundInterest")
                .with(
                    "params",
                    json!({
                        "principal": "${principal}",
                        "rate": "${rate}",
                        "time": "${time}",
                        "compoundFrequency": "${compoundFrequency}"
                    }),
                )
                .assign_to("amount"),
            Step::new("formatResponse")
                .with(
                    "template",
                    "${principal|currency} at ${rate}% for ${time} years grows to ${amount|currency}",
                )
                .returning(),
        ],
    )
}

fn compare() -> Recipe {
    Recipe::new(
        0.85,
        vec![
            Step::new("parallelApiCalls")
                .with("calls", json!([price_call("${target}"), price_call("${compareWith}")]))
                .assign_to("prices"),
            Step::new("formatResponse")
                .with(
                    "template",
                    "${target}: ${prices.successful.0|currency}, ${compareWith}: ${prices.successful.1|currency}",
                )
                .returning(),
        ],
    )
    .with_fallback(BACKUP_CRYPTO, 0.8)
}

fn percentage_change() -> Recipe {
    Recipe::new(
        0.9,
        vec![
            Step::new("calculate")
                .with("operation", "percentageChange")
                .with("params", json!({"from": "${from}", "to": "${to}"}))
                .assign_to("change"),
            Step::new("formatResponse")
                .with("template", "Change from ${from} to ${to}: ${change|percent}")
                .returning(),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_set_is_keyed_by_domain_and_action() {
        let set = BuiltinTemplates::standard();
        assert_eq!(set.len(), 4);
        let (recipe, defaults) = set.get("finance", "calculate").unwrap();
        assert_eq!(recipe.steps[0].op, "calculate");
        assert_eq!(defaults["compoundFrequency"], json!(12));
        assert!(set.get("finance", "unknown").is_none());
    }

    #[test]
    fn price_lookup_declares_backup() {
        let set = BuiltinTemplates::standard();
        let (recipe, _) = set.get("finance", "get_info").unwrap();
        assert_eq!(recipe.fallbacks[0].provider, BACKUP_CRYPTO);
        assert_eq!(recipe.steps[0].field("provider"), Some(&json!(PRIMARY_CRYPTO)));
        assert!(recipe.steps[1].returns);
    }
}
