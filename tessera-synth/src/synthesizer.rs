use crate::builtin::BuiltinTemplates;
use crate::config::SynthesizerConfig;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use tessera_capability::{CapabilityMatch, CapabilityRegistry};
use tessera_core::template::{Template, escape};
use tessera_core::{Intent, Recipe, RecipeTemplate, Step};

/// Where a synthesized recipe came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateSource {
    /// A built-in template.
    Builtin {
        /// Intent domain.
        domain: String,
        /// Intent action.
        action: String,
    },
    /// A template of an installed capability.
    Capability {
        /// Capability name.
        name: String,
        /// Template name within the capability.
        template: String,
    },
    /// No template matched; the recipe asks the host to escalate.
    Escalation,
}

impl fmt::Display for TemplateSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemplateSource::Builtin { domain, action } => write!(f, "builtin:{domain}/{action}"),
            TemplateSource::Capability { name, template } => {
                write!(f, "capability:{name}/{template}")
            }
            TemplateSource::Escalation => f.write_str("escalation"),
        }
    }
}

/// A synthesized recipe and its origin.
#[derive(Debug, Clone, PartialEq)]
pub struct Synthesis {
    /// The concrete plan.
    pub recipe: Recipe,
    /// Where its template came from.
    pub source: TemplateSource,
}

impl Synthesis {
    /// Whether this is the escalation recipe.
    pub fn is_escalation(&self) -> bool {
        self.source == TemplateSource::Escalation
    }
}

/// Instantiates recipes from templates.
pub struct Synthesizer {
    builtins: BuiltinTemplates,
    capabilities: Arc<CapabilityRegistry>,
    config: SynthesizerConfig,
}

impl Synthesizer {
    /// A synthesizer over the standard built-in set.
    pub fn new(capabilities: Arc<CapabilityRegistry>) -> Self {
        Self::with_builtins(BuiltinTemplates::standard(), capabilities)
    }

    /// A synthesizer over a custom built-in set.
    pub fn with_builtins(builtins: BuiltinTemplates, capabilities: Arc<CapabilityRegistry>) -> Self {
        Self {
            builtins,
            capabilities,
            config: SynthesizerConfig::default(),
        }
    }

    /// Override the settings.
    #[must_use]
    pub fn with_config(mut self, config: SynthesizerConfig) -> Self {
        self.config = config;
        self
    }

    /// Current settings.
    pub fn config(&self) -> &SynthesizerConfig {
        &self.config
    }

    /// The built-in templates.
    pub fn builtins(&self) -> &BuiltinTemplates {
        &self.builtins
    }

    /// Build a recipe for `intent`.
    ///
    /// The matched capability's template wins; otherwise the built-in for
    /// `domain/action`; otherwise a single-step escalation recipe.
    pub fn synthesize(&self, intent: &Intent, matched: Option<&CapabilityMatch>) -> Synthesis {
        let entities = intent.flat_entities();

        if let Some(found) = matched {
            if let Some((template, recipe)) =
                self.capabilities.template_for(&found.name, &intent.action)
            {
                tracing::debug!(capability = %found.name, template = %template, "synthesizing from capability");
                return Synthesis {
                    recipe: instantiate(&recipe, &entities),
                    source: TemplateSource::Capability {
                        name: found.name.clone(),
                        template,
                    },
                };
            }
        }

        if let Some((recipe, defaults)) = self.builtins.get(&intent.domain, &intent.action) {
            let mut lookup = defaults.clone();
            lookup.extend(entities);
            tracing::debug!(domain = %intent.domain, action = %intent.action, "synthesizing from builtin");
            return Synthesis {
                recipe: instantiate(recipe, &lookup),
                source: TemplateSource::Builtin {
                    domain: intent.domain.clone(),
                    action: intent.action.clone(),
                },
            };
        }

        tracing::debug!(domain = %intent.domain, action = %intent.action, "no template, escalating");
        Synthesis {
            recipe: escalation(intent),
            source: TemplateSource::Escalation,
        }
    }
}

/// Deep-copy `template`, substituting `${name}` from `entities`.
///
/// Unknown names stay as placeholders. A string that is exactly one
/// unfiltered placeholder takes the entity value itself, so numbers stay
/// numbers. Substituted text is escaped and so never re-scanned.
pub fn instantiate(template: &RecipeTemplate, entities: &Map<String, Value>) -> Recipe {
    let lookup = |path: &str| entities.get(path).cloned();
    Recipe {
        confidence: template.confidence,
        steps: template
            .steps
            .iter()
            .map(|step| instantiate_step(step, &lookup))
            .collect(),
        fallbacks: template
            .fallbacks
            .iter()
            .map(|fallback| {
                let mut fallback = fallback.clone();
                fallback.provider = Template::parse(&fallback.provider).substitute(lookup);
                fallback
            })
            .collect(),
    }
}

fn instantiate_step<F>(step: &Step, lookup: &F) -> Step
where
    F: Fn(&str) -> Option<Value>,
{
    Step {
        op: step.op.clone(),
        assign_to: step
            .assign_to
            .as_ref()
            .map(|key| Template::parse(key).substitute(lookup)),
        returns: step.returns,
        fields: step
            .fields
            .iter()
            .map(|(k, v)| (k.clone(), substitute_value(v, lookup)))
            .collect(),
    }
}

fn substitute_value<F>(value: &Value, lookup: &F) -> Value
where
    F: Fn(&str) -> Option<Value>,
{
    match value {
        Value::String(text) => {
            let template = Template::parse(text);
            if let Some(found) = template.single_reference().and_then(lookup) {
                return inert(found);
            }
            Value::String(template.substitute(lookup))
        }
        Value::Array(items) => Value::Array(items.iter().map(|v| substitute_value(v, lookup)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), substitute_value(v, lookup)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Escape every string inside an entity value.
fn inert(value: Value) -> Value {
    match value {
        Value::String(text) => Value::String(escape(&text)),
        Value::Array(items) => Value::Array(items.into_iter().map(inert).collect()),
        Value::Object(map) => Value::Object(map.into_iter().map(|(k, v)| (k, inert(v))).collect()),
        other => other,
    }
}

fn escalation(intent: &Intent) -> Recipe {
    let message = format!(
        "no recipe template for {}/{}",
        escape(&intent.domain),
        escape(&intent.action)
    );
    let intent = serde_json::to_value(intent).unwrap_or(Value::Null);
    Recipe::new(
        1.0,
        vec![
            Step::new("error")
                .with("message", message)
                .with("escalate", true)
                .with("intent", intent),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;
    use tessera_capability::Capability;
    use tessera_core::{ExecutionContext, UnresolvedPolicy};
    use tessera_provider::ProviderRegistry;

    fn synthesizer() -> Synthesizer {
        Synthesizer::new(Arc::new(CapabilityRegistry::new(Arc::new(
            ProviderRegistry::new(),
        ))))
    }

    #[test]
    fn builtin_price_lookup_fills_target_and_keeps_runtime_refs() {
        let intent = Intent::new("finance", "get_info").with_target("bitcoin");
        let synthesis = synthesizer().synthesize(&intent, None);

        assert_eq!(synthesis.source.to_string(), "builtin:finance/get_info");
        let recipe = &synthesis.recipe;
        assert_eq!(recipe.steps[0].fields["params"], json!({"symbol": "bitcoin"}));
        assert_eq!(
            recipe.steps[1].fields["template"],
            json!("The current price of bitcoin is ${price|currency}")
        );
        assert_eq!(recipe.confidence, 0.9);
    }

    #[test]
    fn single_placeholder_keeps_value_type() {
        let intent = Intent::new("finance", "calculate")
            .with_parameter("principal", 1000)
            .with_parameter("rate", 8)
            .with_parameter("time", 5);
        let recipe = synthesizer().synthesize(&intent, None).recipe;
        let params = &recipe.steps[0].fields["params"];
        assert_eq!(params["principal"], json!(1000));
        assert_eq!(params["compoundFrequency"], json!(12));
    }

    #[test]
    fn missing_entities_are_left_as_placeholders() {
        let intent = Intent::new("finance", "percentage_change").with_parameter("from", 10);
        let recipe = synthesizer().synthesize(&intent, None).recipe;
        assert_eq!(
            recipe.steps[0].fields["params"],
            json!({"from": 10, "to": "${to}"})
        );
    }

    #[test]
    fn entity_text_is_never_rescanned() {
        let intent = Intent::new("finance", "get_info").with_target("${secret}");
        let recipe = synthesizer().synthesize(&intent, None).recipe;

        let mut ctx = ExecutionContext::new();
        ctx.assign("secret", json!("leaked"));
        ctx.assign("price", json!(1));
        let text = ctx
            .render(
                recipe.steps[1].fields["template"].as_str().unwrap(),
                UnresolvedPolicy::PassThrough,
            )
            .unwrap();
        assert!(text.contains("${secret}"));
        assert!(!text.contains("leaked"));

        let symbol = ctx
            .resolve_value(&recipe.steps[0].fields["params"], UnresolvedPolicy::PassThrough)
            .unwrap();
        assert_eq!(symbol["symbol"], json!("${secret}"));
    }

    #[test]
    fn trailing_backslash_in_entity_keeps_runtime_refs_live() {
        let capabilities = Arc::new(CapabilityRegistry::new(Arc::new(ProviderRegistry::new())));
        capabilities
            .install(
                Capability::new("quotes", "1.0.0").trigger("quote").template(
                    "get_info",
                    Recipe::new(
                        0.9,
                        vec![Step::new("formatResponse").with("template", "${target}${price}")],
                    ),
                ),
            )
            .unwrap();
        let matched = capabilities.find_matching("quote please");
        let intent = Intent::new("quotes", "get_info").with_target("btc\\");
        let recipe = Synthesizer::new(Arc::clone(&capabilities))
            .synthesize(&intent, matched.as_ref())
            .recipe;

        let mut ctx = ExecutionContext::new();
        ctx.assign("price", json!(42));
        let text = ctx
            .render(
                recipe.steps[0].fields["template"].as_str().unwrap(),
                UnresolvedPolicy::Error,
            )
            .unwrap();
        assert_eq!(text, "btc\\42");
    }

    #[test]
    fn capability_template_wins_and_is_chosen_by_action() {
        let providers = Arc::new(ProviderRegistry::new());
        let capabilities = Arc::new(CapabilityRegistry::new(providers));
        let step = |text: &str| Step::new("formatResponse").with("template", text).returning();
        capabilities
            .install(
                Capability::new("weather", "1.0.0")
                    .trigger("weather")
                    .template("forecast", Recipe::new(0.8, vec![step("Forecast for ${target}")]))
                    .template("get_info", Recipe::new(0.9, vec![step("Weather in ${target}")])),
            )
            .unwrap();
        let synth = Synthesizer::new(Arc::clone(&capabilities));
        let matched = capabilities.find_matching("weather in paris");

        let intent = Intent::new("weather", "get_info").with_target("Paris");
        let synthesis = synth.synthesize(&intent, matched.as_ref());
        assert_eq!(synthesis.source.to_string(), "capability:weather/get_info");
        assert_eq!(synthesis.recipe.steps[0].fields["template"], json!("Weather in Paris"));

        let other = Intent::new("weather", "anything").with_target("Oslo");
        let synthesis = synth.synthesize(&other, matched.as_ref());
        assert_eq!(synthesis.source.to_string(), "capability:weather/forecast");
    }

    #[test]
    fn unknown_intent_escalates() {
        let intent = Intent::new("travel", "book");
        let synthesis = synthesizer().synthesize(&intent, None);
        assert!(synthesis.is_escalation());
        let step = &synthesis.recipe.steps[0];
        assert_eq!(step.op, "error");
        assert_eq!(step.fields["escalate"], json!(true));
        assert_eq!(step.fields["intent"]["domain"], json!("travel"));
    }

    proptest! {
        #[test]
        fn filled_placeholders_leave_no_tokens(
            values in proptest::collection::vec("[a-zA-Z0-9 ]{0,12}", 1..6),
            glue in "[a-z ,.]{0,8}",
        ) {
            let mut entities = Map::new();
            let mut source = String::new();
            for (i, v) in values.iter().enumerate() {
                entities.insert(format!("p{i}"), json!(v));
                source.push_str(&glue);
                source.push_str(&format!("${{p{i}}}"));
            }
            let template = Recipe::new(1.0, vec![Step::new("formatResponse").with("template", source)]);
            let recipe = instantiate(&template, &entities);
            let text = ExecutionContext::new()
                .render(recipe.steps[0].fields["template"].as_str().unwrap(), UnresolvedPolicy::Error)
                .unwrap();
            prop_assert!(!text.contains("${"), "placeholder left in {:?}", text);
        }
    }
}
