//! The capability registry.

use crate::action::CustomAction;
use crate::manifest::{Capability, Trigger};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tessera_core::{EngineError, RecipeTemplate};
use tessera_provider::ProviderRegistry;

const BASE_CONFIDENCE: f64 = 0.5;
const TRIGGER_WEIGHT: f64 = 0.2;
const RECIPE_NAME_WEIGHT: f64 = 0.1;

/// The best capability for a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityMatch {
    /// Capability name.
    pub name: String,
    /// Match confidence, capped at 1.0.
    pub confidence: f64,
    /// How many of its triggers fired.
    pub matched_triggers: usize,
}

/// Resource counts across every installed capability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryCounts {
    /// Registered triggers.
    pub triggers: usize,
    /// Registered recipe templates.
    pub templates: usize,
    /// Registered custom actions.
    pub actions: usize,
    /// Providers owned by capabilities.
    pub providers: usize,
}

struct InstalledCapability {
    version: String,
    triggers: Vec<Trigger>,
    templates: IndexMap<String, RecipeTemplate>,
    actions: Vec<String>,
    providers: Vec<String>,
}

impl InstalledCapability {
    fn recipe_hits(&self, query: &str) -> usize {
        let query = query.to_lowercase();
        self.templates
            .keys()
            .filter(|name| {
                let name = name.to_lowercase();
                query.contains(&name) || query.contains(&name.replace(['_', '-'], " "))
            })
            .count()
    }
}

#[derive(Default)]
struct Installed {
    capabilities: IndexMap<String, InstalledCapability>,
    actions: HashMap<String, Arc<dyn CustomAction>>,
}

/// Installed capabilities, their templates and their qualified custom actions.
///
/// One lock guards every table. Install and uninstall hold it across the
/// provider merge, so readers never see half a capability.
pub struct CapabilityRegistry {
    inner: RwLock<Installed>,
    providers: Arc<ProviderRegistry>,
}

impl std::fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityRegistry")
            .field("installed", &self.names())
            .finish()
    }
}

impl CapabilityRegistry {
    /// An empty registry that merges capability providers into `providers`.
    pub fn new(providers: Arc<ProviderRegistry>) -> Self {
        Self {
            inner: RwLock::new(Installed::default()),
            providers,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Installed> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Installed> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Install a capability: all of its resources or none.
    pub fn install(&self, capability: Capability) -> Result<(), EngineError> {
        let triggers = capability.validate()?;
        let name = capability.name.clone();

        let mut installed = self.write();
        if installed.capabilities.contains_key(&name) {
            return Err(EngineError::InvalidParameters(format!(
                "capability '{name}' is already installed"
            )));
        }
        let qualified: Vec<(String, Arc<dyn CustomAction>)> = capability
            .actions
            .into_iter()
            .filter_map(|(action, callable)| callable.map(|c| (format!("{name}.{action}"), c)))
            .collect();
        if let Some((taken, _)) = qualified
            .iter()
            .find(|(q, _)| installed.actions.contains_key(q))
        {
            return Err(EngineError::InvalidParameters(format!(
                "custom action '{taken}' is already registered"
            )));
        }

        // Last fallible step; everything after it is plain insertion.
        let provider_ids: Vec<String> = capability.providers.keys().cloned().collect();
        self.providers
            .register_all(&name, capability.providers.into_iter())?;

        let entry = InstalledCapability {
            version: capability.version,
            triggers,
            templates: capability.templates,
            actions: qualified.iter().map(|(q, _)| q.clone()).collect(),
            providers: provider_ids,
        };
        tracing::info!(
            capability = %name,
            version = %entry.version,
            triggers = entry.triggers.len(),
            templates = entry.templates.len(),
            actions = entry.actions.len(),
            providers = entry.providers.len(),
            "capability installed"
        );
        installed.actions.extend(qualified);
        installed.capabilities.insert(name, entry);
        Ok(())
    }

    /// Remove a capability and everything it registered.
    pub fn uninstall(&self, name: &str) -> Result<(), EngineError> {
        let mut installed = self.write();
        let entry = installed.capabilities.shift_remove(name).ok_or_else(|| {
            EngineError::InvalidParameters(format!("capability '{name}' is not installed"))
        })?;
        for action in &entry.actions {
            installed.actions.remove(action);
        }
        let removed = self.providers.remove_owned_by(name);
        tracing::info!(capability = %name, providers = removed, "capability uninstalled");
        Ok(())
    }

    /// The best-matching capability for `query`, if any trigger fires.
    ///
    /// Confidence is `0.5 + 0.2 × matching triggers + 0.1 × matching recipe
    /// names`, capped at 1.0. Ties keep the capability installed first.
    pub fn find_matching(&self, query: &str) -> Option<CapabilityMatch> {
        let installed = self.read();
        let mut best: Option<CapabilityMatch> = None;
        for (name, cap) in &installed.capabilities {
            let matched = cap.triggers.iter().filter(|t| t.matches(query)).count();
            if matched == 0 {
                continue;
            }
            let confidence = (BASE_CONFIDENCE
                + TRIGGER_WEIGHT * matched as f64
                + RECIPE_NAME_WEIGHT * cap.recipe_hits(query) as f64)
                .min(1.0);
            if best.as_ref().is_none_or(|b| confidence > b.confidence) {
                best = Some(CapabilityMatch {
                    name: name.clone(),
                    confidence,
                    matched_triggers: matched,
                });
            }
        }
        best
    }

    /// A template by capability and template name.
    pub fn template(&self, capability: &str, name: &str) -> Option<RecipeTemplate> {
        self.read()
            .capabilities
            .get(capability)
            .and_then(|cap| cap.templates.get(name).cloned())
    }

    /// The template a capability uses for `action`: the one named after the
    /// action, else its first template. Returns the template name too.
    pub fn template_for(&self, capability: &str, action: &str) -> Option<(String, RecipeTemplate)> {
        let installed = self.read();
        let cap = installed.capabilities.get(capability)?;
        cap.templates
            .get_key_value(action)
            .or_else(|| cap.templates.first())
            .map(|(name, recipe)| (name.clone(), recipe.clone()))
    }

    /// A custom action by qualified name (`weather.lookup`).
    pub fn action(&self, qualified: &str) -> Option<Arc<dyn CustomAction>> {
        self.read().actions.get(qualified).cloned()
    }

    /// Whether a qualified custom action is registered.
    pub fn has_action(&self, qualified: &str) -> bool {
        self.read().actions.contains_key(qualified)
    }

    /// Whether a capability is installed.
    pub fn is_installed(&self, name: &str) -> bool {
        self.read().capabilities.contains_key(name)
    }

    /// Installed capability names, in install order.
    pub fn names(&self) -> Vec<String> {
        self.read().capabilities.keys().cloned().collect()
    }

    /// Resource counts.
    pub fn counts(&self) -> RegistryCounts {
        let installed = self.read();
        installed
            .capabilities
            .values()
            .fold(RegistryCounts::default(), |mut acc, cap| {
                acc.triggers += cap.triggers.len();
                acc.templates += cap.templates.len();
                acc.actions += cap.actions.len();
                acc.providers += cap.providers.len();
                acc
            })
    }

    /// The provider registry capabilities merge into.
    pub fn providers(&self) -> &Arc<ProviderRegistry> {
        &self.providers
    }
}
