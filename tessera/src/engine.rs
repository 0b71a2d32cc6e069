use crate::config::EngineConfig;
use std::sync::Arc;
use tessera_capability::{Capability, CapabilityMatch, CapabilityRegistry};
use tessera_core::{EngineError, Intent, Outcome, Recipe};
use tessera_interp::{Execution, Interpreter};
use tessera_provider::{ProviderManifest, ProviderRegistry, Transport};
use tessera_synth::{BuiltinTemplates, Synthesis, Synthesizer};
use tokio_util::sync::CancellationToken;

/// The engine: registries, synthesizer and interpreter wired together.
///
/// There is no global instance; hosts construct one and share it (it is
/// `Send + Sync`, every method takes `&self`).
pub struct Engine {
    providers: Arc<ProviderRegistry>,
    capabilities: Arc<CapabilityRegistry>,
    synthesizer: Synthesizer,
    interpreter: Interpreter,
    config: EngineConfig,
}

impl Engine {
    /// An engine with default settings calling out over `transport`.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_config(transport, EngineConfig::default())
    }

    /// An engine with explicit settings.
    pub fn with_config(transport: Arc<dyn Transport>, config: EngineConfig) -> Self {
        let providers = Arc::new(ProviderRegistry::with_config(config.selector.clone()));
        let capabilities = Arc::new(CapabilityRegistry::new(Arc::clone(&providers)));
        let synthesizer = Synthesizer::new(Arc::clone(&capabilities))
            .with_config(config.synthesizer.clone());
        let interpreter = Interpreter::new(Arc::clone(&capabilities), transport)
            .with_config(config.interpreter.clone());
        Self {
            providers,
            capabilities,
            synthesizer,
            interpreter,
            config,
        }
    }

    /// An engine calling out over a default [`HttpTransport`](tessera_provider::HttpTransport).
    #[cfg(feature = "http")]
    pub fn http() -> Self {
        Self::new(Arc::new(tessera_provider::HttpTransport::new()))
    }

    /// Replace the built-in template set.
    #[must_use]
    pub fn with_builtins(mut self, builtins: BuiltinTemplates) -> Self {
        self.synthesizer = Synthesizer::with_builtins(builtins, Arc::clone(&self.capabilities))
            .with_config(self.config.synthesizer.clone());
        self
    }

    /// Current settings.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The provider registry.
    pub fn providers(&self) -> &Arc<ProviderRegistry> {
        &self.providers
    }

    /// The capability registry.
    pub fn capabilities(&self) -> &Arc<CapabilityRegistry> {
        &self.capabilities
    }

    /// Register a host-owned provider.
    pub fn register_provider(
        &self,
        id: impl Into<String>,
        manifest: ProviderManifest,
    ) -> Result<(), EngineError> {
        self.providers.register(id, manifest)
    }

    /// Install a capability.
    pub fn install(&self, capability: Capability) -> Result<(), EngineError> {
        self.capabilities.install(capability)
    }

    /// Uninstall a capability and everything it registered.
    pub fn uninstall(&self, name: &str) -> Result<(), EngineError> {
        self.capabilities.uninstall(name)
    }

    /// The best capability for `query`, if any trigger fires.
    pub fn find_matching(&self, query: &str) -> Option<CapabilityMatch> {
        self.capabilities.find_matching(query)
    }

    /// Build the recipe `handle` would run, without running it.
    pub fn synthesize(&self, query: &str, intent: &Intent) -> Synthesis {
        let matched = self.find_matching(query);
        self.synthesizer.synthesize(intent, matched.as_ref())
    }

    /// Execute a pre-built recipe.
    pub async fn execute(&self, recipe: &Recipe) -> Execution {
        self.interpreter.execute(recipe).await
    }

    /// Handle one classified request end to end.
    pub async fn handle(&self, query: &str, intent: &Intent) -> Outcome {
        self.handle_with_cancellation(query, intent, CancellationToken::new())
            .await
    }

    /// [`handle`](Self::handle), stopping early when `cancel` fires.
    ///
    /// Recipes below the execution threshold are not run; the outcome is a
    /// failure with the escalation hint set.
    pub async fn handle_with_cancellation(
        &self,
        query: &str,
        intent: &Intent,
        cancel: CancellationToken,
    ) -> Outcome {
        let synthesis = self.synthesize(query, intent);
        let source = synthesis.source.to_string();

        if !self.synthesizer.config().admits(&synthesis.recipe) {
            let err = EngineError::AmbiguousIntent(format!(
                "recipe confidence {} is below the execution threshold {}",
                synthesis.recipe.confidence,
                self.synthesizer.config().execute_threshold
            ));
            tracing::debug!(source = %source, error = %err, "recipe not executed");
            return Outcome::failure(&err, source).escalating();
        }

        let Execution { result, record, .. } = self
            .interpreter
            .execute_with_cancellation(&synthesis.recipe, cancel)
            .await;
        let outcome = match result {
            Ok(data) => Outcome::success(data, source),
            Err(err) => Outcome::failure(&err, source),
        }
        .with_execution(record.id.clone(), record.elapsed());

        if synthesis.is_escalation() {
            outcome.escalating()
        } else {
            outcome
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("providers", &self.providers.len())
            .field("capabilities", &self.capabilities.names())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
