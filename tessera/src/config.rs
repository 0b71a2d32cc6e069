use serde::{Deserialize, Serialize};
use tessera_interp::InterpreterConfig;
use tessera_provider::SelectorConfig;
use tessera_synth::SynthesizerConfig;

/// Settings for every engine component.
///
/// All fields default, so a host can load a partial JSON document:
///
/// ```
/// let config: tessera::EngineConfig =
///     serde_json::from_str(r#"{"interpreter": {"callTimeoutMs": 2500}}"#).unwrap();
/// assert_eq!(config.interpreter.call_timeout_ms, 2500);
/// assert_eq!(config.synthesizer.execute_threshold, 0.7);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Interpreter settings.
    pub interpreter: InterpreterConfig,
    /// Synthesizer settings, including the execution threshold.
    pub synthesizer: SynthesizerConfig,
    /// Provider selection settings.
    pub selector: SelectorConfig,
}
