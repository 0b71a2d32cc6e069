use serde::{Deserialize, Serialize};
use tessera_core::Recipe;

/// Synthesis settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SynthesizerConfig {
    /// Recipes below this confidence are not executed.
    pub execute_threshold: f64,
}

impl Default for SynthesizerConfig {
    fn default() -> Self {
        Self {
            execute_threshold: 0.7,
        }
    }
}

impl SynthesizerConfig {
    /// Whether `recipe` is confident enough to run.
    pub fn admits(&self, recipe: &Recipe) -> bool {
        recipe.meets(self.execute_threshold)
    }
}
