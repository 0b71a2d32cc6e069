//! The custom action seam.

use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use tessera_core::EngineError;

/// A host-provided operation callable from recipes as `<capability>.<action>`.
///
/// Receives the step's `params` with every placeholder already resolved.
#[async_trait]
pub trait CustomAction: Send + Sync {
    /// Run the action.
    async fn invoke(&self, params: Value) -> Result<Value, EngineError>;
}

/// A [`CustomAction`] backed by an async closure. Build with [`action_fn`].
pub struct FnAction<F>(F);

/// Wrap an async closure as a [`CustomAction`].
///
/// ```
/// use tessera_capability::action_fn;
/// use serde_json::{Value, json};
///
/// let validate = action_fn(|params: Value| async move {
///     let email = params["email"].as_str().unwrap_or_default();
///     Ok(json!(email.contains('@')))
/// });
/// # let _ = validate;
/// ```
pub fn action_fn<F, Fut>(f: F) -> FnAction<F>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, EngineError>> + Send + 'static,
{
    FnAction(f)
}

#[async_trait]
impl<F, Fut> CustomAction for FnAction<F>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, EngineError>> + Send + 'static,
{
    async fn invoke(&self, params: Value) -> Result<Value, EngineError> {
        (self.0)(params).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn closures_are_actions() {
        let double = action_fn(|params: Value| async move {
            let n = params["n"]
                .as_f64()
                .ok_or_else(|| EngineError::InvalidParameters("n must be a number".into()))?;
            Ok(json!(n * 2.0))
        });
        assert_eq!(double.invoke(json!({"n": 4})).await.unwrap(), json!(8.0));
        assert!(double.invoke(json!({})).await.is_err());
    }
}
