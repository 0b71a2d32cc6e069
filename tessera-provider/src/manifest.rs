//! Static provider metadata, as registered.

use indexmap::IndexMap;
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tessera_core::EngineError;

/// Description of one backing service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderManifest {
    /// Scheme + host (+ optional path prefix), e.g. `https://api.example.com/v1`.
    pub base_address: String,
    /// Endpoint name → path. Paths may contain `{param}` segments.
    #[serde(default)]
    pub endpoints: IndexMap<String, String>,
    /// Authentication scheme applied to every request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthScheme>,
    /// Client-side sliding-window budget.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimit>,
    /// Cost per call in USD. Zero means free.
    #[serde(default, deserialize_with = "deserialize_cost")]
    pub cost: Decimal,
    /// Prior reliability estimate in `[0, 1]`.
    #[serde(default = "default_reliability")]
    pub reliability: f64,
    /// Selector categories this provider can serve (`crypto`, `weather`).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub categories: Vec<String>,
    /// Per-provider timeout override in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

fn default_reliability() -> f64 {
    0.5
}

/// Accept the cost as a JSON number or a decimal string.
fn deserialize_cost<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Number(n) => n
            .as_f64()
            .and_then(Decimal::from_f64)
            .ok_or_else(|| D::Error::custom(format!("invalid cost: {n}"))),
        serde_json::Value::String(s) => {
            Decimal::from_str(&s).map_err(|e| D::Error::custom(format!("invalid cost '{s}': {e}")))
        }
        serde_json::Value::Null => Ok(Decimal::ZERO),
        other => Err(D::Error::custom(format!("invalid cost: {other}"))),
    }
}

/// Client-side request budget: at most `requests` calls per `window_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimit {
    /// Calls allowed per window.
    pub requests: u32,
    /// Window length in milliseconds.
    pub window_ms: u64,
}

impl RateLimit {
    /// Window length as a `Duration`.
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

/// How credentials are attached to requests.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum AuthScheme {
    /// A static key, sent as a header (default `X-API-Key`) or query parameter.
    ApiKey {
        /// The key.
        key: String,
        /// Header name override.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        header: Option<String>,
        /// Send as this query parameter instead of a header.
        #[serde(default, rename = "queryParam", skip_serializing_if = "Option::is_none")]
        query_param: Option<String>,
    },
    /// `Authorization: Bearer <token>`.
    Bearer {
        /// The token.
        token: String,
    },
    /// `Authorization: Basic base64(username:password)`.
    Basic {
        /// User name.
        username: String,
        /// Password.
        password: String,
    },
}

// Credentials never reach logs.
impl fmt::Debug for AuthScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthScheme::ApiKey {
                header,
                query_param,
                ..
            } => f
                .debug_struct("ApiKey")
                .field("key", &"<redacted>")
                .field("header", header)
                .field("query_param", query_param)
                .finish(),
            AuthScheme::Bearer { .. } => f
                .debug_struct("Bearer")
                .field("token", &"<redacted>")
                .finish(),
            AuthScheme::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
        }
    }
}

impl ProviderManifest {
    /// A manifest with the given base address and nothing else.
    pub fn new(base_address: impl Into<String>) -> Self {
        Self {
            base_address: base_address.into(),
            endpoints: IndexMap::new(),
            auth: None,
            rate_limit: None,
            cost: Decimal::ZERO,
            reliability: default_reliability(),
            categories: Vec::new(),
            timeout_ms: None,
        }
    }

    /// Add an endpoint.
    #[must_use]
    pub fn endpoint(mut self, name: impl Into<String>, path: impl Into<String>) -> Self {
        self.endpoints.insert(name.into(), path.into());
        self
    }

    /// Set the reliability prior.
    #[must_use]
    pub fn reliability(mut self, reliability: f64) -> Self {
        self.reliability = reliability;
        self
    }

    /// Set the cost per call.
    #[must_use]
    pub fn cost(mut self, cost: Decimal) -> Self {
        self.cost = cost;
        self
    }

    /// Tag the provider with a selector category.
    #[must_use]
    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.categories.push(category.into());
        self
    }

    /// Set a client-side rate limit.
    #[must_use]
    pub fn rate_limit(mut self, requests: u32, window_ms: u64) -> Self {
        self.rate_limit = Some(RateLimit {
            requests,
            window_ms,
        });
        self
    }

    /// Set the authentication scheme.
    #[must_use]
    pub fn auth(mut self, auth: AuthScheme) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Override the call timeout for this provider.
    #[must_use]
    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Check the static fields.
    pub fn validate(&self, id: &str) -> Result<(), EngineError> {
        let invalid = |what: &str| {
            Err(EngineError::InvalidParameters(format!(
                "provider '{id}': {what}"
            )))
        };
        if id.trim().is_empty() {
            return invalid("empty id");
        }
        if !(self.base_address.starts_with("http://") || self.base_address.starts_with("https://"))
        {
            return invalid("baseAddress must be an http(s) URL");
        }
        if !(0.0..=1.0).contains(&self.reliability) {
            return invalid("reliability must be within [0, 1]");
        }
        if self.cost.is_sign_negative() {
            return invalid("cost must not be negative");
        }
        if let Some(limit) = self.rate_limit {
            if limit.requests == 0 || limit.window_ms == 0 {
                return invalid("rateLimit requests and windowMs must be positive");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_full_manifest() {
        let manifest: ProviderManifest = serde_json::from_value(json!({
            "baseAddress": "https://api.coins.test",
            "endpoints": {"price": "/v1/price/{symbol}"},
            "auth": {"type": "apiKey", "key": "k-123", "queryParam": "apikey"},
            "rateLimit": {"requests": 5, "windowMs": 1000},
            "cost": 0.002,
            "reliability": 0.95,
            "categories": ["crypto"]
        }))
        .unwrap();
        assert_eq!(manifest.endpoints["price"], "/v1/price/{symbol}");
        assert_eq!(manifest.cost, Decimal::from_str("0.002").unwrap());
        assert_eq!(manifest.rate_limit.unwrap().window(), Duration::from_secs(1));
        assert!(matches!(
            manifest.auth,
            Some(AuthScheme::ApiKey { query_param: Some(ref q), .. }) if q == "apikey"
        ));
        manifest.validate("coins").unwrap();
    }

    #[test]
    fn cost_accepts_strings_and_defaults_to_free() {
        let m: ProviderManifest = serde_json::from_value(json!({
            "baseAddress": "https://a.test",
            "cost": "0.10"
        }))
        .unwrap();
        assert_eq!(m.cost, Decimal::from_str("0.10").unwrap());

        let free: ProviderManifest =
            serde_json::from_value(json!({"baseAddress": "https://a.test"})).unwrap();
        assert_eq!(free.cost, Decimal::ZERO);
        assert_eq!(free.reliability, 0.5);
    }

    #[test]
    fn debug_redacts_credentials() {
        let auth = AuthScheme::Bearer {
            token: "super-secret".into(),
        };
        let text = format!("{auth:?}");
        assert!(!text.contains("super-secret"));
        assert!(text.contains("redacted"));
    }

    #[test]
    fn validation_rejects_bad_fields() {
        assert!(ProviderManifest::new("ftp://x").validate("p").is_err());
        assert!(
            ProviderManifest::new("https://x")
                .reliability(1.5)
                .validate("p")
                .is_err()
        );
        assert!(
            ProviderManifest::new("https://x")
                .rate_limit(0, 1000)
                .validate("p")
                .is_err()
        );
        assert!(ProviderManifest::new("https://x").validate(" ").is_err());
    }
}
