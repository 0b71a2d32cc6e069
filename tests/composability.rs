//! Composability without live endpoints.
//!
//! 1. **Transport swap**: the same engine over a hand-written transport
//! 2. **Manifest capabilities**: a capability loaded from JSON, actions bound in code
//! 3. **Concurrent executions**: shared registries, private contexts

use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::{Value, json};
use tessera::prelude::*;
use tessera_core::ExecutionStatus;
use tessera_provider::test_utils::{Reply, StubTransport};
use tessera_provider::{ApiRequest, ApiResponse, TransportError};

/// Answers every price request with a price derived from the path.
struct EchoTransport {
    sent: AtomicUsize,
}

#[async_trait]
impl Transport for EchoTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
        self.sent.fetch_add(1, Ordering::SeqCst);
        let symbol = request.url.rsplit('/').next().unwrap_or_default();
        Ok(ApiResponse::ok(json!(format!("{}.00", symbol.len() * 1000))))
    }
}

fn crypto(base: &str) -> ProviderManifest {
    ProviderManifest::new(base).endpoint("price", "/price/{symbol}")
}

#[tokio::test]
async fn transport_swap_keeps_engine_behavior() {
    let echo = Arc::new(EchoTransport {
        sent: AtomicUsize::new(0),
    });
    let transport: Arc<dyn Transport> = echo.clone();
    let engine = Engine::new(transport);
    engine
        .register_provider("primary-crypto", crypto("https://echo.test"))
        .unwrap();

    let intent = Intent::new("finance", "get_info").with_target("bitcoin");
    let outcome = engine.handle("bitcoin?", &intent).await;
    assert_eq!(
        outcome.message.as_deref(),
        Some("The current price of bitcoin is $7,000.00")
    );
    assert_eq!(echo.sent.load(Ordering::SeqCst), 1);

    let stub: Arc<dyn Transport> =
        Arc::new(StubTransport::new().route("primary-crypto", Reply::ok(json!("7000"))));
    let engine = Engine::new(stub);
    engine
        .register_provider("primary-crypto", crypto("https://stub.test"))
        .unwrap();
    let swapped = engine.handle("bitcoin?", &intent).await;
    assert_eq!(swapped.message, outcome.message);
}

const WEATHER: &str = r#"{
    "name": "weather",
    "version": "2.1.0",
    "triggers": ["weather", {"pattern": "forecast|rain"}],
    "recipeTemplates": {
        "forecast": {
            "confidence": 0.85,
            "steps": [
                {"type": "apiCall", "provider": "weather-api", "endpoint": "forecast",
                 "params": {"city": "${target}"}, "assignTo": "forecast"},
                {"type": "weather.describe", "params": {"forecast": "${forecast}"},
                 "assignTo": "summary"},
                {"type": "formatResponse", "template": "${target}: ${summary}", "returns": true}
            ]
        }
    },
    "customActions": ["describe"],
    "providers": {
        "weather-api": {
            "baseAddress": "https://weather.test",
            "endpoints": {"forecast": "/v1/forecast"},
            "auth": {"type": "apiKey", "key": "k-123", "queryParam": "key"},
            "rateLimit": {"requests": 60, "windowMs": 60000},
            "cost": "0.0025",
            "reliability": 0.95
        }
    }
}"#;

#[tokio::test]
async fn capability_from_json_manifest() {
    let stub = Arc::new(
        StubTransport::new().route("weather-api", Reply::ok(json!({"high": 18, "sky": "rain"}))),
    );
    let transport: Arc<dyn Transport> = stub.clone();
    let engine = Engine::new(transport);

    let manifest: CapabilityManifest = serde_json::from_str(WEATHER).unwrap();
    assert_eq!(
        manifest.providers["weather-api"].cost,
        Decimal::from_str("0.0025").unwrap()
    );

    let unbound = Capability::from_manifest(manifest.clone());
    assert_eq!(
        engine.install(unbound).unwrap_err().kind(),
        ErrorKind::InvalidParameters
    );

    let capability = Capability::from_manifest(manifest).action(
        "describe",
        action_fn(|params: Value| async move {
            let forecast = &params["forecast"];
            let sky = forecast["sky"].as_str().unwrap_or("unknown");
            Ok(json!(format!("{sky} with a high of {}", forecast["high"])))
        }),
    );
    engine.install(capability).unwrap();

    let matched = engine.find_matching("will it rain tomorrow?").unwrap();
    assert_eq!(matched.name, "weather");

    let intent = Intent::new("weather", "forecast").with_target("Lisbon");
    let outcome = engine.handle("will it rain tomorrow?", &intent).await;
    assert_eq!(outcome.source, "capability:weather/forecast");
    assert_eq!(
        outcome.message.as_deref(),
        Some("Lisbon: rain with a high of 18")
    );

    let request = &stub.requests()[0];
    assert_eq!(
        request.full_url(),
        "https://weather.test/v1/forecast?city=Lisbon&key=k-123"
    );
}

#[tokio::test]
async fn concurrent_executions_keep_private_contexts() {
    let echo: Arc<dyn Transport> = Arc::new(EchoTransport {
        sent: AtomicUsize::new(0),
    });
    let engine = Arc::new(Engine::new(echo));
    engine
        .register_provider("primary-crypto", crypto("https://echo.test"))
        .unwrap();

    let symbols = ["btc", "doge", "ethereum", "solana", "xrp"];
    let mut handles = Vec::new();
    for symbol in symbols {
        let engine = Arc::clone(&engine);
        handles.push(tokio::spawn(async move {
            let recipe = Recipe::new(
                1.0,
                vec![
                    Step::new("apiCall")
                        .with("provider", "primary-crypto")
                        .with("endpoint", "price")
                        .with("params", json!({"symbol": symbol}))
                        .with("transform", json!({"function": "parseNumber"}))
                        .assign_to("price"),
                ],
            );
            engine.execute(&recipe).await
        }));
    }

    for (symbol, handle) in symbols.iter().zip(handles) {
        let execution = handle.await.unwrap();
        assert_eq!(execution.record.status, ExecutionStatus::Completed);
        let expected = (symbol.len() * 1000) as f64;
        assert_eq!(execution.context.get("price"), Some(&json!(expected)));
        assert_eq!(execution.context.len(), 1);
    }

    let stats = engine.providers().snapshot();
    assert_eq!(stats[0].call_count, symbols.len() as u64);
}
