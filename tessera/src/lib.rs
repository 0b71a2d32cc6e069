#![deny(missing_docs)]
//! # tessera — umbrella crate
//!
//! A safe execution engine. A classified [`Intent`](tessera_core::Intent)
//! goes in; the engine picks a plan template (from an installed capability
//! or the built-ins), fills it from the intent, and runs it on a small
//! interpreter whose instruction set is closed. Remote calls go through an
//! adaptive provider registry; nothing is ever evaluated as code.
//!
//! ```no_run
//! use std::sync::Arc;
//! use tessera::prelude::*;
//!
//! # async fn run() -> Result<(), EngineError> {
//! let engine = Engine::new(Arc::new(HttpTransport::new()));
//! engine.register_provider(
//!     "primary-crypto",
//!     ProviderManifest::new("https://prices.example.com")
//!         .endpoint("price", "/v1/price/{symbol}"),
//! )?;
//!
//! let intent = Intent::new("finance", "get_info").with_target("bitcoin");
//! let outcome = engine.handle("what is bitcoin trading at?", &intent).await;
//! println!("{}", outcome.message.unwrap_or_default());
//! # Ok(())
//! # }
//! ```
//!
//! Each component crate is re-exported for hosts that need more than the
//! [`Engine`] facade.

mod config;
mod engine;

pub use config::EngineConfig;
pub use engine::Engine;

pub use tessera_capability;
pub use tessera_core;
pub use tessera_interp;
pub use tessera_provider;
pub use tessera_synth;

/// Happy-path imports for embedding the engine.
pub mod prelude {
    pub use crate::{Engine, EngineConfig};

    pub use tessera_core::{
        EngineError, ErrorKind, ExecutionRecord, Intent, Outcome, Recipe, Step, UnresolvedPolicy,
    };

    pub use tessera_capability::{Capability, CapabilityManifest, CustomAction, action_fn};

    pub use tessera_provider::{ProviderManifest, Transport};

    #[cfg(feature = "http")]
    pub use tessera_provider::HttpTransport;

    pub use tessera_interp::{Execution, InterpreterConfig};

    pub use tessera_synth::{BuiltinTemplates, SynthesizerConfig};
}
