#![deny(missing_docs)]
//! Provider registry, adaptive selection and the transport seam for tessera.
//!
//! A *provider* is a backing service (a price API, a weather API) described
//! by a [`ProviderManifest`]. The [`ProviderRegistry`] owns the manifests
//! plus live health counters, answers "which provider should serve this
//! call now" via [`ProviderRegistry::select_best`], and serializes every
//! counter update per provider.
//!
//! Network I/O goes through the [`Transport`] trait. [`dispatch`] wraps one
//! call with the local rate-limit check, a bounded timeout, HTTP status
//! classification and the counter update.
//! With the `http` feature (default) [`HttpTransport`] implements it over
//! `reqwest`; with `test-utils`, [`test_utils::StubTransport`] serves canned
//! responses.

mod call;
#[cfg(feature = "http")]
mod http;
mod manifest;
mod registry;
mod request;
mod transport;
mod window;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use call::{CallSpec, dispatch};
#[cfg(feature = "http")]
pub use http::HttpTransport;
pub use manifest::{AuthScheme, ProviderManifest, RateLimit};
pub use registry::{
    ProviderEntry, ProviderRegistry, ProviderSnapshot, Requirements, ScoreBreakdown,
    SelectorConfig,
};
pub use request::{ApiRequest, Method};
pub use transport::{ApiResponse, Transport, TransportError, classify_status};
pub use window::RequestWindow;
