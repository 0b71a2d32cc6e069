//! Test doubles for the transport seam.
//!
//! Available behind the `test-utils` feature flag.

mod stub_transport;

pub use stub_transport::{Reply, StubTransport};
