#![deny(missing_docs)]
//! Capabilities: installable bundles of triggers, recipe templates, custom
//! actions and providers.
//!
//! A [`Capability`] is built in code or from a JSON [`CapabilityManifest`]
//! and handed to [`CapabilityRegistry::install`], which registers all of
//! its resources at once or none of them. [`CapabilityRegistry::uninstall`]
//! removes exactly what was installed.
//!
//! Custom actions are the only extension point of the interpreter. They
//! are addressed as `<capability>.<action>` and implement [`CustomAction`].

mod action;
mod manifest;
mod registry;

pub use action::{CustomAction, FnAction, action_fn};
pub use manifest::{Capability, CapabilityManifest, Trigger, TriggerSpec};
pub use registry::{CapabilityMatch, CapabilityRegistry, RegistryCounts};
