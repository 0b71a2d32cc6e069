#![deny(missing_docs)]
//! Recipe synthesis: turning an [`Intent`](tessera_core::Intent) into a
//! concrete [`Recipe`](tessera_core::Recipe).
//!
//! The [`Synthesizer`] picks a template (from the matched capability, else
//! from the [`BuiltinTemplates`]), deep-copies it and substitutes every
//! `${name}` it can from the intent's entities. References it cannot fill
//! are left for the interpreter, which resolves them against the execution
//! context. Entity values are inserted inert: text that looks like a
//! placeholder is escaped and never re-scanned.

pub mod builtin;
mod config;
mod synthesizer;

pub use builtin::BuiltinTemplates;
pub use config::SynthesizerConfig;
pub use synthesizer::{Synthesis, Synthesizer, TemplateSource, instantiate};
