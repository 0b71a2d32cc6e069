//! # tessera-core — protocol types for the tessera safe execution engine
//!
//! This crate defines the vocabulary shared by every other tessera crate.
//! It has no behavior of its own beyond value plumbing: the synthesizer,
//! interpreter and registries all live in their own crates and speak in
//! these types.
//!
//! | Type | What it is |
//! |------|-----------|
//! | [`Intent`] | Structured classification of a user request (input) |
//! | [`Recipe`] / [`Step`] | A concrete plan over a closed instruction set |
//! | [`ExecutionContext`] | Per-execution key/value store written via `assignTo` |
//! | [`Template`] | Tokenized `${path}` interpolation, never re-scanned |
//! | [`ExecutionRecord`] | Audit trail of one recipe execution |
//! | [`Outcome`] | The result contract handed back to the host |
//! | [`EngineError`] | The failure taxonomy, with severity and retry policy |
//!
//! ## Values
//!
//! Every dynamic value is a `serde_json::Value`. Recipes arrive as JSON
//! manifests, provider responses are JSON, and the context stores whatever
//! a step produced. Keeping one value type end to end avoids a conversion
//! layer at every boundary.

#![deny(missing_docs)]

pub mod context;
pub mod duration;
pub mod error;
pub mod id;
pub mod intent;
pub mod outcome;
pub mod recipe;
pub mod record;
pub mod template;
pub mod value;

pub use context::ExecutionContext;
pub use duration::DurationMs;
pub use error::{Disposition, EngineError, ErrorKind, Severity};
pub use id::{ExecutionId, ProviderId};
pub use intent::{Entities, Intent};
pub use outcome::{ErrorInfo, Outcome};
pub use recipe::{Fallback, Recipe, RecipeTemplate, Step};
pub use record::{ExecutionRecord, ExecutionStatus, StepStatus, StepTrace};
pub use template::{Filter, Segment, Template, UnresolvedPolicy};
