//! # tessera-interp — the safe recipe interpreter
//!
//! Executes a [`Recipe`](tessera_core::Recipe) over a closed instruction
//! set. Nothing in a recipe is ever evaluated as code: every step tag is
//! decoded into an [`Instruction`] before the first step runs, and anything
//! outside the whitelist that is not a registered custom action rejects the
//! whole recipe with `UnknownOperation`.
//!
//! | Tag | What it does |
//! |-----|-------------|
//! | `apiCall` | One provider call, by id or best-of-category |
//! | `parallelApiCalls` | Concurrent fan-out; fails only if every branch fails |
//! | `batchApiCalls` | Sequential calls against one provider, each tagged |
//! | `calculate` | The fixed [`CalcOp`] library, including `evaluate` |
//! | `formatResponse` | Template rendering against the context |
//! | `transform` | One pure [`TransformFn`] over a context value |
//! | `conditional` | Exactly one of two nested step lists |
//! | `error` | A classified failure |
//! | `<capability>.<action>` | A registered custom action |
//!
//! A step that fails on a provider is retried once per recipe fallback, in
//! priority order. Every execution yields an
//! [`ExecutionRecord`](tessera_core::ExecutionRecord) with one trace entry
//! per step.

#![deny(missing_docs)]

pub mod calc;
pub mod config;
pub mod expr;
pub mod instruction;
pub mod interpreter;
pub mod transform;

pub use calc::CalcOp;
pub use config::InterpreterConfig;
pub use expr::{ExprError, evaluate};
pub use instruction::{DecodedStep, Instruction, decode_steps};
pub use interpreter::{Execution, Interpreter};
pub use transform::TransformFn;
