//! # Veil Native Core (Ground Truth)
//!
//! Action tracer, dual-target expression compiler, and client module
//! generator for the Veil server-driven component framework.
//!
//! ## Tracing Invariants
//!
//! 1. **One trace per name**: an action is traced exactly once per component
//!    instance, the first time it is registered. Re-registration under the
//!    same name is a no-op.
//! 2. **Recording scope**: handlers see only an `ActionScope`. The recorder
//!    is created and consumed inside registration, so it is released on
//!    every exit path and a handler can never nest another registration.
//! 3. **Deferred mutation**: while recording, cell mutations append to the
//!    operation log instead of mutating — except increment/decrement/toggle,
//!    which also apply their effect so later reads in the same recording
//!    stay coherent.
//! 4. **Replay law**: replaying an operation log against fresh containers
//!    seeded with the trace-time initial values lands on the host's own
//!    post-trace values. The generated client cells mirror the host
//!    mutation primitives branch for branch.
//! 5. **Slot integrity**: every operation slot references a state record in
//!    the same payload; cells and actions are emitted in creation order.
//! 6. **Degradation**: an unsupported construct degrades to "not reactive
//!    for this one construct" — never to an aborted render or module.

#[cfg(feature = "napi")]
use napi_derive::napi;

mod cache;
mod cell;
mod codegen;
mod compile;
mod context;
mod expr;
mod lexer;
mod payload;
mod rewrite;
mod script;
mod value;

#[cfg(test)]
mod rewrite_tests;
#[cfg(test)]
mod trace_tests;

pub use cache::ModuleCache;
pub use cell::{mutate, replay_operation, StateCell};
pub use codegen::{generate_client_module, ClientModule};
pub use compile::{CompiledExpression, ExpressionCompiler};
pub use context::{ActionScope, CellRef, ComponentContext, Recorder};
pub use expr::{parse_expression, parse_statements, AssignOp, AssignTarget, BinaryOp, Expr, Stmt, UnaryOp};
pub use payload::{
    ActionMap, ActionRecord, CellId, ComponentPayload, EffectRecord, Operation, StateCellRecord,
};
pub use rewrite::{rewrite_source, RewriteOutcome};
pub use script::{parse_action_source, ActionSource};
pub use value::{resolve_args, CellValue};

#[cfg(feature = "napi")]
pub use codegen::generate_module_native;
#[cfg(feature = "napi")]
pub use compile::compile_expression_native;
#[cfg(feature = "napi")]
pub use context::trace_component_native;

#[cfg(feature = "napi")]
#[napi]
pub fn veil_bridge() -> String {
    "Veil Native Bridge Connected".to_string()
}
