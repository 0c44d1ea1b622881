// CLASSIFICATION: COMMUNITY
// Filename: mod.rs v0.3
// Author: Lukas Bower
// Date Modified: 2026-07-19

//! Conditional G-code file interpretation.

mod interpreter;
mod reader;

pub use interpreter::{CodeBlock, ConditionalReader};
pub use reader::CodeFileReader;

use tokio::sync::oneshot;

use crate::code::{Code, CodeChannel, CodeError};

/// Capability to evaluate `{}` expressions, injected into the interpreter.
///
/// The returned receiver resolves once the evaluation completes; the
/// production implementation round-trips through the firmware.
pub trait ExpressionEvaluator: Send + Sync {
    /// Evaluate the expression carried by `code`. With `expect_bool` the
    /// result must render as `true` or `false`.
    fn evaluate(&self, code: &Code, expect_bool: bool) -> oneshot::Receiver<Result<String, CodeError>>;
}

/// Capability to drop block-local variables when their block exits.
pub trait VariableScope: Send + Sync {
    /// Remove a block-local variable from the channel's scope.
    fn remove_local(&self, channel: CodeChannel, name: &str);
}

/// Capability to wait for previously emitted codes to settle.
///
/// The interpreter flushes before re-evaluating a loop condition and before
/// closing on `abort`, so conditions never read stale machine state.
pub trait CodeFlush: Send + Sync {
    /// Resolve with `true` once every pending code on `channel` reached a
    /// terminal state, or `false` if the channel was aborted meanwhile.
    fn flush(&self, channel: CodeChannel) -> oneshot::Receiver<bool>;
}
