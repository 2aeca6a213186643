//! A small, side-effect-free expression language for APIGate route
//! transforms (C5) and metering-cost expressions.
//!
//! Deliberately not a general-purpose scripting runtime: the
//! grammar covers exactly literals, member/index access, arithmetic and
//! comparison, string concatenation, the `??` conditional, and a four-entry
//! builtin-function whitelist. Every tree is bounded at parse time
//! ([`ast::MAX_AST_DEPTH`], [`ast::MAX_STRING_LEN`]); evaluation never
//! performs I/O and never panics — every failure is an [`ExprError`] value.

mod ast;
mod error;
mod eval;
mod parser;
mod value;

pub use ast::{BinaryOp, Builtin, Expr, MAX_AST_DEPTH, MAX_STRING_LEN};
pub use error::ExprError;
pub use eval::{eval, Context};
pub use parser::parse;
pub use value::Value;

/// Parse and evaluate `src` against `ctx` in one step.
///
/// # Errors
/// Returns [`ExprError`] on a syntax error or evaluation failure.
pub fn evaluate(src: &str, ctx: &Context) -> Result<Value, ExprError> {
    eval(&parse(src)?, ctx)
}

/// Evaluate `src` and render the result as a string, for use as a header
/// value or query parameter — the expression's string result replaces the
/// header.
///
/// # Errors
/// Returns [`ExprError`] on a syntax error or evaluation failure; callers
/// (the transformer) must leave the field unchanged on error.
pub fn evaluate_to_string(src: &str, ctx: &Context) -> Result<String, ExprError> {
    evaluate(src, ctx).map(|v| v.display_string())
}

/// Evaluate a metering expression and coerce the result to a finite,
/// non-negative `f64` cost multiplier.
///
/// Returns `None` if the expression fails to parse/evaluate, or produces a
/// non-finite or negative number — callers (the usage recorder) clamp to
/// the plan's `estimated_cost_per_req` in that case.
#[must_use]
pub fn evaluate_cost_multiplier(src: &str, ctx: &Context) -> Option<f64> {
    let value = evaluate(src, ctx).ok()?;
    let number = value.as_f64()?;
    (number.is_finite() && number >= 0.0).then_some(number)
}
