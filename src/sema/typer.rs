// src/sema/typer.rs
//! The expression typer: recursive descent over the untyped grammar, with
//! access resolution, overload matching and macro dispatch hanging off it.

pub mod access;
pub mod binop;
pub mod call;
pub mod expr;
pub mod fields;
pub mod loops;
pub mod macros;
pub mod match_expr;
pub mod using;

#[cfg(test)]
mod tests;

pub use access::{Access, AccessMode};

use crate::frontend::Span;
use crate::sema::context::Typer;
use crate::sema::types::{TConst, TExprKind, TypedExpr};

impl Typer {
    /// `this` at the given position.
    pub(crate) fn this_expr(&self, span: Span) -> TypedExpr {
        TypedExpr::new(TExprKind::Const(TConst::This), self.tthis.clone(), span)
    }
}

pub(crate) fn is_capitalized(name: &str) -> bool {
    name.chars().next().is_some_and(|c| c.is_ascii_uppercase())
}
