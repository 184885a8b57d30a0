// src/sema/mod.rs
//! Semantic core: type model, unifier, numeric kinds, the expression typer
//! and module finalization.

pub mod context;
pub mod finalize;
pub mod kind;
pub mod typer;
pub mod types;
pub mod unify;

use crate::errors::TypeError;
use crate::sema::types::Type;

/// Why typing stopped. `Error` is a diagnostic; the other arms are control
/// transfers for editor integration and are not failures.
#[derive(Debug)]
pub enum Interrupt {
    Error(TypeError),
    /// A display query was answered with the reachable-field set.
    Display(Type),
    /// Identifier resolution hit a bare type path.
    TypePath(Vec<String>),
}

pub type TypeResult<T> = Result<T, Interrupt>;

impl From<TypeError> for Interrupt {
    fn from(err: TypeError) -> Self {
        Interrupt::Error(err)
    }
}

impl Interrupt {
    pub fn into_error(self) -> Option<TypeError> {
        match self {
            Interrupt::Error(e) => Some(e),
            _ => None,
        }
    }
}
