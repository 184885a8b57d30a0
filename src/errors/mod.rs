// src/errors/mod.rs
//! Typing diagnostics (E3xxx).
//!
//! The taxonomy is deliberately small: identifier lookup exhaustion, module
//! resolution failure, unification failure (carrying the unifier trace), and
//! composed messages. Editor-integration signals are not diagnostics and
//! live in `sema::Interrupt`.

use std::fmt;

use miette::{Diagnostic, SourceSpan};
use thiserror::Error;

use crate::frontend::Span;

/// One step of a failed unification, already rendered: `found` should have
/// been `expected`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnifyStep {
    pub found: String,
    pub expected: String,
}

/// The accumulated trace of a failed unification, innermost pair first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnifyTrace {
    pub steps: Vec<UnifyStep>,
}

impl UnifyTrace {
    pub fn single(found: impl Into<String>, expected: impl Into<String>) -> Self {
        Self {
            steps: vec![UnifyStep {
                found: found.into(),
                expected: expected.into(),
            }],
        }
    }

    /// Wrap with an outer pair, keeping the inner steps for context.
    pub fn push_outer(mut self, found: impl Into<String>, expected: impl Into<String>) -> Self {
        let step = UnifyStep {
            found: found.into(),
            expected: expected.into(),
        };
        // Skip the outer frame when it repeats the innermost one verbatim.
        if self.steps.last() != Some(&step) {
            self.steps.push(step);
        }
        self
    }
}

impl fmt::Display for UnifyTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Outermost pair first when printing.
        for (i, step) in self.steps.iter().rev().enumerate() {
            if i > 0 {
                write!(f, "\n  ")?;
            }
            write!(f, "{} should be {}", step.found, step.expected)?;
        }
        Ok(())
    }
}

fn unify_message(trace: &UnifyTrace, context: &Option<String>) -> String {
    match context {
        Some(ctx) => format!("{trace}\n{ctx}"),
        None => trace.to_string(),
    }
}

#[derive(Error, Debug, Diagnostic, Clone)]
pub enum TypeErrorKind {
    #[error("unknown identifier '{name}'")]
    #[diagnostic(code(E3001))]
    UnknownIdent {
        name: String,
        #[label("not found in scope")]
        span: SourceSpan,
    },

    #[error("module not found: {path}")]
    #[diagnostic(code(E3002), help("check the import path and class paths"))]
    ModuleNotFound {
        path: String,
        /// First capitalized segment of the failing path.
        name: String,
        #[label("no module here")]
        span: SourceSpan,
    },

    #[error("{}", unify_message(.trace, .context))]
    #[diagnostic(code(E3003))]
    Unify {
        trace: UnifyTrace,
        /// Extra frame, e.g. `For optional function argument 'x'`.
        context: Option<String>,
        #[label("type mismatch")]
        span: SourceSpan,
    },

    #[error("{message}")]
    #[diagnostic(code(E3004))]
    Custom {
        message: String,
        #[label("here")]
        span: SourceSpan,
    },
}

/// A positioned typing diagnostic.
#[derive(Debug, Clone)]
pub struct TypeError {
    pub kind: TypeErrorKind,
    pub span: Span,
}

impl TypeError {
    pub fn new(kind: TypeErrorKind, span: Span) -> Self {
        Self { kind, span }
    }

    pub fn unknown_ident(name: &str, span: Span) -> Self {
        Self::new(
            TypeErrorKind::UnknownIdent {
                name: name.to_string(),
                span: span.into(),
            },
            span,
        )
    }

    pub fn module_not_found(path: &str, name: &str, span: Span) -> Self {
        Self::new(
            TypeErrorKind::ModuleNotFound {
                path: path.to_string(),
                name: name.to_string(),
                span: span.into(),
            },
            span,
        )
    }

    pub fn unify(trace: UnifyTrace, span: Span) -> Self {
        Self::new(
            TypeErrorKind::Unify {
                trace,
                context: None,
                span: span.into(),
            },
            span,
        )
    }

    pub fn unify_for(trace: UnifyTrace, context: impl Into<String>, span: Span) -> Self {
        Self::new(
            TypeErrorKind::Unify {
                trace,
                context: Some(context.into()),
                span: span.into(),
            },
            span,
        )
    }

    pub fn custom(message: impl Into<String>, span: Span) -> Self {
        Self::new(
            TypeErrorKind::Custom {
                message: message.into(),
                span: span.into(),
            },
            span,
        )
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (line {})", self.kind, self.span.line)
    }
}
