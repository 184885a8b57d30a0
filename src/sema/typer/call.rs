// src/sema/typer/call.rs
//! Argument matching: optional skip-and-retry, default synthesis and
//! platform-specific trailing-null trimming.

use smallvec::SmallVec;

use crate::errors::{TypeError, UnifyTrace};
use crate::frontend::{Expr, Span};
use crate::sema::context::Typer;
use crate::sema::types::{FunArg, TConst, TExprKind, Type, TypedExpr};
use crate::sema::unify::unify;
use crate::sema::TypeResult;

impl Typer {
    /// Match call-site arguments against the formal list. Each actual is
    /// typed with the formal's type as bidirectional hint; a mismatch
    /// against an optional formal synthesizes a default and retries the
    /// same actual against the next formal.
    pub(crate) fn unify_call_params(
        &mut self,
        callee: Option<&str>,
        args: &[Expr],
        formals: &[FunArg],
        span: Span,
        inline: bool,
    ) -> TypeResult<Vec<TypedExpr>> {
        let ctx_of = |formal: &FunArg| {
            let kind = if formal.opt { "optional " } else { "" };
            match callee {
                Some(name) => format!(
                    "For {kind}function argument '{}' of {name}",
                    formal.name
                ),
                None => format!("For {kind}function argument '{}'", formal.name),
            }
        };

        let mut typed: Vec<TypedExpr> = Vec::with_capacity(formals.len());
        let mut skipped: SmallVec<[(String, UnifyTrace, Span); 2]> = SmallVec::new();
        let mut ai = 0usize;

        for formal in formals {
            if ai >= args.len() {
                if formal.opt {
                    typed.push(self.default_value(formal, span)?);
                    continue;
                }
                return Err(self.err_custom(
                    match callee {
                        Some(name) => format!("Not enough arguments for {name}"),
                        None => "Not enough arguments".to_string(),
                    },
                    span,
                ));
            }
            let actual = &args[ai];
            let e = self.type_expr_with(actual, Some(&formal.ty))?;
            match unify(&e.ty, &formal.ty) {
                Ok(()) => {
                    typed.push(e);
                    ai += 1;
                }
                Err(trace) => {
                    if formal.opt {
                        // Skip this formal and retry the same actual.
                        skipped.push((formal.name.clone(), trace, actual.span));
                        typed.push(self.default_value(formal, span)?);
                    } else {
                        return Err(TypeError::unify_for(trace, ctx_of(formal), actual.span).into());
                    }
                }
            }
        }

        if ai < args.len() {
            // One recorded skip means the mismatch there is the real story.
            if skipped.len() == 1 {
                let (name, trace, at) = skipped.into_iter().next().unwrap();
                return Err(TypeError::unify_for(
                    trace,
                    match callee {
                        Some(callee) => {
                            format!("For optional function argument '{name}' of {callee}")
                        }
                        None => format!("For optional function argument '{name}'"),
                    },
                    at,
                )
                .into());
            }
            return Err(self.err_custom(
                match callee {
                    Some(name) => format!("Too many arguments for {name}"),
                    None => "Too many arguments".to_string(),
                },
                span,
            ));
        }

        // Backends that cannot pass null for a skipped argument get the
        // trailing literal nulls dropped; interior nulls stay.
        if !inline && self.g.config.platform.strips_null_tail() {
            while let Some(last) = typed.last() {
                let idx = typed.len() - 1;
                if formals[idx].opt && last.is_null_const() {
                    typed.pop();
                } else {
                    break;
                }
            }
        }

        Ok(typed)
    }

    /// Default for a skipped optional argument: a synthesized position-info
    /// record when the formal is the distinguished alias, else a typed null.
    fn default_value(&mut self, formal: &FunArg, span: Span) -> TypeResult<TypedExpr> {
        if is_pos_infos(&formal.ty) {
            return self.pos_infos_value(formal.ty.clone(), span);
        }
        Ok(TypedExpr::null(formal.ty.clone(), span))
    }

    /// The call-site position record: file, line, class, method.
    pub(crate) fn pos_infos_value(&mut self, ty: Type, span: Span) -> TypeResult<TypedExpr> {
        let str_const = |s: String| {
            TypedExpr::new(
                TExprKind::Const(TConst::Str(s)),
                self.t.string.clone(),
                span,
            )
        };
        let class_name = self
            .curclass
            .as_ref()
            .map(|c| c.borrow().path.to_string())
            .unwrap_or_default();
        let fields = vec![
            ("fileName".to_string(), str_const(self.file.clone())),
            (
                "lineNumber".to_string(),
                TypedExpr::new(
                    TExprKind::Const(TConst::Int(span.line as i64)),
                    self.t.int.clone(),
                    span,
                ),
            ),
            ("className".to_string(), str_const(class_name)),
            ("methodName".to_string(), str_const(self.curmethod.clone())),
        ];
        Ok(TypedExpr::new(TExprKind::ObjectDecl(fields), ty, span))
    }
}

/// The unfollowed type is the position-info typedef.
pub(crate) fn is_pos_infos(t: &Type) -> bool {
    match t {
        Type::Alias(a, _) => a.borrow().path.name == "PosInfos",
        _ => false,
    }
}
