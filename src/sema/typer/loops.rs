// src/sema/typer/loops.rs
//! For-loop typing: range-for specialization hook first, then iterator
//! synthesis against the structural iterator protocol.

use crate::frontend::{Expr, Span};
use crate::sema::context::Typer;
use crate::sema::typer::{Access, AccessMode};
use crate::sema::types::{TExprKind, Type, TypedExpr, class_field};
use crate::sema::unify::{follow, iterator_shape, unify};
use crate::sema::TypeResult;

impl Typer {
    pub(crate) fn type_for(
        &mut self,
        v: &str,
        it: &Expr,
        body: &Expr,
        span: Span,
    ) -> TypeResult<TypedExpr> {
        let it_e = self.type_expr(it, true)?;

        // The range-for specialization is an optimization pass behind a
        // stable interface; declining falls through to synthesis.
        let opt = self.g.for_optimizer.borrow_mut().take();
        if let Some(opt) = opt {
            let special = opt.optimize_for(self, v, &it_e, body, span);
            *self.g.for_optimizer.borrow_mut() = Some(opt);
            if let Some(e) = special {
                return Ok(e);
            }
        }

        let (iter_e, elem) = self.make_iterator(it_e, span)?;
        let old_loop = std::mem::replace(&mut self.in_loop, true);
        let out = self.in_scope(|t| {
            let name = t.add_local(v, elem.clone());
            let body = t.type_expr(body, false)?;
            Ok(TypedExpr::new(
                TExprKind::For(name, elem.clone(), Box::new(iter_e), Box::new(body)),
                t.t.void.clone(),
                span,
            ))
        });
        self.in_loop = old_loop;
        out
    }

    /// Resolve `iterator()` on the subject when present, otherwise require
    /// the subject itself to satisfy the iterator protocol. Returns the
    /// iterator expression and the element type.
    fn make_iterator(&mut self, e: TypedExpr, span: Span) -> TypeResult<(TypedExpr, Type)> {
        let has_iter_method = match follow(&e.ty) {
            Type::Inst(c, pl) => class_field(&c, &pl, "iterator").is_some(),
            Type::Anon(a) => a.borrow().find("iterator").is_some(),
            _ => false,
        };

        let iter_e = if has_iter_method {
            let subj_ty = e.ty.clone();
            let acc = self.field_on(e, "iterator", AccessMode::Call, span)?;
            match acc {
                Access::Value(callee) => {
                    let ret = match follow(&callee.ty) {
                        Type::Fun(args, ret) if args.is_empty() => (*ret).clone(),
                        _ => {
                            return Err(self.err_custom(
                                format!("The iterator of {subj_ty} is not a method"),
                                span,
                            ));
                        }
                    };
                    TypedExpr::new(TExprKind::Call(Box::new(callee), Vec::new()), ret, span)
                }
                Access::Inline { recv, field, ty } => {
                    let ret = match follow(&ty) {
                        Type::Fun(args, ret) if args.is_empty() => (*ret).clone(),
                        _ => {
                            return Err(self.err_custom(
                                format!("The iterator of {subj_ty} is not a method"),
                                span,
                            ));
                        }
                    };
                    let callee = self.mk_field(recv, &field.name, ty, span);
                    TypedExpr::new(TExprKind::Call(Box::new(callee), Vec::new()), ret, span)
                }
                Access::Extension { call, this_arg } => {
                    let ret = match follow(&call.ty) {
                        Type::Fun(args, ret) if args.len() == 1 => (*ret).clone(),
                        _ => {
                            return Err(self.err_custom(
                                format!("The iterator of {subj_ty} is not a method"),
                                span,
                            ));
                        }
                    };
                    TypedExpr::new(
                        TExprKind::Call(Box::new(call), vec![this_arg]),
                        ret,
                        span,
                    )
                }
                _ => {
                    return Err(self.err_custom(
                        format!("The iterator of {subj_ty} is not a method"),
                        span,
                    ));
                }
            }
        } else {
            e
        };

        let elem = Type::mono();
        let shape = iterator_shape(elem.clone(), self.t.bool_.clone());
        if unify(&iter_e.ty, &shape).is_err() {
            return Err(self.err_custom(
                format!("You can't iterate on {}", iter_e.ty),
                span,
            ));
        }
        Ok((iter_e, elem))
    }
}
