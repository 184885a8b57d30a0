// src/sema/typer/binop.rs
//! Operator typing over the numeric kind lattice, assignment and the
//! double-evaluation-free compound forms.

use std::rc::Rc;

use crate::errors::TypeError;
use crate::frontend::{Binop, Expr, Span, Unop, UnopFlag};
use crate::sema::context::Typer;
use crate::sema::kind::{NumKind, classify, coerce_int};
use crate::sema::typer::fields::assignable;
use crate::sema::typer::{Access, AccessMode};
use crate::sema::types::{FunArg, TConst, TExprKind, Type, TypedExpr};
use crate::sema::unify::{follow, unify};
use crate::sema::TypeResult;

impl Typer {
    pub(crate) fn type_binop(
        &mut self,
        op: &Binop,
        e1: &Expr,
        e2: &Expr,
        span: Span,
    ) -> TypeResult<TypedExpr> {
        match op {
            Binop::Assign => self.type_assign(e1, e2, span),
            Binop::AssignOp(inner) => self.type_assign_op(inner, e1, e2, span),
            _ => {
                let e1 = self.type_expr(e1, true)?;
                let e2 = self.type_expr(e2, true)?;
                self.binop_make(op, e1, e2, span)
            }
        }
    }

    /// Operator typing over already-typed operands; shared with the
    /// compound-assignment paths.
    pub(crate) fn binop_make(
        &mut self,
        op: &Binop,
        e1: TypedExpr,
        e2: TypedExpr,
        span: Span,
    ) -> TypeResult<TypedExpr> {
        let mk = |e1: TypedExpr, e2: TypedExpr, ty: Type| {
            TypedExpr::new(TExprKind::Binop(op.clone(), Box::new(e1), Box::new(e2)), ty, span)
        };
        match op {
            Binop::Add => {
                let ty = self.type_add(&e1, &e2)?;
                Ok(mk(e1, e2, ty))
            }
            Binop::Mul | Binop::Div | Binop::Sub | Binop::Mod => {
                let ty = self.type_arith(op, &e1, &e2)?;
                Ok(mk(e1, e2, ty))
            }
            Binop::And | Binop::Or | Binop::Xor | Binop::Shl | Binop::Shr | Binop::UShr => {
                unify(&e1.ty, &self.t.int).map_err(|tr| TypeError::unify(tr, e1.span))?;
                unify(&e2.ty, &self.t.int).map_err(|tr| TypeError::unify(tr, e2.span))?;
                let ty = self.t.int.clone();
                Ok(mk(e1, e2, ty))
            }
            Binop::Eq | Binop::NotEq => {
                // Symmetric: either side may flow into the other.
                if unify(&e1.ty, &e2.ty).is_err() {
                    unify(&e2.ty, &e1.ty).map_err(|tr| TypeError::unify(tr, span))?;
                }
                let ty = self.t.bool_.clone();
                Ok(mk(e1, e2, ty))
            }
            Binop::Gt | Binop::Gte | Binop::Lt | Binop::Lte => {
                self.type_compare(&e1, &e2, span)?;
                let ty = self.t.bool_.clone();
                Ok(mk(e1, e2, ty))
            }
            Binop::BoolAnd | Binop::BoolOr => {
                unify(&e1.ty, &self.t.bool_).map_err(|tr| TypeError::unify(tr, e1.span))?;
                unify(&e2.ty, &self.t.bool_).map_err(|tr| TypeError::unify(tr, e2.span))?;
                let ty = self.t.bool_.clone();
                Ok(mk(e1, e2, ty))
            }
            Binop::Interval => {
                unify(&e1.ty, &self.t.int).map_err(|tr| TypeError::unify(tr, e1.span))?;
                unify(&e2.ty, &self.t.int).map_err(|tr| TypeError::unify(tr, e2.span))?;
                let iter = self.range_iterator(span)?;
                let ty = Type::Inst(iter.clone(), Vec::new());
                Ok(TypedExpr::new(
                    TExprKind::New(iter, Vec::new(), vec![e1, e2]),
                    ty,
                    span,
                ))
            }
            Binop::Assign | Binop::AssignOp(_) => {
                Err(self.err_custom("Invalid operation", span))
            }
        }
    }

    fn type_add(&mut self, e1: &TypedExpr, e2: &TypedExpr) -> TypeResult<Type> {
        let tint = self.t.int.clone();
        let tfloat = self.t.float.clone();
        let k1 = classify(&e1.ty);
        let k2 = classify(&e2.ty);
        use NumKind::*;
        let ty = match (k1, k2) {
            (Int, Int) => tint,
            (Float, Int) | (Int, Float) | (Float, Float) => tfloat,
            (Unknown, Int) => {
                if coerce_int(e1, &tint, &tfloat).map_err(|tr| TypeError::unify(tr, e1.span))? {
                    tint
                } else {
                    tfloat
                }
            }
            (Unknown, Float) | (Unknown, Str) => {
                unify(&e1.ty, &e2.ty).map_err(|tr| TypeError::unify(tr, e1.span))?;
                e1.ty.clone()
            }
            (Int, Unknown) => {
                if coerce_int(e2, &tint, &tfloat).map_err(|tr| TypeError::unify(tr, e2.span))? {
                    tint
                } else {
                    tfloat
                }
            }
            (Float, Unknown) | (Str, Unknown) => {
                unify(&e2.ty, &e1.ty).map_err(|tr| TypeError::unify(tr, e2.span))?;
                e2.ty.clone()
            }
            (_, Str) | (_, Dynamic) => e2.ty.clone(),
            (Str, _) | (Dynamic, _) => e1.ty.clone(),
            (Unknown, Unknown) => {
                let ok1 =
                    coerce_int(e1, &tint, &tfloat).map_err(|tr| TypeError::unify(tr, e1.span))?;
                let ok2 =
                    coerce_int(e2, &tint, &tfloat).map_err(|tr| TypeError::unify(tr, e2.span))?;
                if ok1 && ok2 { tint } else { tfloat }
            }
            (Param(t1), Param(t2)) if param_eq(&t1, &t2) => t1,
            (Param(t), Int) | (Int, Param(t)) => t,
            (Param(_), Float) | (Float, Param(_)) | (Param(_), Param(_)) => tfloat,
            (Param(_), Unknown) => {
                unify(&e2.ty, &tfloat).map_err(|tr| TypeError::unify(tr, e2.span))?;
                tfloat
            }
            (Unknown, Param(_)) => {
                unify(&e1.ty, &tfloat).map_err(|tr| TypeError::unify(tr, e1.span))?;
                tfloat
            }
            (Other, _) | (_, Other) => {
                return Err(self.err_custom(
                    format!("Cannot add {} and {}", e1.ty, e2.ty),
                    e1.span,
                ));
            }
        };
        Ok(ty)
    }

    fn type_arith(
        &mut self,
        op: &Binop,
        e1: &TypedExpr,
        e2: &TypedExpr,
    ) -> TypeResult<Type> {
        let tint = self.t.int.clone();
        let tfloat = self.t.float.clone();
        let division = matches!(op, Binop::Div);
        // Division defaults to Float, everything else to Int.
        let mut result = if division { tfloat.clone() } else { tint.clone() };
        use NumKind::*;
        match (classify(&e1.ty), classify(&e2.ty)) {
            (Float, Float) => result = tfloat,
            (Param(t1), Param(t2)) if param_eq(&t1, &t2) => {
                if !division {
                    result = t1;
                }
            }
            (Param(_), Param(_)) => result = tfloat,
            (Param(t), Int) | (Int, Param(t)) => {
                if !division {
                    result = t;
                }
            }
            (Param(_), Float) | (Float, Param(_)) => result = tfloat,
            (Float, _) => {
                coerce_int(e2, &tint, &tfloat).map_err(|tr| TypeError::unify(tr, e2.span))?;
                result = tfloat;
            }
            (_, Float) => {
                coerce_int(e1, &tint, &tfloat).map_err(|tr| TypeError::unify(tr, e1.span))?;
                result = tfloat;
            }
            _ => {
                let ok1 =
                    coerce_int(e1, &tint, &tfloat).map_err(|tr| TypeError::unify(tr, e1.span))?;
                let ok2 =
                    coerce_int(e2, &tint, &tfloat).map_err(|tr| TypeError::unify(tr, e2.span))?;
                if !ok1 || !ok2 {
                    result = tfloat;
                }
            }
        }
        Ok(result)
    }

    fn type_compare(&mut self, e1: &TypedExpr, e2: &TypedExpr, span: Span) -> TypeResult<()> {
        let tint = self.t.int.clone();
        let tfloat = self.t.float.clone();
        use NumKind::*;
        let cannot = |typer: &Typer| {
            Err(typer.err_custom(
                format!("Cannot compare {} and {}", e1.ty, e2.ty),
                span,
            ))
        };
        match (classify(&e1.ty), classify(&e2.ty)) {
            (Int, Int) | (Int, Float) | (Float, Int) | (Float, Float) | (Str, Str) => Ok(()),
            (Int, Unknown) => {
                coerce_int(e2, &tint, &tfloat).map_err(|tr| TypeError::unify(tr, e2.span))?;
                Ok(())
            }
            (Float, Unknown) | (Str, Unknown) => {
                unify(&e2.ty, &e1.ty).map_err(|tr| TypeError::unify(tr, e2.span))?;
                Ok(())
            }
            (Unknown, Int) => {
                coerce_int(e1, &tint, &tfloat).map_err(|tr| TypeError::unify(tr, e1.span))?;
                Ok(())
            }
            (Unknown, Float) | (Unknown, Str) => {
                unify(&e1.ty, &e2.ty).map_err(|tr| TypeError::unify(tr, e1.span))?;
                Ok(())
            }
            (Unknown, Unknown) => {
                coerce_int(e1, &tint, &tfloat).map_err(|tr| TypeError::unify(tr, e1.span))?;
                coerce_int(e2, &tint, &tfloat).map_err(|tr| TypeError::unify(tr, e2.span))?;
                Ok(())
            }
            (Dynamic, Int) | (Dynamic, Float) | (Dynamic, Str) | (Dynamic, Dynamic) => Ok(()),
            (Int, Dynamic) | (Float, Dynamic) | (Str, Dynamic) => Ok(()),
            (Param(_), Str) | (Str, Param(_)) => cannot(self),
            (Param(_), Other) | (Other, Param(_)) => cannot(self),
            (Param(_), _) | (_, Param(_)) => Ok(()),
            _ => cannot(self),
        }
    }

    // -- assignment ---------------------------------------------------------

    fn type_assign(&mut self, lhs: &Expr, rhs: &Expr, span: Span) -> TypeResult<TypedExpr> {
        match self.type_access(lhs, AccessMode::Set)? {
            Access::Value(lv) => {
                if !assignable(&lv) {
                    return Err(self.err_custom("Invalid assign", span));
                }
                let rhs = self.type_expr_with(rhs, Some(&lv.ty))?;
                unify(&rhs.ty, &lv.ty).map_err(|tr| TypeError::unify(tr, rhs.span))?;
                let ty = lv.ty.clone();
                Ok(TypedExpr::new(
                    TExprKind::Binop(Binop::Assign, Box::new(lv), Box::new(rhs)),
                    ty,
                    span,
                ))
            }
            Access::Setter {
                recv,
                setter,
                prop_ty,
                field: _,
            } => {
                let rhs = self.type_expr_with(rhs, Some(&prop_ty))?;
                unify(&rhs.ty, &prop_ty).map_err(|tr| TypeError::unify(tr, rhs.span))?;
                let setter_fn = self.mk_field(
                    recv,
                    &setter,
                    Type::fun(
                        vec![FunArg::new("value", prop_ty.clone())],
                        prop_ty.clone(),
                    ),
                    span,
                );
                Ok(TypedExpr::new(
                    TExprKind::Call(Box::new(setter_fn), vec![rhs]),
                    prop_ty,
                    span,
                ))
            }
            Access::Invalid(name) => Err(self.err_custom(
                format!("Field {name} cannot be accessed for writing"),
                span,
            )),
            _ => Err(self.err_custom("Invalid assign", span)),
        }
    }

    /// `x op= y`. Property-backed targets bind the receiver to a temp once,
    /// then route the read through the getter and the write through the
    /// setter.
    fn type_assign_op(
        &mut self,
        op: &Binop,
        lhs: &Expr,
        rhs: &Expr,
        span: Span,
    ) -> TypeResult<TypedExpr> {
        match self.type_access(lhs, AccessMode::Set)? {
            Access::Value(lv) => {
                if !assignable(&lv) {
                    return Err(self.err_custom("Invalid assign", span));
                }
                let rhs = self.type_expr_with(rhs, Some(&lv.ty))?;
                let computed = self.binop_make(op, lv, rhs, span)?;
                let TExprKind::Binop(_, lv, rhs) = computed.kind else {
                    return Err(self.err_custom("Invalid operation", span));
                };
                let lv_ty = lv.ty.clone();
                unify(&computed.ty, &lv_ty).map_err(|tr| TypeError::unify(tr, span))?;
                Ok(TypedExpr::new(
                    TExprKind::Binop(Binop::AssignOp(Box::new(op.clone())), lv, rhs),
                    computed.ty,
                    span,
                ))
            }
            Access::Setter {
                recv,
                setter,
                prop_ty,
                field,
            } => {
                // {var tmp = recv; tmp.set(tmp.get() op rhs)} - the receiver
                // is evaluated exactly once.
                let tmp = self.gen_local(recv.ty.clone());
                let local = TypedExpr::new(TExprKind::Local(tmp.clone()), recv.ty.clone(), span);
                let read_acc = self.field_on(local.clone(), &field, AccessMode::Get, span)?;
                let read = self.acc_get(read_acc, span)?;
                let rhs = self.type_expr_with(rhs, Some(&prop_ty))?;
                let computed = self.binop_make(op, read, rhs, span)?;
                unify(&computed.ty, &prop_ty).map_err(|tr| TypeError::unify(tr, span))?;
                let setter_fn = self.mk_field(
                    local,
                    &setter,
                    Type::fun(
                        vec![FunArg::new("value", prop_ty.clone())],
                        prop_ty.clone(),
                    ),
                    span,
                );
                let set_call = TypedExpr::new(
                    TExprKind::Call(Box::new(setter_fn), vec![computed]),
                    prop_ty.clone(),
                    span,
                );
                let bind = TypedExpr::new(
                    TExprKind::Vars(vec![(tmp, recv.ty.clone(), Some(recv))]),
                    self.t.void.clone(),
                    span,
                );
                Ok(TypedExpr::new(
                    TExprKind::Block(vec![bind, set_call]),
                    prop_ty,
                    span,
                ))
            }
            Access::Invalid(name) => Err(self.err_custom(
                format!("Field {name} cannot be accessed for writing"),
                span,
            )),
            _ => Err(self.err_custom("Invalid operation", span)),
        }
    }

    // -- unary operators ----------------------------------------------------

    pub(crate) fn type_unop(
        &mut self,
        op: Unop,
        flag: UnopFlag,
        operand: &Expr,
        span: Span,
    ) -> TypeResult<TypedExpr> {
        match op {
            Unop::Not => {
                let e = self.type_expr(operand, true)?;
                unify(&e.ty, &self.t.bool_).map_err(|tr| TypeError::unify(tr, e.span))?;
                Ok(TypedExpr::new(
                    TExprKind::Unop(op, flag, Box::new(e)),
                    self.t.bool_.clone(),
                    span,
                ))
            }
            Unop::NegBits => {
                let e = self.type_expr(operand, true)?;
                unify(&e.ty, &self.t.int).map_err(|tr| TypeError::unify(tr, e.span))?;
                Ok(TypedExpr::new(
                    TExprKind::Unop(op, flag, Box::new(e)),
                    self.t.int.clone(),
                    span,
                ))
            }
            Unop::Neg => {
                let e = self.type_expr(operand, true)?;
                let ty = self.numeric_operand(&e, "negate")?;
                Ok(TypedExpr::new(TExprKind::Unop(op, flag, Box::new(e)), ty, span))
            }
            Unop::Increment | Unop::Decrement => self.type_incr(op, flag, operand, span),
        }
    }

    fn numeric_operand(&mut self, e: &TypedExpr, verb: &str) -> TypeResult<Type> {
        let tint = self.t.int.clone();
        let tfloat = self.t.float.clone();
        match classify(&e.ty) {
            NumKind::Int => Ok(tint),
            NumKind::Float => Ok(tfloat),
            NumKind::Param(t) => Ok(t),
            NumKind::Dynamic => Ok(e.ty.clone()),
            NumKind::Unknown => {
                if coerce_int(e, &tint, &tfloat).map_err(|tr| TypeError::unify(tr, e.span))? {
                    Ok(tint)
                } else {
                    Ok(tfloat)
                }
            }
            NumKind::Str | NumKind::Other => {
                Err(self.err_custom(format!("Cannot {verb} {}", e.ty), e.span))
            }
        }
    }

    /// `++`/`--`: property-backed targets get the same temp discipline as
    /// compound assignment, postfix adds a second temp for the pre-value.
    fn type_incr(
        &mut self,
        op: Unop,
        flag: UnopFlag,
        operand: &Expr,
        span: Span,
    ) -> TypeResult<TypedExpr> {
        let delta_op = if op == Unop::Increment {
            Binop::Add
        } else {
            Binop::Sub
        };
        match self.type_access(operand, AccessMode::Set)? {
            Access::Value(lv) => {
                if !assignable(&lv) {
                    return Err(self.err_custom("Invalid assign", span));
                }
                let ty = self.numeric_operand(&lv, "increment")?;
                Ok(TypedExpr::new(TExprKind::Unop(op, flag, Box::new(lv)), ty, span))
            }
            Access::Setter {
                recv,
                setter,
                prop_ty,
                field,
            } => {
                let one = TypedExpr::new(
                    TExprKind::Const(TConst::Int(1)),
                    self.t.int.clone(),
                    span,
                );
                let tmp = self.gen_local(recv.ty.clone());
                let local = TypedExpr::new(TExprKind::Local(tmp.clone()), recv.ty.clone(), span);
                let read_acc = self.field_on(local.clone(), &field, AccessMode::Get, span)?;
                let read = self.acc_get(read_acc, span)?;
                let setter_fn = self.mk_field(
                    local,
                    &setter,
                    Type::fun(
                        vec![FunArg::new("value", prop_ty.clone())],
                        prop_ty.clone(),
                    ),
                    span,
                );
                let bind = |tmp: String, ty: Type, init: TypedExpr, typer: &Typer| {
                    TypedExpr::new(
                        TExprKind::Vars(vec![(tmp, ty, Some(init))]),
                        typer.t.void.clone(),
                        span,
                    )
                };
                match flag {
                    UnopFlag::Prefix => {
                        let computed = self.binop_make(&delta_op, read, one, span)?;
                        unify(&computed.ty, &prop_ty)
                            .map_err(|tr| TypeError::unify(tr, span))?;
                        let set_call = TypedExpr::new(
                            TExprKind::Call(Box::new(setter_fn), vec![computed]),
                            prop_ty.clone(),
                            span,
                        );
                        let recv_bind = bind(tmp, recv.ty.clone(), recv, self);
                        Ok(TypedExpr::new(
                            TExprKind::Block(vec![recv_bind, set_call]),
                            prop_ty,
                            span,
                        ))
                    }
                    UnopFlag::Postfix => {
                        // Capture the pre-value before writing back.
                        let pre = self.gen_local(prop_ty.clone());
                        let pre_local =
                            TypedExpr::new(TExprKind::Local(pre.clone()), prop_ty.clone(), span);
                        let computed =
                            self.binop_make(&delta_op, pre_local.clone(), one, span)?;
                        unify(&computed.ty, &prop_ty)
                            .map_err(|tr| TypeError::unify(tr, span))?;
                        let set_call = TypedExpr::new(
                            TExprKind::Call(Box::new(setter_fn), vec![computed]),
                            prop_ty.clone(),
                            span,
                        );
                        let recv_bind = bind(tmp, recv.ty.clone(), recv, self);
                        let pre_bind = bind(pre, prop_ty.clone(), read, self);
                        Ok(TypedExpr::new(
                            TExprKind::Block(vec![recv_bind, pre_bind, set_call, pre_local]),
                            prop_ty,
                            span,
                        ))
                    }
                }
            }
            Access::Invalid(name) => Err(self.err_custom(
                format!("Field {name} cannot be accessed for writing"),
                span,
            )),
            _ => Err(self.err_custom("Invalid assign", span)),
        }
    }
}

/// Two numeric-parameter kinds denote the same declared parameter.
fn param_eq(t1: &Type, t2: &Type) -> bool {
    match (follow(t1), follow(t2)) {
        (Type::Inst(c1, _), Type::Inst(c2, _)) => Rc::ptr_eq(&c1, &c2),
        _ => false,
    }
}
