// src/sema/typer/fields.rs
//! Field-access elaboration: property read/write routing, closure wrapping,
//! inline and extension lowering.

use std::rc::Rc;

use crate::frontend::Span;
use crate::sema::context::Typer;
use crate::sema::typer::{Access, AccessMode};
use crate::sema::types::{
    ClassField, ClassRef, FieldKind, FunArg, MethodKind, TConst, TExprKind, TFunArg, TFunction,
    Type, TypeDecl, TypedExpr, VarAccess, extends,
};
use crate::sema::unify::follow;
use crate::sema::TypeResult;

impl Typer {
    /// A field read/write node; statics receivers produce static-field
    /// references instead of instance reads.
    pub(crate) fn mk_field(&self, e: TypedExpr, name: &str, ty: Type, span: Span) -> TypedExpr {
        if let TExprKind::TypeRef(TypeDecl::Class(c)) = &e.kind {
            TypedExpr::new(TExprKind::StaticField(c.clone(), name.to_string()), ty, span)
        } else {
            TypedExpr::new(TExprKind::Field(Box::new(e), name.to_string()), ty, span)
        }
    }

    /// The access is from the field's own receiver: syntactic `this`, or the
    /// enclosing class's statics expression.
    fn receiver_is_self(&self, e: &TypedExpr) -> bool {
        match &e.kind {
            TExprKind::Const(TConst::This) => true,
            TExprKind::TypeRef(TypeDecl::Class(c)) => self
                .curclass
                .as_ref()
                .is_some_and(|cur| Rc::ptr_eq(cur, c)),
            _ => false,
        }
    }

    /// Elaborate an access to a resolved field under `mode`. `ty` is the
    /// field type with class parameters already applied.
    pub(crate) fn field_access(
        &mut self,
        mode: AccessMode,
        f: &Rc<ClassField>,
        owner: Option<ClassRef>,
        ty: Type,
        e: TypedExpr,
        span: Span,
    ) -> TypeResult<Access> {
        match &f.kind {
            FieldKind::Method(m) => {
                let m = if self.g.config.no_inline && *m == MethodKind::Inline {
                    MethodKind::Normal
                } else {
                    *m
                };
                match mode {
                    AccessMode::Set => match m {
                        MethodKind::Dynamic => Ok(Access::Value(self.mk_field(e, &f.name, ty, span))),
                        _ => Err(self.err_custom(
                            "Cannot rebind this method : please use 'dynamic'",
                            span,
                        )),
                    },
                    AccessMode::Get => match m {
                        MethodKind::Macro => {
                            Err(self.err_custom("Macro functions must be called immediately", span))
                        }
                        MethodKind::Inline => Ok(Access::Inline {
                            recv: e,
                            field: f.clone(),
                            ty,
                        }),
                        // Reading a method yields a closure bound to the
                        // receiver, never a raw slot.
                        MethodKind::Normal | MethodKind::Dynamic => {
                            Ok(Access::Value(self.mk_closure(e, &f.name, ty, span)))
                        }
                    },
                    AccessMode::Call => match m {
                        MethodKind::Inline => Ok(Access::Inline {
                            recv: e,
                            field: f.clone(),
                            ty,
                        }),
                        MethodKind::Macro => {
                            let Some(class) = owner else {
                                return Err(
                                    self.err_custom("Macro call without a class owner", span)
                                );
                            };
                            Ok(Access::MacroCall {
                                class,
                                field: f.clone(),
                            })
                        }
                        MethodKind::Normal | MethodKind::Dynamic => {
                            Ok(Access::Value(self.mk_field(e, &f.name, ty, span)))
                        }
                    },
                }
            }
            FieldKind::Var { read, write } => {
                let access = match mode {
                    AccessMode::Get | AccessMode::Call => read,
                    AccessMode::Set => write,
                };
                match access {
                    VarAccess::Normal => {
                        Ok(Access::Value(self.normal_var(mode, f, write, ty, e, span)))
                    }
                    VarAccess::No => {
                        let allowed = self.untyped
                            || match (&owner, &self.curclass) {
                                (Some(owner), Some(cur)) => {
                                    extends(cur, owner) || extends(owner, cur)
                                }
                                _ => false,
                            };
                        if allowed {
                            Ok(Access::Value(self.normal_var(mode, f, write, ty, e, span)))
                        } else {
                            Ok(Access::Invalid(f.name.clone()))
                        }
                    }
                    VarAccess::Call(accessor) => {
                        // Inside the accessor itself the raw slot is used,
                        // with a backend prefix where the slot would collide.
                        if *accessor == self.curmethod && self.receiver_is_self(&e) {
                            let raw = format!(
                                "{}{}",
                                self.g.config.platform.accessor_prefix(),
                                f.name
                            );
                            return Ok(Access::Value(self.mk_field(e, &raw, ty, span)));
                        }
                        match mode {
                            AccessMode::Get | AccessMode::Call => {
                                let getter = self.mk_field(
                                    e,
                                    accessor,
                                    Type::fun(Vec::new(), ty.clone()),
                                    span,
                                );
                                Ok(Access::Value(TypedExpr::new(
                                    TExprKind::Call(Box::new(getter), Vec::new()),
                                    ty,
                                    span,
                                )))
                            }
                            AccessMode::Set => Ok(Access::Setter {
                                recv: e,
                                setter: accessor.clone(),
                                prop_ty: ty,
                                field: f.name.clone(),
                            }),
                        }
                    }
                    VarAccess::Resolve => {
                        let resolve_fn = self.mk_field(
                            e,
                            "resolve",
                            Type::fun(
                                vec![FunArg::new("field", self.t.string.clone())],
                                ty.clone(),
                            ),
                            span,
                        );
                        let arg = TypedExpr::new(
                            TExprKind::Const(TConst::Str(f.name.clone())),
                            self.t.string.clone(),
                            span,
                        );
                        Ok(Access::Value(TypedExpr::new(
                            TExprKind::Call(Box::new(resolve_fn), vec![arg]),
                            ty,
                            span,
                        )))
                    }
                    VarAccess::Inline => match mode {
                        AccessMode::Set => {
                            Err(self.err_custom("Cannot write to an inline variable", span))
                        }
                        _ => Ok(Access::Inline {
                            recv: e,
                            field: f.clone(),
                            ty,
                        }),
                    },
                    VarAccess::Never => Ok(Access::Invalid(f.name.clone())),
                }
            }
        }
    }

    /// Plain variable access, with the read-only-function closure rule:
    /// reading a non-writable function-typed variable yields a callable
    /// closure, not a property reference.
    fn normal_var(
        &self,
        mode: AccessMode,
        f: &Rc<ClassField>,
        write: &VarAccess,
        ty: Type,
        e: TypedExpr,
        span: Span,
    ) -> TypedExpr {
        if mode == AccessMode::Get
            && matches!(write, VarAccess::No | VarAccess::Never)
            && matches!(follow(&ty), Type::Fun(..))
        {
            return self.mk_closure(e, &f.name, ty, span);
        }
        self.mk_field(e, &f.name, ty, span)
    }

    fn mk_closure(&self, e: TypedExpr, name: &str, ty: Type, span: Span) -> TypedExpr {
        if let TExprKind::TypeRef(TypeDecl::Class(c)) = &e.kind {
            // Statics have no receiver to bind.
            return TypedExpr::new(TExprKind::StaticField(c.clone(), name.to_string()), ty, span);
        }
        TypedExpr::new(TExprKind::Closure(Box::new(e), name.to_string()), ty, span)
    }

    /// Lower an access in read position to a typed expression.
    pub(crate) fn acc_get(&mut self, acc: Access, span: Span) -> TypeResult<TypedExpr> {
        match acc {
            Access::Value(e) => Ok(e),
            Access::Invalid(name) => Err(self.err_custom(
                format!("Field {name} cannot be accessed for reading"),
                span,
            )),
            Access::Setter { .. } => Err(self.err_custom("Invalid property access", span)),
            Access::MacroCall { .. } => {
                Err(self.err_custom("Macro functions must be called immediately", span))
            }
            Access::Inline { recv, field, ty } => {
                let stored = field.expr.borrow().clone();
                match stored {
                    Some(body) if matches!(body.kind, TExprKind::Function(_)) => {
                        Ok(TypedExpr::new(
                            TExprKind::Closure(Box::new(recv), field.name.clone()),
                            ty,
                            span,
                        ))
                    }
                    Some(body) => Ok(body.reposition(span)),
                    None => Err(self.err_custom(
                        format!("Inline body of {} is not available", field.name),
                        span,
                    )),
                }
            }
            Access::Extension { call, this_arg } => self.eta_expand(call, this_arg, span),
        }
    }

    /// Lower an extension access in read position: a two-level function
    /// `fun e -> fun args -> call(e, args)` applied to the pre-bound first
    /// argument, preserving curry semantics and single evaluation.
    fn eta_expand(
        &mut self,
        call: TypedExpr,
        this_arg: TypedExpr,
        span: Span,
    ) -> TypeResult<TypedExpr> {
        let Type::Fun(args, ret) = follow(&call.ty) else {
            return Err(self.err_custom("Invalid extension field type", span));
        };
        let Some((first, rest)) = args.split_first() else {
            return Err(self.err_custom("Invalid extension field type", span));
        };

        let outer_name = "e".to_string();
        let mut call_args = vec![TypedExpr::new(
            TExprKind::Local(outer_name.clone()),
            first.ty.clone(),
            span,
        )];
        let mut inner_args = Vec::with_capacity(rest.len());
        for (i, a) in rest.iter().enumerate() {
            let name = if a.name.is_empty() {
                format!("a{i}")
            } else {
                a.name.clone()
            };
            call_args.push(TypedExpr::new(
                TExprKind::Local(name.clone()),
                a.ty.clone(),
                span,
            ));
            inner_args.push(TFunArg {
                name,
                opt: a.opt,
                ty: a.ty.clone(),
            });
        }

        let applied = TypedExpr::new(
            TExprKind::Call(Box::new(call), call_args),
            (*ret).clone(),
            span,
        );
        let inner_ty = Type::Fun(rest.to_vec(), ret.clone());
        let inner = TypedExpr::new(
            TExprKind::Function(TFunction {
                args: inner_args,
                ret: (*ret).clone(),
                body: Box::new(TypedExpr::new(
                    TExprKind::Return(Some(Box::new(applied))),
                    Type::mono(),
                    span,
                )),
            }),
            inner_ty.clone(),
            span,
        );
        let outer = TypedExpr::new(
            TExprKind::Function(TFunction {
                args: vec![TFunArg {
                    name: outer_name,
                    opt: false,
                    ty: first.ty.clone(),
                }],
                ret: inner_ty.clone(),
                body: Box::new(TypedExpr::new(
                    TExprKind::Return(Some(Box::new(inner))),
                    Type::mono(),
                    span,
                )),
            }),
            Type::fun(vec![first.clone()], inner_ty.clone()),
            span,
        );
        Ok(TypedExpr::new(
            TExprKind::Call(Box::new(outer), vec![this_arg]),
            inner_ty,
            span,
        ))
    }
}

/// The typed expression can stand on the left of an assignment.
pub(crate) fn assignable(e: &TypedExpr) -> bool {
    matches!(
        e.kind,
        TExprKind::Local(_)
            | TExprKind::Field(..)
            | TExprKind::StaticField(..)
            | TExprKind::Array(..)
    )
}
