// src/sema/typer/expr.rs
//! The expression typer driver: literals, control flow, calls, function
//! literals, casts and display queries.

use std::rc::Rc;

use crate::errors::TypeError;
use crate::frontend::{Constant, Expr, ExprKind, FunctionDecl, Span, TypeHint, WhileFlag};
use crate::sema::context::Typer;
use crate::sema::typer::{Access, AccessMode};
use crate::sema::types::{
    AnonField, AnonStatus, AnonType, ClassField, ClassKind, ClassRef, FunArg, TConst, TExprKind,
    TFunArg, TFunction, Type, TypeDecl, TypedExpr, apply_params,
};
use crate::sema::unify::{follow, unify, unify_check};
use crate::sema::{Interrupt, TypeResult};

impl Typer {
    /// Type an expression. `need_val` requests a value-producing form (a
    /// valueless `if` or `switch` stays `Void` otherwise).
    pub fn type_expr(&mut self, e: &Expr, need_val: bool) -> TypeResult<TypedExpr> {
        let span = e.span;
        match &e.kind {
            ExprKind::Const(Constant::Int(i)) => Ok(TypedExpr::new(
                TExprKind::Const(TConst::Int(*i)),
                self.t.int.clone(),
                span,
            )),
            ExprKind::Const(Constant::Float(fl)) => Ok(TypedExpr::new(
                TExprKind::Const(TConst::Float(*fl)),
                self.t.float.clone(),
                span,
            )),
            ExprKind::Const(Constant::Str(s)) => Ok(TypedExpr::new(
                TExprKind::Const(TConst::Str(s.clone())),
                self.t.string.clone(),
                span,
            )),
            ExprKind::Const(Constant::Ident(_)) | ExprKind::Field(..) | ExprKind::Array(..) => {
                let acc = self.type_access(e, AccessMode::Get)?;
                self.acc_get(acc, span)
            }
            ExprKind::Paren(inner) => {
                let e = self.type_expr(inner, need_val)?;
                let ty = e.ty.clone();
                Ok(TypedExpr::new(TExprKind::Paren(Box::new(e)), ty, span))
            }
            ExprKind::Object(fields) => self.type_object(fields, span),
            ExprKind::ArrayDecl(els) => self.type_array_decl(els, span),
            ExprKind::Vars(decls) => self.type_vars(decls, span),
            ExprKind::Function(decl) => self.type_function_literal(decl, span),
            ExprKind::Block(el) => self.type_block(el, need_val, span),
            ExprKind::If(cond, then, els) => {
                self.type_if(cond, then, els.as_deref(), need_val, span)
            }
            ExprKind::Ternary(cond, then, els) => {
                self.type_if(cond, then, Some(els.as_ref()), true, span)
            }
            ExprKind::While(cond, body, flag) => self.type_while(cond, body, *flag, span),
            ExprKind::For(v, it, body) => self.type_for(v, it, body, span),
            ExprKind::Switch(subject, cases, default) => {
                self.type_switch(subject, cases, default.as_deref(), need_val, span)
            }
            ExprKind::Return(value) => self.type_return(value.as_deref(), span),
            ExprKind::Break => {
                if !self.in_loop {
                    return Err(self.err_custom("Break outside loop", span));
                }
                Ok(TypedExpr::new(TExprKind::Break, Type::mono(), span))
            }
            ExprKind::Continue => {
                if !self.in_loop {
                    return Err(self.err_custom("Continue outside loop", span));
                }
                Ok(TypedExpr::new(TExprKind::Continue, Type::mono(), span))
            }
            ExprKind::Throw(value) => {
                let value = self.type_expr(value, true)?;
                Ok(TypedExpr::new(
                    TExprKind::Throw(Box::new(value)),
                    Type::mono(),
                    span,
                ))
            }
            ExprKind::Try(body, catches) => self.type_try(body, catches, need_val, span),
            ExprKind::New(path, args) => self.type_new(path, args, span),
            ExprKind::Untyped(inner) => {
                let saved = self.untyped;
                self.untyped = true;
                let out = self.type_expr(inner, need_val);
                self.untyped = saved;
                out
            }
            ExprKind::Cast(value, hint) => self.type_cast(value, hint.as_ref(), span),
            ExprKind::Display(inner) => self.type_display_query(inner, span),
            ExprKind::Call(callee, args) => self.type_call(callee, args, need_val, span),
            ExprKind::Binop(op, e1, e2) => self.type_binop(op, e1, e2, span),
            ExprKind::Unop(op, flag, operand) => self.type_unop(*op, *flag, operand, span),
        }
    }

    /// Type with a bidirectional hint: the expected type seeds function
    /// literal inference.
    pub(crate) fn type_expr_with(
        &mut self,
        e: &Expr,
        expected: Option<&Type>,
    ) -> TypeResult<TypedExpr> {
        match &e.kind {
            ExprKind::Function(_) if expected.is_some() => {
                let saved = self.param_type.take();
                self.param_type = expected.cloned();
                let out = self.type_expr(e, true);
                self.param_type = saved;
                out
            }
            ExprKind::Paren(inner) => {
                let inner = self.type_expr_with(inner, expected)?;
                let ty = inner.ty.clone();
                Ok(TypedExpr::new(TExprKind::Paren(Box::new(inner)), ty, e.span))
            }
            _ => self.type_expr(e, true),
        }
    }

    // -- literals -----------------------------------------------------------

    fn type_object(&mut self, fields: &[(String, Expr)], span: Span) -> TypeResult<TypedExpr> {
        let mut typed = Vec::with_capacity(fields.len());
        let mut anon_fields = Vec::with_capacity(fields.len());
        for (name, value) in fields {
            if typed.iter().any(|(n, _): &(String, TypedExpr)| n == name) {
                return Err(self.err_custom(
                    format!("Duplicate field in object declaration : {name}"),
                    span,
                ));
            }
            let value = self.type_expr(value, true)?;
            anon_fields.push(AnonField {
                name: name.clone(),
                ty: value.ty.clone(),
            });
            typed.push((name.clone(), value));
        }
        Ok(TypedExpr::new(
            TExprKind::ObjectDecl(typed),
            Type::Anon(AnonType::new(anon_fields, AnonStatus::Const)),
            span,
        ))
    }

    fn type_array_decl(&mut self, els: &[Expr], span: Span) -> TypeResult<TypedExpr> {
        let mut elem = Type::mono();
        let mut typed = Vec::with_capacity(els.len());
        let mut dynamicized = false;
        for el in els {
            let te = self.type_expr_with(el, Some(&elem))?;
            if !dynamicized && unify(&te.ty, &elem).is_err() {
                // Mixed element types degrade to a dynamic array.
                elem = Type::Dynamic;
                dynamicized = true;
            }
            typed.push(te);
        }
        let ty = self.t.tarray(elem);
        Ok(TypedExpr::new(TExprKind::ArrayDecl(typed), ty, span))
    }

    fn type_vars(
        &mut self,
        decls: &[crate::frontend::VarDecl],
        span: Span,
    ) -> TypeResult<TypedExpr> {
        let mut out = Vec::with_capacity(decls.len());
        for decl in decls {
            let ty = match &decl.hint {
                Some(h) => self.load_complex_type(h, span)?,
                None => Type::mono(),
            };
            let init = match &decl.init {
                Some(init) => {
                    let init = self.type_expr_with(init, Some(&ty))?;
                    unify(&init.ty, &ty).map_err(|tr| TypeError::unify(tr, init.span))?;
                    Some(init)
                }
                None => None,
            };
            // The binding becomes visible only after its initializer.
            let name = self.add_local(&decl.name, ty.clone());
            out.push((name, ty, init));
        }
        Ok(TypedExpr::new(
            TExprKind::Vars(out),
            self.t.void.clone(),
            span,
        ))
    }

    fn type_function_literal(
        &mut self,
        decl: &FunctionDecl,
        span: Span,
    ) -> TypeResult<TypedExpr> {
        // Contextual hint: argument types of the expected function type seed
        // unannotated parameters.
        let hint_args = match self.param_type.take().map(|t| follow(&t)) {
            Some(Type::Fun(args, _)) => Some(args),
            _ => None,
        };

        let mut args = Vec::with_capacity(decl.args.len());
        for (i, a) in decl.args.iter().enumerate() {
            let ty = match &a.hint {
                Some(h) => self.load_complex_type(h, span)?,
                None => hint_args
                    .as_ref()
                    .and_then(|ha| ha.get(i))
                    .map(|fa| fa.ty.clone())
                    .unwrap_or_else(Type::mono),
            };
            args.push(TFunArg {
                name: a.name.clone(),
                opt: a.opt,
                ty,
            });
        }
        let ret = match &decl.ret {
            Some(h) => self.load_complex_type(h, span)?,
            None => Type::mono(),
        };

        let old_ret = std::mem::replace(&mut self.ret, ret.clone());
        let old_in_loop = std::mem::replace(&mut self.in_loop, false);
        let old_in_constructor = std::mem::replace(&mut self.in_constructor, false);

        let body = self.in_scope(|t| {
            let mut renamed = Vec::with_capacity(args.len());
            for a in &args {
                let name = t.add_local(&a.name, a.ty.clone());
                renamed.push(name);
            }
            for (a, name) in args.iter_mut().zip(renamed) {
                a.name = name;
            }
            t.type_expr(&decl.body, false)
        });

        self.ret = old_ret;
        self.in_loop = old_in_loop;
        self.in_constructor = old_in_constructor;
        let body = body?;

        let fn_ty = Type::Fun(
            args.iter()
                .map(|a| FunArg {
                    name: a.name.clone(),
                    opt: a.opt,
                    ty: a.ty.clone(),
                })
                .collect(),
            Box::new(ret.clone()),
        );
        Ok(TypedExpr::new(
            TExprKind::Function(TFunction {
                args,
                ret,
                body: Box::new(body),
            }),
            fn_ty,
            span,
        ))
    }

    // -- control flow -------------------------------------------------------

    /// Blocks recover per statement: a failed statement is reported and
    /// replaced by a placeholder so one pass surfaces all the errors of the
    /// block.
    pub(crate) fn type_block(
        &mut self,
        el: &[Expr],
        need_val: bool,
        span: Span,
    ) -> TypeResult<TypedExpr> {
        self.in_scope(|t| {
            let mut out = Vec::with_capacity(el.len());
            for (i, e) in el.iter().enumerate() {
                let last = i + 1 == el.len();
                match t.type_expr(e, last && need_val) {
                    Ok(te) => out.push(te),
                    Err(Interrupt::Error(err)) => {
                        t.display_error(err);
                        out.push(TypedExpr::null(Type::mono(), e.span));
                    }
                    Err(other) => return Err(other),
                }
            }
            let ty = if need_val {
                out.last()
                    .map(|e| e.ty.clone())
                    .unwrap_or_else(|| t.t.void.clone())
            } else {
                t.t.void.clone()
            };
            Ok(TypedExpr::new(TExprKind::Block(out), ty, span))
        })
    }

    fn type_if(
        &mut self,
        cond: &Expr,
        then: &Expr,
        els: Option<&Expr>,
        need_val: bool,
        span: Span,
    ) -> TypeResult<TypedExpr> {
        let cond = self.type_expr(cond, true)?;
        unify(&cond.ty, &self.t.bool_).map_err(|tr| TypeError::unify(tr, cond.span))?;
        let then = self.in_scope(|t| t.type_expr(then, need_val))?;
        match els {
            None => Ok(TypedExpr::new(
                TExprKind::If(Box::new(cond), Box::new(then), None),
                self.t.void.clone(),
                span,
            )),
            Some(els) => {
                let els = self.in_scope(|t| t.type_expr(els, need_val))?;
                let ty = if need_val {
                    let acc = (then.ty.clone(), then.is_null_const());
                    let (ty, _) = self.value_lub(acc, &els, els.span)?;
                    ty
                } else {
                    self.t.void.clone()
                };
                Ok(TypedExpr::new(
                    TExprKind::If(Box::new(cond), Box::new(then), Some(Box::new(els))),
                    ty,
                    span,
                ))
            }
        }
    }

    /// Fold a branch into the common value type. Attempts both unification
    /// directions; a literal-null branch lifts the other side to nullable.
    pub(crate) fn value_lub(
        &mut self,
        prev: (Type, bool),
        e: &TypedExpr,
        span: Span,
    ) -> TypeResult<(Type, bool)> {
        let (prev_ty, prev_null) = prev;
        if e.is_null_const() {
            let lifted = self.tnull(prev_ty);
            unify(&e.ty, &lifted).map_err(|tr| TypeError::unify(tr, span))?;
            return Ok((lifted, false));
        }
        if prev_null {
            let lifted = self.tnull(e.ty.clone());
            let _ = unify(&prev_ty, &lifted);
            return Ok((lifted, false));
        }
        if unify(&e.ty, &prev_ty).is_ok() {
            return Ok((prev_ty, false));
        }
        match unify(&prev_ty, &e.ty) {
            Ok(()) => Ok((e.ty.clone(), false)),
            Err(trace) => Err(TypeError::unify(trace, span).into()),
        }
    }

    fn type_while(
        &mut self,
        cond: &Expr,
        body: &Expr,
        flag: WhileFlag,
        span: Span,
    ) -> TypeResult<TypedExpr> {
        let cond = self.type_expr(cond, true)?;
        unify(&cond.ty, &self.t.bool_).map_err(|tr| TypeError::unify(tr, cond.span))?;
        let old_loop = std::mem::replace(&mut self.in_loop, true);
        let body = self.in_scope(|t| t.type_expr(body, false));
        self.in_loop = old_loop;
        Ok(TypedExpr::new(
            TExprKind::While(Box::new(cond), Box::new(body?), flag),
            self.t.void.clone(),
            span,
        ))
    }

    fn type_return(&mut self, value: Option<&Expr>, span: Span) -> TypeResult<TypedExpr> {
        match value {
            None => {
                unify(&self.t.void.clone(), &self.ret)
                    .map_err(|tr| TypeError::unify(tr, span))?;
                Ok(TypedExpr::new(TExprKind::Return(None), Type::mono(), span))
            }
            Some(value) => {
                let expected = self.ret.clone();
                let value = self.type_expr_with(value, Some(&expected))?;
                unify(&value.ty, &expected).map_err(|tr| TypeError::unify(tr, value.span))?;
                Ok(TypedExpr::new(
                    TExprKind::Return(Some(Box::new(value))),
                    Type::mono(),
                    span,
                ))
            }
        }
    }

    fn type_try(
        &mut self,
        body: &Expr,
        catches: &[crate::frontend::Catch],
        need_val: bool,
        span: Span,
    ) -> TypeResult<TypedExpr> {
        let body = self.in_scope(|t| t.type_expr(body, need_val))?;
        let mut acc = (body.ty.clone(), body.is_null_const());
        let mut typed_catches = Vec::with_capacity(catches.len());
        for catch in catches {
            let ct = self.load_complex_type(&catch.hint, span)?;
            match follow(&ct) {
                Type::Inst(_, pl) | Type::Enum(_, pl) => {
                    if pl
                        .iter()
                        .any(|p| !matches!(follow(p), Type::Dynamic))
                    {
                        return Err(self.err_custom(
                            "Catch type parameters must be Dynamic",
                            span,
                        ));
                    }
                }
                Type::Dynamic => {}
                other => {
                    return Err(self.err_custom(
                        format!("Cannot catch {other} : class or enum expected"),
                        span,
                    ));
                }
            }
            let (name, cbody) = self.in_scope(|t| {
                let name = t.add_local(&catch.name, ct.clone());
                let cbody = t.type_expr(&catch.body, need_val)?;
                Ok((name, cbody))
            })?;
            if need_val {
                acc = self.value_lub(acc, &cbody, cbody.span)?;
            }
            typed_catches.push((name, ct, cbody));
        }
        let ty = if need_val { acc.0 } else { self.t.void.clone() };
        Ok(TypedExpr::new(
            TExprKind::Try(Box::new(body), typed_catches),
            ty,
            span,
        ))
    }

    // -- construction -------------------------------------------------------

    fn type_new(
        &mut self,
        path: &crate::frontend::TypePathHint,
        args: &[Expr],
        span: Span,
    ) -> TypeResult<TypedExpr> {
        let t = self.load_instance(path, span, true)?;
        let Type::Inst(c, pl) = follow(&t) else {
            return Err(self.err_custom(format!("Cannot instantiate {t}"), span));
        };
        if c.borrow().is_interface {
            return Err(self.err_custom(
                format!("Cannot instantiate interface {}", c.borrow().path),
                span,
            ));
        }
        if matches!(c.borrow().kind, ClassKind::TypeParam(_)) {
            return Err(self.err_custom("Type parameters cannot be constructed", span));
        }

        // The constructor may live on an extern ancestor.
        let found = constructor_of(&c, &pl);
        let Some((owner, _, ctor_ty)) = found else {
            return Err(self.err_custom(
                format!("Class {} does not have a constructor", c.borrow().path),
                span,
            ));
        };
        if owner.borrow().private_ctor {
            let from_parent = self
                .curclass
                .as_ref()
                .is_some_and(|cur| crate::sema::types::extends(&c, cur));
            if !from_parent && !self.untyped {
                return Err(self.err_custom(
                    format!("Cannot access private constructor of {}", owner.borrow().path),
                    span,
                ));
            }
        }

        let formals = match follow(&ctor_ty) {
            Type::Fun(formals, _) => formals,
            _ => Vec::new(),
        };
        let name = c.borrow().path.name.clone();
        let typed = self.unify_call_params(Some(&name), args, &formals, span, false)?;
        Ok(TypedExpr::new(
            TExprKind::New(c.clone(), pl.clone(), typed),
            Type::Inst(c, pl),
            span,
        ))
    }

    fn type_cast(
        &mut self,
        value: &Expr,
        hint: Option<&TypeHint>,
        span: Span,
    ) -> TypeResult<TypedExpr> {
        let value = self.type_expr(value, true)?;
        match hint {
            // Unchecked coercion to a fresh monomorph.
            None => Ok(TypedExpr::new(
                TExprKind::Cast(Box::new(value), None),
                Type::mono(),
                span,
            )),
            Some(hint) => {
                let target = self.load_complex_type(hint, span)?;
                let decl = match follow(&target) {
                    Type::Inst(c, pl) => {
                        check_cast_params(self, &pl, span)?;
                        TypeDecl::Class(c)
                    }
                    Type::Enum(en, pl) => {
                        check_cast_params(self, &pl, span)?;
                        TypeDecl::Enum(en)
                    }
                    other => {
                        return Err(self.err_custom(
                            format!("Cannot cast to {other} : class or enum expected"),
                            span,
                        ));
                    }
                };
                Ok(TypedExpr::new(
                    TExprKind::Cast(Box::new(value), Some(decl)),
                    target,
                    span,
                ))
            }
        }
    }

    // -- calls --------------------------------------------------------------

    pub(crate) fn type_call(
        &mut self,
        callee: &Expr,
        args: &[Expr],
        need_val: bool,
        span: Span,
    ) -> TypeResult<TypedExpr> {
        // Intrinsic forms first.
        if let ExprKind::Const(Constant::Ident(name)) = &callee.kind {
            match name.as_str() {
                "trace" if self.local_type("trace").is_none() => {
                    if self.g.config.no_traces {
                        return Ok(TypedExpr::null(self.t.void.clone(), span));
                    }
                    // trace(v) elaborates into Log.trace(v, infos); the
                    // position record rides the optional-argument machinery.
                    let log = Expr::new(
                        ExprKind::Field(
                            Box::new(Expr::new(
                                ExprKind::Const(Constant::Ident("Log".to_string())),
                                callee.span,
                            )),
                            "trace".to_string(),
                        ),
                        callee.span,
                    );
                    let rewritten = Expr::new(ExprKind::Call(Box::new(log), args.to_vec()), span);
                    return self.type_expr(&rewritten, need_val);
                }
                "__unprotect__" => {
                    if args.len() != 1 {
                        return Err(self.err_custom("__unprotect__ takes one argument", span));
                    }
                    let arg = self.type_expr(&args[0], true)?;
                    unify(&arg.ty, &self.t.string)
                        .map_err(|tr| TypeError::unify(tr, arg.span))?;
                    return Ok(if matches!(
                        self.g.config.platform,
                        crate::sema::context::Platform::Flash8
                            | crate::sema::context::Platform::Flash9
                    ) {
                        let intrinsic = TypedExpr::new(
                            TExprKind::Local("__unprotect__".to_string()),
                            Type::fun(
                                vec![FunArg::new("s", self.t.string.clone())],
                                self.t.string.clone(),
                            ),
                            span,
                        );
                        TypedExpr::new(
                            TExprKind::Call(Box::new(intrinsic), vec![arg]),
                            self.t.string.clone(),
                            span,
                        )
                    } else {
                        arg
                    });
                }
                "super" => return self.type_super_call(args, span),
                _ => {}
            }
        }

        let acc = self.type_call_access(callee)?;
        match acc {
            Access::MacroCall { class, field } => {
                match self.type_macro(&class, &field, args, span)? {
                    crate::sema::typer::macros::MacroOutcome::Spliced(expr) => {
                        self.type_expr(&expr, need_val)
                    }
                    crate::sema::typer::macros::MacroOutcome::Delayed(slot) => Ok(
                        TypedExpr::new(TExprKind::DelayedMacro(slot), Type::Dynamic, span),
                    ),
                }
            }
            Access::Inline { recv, field, ty } => {
                let Type::Fun(formals, ret) = follow(&ty) else {
                    return Err(self.err_custom(format!("Cannot call {ty}"), span));
                };
                let typed =
                    self.unify_call_params(Some(&field.name), args, &formals, span, true)?;
                // The expansion itself is an optimization pass; declining
                // degrades to a plain call.
                let inliner = self.g.inliner.borrow_mut().take();
                if let Some(inliner) = inliner {
                    let expanded =
                        inliner.inline_call(self, &field, &recv, &typed, &ret, span);
                    *self.g.inliner.borrow_mut() = Some(inliner);
                    if let Some(e) = expanded {
                        return Ok(e);
                    }
                }
                let callee = self.mk_field(recv, &field.name, ty, span);
                Ok(TypedExpr::new(
                    TExprKind::Call(Box::new(callee), typed),
                    (*ret).clone(),
                    span,
                ))
            }
            Access::Extension { call, this_arg } => {
                let Type::Fun(formals, ret) = follow(&call.ty) else {
                    return Err(self.err_custom(format!("Cannot call {}", call.ty), span));
                };
                let rest = &formals[1..];
                let callee_name = match &call.kind {
                    TExprKind::StaticField(_, name) => Some(name.clone()),
                    _ => None,
                };
                let mut typed =
                    self.unify_call_params(callee_name.as_deref(), args, rest, span, false)?;
                let mut all = Vec::with_capacity(typed.len() + 1);
                all.push(this_arg);
                all.append(&mut typed);
                Ok(TypedExpr::new(
                    TExprKind::Call(Box::new(call), all),
                    (*ret).clone(),
                    span,
                ))
            }
            Access::Value(callee_e) => self.type_value_call(callee_e, args, span),
            Access::Setter { .. } => Err(self.err_custom("Invalid call", span)),
            Access::Invalid(name) => {
                Err(self.err_custom(format!("Field {name} cannot be called"), span))
            }
        }
    }

    fn type_call_access(&mut self, callee: &Expr) -> TypeResult<Access> {
        self.type_access(callee, AccessMode::Call)
    }

    fn type_value_call(
        &mut self,
        callee: TypedExpr,
        args: &[Expr],
        span: Span,
    ) -> TypeResult<TypedExpr> {
        match follow(&callee.ty) {
            Type::Fun(formals, ret) => {
                let name = match &callee.kind {
                    TExprKind::Field(_, n)
                    | TExprKind::StaticField(_, n)
                    | TExprKind::Closure(_, n)
                    | TExprKind::Local(n)
                    | TExprKind::EnumField(_, n) => Some(n.clone()),
                    _ => None,
                };
                let typed =
                    self.unify_call_params(name.as_deref(), args, &formals, span, false)?;
                Ok(TypedExpr::new(
                    TExprKind::Call(Box::new(callee), typed),
                    (*ret).clone(),
                    span,
                ))
            }
            Type::Mono(_) => {
                // Infer a function shape from the call site.
                let mut typed = Vec::with_capacity(args.len());
                let mut formals = Vec::with_capacity(args.len());
                for (i, a) in args.iter().enumerate() {
                    let e = self.type_expr(a, true)?;
                    formals.push(FunArg::new(&format!("a{i}"), e.ty.clone()));
                    typed.push(e);
                }
                let ret = Type::mono();
                unify(&callee.ty, &Type::fun(formals, ret.clone()))
                    .map_err(|tr| TypeError::unify(tr, span))?;
                Ok(TypedExpr::new(
                    TExprKind::Call(Box::new(callee), typed),
                    ret,
                    span,
                ))
            }
            Type::Dynamic => {
                let mut typed = Vec::with_capacity(args.len());
                for a in args {
                    typed.push(self.type_expr(a, true)?);
                }
                Ok(TypedExpr::new(
                    TExprKind::Call(Box::new(callee), typed),
                    Type::Dynamic,
                    span,
                ))
            }
            other => {
                if self.untyped {
                    let mut typed = Vec::with_capacity(args.len());
                    for a in args {
                        typed.push(self.type_expr(a, true)?);
                    }
                    return Ok(TypedExpr::new(
                        TExprKind::Call(Box::new(callee), typed),
                        Type::Dynamic,
                        span,
                    ));
                }
                Err(self.err_custom(format!("Cannot call {other}"), span))
            }
        }
    }

    fn type_super_call(&mut self, args: &[Expr], span: Span) -> TypeResult<TypedExpr> {
        if !self.in_constructor {
            return Err(self.err_custom(
                "Cannot call super constructor outside class constructor",
                span,
            ));
        }
        let Some(cur) = self.curclass.clone() else {
            return Err(self.err_custom("Cannot use super outside a class", span));
        };
        let sup = cur.borrow().super_class.clone();
        let Some((sc, spl)) = sup else {
            return Err(self.err_custom("Current class does not have a super class", span));
        };
        let Some((_, _, ctor_ty)) = constructor_of(&sc, &spl) else {
            return Err(self.err_custom(
                format!("Class {} does not have a constructor", sc.borrow().path),
                span,
            ));
        };
        let formals = match follow(&ctor_ty) {
            Type::Fun(formals, _) => formals,
            _ => Vec::new(),
        };
        let saved = std::mem::replace(&mut self.in_super_call, true);
        let typed = self.unify_call_params(Some("super"), args, &formals, span, false);
        self.in_super_call = saved;
        let typed = typed?;
        let callee = TypedExpr::new(
            TExprKind::Const(TConst::Super),
            Type::Inst(sc, spl),
            span,
        );
        Ok(TypedExpr::new(
            TExprKind::Call(Box::new(callee), typed),
            self.t.void.clone(),
            span,
        ))
    }

    // -- display ------------------------------------------------------------

    /// Editor completion: collect the reachable fields of the subject and
    /// surface them through the non-error `Display` signal.
    fn type_display_query(&mut self, inner: &Expr, _span: Span) -> TypeResult<TypedExpr> {
        let saved = self.in_display;
        self.in_display = true;
        let subject = self.type_expr(inner, true);
        self.in_display = saved;
        let subject = subject?;

        let mut fields: Vec<AnonField> = Vec::new();
        let mut push_unique = |fields: &mut Vec<AnonField>, f: AnonField| {
            if !fields.iter().any(|x| x.name == f.name) {
                fields.push(f);
            }
        };
        match follow(&subject.ty) {
            Type::Inst(c, pl) => collect_hierarchy_fields(&c, &pl, &mut fields),
            Type::Anon(a) => {
                for f in &a.borrow().fields {
                    push_unique(&mut fields, f.clone());
                }
            }
            _ => {}
        }

        // Extension methods whose first parameter accepts the subject.
        for class in self.local_using.clone() {
            let statics = class.borrow().statics.clone();
            for f in statics {
                let ft = f.field_type();
                let Type::Fun(args, ret) = follow(&ft) else {
                    continue;
                };
                let Some((first, rest)) = args.split_first() else {
                    continue;
                };
                let recv_dyn = matches!(follow(&subject.ty), Type::Dynamic);
                let param_dyn = matches!(follow(&first.ty), Type::Dynamic);
                if recv_dyn != param_dyn || !unify_check(&subject.ty, &first.ty) {
                    continue;
                }
                push_unique(
                    &mut fields,
                    AnonField {
                        name: f.name.clone(),
                        ty: Type::Fun(rest.to_vec(), ret),
                    },
                );
            }
        }

        Err(Interrupt::Display(Type::Anon(AnonType::new(
            fields,
            AnonStatus::Closed,
        ))))
    }
}

fn check_cast_params(typer: &Typer, pl: &[Type], span: Span) -> TypeResult<()> {
    if pl.iter().any(|p| !matches!(follow(p), Type::Dynamic)) {
        return Err(typer.err_custom("Cast type parameters must be Dynamic", span));
    }
    Ok(())
}

/// The constructor of `c` with `params` applied, walking the extern super
/// chain when the class itself has none.
pub(crate) fn constructor_of(
    c: &ClassRef,
    params: &[Type],
) -> Option<(ClassRef, Rc<ClassField>, Type)> {
    let def = c.borrow();
    if let Some(ctor) = &def.constructor {
        let ty = apply_params(&def.params, params, &ctor.field_type());
        return Some((c.clone(), ctor.clone(), ty));
    }
    if def.is_extern
        && let Some((sup, spl)) = &def.super_class
    {
        let spl: Vec<Type> = spl
            .iter()
            .map(|t| apply_params(&def.params, params, t))
            .collect();
        return constructor_of(sup, &spl);
    }
    None
}

fn collect_hierarchy_fields(c: &ClassRef, params: &[Type], out: &mut Vec<AnonField>) {
    let def = c.borrow();
    for f in &def.fields {
        if out.iter().any(|x| x.name == f.name) {
            continue;
        }
        out.push(AnonField {
            name: f.name.clone(),
            ty: apply_params(&def.params, params, &f.field_type()),
        });
    }
    if let Some((sup, spl)) = &def.super_class {
        let spl: Vec<Type> = spl
            .iter()
            .map(|t| apply_params(&def.params, params, t))
            .collect();
        collect_hierarchy_fields(sup, &spl, out);
    }
}
