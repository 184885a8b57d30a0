// src/sema/typer/access.rs
//! Access-kind resolution: identifiers, field paths and subscripts each
//! resolve to an `Access` describing how the place may be read, written or
//! called.

use crate::errors::TypeError;
use crate::frontend::{Constant, Expr, ExprKind, Span};
use crate::sema::context::{Typer, decl_type};
use crate::sema::typer::is_capitalized;
use crate::sema::types::{
    AnonField, AnonStatus, AnonType, ClassField, ClassRef, TConst, TExprKind, Type, TypeDecl,
    TypedExpr, apply_params, class_field, enum_ctor_type,
};
use crate::sema::unify::{follow, unify};
use crate::sema::{Interrupt, TypeResult};

use std::rc::Rc;

/// Whether a place is being read, assigned, or invoked. `Call` additionally
/// authorizes macro dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Get,
    Set,
    Call,
}

/// The resolved form of a place expression.
#[derive(Debug)]
pub enum Access {
    /// Not readable/writable; carries the offending name.
    Invalid(String),
    /// A plain typed expression.
    Value(TypedExpr),
    /// Write through a property setter; combined with the right-hand side
    /// when the assignment is built.
    Setter {
        recv: TypedExpr,
        setter: String,
        prop_ty: Type,
        field: String,
    },
    /// An inline method/variable, expanded at call or read time.
    Inline {
        recv: TypedExpr,
        field: Rc<ClassField>,
        ty: Type,
    },
    /// A macro call site; neither readable nor assignable.
    MacroCall {
        class: ClassRef,
        field: Rc<ClassField>,
    },
    /// A using-extension static with the first argument pre-bound.
    Extension { call: TypedExpr, this_arg: TypedExpr },
}

impl Typer {
    /// Resolve a place expression under the given access mode.
    pub fn type_access(&mut self, e: &Expr, mode: AccessMode) -> TypeResult<Access> {
        match &e.kind {
            ExprKind::Const(Constant::Ident(name)) => self.type_ident(name, mode, e.span),
            ExprKind::Field(obj, name) => self.type_field_path(e, obj, name, mode),
            ExprKind::Array(e1, e2) => self.type_subscript(e1, e2, e.span),
            _ => Ok(Access::Value(self.type_expr(e, true)?)),
        }
    }

    /// Identifier lookup. Keywords fold to constants; everything else walks
    /// the fixed precedence chain: locals, members, using statics, class
    /// statics, imported enum constructors, type names.
    pub(crate) fn type_ident(
        &mut self,
        name: &str,
        mode: AccessMode,
        span: Span,
    ) -> TypeResult<Access> {
        match name {
            "true" | "false" => {
                return if mode == AccessMode::Set {
                    Ok(Access::Invalid(name.to_string()))
                } else {
                    Ok(Access::Value(TypedExpr::new(
                        TExprKind::Const(TConst::Bool(name == "true")),
                        self.t.bool_.clone(),
                        span,
                    )))
                };
            }
            "this" => {
                if self.in_static && !self.untyped {
                    return Err(self.err_custom("Cannot access this from a static function", span));
                }
                return if mode == AccessMode::Set {
                    Ok(Access::Invalid("this".to_string()))
                } else {
                    Ok(Access::Value(self.this_expr(span)))
                };
            }
            "super" => {
                let Some(cur) = self.curclass.clone() else {
                    return Err(self.err_custom("Cannot use super outside a class", span));
                };
                let sup = cur.borrow().super_class.clone();
                let Some((sc, spl)) = sup else {
                    return Err(self.err_custom("Current class does not have a super class", span));
                };
                if self.in_static {
                    return Err(self.err_custom("Cannot access super from a static function", span));
                }
                if mode == AccessMode::Set {
                    return Ok(Access::Invalid("super".to_string()));
                }
                if !self.in_super_call {
                    return Err(self.err_custom("Cannot use super as a value", span));
                }
                return Ok(Access::Value(TypedExpr::new(
                    TExprKind::Const(TConst::Super),
                    Type::Inst(sc, spl),
                    span,
                )));
            }
            "null" => {
                return if mode == AccessMode::Set {
                    Ok(Access::Invalid("null".to_string()))
                } else {
                    // Polymorphic null: the monomorph may stay open.
                    Ok(Access::Value(TypedExpr::null(Type::mono(), span)))
                };
            }
            _ => {}
        }

        // 1. local variable
        if let Some(t) = self.local_type(name) {
            let actual = self
                .locals_map
                .get(name)
                .cloned()
                .unwrap_or_else(|| name.to_string());
            return Ok(Access::Value(TypedExpr::new(
                TExprKind::Local(actual),
                t,
                span,
            )));
        }

        // 2. member field of the enclosing class
        if !self.in_static
            && let Some(cur) = self.curclass.clone()
        {
            let pl: Vec<Type> = cur.borrow().params.iter().map(|p| p.ty.clone()).collect();
            if let Some((owner, f, ft)) = class_field(&cur, &pl, name) {
                let ethis = self.this_expr(span);
                return self.field_access(mode, &f, Some(owner), ft, ethis, span);
            }
        }

        // 3. using-extension static over `this`
        if !self.in_static && self.curclass.is_some() {
            let ethis = self.this_expr(span);
            if let Some(acc) = self.using_field(mode, &ethis, name) {
                return Ok(acc);
            }
        }

        // 4. static field of the enclosing class
        if let Some(cur) = self.curclass.clone() {
            let found = cur.borrow().find_static(name);
            if let Some(f) = found {
                let ft = f.field_type();
                let ecl = self.type_decl_expr(&TypeDecl::Class(cur.clone()), span);
                return self.field_access(mode, &f, Some(cur), ft, ecl, span);
            }
        }

        // 5. constructor of an imported enum
        for decl in self.local_types.clone() {
            if let TypeDecl::Enum(e) = decl {
                let ctor = e.borrow().find_ctor(name);
                if let Some(ctor) = ctor {
                    let params: Vec<Type> =
                        e.borrow().params.iter().map(|_| Type::mono()).collect();
                    let ty = enum_ctor_type(&e, &params, &ctor);
                    return Ok(Access::Value(TypedExpr::new(
                        TExprKind::EnumField(e.clone(), name.to_string()),
                        ty,
                        span,
                    )));
                }
            }
        }

        // 6. top-level type name
        if is_capitalized(name) {
            let decl = self
                .local_types
                .iter()
                .chain(self.t.std_types.iter())
                .find(|d| d.path().name == name)
                .cloned();
            if let Some(decl) = decl {
                return Ok(Access::Value(self.type_decl_expr(&decl, span)));
            }
            if let Some(m) = self.peek_module(name)
                && let Some(decl) = m.main_type()
            {
                return Ok(Access::Value(self.type_decl_expr(&decl, span)));
            }
        }

        // 7. untyped recovery, else unknown
        if self.untyped {
            let t = Type::mono();
            self.locals.insert(name.to_string(), t.clone());
            return Ok(Access::Value(TypedExpr::new(
                TExprKind::Local(name.to_string()),
                t,
                span,
            )));
        }
        Err(TypeError::unknown_ident(name, span).into())
    }

    /// A type reference as an expression: the statics carrier of the
    /// declaration.
    pub(crate) fn type_decl_expr(&mut self, decl: &TypeDecl, span: Span) -> TypedExpr {
        let ty = match decl {
            TypeDecl::Class(c) => {
                let fields = c
                    .borrow()
                    .statics
                    .iter()
                    .map(|f| AnonField {
                        name: f.name.clone(),
                        ty: f.field_type(),
                    })
                    .collect();
                Type::Anon(AnonType::new(fields, AnonStatus::Statics(c.clone())))
            }
            TypeDecl::Enum(e) => {
                let def = e.borrow();
                let params: Vec<Type> = def.params.iter().map(|p| p.ty.clone()).collect();
                let fields = def
                    .constructors
                    .iter()
                    .map(|ctor| AnonField {
                        name: ctor.name.clone(),
                        ty: enum_ctor_type(e, &params, ctor),
                    })
                    .collect();
                drop(def);
                Type::Anon(AnonType::new(fields, AnonStatus::EnumStatics(e.clone())))
            }
            TypeDecl::Alias(_) => {
                // A typedef reference carries the statics of what it names,
                // when that is a class.
                let target = decl_type(decl);
                match follow(&target) {
                    Type::Inst(c, _) => {
                        let fields = c
                            .borrow()
                            .statics
                            .iter()
                            .map(|f| AnonField {
                                name: f.name.clone(),
                                ty: f.field_type(),
                            })
                            .collect();
                        Type::Anon(AnonType::new(fields, AnonStatus::Statics(c)))
                    }
                    _ => Type::Anon(AnonType::new(Vec::new(), AnonStatus::Closed)),
                }
            }
        };
        TypedExpr::new(TExprKind::TypeRef(decl.clone()), ty, span)
    }

    /// `a.b.c` chains: try progressively shorter prefixes as module paths
    /// first, then fall back to expression-then-field.
    fn type_field_path(
        &mut self,
        full: &Expr,
        obj: &Expr,
        name: &str,
        mode: AccessMode,
    ) -> TypeResult<Access> {
        let segments = flatten_path(full);

        // A local binding shadows any module of the same head name.
        let head_is_local = segments
            .as_ref()
            .is_some_and(|segs| self.local_type(&segs[0].0).is_some());

        if let Some(segments) = &segments
            && !head_is_local
        {
            let n = segments.len();
            for k in (1..=n).rev() {
                let (module_segs, rest) = segments.split_at(k);
                // Module names are capitalized; skip prefixes that cannot be
                // module paths.
                if !is_capitalized(&module_segs[k - 1].0) {
                    continue;
                }
                // A bare capitalized head is handled by ident lookup below,
                // where imports take precedence over modules.
                if k == 1
                    && self
                        .local_types
                        .iter()
                        .chain(self.t.std_types.iter())
                        .any(|d| d.path().name == module_segs[0].0)
                {
                    break;
                }
                let candidate = module_segs
                    .iter()
                    .map(|(s, _)| s.as_str())
                    .collect::<Vec<_>>()
                    .join(".");
                let Some(m) = self.peek_module(&candidate) else {
                    continue;
                };
                let head_span = module_segs[k - 1].1;
                // `pack.Module.Sub` names a second type of the module.
                let (decl, rest) = if let Some((first, tail)) = rest.split_first()
                    && is_capitalized(&first.0)
                    && let Some(sub) = m.find(&first.0)
                {
                    (sub, tail)
                } else {
                    match m.main_type() {
                        Some(d) => (d, rest),
                        None => continue,
                    }
                };
                // In display mode a bare type path is answered directly, as
                // a non-error control transfer.
                if self.in_display && rest.is_empty() {
                    return Err(Interrupt::TypePath(
                        segments.iter().map(|(s, _)| s.clone()).collect(),
                    ));
                }
                let base = self.type_decl_expr(&decl, head_span);
                match self.fold_path_fields(Access::Value(base), rest, mode) {
                    Ok(acc) => return Ok(acc),
                    // A module prefix whose suffix is not a field chain is
                    // not a match; keep trying shorter prefixes.
                    Err(Interrupt::Error(_)) => continue,
                    Err(other) => return Err(other),
                }
            }
        }

        // Expression-then-field. `super.f` is a legal super use; flag it for
        // ident resolution.
        let is_super = matches!(&obj.kind, ExprKind::Const(Constant::Ident(s)) if s == "super");
        let saved_super = self.in_super_call;
        if is_super {
            self.in_super_call = true;
        }
        let obj_acc = self.type_access(obj, AccessMode::Get);
        self.in_super_call = saved_super;
        let obj_acc = match obj_acc {
            Ok(acc) => acc,
            Err(Interrupt::Error(err)) => {
                // A dotted all-identifier path whose head is unknown reads
                // as a module path that went nowhere: report the module,
                // located at the first capitalized segment.
                if let Some(segments) = &segments
                    && segments.len() > 1
                    && matches!(err.kind, crate::errors::TypeErrorKind::UnknownIdent { .. })
                    && err.span == segments[0].1
                    && let Some(cap) = segments.iter().position(|(s, _)| is_capitalized(s))
                {
                    let path = segments[..=cap]
                        .iter()
                        .map(|(s, _)| s.as_str())
                        .collect::<Vec<_>>()
                        .join(".");
                    return Err(TypeError::module_not_found(
                        &path,
                        &segments[cap].0,
                        segments[cap].1,
                    )
                    .into());
                }
                return Err(Interrupt::Error(err));
            }
            Err(other) => return Err(other),
        };
        let obj_e = self.acc_get(obj_acc, obj.span)?;
        self.field_on(obj_e, name, mode, full.span)
    }

    fn fold_path_fields(
        &mut self,
        mut acc: Access,
        rest: &[(String, Span)],
        mode: AccessMode,
    ) -> TypeResult<Access> {
        for (i, (seg, span)) in rest.iter().enumerate() {
            let last = i + 1 == rest.len();
            let seg_mode = if last { mode } else { AccessMode::Get };
            let e = self.acc_get(acc, *span)?;
            acc = self.field_on(e, seg, seg_mode, *span)?;
        }
        Ok(acc)
    }

    /// Field lookup on a typed receiver, dispatching on the receiver type.
    pub(crate) fn field_on(
        &mut self,
        e: TypedExpr,
        name: &str,
        mode: AccessMode,
        span: Span,
    ) -> TypeResult<Access> {
        match follow(&e.ty) {
            Type::Inst(c, pl) => {
                if let Some((owner, f, ft)) = class_field(&c, &pl, name) {
                    return self.field_access(mode, &f, Some(owner), ft, e, span);
                }
                if let Some(acc) = self.using_field(mode, &e, name) {
                    return Ok(acc);
                }
                if self.untyped {
                    return Ok(Access::Value(TypedExpr::new(
                        TExprKind::Field(Box::new(e), name.to_string()),
                        Type::mono(),
                        span,
                    )));
                }
                Err(self.err_custom(
                    format!("Class {} has no field {name}", c.borrow().path),
                    span,
                ))
            }
            Type::Anon(a) => {
                let status = a.borrow().status.clone();
                match status {
                    AnonStatus::Statics(c) => {
                        let found = c.borrow().find_static(name);
                        if let Some(f) = found {
                            let ft = f.field_type();
                            return self.field_access(mode, &f, Some(c.clone()), ft, e, span);
                        }
                        if self.untyped {
                            return Ok(Access::Value(TypedExpr::new(
                                TExprKind::StaticField(c.clone(), name.to_string()),
                                Type::mono(),
                                span,
                            )));
                        }
                        Err(self.err_custom(
                            format!("Class {} has no static field {name}", c.borrow().path),
                            span,
                        ))
                    }
                    AnonStatus::EnumStatics(en) => {
                        let ctor = en.borrow().find_ctor(name);
                        let Some(ctor) = ctor else {
                            return Err(self.err_custom(
                                format!(
                                    "Enum {} does not have a constructor {name}",
                                    en.borrow().path
                                ),
                                span,
                            ));
                        };
                        let params: Vec<Type> =
                            en.borrow().params.iter().map(|_| Type::mono()).collect();
                        let ty = enum_ctor_type(&en, &params, &ctor);
                        Ok(Access::Value(TypedExpr::new(
                            TExprKind::EnumField(en.clone(), name.to_string()),
                            ty,
                            span,
                        )))
                    }
                    _ => {
                        if let Some(f) = a.borrow().find(name) {
                            return Ok(Access::Value(TypedExpr::new(
                                TExprKind::Field(Box::new(e), name.to_string()),
                                f.ty,
                                span,
                            )));
                        }
                        // Open structures learn fields on demand.
                        if matches!(status, AnonStatus::Open) {
                            let ft = Type::mono();
                            a.borrow_mut().fields.push(AnonField {
                                name: name.to_string(),
                                ty: ft.clone(),
                            });
                            return Ok(Access::Value(TypedExpr::new(
                                TExprKind::Field(Box::new(e), name.to_string()),
                                ft,
                                span,
                            )));
                        }
                        if let Some(acc) = self.using_field(mode, &e, name) {
                            return Ok(acc);
                        }
                        Err(self.err_custom(format!("{} has no field {name}", e.ty), span))
                    }
                }
            }
            Type::Mono(_) => {
                // Constrain the unknown receiver through an open structure.
                let ft = Type::mono();
                let anon = AnonType::new(
                    vec![AnonField {
                        name: name.to_string(),
                        ty: ft.clone(),
                    }],
                    AnonStatus::Open,
                );
                self.opened.push(anon.clone());
                unify(&e.ty, &Type::Anon(anon))
                    .map_err(|tr| TypeError::unify(tr, span))?;
                Ok(Access::Value(TypedExpr::new(
                    TExprKind::Field(Box::new(e), name.to_string()),
                    ft,
                    span,
                )))
            }
            Type::Dynamic => Ok(Access::Value(TypedExpr::new(
                TExprKind::Field(Box::new(e), name.to_string()),
                Type::Dynamic,
                span,
            ))),
            _ => {
                if let Some(acc) = self.using_field(mode, &e, name) {
                    return Ok(acc);
                }
                if self.untyped {
                    return Ok(Access::Value(TypedExpr::new(
                        TExprKind::Field(Box::new(e), name.to_string()),
                        Type::mono(),
                        span,
                    )));
                }
                Err(self.err_custom(format!("{} has no field {name}", e.ty), span))
            }
        }
    }

    /// Subscript access. The element type comes from array-access metadata
    /// up the class hierarchy, falling back to unifying the receiver with
    /// the array type.
    fn type_subscript(&mut self, e1: &Expr, e2: &Expr, span: Span) -> TypeResult<Access> {
        let e1 = self.type_expr(e1, true)?;
        let e2 = self.type_expr(e2, true)?;
        unify(&e2.ty, &self.t.int).map_err(|tr| TypeError::unify(tr, e2.span))?;

        fn metadata_elem(t: &Type) -> Option<Type> {
            match follow(t) {
                Type::Inst(c, pl) => {
                    let def = c.borrow();
                    if let Some(aa) = &def.array_access {
                        return Some(apply_params(&def.params, &pl, aa));
                    }
                    let (sup, spl) = def.super_class.clone()?;
                    let spl: Vec<Type> = spl
                        .iter()
                        .map(|t| apply_params(&def.params, &pl, t))
                        .collect();
                    drop(def);
                    metadata_elem(&Type::Inst(sup, spl))
                }
                _ => None,
            }
        }

        let elem = match metadata_elem(&e1.ty) {
            Some(t) => t,
            None => {
                let pt = Type::mono();
                unify(&e1.ty, &self.t.tarray(pt.clone()))
                    .map_err(|tr| TypeError::unify(tr, e1.span))?;
                pt
            }
        };
        Ok(Access::Value(TypedExpr::new(
            TExprKind::Array(Box::new(e1), Box::new(e2)),
            elem,
            span,
        )))
    }
}

/// Collapse a field chain of plain identifiers into its dotted segments.
fn flatten_path(e: &Expr) -> Option<Vec<(String, Span)>> {
    match &e.kind {
        ExprKind::Const(Constant::Ident(name)) => Some(vec![(name.clone(), e.span)]),
        ExprKind::Field(obj, name) => {
            let mut segs = flatten_path(obj)?;
            segs.push((name.clone(), e.span));
            Some(segs)
        }
        _ => None,
    }
}
