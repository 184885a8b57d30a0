// src/sema/typer/match_expr.rs
//! Switch elaboration. The first case decides the mode: constructor
//! patterns over an enum subject build a match over constructor indices,
//! anything else is a value switch.

use rustc_hash::FxHashSet;

use crate::errors::TypeError;
use crate::frontend::{Constant, Expr, ExprKind, Span, SwitchCase};
use crate::sema::context::Typer;
use crate::sema::types::{
    EnumRef, TConst, TExprKind, TMatchCase, Type, TypedExpr, apply_params,
};
use crate::sema::unify::{follow, unify};
use crate::sema::TypeResult;

/// `Ctor` or `Ctor(args)` as written in a case position.
fn pattern_ctor<'e>(pat: &'e Expr) -> Option<(&'e str, Option<&'e [Expr]>)> {
    match &pat.kind {
        ExprKind::Const(Constant::Ident(name)) => Some((name.as_str(), None)),
        ExprKind::Call(callee, args) => match &callee.kind {
            ExprKind::Const(Constant::Ident(name)) => {
                Some((name.as_str(), Some(args.as_slice())))
            }
            _ => None,
        },
        _ => None,
    }
}

impl Typer {
    pub(crate) fn type_switch(
        &mut self,
        subject: &Expr,
        cases: &[SwitchCase],
        default: Option<&[Expr]>,
        need_val: bool,
        span: Span,
    ) -> TypeResult<TypedExpr> {
        let subj = self.type_expr(subject, true)?;

        if let Type::Enum(e, pl) = follow(&subj.ty) {
            let first_is_pattern = cases
                .first()
                .and_then(|c| c.values.first())
                .and_then(pattern_ctor)
                .is_some_and(|(name, _)| e.borrow().find_ctor(name).is_some());
            if first_is_pattern {
                return self.type_enum_match(subj, e, pl, cases, default, need_val, span);
            }
        }
        self.type_value_switch(subj, cases, default, need_val, span)
    }

    #[allow(clippy::too_many_arguments)]
    fn type_enum_match(
        &mut self,
        subj: TypedExpr,
        e: EnumRef,
        pl: Vec<Type>,
        cases: &[SwitchCase],
        default: Option<&[Expr]>,
        need_val: bool,
        span: Span,
    ) -> TypeResult<TypedExpr> {
        let enum_path = e.borrow().path.clone();
        let mut matched: FxHashSet<usize> = FxHashSet::default();
        let mut cases_out: Vec<TMatchCase> = Vec::with_capacity(cases.len());
        let mut result: Option<(Type, bool)> = None;

        for case in cases {
            let (tcase, folded) = self.in_scope(|t| {
                let mut indices = Vec::with_capacity(case.values.len());
                let mut bindings: Option<Vec<Option<(String, Type)>>> = None;

                for pat in &case.values {
                    let Some((name, args)) = pattern_ctor(pat) else {
                        return Err(t.err_custom(
                            "Invalid pattern : enum constructor expected",
                            pat.span,
                        ));
                    };
                    let ctor = e.borrow().find_ctor(name);
                    let Some(ctor) = ctor else {
                        return Err(t.err_custom(
                            format!("This constructor is not part of the enum {enum_path}"),
                            pat.span,
                        ));
                    };
                    if !matched.insert(ctor.index) {
                        return Err(
                            t.err_custom("This constructor has already been used", pat.span)
                        );
                    }
                    indices.push(ctor.index);

                    let formal_args: Vec<_> = {
                        let def = e.borrow();
                        ctor.args
                            .iter()
                            .map(|a| (a.name.clone(), apply_params(&def.params, &pl, &a.ty)))
                            .collect()
                    };
                    match args {
                        None => {
                            if !formal_args.is_empty() {
                                return Err(t.err_custom(
                                    format!(
                                        "This constructor needs {} arguments",
                                        formal_args.len()
                                    ),
                                    pat.span,
                                ));
                            }
                            if bindings.as_ref().is_some_and(|b| !b.is_empty()) {
                                return Err(t.err_custom(
                                    "This pattern does not declare the variables of the other patterns",
                                    pat.span,
                                ));
                            }
                        }
                        Some(pats) => {
                            if pats.len() != formal_args.len() {
                                return Err(t.err_custom(
                                    "Invalid number of constructor arguments",
                                    pat.span,
                                ));
                            }
                            let mut these = Vec::with_capacity(pats.len());
                            for (p, (_, fty)) in pats.iter().zip(formal_args.iter()) {
                                match &p.kind {
                                    ExprKind::Const(Constant::Ident(n)) if n == "_" => {
                                        these.push(None);
                                    }
                                    ExprKind::Const(Constant::Ident(n)) => {
                                        these.push(Some((n.clone(), fty.clone())));
                                    }
                                    _ => {
                                        return Err(t.err_custom(
                                            "Invalid pattern : variable or wildcard expected",
                                            p.span,
                                        ));
                                    }
                                }
                            }
                            match &bindings {
                                None => bindings = Some(these),
                                Some(prev) => {
                                    // Alternatives must bind the same names
                                    // at the same types.
                                    if prev.len() != these.len() {
                                        return Err(t.err_custom(
                                            "This pattern does not declare the variables of the other patterns",
                                            pat.span,
                                        ));
                                    }
                                    for (a, b) in prev.iter().zip(these.iter()) {
                                        match (a, b) {
                                            (None, None) => {}
                                            (Some((n1, t1)), Some((n2, t2))) if n1 == n2 => {
                                                unify(t2, t1).map_err(|tr| {
                                                    TypeError::unify(tr, pat.span)
                                                })?;
                                            }
                                            _ => {
                                                return Err(t.err_custom(
                                                    "This pattern does not declare the variables of the other patterns",
                                                    pat.span,
                                                ));
                                            }
                                        }
                                    }
                                }
                            }
                        }
                    }
                }

                // Bindings become locals of the arm; renamed names flow back
                // into the case so body references and emitted slots agree.
                if let Some(bs) = &mut bindings {
                    for b in bs.iter_mut().flatten() {
                        let actual = t.add_local(&b.0, b.1.clone());
                        b.0 = actual;
                    }
                }

                let body = t.type_block(&case.body, need_val, span)?;
                let folded = if need_val {
                    Some(match result.clone() {
                        None => (body.ty.clone(), body.is_null_const()),
                        Some(prev) => t.value_lub(prev, &body, body.span)?,
                    })
                } else {
                    None
                };
                Ok((
                    TMatchCase {
                        indices,
                        bindings,
                        body,
                    },
                    folded,
                ))
            })?;
            if let Some(folded) = folded {
                result = Some(folded);
            }
            cases_out.push(tcase);
        }

        let default_out = match default {
            Some(el) => {
                let body = self.in_scope(|t| t.type_block(el, need_val, span))?;
                if need_val {
                    result = Some(match result {
                        None => (body.ty.clone(), body.is_null_const()),
                        Some(prev) => self.value_lub(prev, &body, body.span)?,
                    });
                }
                Some(Box::new(body))
            }
            None => {
                let ctor_count = e.borrow().constructors.len();
                if matched.len() < ctor_count {
                    let missing: Vec<String> = e
                        .borrow()
                        .constructors
                        .iter()
                        .filter(|c| !matched.contains(&c.index))
                        .map(|c| c.name.clone())
                        .collect();
                    return Err(self.err_custom(
                        format!(
                            "Some constructors are not matched: {}",
                            missing.join(", ")
                        ),
                        span,
                    ));
                }
                None
            }
        };

        let ty = match result {
            Some((t, _)) if need_val => t,
            _ => self.t.void.clone(),
        };
        Ok(TypedExpr::new(
            TExprKind::Match(Box::new(subj), e, cases_out, default_out),
            ty,
            span,
        ))
    }

    fn type_value_switch(
        &mut self,
        subj: TypedExpr,
        cases: &[SwitchCase],
        default: Option<&[Expr]>,
        need_val: bool,
        span: Span,
    ) -> TypeResult<TypedExpr> {
        let mut seen: Vec<TConst> = Vec::new();
        let mut cases_out = Vec::with_capacity(cases.len());
        let mut result: Option<(Type, bool)> = None;

        for case in cases {
            let mut values = Vec::with_capacity(case.values.len());
            for pat in &case.values {
                let v = self.type_expr(pat, true)?;
                if is_ctor_pattern(&v) {
                    return Err(self.err_custom(
                        "Cannot match an enum constructor in a value switch",
                        pat.span,
                    ));
                }
                unify(&v.ty, &subj.ty).map_err(|tr| TypeError::unify(tr, pat.span))?;
                if let TExprKind::Const(c) = &v.kind {
                    if seen.iter().any(|s| const_eq(s, c)) {
                        return Err(self.err_custom("Duplicate case value", pat.span));
                    }
                    seen.push(c.clone());
                }
                values.push(v);
            }
            let body = self.in_scope(|t| t.type_block(&case.body, need_val, span))?;
            if need_val {
                result = Some(match result {
                    None => (body.ty.clone(), body.is_null_const()),
                    Some(prev) => self.value_lub(prev, &body, body.span)?,
                });
            }
            cases_out.push((values, body));
        }

        let default_out = match default {
            Some(el) => {
                let body = self.in_scope(|t| t.type_block(el, need_val, span))?;
                if need_val {
                    result = Some(match result {
                        None => (body.ty.clone(), body.is_null_const()),
                        Some(prev) => self.value_lub(prev, &body, body.span)?,
                    });
                }
                Some(Box::new(body))
            }
            None => None,
        };

        let ty = match result {
            Some((t, _)) if need_val => t,
            _ => self.t.void.clone(),
        };
        Ok(TypedExpr::new(
            TExprKind::Switch(Box::new(subj), cases_out, default_out),
            ty,
            span,
        ))
    }
}

fn is_ctor_pattern(e: &TypedExpr) -> bool {
    match &e.kind {
        TExprKind::EnumField(..) => true,
        TExprKind::Call(callee, _) => matches!(callee.kind, TExprKind::EnumField(..)),
        _ => false,
    }
}

fn const_eq(a: &TConst, b: &TConst) -> bool {
    match (a, b) {
        (TConst::Int(x), TConst::Int(y)) => x == y,
        (TConst::Float(x), TConst::Float(y)) => x == y,
        (TConst::Str(x), TConst::Str(y)) => x == y,
        (TConst::Bool(x), TConst::Bool(y)) => x == y,
        (TConst::Null, TConst::Null) => true,
        _ => false,
    }
}
