// src/sema/unify.rs
//! Unification over the shared-cell type representation.
//!
//! Every public entry point is transactional: monomorph bindings and fields
//! added to open anonymous types are recorded in an undo log and rolled back
//! before an error is returned. Callers can therefore retry with a different
//! pair without any snapshot discipline of their own.

use std::rc::Rc;

use crate::errors::UnifyTrace;
use crate::sema::types::{AnonRef, AnonStatus, ClassKind, Monomorph, Type, apply_params};

/// Resolve bound monomorphs and typedef applications to the underlying head.
pub fn follow(t: &Type) -> Type {
    match t {
        Type::Mono(m) => match m.get() {
            Some(inner) => follow(&inner),
            None => t.clone(),
        },
        Type::Alias(a, pl) => {
            let def = a.borrow();
            let target = apply_params(&def.params, pl, &def.target);
            drop(def);
            follow(&target)
        }
        _ => t.clone(),
    }
}

/// Occurs check: `m` appears somewhere inside `t`.
fn occurs(m: &Monomorph, t: &Type) -> bool {
    match t {
        Type::Mono(other) => match other.get() {
            Some(inner) => occurs(m, &inner),
            None => m.ptr_eq(other),
        },
        Type::Inst(_, pl) | Type::Enum(_, pl) | Type::Alias(_, pl) => {
            pl.iter().any(|p| occurs(m, p))
        }
        Type::Fun(args, ret) => args.iter().any(|a| occurs(m, &a.ty)) || occurs(m, ret),
        Type::Anon(a) => a.borrow().fields.iter().any(|f| occurs(m, &f.ty)),
        Type::Dynamic => false,
    }
}

enum UndoOp {
    Mono(Monomorph),
    /// Field at `usize` was appended to this anon during unification.
    AnonField(AnonRef, usize),
}

struct Undo {
    log: Vec<UndoOp>,
}

impl Undo {
    fn new() -> Self {
        Self { log: Vec::new() }
    }

    fn bind(&mut self, m: &Monomorph, t: Type) {
        m.bind(t);
        self.log.push(UndoOp::Mono(m.clone()));
    }

    fn rollback(self) {
        for op in self.log.into_iter().rev() {
            match op {
                UndoOp::Mono(m) => m.reset(),
                UndoOp::AnonField(a, idx) => {
                    a.borrow_mut().fields.truncate(idx);
                }
            }
        }
    }
}

fn mismatch(a: &Type, b: &Type) -> UnifyTrace {
    UnifyTrace::single(a.to_string(), b.to_string())
}

/// Unify `a` into `b` ("a should be b"). Commits bindings on success, rolls
/// everything back on failure.
pub fn unify(a: &Type, b: &Type) -> Result<(), UnifyTrace> {
    let mut undo = Undo::new();
    match unify_rec(a, b, &mut undo) {
        Ok(()) => Ok(()),
        Err(trace) => {
            undo.rollback();
            Err(trace)
        }
    }
}

/// Speculative compatibility probe: runs a full unification and rolls back
/// regardless of the outcome, so no bindings escape.
pub fn unify_check(a: &Type, b: &Type) -> bool {
    let mut undo = Undo::new();
    let ok = unify_rec(a, b, &mut undo).is_ok();
    undo.rollback();
    ok
}

/// Strict type equality, binding monomorphs where needed. Transactional like
/// `unify`.
pub fn type_eq(a: &Type, b: &Type) -> Result<(), UnifyTrace> {
    let mut undo = Undo::new();
    match eq_rec(a, b, &mut undo) {
        Ok(()) => Ok(()),
        Err(trace) => {
            undo.rollback();
            Err(trace)
        }
    }
}

fn unify_rec(a: &Type, b: &Type, undo: &mut Undo) -> Result<(), UnifyTrace> {
    let fa = follow(a);
    let fb = follow(b);
    match (&fa, &fb) {
        (Type::Mono(m), _) => {
            if let Type::Mono(other) = &fb
                && m.ptr_eq(other)
            {
                return Ok(());
            }
            if occurs(m, &fb) {
                return Err(mismatch(&fa, &fb));
            }
            undo.bind(m, fb.clone());
            Ok(())
        }
        (_, Type::Mono(m)) => {
            if occurs(m, &fa) {
                return Err(mismatch(&fa, &fb));
            }
            undo.bind(m, fa.clone());
            Ok(())
        }
        (Type::Dynamic, _) | (_, Type::Dynamic) => Ok(()),
        (Type::Inst(c1, p1), Type::Inst(c2, p2)) => {
            if Rc::ptr_eq(c1, c2) {
                return unify_params(p1, p2, &fa, &fb, undo);
            }
            let (sup_t, impl_ts, constraints) = {
                let def = c1.borrow();
                let apply = |t: &Type| apply_params(&def.params, p1, t);
                let sup_t = def
                    .super_class
                    .as_ref()
                    .map(|(s, spl)| Type::Inst(s.clone(), spl.iter().map(apply).collect()));
                let impl_ts: Vec<Type> = def
                    .implements
                    .iter()
                    .map(|(i, ipl)| Type::Inst(i.clone(), ipl.iter().map(apply).collect()))
                    .collect();
                let constraints = match &def.kind {
                    ClassKind::TypeParam(cs) => cs.clone(),
                    ClassKind::Normal => Vec::new(),
                };
                (sup_t, impl_ts, constraints)
            };
            if c2.borrow().is_interface {
                for i_t in &impl_ts {
                    if try_branch(i_t, &fb, undo) {
                        return Ok(());
                    }
                }
            }
            if let Some(sup_t) = sup_t
                && try_branch(&sup_t, &fb, undo)
            {
                return Ok(());
            }
            // A constrained type parameter unifies through its constraints.
            for ct in &constraints {
                if try_branch(ct, &fb, undo) {
                    return Ok(());
                }
            }
            Err(mismatch(&fa, &fb))
        }
        (Type::Enum(e1, p1), Type::Enum(e2, p2)) => {
            if Rc::ptr_eq(e1, e2) {
                unify_params(p1, p2, &fa, &fb, undo)
            } else {
                Err(mismatch(&fa, &fb))
            }
        }
        (Type::Fun(args1, ret1), Type::Fun(args2, ret2)) => {
            if args1.len() != args2.len() {
                return Err(mismatch(&fa, &fb));
            }
            for (a1, a2) in args1.iter().zip(args2.iter()) {
                // The target expects an optional argument the source cannot
                // skip.
                if a2.opt && !a1.opt {
                    return Err(mismatch(&fa, &fb));
                }
                // Arguments are contravariant.
                unify_rec(&a2.ty, &a1.ty, undo)
                    .map_err(|tr| tr.push_outer(fa.to_string(), fb.to_string()))?;
            }
            unify_rec(ret1, ret2, undo)
                .map_err(|tr| tr.push_outer(fa.to_string(), fb.to_string()))
        }
        (Type::Anon(a1), Type::Anon(a2)) => {
            if Rc::ptr_eq(a1, a2) {
                return Ok(());
            }
            let required = a2.borrow().fields.clone();
            for rf in required {
                let have = a1.borrow().find(&rf.name);
                match have {
                    Some(f) => {
                        eq_rec(&f.ty, &rf.ty, undo)
                            .map_err(|tr| tr.push_outer(fa.to_string(), fb.to_string()))?;
                    }
                    None => {
                        let is_open = matches!(a1.borrow().status, AnonStatus::Open);
                        if is_open {
                            let idx = a1.borrow().fields.len();
                            a1.borrow_mut().fields.push(rf.clone());
                            undo.log.push(UndoOp::AnonField(a1.clone(), idx));
                        } else {
                            return Err(UnifyTrace::single(
                                fa.to_string(),
                                format!("{fb} (missing field {})", rf.name),
                            ));
                        }
                    }
                }
            }
            Ok(())
        }
        (Type::Inst(c, pl), Type::Anon(a2)) => {
            // Structural view of a class instance.
            let required = a2.borrow().fields.clone();
            for rf in required {
                match crate::sema::types::class_field(c, pl, &rf.name) {
                    Some((_, _, ft)) => {
                        unify_rec(&ft, &rf.ty, undo)
                            .map_err(|tr| tr.push_outer(fa.to_string(), fb.to_string()))?;
                    }
                    None => {
                        return Err(UnifyTrace::single(
                            fa.to_string(),
                            format!("{fb} (missing field {})", rf.name),
                        ));
                    }
                }
            }
            Ok(())
        }
        _ => Err(mismatch(&fa, &fb)),
    }
}

/// Attempt a unification branch in its own transaction; merge the bindings
/// into `undo` on success, roll them back on failure.
fn try_branch(a: &Type, b: &Type, undo: &mut Undo) -> bool {
    let mut sub = Undo::new();
    match unify_rec(a, b, &mut sub) {
        Ok(()) => {
            undo.log.append(&mut sub.log);
            true
        }
        Err(_) => {
            sub.rollback();
            false
        }
    }
}

fn unify_params(
    p1: &[Type],
    p2: &[Type],
    outer_a: &Type,
    outer_b: &Type,
    undo: &mut Undo,
) -> Result<(), UnifyTrace> {
    if p1.len() != p2.len() {
        return Err(mismatch(outer_a, outer_b));
    }
    for (x, y) in p1.iter().zip(p2.iter()) {
        // Type parameters are invariant.
        eq_rec(x, y, undo).map_err(|tr| tr.push_outer(outer_a.to_string(), outer_b.to_string()))?;
    }
    Ok(())
}

fn eq_rec(a: &Type, b: &Type, undo: &mut Undo) -> Result<(), UnifyTrace> {
    let fa = follow(a);
    let fb = follow(b);
    match (&fa, &fb) {
        (Type::Mono(m), _) => {
            if let Type::Mono(other) = &fb
                && m.ptr_eq(other)
            {
                return Ok(());
            }
            if occurs(m, &fb) {
                return Err(mismatch(&fa, &fb));
            }
            undo.bind(m, fb.clone());
            Ok(())
        }
        (_, Type::Mono(m)) => {
            if occurs(m, &fa) {
                return Err(mismatch(&fa, &fb));
            }
            undo.bind(m, fa.clone());
            Ok(())
        }
        (Type::Dynamic, Type::Dynamic) => Ok(()),
        (Type::Inst(c1, p1), Type::Inst(c2, p2)) if Rc::ptr_eq(c1, c2) => {
            unify_params(p1, p2, &fa, &fb, undo)
        }
        (Type::Enum(e1, p1), Type::Enum(e2, p2)) if Rc::ptr_eq(e1, e2) => {
            unify_params(p1, p2, &fa, &fb, undo)
        }
        (Type::Fun(args1, ret1), Type::Fun(args2, ret2)) => {
            if args1.len() != args2.len() {
                return Err(mismatch(&fa, &fb));
            }
            for (a1, a2) in args1.iter().zip(args2.iter()) {
                eq_rec(&a1.ty, &a2.ty, undo)
                    .map_err(|tr| tr.push_outer(fa.to_string(), fb.to_string()))?;
            }
            eq_rec(ret1, ret2, undo).map_err(|tr| tr.push_outer(fa.to_string(), fb.to_string()))
        }
        (Type::Anon(a1), Type::Anon(a2)) => {
            if Rc::ptr_eq(a1, a2) {
                return Ok(());
            }
            let f1 = a1.borrow().fields.clone();
            let f2 = a2.borrow().fields.clone();
            if f1.len() != f2.len() {
                return Err(mismatch(&fa, &fb));
            }
            for rf in f2 {
                match a1.borrow().find(&rf.name) {
                    Some(f) => eq_rec(&f.ty, &rf.ty, undo)
                        .map_err(|tr| tr.push_outer(fa.to_string(), fb.to_string()))?,
                    None => return Err(mismatch(&fa, &fb)),
                }
            }
            Ok(())
        }
        _ => Err(mismatch(&fa, &fb)),
    }
}

/// The function type expected of an iterator over `elem`.
pub fn iterator_shape(elem: Type, tbool: Type) -> Type {
    use crate::sema::types::{AnonField, AnonType};
    Type::Anon(AnonType::new(
        vec![
            AnonField {
                name: "hasNext".to_string(),
                ty: Type::fun(Vec::new(), tbool),
            },
            AnonField {
                name: "next".to_string(),
                ty: Type::fun(Vec::new(), elem),
            },
        ],
        AnonStatus::Closed,
    ))
}
