// src/sema/kind.rs
//! Numeric kind lattice used by operator typing.
//!
//! Classification describes representation intent, not the exact type: a
//! type parameter constrained by a numeric class is its own kind so that
//! `T + T` can stay `T` for non-division operators.

use crate::errors::UnifyTrace;
use crate::sema::types::{ClassKind, TExprKind, Type, TypedExpr};
use crate::sema::unify::{follow, unify};

#[derive(Debug, Clone)]
pub enum NumKind {
    Int,
    Float,
    Str,
    /// Unbound monomorph.
    Unknown,
    Dynamic,
    Other,
    /// Type parameter constrained by a numeric class.
    Param(Type),
}

fn is_core(t: &Type, name: &str) -> bool {
    match follow(t) {
        Type::Inst(c, _) => {
            let def = c.borrow();
            def.path.pack.is_empty() && def.path.name == name
        }
        _ => false,
    }
}

/// Classify a type for operator selection. Follows monomorphs and aliases;
/// performs no unification.
pub fn classify(t: &Type) -> NumKind {
    match follow(t) {
        Type::Inst(c, _) => {
            let def = c.borrow();
            if def.path.pack.is_empty() {
                match def.path.name.as_str() {
                    "Int" => return NumKind::Int,
                    "Float" => return NumKind::Float,
                    "String" => return NumKind::Str,
                    _ => {}
                }
            }
            if let ClassKind::TypeParam(constraints) = &def.kind
                && constraints
                    .iter()
                    .any(|ct| is_core(ct, "Int") || is_core(ct, "Float"))
            {
                return NumKind::Param(follow(t));
            }
            NumKind::Other
        }
        Type::Mono(_) => NumKind::Unknown,
        Type::Dynamic => NumKind::Dynamic,
        _ => NumKind::Other,
    }
}

/// Try to pin an unknown operand to Int. Values that look like they came out
/// of dynamic code (a dynamic local, a subscript or field or call whose
/// container is dynamic) are pinned to Float instead, so nothing silently
/// truncates; returns whether Int won.
pub fn coerce_int(
    e: &TypedExpr,
    tint: &Type,
    tfloat: &Type,
) -> Result<bool, UnifyTrace> {
    let is_dynamic = |t: &Type| matches!(follow(t), Type::Dynamic);
    let container_elem_dynamic = |t: &Type| match follow(t) {
        Type::Inst(_, pl) => pl.len() == 1 && is_dynamic(&pl[0]),
        _ => false,
    };
    let field_dynamic = |t: &Type, name: &str| match follow(t) {
        Type::Anon(a) => a.borrow().find(name).map(|f| is_dynamic(&f.ty)).unwrap_or(false),
        Type::Inst(c, pl) => crate::sema::types::class_field(&c, &pl, name)
            .map(|(_, _, ft)| is_dynamic(&ft))
            // Unknown container field: assume the worst.
            .unwrap_or(true),
        Type::Dynamic => true,
        _ => true,
    };
    let return_dynamic = |t: &Type| match follow(t) {
        Type::Fun(_, ret) => is_dynamic(&ret),
        _ => true,
    };

    let maybe_dynamic = match &e.kind {
        TExprKind::Local(_) => is_dynamic(&e.ty),
        TExprKind::Array(arr, _) => container_elem_dynamic(&arr.ty),
        TExprKind::Field(obj, name) => field_dynamic(&obj.ty, name),
        TExprKind::Call(callee, _) => return_dynamic(&callee.ty),
        _ => false,
    };

    if maybe_dynamic {
        unify(&e.ty, tfloat)?;
        Ok(false)
    } else {
        unify(&e.ty, tint)?;
        Ok(true)
    }
}
