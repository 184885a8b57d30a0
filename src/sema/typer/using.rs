// src/sema/typer/using.rs
//! Using-extension resolution: the first static method in declaration order
//! whose first parameter accepts the receiver wins.

use crate::sema::context::Typer;
use crate::sema::typer::{Access, AccessMode};
use crate::sema::types::{FieldKind, MethodKind, TExprKind, Type, TypedExpr};
use crate::sema::unify::{follow, unify_check, unify};

impl Typer {
    /// Find an extension candidate for `receiver.name`. Never applies in
    /// write position. Returns `None` when no imported static matches so
    /// the caller can keep probing its own chain.
    pub(crate) fn using_field(
        &mut self,
        mode: AccessMode,
        receiver: &TypedExpr,
        name: &str,
    ) -> Option<Access> {
        if mode == AccessMode::Set {
            return None;
        }
        for class in self.local_using.clone() {
            let Some(f) = class.borrow().find_static(name) else {
                continue;
            };
            if !matches!(f.kind, FieldKind::Method(MethodKind::Normal | MethodKind::Inline)) {
                continue;
            }
            let ft = f.field_type();
            let Type::Fun(args, _) = follow(&ft) else {
                continue;
            };
            let Some(first) = args.first() else {
                continue;
            };
            // Don't let the dynamic top match everything: the receiver and
            // the declared first parameter must agree on dynamicness.
            let recv_dyn = matches!(follow(&receiver.ty), Type::Dynamic);
            let param_dyn = matches!(follow(&first.ty), Type::Dynamic);
            if recv_dyn != param_dyn {
                continue;
            }
            if !unify_check(&receiver.ty, &first.ty) {
                continue;
            }
            // Commit the receiver unification for real this time.
            let _ = unify(&receiver.ty, &first.ty);
            tracing::trace!(
                class = %class.borrow().path,
                method = name,
                "using-extension resolved"
            );
            let call = TypedExpr::new(
                TExprKind::StaticField(class.clone(), name.to_string()),
                ft,
                receiver.span,
            );
            return Some(Access::Extension {
                call,
                this_arg: receiver.clone(),
            });
        }
        None
    }
}
