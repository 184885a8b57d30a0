// src/sema/finalize.rs
//! Module finalization: the delayed-task fixpoint and the reachability walk
//! that orders types and modules for the code generators.

use std::rc::Rc;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::frontend::Span;
use crate::module::ModuleDef;
use crate::sema::context::{DelayedTask, Typer};
use crate::sema::types::{
    BuildState, ClassRef, EnumRef, TExprKind, Type, TypeDecl, TypePath, TypedExpr,
};
use crate::sema::unify::follow;
use crate::sema::TypeResult;

impl Typer {
    /// Enqueue a task to run at finalization.
    pub fn delay(&self, task: DelayedTask) {
        self.g.delayed.borrow_mut().push_back(task);
    }

    /// Drain the delayed queue until empty. Tasks may enqueue more tasks;
    /// the loop runs to fixpoint, so a second call on a finalized context is
    /// a no-op.
    pub fn finalize(&mut self) -> TypeResult<()> {
        loop {
            let task = self.g.delayed.borrow_mut().pop_front();
            match task {
                Some(task) => task(self)?,
                None => break,
            }
        }
        Ok(())
    }

    /// Walk every loaded module and everything reachable from static
    /// initializers; returns the ordered types and their modules. With a
    /// `main` class, a synthetic `@Main` entry invoking its static `main`
    /// is appended last.
    pub fn generate(
        &mut self,
        main_class: Option<&str>,
        excludes: &[TypePath],
    ) -> TypeResult<(Vec<TypeDecl>, Vec<Rc<ModuleDef>>)> {
        let modules = self.g.module_order.borrow().clone();
        let mut walker = Walker {
            types: Vec::new(),
            states: FxHashMap::default(),
            statics_walked: FxHashSet::default(),
            stack: Vec::new(),
            excludes,
        };
        for module in &modules {
            for decl in &module.types {
                walker.walk_decl(decl);
            }
        }

        if let Some(main_path) = main_class {
            let span = Span::default();
            let module = self.load_module(main_path, span)?;
            let Some(TypeDecl::Class(main_c)) = module.main_type() else {
                return Err(self.err_custom(
                    format!("Invalid -main : {main_path} is not a class"),
                    span,
                ));
            };
            let main_field = main_c.borrow().find_static("main");
            let Some(main_field) = main_field else {
                return Err(self.err_custom(
                    format!("Invalid -main : {main_path} does not have static function main"),
                    span,
                ));
            };
            let ret = match follow(&main_field.field_type()) {
                Type::Fun(args, ret) if args.is_empty() => (*ret).clone(),
                _ => {
                    return Err(self.err_custom(
                        format!("Invalid -main : {main_path}.main cannot be called"),
                        span,
                    ));
                }
            };
            let call = TypedExpr::new(
                TExprKind::Call(
                    Box::new(TypedExpr::new(
                        TExprKind::StaticField(main_c.clone(), "main".to_string()),
                        main_field.field_type(),
                        span,
                    )),
                    Vec::new(),
                ),
                ret,
                span,
            );
            let entry = crate::sema::types::ClassDef::new(TypePath::plain("@Main"));
            entry.borrow_mut().init = Some(call);
            walker.walk_decl(&TypeDecl::Class(entry));
        }

        let emitted: FxHashSet<usize> = walker.types.iter().map(decl_key).collect();
        // Re-read the cache: the main class may have loaded a module since
        // the snapshot.
        let modules_out = self
            .g
            .module_order
            .borrow()
            .iter()
            .filter(|m| m.types.iter().any(|d| emitted.contains(&decl_key(d))))
            .cloned()
            .collect();
        Ok((walker.types, modules_out))
    }
}

fn decl_key(decl: &TypeDecl) -> usize {
    match decl {
        TypeDecl::Class(c) => Rc::as_ptr(c) as usize,
        TypeDecl::Enum(e) => Rc::as_ptr(e) as usize,
        TypeDecl::Alias(a) => Rc::as_ptr(a) as usize,
    }
}

struct Walker<'a> {
    types: Vec<TypeDecl>,
    states: FxHashMap<usize, BuildState>,
    /// Static initializers are walked once, whatever the entry path.
    statics_walked: FxHashSet<usize>,
    stack: Vec<TypePath>,
    excludes: &'a [TypePath],
}

impl Walker<'_> {
    fn walk_decl(&mut self, decl: &TypeDecl) {
        let key = decl_key(decl);
        match self.states.get(&key) {
            Some(BuildState::Done) => return,
            Some(BuildState::Generating) => {
                // A static-initialization cycle; report and let both sides
                // complete.
                let against = self
                    .stack
                    .last()
                    .map(|p| p.to_string())
                    .unwrap_or_default();
                tracing::warn!(
                    "maybe loop in static generation of {} against {}",
                    decl.path(),
                    against
                );
                return;
            }
            _ => {}
        }
        self.states.insert(key, BuildState::Generating);
        if let TypeDecl::Class(c) = decl {
            c.borrow_mut().build_state = BuildState::Generating;
        }
        self.stack.push(decl.path());

        let excluded = self.excludes.contains(&decl.path());
        match decl {
            TypeDecl::Class(c) => {
                if excluded {
                    let mut def = c.borrow_mut();
                    def.is_extern = true;
                    def.init = None;
                }
                let (sup, interfaces, init, statics) = {
                    let def = c.borrow();
                    (
                        def.super_class.as_ref().map(|(s, _)| s.clone()),
                        def.implements.iter().map(|(i, _)| i.clone()).collect::<Vec<_>>(),
                        def.init.clone(),
                        def.statics.clone(),
                    )
                };
                if let Some(sup) = sup {
                    self.walk_class(&sup);
                }
                for i in interfaces {
                    self.walk_class(&i);
                }
                if !excluded {
                    if let Some(init) = init {
                        self.walk_expr(&init);
                    }
                    for f in statics {
                        if self.statics_walked.insert(Rc::as_ptr(&f) as usize) {
                            let expr = f.expr.borrow().clone();
                            if let Some(expr) = expr {
                                self.walk_expr(&expr);
                            }
                        }
                    }
                }
            }
            TypeDecl::Enum(_) | TypeDecl::Alias(_) => {}
        }

        self.stack.pop();
        self.states.insert(key, BuildState::Done);
        if let TypeDecl::Class(c) = decl {
            c.borrow_mut().build_state = BuildState::Done;
        }
        self.types.push(decl.clone());
    }

    fn walk_class(&mut self, c: &ClassRef) {
        self.walk_decl(&TypeDecl::Class(c.clone()));
    }

    fn walk_enum(&mut self, e: &EnumRef) {
        self.walk_decl(&TypeDecl::Enum(e.clone()));
    }

    fn walk_expr(&mut self, e: &TypedExpr) {
        match &e.kind {
            TExprKind::TypeRef(decl) => self.walk_decl(decl),
            TExprKind::New(c, _, _) => self.walk_class(c),
            TExprKind::StaticField(c, _) => self.walk_class(c),
            TExprKind::EnumField(en, _) => self.walk_enum(en),
            TExprKind::Match(_, en, _, _) => self.walk_enum(en),
            _ => {}
        }
        e.visit_children(&mut |child| self.walk_expr(child));
    }
}

/// Flat XML rendering of a finalized declaration's `(path, params, fields)`
/// shape, as consumed by the documentation emitter.
pub fn gen_type_string(decl: &TypeDecl) -> String {
    fn attrs(path: &TypePath, params: &[crate::sema::types::TypeParam]) -> String {
        let names: Vec<&str> = params.iter().map(|p| p.name.as_str()).collect();
        format!("path=\"{}\" params=\"{}\"", path, names.join(":"))
    }
    match decl {
        TypeDecl::Class(c) => {
            let def = c.borrow();
            let mut out = format!("<class {}>", attrs(&def.path, &def.params));
            for f in &def.fields {
                out.push_str(&format!("<field name=\"{}\"/>", f.name));
            }
            out.push_str("</class>");
            out
        }
        TypeDecl::Enum(e) => {
            let def = e.borrow();
            let mut out = format!("<enum {}>", attrs(&def.path, &def.params));
            for ctor in &def.constructors {
                out.push_str(&format!("<ctor name=\"{}\"/>", ctor.name));
            }
            out.push_str("</enum>");
            out
        }
        TypeDecl::Alias(a) => {
            let def = a.borrow();
            format!("<typedef {}/>", attrs(&def.path, &def.params))
        }
    }
}
