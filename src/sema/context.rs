// src/sema/context.rs
//! The typing context: configuration, globals shared across a compilation,
//! core type bindings and the scope machinery.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::errors::TypeError;
use crate::frontend::{Expr, Span, TypeHint, TypePathHint};
use crate::module::{ModuleDef, ModuleLoader};
use crate::sema::typer::macros::MacroInterp;
use crate::sema::types::{
    AliasRef, AnonRef, AnonStatus, ClassRef, Type, TypeDecl, TypedExpr, TypeParam,
};
use crate::sema::{Interrupt, TypeResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    /// Bytecode interpreter; also the macro execution target.
    Interp,
    Js,
    Flash8,
    Flash9,
    Cpp,
}

impl Platform {
    /// Value-typed backends wrap nullable basics in `Null<T>`.
    pub fn value_nullability(self) -> bool {
        matches!(self, Platform::Flash9 | Platform::Cpp)
    }

    /// Backends whose calling convention cannot pass a null for a skipped
    /// trailing optional argument.
    pub fn strips_null_tail(self) -> bool {
        matches!(self, Platform::Flash8 | Platform::Flash9)
    }

    /// Prefix used to reach the raw slot behind a property from inside its
    /// own accessor.
    pub fn accessor_prefix(self) -> &'static str {
        match self {
            Platform::Flash9 => "$",
            _ => "",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub platform: Platform,
    pub no_inline: bool,
    pub no_traces: bool,
    pub defines: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            platform: Platform::Interp,
            no_inline: false,
            no_traces: false,
            defines: Vec::new(),
        }
    }
}

/// Range-for specialization hook; consulted before iterator synthesis.
pub trait ForLoopOptimizer {
    fn optimize_for(
        &self,
        typer: &mut Typer,
        var: &str,
        iterator: &TypedExpr,
        body: &Expr,
        span: Span,
    ) -> Option<TypedExpr>;
}

/// Inline expansion hook; declining falls back to a plain call.
pub trait Inliner {
    fn inline_call(
        &self,
        typer: &mut Typer,
        field: &Rc<crate::sema::types::ClassField>,
        receiver: &TypedExpr,
        args: &[TypedExpr],
        ret: &Type,
        span: Span,
    ) -> Option<TypedExpr>;
}

pub type DelayedTask = Box<dyn FnOnce(&mut Typer) -> TypeResult<()>>;

/// A macro call registered while already executing a macro; re-dispatched
/// when the outer macro finishes.
pub struct PendingMacro {
    /// Placeholder slot at the call site.
    pub slot: usize,
    pub class: ClassRef,
    pub method: String,
    pub args: Vec<Expr>,
    /// Locals snapshot at the registration point.
    pub locals: FxHashMap<String, Type>,
    pub span: Span,
}

/// State shared by every typing context of one compilation.
pub struct Globals {
    pub config: Config,
    pub loader: Rc<dyn ModuleLoader>,
    /// Class path used when building the macro sibling context; defaults to
    /// the main loader.
    pub macro_loader: Option<Rc<dyn ModuleLoader>>,
    pub modules: RefCell<FxHashMap<String, Rc<ModuleDef>>>,
    pub module_order: RefCell<Vec<Rc<ModuleDef>>>,
    pub delayed: RefCell<VecDeque<DelayedTask>>,
    pub interp: RefCell<Option<Box<dyn MacroInterp>>>,
    pub pending_macros: RefCell<Vec<PendingMacro>>,
    /// Next placeholder slot for a delayed macro call.
    pub macro_slots: std::cell::Cell<usize>,
    pub for_optimizer: RefCell<Option<Box<dyn ForLoopOptimizer>>>,
    pub inliner: RefCell<Option<Box<dyn Inliner>>>,
    /// Lazily loaded range iterator class.
    pub iter_class: RefCell<Option<ClassRef>>,
}

impl Globals {
    pub fn new(config: Config, loader: Rc<dyn ModuleLoader>) -> Rc<Self> {
        Rc::new(Self {
            config,
            loader,
            macro_loader: None,
            modules: RefCell::new(FxHashMap::default()),
            module_order: RefCell::new(Vec::new()),
            delayed: RefCell::new(VecDeque::new()),
            interp: RefCell::new(None),
            pending_macros: RefCell::new(Vec::new()),
            macro_slots: std::cell::Cell::new(0),
            for_optimizer: RefCell::new(None),
            inliner: RefCell::new(None),
            iter_class: RefCell::new(None),
        })
    }
}

/// Resolved bindings of the standard types every expression needs.
#[derive(Clone)]
pub struct CoreTypes {
    pub void: Type,
    pub bool_: Type,
    pub int: Type,
    pub float: Type,
    pub string: Type,
    pub array: ClassRef,
    pub null_alias: AliasRef,
    /// Standard declarations visible for bare-name lookup in every module.
    pub std_types: Vec<TypeDecl>,
}

impl CoreTypes {
    pub fn tarray(&self, elem: Type) -> Type {
        Type::Inst(self.array.clone(), vec![elem])
    }
}

pub(crate) struct LocalsSnapshot {
    locals: FxHashMap<String, Type>,
    locals_map: FxHashMap<String, String>,
    locals_map_inv: FxHashMap<String, String>,
    opened_len: usize,
}

/// One typing context. Lives for a whole compilation; the macro bridge
/// creates a sibling for macro execution.
pub struct Typer {
    pub g: Rc<Globals>,
    pub t: CoreTypes,
    /// Source file of the expressions currently being typed.
    pub file: String,
    pub(crate) locals: FxHashMap<String, Type>,
    pub(crate) locals_map: FxHashMap<String, String>,
    pub(crate) locals_map_inv: FxHashMap<String, String>,
    /// Imported type declarations, bare-name visible.
    pub local_types: Vec<TypeDecl>,
    /// Classes whose statics are extension candidates, in declaration order.
    pub local_using: Vec<ClassRef>,
    pub type_params: Vec<TypeParam>,
    pub curclass: Option<ClassRef>,
    pub curmethod: String,
    pub tthis: Type,
    pub ret: Type,
    pub in_static: bool,
    pub in_constructor: bool,
    pub in_loop: bool,
    pub in_super_call: bool,
    pub in_display: bool,
    pub in_macro: bool,
    pub untyped: bool,
    /// Open anonymous structures created by speculative inference; closed
    /// when their scope ends.
    pub(crate) opened: Vec<AnonRef>,
    /// Expected type threaded into function-literal inference.
    pub(crate) param_type: Option<Type>,
    pub(crate) errors: Vec<TypeError>,
    pub(crate) gen_count: u32,
    /// Sibling context executing macros, built on first use.
    pub(crate) macro_ctx: Option<Box<Typer>>,
    /// Macro modules already compiled and handed to the interpreter.
    pub(crate) macro_defined: FxHashSet<String>,
}

impl Typer {
    /// Build the root typing context: loads `StdTypes` and binds Void, Bool,
    /// Float and Int from it, then the String and Array modules.
    pub fn new(config: Config, loader: Rc<dyn ModuleLoader>) -> TypeResult<Typer> {
        let g = Globals::new(config, loader);
        Self::with_globals(g)
    }

    /// Root context over the built-in core library.
    pub fn with_core(config: Config) -> TypeResult<Typer> {
        Self::new(config, Rc::new(crate::module::stdlib::core_loader()))
    }

    pub(crate) fn with_globals(g: Rc<Globals>) -> TypeResult<Typer> {
        let span = Span::default();
        let std = g
            .loader
            .load_module("StdTypes")
            .ok_or_else(|| TypeError::custom("Standard library not found : StdTypes", span))?;
        let mut std_types = std.types.clone();

        let find = |name: &str| -> TypeResult<TypeDecl> {
            std.find(name).ok_or_else(|| {
                Interrupt::Error(TypeError::custom(
                    format!("Standard type not found : {name}"),
                    span,
                ))
            })
        };
        let void = decl_type(&find("Void")?);
        let bool_ = decl_type(&find("Bool")?);
        let float = decl_type(&find("Float")?);
        let int = decl_type(&find("Int")?);
        let null_alias = match find("Null")? {
            TypeDecl::Alias(a) => a,
            _ => {
                return Err(TypeError::custom("Standard type Null must be a typedef", span).into());
            }
        };

        let load_class = |name: &str| -> TypeResult<ClassRef> {
            let m = g.loader.load_module(name).ok_or_else(|| {
                Interrupt::Error(TypeError::module_not_found(name, name, span))
            })?;
            match m.main_type() {
                Some(TypeDecl::Class(c)) => Ok(c),
                _ => Err(TypeError::custom(
                    format!("Standard type {name} must be a class"),
                    span,
                )
                .into()),
            }
        };
        let string_class = load_class("String")?;
        let array_class = load_class("Array")?;
        std_types.push(TypeDecl::Class(string_class.clone()));
        std_types.push(TypeDecl::Class(array_class.clone()));

        let t = CoreTypes {
            void,
            bool_,
            int,
            float,
            string: Type::Inst(string_class, Vec::new()),
            array: array_class,
            null_alias,
            std_types,
        };

        Ok(Typer {
            g,
            t,
            file: String::new(),
            locals: FxHashMap::default(),
            locals_map: FxHashMap::default(),
            locals_map_inv: FxHashMap::default(),
            local_types: Vec::new(),
            local_using: Vec::new(),
            type_params: Vec::new(),
            curclass: None,
            curmethod: String::new(),
            tthis: Type::mono(),
            ret: Type::mono(),
            in_static: false,
            in_constructor: false,
            in_loop: false,
            in_super_call: false,
            in_display: false,
            in_macro: false,
            untyped: false,
            opened: Vec::new(),
            param_type: None,
            errors: Vec::new(),
            gen_count: 0,
            macro_ctx: None,
            macro_defined: FxHashSet::default(),
        })
    }

    // -- diagnostics --------------------------------------------------------

    pub(crate) fn err_custom(&self, message: impl Into<String>, span: Span) -> Interrupt {
        Interrupt::Error(TypeError::custom(message, span))
    }

    /// Record a diagnostic and keep typing. Display queries are not a real
    /// pass; their recovered errors are not kept.
    pub fn display_error(&mut self, err: TypeError) {
        if self.in_display {
            tracing::trace!(error = %err, "type error dropped during display");
            return;
        }
        tracing::trace!(error = %err, "type error recorded");
        self.errors.push(err);
    }

    pub fn errors(&self) -> &[TypeError] {
        &self.errors
    }

    pub fn take_errors(&mut self) -> Vec<TypeError> {
        std::mem::take(&mut self.errors)
    }

    // -- scopes -------------------------------------------------------------

    pub(crate) fn save_locals(&mut self) -> LocalsSnapshot {
        LocalsSnapshot {
            locals: self.locals.clone(),
            locals_map: self.locals_map.clone(),
            locals_map_inv: self.locals_map_inv.clone(),
            opened_len: self.opened.len(),
        }
    }

    pub(crate) fn restore_locals(&mut self, snapshot: LocalsSnapshot) {
        self.locals = snapshot.locals;
        self.locals_map = snapshot.locals_map;
        self.locals_map_inv = snapshot.locals_map_inv;
        // Anonymous structures opened in the dead scope stop accepting new
        // fields.
        for anon in self.opened.drain(snapshot.opened_len..) {
            let mut a = anon.borrow_mut();
            if matches!(a.status, AnonStatus::Open) {
                a.status = AnonStatus::Closed;
            }
        }
    }

    /// Run `f` in a nested local scope, restoring on every exit path.
    pub(crate) fn in_scope<T>(
        &mut self,
        f: impl FnOnce(&mut Typer) -> TypeResult<T>,
    ) -> TypeResult<T> {
        let snapshot = self.save_locals();
        let out = f(self);
        self.restore_locals(snapshot);
        out
    }

    /// Declare a local, renaming on shadowing. Returns the effective name.
    pub(crate) fn add_local(&mut self, name: &str, ty: Type) -> String {
        if !self.locals.contains_key(name) {
            self.locals.insert(name.to_string(), ty);
            return name.to_string();
        }
        let mut n = 1u32;
        let fresh = loop {
            let candidate = format!("{name}{n}");
            if !self.locals.contains_key(&candidate) {
                break candidate;
            }
            n += 1;
        };
        self.locals_map.insert(name.to_string(), fresh.clone());
        self.locals_map_inv.insert(fresh.clone(), name.to_string());
        self.locals.insert(fresh.clone(), ty);
        fresh
    }

    /// Fresh compiler-introduced local.
    pub(crate) fn gen_local(&mut self, ty: Type) -> String {
        let name = if self.gen_count == 0 {
            "_g".to_string()
        } else {
            format!("_g{}", self.gen_count)
        };
        self.gen_count += 1;
        self.locals.insert(name.clone(), ty);
        name
    }

    pub(crate) fn local_type(&self, name: &str) -> Option<Type> {
        let actual = self.locals_map.get(name).map(|s| s.as_str()).unwrap_or(name);
        self.locals.get(actual).cloned()
    }

    /// The source-level name behind a possibly renamed local.
    pub fn source_name_of<'a>(&'a self, name: &'a str) -> &'a str {
        self.locals_map_inv.get(name).map(|s| s.as_str()).unwrap_or(name)
    }

    // -- nullability --------------------------------------------------------

    /// Nullable lift: identity on reference-typed backends, `Null<T>` on
    /// value-typed ones.
    pub fn tnull(&self, t: Type) -> Type {
        if self.g.config.platform.value_nullability() && !t.is_null_wrapped() {
            Type::Alias(self.t.null_alias.clone(), vec![t])
        } else {
            t
        }
    }

    // -- module loading -----------------------------------------------------

    /// Load and cache a module; the cache also fixes the order seen by the
    /// reachability walker.
    pub fn load_module(&self, path: &str, span: Span) -> TypeResult<Rc<ModuleDef>> {
        if let Some(m) = self.g.modules.borrow().get(path) {
            return Ok(m.clone());
        }
        let loader = if self.in_macro {
            self.g
                .macro_loader
                .clone()
                .unwrap_or_else(|| self.g.loader.clone())
        } else {
            self.g.loader.clone()
        };
        match loader.load_module(path) {
            Some(m) => {
                self.g
                    .modules
                    .borrow_mut()
                    .insert(path.to_string(), m.clone());
                self.g.module_order.borrow_mut().push(m.clone());
                Ok(m)
            }
            None => {
                let name = path.rsplit('.').next().unwrap_or(path);
                Err(TypeError::module_not_found(path, name, span).into())
            }
        }
    }

    /// Quiet probe used by prefix-greedy path resolution.
    pub(crate) fn peek_module(&self, path: &str) -> Option<Rc<ModuleDef>> {
        if let Some(m) = self.g.modules.borrow().get(path) {
            return Some(m.clone());
        }
        let m = self.g.loader.load_module(path)?;
        self.g
            .modules
            .borrow_mut()
            .insert(path.to_string(), m.clone());
        self.g.module_order.borrow_mut().push(m.clone());
        Some(m)
    }

    // -- type resolution ----------------------------------------------------

    /// Resolve a dotted type path to a declaration: local imports first,
    /// then active type parameters, the standard types, and finally the
    /// module loader.
    pub fn load_type_decl(&mut self, hint: &TypePathHint, span: Span) -> TypeResult<TypeDecl> {
        if hint.pack.is_empty() {
            if let Some(decl) = self
                .local_types
                .iter()
                .find(|d| d.path().name == hint.name)
            {
                return Ok(decl.clone());
            }
            if let Some(tp) = self.type_params.iter().find(|tp| tp.name == hint.name) {
                if let Type::Inst(c, _) = &tp.ty {
                    return Ok(TypeDecl::Class(c.clone()));
                }
            }
            if let Some(decl) = self
                .t
                .std_types
                .iter()
                .find(|d| d.path().name == hint.name)
            {
                return Ok(decl.clone());
            }
        }
        let module_path = hint.to_module_path();
        let m = self.load_module(&module_path, span)?;
        m.find(&hint.name)
            .or_else(|| m.main_type())
            .ok_or_else(|| {
                Interrupt::Error(TypeError::module_not_found(&module_path, &hint.name, span))
            })
    }

    /// Instantiate a type path. Missing parameters become fresh monomorphs
    /// when `allow_param_defaults` is set, otherwise they are an error.
    pub fn load_instance(
        &mut self,
        hint: &TypePathHint,
        span: Span,
        allow_param_defaults: bool,
    ) -> TypeResult<Type> {
        if hint.pack.is_empty() && hint.name == "Dynamic" {
            return Ok(Type::Dynamic);
        }
        let decl = self.load_type_decl(hint, span)?;
        let declared = match &decl {
            TypeDecl::Class(c) => c.borrow().params.len(),
            TypeDecl::Enum(e) => e.borrow().params.len(),
            TypeDecl::Alias(a) => a.borrow().params.len(),
        };
        let params: Vec<Type> = if hint.params.is_empty() && declared > 0 {
            if !allow_param_defaults {
                return Err(self.err_custom(
                    format!("Invalid number of type parameters for {}", hint.name),
                    span,
                ));
            }
            (0..declared).map(|_| Type::mono()).collect()
        } else {
            if hint.params.len() != declared {
                return Err(self.err_custom(
                    format!("Invalid number of type parameters for {}", hint.name),
                    span,
                ));
            }
            hint.params
                .iter()
                .map(|h| self.load_complex_type(h, span))
                .collect::<TypeResult<_>>()?
        };
        Ok(match decl {
            TypeDecl::Class(c) => Type::Inst(c, params),
            TypeDecl::Enum(e) => Type::Enum(e, params),
            TypeDecl::Alias(a) => Type::Alias(a, params),
        })
    }

    /// Resolve a syntactic annotation to a type.
    pub fn load_complex_type(&mut self, hint: &TypeHint, span: Span) -> TypeResult<Type> {
        match hint {
            TypeHint::Path(p) => self.load_instance(p, span, false),
            TypeHint::Anon(fields) => {
                let mut out = Vec::with_capacity(fields.len());
                for (name, h) in fields {
                    out.push(crate::sema::types::AnonField {
                        name: name.clone(),
                        ty: self.load_complex_type(h, span)?,
                    });
                }
                Ok(Type::Anon(crate::sema::types::AnonType::new(
                    out,
                    AnonStatus::Closed,
                )))
            }
            TypeHint::Fun(args, ret) => {
                let args = args
                    .iter()
                    .enumerate()
                    .map(|(i, h)| {
                        Ok(crate::sema::types::FunArg::new(
                            &format!("arg{i}"),
                            self.load_complex_type(h, span)?,
                        ))
                    })
                    .collect::<TypeResult<Vec<_>>>()?;
                let ret = self.load_complex_type(ret, span)?;
                Ok(Type::fun(args, ret))
            }
        }
    }

    /// The lazily loaded integer range iterator class.
    pub(crate) fn range_iterator(&mut self, span: Span) -> TypeResult<ClassRef> {
        if let Some(c) = self.g.iter_class.borrow().clone() {
            return Ok(c);
        }
        let m = self.load_module("IntIter", span)?;
        match m.main_type() {
            Some(TypeDecl::Class(c)) => {
                *self.g.iter_class.borrow_mut() = Some(c.clone());
                Ok(c)
            }
            _ => Err(self.err_custom("IntIter must be a class", span)),
        }
    }

}

/// The default type of a declaration with its declared parameters.
pub(crate) fn decl_type(decl: &TypeDecl) -> Type {
    match decl {
        TypeDecl::Class(c) => {
            let params = c.borrow().params.iter().map(|p| p.ty.clone()).collect();
            Type::Inst(c.clone(), params)
        }
        TypeDecl::Enum(e) => {
            let params = e.borrow().params.iter().map(|p| p.ty.clone()).collect();
            Type::Enum(e.clone(), params)
        }
        TypeDecl::Alias(a) => {
            let params = a.borrow().params.iter().map(|p| p.ty.clone()).collect();
            Type::Alias(a.clone(), params)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_binds_core_types() {
        let typer = Typer::with_core(Config::default()).unwrap();
        assert_eq!(typer.t.int.to_string(), "Int");
        assert_eq!(typer.t.float.to_string(), "Float");
        assert_eq!(typer.t.string.to_string(), "String");
        assert_eq!(typer.t.bool_.to_string(), "Bool");
        assert_eq!(typer.t.void.to_string(), "Void");
    }

    #[test]
    fn nullable_lift_depends_on_platform() {
        let reference = Typer::with_core(Config::default()).unwrap();
        assert_eq!(reference.tnull(reference.t.int.clone()).to_string(), "Int");

        let value = Typer::with_core(Config {
            platform: Platform::Flash9,
            ..Config::default()
        })
        .unwrap();
        assert_eq!(
            value.tnull(value.t.int.clone()).to_string(),
            "Null<Int>"
        );
        // Already wrapped stays single-wrapped.
        let wrapped = value.tnull(value.t.int.clone());
        assert_eq!(value.tnull(wrapped).to_string(), "Null<Int>");
    }

    #[test]
    fn add_local_renames_on_shadowing() {
        let mut typer = Typer::with_core(Config::default()).unwrap();
        let int_t = typer.t.int.clone();
        let first = typer.add_local("x", int_t.clone());
        assert_eq!(first, "x");
        let second = typer.add_local("x", typer.t.string.clone());
        assert_eq!(second, "x1");
        // Lookup through the renaming pair sees the innermost binding.
        assert_eq!(typer.local_type("x").unwrap().to_string(), "String");
    }

    #[test]
    fn scope_exit_restores_locals_and_closes_anons() {
        let mut typer = Typer::with_core(Config::default()).unwrap();
        let anon = crate::sema::types::AnonType::new(Vec::new(), AnonStatus::Open);
        typer
            .in_scope(|t| {
                t.add_local("tmp", t.t.int.clone());
                t.opened.push(anon.clone());
                Ok(())
            })
            .unwrap();
        assert!(typer.local_type("tmp").is_none());
        assert!(matches!(anon.borrow().status, AnonStatus::Closed));
    }

    #[test]
    fn load_instance_defaults_params_to_monomorphs() {
        let mut typer = Typer::with_core(Config::default()).unwrap();
        let hint = TypePathHint::plain("Array");
        let t = typer.load_instance(&hint, Span::default(), true).unwrap();
        assert!(matches!(t, Type::Inst(_, ref pl) if pl.len() == 1));
        assert!(typer.load_instance(&hint, Span::default(), false).is_err());
    }
}
