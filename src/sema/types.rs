// src/sema/types.rs
//! The algebraic type representation and the elaborated expression tree.
//!
//! Monomorphs are shared mutable cells: every occurrence of a type variable
//! aliases the same `Rc<RefCell<...>>`, so binding one binds them all. The
//! unifier (`sema::unify`) is the only writer outside of tests.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::frontend::Span;

pub type ClassRef = Rc<RefCell<ClassDef>>;
pub type EnumRef = Rc<RefCell<EnumDef>>;
pub type AliasRef = Rc<RefCell<AliasDef>>;
pub type AnonRef = Rc<RefCell<AnonType>>;

/// Dotted path of a type declaration: package segments plus the type name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypePath {
    pub pack: Vec<String>,
    pub name: String,
}

impl TypePath {
    pub fn plain(name: &str) -> Self {
        Self {
            pack: Vec::new(),
            name: name.to_string(),
        }
    }

    pub fn new(pack: &[&str], name: &str) -> Self {
        Self {
            pack: pack.iter().map(|s| s.to_string()).collect(),
            name: name.to_string(),
        }
    }
}

impl fmt::Display for TypePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for p in &self.pack {
            write!(f, "{p}.")?;
        }
        write!(f, "{}", self.name)
    }
}

static MONO_IDS: AtomicU32 = AtomicU32::new(0);

/// A type variable. All occurrences share the solution cell; `id` is only
/// used for printing.
#[derive(Clone)]
pub struct Monomorph {
    pub id: u32,
    cell: Rc<RefCell<Option<Type>>>,
}

impl Monomorph {
    pub fn fresh() -> Self {
        Self {
            id: MONO_IDS.fetch_add(1, Ordering::Relaxed),
            cell: Rc::new(RefCell::new(None)),
        }
    }

    pub fn get(&self) -> Option<Type> {
        self.cell.borrow().clone()
    }

    pub fn is_bound(&self) -> bool {
        self.cell.borrow().is_some()
    }

    pub fn bind(&self, t: Type) {
        *self.cell.borrow_mut() = Some(t);
    }

    /// Unbind; used by the unifier to roll back speculative bindings.
    pub fn reset(&self) {
        *self.cell.borrow_mut() = None;
    }

    pub fn ptr_eq(&self, other: &Monomorph) -> bool {
        Rc::ptr_eq(&self.cell, &other.cell)
    }
}

impl fmt::Debug for Monomorph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get() {
            Some(t) => write!(f, "Mono#{}={t}", self.id),
            None => write!(f, "Mono#{}", self.id),
        }
    }
}

/// One argument of a function type.
#[derive(Debug, Clone)]
pub struct FunArg {
    pub name: String,
    pub opt: bool,
    pub ty: Type,
}

impl FunArg {
    pub fn new(name: &str, ty: Type) -> Self {
        Self {
            name: name.to_string(),
            opt: false,
            ty,
        }
    }

    pub fn optional(name: &str, ty: Type) -> Self {
        Self {
            name: name.to_string(),
            opt: true,
            ty,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Type {
    Mono(Monomorph),
    Inst(ClassRef, Vec<Type>),
    Enum(EnumRef, Vec<Type>),
    /// A typedef application; `follow` looks through it.
    Alias(AliasRef, Vec<Type>),
    Fun(Vec<FunArg>, Box<Type>),
    Anon(AnonRef),
    Dynamic,
}

impl Type {
    pub fn mono() -> Type {
        Type::Mono(Monomorph::fresh())
    }

    pub fn fun(args: Vec<FunArg>, ret: Type) -> Type {
        Type::Fun(args, Box::new(ret))
    }

    /// The unfollowed head is the `Null` typedef.
    pub fn is_null_wrapped(&self) -> bool {
        match self {
            Type::Alias(a, _) => a.borrow().path.name == "Null",
            _ => false,
        }
    }
}

/// A declared type parameter: the parameter is itself a class of kind
/// `TypeParam`, so parameter occurrences are ordinary `Inst` types.
#[derive(Debug, Clone)]
pub struct TypeParam {
    pub name: String,
    pub ty: Type,
}

impl TypeParam {
    /// Fresh unconstrained parameter named `name`.
    pub fn fresh(name: &str) -> Self {
        Self::constrained(name, Vec::new())
    }

    pub fn constrained(name: &str, constraints: Vec<Type>) -> Self {
        let c = ClassDef::new(TypePath::plain(name));
        c.borrow_mut().kind = ClassKind::TypeParam(constraints);
        Self {
            name: name.to_string(),
            ty: Type::Inst(c, Vec::new()),
        }
    }

    pub fn class(&self) -> Option<&ClassRef> {
        match &self.ty {
            Type::Inst(c, _) => Some(c),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum ClassKind {
    Normal,
    /// A method/class type parameter, with its declared constraints.
    TypeParam(Vec<Type>),
}

/// Finalization state of a declaration during the reachability walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildState {
    NotYet,
    Generating,
    Done,
}

/// How a variable field may be read or written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VarAccess {
    Normal,
    /// Private to the declaring hierarchy.
    No,
    /// Routed through the named accessor method.
    Call(String),
    /// Routed through the dynamic `resolve` hook.
    Resolve,
    /// The variable body is substituted at each read site.
    Inline,
    Never,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodKind {
    Normal,
    Inline,
    Dynamic,
    Macro,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    Var { read: VarAccess, write: VarAccess },
    Method(MethodKind),
}

impl FieldKind {
    pub fn plain_var() -> Self {
        FieldKind::Var {
            read: VarAccess::Normal,
            write: VarAccess::Normal,
        }
    }

    pub fn property(read: VarAccess, write: VarAccess) -> Self {
        FieldKind::Var { read, write }
    }
}

#[derive(Debug)]
pub struct ClassField {
    pub name: String,
    pub ty: RefCell<Type>,
    pub public: bool,
    pub kind: FieldKind,
    /// Stored body: inline methods and static initializers keep their typed
    /// expression here.
    pub expr: RefCell<Option<TypedExpr>>,
    pub pos: Span,
}

impl ClassField {
    pub fn new(name: &str, ty: Type, kind: FieldKind) -> Rc<Self> {
        Rc::new(Self {
            name: name.to_string(),
            ty: RefCell::new(ty),
            public: true,
            kind,
            expr: RefCell::new(None),
            pos: Span::default(),
        })
    }

    pub fn var(name: &str, ty: Type) -> Rc<Self> {
        Self::new(name, ty, FieldKind::plain_var())
    }

    pub fn method(name: &str, args: Vec<FunArg>, ret: Type) -> Rc<Self> {
        Self::new(
            name,
            Type::fun(args, ret),
            FieldKind::Method(MethodKind::Normal),
        )
    }

    pub fn field_type(&self) -> Type {
        self.ty.borrow().clone()
    }
}

#[derive(Debug)]
pub struct ClassDef {
    pub path: TypePath,
    pub params: Vec<TypeParam>,
    pub kind: ClassKind,
    pub is_extern: bool,
    pub is_interface: bool,
    pub is_private: bool,
    pub super_class: Option<(ClassRef, Vec<Type>)>,
    pub implements: Vec<(ClassRef, Vec<Type>)>,
    pub fields: Vec<Rc<ClassField>>,
    pub statics: Vec<Rc<ClassField>>,
    pub constructor: Option<Rc<ClassField>>,
    /// Constructor is only callable from the hierarchy.
    pub private_ctor: bool,
    /// Element type of `e[i]` on instances, from array-access metadata.
    pub array_access: Option<Type>,
    /// Static initializer block, run at module load.
    pub init: Option<TypedExpr>,
    /// Backend-level name override; first metadata occurrence wins.
    pub native_name: Option<String>,
    pub build_state: BuildState,
}

impl ClassDef {
    pub fn new(path: TypePath) -> ClassRef {
        Rc::new(RefCell::new(Self {
            path,
            params: Vec::new(),
            kind: ClassKind::Normal,
            is_extern: false,
            is_interface: false,
            is_private: false,
            super_class: None,
            implements: Vec::new(),
            fields: Vec::new(),
            statics: Vec::new(),
            constructor: None,
            private_ctor: false,
            array_access: None,
            init: None,
            native_name: None,
            build_state: BuildState::NotYet,
        }))
    }

    pub fn find_field(&self, name: &str) -> Option<Rc<ClassField>> {
        self.fields.iter().find(|f| f.name == name).cloned()
    }

    pub fn find_static(&self, name: &str) -> Option<Rc<ClassField>> {
        self.statics.iter().find(|f| f.name == name).cloned()
    }

    /// Record a backend name override; the first one sticks.
    pub fn set_native_name(&mut self, name: &str) {
        if self.native_name.is_none() {
            self.native_name = Some(name.to_string());
        }
    }
}

/// One constructor of an enum. A constructor with arguments types as a
/// function producing the enum; a constant constructor types as the enum.
#[derive(Debug)]
pub struct EnumCtor {
    pub name: String,
    pub index: usize,
    pub args: Vec<FunArg>,
    pub pos: Span,
}

#[derive(Debug)]
pub struct EnumDef {
    pub path: TypePath,
    pub params: Vec<TypeParam>,
    pub constructors: Vec<Rc<EnumCtor>>,
    pub is_extern: bool,
}

impl EnumDef {
    pub fn new(path: TypePath) -> EnumRef {
        Rc::new(RefCell::new(Self {
            path,
            params: Vec::new(),
            constructors: Vec::new(),
            is_extern: false,
        }))
    }

    pub fn find_ctor(&self, name: &str) -> Option<Rc<EnumCtor>> {
        self.constructors.iter().find(|c| c.name == name).cloned()
    }
}

/// The type of constructor `ctor` seen on `Enum(e, params)`.
pub fn enum_ctor_type(e: &EnumRef, params: &[Type], ctor: &EnumCtor) -> Type {
    let def = e.borrow();
    let result = Type::Enum(e.clone(), params.to_vec());
    if ctor.args.is_empty() {
        result
    } else {
        let args = ctor
            .args
            .iter()
            .map(|a| FunArg {
                name: a.name.clone(),
                opt: a.opt,
                ty: apply_params(&def.params, params, &a.ty),
            })
            .collect();
        Type::fun(args, result)
    }
}

#[derive(Debug)]
pub struct AliasDef {
    pub path: TypePath,
    pub params: Vec<TypeParam>,
    pub target: Type,
}

impl AliasDef {
    pub fn new(path: TypePath, target: Type) -> AliasRef {
        Rc::new(RefCell::new(Self {
            path,
            params: Vec::new(),
            target,
        }))
    }
}

/// Structural openness of an anonymous type.
#[derive(Debug, Clone)]
pub enum AnonStatus {
    /// May still gain fields through inference.
    Open,
    Closed,
    /// Object literal: field set is exactly the written one.
    Const,
    /// The statics of a class, as seen through a type reference.
    Statics(ClassRef),
    /// The constructors of an enum, as seen through a type reference.
    EnumStatics(EnumRef),
}

#[derive(Debug, Clone)]
pub struct AnonField {
    pub name: String,
    pub ty: Type,
}

#[derive(Debug)]
pub struct AnonType {
    pub fields: Vec<AnonField>,
    pub status: AnonStatus,
}

impl AnonType {
    pub fn new(fields: Vec<AnonField>, status: AnonStatus) -> AnonRef {
        Rc::new(RefCell::new(Self { fields, status }))
    }

    pub fn find(&self, name: &str) -> Option<AnonField> {
        self.fields.iter().find(|f| f.name == name).cloned()
    }
}

/// Substitute declared type parameters with `actuals` throughout `t`.
/// Parameter occurrences are `Inst` types of the parameter classes, matched
/// by identity.
pub fn apply_params(params: &[TypeParam], actuals: &[Type], t: &Type) -> Type {
    if params.is_empty() || actuals.is_empty() {
        return t.clone();
    }
    let subst = |inner: &Type| apply_params(params, actuals, inner);
    match t {
        Type::Inst(c, pl) => {
            for (tp, actual) in params.iter().zip(actuals.iter()) {
                if let Some(pc) = tp.class()
                    && Rc::ptr_eq(pc, c)
                {
                    return actual.clone();
                }
            }
            Type::Inst(c.clone(), pl.iter().map(subst).collect())
        }
        Type::Enum(e, pl) => Type::Enum(e.clone(), pl.iter().map(subst).collect()),
        Type::Alias(a, pl) => Type::Alias(a.clone(), pl.iter().map(subst).collect()),
        Type::Fun(args, ret) => Type::Fun(
            args.iter()
                .map(|a| FunArg {
                    name: a.name.clone(),
                    opt: a.opt,
                    ty: subst(&a.ty),
                })
                .collect(),
            Box::new(subst(ret)),
        ),
        Type::Anon(a) => {
            let an = a.borrow();
            let fields = an
                .fields
                .iter()
                .map(|f| AnonField {
                    name: f.name.clone(),
                    ty: subst(&f.ty),
                })
                .collect();
            Type::Anon(AnonType::new(fields, an.status.clone()))
        }
        Type::Mono(m) => match m.get() {
            Some(inner) => subst(&inner),
            None => t.clone(),
        },
        Type::Dynamic => Type::Dynamic,
    }
}

/// Look up an instance field on `c` (with `params` applied), walking the
/// superclass chain and implemented interfaces. Returns the owning class,
/// the field, and its type with all parameters applied.
pub fn class_field(
    c: &ClassRef,
    params: &[Type],
    name: &str,
) -> Option<(ClassRef, Rc<ClassField>, Type)> {
    let def = c.borrow();
    if let Some(f) = def.find_field(name) {
        let ty = apply_params(&def.params, params, &f.field_type());
        return Some((c.clone(), f, ty));
    }
    if let Some((sup, spl)) = &def.super_class {
        let spl: Vec<Type> = spl
            .iter()
            .map(|t| apply_params(&def.params, params, t))
            .collect();
        if let Some(hit) = class_field(sup, &spl, name) {
            return Some(hit);
        }
    }
    for (i, ipl) in &def.implements {
        let ipl: Vec<Type> = ipl
            .iter()
            .map(|t| apply_params(&def.params, params, t))
            .collect();
        if let Some(hit) = class_field(i, &ipl, name) {
            return Some(hit);
        }
    }
    None
}

/// True when `child` is `parent` or inherits from it.
pub fn extends(child: &ClassRef, parent: &ClassRef) -> bool {
    if Rc::ptr_eq(child, parent) {
        return true;
    }
    let def = child.borrow();
    match &def.super_class {
        Some((sup, _)) => extends(sup, parent),
        None => false,
    }
}

// ---------------------------------------------------------------------------
// Typed expression tree
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum TConst {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    Null,
    This,
    Super,
}

/// A module-level declaration, as referenced from typed expressions.
#[derive(Debug, Clone)]
pub enum TypeDecl {
    Class(ClassRef),
    Enum(EnumRef),
    Alias(AliasRef),
}

impl TypeDecl {
    pub fn path(&self) -> TypePath {
        match self {
            TypeDecl::Class(c) => c.borrow().path.clone(),
            TypeDecl::Enum(e) => e.borrow().path.clone(),
            TypeDecl::Alias(a) => a.borrow().path.clone(),
        }
    }

    pub fn name(&self) -> String {
        self.path().name
    }
}

#[derive(Debug, Clone)]
pub struct TFunArg {
    pub name: String,
    pub opt: bool,
    pub ty: Type,
}

#[derive(Debug, Clone)]
pub struct TFunction {
    pub args: Vec<TFunArg>,
    pub ret: Type,
    pub body: Box<TypedExpr>,
}

/// One elaborated arm of an enum match: the matched constructor indices,
/// per-argument bindings of the pattern (`None` = wildcard), and the body.
#[derive(Debug, Clone)]
pub struct TMatchCase {
    pub indices: Vec<usize>,
    pub bindings: Option<Vec<Option<(String, Type)>>>,
    pub body: TypedExpr,
}

#[derive(Debug, Clone)]
pub enum TExprKind {
    Const(TConst),
    Local(String),
    /// Reference to an enum constructor as a value.
    EnumField(EnumRef, String),
    /// Reference to a type as a value (statics carrier).
    TypeRef(TypeDecl),
    StaticField(ClassRef, String),
    Field(Box<TypedExpr>, String),
    /// Method read: a bound closure over the receiver, not a raw slot read.
    Closure(Box<TypedExpr>, String),
    Array(Box<TypedExpr>, Box<TypedExpr>),
    Binop(crate::frontend::Binop, Box<TypedExpr>, Box<TypedExpr>),
    Unop(
        crate::frontend::Unop,
        crate::frontend::UnopFlag,
        Box<TypedExpr>,
    ),
    Paren(Box<TypedExpr>),
    ObjectDecl(Vec<(String, TypedExpr)>),
    ArrayDecl(Vec<TypedExpr>),
    Call(Box<TypedExpr>, Vec<TypedExpr>),
    New(ClassRef, Vec<Type>, Vec<TypedExpr>),
    Function(TFunction),
    Vars(Vec<(String, Type, Option<TypedExpr>)>),
    Block(Vec<TypedExpr>),
    For(String, Type, Box<TypedExpr>, Box<TypedExpr>),
    If(Box<TypedExpr>, Box<TypedExpr>, Option<Box<TypedExpr>>),
    While(Box<TypedExpr>, Box<TypedExpr>, crate::frontend::WhileFlag),
    Switch(
        Box<TypedExpr>,
        Vec<(Vec<TypedExpr>, TypedExpr)>,
        Option<Box<TypedExpr>>,
    ),
    Match(
        Box<TypedExpr>,
        EnumRef,
        Vec<TMatchCase>,
        Option<Box<TypedExpr>>,
    ),
    Try(Box<TypedExpr>, Vec<(String, Type, TypedExpr)>),
    Return(Option<Box<TypedExpr>>),
    Break,
    Continue,
    Throw(Box<TypedExpr>),
    Cast(Box<TypedExpr>, Option<TypeDecl>),
    /// Placeholder for a macro call registered while already inside a macro.
    DelayedMacro(usize),
}

#[derive(Debug, Clone)]
pub struct TypedExpr {
    pub kind: TExprKind,
    pub ty: Type,
    pub span: Span,
}

impl TypedExpr {
    pub fn new(kind: TExprKind, ty: Type, span: Span) -> Self {
        Self { kind, ty, span }
    }

    pub fn null(ty: Type, span: Span) -> Self {
        Self::new(TExprKind::Const(TConst::Null), ty, span)
    }

    pub fn is_null_const(&self) -> bool {
        matches!(self.kind, TExprKind::Const(TConst::Null))
    }

    /// Visit all direct children.
    pub fn visit_children(&self, f: &mut impl FnMut(&TypedExpr)) {
        use TExprKind::*;
        match &self.kind {
            Const(_) | Local(_) | EnumField(..) | TypeRef(_) | StaticField(..) | Break
            | Continue | DelayedMacro(_) => {}
            Field(e, _) | Closure(e, _) | Paren(e) | Throw(e) | Cast(e, _) => f(e),
            Array(a, b) | Binop(_, a, b) => {
                f(a);
                f(b);
            }
            Unop(_, _, e) => f(e),
            ObjectDecl(fields) => fields.iter().for_each(|(_, e)| f(e)),
            ArrayDecl(el) | Block(el) => el.iter().for_each(&mut *f),
            Call(c, args) => {
                f(c);
                args.iter().for_each(&mut *f);
            }
            New(_, _, args) => args.iter().for_each(&mut *f),
            Function(func) => f(&func.body),
            Vars(decls) => decls.iter().filter_map(|(_, _, e)| e.as_ref()).for_each(f),
            For(_, _, it, body) => {
                f(it);
                f(body);
            }
            If(c, a, b) => {
                f(c);
                f(a);
                if let Some(b) = b {
                    f(b);
                }
            }
            While(c, body, _) => {
                f(c);
                f(body);
            }
            Switch(subject, cases, def) => {
                f(subject);
                for (vals, body) in cases {
                    vals.iter().for_each(&mut *f);
                    f(body);
                }
                if let Some(d) = def {
                    f(d);
                }
            }
            Match(subject, _, cases, def) => {
                f(subject);
                cases.iter().for_each(|c| f(&c.body));
                if let Some(d) = def {
                    f(d);
                }
            }
            Try(body, catches) => {
                f(body);
                catches.iter().for_each(|(_, _, e)| f(e));
            }
            Return(e) => {
                if let Some(e) = e {
                    f(e);
                }
            }
        }
    }

    /// Deep clone with every span rewritten to `span`; used when an inline
    /// body is spliced at a call site.
    pub fn reposition(&self, span: Span) -> TypedExpr {
        fn walk(e: &mut TypedExpr, span: Span) {
            e.span = span;
            use TExprKind::*;
            match &mut e.kind {
                Const(_) | Local(_) | EnumField(..) | TypeRef(_) | StaticField(..) | Break
                | Continue | DelayedMacro(_) => {}
                Field(c, _) | Closure(c, _) | Paren(c) | Throw(c) | Cast(c, _) => walk(c, span),
                Array(a, b) | Binop(_, a, b) => {
                    walk(a, span);
                    walk(b, span);
                }
                Unop(_, _, c) => walk(c, span),
                ObjectDecl(fields) => fields.iter_mut().for_each(|(_, c)| walk(c, span)),
                ArrayDecl(el) | Block(el) => el.iter_mut().for_each(|c| walk(c, span)),
                Call(c, args) => {
                    walk(c, span);
                    args.iter_mut().for_each(|a| walk(a, span));
                }
                New(_, _, args) => args.iter_mut().for_each(|a| walk(a, span)),
                Function(func) => walk(&mut func.body, span),
                Vars(decls) => decls
                    .iter_mut()
                    .filter_map(|(_, _, c)| c.as_mut())
                    .for_each(|c| walk(c, span)),
                For(_, _, it, body) => {
                    walk(it, span);
                    walk(body, span);
                }
                If(c, a, b) => {
                    walk(c, span);
                    walk(a, span);
                    if let Some(b) = b {
                        walk(b, span);
                    }
                }
                While(c, body, _) => {
                    walk(c, span);
                    walk(body, span);
                }
                Switch(subject, cases, def) => {
                    walk(subject, span);
                    for (vals, body) in cases {
                        vals.iter_mut().for_each(|v| walk(v, span));
                        walk(body, span);
                    }
                    if let Some(d) = def {
                        walk(d, span);
                    }
                }
                Match(subject, _, cases, def) => {
                    walk(subject, span);
                    cases.iter_mut().for_each(|c| walk(&mut c.body, span));
                    if let Some(d) = def {
                        walk(d, span);
                    }
                }
                Try(body, catches) => {
                    walk(body, span);
                    catches.iter_mut().for_each(|(_, _, c)| walk(c, span));
                }
                Return(c) => {
                    if let Some(c) = c {
                        walk(c, span);
                    }
                }
            }
        }
        let mut out = self.clone();
        walk(&mut out, span);
        out
    }
}

// ---------------------------------------------------------------------------
// Printing
// ---------------------------------------------------------------------------

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Mono(m) => match m.get() {
                Some(t) => write!(f, "{t}"),
                None => write!(f, "Unknown<{}>", m.id),
            },
            Type::Inst(c, pl) => {
                write!(f, "{}", c.borrow().path)?;
                write_type_params(f, pl)
            }
            Type::Enum(e, pl) => {
                write!(f, "{}", e.borrow().path)?;
                write_type_params(f, pl)
            }
            Type::Alias(a, pl) => {
                write!(f, "{}", a.borrow().path)?;
                write_type_params(f, pl)
            }
            Type::Fun(args, ret) => {
                write!(f, "(")?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    if a.opt {
                        write!(f, "?")?;
                    }
                    write!(f, "{}", a.ty)?;
                }
                write!(f, ") -> {ret}")
            }
            Type::Anon(a) => {
                let an = a.borrow();
                match &an.status {
                    AnonStatus::Statics(c) => write!(f, "#{}", c.borrow().path),
                    AnonStatus::EnumStatics(e) => write!(f, "#{}", e.borrow().path),
                    _ => {
                        write!(f, "{{")?;
                        for (i, field) in an.fields.iter().enumerate() {
                            if i > 0 {
                                write!(f, ",")?;
                            }
                            write!(f, " {} : {}", field.name, field.ty)?;
                        }
                        write!(f, " }}")
                    }
                }
            }
            Type::Dynamic => write!(f, "Dynamic"),
        }
    }
}

fn write_type_params(f: &mut fmt::Formatter<'_>, pl: &[Type]) -> fmt::Result {
    if pl.is_empty() {
        return Ok(());
    }
    write!(f, "<")?;
    for (i, p) in pl.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{p}")?;
    }
    write!(f, ">")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_params_substitutes_nested() {
        let tp = TypeParam::fresh("T");
        let int_t = Type::Inst(ClassDef::new(TypePath::plain("Int")), Vec::new());

        let fn_t = Type::fun(vec![FunArg::new("x", tp.ty.clone())], tp.ty.clone());
        let applied = apply_params(&[tp], &[int_t], &fn_t);
        match applied {
            Type::Fun(args, ret) => {
                assert!(matches!(&args[0].ty, Type::Inst(c, _) if c.borrow().path.name == "Int"));
                assert!(matches!(&*ret, Type::Inst(c, _) if c.borrow().path.name == "Int"));
            }
            other => panic!("expected function type, got {other}"),
        }
    }

    #[test]
    fn class_field_walks_super_chain() {
        let base = ClassDef::new(TypePath::plain("Base"));
        let int_t = Type::Inst(ClassDef::new(TypePath::plain("Int")), Vec::new());
        base.borrow_mut().fields.push(ClassField::var("x", int_t));

        let child = ClassDef::new(TypePath::plain("Child"));
        child.borrow_mut().super_class = Some((base.clone(), Vec::new()));

        let (owner, field, _) = class_field(&child, &[], "x").unwrap();
        assert!(Rc::ptr_eq(&owner, &base));
        assert_eq!(field.name, "x");
        assert!(class_field(&child, &[], "missing").is_none());
    }

    #[test]
    fn generic_field_type_applies_instance_params() {
        let cell = ClassDef::new(TypePath::plain("Cell"));
        let tp = TypeParam::fresh("T");
        cell.borrow_mut()
            .fields
            .push(ClassField::var("value", tp.ty.clone()));
        cell.borrow_mut().params.push(tp);

        let str_t = Type::Inst(ClassDef::new(TypePath::plain("String")), Vec::new());
        let (_, _, ty) = class_field(&cell, &[str_t], "value").unwrap();
        assert_eq!(ty.to_string(), "String");
    }

    #[test]
    fn extends_is_reflexive_and_transitive() {
        let a = ClassDef::new(TypePath::plain("A"));
        let b = ClassDef::new(TypePath::plain("B"));
        let c = ClassDef::new(TypePath::plain("C"));
        b.borrow_mut().super_class = Some((a.clone(), Vec::new()));
        c.borrow_mut().super_class = Some((b.clone(), Vec::new()));
        assert!(extends(&a, &a));
        assert!(extends(&c, &a));
        assert!(!extends(&a, &c));
    }

    #[test]
    fn native_name_first_occurrence_wins() {
        let c = ClassDef::new(TypePath::plain("C"));
        c.borrow_mut().set_native_name("first");
        c.borrow_mut().set_native_name("second");
        assert_eq!(c.borrow().native_name.as_deref(), Some("first"));
    }

    #[test]
    fn reposition_rewrites_all_spans() {
        let span0 = Span::default();
        let inner = TypedExpr::new(TExprKind::Const(TConst::Int(1)), Type::Dynamic, span0);
        let e = TypedExpr::new(TExprKind::Paren(Box::new(inner)), Type::Dynamic, span0);
        let target = Span::new(10, 12, 3);
        let moved = e.reposition(target);
        assert_eq!(moved.span, target);
        moved.visit_children(&mut |c| assert_eq!(c.span, target));
    }
}
