// src/sema/typer/tests.rs

use std::rc::Rc;

use crate::errors::TypeErrorKind;
use crate::frontend::{
    Binop, Catch, Constant, Expr, ExprKind, FunArgDecl, FunctionDecl, Span, SwitchCase, TypeHint,
    TypePathHint, Unop, UnopFlag, VarDecl, WhileFlag,
};
use crate::module::stdlib::{self, demo_option_enum};
use crate::sema::context::{Config, Platform, Typer};
use crate::sema::typer::macros::{MacroInterp, MacroValue, encode_expr};
use crate::sema::types::{
    BuildState, ClassDef, ClassField, ClassRef, FieldKind, FunArg, MethodKind, TConst, TExprKind,
    TFunction, Type, TypeDecl, TypePath, TypedExpr, VarAccess,
};
use crate::sema::unify::follow;
use crate::sema::Interrupt;

// -- AST builders -----------------------------------------------------------

fn sp(n: u32) -> Span {
    Span::new(n, n + 1, 1)
}

fn ident(name: &str) -> Expr {
    Expr::new(ExprKind::Const(Constant::Ident(name.to_string())), sp(0))
}

fn ident_at(name: &str, n: u32) -> Expr {
    Expr::new(ExprKind::Const(Constant::Ident(name.to_string())), sp(n))
}

fn int(v: i64) -> Expr {
    Expr::new(ExprKind::Const(Constant::Int(v)), sp(0))
}

fn float(v: f64) -> Expr {
    Expr::new(ExprKind::Const(Constant::Float(v)), sp(0))
}

fn str_(v: &str) -> Expr {
    Expr::new(ExprKind::Const(Constant::Str(v.to_string())), sp(0))
}

fn field(obj: Expr, name: &str) -> Expr {
    Expr::new(ExprKind::Field(Box::new(obj), name.to_string()), sp(0))
}

fn call(callee: Expr, args: Vec<Expr>) -> Expr {
    Expr::new(ExprKind::Call(Box::new(callee), args), sp(0))
}

fn binop(op: Binop, a: Expr, b: Expr) -> Expr {
    Expr::new(ExprKind::Binop(op, Box::new(a), Box::new(b)), sp(0))
}

fn typer() -> Typer {
    Typer::with_core(Config::default()).unwrap()
}

fn typer_on(platform: Platform) -> Typer {
    Typer::with_core(Config {
        platform,
        ..Config::default()
    })
    .unwrap()
}

/// Count nodes in a typed tree satisfying the predicate.
fn count_nodes(e: &TypedExpr, pred: &mut impl FnMut(&TypedExpr) -> bool) -> usize {
    let mut n = usize::from(pred(e));
    e.visit_children(&mut |c| n += count_nodes(c, &mut *pred));
    n
}

fn err_message(result: crate::sema::TypeResult<TypedExpr>) -> String {
    match result {
        Err(Interrupt::Error(e)) => e.kind.to_string(),
        Err(other) => panic!("expected an error, got signal {other:?}"),
        Ok(e) => panic!("expected an error, typed as {}", e.ty),
    }
}

// -- fixtures ---------------------------------------------------------------

/// `class C { var x(get_x, set_x) : Int; function get_x() : Int;
/// function set_x(value : Int) : Int; }`
fn property_class(t: &Typer) -> ClassRef {
    let c = ClassDef::new(TypePath::plain("C"));
    let tint = t.t.int.clone();
    {
        let mut def = c.borrow_mut();
        def.fields.push(ClassField::new(
            "x",
            tint.clone(),
            FieldKind::property(
                VarAccess::Call("get_x".to_string()),
                VarAccess::Call("set_x".to_string()),
            ),
        ));
        def.fields
            .push(ClassField::method("get_x", Vec::new(), tint.clone()));
        def.fields.push(ClassField::method(
            "set_x",
            vec![FunArg::new("value", tint.clone())],
            tint.clone(),
        ));
    }
    c
}

/// `class Tools { static function len(s : String) : Int; }`
fn tools_class(t: &Typer) -> ClassRef {
    let c = ClassDef::new(TypePath::plain("Tools"));
    c.borrow_mut().statics.push(ClassField::method(
        "len",
        vec![FunArg::new("s", t.t.string.clone())],
        t.t.int.clone(),
    ));
    c
}

// -- S1: property setter rewrites compound assign ---------------------------

#[test]
fn compound_assign_through_setter_evaluates_receiver_once() {
    let mut t = typer();
    let c = property_class(&t);
    t.add_local("obj", Type::Inst(c, Vec::new()));

    let e = binop(
        Binop::AssignOp(Box::new(Binop::Add)),
        field(ident("obj"), "x"),
        int(1),
    );
    let typed = t.type_expr(&e, true).unwrap();

    // {var _g = obj; _g.set_x(_g.get_x() + 1)}
    let TExprKind::Block(stmts) = &typed.kind else {
        panic!("expected a block, got {:?}", typed.kind);
    };
    assert_eq!(stmts.len(), 2);
    assert!(matches!(stmts[0].kind, TExprKind::Vars(_)));
    let obj_reads = count_nodes(&typed, &mut |e| {
        matches!(&e.kind, TExprKind::Local(n) if n == "obj")
    });
    assert_eq!(obj_reads, 1, "receiver must be evaluated exactly once");

    let setter_calls = count_nodes(&typed, &mut |e| {
        matches!(&e.kind, TExprKind::Call(callee, _)
            if matches!(&callee.kind, TExprKind::Field(_, n) if n == "set_x"))
    });
    let getter_calls = count_nodes(&typed, &mut |e| {
        matches!(&e.kind, TExprKind::Call(callee, _)
            if matches!(&callee.kind, TExprKind::Field(_, n) if n == "get_x"))
    });
    assert_eq!((setter_calls, getter_calls), (1, 1));
    assert_eq!(typed.ty.to_string(), "Int");
}

#[test]
fn plain_assign_through_setter_becomes_setter_call() {
    let mut t = typer();
    let c = property_class(&t);
    t.add_local("obj", Type::Inst(c, Vec::new()));

    let e = binop(Binop::Assign, field(ident("obj"), "x"), int(3));
    let typed = t.type_expr(&e, true).unwrap();
    assert!(matches!(&typed.kind, TExprKind::Call(callee, args)
        if args.len() == 1 && matches!(&callee.kind, TExprKind::Field(_, n) if n == "set_x")));
}

#[test]
fn accessor_body_reads_raw_slot() {
    let mut t = typer();
    let c = property_class(&t);
    t.curclass = Some(c.clone());
    t.tthis = Type::Inst(c, Vec::new());
    t.curmethod = "get_x".to_string();

    // Inside get_x, `x` resolves to the raw slot, not to a recursive call.
    let typed = t.type_expr(&ident("x"), true).unwrap();
    assert!(matches!(&typed.kind, TExprKind::Field(recv, n)
        if n == "x" && matches!(recv.kind, TExprKind::Const(TConst::This))));
}

// -- S2: using-extension discovery ------------------------------------------

#[test]
fn using_extension_resolves_first_match() {
    let mut t = typer();
    let tools = tools_class(&t);
    t.local_using.push(tools.clone());

    let e = call(field(str_("abc"), "len"), Vec::new());
    let typed = t.type_expr(&e, true).unwrap();
    assert_eq!(typed.ty.to_string(), "Int");
    let TExprKind::Call(callee, args) = &typed.kind else {
        panic!("expected a call");
    };
    assert!(matches!(&callee.kind, TExprKind::StaticField(c, n)
        if n == "len" && Rc::ptr_eq(c, &tools)));
    assert_eq!(args.len(), 1);
    assert!(matches!(args[0].kind, TExprKind::Const(TConst::Str(_))));
}

#[test]
fn missing_using_clause_fails_at_the_field() {
    let mut t = typer();
    let e = call(field(str_("abc"), "len"), Vec::new());
    let msg = err_message(t.type_expr(&e, true));
    assert!(msg.contains("len"), "diagnostic should name the field: {msg}");
}

#[test]
fn using_reading_without_call_eta_expands() {
    let mut t = typer();
    t.local_using.push(tools_class(&t));

    let typed = t.type_expr(&field(str_("abc"), "len"), true).unwrap();
    // fun e -> fun () -> Tools.len(e), applied to "abc": the value read is
    // the inner closure type.
    assert_eq!(typed.ty.to_string(), "() -> Int");
    assert!(matches!(&typed.kind, TExprKind::Call(outer, args)
        if args.len() == 1 && matches!(outer.kind, TExprKind::Function(_))));
}

#[test]
fn using_order_is_declaration_order() {
    let mut t = typer();
    let first = tools_class(&t);
    let second = ClassDef::new(TypePath::plain("MoreTools"));
    second.borrow_mut().statics.push(ClassField::method(
        "len",
        vec![FunArg::new("s", t.t.string.clone())],
        t.t.float.clone(),
    ));
    t.local_using.push(first.clone());
    t.local_using.push(second);

    let typed = t
        .type_expr(&call(field(str_("abc"), "len"), Vec::new()), true)
        .unwrap();
    // First declaration wins even though both candidates match.
    assert_eq!(typed.ty.to_string(), "Int");
}

// -- S3: optional-argument skip ---------------------------------------------

#[test]
fn optional_argument_skip_fills_default() {
    let mut t = typer();
    let f_ty = Type::fun(
        vec![
            FunArg::new("a", t.t.int.clone()),
            FunArg::optional("b", t.t.string.clone()),
            FunArg::new("c", t.t.int.clone()),
        ],
        t.t.void.clone(),
    );
    t.add_local("f", f_ty);

    let typed = t
        .type_expr(&call(ident("f"), vec![int(1), int(3)]), true)
        .unwrap();
    let TExprKind::Call(_, args) = &typed.kind else {
        panic!("expected a call");
    };
    assert_eq!(args.len(), 3);
    assert!(matches!(args[0].kind, TExprKind::Const(TConst::Int(1))));
    assert!(args[1].is_null_const(), "skipped optional becomes null");
    assert!(matches!(args[2].kind, TExprKind::Const(TConst::Int(3))));
}

#[test]
fn missing_required_argument_is_not_enough() {
    let mut t = typer();
    let f_ty = Type::fun(
        vec![
            FunArg::new("a", t.t.int.clone()),
            FunArg::optional("b", t.t.string.clone()),
            FunArg::new("c", t.t.int.clone()),
        ],
        t.t.void.clone(),
    );
    t.add_local("f", f_ty);

    let msg = err_message(t.type_expr(&call(ident("f"), vec![int(1), str_("x")]), true));
    assert!(msg.contains("Not enough"), "got: {msg}");
}

#[test]
fn single_skip_overflow_surfaces_the_skip_error() {
    let mut t = typer();
    let f_ty = Type::fun(
        vec![
            FunArg::new("a", t.t.int.clone()),
            FunArg::optional("b", t.t.string.clone()),
        ],
        t.t.void.clone(),
    );
    t.add_local("f", f_ty);

    let msg = err_message(t.type_expr(&call(ident("f"), vec![int(1), int(2)]), true));
    assert!(
        msg.contains("optional function argument 'b'"),
        "got: {msg}"
    );
}

#[test]
fn trailing_null_trimmed_on_flash() {
    let e = call(ident("f"), vec![int(1)]);
    let f_args = |t: &Typer| {
        Type::fun(
            vec![
                FunArg::new("a", t.t.int.clone()),
                FunArg::optional("b", t.t.string.clone()),
            ],
            t.t.void.clone(),
        )
    };

    let mut flash = typer_on(Platform::Flash8);
    let ty = f_args(&flash);
    flash.add_local("f", ty);
    let typed = flash.type_expr(&e, true).unwrap();
    let TExprKind::Call(_, args) = &typed.kind else {
        panic!()
    };
    assert_eq!(args.len(), 1, "trailing null dropped on flash");

    let mut interp = typer();
    let ty = f_args(&interp);
    interp.add_local("f", ty);
    let typed = interp.type_expr(&e, true).unwrap();
    let TExprKind::Call(_, args) = &typed.kind else {
        panic!()
    };
    assert_eq!(args.len(), 2, "null kept elsewhere");
}

#[test]
fn pos_infos_default_synthesizes_call_site_record() {
    let mut t = typer();
    t.file = "Main.st".to_string();
    t.curmethod = "run".to_string();

    let typed = t
        .type_expr(&call(field(ident("Log"), "trace"), vec![int(1)]), true)
        .unwrap();
    let TExprKind::Call(_, args) = &typed.kind else {
        panic!()
    };
    assert_eq!(args.len(), 2);
    let TExprKind::ObjectDecl(fields) = &args[1].kind else {
        panic!("expected a position-info record, got {:?}", args[1].kind);
    };
    let names: Vec<&str> = fields.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(
        names,
        vec!["fileName", "lineNumber", "className", "methodName"]
    );
    assert!(matches!(&fields[0].1.kind,
        TExprKind::Const(TConst::Str(s)) if s == "Main.st"));
}

// -- S4: enum exhaustiveness ------------------------------------------------

fn option_int_subject(t: &mut Typer) -> crate::sema::types::EnumRef {
    let option = demo_option_enum();
    t.local_types.push(TypeDecl::Enum(option.clone()));
    t.add_local("opt", Type::Enum(option.clone(), vec![t.t.int.clone()]));
    option
}

fn switch_expr(cases: Vec<SwitchCase>, default: Option<Vec<Expr>>) -> Expr {
    Expr::new(
        ExprKind::Switch(Box::new(ident("opt")), cases, default),
        sp(0),
    )
}

#[test]
fn enum_match_binds_and_types_to_argument_type() {
    let mut t = typer();
    let option = option_int_subject(&mut t);

    let e = switch_expr(
        vec![
            SwitchCase {
                values: vec![call(ident("Some"), vec![ident("v")])],
                body: vec![ident("v")],
            },
            SwitchCase {
                values: vec![ident("None")],
                body: vec![int(0)],
            },
        ],
        None,
    );
    let typed = t.type_expr(&e, true).unwrap();
    assert_eq!(typed.ty.to_string(), "Int");
    let TExprKind::Match(_, en, cases, default) = &typed.kind else {
        panic!("expected a match, got {:?}", typed.kind);
    };
    assert!(Rc::ptr_eq(en, &option));
    assert!(default.is_none());
    assert_eq!(cases[0].indices, vec![0]);
    let bindings = cases[0].bindings.as_ref().unwrap();
    assert_eq!(bindings.len(), 1);
    let (name, ty) = bindings[0].as_ref().unwrap();
    assert_eq!(name, "v");
    assert_eq!(follow(ty).to_string(), "Int");
    assert_eq!(cases[1].indices, vec![1]);
}

#[test]
fn missing_constructor_is_reported() {
    let mut t = typer();
    option_int_subject(&mut t);

    let e = switch_expr(
        vec![SwitchCase {
            values: vec![call(ident("Some"), vec![ident("v")])],
            body: vec![ident("v")],
        }],
        None,
    );
    let msg = err_message(t.type_expr(&e, true));
    assert_eq!(msg, "Some constructors are not matched: None");
}

#[test]
fn wildcard_pattern_binds_nothing() {
    let mut t = typer();
    option_int_subject(&mut t);

    let e = switch_expr(
        vec![SwitchCase {
            values: vec![call(ident("Some"), vec![ident("_")])],
            body: vec![int(1)],
        }],
        Some(vec![int(0)]),
    );
    let typed = t.type_expr(&e, true).unwrap();
    let TExprKind::Match(_, _, cases, default) = &typed.kind else {
        panic!()
    };
    assert!(cases[0].bindings.as_ref().unwrap()[0].is_none());
    assert!(default.is_some());
}

#[test]
fn duplicate_constructor_is_rejected() {
    let mut t = typer();
    option_int_subject(&mut t);

    let e = switch_expr(
        vec![
            SwitchCase {
                values: vec![ident("None")],
                body: vec![int(1)],
            },
            SwitchCase {
                values: vec![ident("None")],
                body: vec![int(2)],
            },
        ],
        None,
    );
    let msg = err_message(t.type_expr(&e, true));
    assert!(msg.contains("already been used"), "got: {msg}");
}

#[test]
fn value_switch_rejects_constructor_pattern() {
    let mut t = typer();
    let option = demo_option_enum();
    t.local_types.push(TypeDecl::Enum(option));
    t.add_local("opt", Type::Dynamic);

    let e = switch_expr(
        vec![
            SwitchCase {
                values: vec![int(1)],
                body: vec![int(1)],
            },
            SwitchCase {
                values: vec![ident("None")],
                body: vec![int(2)],
            },
        ],
        None,
    );
    let msg = err_message(t.type_expr(&e, true));
    assert!(msg.contains("value switch"), "got: {msg}");
}

#[test]
fn value_switch_rejects_duplicate_constants() {
    let mut t = typer();
    t.add_local("opt", t.t.int.clone());
    let e = switch_expr(
        vec![
            SwitchCase {
                values: vec![int(1)],
                body: vec![int(1)],
            },
            SwitchCase {
                values: vec![int(1)],
                body: vec![int(2)],
            },
        ],
        None,
    );
    let msg = err_message(t.type_expr(&e, true));
    assert!(msg.contains("Duplicate case value"), "got: {msg}");
}

// -- S5: inline closure -----------------------------------------------------

#[test]
fn reading_inline_method_lowers_to_closure() {
    let mut t = typer();
    let c = ClassDef::new(TypePath::plain("Machine"));
    let m_ty = Type::fun(Vec::new(), t.t.int.clone());
    let m = ClassField::new("speed", m_ty.clone(), FieldKind::Method(MethodKind::Inline));
    // The stored body is a function; reading without calling must produce a
    // closure, not an expansion.
    *m.expr.borrow_mut() = Some(TypedExpr::new(
        TExprKind::Function(TFunction {
            args: Vec::new(),
            ret: t.t.int.clone(),
            body: Box::new(TypedExpr::new(
                TExprKind::Const(TConst::Int(1)),
                t.t.int.clone(),
                sp(0),
            )),
        }),
        m_ty.clone(),
        sp(0),
    ));
    c.borrow_mut().fields.push(m);
    t.add_local("obj", Type::Inst(c, Vec::new()));

    let typed = t.type_expr(&field(ident("obj"), "speed"), true).unwrap();
    assert!(matches!(&typed.kind, TExprKind::Closure(_, n) if n == "speed"));
    assert_eq!(typed.ty.to_string(), "() -> Int");
}

#[test]
fn reading_inline_variable_splices_body_at_call_site() {
    let mut t = typer();
    let c = ClassDef::new(TypePath::plain("Config"));
    let k = ClassField::new(
        "version",
        t.t.int.clone(),
        FieldKind::Var {
            read: VarAccess::Inline,
            write: VarAccess::Never,
        },
    );
    *k.expr.borrow_mut() = Some(TypedExpr::new(
        TExprKind::Const(TConst::Int(7)),
        t.t.int.clone(),
        Span::new(100, 101, 42),
    ));
    c.borrow_mut().fields.push(k);
    t.add_local("cfg", Type::Inst(c, Vec::new()));

    let read = Expr::new(
        ExprKind::Field(Box::new(ident("cfg")), "version".to_string()),
        Span::new(5, 10, 2),
    );
    let typed = t.type_expr(&read, true).unwrap();
    assert!(matches!(typed.kind, TExprKind::Const(TConst::Int(7))));
    assert_eq!(typed.span, Span::new(5, 10, 2), "spans rewritten to call site");
}

#[test]
fn no_inline_degrades_inline_method_to_plain_call() {
    let mut t = Typer::with_core(Config {
        no_inline: true,
        ..Config::default()
    })
    .unwrap();
    let c = ClassDef::new(TypePath::plain("Machine"));
    c.borrow_mut().fields.push(ClassField::new(
        "speed",
        Type::fun(Vec::new(), t.t.int.clone()),
        FieldKind::Method(MethodKind::Inline),
    ));
    t.add_local("obj", Type::Inst(c, Vec::new()));

    let typed = t
        .type_expr(&call(field(ident("obj"), "speed"), Vec::new()), true)
        .unwrap();
    assert!(matches!(&typed.kind, TExprKind::Call(callee, _)
        if matches!(&callee.kind, TExprKind::Field(_, n) if n == "speed")));
}

// -- S6: static cycle detection ---------------------------------------------

#[test]
fn mutually_recursive_statics_complete_without_hanging() {
    let a = ClassDef::new(TypePath::plain("A"));
    let b = ClassDef::new(TypePath::plain("B"));

    let a_static = ClassField::var("x", Type::Dynamic);
    *a_static.expr.borrow_mut() = Some(TypedExpr::new(
        TExprKind::StaticField(b.clone(), "y".to_string()),
        Type::Dynamic,
        sp(0),
    ));
    a.borrow_mut().statics.push(a_static);

    let b_static = ClassField::var("y", Type::Dynamic);
    *b_static.expr.borrow_mut() = Some(TypedExpr::new(
        TExprKind::StaticField(a.clone(), "x".to_string()),
        Type::Dynamic,
        sp(0),
    ));
    b.borrow_mut().statics.push(b_static);

    let mut loader = stdlib::core_loader();
    loader.register_type(TypeDecl::Class(a.clone()));
    loader.register_type(TypeDecl::Class(b.clone()));

    let mut t = Typer::new(Config::default(), Rc::new(loader)).unwrap();
    t.load_module("A", sp(0)).unwrap();
    t.load_module("B", sp(0)).unwrap();
    let (types, modules) = t.generate(None, &[]).unwrap();

    assert_eq!(a.borrow().build_state, BuildState::Done);
    assert_eq!(b.borrow().build_state, BuildState::Done);
    let names: Vec<String> = types.iter().map(|d| d.name()).collect();
    assert!(names.contains(&"A".to_string()));
    assert!(names.contains(&"B".to_string()));
    let module_paths: Vec<&str> = modules.iter().map(|m| m.path.as_str()).collect();
    assert!(module_paths.contains(&"A"));
    assert!(module_paths.contains(&"B"));
}

#[test]
fn generate_synthesizes_main_entry() {
    let mut loader = stdlib::core_loader();
    let main_c = ClassDef::new(TypePath::plain("Main"));
    {
        let m = ClassField::method("main", Vec::new(), Type::Dynamic);
        main_c.borrow_mut().statics.push(m);
    }
    loader.register_type(TypeDecl::Class(main_c));

    let mut t = Typer::new(Config::default(), Rc::new(loader)).unwrap();
    let (types, _) = t.generate(Some("Main"), &[]).unwrap();
    let last = types.last().unwrap();
    assert_eq!(last.name(), "@Main");
    let TypeDecl::Class(entry) = last else { panic!() };
    assert!(entry.borrow().init.is_some());
}

#[test]
fn excluded_types_become_extern_with_dropped_init() {
    let mut loader = stdlib::core_loader();
    let c = ClassDef::new(TypePath::plain("Gen"));
    c.borrow_mut().init = Some(TypedExpr::new(
        TExprKind::Const(TConst::Int(1)),
        Type::Dynamic,
        sp(0),
    ));
    loader.register_type(TypeDecl::Class(c.clone()));

    let mut t = Typer::new(Config::default(), Rc::new(loader)).unwrap();
    t.load_module("Gen", sp(0)).unwrap();
    t.generate(None, &[TypePath::plain("Gen")]).unwrap();
    assert!(c.borrow().is_extern);
    assert!(c.borrow().init.is_none());
}

#[test]
fn finalize_runs_delayed_tasks_to_fixpoint() {
    use std::cell::Cell;
    let mut t = typer();
    let count = Rc::new(Cell::new(0));
    let c1 = count.clone();
    t.delay(Box::new(move |typer| {
        c1.set(c1.get() + 1);
        let c2 = c1.clone();
        // Draining may enqueue more work; the loop must reach it.
        typer.delay(Box::new(move |_| {
            c2.set(c2.get() + 1);
            Ok(())
        }));
        Ok(())
    }));
    t.finalize().unwrap();
    assert_eq!(count.get(), 2);
    // Re-running on a finalized context is a no-op.
    t.finalize().unwrap();
    assert_eq!(count.get(), 2);
}

// -- operators --------------------------------------------------------------

#[test]
fn add_kind_table_is_commutative_for_numerics() {
    let mut t = typer();
    let a = t.type_expr(&binop(Binop::Add, int(1), float(2.0)), true).unwrap();
    let b = t.type_expr(&binop(Binop::Add, float(2.0), int(1)), true).unwrap();
    assert_eq!(a.ty.to_string(), "Float");
    assert_eq!(b.ty.to_string(), "Float");
    let c = t.type_expr(&binop(Binop::Add, int(1), int(2)), true).unwrap();
    assert_eq!(c.ty.to_string(), "Int");
}

#[test]
fn string_concat_wins_either_side() {
    let mut t = typer();
    let a = t.type_expr(&binop(Binop::Add, int(1), str_("x")), true).unwrap();
    assert_eq!(a.ty.to_string(), "String");
    let b = t.type_expr(&binop(Binop::Add, str_("x"), int(1)), true).unwrap();
    assert_eq!(b.ty.to_string(), "String");
}

#[test]
fn unknown_operand_pins_to_int() {
    let mut t = typer();
    t.add_local("m", Type::mono());
    let e = t.type_expr(&binop(Binop::Add, ident("m"), int(1)), true).unwrap();
    assert_eq!(e.ty.to_string(), "Int");
    assert_eq!(follow(&t.local_type("m").unwrap()).to_string(), "Int");
}

#[test]
fn division_always_yields_float() {
    let mut t = typer();
    let e = t.type_expr(&binop(Binop::Div, int(4), int(2)), true).unwrap();
    assert_eq!(e.ty.to_string(), "Float");
    let m = t.type_expr(&binop(Binop::Mod, int(4), int(2)), true).unwrap();
    assert_eq!(m.ty.to_string(), "Int");
}

#[test]
fn cannot_add_incompatible_kinds() {
    let mut t = typer();
    t.add_local("flag", t.t.bool_.clone());
    let msg = err_message(t.type_expr(&binop(Binop::Add, ident("flag"), int(1)), true));
    assert!(msg.contains("Cannot add"), "got: {msg}");
}

#[test]
fn comparison_requires_compatible_kinds() {
    let mut t = typer();
    let ok = t.type_expr(&binop(Binop::Lt, int(1), float(2.0)), true).unwrap();
    assert_eq!(ok.ty.to_string(), "Bool");
    let ok = t
        .type_expr(&binop(Binop::Gte, str_("a"), str_("b")), true)
        .unwrap();
    assert_eq!(ok.ty.to_string(), "Bool");
    let msg = err_message(t.type_expr(&binop(Binop::Lt, str_("a"), int(1)), true));
    assert!(msg.contains("Cannot compare"), "got: {msg}");
}

#[test]
fn interval_builds_range_iterator_instance() {
    let mut t = typer();
    let e = t
        .type_expr(&binop(Binop::Interval, int(0), int(5)), true)
        .unwrap();
    assert!(matches!(&e.kind, TExprKind::New(c, _, args)
        if c.borrow().path.name == "IntIter" && args.len() == 2));
    assert_eq!(e.ty.to_string(), "IntIter");
}

#[test]
fn equality_unifies_either_direction() {
    let mut t = typer();
    t.add_local("m", Type::mono());
    let e = t.type_expr(&binop(Binop::Eq, ident("m"), str_("x")), true).unwrap();
    assert_eq!(e.ty.to_string(), "Bool");
    assert_eq!(follow(&t.local_type("m").unwrap()).to_string(), "String");
}

#[test]
fn postfix_increment_on_property_captures_pre_value() {
    let mut t = typer();
    let c = property_class(&t);
    t.add_local("obj", Type::Inst(c, Vec::new()));

    let e = Expr::new(
        ExprKind::Unop(
            Unop::Increment,
            UnopFlag::Postfix,
            Box::new(field(ident("obj"), "x")),
        ),
        sp(0),
    );
    let typed = t.type_expr(&e, true).unwrap();
    let TExprKind::Block(stmts) = &typed.kind else {
        panic!("expected a block")
    };
    // {var recv; var pre = recv.get_x(); recv.set_x(pre + 1); pre}
    assert_eq!(stmts.len(), 4);
    assert!(matches!(stmts[3].kind, TExprKind::Local(_)));
    let obj_reads = count_nodes(&typed, &mut |e| {
        matches!(&e.kind, TExprKind::Local(n) if n == "obj")
    });
    assert_eq!(obj_reads, 1);
}

#[test]
fn not_requires_bool() {
    let mut t = typer();
    let ok = t
        .type_expr(
            &Expr::new(
                ExprKind::Unop(Unop::Not, UnopFlag::Prefix, Box::new(ident("true"))),
                sp(0),
            ),
            true,
        )
        .unwrap();
    assert_eq!(ok.ty.to_string(), "Bool");
    assert!(
        t.type_expr(
            &Expr::new(
                ExprKind::Unop(Unop::Not, UnopFlag::Prefix, Box::new(int(1))),
                sp(0),
            ),
            true,
        )
        .is_err()
    );
}

// -- access resolution ------------------------------------------------------

#[test]
fn lookup_prefers_locals_over_members() {
    let mut t = typer();
    let c = ClassDef::new(TypePath::plain("Host"));
    c.borrow_mut()
        .fields
        .push(ClassField::var("v", t.t.int.clone()));
    t.curclass = Some(c.clone());
    t.tthis = Type::Inst(c, Vec::new());

    // Member when no local is in scope.
    let member = t.type_expr(&ident("v"), true).unwrap();
    assert!(matches!(member.kind, TExprKind::Field(..)));

    // The local shadows the member.
    t.add_local("v", t.t.string.clone());
    let local = t.type_expr(&ident("v"), true).unwrap();
    assert!(matches!(local.kind, TExprKind::Local(_)));
    assert_eq!(local.ty.to_string(), "String");
}

#[test]
fn static_field_path_resolves_through_type() {
    let mut t = typer();
    let s = ClassDef::new(TypePath::plain("Counter"));
    s.borrow_mut()
        .statics
        .push(ClassField::var("count", t.t.int.clone()));
    t.local_types.push(TypeDecl::Class(s.clone()));

    let read = t.type_expr(&field(ident("Counter"), "count"), true).unwrap();
    assert!(matches!(&read.kind, TExprKind::StaticField(c, n)
        if n == "count" && Rc::ptr_eq(c, &s)));

    let write = t
        .type_expr(
            &binop(Binop::Assign, field(ident("Counter"), "count"), int(2)),
            true,
        )
        .unwrap();
    assert!(matches!(write.kind, TExprKind::Binop(Binop::Assign, ..)));
}

#[test]
fn unknown_identifier_is_reported() {
    let mut t = typer();
    let err = t.type_expr(&ident("nope"), true);
    assert!(matches!(
        err,
        Err(Interrupt::Error(e)) if matches!(e.kind, TypeErrorKind::UnknownIdent { .. })
    ));
}

#[test]
fn unknown_dotted_path_reports_module_not_found() {
    let mut t = typer();
    let e = field(
        field(ident_at("miss", 3), "Cap"),
        "x",
    );
    let err = t.type_expr(&e, true);
    match err {
        Err(Interrupt::Error(te)) => match te.kind {
            TypeErrorKind::ModuleNotFound { path, name, .. } => {
                assert_eq!(path, "miss.Cap");
                assert_eq!(name, "Cap");
            }
            other => panic!("expected ModuleNotFound, got {other}"),
        },
        other => panic!("expected an error, got {other:?}"),
    }
}

#[test]
fn untyped_invents_placeholder_locals() {
    let mut t = typer();
    let e = Expr::new(ExprKind::Untyped(Box::new(ident("whatever"))), sp(0));
    let typed = t.type_expr(&e, true).unwrap();
    assert!(matches!(typed.kind, TExprKind::Local(_)));
    assert!(matches!(follow(&typed.ty), Type::Mono(_)));
}

#[test]
fn this_is_rejected_in_static_context() {
    let mut t = typer();
    t.curclass = Some(ClassDef::new(TypePath::plain("Host")));
    t.in_static = true;
    let msg = err_message(t.type_expr(&ident("this"), true));
    assert!(msg.contains("static"), "got: {msg}");
}

#[test]
fn keywords_cannot_be_assigned() {
    let mut t = typer();
    let msg = err_message(t.type_expr(&binop(Binop::Assign, ident("null"), int(1)), true));
    assert!(msg.contains("cannot be accessed for writing"), "got: {msg}");
}

#[test]
fn array_subscript_uses_array_access_metadata() {
    let mut t = typer();
    let arr_t = t.t.tarray(t.t.string.clone());
    t.add_local("xs", arr_t);
    let e = Expr::new(
        ExprKind::Array(Box::new(ident("xs")), Box::new(int(0))),
        sp(0),
    );
    let typed = t.type_expr(&e, true).unwrap();
    assert_eq!(typed.ty.to_string(), "String");

    // Non-integer index is rejected.
    let bad = Expr::new(
        ExprKind::Array(Box::new(ident("xs")), Box::new(str_("k"))),
        sp(0),
    );
    assert!(t.type_expr(&bad, true).is_err());
}

#[test]
fn subscript_on_unknown_receiver_infers_array() {
    let mut t = typer();
    t.add_local("xs", Type::mono());
    let e = Expr::new(
        ExprKind::Array(Box::new(ident("xs")), Box::new(int(0))),
        sp(0),
    );
    let typed = t.type_expr(&e, true).unwrap();
    assert!(matches!(follow(&typed.ty), Type::Mono(_)));
    assert!(
        follow(&t.local_type("xs").unwrap())
            .to_string()
            .starts_with("Array<")
    );
}

#[test]
fn reading_read_only_function_field_yields_closure() {
    let mut t = typer();
    let c = ClassDef::new(TypePath::plain("Handler"));
    c.borrow_mut().fields.push(ClassField::new(
        "cb",
        Type::fun(Vec::new(), t.t.int.clone()),
        FieldKind::Var {
            read: VarAccess::Normal,
            write: VarAccess::Never,
        },
    ));
    t.add_local("h", Type::Inst(c, Vec::new()));
    let typed = t.type_expr(&field(ident("h"), "cb"), true).unwrap();
    assert!(matches!(&typed.kind, TExprKind::Closure(_, n) if n == "cb"));
}

#[test]
fn shadowed_local_gets_renamed() {
    let mut t = typer();
    let e = Expr::new(
        ExprKind::Block(vec![
            Expr::new(
                ExprKind::Vars(vec![VarDecl {
                    name: "x".to_string(),
                    hint: None,
                    init: Some(int(1)),
                }]),
                sp(0),
            ),
            Expr::new(
                ExprKind::Vars(vec![VarDecl {
                    name: "x".to_string(),
                    hint: None,
                    init: Some(str_("s")),
                }]),
                sp(0),
            ),
            ident("x"),
        ]),
        sp(0),
    );
    let typed = t.type_expr(&e, true).unwrap();
    let TExprKind::Block(stmts) = &typed.kind else { panic!() };
    // The trailing read sees the innermost binding under its fresh name.
    assert!(matches!(&stmts[2].kind, TExprKind::Local(n) if n == "x1"));
    assert_eq!(stmts[2].ty.to_string(), "String");
}

// -- control flow -----------------------------------------------------------

#[test]
fn block_recovers_per_statement() {
    let mut t = typer();
    let e = Expr::new(
        ExprKind::Block(vec![ident("ghost1"), ident("ghost2"), int(3)]),
        sp(0),
    );
    let typed = t.type_expr(&e, true).unwrap();
    assert_eq!(typed.ty.to_string(), "Int");
    assert_eq!(t.errors().len(), 2, "both bad statements reported");
}

#[test]
fn if_without_else_is_void() {
    let mut t = typer();
    let e = Expr::new(
        ExprKind::If(Box::new(ident("true")), Box::new(int(1)), None),
        sp(0),
    );
    let typed = t.type_expr(&e, true).unwrap();
    assert_eq!(typed.ty.to_string(), "Void");
}

#[test]
fn ternary_null_lifts_to_nullable_on_value_platforms() {
    let make = |t: &mut Typer| {
        let e = Expr::new(
            ExprKind::Ternary(
                Box::new(ident("true")),
                Box::new(str_("a")),
                Box::new(ident("null")),
            ),
            sp(0),
        );
        t.type_expr(&e, true).unwrap().ty.to_string()
    };
    let mut value_typed = typer_on(Platform::Flash9);
    assert_eq!(make(&mut value_typed), "Null<String>");
    let mut reference_typed = typer();
    assert_eq!(make(&mut reference_typed), "String");
}

#[test]
fn break_outside_loop_is_rejected() {
    let mut t = typer();
    let msg = err_message(t.type_expr(&Expr::new(ExprKind::Break, sp(0)), true));
    assert!(msg.contains("Break outside loop"), "got: {msg}");
    let inside = Expr::new(
        ExprKind::While(
            Box::new(ident("true")),
            Box::new(Expr::new(ExprKind::Break, sp(0))),
            WhileFlag::NormalWhile,
        ),
        sp(0),
    );
    assert!(t.type_expr(&inside, false).is_ok());
}

#[test]
fn for_loop_synthesizes_iterator_call() {
    let mut t = typer();
    t.add_local("xs", t.t.tarray(t.t.int.clone()));
    let e = Expr::new(
        ExprKind::For(
            "v".to_string(),
            Box::new(ident("xs")),
            Box::new(binop(Binop::Add, ident("v"), int(1))),
        ),
        sp(0),
    );
    let typed = t.type_expr(&e, false).unwrap();
    let TExprKind::For(name, elem, it, _) = &typed.kind else {
        panic!("expected a for loop")
    };
    assert_eq!(name, "v");
    assert_eq!(follow(elem).to_string(), "Int");
    assert!(matches!(it.kind, TExprKind::Call(..)), "iterator() call");
}

#[test]
fn for_loop_accepts_a_bare_iterator() {
    let mut t = typer();
    let e = Expr::new(
        ExprKind::For(
            "i".to_string(),
            Box::new(binop(Binop::Interval, int(0), int(3))),
            Box::new(ident("i")),
        ),
        sp(0),
    );
    let typed = t.type_expr(&e, false).unwrap();
    let TExprKind::For(_, elem, it, _) = &typed.kind else { panic!() };
    assert_eq!(follow(elem).to_string(), "Int");
    // IntIter has hasNext/next but no iterator(); it is used directly.
    assert!(matches!(it.kind, TExprKind::New(..)));
}

#[test]
fn iterating_a_non_iterator_fails() {
    let mut t = typer();
    let e = Expr::new(
        ExprKind::For("v".to_string(), Box::new(int(1)), Box::new(ident("v"))),
        sp(0),
    );
    let msg = err_message(t.type_expr(&e, false));
    assert!(msg.contains("can't iterate"), "got: {msg}");
}

#[test]
fn catch_requires_dynamic_type_parameters() {
    let mut t = typer();
    let try_with = |hint: TypeHint| {
        Expr::new(
            ExprKind::Try(
                Box::new(int(1)),
                vec![Catch {
                    name: "e".to_string(),
                    hint,
                    body: int(2),
                }],
            ),
            sp(0),
        )
    };
    let ok = try_with(TypeHint::Path(TypePathHint::plain("String")));
    assert!(typer().type_expr(&ok, true).is_ok());

    let param_not_dyn = try_with(TypeHint::Path(TypePathHint {
        pack: Vec::new(),
        name: "Array".to_string(),
        params: vec![TypeHint::Path(TypePathHint::plain("Int"))],
    }));
    let msg = err_message(t.type_expr(&param_not_dyn, true));
    assert!(msg.contains("must be Dynamic"), "got: {msg}");

    let param_dyn = try_with(TypeHint::Path(TypePathHint {
        pack: Vec::new(),
        name: "Array".to_string(),
        params: vec![TypeHint::Path(TypePathHint::plain("Dynamic"))],
    }));
    assert!(typer().type_expr(&param_dyn, true).is_ok());
}

#[test]
fn new_finds_constructor_and_matches_arguments() {
    let mut t = typer();
    let e = Expr::new(
        ExprKind::New(TypePathHint::plain("IntIter"), vec![int(0), int(5)]),
        sp(0),
    );
    let typed = t.type_expr(&e, true).unwrap();
    assert!(matches!(typed.kind, TExprKind::New(..)));
    assert_eq!(typed.ty.to_string(), "IntIter");

    let wrong = Expr::new(
        ExprKind::New(TypePathHint::plain("IntIter"), vec![int(0)]),
        sp(0),
    );
    let msg = err_message(t.type_expr(&wrong, true));
    assert!(msg.contains("Not enough"), "got: {msg}");
}

#[test]
fn new_walks_extern_super_chain_for_constructor() {
    let mut loader = stdlib::core_loader();
    let base = ClassDef::new(TypePath::plain("NativeBase"));
    base.borrow_mut().constructor = Some(ClassField::method("new", Vec::new(), Type::Dynamic));
    let derived = ClassDef::new(TypePath::plain("NativeDerived"));
    {
        let mut def = derived.borrow_mut();
        def.is_extern = true;
        def.super_class = Some((base, Vec::new()));
    }
    loader.register_type(TypeDecl::Class(derived));
    let mut t = Typer::new(Config::default(), Rc::new(loader)).unwrap();
    let e = Expr::new(
        ExprKind::New(TypePathHint::plain("NativeDerived"), Vec::new()),
        sp(0),
    );
    assert!(t.type_expr(&e, true).is_ok());
}

#[test]
fn private_constructor_needs_parent_class() {
    let mut loader = stdlib::core_loader();
    let p = ClassDef::new(TypePath::plain("Sealed"));
    {
        let mut def = p.borrow_mut();
        def.constructor = Some(ClassField::method("new", Vec::new(), Type::Dynamic));
        def.private_ctor = true;
    }
    loader.register_type(TypeDecl::Class(p.clone()));
    let mut t = Typer::new(Config::default(), Rc::new(loader)).unwrap();
    let e = Expr::new(ExprKind::New(TypePathHint::plain("Sealed"), Vec::new()), sp(0));
    let msg = err_message(t.type_expr(&e, true));
    assert!(msg.contains("private constructor"), "got: {msg}");

    // A parent class may construct it.
    t.curclass = Some(p.clone());
    assert!(t.type_expr(&e, true).is_ok());
}

#[test]
fn super_call_requires_constructor_context() {
    let mut t = typer();
    let base = ClassDef::new(TypePath::plain("Base"));
    base.borrow_mut().constructor = Some(ClassField::method(
        "new",
        vec![FunArg::new("x", t.t.int.clone())],
        Type::Dynamic,
    ));
    let child = ClassDef::new(TypePath::plain("Child"));
    child.borrow_mut().super_class = Some((base, Vec::new()));
    t.curclass = Some(child.clone());
    t.tthis = Type::Inst(child, Vec::new());

    let e = call(ident("super"), vec![int(1)]);
    let msg = err_message(t.type_expr(&e, true));
    assert!(msg.contains("constructor"), "got: {msg}");

    t.in_constructor = true;
    let typed = t.type_expr(&e, true).unwrap();
    assert!(matches!(&typed.kind, TExprKind::Call(callee, args)
        if args.len() == 1 && matches!(callee.kind, TExprKind::Const(TConst::Super))));

    // Bare super is not a value.
    let msg = err_message(t.type_expr(&ident("super"), true));
    assert!(msg.contains("super"), "got: {msg}");
}

#[test]
fn cast_without_target_is_a_fresh_monomorph() {
    let mut t = typer();
    let e = Expr::new(ExprKind::Cast(Box::new(int(1)), None), sp(0));
    let typed = t.type_expr(&e, true).unwrap();
    assert!(matches!(follow(&typed.ty), Type::Mono(_)));
}

#[test]
fn checked_cast_requires_dynamic_parameters() {
    let mut t = typer();
    let ok = Expr::new(
        ExprKind::Cast(
            Box::new(int(1)),
            Some(TypeHint::Path(TypePathHint::plain("String"))),
        ),
        sp(0),
    );
    let typed = t.type_expr(&ok, true).unwrap();
    assert!(matches!(typed.kind, TExprKind::Cast(_, Some(_))));
    assert_eq!(typed.ty.to_string(), "String");

    let bad = Expr::new(
        ExprKind::Cast(
            Box::new(int(1)),
            Some(TypeHint::Path(TypePathHint {
                pack: Vec::new(),
                name: "Array".to_string(),
                params: vec![TypeHint::Path(TypePathHint::plain("Int"))],
            })),
        ),
        sp(0),
    );
    let msg = err_message(t.type_expr(&bad, true));
    assert!(msg.contains("must be Dynamic"), "got: {msg}");
}

#[test]
fn function_literal_takes_argument_types_from_expectation() {
    let mut t = typer();
    let f_ty = Type::fun(
        vec![FunArg::new(
            "cb",
            Type::fun(vec![FunArg::new("x", t.t.int.clone())], t.t.int.clone()),
        )],
        t.t.void.clone(),
    );
    t.add_local("apply", f_ty);

    let lambda = Expr::new(
        ExprKind::Function(FunctionDecl {
            args: vec![FunArgDecl {
                name: "x".to_string(),
                opt: false,
                hint: None,
            }],
            ret: None,
            body: Box::new(Expr::new(
                ExprKind::Return(Some(Box::new(binop(Binop::Add, ident("x"), int(1))))),
                sp(0),
            )),
        }),
        sp(0),
    );
    let typed = t
        .type_expr(&call(ident("apply"), vec![lambda]), true)
        .unwrap();
    let TExprKind::Call(_, args) = &typed.kind else { panic!() };
    let TExprKind::Function(f) = &args[0].kind else {
        panic!("expected a function literal")
    };
    // The unannotated parameter picked up Int from the expected type.
    assert_eq!(follow(&f.args[0].ty).to_string(), "Int");
}

#[test]
fn object_literal_types_as_const_anon() {
    let mut t = typer();
    let e = Expr::new(
        ExprKind::Object(vec![
            ("x".to_string(), int(1)),
            ("s".to_string(), str_("v")),
        ]),
        sp(0),
    );
    let typed = t.type_expr(&e, true).unwrap();
    assert_eq!(typed.ty.to_string(), "{ x : Int, s : String }");

    let dup = Expr::new(
        ExprKind::Object(vec![("x".to_string(), int(1)), ("x".to_string(), int(2))]),
        sp(0),
    );
    let msg = err_message(t.type_expr(&dup, true));
    assert!(msg.contains("Duplicate field"), "got: {msg}");
}

#[test]
fn mixed_array_literal_degrades_to_dynamic() {
    let mut t = typer();
    let homogeneous = t
        .type_expr(&Expr::new(ExprKind::ArrayDecl(vec![int(1), int(2)]), sp(0)), true)
        .unwrap();
    assert_eq!(homogeneous.ty.to_string(), "Array<Int>");

    let mixed = t
        .type_expr(
            &Expr::new(ExprKind::ArrayDecl(vec![int(1), str_("x")]), sp(0)),
            true,
        )
        .unwrap();
    assert_eq!(mixed.ty.to_string(), "Array<Dynamic>");
}

// -- trace / intrinsics -----------------------------------------------------

#[test]
fn trace_rewrites_to_log_with_position_infos() {
    let mut t = typer();
    let typed = t.type_expr(&call(ident("trace"), vec![int(1)]), false).unwrap();
    let TExprKind::Call(callee, args) = &typed.kind else {
        panic!("expected a call")
    };
    assert!(matches!(&callee.kind, TExprKind::StaticField(c, n)
        if n == "trace" && c.borrow().path.name == "Log"));
    assert_eq!(args.len(), 2);
    assert!(matches!(args[1].kind, TExprKind::ObjectDecl(_)));
}

#[test]
fn no_traces_replaces_trace_with_null() {
    let mut t = Typer::with_core(Config {
        no_traces: true,
        ..Config::default()
    })
    .unwrap();
    let typed = t.type_expr(&call(ident("trace"), vec![int(1)]), false).unwrap();
    assert!(typed.is_null_const());
    assert_eq!(typed.ty.to_string(), "Void");
}

#[test]
fn unprotect_degrades_to_its_argument_off_flash() {
    let mut t = typer();
    let typed = t
        .type_expr(&call(ident("__unprotect__"), vec![str_("a")]), true)
        .unwrap();
    assert!(matches!(typed.kind, TExprKind::Const(TConst::Str(_))));

    let mut flash = typer_on(Platform::Flash8);
    let typed = flash
        .type_expr(&call(ident("__unprotect__"), vec![str_("a")]), true)
        .unwrap();
    assert!(matches!(typed.kind, TExprKind::Call(..)));
    assert_eq!(typed.ty.to_string(), "String");
}

// -- display ----------------------------------------------------------------

#[test]
fn display_query_surfaces_reachable_fields() {
    let mut t = typer();
    t.local_using.push(tools_class(&t));
    let e = Expr::new(ExprKind::Display(Box::new(str_("abc"))), sp(0));
    match t.type_expr(&e, true) {
        Err(Interrupt::Display(Type::Anon(a))) => {
            let names: Vec<String> =
                a.borrow().fields.iter().map(|f| f.name.clone()).collect();
            assert!(names.contains(&"length".to_string()));
            assert!(names.contains(&"charAt".to_string()));
            // Extension candidates ride along, minus the bound receiver.
            assert!(names.contains(&"len".to_string()));
            let len_ty = a.borrow().find("len").unwrap().ty;
            assert_eq!(len_ty.to_string(), "() -> Int");
        }
        other => panic!("expected a display signal, got {other:?}"),
    }
}

#[test]
fn display_on_bare_type_path_signals_type_path() {
    let mut loader = stdlib::core_loader();
    loader.register_type(TypeDecl::Class(ClassDef::new(TypePath::new(
        &["tools"],
        "Registry",
    ))));
    let mut t = Typer::new(Config::default(), Rc::new(loader)).unwrap();

    let e = Expr::new(
        ExprKind::Display(Box::new(field(ident("tools"), "Registry"))),
        sp(0),
    );
    match t.type_expr(&e, true) {
        Err(Interrupt::TypePath(path)) => {
            assert_eq!(path, vec!["tools".to_string(), "Registry".to_string()]);
        }
        other => panic!("expected a type-path signal, got {other:?}"),
    }
}

// -- macros -----------------------------------------------------------------

/// Interpreter stub: every macro call expands to the constant 42.
struct ConstInterp;

impl MacroInterp for ConstInterp {
    fn define_types(&mut self, _types: &[TypeDecl]) {}

    fn call(
        &mut self,
        _class: &TypePath,
        _method: &str,
        _args: Vec<MacroValue>,
    ) -> Option<MacroValue> {
        Some(encode_expr(&int(42)))
    }
}

fn macro_typer() -> (Typer, ClassRef) {
    let mut loader = stdlib::core_loader();
    let expr_class = ClassDef::new(TypePath::plain("Expr"));
    loader.register_type(TypeDecl::Class(expr_class.clone()));

    let m = ClassDef::new(TypePath::plain("Build"));
    m.borrow_mut().statics.push(ClassField::new(
        "gen",
        Type::fun(
            vec![FunArg::new("e", Type::Inst(expr_class, Vec::new()))],
            Type::Dynamic,
        ),
        FieldKind::Method(MethodKind::Macro),
    ));
    loader.register_type(TypeDecl::Class(m.clone()));

    let t = Typer::new(Config::default(), Rc::new(loader)).unwrap();
    t.set_macro_interp(Box::new(ConstInterp));
    (t, m)
}

#[test]
fn macro_call_splices_returned_expression() {
    let (mut t, _) = macro_typer();
    let e = call(field(ident("Build"), "gen"), vec![int(1)]);
    let typed = t.type_expr(&e, true).unwrap();
    assert!(matches!(typed.kind, TExprKind::Const(TConst::Int(42))));
    assert_eq!(typed.ty.to_string(), "Int");
}

#[test]
fn macro_arity_is_checked_against_expression_parameters() {
    let (mut t, _) = macro_typer();
    let e = call(field(ident("Build"), "gen"), vec![int(1), int(2)]);
    let msg = err_message(t.type_expr(&e, true));
    assert!(msg.contains("macro arguments"), "got: {msg}");
}

#[test]
fn macro_cannot_be_read_as_a_value() {
    let (mut t, _) = macro_typer();
    let msg = err_message(t.type_expr(&field(ident("Build"), "gen"), true));
    assert!(msg.contains("called immediately"), "got: {msg}");
}

#[test]
fn nested_macro_call_is_delayed() {
    let (mut t, _) = macro_typer();
    t.in_macro = true;
    let e = call(field(ident("Build"), "gen"), vec![int(1)]);
    let typed = t.type_expr(&e, true).unwrap();
    assert!(matches!(typed.kind, TExprKind::DelayedMacro(0)));

    t.in_macro = false;
    let resolved = t.flush_pending_macros().unwrap();
    assert_eq!(resolved.len(), 1);
    assert!(matches!(
        resolved[0].1.kind,
        TExprKind::Const(TConst::Int(42))
    ));
}

// -- idempotence ------------------------------------------------------------

#[test]
fn typing_a_constant_twice_is_observationally_equal() {
    let mut t = typer();
    let a = t.type_expr(&int(5), true).unwrap();
    let b = t.type_expr(&int(5), true).unwrap();
    assert!(matches!(
        (&a.kind, &b.kind),
        (
            TExprKind::Const(TConst::Int(5)),
            TExprKind::Const(TConst::Int(5))
        )
    ));
    assert_eq!(a.ty.to_string(), b.ty.to_string());
    assert_eq!(a.span, b.span);
}

#[test]
fn doc_shape_round_trips() {
    use crate::sema::finalize::gen_type_string;
    let c = ClassDef::new(TypePath::new(&["tools"], "Lazy"));
    {
        let mut def = c.borrow_mut();
        def.params.push(crate::sema::types::TypeParam::fresh("T"));
        def.fields.push(ClassField::var("value", Type::Dynamic));
        def.fields.push(ClassField::var("done", Type::Dynamic));
    }
    let s = gen_type_string(&TypeDecl::Class(c));

    // Shape parser: pull back (path, params, fields).
    let attr = |key: &str| {
        let pat = format!("{key}=\"");
        let start = s.find(&pat).unwrap() + pat.len();
        let end = s[start..].find('"').unwrap() + start;
        s[start..end].to_string()
    };
    assert_eq!(attr("path"), "tools.Lazy");
    assert_eq!(attr("params"), "T");
    let fields: Vec<&str> = s
        .match_indices("<field name=\"")
        .map(|(i, pat)| {
            let start = i + pat.len();
            let end = s[start..].find('"').unwrap() + start;
            &s[start..end]
        })
        .collect();
    assert_eq!(fields, vec!["value", "done"]);
}
