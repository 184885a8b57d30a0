// src/sema/typer/macros.rs
//! The macro bridge: a sibling typing context targeting the bytecode
//! backend compiles the macro module; arguments cross the boundary as
//! encoded values, never as shared type state.

use std::rc::Rc;

use crate::frontend::{
    Binop, Catch, Constant, Expr, ExprKind, FunArgDecl, FunctionDecl, Span, SwitchCase, TypeHint,
    TypePathHint, Unop, UnopFlag, VarDecl, WhileFlag,
};
use crate::sema::context::{Config, Globals, PendingMacro, Platform, Typer};
use crate::sema::types::{ClassField, ClassRef, Type, TypeDecl, TypePath, TypedExpr};
use crate::sema::unify::follow;
use crate::sema::TypeResult;

/// Serialized value form crossing the interpreter boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum MacroValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Array(Vec<MacroValue>),
    Object(Vec<(String, MacroValue)>),
}

impl MacroValue {
    fn obj(kind: &str, mut fields: Vec<(String, MacroValue)>) -> MacroValue {
        let mut all = vec![("kind".to_string(), MacroValue::Str(kind.to_string()))];
        all.append(&mut fields);
        MacroValue::Object(all)
    }

    fn get(&self, name: &str) -> Option<&MacroValue> {
        match self {
            MacroValue::Object(fields) => {
                fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
            }
            _ => None,
        }
    }

    fn kind(&self) -> Option<&str> {
        match self.get("kind")? {
            MacroValue::Str(s) => Some(s),
            _ => None,
        }
    }

    fn as_str(&self) -> Option<&str> {
        match self {
            MacroValue::Str(s) => Some(s),
            _ => None,
        }
    }

    fn as_int(&self) -> Option<i64> {
        match self {
            MacroValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    fn as_array(&self) -> Option<&[MacroValue]> {
        match self {
            MacroValue::Array(v) => Some(v),
            _ => None,
        }
    }
}

/// The macro interpreter, an external collaborator.
pub trait MacroInterp {
    /// Hand over the finalized types of the macro module.
    fn define_types(&mut self, types: &[TypeDecl]);
    /// Invoke a macro method; `None` signals an execution failure.
    fn call(
        &mut self,
        class: &TypePath,
        method: &str,
        args: Vec<MacroValue>,
    ) -> Option<MacroValue>;
}

/// What a macro call site elaborates to.
pub enum MacroOutcome {
    /// The returned expression, to be typed in place of the call.
    Spliced(Expr),
    /// Registered for later execution; the call site holds a placeholder
    /// with this slot.
    Delayed(usize),
}

impl Typer {
    pub fn set_macro_interp(&self, interp: Box<dyn MacroInterp>) {
        *self.g.interp.borrow_mut() = Some(interp);
    }

    /// Dispatch a macro call site.
    pub(crate) fn type_macro(
        &mut self,
        class: &ClassRef,
        field: &Rc<ClassField>,
        args: &[Expr],
        span: Span,
    ) -> TypeResult<MacroOutcome> {
        let encoded = self.encode_macro_args(field, args, span)?;

        if self.in_macro {
            // Nested: run when the enclosing macro executes, against the
            // locals known at this point.
            let slot = self.g.macro_slots.get();
            self.g.macro_slots.set(slot + 1);
            self.g.pending_macros.borrow_mut().push(PendingMacro {
                slot,
                class: class.clone(),
                method: field.name.clone(),
                args: args.to_vec(),
                locals: self.locals.clone(),
                span,
            });
            tracing::debug!(slot, method = %field.name, "nested macro delayed");
            return Ok(MacroOutcome::Delayed(slot));
        }

        let path = class.borrow().path.clone();
        self.prepare_macro_module(&path, span)?;
        let value = self.invoke(&path, &field.name, encoded, span)?;
        let expr = decode_expr(&value, span)
            .ok_or_else(|| self.err_custom("Invalid macro value", span))?;

        // Nested macros registered during execution run now, with their
        // captured locals.
        self.flush_pending_macros()?;
        Ok(MacroOutcome::Spliced(expr))
    }

    /// Arity policy from the declared first parameter: `Expr` means
    /// by-expression with exact arity, `Array<Expr>` means one variadic
    /// array.
    fn encode_macro_args(
        &mut self,
        field: &Rc<ClassField>,
        args: &[Expr],
        span: Span,
    ) -> TypeResult<Vec<MacroValue>> {
        let ft = field.field_type();
        let Type::Fun(formals, _) = follow(&ft) else {
            return Err(self.err_custom("Invalid macro signature", span));
        };
        let variadic = formals.len() == 1 && is_expr_array(&formals[0].ty);
        if variadic {
            return Ok(vec![MacroValue::Array(
                args.iter().map(encode_expr).collect(),
            )]);
        }
        if formals.len() != args.len() {
            return Err(self.err_custom("Invalid number of macro arguments", span));
        }
        Ok(args.iter().map(encode_expr).collect())
    }

    /// Build the sibling context on first use, compile the macro module in
    /// it and hand its types to the interpreter.
    fn prepare_macro_module(&mut self, path: &TypePath, span: Span) -> TypeResult<()> {
        if self.macro_ctx.is_none() {
            let config = Config {
                platform: Platform::Interp,
                no_inline: self.g.config.no_inline,
                no_traces: self.g.config.no_traces,
                // Platform defines do not leak into macro execution.
                defines: Vec::new(),
            };
            let loader = self
                .g
                .macro_loader
                .clone()
                .unwrap_or_else(|| self.g.loader.clone());
            let mut sibling = Typer::with_globals(Globals::new(config, loader))?;
            sibling.in_macro = true;
            self.macro_ctx = Some(Box::new(sibling));
        }

        let module_path = path.to_string();
        if self.macro_defined.contains(&module_path) {
            return Ok(());
        }
        let mut sibling = self.macro_ctx.take().expect("macro context just built");
        let prepared = (|| -> TypeResult<Vec<TypeDecl>> {
            sibling.load_module(&module_path, span)?;
            sibling.finalize()?;
            let (types, _) = sibling.generate(None, &[])?;
            Ok(types)
        })();
        self.macro_ctx = Some(sibling);
        let types = prepared?;

        let mut interp = self
            .g
            .interp
            .borrow_mut()
            .take()
            .ok_or_else(|| self.err_custom("No macro interpreter available", span))?;
        interp.define_types(&types);
        *self.g.interp.borrow_mut() = Some(interp);
        self.macro_defined.insert(module_path);
        tracing::debug!(class = %path, "macro module compiled");
        Ok(())
    }

    /// One interpreter invocation, with flag save/restore around it.
    fn invoke(
        &mut self,
        path: &TypePath,
        method: &str,
        args: Vec<MacroValue>,
        span: Span,
    ) -> TypeResult<MacroValue> {
        let mut interp = self
            .g
            .interp
            .borrow_mut()
            .take()
            .ok_or_else(|| self.err_custom("No macro interpreter available", span))?;
        let saved_untyped = self.untyped;
        let saved_macro = self.in_macro;
        let result = interp.call(path, method, args);
        self.untyped = saved_untyped;
        self.in_macro = saved_macro;
        *self.g.interp.borrow_mut() = Some(interp);
        result.ok_or_else(|| self.err_custom("Macro execution failed", span))
    }

    /// Run delayed macro calls; each result is typed against the locals
    /// snapshot captured when the call was registered. Resolutions are
    /// keyed by placeholder slot.
    pub fn flush_pending_macros(&mut self) -> TypeResult<Vec<(usize, TypedExpr)>> {
        let mut out = Vec::new();
        loop {
            let pending: Vec<PendingMacro> =
                self.g.pending_macros.borrow_mut().drain(..).collect();
            if pending.is_empty() {
                break;
            }
            for p in pending {
                let path = p.class.borrow().path.clone();
                let field = p
                    .class
                    .borrow()
                    .find_static(&p.method)
                    .ok_or_else(|| self.err_custom("Macro method disappeared", p.span))?;
                let encoded = self.encode_macro_args(&field, &p.args, p.span)?;
                self.prepare_macro_module(&path, p.span)?;
                let value = self.invoke(&path, &p.method, encoded, p.span)?;
                let expr = decode_expr(&value, p.span)
                    .ok_or_else(|| self.err_custom("Invalid macro value", p.span))?;
                let saved = std::mem::replace(&mut self.locals, p.locals.clone());
                let typed = self.type_expr(&expr, true);
                self.locals = saved;
                out.push((p.slot, typed?));
            }
        }
        Ok(out)
    }
}

fn is_expr_array(t: &Type) -> bool {
    match t {
        Type::Inst(c, pl) => {
            c.borrow().path.name == "Array" && pl.len() == 1 && is_expr_type(&pl[0])
        }
        _ => false,
    }
}

fn is_expr_type(t: &Type) -> bool {
    match t {
        Type::Inst(c, _) => c.borrow().path.name == "Expr",
        Type::Alias(a, _) => a.borrow().path.name == "Expr",
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// AST <-> value encoding
// ---------------------------------------------------------------------------

fn encode_span(span: Span) -> MacroValue {
    MacroValue::Object(vec![
        ("min".to_string(), MacroValue::Int(span.min as i64)),
        ("max".to_string(), MacroValue::Int(span.max as i64)),
        ("line".to_string(), MacroValue::Int(span.line as i64)),
    ])
}

fn decode_span(v: &MacroValue) -> Option<Span> {
    Some(Span::new(
        v.get("min")?.as_int()? as u32,
        v.get("max")?.as_int()? as u32,
        v.get("line")?.as_int()? as u32,
    ))
}

fn binop_name(op: &Binop) -> String {
    match op {
        Binop::Add => "+".into(),
        Binop::Sub => "-".into(),
        Binop::Mul => "*".into(),
        Binop::Div => "/".into(),
        Binop::Mod => "%".into(),
        Binop::Eq => "==".into(),
        Binop::NotEq => "!=".into(),
        Binop::Gt => ">".into(),
        Binop::Gte => ">=".into(),
        Binop::Lt => "<".into(),
        Binop::Lte => "<=".into(),
        Binop::And => "&".into(),
        Binop::Or => "|".into(),
        Binop::Xor => "^".into(),
        Binop::Shl => "<<".into(),
        Binop::Shr => ">>".into(),
        Binop::UShr => ">>>".into(),
        Binop::BoolAnd => "&&".into(),
        Binop::BoolOr => "||".into(),
        Binop::Interval => "...".into(),
        Binop::Assign => "=".into(),
        Binop::AssignOp(inner) => format!("{}=", binop_name(inner)),
    }
}

fn parse_binop(name: &str) -> Option<Binop> {
    Some(match name {
        "+" => Binop::Add,
        "-" => Binop::Sub,
        "*" => Binop::Mul,
        "/" => Binop::Div,
        "%" => Binop::Mod,
        "==" => Binop::Eq,
        "!=" => Binop::NotEq,
        ">" => Binop::Gt,
        ">=" => Binop::Gte,
        "<" => Binop::Lt,
        "<=" => Binop::Lte,
        "&" => Binop::And,
        "|" => Binop::Or,
        "^" => Binop::Xor,
        "<<" => Binop::Shl,
        ">>" => Binop::Shr,
        ">>>" => Binop::UShr,
        "&&" => Binop::BoolAnd,
        "||" => Binop::BoolOr,
        "..." => Binop::Interval,
        "=" => Binop::Assign,
        other => {
            let inner = other.strip_suffix('=')?;
            Binop::AssignOp(Box::new(parse_binop(inner)?))
        }
    })
}

fn encode_hint(hint: &TypeHint) -> MacroValue {
    match hint {
        TypeHint::Path(p) => MacroValue::obj(
            "path",
            vec![
                (
                    "pack".to_string(),
                    MacroValue::Array(
                        p.pack.iter().map(|s| MacroValue::Str(s.clone())).collect(),
                    ),
                ),
                ("name".to_string(), MacroValue::Str(p.name.clone())),
                (
                    "params".to_string(),
                    MacroValue::Array(p.params.iter().map(encode_hint).collect()),
                ),
            ],
        ),
        TypeHint::Anon(fields) => MacroValue::obj(
            "anon",
            vec![(
                "fields".to_string(),
                MacroValue::Array(
                    fields
                        .iter()
                        .map(|(n, h)| {
                            MacroValue::Object(vec![
                                ("name".to_string(), MacroValue::Str(n.clone())),
                                ("type".to_string(), encode_hint(h)),
                            ])
                        })
                        .collect(),
                ),
            )],
        ),
        TypeHint::Fun(args, ret) => MacroValue::obj(
            "fun",
            vec![
                (
                    "args".to_string(),
                    MacroValue::Array(args.iter().map(encode_hint).collect()),
                ),
                ("ret".to_string(), encode_hint(ret)),
            ],
        ),
    }
}

fn decode_hint(v: &MacroValue) -> Option<TypeHint> {
    match v.kind()? {
        "path" => {
            let pack = v
                .get("pack")?
                .as_array()?
                .iter()
                .map(|s| s.as_str().map(|s| s.to_string()))
                .collect::<Option<Vec<_>>>()?;
            let name = v.get("name")?.as_str()?.to_string();
            let params = v
                .get("params")?
                .as_array()?
                .iter()
                .map(decode_hint)
                .collect::<Option<Vec<_>>>()?;
            Some(TypeHint::Path(TypePathHint { pack, name, params }))
        }
        "anon" => {
            let fields = v
                .get("fields")?
                .as_array()?
                .iter()
                .map(|f| {
                    Some((
                        f.get("name")?.as_str()?.to_string(),
                        decode_hint(f.get("type")?)?,
                    ))
                })
                .collect::<Option<Vec<_>>>()?;
            Some(TypeHint::Anon(fields))
        }
        "fun" => {
            let args = v
                .get("args")?
                .as_array()?
                .iter()
                .map(decode_hint)
                .collect::<Option<Vec<_>>>()?;
            let ret = decode_hint(v.get("ret")?)?;
            Some(TypeHint::Fun(args, Box::new(ret)))
        }
        _ => None,
    }
}

fn encode_exprs(el: &[Expr]) -> MacroValue {
    MacroValue::Array(el.iter().map(encode_expr).collect())
}

/// Encode an untyped expression to the interpreter value form.
pub fn encode_expr(e: &Expr) -> MacroValue {
    let pos = ("pos".to_string(), encode_span(e.span));
    let with = |kind: &str, mut fields: Vec<(String, MacroValue)>| {
        fields.push(pos.clone());
        MacroValue::obj(kind, fields)
    };
    match &e.kind {
        ExprKind::Const(Constant::Int(i)) => {
            with("int", vec![("v".to_string(), MacroValue::Int(*i))])
        }
        ExprKind::Const(Constant::Float(f)) => {
            with("float", vec![("v".to_string(), MacroValue::Float(*f))])
        }
        ExprKind::Const(Constant::Str(s)) => {
            with("string", vec![("v".to_string(), MacroValue::Str(s.clone()))])
        }
        ExprKind::Const(Constant::Ident(s)) => {
            with("ident", vec![("v".to_string(), MacroValue::Str(s.clone()))])
        }
        ExprKind::Array(e1, e2) => with(
            "index",
            vec![
                ("e1".to_string(), encode_expr(e1)),
                ("e2".to_string(), encode_expr(e2)),
            ],
        ),
        ExprKind::Binop(op, e1, e2) => with(
            "binop",
            vec![
                ("op".to_string(), MacroValue::Str(binop_name(op))),
                ("e1".to_string(), encode_expr(e1)),
                ("e2".to_string(), encode_expr(e2)),
            ],
        ),
        ExprKind::Unop(op, flag, operand) => with(
            "unop",
            vec![
                (
                    "op".to_string(),
                    MacroValue::Str(
                        match op {
                            Unop::Increment => "++",
                            Unop::Decrement => "--",
                            Unop::Not => "!",
                            Unop::Neg => "-",
                            Unop::NegBits => "~",
                        }
                        .to_string(),
                    ),
                ),
                (
                    "postfix".to_string(),
                    MacroValue::Bool(*flag == UnopFlag::Postfix),
                ),
                ("e".to_string(), encode_expr(operand)),
            ],
        ),
        ExprKind::Field(obj, name) => with(
            "field",
            vec![
                ("e".to_string(), encode_expr(obj)),
                ("name".to_string(), MacroValue::Str(name.clone())),
            ],
        ),
        ExprKind::Paren(inner) => with("paren", vec![("e".to_string(), encode_expr(inner))]),
        ExprKind::Object(fields) => with(
            "object",
            vec![(
                "fields".to_string(),
                MacroValue::Array(
                    fields
                        .iter()
                        .map(|(n, v)| {
                            MacroValue::Object(vec![
                                ("name".to_string(), MacroValue::Str(n.clone())),
                                ("expr".to_string(), encode_expr(v)),
                            ])
                        })
                        .collect(),
                ),
            )],
        ),
        ExprKind::ArrayDecl(el) => with("array", vec![("el".to_string(), encode_exprs(el))]),
        ExprKind::Call(callee, args) => with(
            "call",
            vec![
                ("e".to_string(), encode_expr(callee)),
                ("args".to_string(), encode_exprs(args)),
            ],
        ),
        ExprKind::New(path, args) => with(
            "new",
            vec![
                (
                    "path".to_string(),
                    encode_hint(&TypeHint::Path(path.clone())),
                ),
                ("args".to_string(), encode_exprs(args)),
            ],
        ),
        ExprKind::Vars(decls) => with(
            "vars",
            vec![(
                "decls".to_string(),
                MacroValue::Array(
                    decls
                        .iter()
                        .map(|d| {
                            MacroValue::Object(vec![
                                ("name".to_string(), MacroValue::Str(d.name.clone())),
                                (
                                    "type".to_string(),
                                    d.hint
                                        .as_ref()
                                        .map(encode_hint)
                                        .unwrap_or(MacroValue::Null),
                                ),
                                (
                                    "init".to_string(),
                                    d.init
                                        .as_ref()
                                        .map(encode_expr)
                                        .unwrap_or(MacroValue::Null),
                                ),
                            ])
                        })
                        .collect(),
                ),
            )],
        ),
        ExprKind::Function(decl) => with(
            "function",
            vec![
                (
                    "args".to_string(),
                    MacroValue::Array(
                        decl.args
                            .iter()
                            .map(|a| {
                                MacroValue::Object(vec![
                                    ("name".to_string(), MacroValue::Str(a.name.clone())),
                                    ("opt".to_string(), MacroValue::Bool(a.opt)),
                                    (
                                        "type".to_string(),
                                        a.hint
                                            .as_ref()
                                            .map(encode_hint)
                                            .unwrap_or(MacroValue::Null),
                                    ),
                                ])
                            })
                            .collect(),
                    ),
                ),
                (
                    "ret".to_string(),
                    decl.ret
                        .as_ref()
                        .map(encode_hint)
                        .unwrap_or(MacroValue::Null),
                ),
                ("body".to_string(), encode_expr(&decl.body)),
            ],
        ),
        ExprKind::Block(el) => with("block", vec![("el".to_string(), encode_exprs(el))]),
        ExprKind::If(cond, then, els) => with(
            "if",
            vec![
                ("cond".to_string(), encode_expr(cond)),
                ("then".to_string(), encode_expr(then)),
                (
                    "else".to_string(),
                    els.as_ref().map(|e| encode_expr(e)).unwrap_or(MacroValue::Null),
                ),
            ],
        ),
        ExprKind::Ternary(cond, then, els) => with(
            "ternary",
            vec![
                ("cond".to_string(), encode_expr(cond)),
                ("then".to_string(), encode_expr(then)),
                ("else".to_string(), encode_expr(els)),
            ],
        ),
        ExprKind::While(cond, body, flag) => with(
            "while",
            vec![
                ("cond".to_string(), encode_expr(cond)),
                ("body".to_string(), encode_expr(body)),
                (
                    "do".to_string(),
                    MacroValue::Bool(*flag == WhileFlag::DoWhile),
                ),
            ],
        ),
        ExprKind::For(v, it, body) => with(
            "for",
            vec![
                ("v".to_string(), MacroValue::Str(v.clone())),
                ("it".to_string(), encode_expr(it)),
                ("body".to_string(), encode_expr(body)),
            ],
        ),
        ExprKind::Switch(subject, cases, default) => with(
            "switch",
            vec![
                ("e".to_string(), encode_expr(subject)),
                (
                    "cases".to_string(),
                    MacroValue::Array(
                        cases
                            .iter()
                            .map(|c| {
                                MacroValue::Object(vec![
                                    ("values".to_string(), encode_exprs(&c.values)),
                                    ("body".to_string(), encode_exprs(&c.body)),
                                ])
                            })
                            .collect(),
                    ),
                ),
                (
                    "default".to_string(),
                    default
                        .as_ref()
                        .map(|el| encode_exprs(el))
                        .unwrap_or(MacroValue::Null),
                ),
            ],
        ),
        ExprKind::Return(value) => with(
            "return",
            vec![(
                "e".to_string(),
                value
                    .as_ref()
                    .map(|e| encode_expr(e))
                    .unwrap_or(MacroValue::Null),
            )],
        ),
        ExprKind::Break => with("break", Vec::new()),
        ExprKind::Continue => with("continue", Vec::new()),
        ExprKind::Throw(value) => with("throw", vec![("e".to_string(), encode_expr(value))]),
        ExprKind::Try(body, catches) => with(
            "try",
            vec![
                ("e".to_string(), encode_expr(body)),
                (
                    "catches".to_string(),
                    MacroValue::Array(
                        catches
                            .iter()
                            .map(|c| {
                                MacroValue::Object(vec![
                                    ("name".to_string(), MacroValue::Str(c.name.clone())),
                                    ("type".to_string(), encode_hint(&c.hint)),
                                    ("body".to_string(), encode_expr(&c.body)),
                                ])
                            })
                            .collect(),
                    ),
                ),
            ],
        ),
        ExprKind::Untyped(inner) => with("untyped", vec![("e".to_string(), encode_expr(inner))]),
        ExprKind::Cast(value, hint) => with(
            "cast",
            vec![
                ("e".to_string(), encode_expr(value)),
                (
                    "type".to_string(),
                    hint.as_ref().map(encode_hint).unwrap_or(MacroValue::Null),
                ),
            ],
        ),
        ExprKind::Display(inner) => with("display", vec![("e".to_string(), encode_expr(inner))]),
    }
}

fn decode_exprs(v: &MacroValue) -> Option<Vec<Expr>> {
    v.as_array()?
        .iter()
        .map(|e| decode_expr(e, Span::default()))
        .collect()
}

fn decode_opt_expr(v: &MacroValue, fallback: Span) -> Option<Option<Expr>> {
    match v {
        MacroValue::Null => Some(None),
        other => Some(Some(decode_expr(other, fallback)?)),
    }
}

/// Decode an interpreter value back to an untyped expression; `fallback` is
/// used when no position rides along.
pub fn decode_expr(v: &MacroValue, fallback: Span) -> Option<Expr> {
    let span = v
        .get("pos")
        .and_then(decode_span)
        .unwrap_or(fallback);
    let kind = match v.kind()? {
        "int" => ExprKind::Const(Constant::Int(v.get("v")?.as_int()?)),
        "float" => match v.get("v")? {
            MacroValue::Float(f) => ExprKind::Const(Constant::Float(*f)),
            MacroValue::Int(i) => ExprKind::Const(Constant::Float(*i as f64)),
            _ => return None,
        },
        "string" => ExprKind::Const(Constant::Str(v.get("v")?.as_str()?.to_string())),
        "ident" => ExprKind::Const(Constant::Ident(v.get("v")?.as_str()?.to_string())),
        "index" => ExprKind::Array(
            Box::new(decode_expr(v.get("e1")?, span)?),
            Box::new(decode_expr(v.get("e2")?, span)?),
        ),
        "binop" => ExprKind::Binop(
            parse_binop(v.get("op")?.as_str()?)?,
            Box::new(decode_expr(v.get("e1")?, span)?),
            Box::new(decode_expr(v.get("e2")?, span)?),
        ),
        "unop" => {
            let op = match v.get("op")?.as_str()? {
                "++" => Unop::Increment,
                "--" => Unop::Decrement,
                "!" => Unop::Not,
                "-" => Unop::Neg,
                "~" => Unop::NegBits,
                _ => return None,
            };
            let flag = match v.get("postfix")? {
                MacroValue::Bool(true) => UnopFlag::Postfix,
                _ => UnopFlag::Prefix,
            };
            ExprKind::Unop(op, flag, Box::new(decode_expr(v.get("e")?, span)?))
        }
        "field" => ExprKind::Field(
            Box::new(decode_expr(v.get("e")?, span)?),
            v.get("name")?.as_str()?.to_string(),
        ),
        "paren" => ExprKind::Paren(Box::new(decode_expr(v.get("e")?, span)?)),
        "object" => ExprKind::Object(
            v.get("fields")?
                .as_array()?
                .iter()
                .map(|f| {
                    Some((
                        f.get("name")?.as_str()?.to_string(),
                        decode_expr(f.get("expr")?, span)?,
                    ))
                })
                .collect::<Option<Vec<_>>>()?,
        ),
        "array" => ExprKind::ArrayDecl(decode_exprs(v.get("el")?)?),
        "call" => ExprKind::Call(
            Box::new(decode_expr(v.get("e")?, span)?),
            decode_exprs(v.get("args")?)?,
        ),
        "new" => {
            let TypeHint::Path(path) = decode_hint(v.get("path")?)? else {
                return None;
            };
            ExprKind::New(path, decode_exprs(v.get("args")?)?)
        }
        "vars" => ExprKind::Vars(
            v.get("decls")?
                .as_array()?
                .iter()
                .map(|d| {
                    Some(VarDecl {
                        name: d.get("name")?.as_str()?.to_string(),
                        hint: match d.get("type")? {
                            MacroValue::Null => None,
                            other => Some(decode_hint(other)?),
                        },
                        init: decode_opt_expr(d.get("init")?, span)?,
                    })
                })
                .collect::<Option<Vec<_>>>()?,
        ),
        "function" => {
            let args = v
                .get("args")?
                .as_array()?
                .iter()
                .map(|a| {
                    Some(FunArgDecl {
                        name: a.get("name")?.as_str()?.to_string(),
                        opt: matches!(a.get("opt")?, MacroValue::Bool(true)),
                        hint: match a.get("type")? {
                            MacroValue::Null => None,
                            other => Some(decode_hint(other)?),
                        },
                    })
                })
                .collect::<Option<Vec<_>>>()?;
            let ret = match v.get("ret")? {
                MacroValue::Null => None,
                other => Some(decode_hint(other)?),
            };
            ExprKind::Function(FunctionDecl {
                args,
                ret,
                body: Box::new(decode_expr(v.get("body")?, span)?),
            })
        }
        "block" => ExprKind::Block(decode_exprs(v.get("el")?)?),
        "if" => ExprKind::If(
            Box::new(decode_expr(v.get("cond")?, span)?),
            Box::new(decode_expr(v.get("then")?, span)?),
            decode_opt_expr(v.get("else")?, span)?.map(Box::new),
        ),
        "ternary" => ExprKind::Ternary(
            Box::new(decode_expr(v.get("cond")?, span)?),
            Box::new(decode_expr(v.get("then")?, span)?),
            Box::new(decode_expr(v.get("else")?, span)?),
        ),
        "while" => ExprKind::While(
            Box::new(decode_expr(v.get("cond")?, span)?),
            Box::new(decode_expr(v.get("body")?, span)?),
            if matches!(v.get("do")?, MacroValue::Bool(true)) {
                WhileFlag::DoWhile
            } else {
                WhileFlag::NormalWhile
            },
        ),
        "for" => ExprKind::For(
            v.get("v")?.as_str()?.to_string(),
            Box::new(decode_expr(v.get("it")?, span)?),
            Box::new(decode_expr(v.get("body")?, span)?),
        ),
        "switch" => ExprKind::Switch(
            Box::new(decode_expr(v.get("e")?, span)?),
            v.get("cases")?
                .as_array()?
                .iter()
                .map(|c| {
                    Some(SwitchCase {
                        values: decode_exprs(c.get("values")?)?,
                        body: decode_exprs(c.get("body")?)?,
                    })
                })
                .collect::<Option<Vec<_>>>()?,
            match v.get("default")? {
                MacroValue::Null => None,
                other => Some(decode_exprs(other)?),
            },
        ),
        "return" => ExprKind::Return(decode_opt_expr(v.get("e")?, span)?.map(Box::new)),
        "break" => ExprKind::Break,
        "continue" => ExprKind::Continue,
        "throw" => ExprKind::Throw(Box::new(decode_expr(v.get("e")?, span)?)),
        "try" => ExprKind::Try(
            Box::new(decode_expr(v.get("e")?, span)?),
            v.get("catches")?
                .as_array()?
                .iter()
                .map(|c| {
                    Some(Catch {
                        name: c.get("name")?.as_str()?.to_string(),
                        hint: decode_hint(c.get("type")?)?,
                        body: decode_expr(c.get("body")?, span)?,
                    })
                })
                .collect::<Option<Vec<_>>>()?,
        ),
        "untyped" => ExprKind::Untyped(Box::new(decode_expr(v.get("e")?, span)?)),
        "cast" => ExprKind::Cast(
            Box::new(decode_expr(v.get("e")?, span)?),
            match v.get("type")? {
                MacroValue::Null => None,
                other => Some(decode_hint(other)?),
            },
        ),
        "display" => ExprKind::Display(Box::new(decode_expr(v.get("e")?, span)?)),
        _ => return None,
    };
    Some(Expr::new(kind, span))
}
