// src/module/stdlib.rs
//! Programmatic core library.
//!
//! A real toolchain loads these from source through the parser; the crate
//! builds them directly so the context factory and tests have a working
//! class path without one.

use std::rc::Rc;

use crate::module::{MemoryLoader, ModuleDef};
use crate::sema::types::{
    AliasDef, AnonField, AnonStatus, AnonType, ClassDef, ClassField, ClassRef, EnumCtor, EnumDef,
    FieldKind, FunArg, Type, TypeDecl, TypeParam, TypePath, VarAccess,
};

fn inst(c: &ClassRef) -> Type {
    Type::Inst(c.clone(), Vec::new())
}

fn read_only(name: &str, ty: Type) -> Rc<ClassField> {
    ClassField::new(
        name,
        ty,
        FieldKind::Var {
            read: VarAccess::Normal,
            write: VarAccess::Never,
        },
    )
}

/// Build a loader holding the core modules: StdTypes (Void, Bool, Float,
/// Int, Null), String, Array, IntIter, PosInfos and Log.
pub fn core_loader() -> MemoryLoader {
    let mut loader = MemoryLoader::new();

    // StdTypes
    let void_enum = EnumDef::new(TypePath::plain("Void"));
    void_enum.borrow_mut().is_extern = true;

    let bool_class = ClassDef::new(TypePath::plain("Bool"));
    bool_class.borrow_mut().is_extern = true;

    let float_class = ClassDef::new(TypePath::plain("Float"));
    float_class.borrow_mut().is_extern = true;

    let int_class = ClassDef::new(TypePath::plain("Int"));
    {
        let mut def = int_class.borrow_mut();
        def.is_extern = true;
        def.super_class = Some((float_class.clone(), Vec::new()));
    }

    let null_alias = {
        let tp = TypeParam::fresh("T");
        let a = AliasDef::new(TypePath::plain("Null"), tp.ty.clone());
        a.borrow_mut().params.push(tp);
        a
    };

    loader.register(ModuleDef::new(
        "StdTypes",
        vec![
            TypeDecl::Enum(void_enum.clone()),
            TypeDecl::Class(bool_class.clone()),
            TypeDecl::Class(float_class.clone()),
            TypeDecl::Class(int_class.clone()),
            TypeDecl::Alias(null_alias),
        ],
    ));
    let tvoid = Type::Enum(void_enum, Vec::new());

    let tint = inst(&int_class);
    let tbool = inst(&bool_class);

    // String
    let string_class = ClassDef::new(TypePath::plain("String"));
    {
        let mut def = string_class.borrow_mut();
        def.is_extern = true;
        let tstring = Type::Inst(string_class.clone(), Vec::new());
        def.fields.push(read_only("length", tint.clone()));
        def.fields.push(ClassField::method(
            "charAt",
            vec![FunArg::new("index", tint.clone())],
            tstring.clone(),
        ));
        def.fields.push(ClassField::method(
            "indexOf",
            vec![
                FunArg::new("value", tstring.clone()),
                FunArg::optional("startIndex", tint.clone()),
            ],
            tint.clone(),
        ));
    }
    loader.register_type(TypeDecl::Class(string_class.clone()));
    let tstring = inst(&string_class);

    // Array<T>
    let array_class = ClassDef::new(TypePath::plain("Array"));
    {
        let tp = TypeParam::fresh("T");
        let elem = tp.ty.clone();
        let mut def = array_class.borrow_mut();
        def.is_extern = true;
        def.array_access = Some(elem.clone());
        def.fields.push(read_only("length", tint.clone()));
        def.fields.push(ClassField::method(
            "push",
            vec![FunArg::new("x", elem.clone())],
            tint.clone(),
        ));
        def.fields.push(ClassField::method(
            "iterator",
            Vec::new(),
            iterator_anon(elem.clone(), tbool.clone()),
        ));
        def.params.push(tp);
        def.constructor = Some(ClassField::method("new", Vec::new(), Type::Dynamic));
    }
    loader.register_type(TypeDecl::Class(array_class));

    // IntIter
    let int_iter = ClassDef::new(TypePath::plain("IntIter"));
    {
        let mut def = int_iter.borrow_mut();
        def.fields.push(read_only("min", tint.clone()));
        def.fields.push(read_only("max", tint.clone()));
        def.fields
            .push(ClassField::method("hasNext", Vec::new(), tbool.clone()));
        def.fields
            .push(ClassField::method("next", Vec::new(), tint.clone()));
        def.constructor = Some(ClassField::method(
            "new",
            vec![
                FunArg::new("min", tint.clone()),
                FunArg::new("max", tint.clone()),
            ],
            Type::Dynamic,
        ));
    }
    loader.register_type(TypeDecl::Class(int_iter));

    // PosInfos
    let pos_infos = AliasDef::new(
        TypePath::plain("PosInfos"),
        Type::Anon(AnonType::new(
            vec![
                AnonField {
                    name: "fileName".to_string(),
                    ty: tstring.clone(),
                },
                AnonField {
                    name: "lineNumber".to_string(),
                    ty: tint.clone(),
                },
                AnonField {
                    name: "className".to_string(),
                    ty: tstring.clone(),
                },
                AnonField {
                    name: "methodName".to_string(),
                    ty: tstring.clone(),
                },
            ],
            AnonStatus::Closed,
        )),
    );
    loader.register_type(TypeDecl::Alias(pos_infos.clone()));

    // Log
    let log_class = ClassDef::new(TypePath::plain("Log"));
    {
        let mut def = log_class.borrow_mut();
        def.statics.push(ClassField::method(
            "trace",
            vec![
                FunArg::new("v", Type::Dynamic),
                FunArg::optional("infos", Type::Alias(pos_infos, Vec::new())),
            ],
            tvoid,
        ));
    }
    loader.register_type(TypeDecl::Class(log_class));

    loader
}

/// The structural iterator protocol over `elem`.
fn iterator_anon(elem: Type, tbool: Type) -> Type {
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

/// Convenience for tests and drivers: a two-constructor option-style enum.
pub fn demo_option_enum() -> crate::sema::types::EnumRef {
    let e = EnumDef::new(TypePath::plain("Option"));
    {
        let tp = TypeParam::fresh("T");
        let value = tp.ty.clone();
        let mut def = e.borrow_mut();
        def.params.push(tp);
        def.constructors.push(Rc::new(EnumCtor {
            name: "Some".to_string(),
            index: 0,
            args: vec![FunArg::new("v", value)],
            pos: Default::default(),
        }));
        def.constructors.push(Rc::new(EnumCtor {
            name: "None".to_string(),
            index: 1,
            args: Vec::new(),
            pos: Default::default(),
        }));
    }
    e
}
