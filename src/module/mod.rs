// src/module/mod.rs
//! Module loading interface.
//!
//! The loader is an external collaborator: it resolves a dotted module path
//! to a set of finished type declarations (declaration-level building has
//! already happened on its side). The typer only caches and orders what the
//! loader hands back.

pub mod stdlib;

use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::sema::types::{TypeDecl, TypePath};

/// A loaded module: its dotted path and the declarations it contains.
#[derive(Debug)]
pub struct ModuleDef {
    pub path: String,
    pub types: Vec<TypeDecl>,
}

impl ModuleDef {
    pub fn new(path: &str, types: Vec<TypeDecl>) -> Rc<Self> {
        Rc::new(Self {
            path: path.to_string(),
            types,
        })
    }

    pub fn find(&self, name: &str) -> Option<TypeDecl> {
        self.types.iter().find(|t| t.path().name == name).cloned()
    }

    /// The declaration sharing the module's own (last-segment) name.
    pub fn main_type(&self) -> Option<TypeDecl> {
        let name = self.path.rsplit('.').next().unwrap_or(&self.path);
        self.find(name)
    }
}

pub trait ModuleLoader {
    /// Resolve a dotted path; `None` when no such module exists.
    fn load_module(&self, path: &str) -> Option<Rc<ModuleDef>>;
}

/// In-memory loader backed by a registration map. Used for the core library
/// and by tests; a real driver wires a filesystem loader here.
#[derive(Default)]
pub struct MemoryLoader {
    modules: FxHashMap<String, Rc<ModuleDef>>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, module: Rc<ModuleDef>) {
        self.modules.insert(module.path.clone(), module);
    }

    /// Register a single-type module named after the declaration.
    pub fn register_type(&mut self, decl: TypeDecl) {
        let TypePath { pack, name } = decl.path();
        let path = if pack.is_empty() {
            name.clone()
        } else {
            format!("{}.{}", pack.join("."), name)
        };
        self.register(ModuleDef::new(&path, vec![decl]));
    }
}

impl ModuleLoader for MemoryLoader {
    fn load_module(&self, path: &str) -> Option<Rc<ModuleDef>> {
        self.modules.get(path).cloned()
    }
}
