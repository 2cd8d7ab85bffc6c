//! The boundary with the parsing front end.
//!
//! Lexing, parsing, and the mechanical conversion of parse trees into the
//! typed AST live outside this crate. What the front end hands us is defined
//! here: source positions, declaration symbols, and the scoped symbol table
//! it uses to resolve names while building the AST in [`ast`].

use std::{
    rc::Rc,
    sync::atomic::{AtomicU32, Ordering},
};

use hashbrown::HashMap;
use once_cell::sync::Lazy;

use crate::{
    diagnostics::{Diagnostic, DiagnosticKind},
    middle::ty::Type,
};

pub mod ast;

/// A location in the original source text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub line: u32,
    pub column: u32,
}

impl Position {
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

impl core::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

static NEXT_SYMBOL_ID: AtomicU32 = AtomicU32::new(0);

/// A declared name together with its declared type.
///
/// Symbols are created once, at the point of declaration, and shared by
/// reference (`Rc`) with every AST node that names them. A symbol produced by
/// a failed declaration or lookup carries no type at all; consumers see
/// `ty() == None` and substitute the error sentinel instead of faulting.
///
/// Equality and hashing are by identity, not by name, so shadowed names in
/// nested scopes stay distinct.
#[derive(Debug)]
pub struct Symbol {
    id: u32,
    name: String,
    ty: Option<Type>,
}

impl Symbol {
    pub fn new(name: impl Into<String>, ty: Type) -> Rc<Self> {
        Rc::new(Self {
            id: NEXT_SYMBOL_ID.fetch_add(1, Ordering::Relaxed),
            name: name.into(),
            ty: Some(ty),
        })
    }

    /// Creates the typeless symbol handed out after a failed lookup or
    /// redefinition, so downstream analysis can keep going.
    pub fn new_error(name: impl Into<String>) -> Rc<Self> {
        Rc::new(Self {
            id: NEXT_SYMBOL_ID.fetch_add(1, Ordering::Relaxed),
            name: name.into(),
            ty: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ty(&self) -> Option<&Type> {
        self.ty.as_ref()
    }
}

impl PartialEq for Symbol {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Symbol {}

impl core::hash::Hash for Symbol {
    fn hash<H: core::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl core::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.ty {
            Some(ty) => write!(f, "Symbol({}:{ty})", self.name),
            None => write!(f, "Symbol({})", self.name),
        }
    }
}

/// Runtime functions every program can call without declaring them
static BUILT_IN_FUNCTIONS: Lazy<Vec<(&'static str, Type)>> = Lazy::new(|| {
    vec![
        ("readInt", Type::function(vec![], Type::Int)),
        ("readChar", Type::function(vec![], Type::Int)),
        ("printBool", Type::function(vec![Type::Bool], Type::Void)),
        ("printInt", Type::function(vec![Type::Int], Type::Void)),
        ("printChar", Type::function(vec![Type::Int], Type::Void)),
        ("println", Type::function(vec![], Type::Void)),
    ]
});

/// A stack of lexical scopes mapping names to their declaration symbols.
///
/// The front end drives this while building the AST: `enter`/`exit` bracket
/// each block, `add` declares, `lookup` resolves a use. Failed operations are
/// recorded as diagnostics and answered with an error symbol rather than
/// stopping the build.
#[derive(Debug)]
pub struct SymbolTable {
    scopes: Vec<HashMap<String, Rc<Symbol>>>,
    diagnostics: Vec<Diagnostic>,
}

impl SymbolTable {
    /// Creates a table whose outermost scope holds the runtime built-ins
    pub fn new() -> Self {
        let mut globals = HashMap::new();

        for (name, ty) in BUILT_IN_FUNCTIONS.iter() {
            globals.insert(name.to_string(), Symbol::new(*name, ty.clone()));
        }

        Self {
            scopes: vec![globals],
            diagnostics: Vec::new(),
        }
    }

    pub fn enter(&mut self) {
        self.scopes.push(HashMap::new());
    }

    pub fn exit(&mut self) {
        assert!(self.scopes.len() > 1, "cannot exit the global scope");
        self.scopes.pop();
    }

    /// Declares `name` in the innermost scope. Redeclaring a name already
    /// present in that scope records a `RedefinitionError` and yields an
    /// error symbol.
    pub fn add(&mut self, position: Position, name: &str, ty: Type) -> Rc<Symbol> {
        let scope = self.scopes.last_mut().unwrap();

        if scope.contains_key(name) {
            self.diagnostics.push(Diagnostic::new(
                DiagnosticKind::RedefinitionError,
                position,
                format!("Variable {name} already declared."),
            ));
            return Symbol::new_error(name);
        }

        let symbol = Symbol::new(name, ty);
        scope.insert(name.to_string(), symbol.clone());
        symbol
    }

    /// Resolves `name` against the scopes from innermost to outermost. An
    /// unknown name records a `ResolveSymbolError` and yields an error symbol.
    pub fn lookup(&mut self, position: Position, name: &str) -> Rc<Symbol> {
        match self.find(name) {
            Some(symbol) => symbol,
            None => {
                self.diagnostics.push(Diagnostic::new(
                    DiagnosticKind::ResolveSymbolError,
                    position,
                    format!("Could not find {name}."),
                ));
                Symbol::new_error(name)
            }
        }
    }

    fn find(&self, name: &str) -> Option<Rc<Symbol>> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name).cloned())
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.diagnostics)
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redeclaring_a_name_in_the_same_scope_records_one_redefinition_error() {
        let mut table = SymbolTable::new();
        table.enter();

        let first = table.add(Position::new(1, 0), "x", Type::Int);
        let second = table.add(Position::new(2, 0), "x", Type::Int);

        assert!(first.ty().is_some());
        assert!(second.ty().is_none());
        assert_eq!(table.diagnostics().len(), 1);
        assert_eq!(table.diagnostics()[0].kind, DiagnosticKind::RedefinitionError);
    }

    #[test]
    fn shadowing_in_a_nested_scope_is_allowed() {
        let mut table = SymbolTable::new();
        table.enter();
        let outer = table.add(Position::new(1, 0), "x", Type::Int);

        table.enter();
        let inner = table.add(Position::new(2, 0), "x", Type::Bool);
        let resolved = table.lookup(Position::new(3, 0), "x");
        table.exit();

        assert_eq!(resolved, inner);
        assert_ne!(resolved, outer);
        assert!(table.diagnostics().is_empty());
    }

    #[test]
    fn unknown_names_resolve_to_an_error_symbol() {
        let mut table = SymbolTable::new();

        let symbol = table.lookup(Position::new(4, 2), "missing");

        assert!(symbol.ty().is_none());
        assert_eq!(
            table.diagnostics()[0].to_string(),
            "ResolveSymbolError(4)[Could not find missing.]"
        );
    }

    #[test]
    fn built_ins_are_visible_from_any_scope() {
        let mut table = SymbolTable::new();
        table.enter();

        let print_int = table.lookup(Position::new(1, 0), "printInt");

        assert_eq!(
            print_int.ty(),
            Some(&Type::function(vec![Type::Int], Type::Void))
        );
    }
}
