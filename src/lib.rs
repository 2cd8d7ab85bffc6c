//! Semantic analysis and code generation for a small imperative language.
//!
//! The front end (outside this crate) parses source text into the typed AST
//! in [`frontend::ast`], resolving names through [`frontend::SymbolTable`] as
//! it goes. From there the pipeline is:
//!
//! 1. [`middle::type_check`] computes a type for every node and accumulates
//!    diagnostics without ever aborting,
//! 2. [`middle::lower`] flattens the tree into the control flow graph IR in
//!    [`middle::ir`],
//! 3. [`backend`] emits x86-64 assembly from the graph.
//!
//! [`compile`] runs the whole pipeline and refuses to generate code for a
//! program with recorded diagnostics.

pub mod backend;
pub mod diagnostics;
pub mod frontend;
pub mod index;
pub mod middle;

use thiserror::Error;

use crate::{
    diagnostics::Diagnostic,
    frontend::{Position, ast::DeclarationList},
    middle::type_check::TypeChecker,
};

#[derive(Debug, Error)]
pub enum CompileError {
    /// The program broke semantic rules; the diagnostics say how
    #[error("the program has {} diagnostic(s)", diagnostics.len())]
    InvalidProgram { diagnostics: Vec<Diagnostic> },
    /// A `break` with no enclosing loop. The front end's grammar should make
    /// this unrepresentable; seeing one means the AST was built by hand and
    /// built wrong.
    #[error("break outside of a loop at {0}")]
    BreakOutsideLoop(Position),
    /// The left side of an assignment was not a variable or array element
    #[error("assignment to a non-assignable expression at {0}")]
    InvalidAssignmentTarget(Position),
    /// An array declared inside a function body. Arrays only exist as global
    /// storage; a frame has nowhere to put one, and pretending otherwise
    /// would emit references to storage that is never reserved.
    #[error("array declared inside a function at {0}")]
    UnsupportedLocalArray(Position),
}

/// Compiles a resolved AST to assembly text.
///
/// `resolution_diagnostics` are whatever the front end's symbol table
/// recorded while the tree was built; they gate code generation exactly like
/// the checker's own findings.
pub fn compile(
    ast: &DeclarationList,
    mut resolution_diagnostics: Vec<Diagnostic>,
) -> Result<String, CompileError> {
    let results = TypeChecker::check(ast);
    resolution_diagnostics.extend(results.diagnostics);

    if !resolution_diagnostics.is_empty() {
        return Err(CompileError::InvalidProgram {
            diagnostics: resolution_diagnostics,
        });
    }

    let program = middle::lower::lower(ast)?;
    Ok(backend::generate_program(&program))
}
