//! The type checker.
//!
//! Walks the typed AST once, computing a type for every node by combining the
//! types of its children through the algebra in [`ty`](super::ty). The tree
//! itself is never mutated; computed types land in a side table keyed by
//! [`NodeId`]. Violations become accumulated [`Diagnostic`]s and the offending
//! node is assigned the `Error` sentinel so checking always runs to
//! completion. One root-cause mistake may therefore surface as several
//! diagnostics on dependent expressions; that cascade is deliberate.

use std::{collections::BTreeMap, rc::Rc};

use crate::{
    diagnostics::{Diagnostic, DiagnosticKind},
    frontend::{
        Position, Symbol,
        ast::{
            Call, Declaration, DeclarationKind, DeclarationList, Expression, ExpressionKind,
            NodeId, Operation, Statement, StatementKind, StatementList,
        },
    },
    middle::ty::Type,
};

/// The name a program's entry function must use
pub const ENTRY_FUNCTION_NAME: &str = "main";

/// Everything the checker learned about one program
#[derive(Debug)]
pub struct TypeCheckResults {
    /// The computed type of every expression (and effectful statement)
    pub types: BTreeMap<NodeId, Type>,
    /// Every semantic rule violation, in discovery order
    pub diagnostics: Vec<Diagnostic>,
}

impl TypeCheckResults {
    pub fn type_of(&self, id: NodeId) -> &Type {
        &self.types[&id]
    }
}

pub struct TypeChecker {
    types: BTreeMap<NodeId, Type>,
    diagnostics: Vec<Diagnostic>,
    current_function: Option<Rc<Symbol>>,
    /// Whether the previously checked statement unconditionally returns.
    /// Reset at the start of every branch and threaded through `if`/`for`;
    /// `break` leaves it untouched.
    last_statement_returns: bool,
}

impl TypeChecker {
    pub fn check(ast: &DeclarationList) -> TypeCheckResults {
        let mut checker = Self {
            types: BTreeMap::new(),
            diagnostics: Vec::new(),
            current_function: None,
            last_statement_returns: false,
        };

        for declaration in &ast.declarations {
            checker.check_declaration(declaration);
        }

        TypeCheckResults {
            types: checker.types,
            diagnostics: checker.diagnostics,
        }
    }

    fn add_type_error(&mut self, position: Position, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic::new(
            DiagnosticKind::TypeError,
            position,
            message,
        ));
    }

    /// Records the computed type of a node. Attaching an `Error` type records
    /// exactly one diagnostic at this node.
    fn set_node_type(&mut self, id: NodeId, position: Position, ty: Type) -> Type {
        if let Type::Error(message) = &ty {
            let message = message.clone();
            self.add_type_error(position, message);
        }
        self.types.insert(id, ty.clone());
        ty
    }

    /// The declared type of a symbol, or the `Error` sentinel for symbols
    /// produced by a failed declaration or lookup
    fn symbol_type(&self, symbol: &Symbol) -> Type {
        symbol.ty().cloned().unwrap_or_else(|| {
            Type::Error(format!("symbol {} has no usable type", symbol.name()))
        })
    }

    fn check_declaration(&mut self, declaration: &Declaration) {
        match &declaration.kind {
            DeclarationKind::Variable(symbol) => {
                self.check_variable_declaration(declaration.position, symbol);
            }
            DeclarationKind::Array(symbol) => {
                self.check_array_declaration(declaration.position, symbol);
            }
            DeclarationKind::Function(function) => {
                self.check_function_definition(declaration.position, function);
            }
        }
    }

    fn check_variable_declaration(&mut self, position: Position, symbol: &Symbol) {
        if !matches!(symbol.ty(), Some(Type::Int | Type::Bool)) {
            self.add_type_error(position, "Invalid type in variable declaration");
        }
        self.last_statement_returns = false;
    }

    fn check_array_declaration(&mut self, position: Position, symbol: &Symbol) {
        let base_is_valid = matches!(
            symbol.ty(),
            Some(Type::Array { base, .. }) if matches!(**base, Type::Int | Type::Bool)
        );
        if !base_is_valid {
            self.add_type_error(position, "Invalid type in array declaration");
        }
        self.last_statement_returns = false;
    }

    fn check_function_definition(
        &mut self,
        position: Position,
        function: &crate::frontend::ast::FunctionDefinition,
    ) {
        let symbol = &function.symbol;
        let is_entry = symbol.name() == ENTRY_FUNCTION_NAME;

        if let Some(Type::Func { params, ret }) = symbol.ty() {
            if is_entry {
                if !matches!(**ret, Type::Void) {
                    self.add_type_error(position, "The return type of main function must be void");
                }
                if !params.is_empty() {
                    self.add_type_error(position, "The main function must have no arguments");
                }
            }

            for param in params {
                if !matches!(param, Type::Int | Type::Bool) {
                    self.add_type_error(position, "Invalid type in function parameter");
                }
            }
        } else {
            self.add_type_error(position, "Invalid type in function definition");
        }

        self.current_function = Some(symbol.clone());
        self.last_statement_returns = false;
        self.check_statement_list(&function.body);
        self.current_function = None;
    }

    fn check_statement_list(&mut self, list: &StatementList) {
        let mut first = true;
        for statement in &list.statements {
            if !first && self.last_statement_returns {
                self.add_type_error(statement.position, "Unreachable statement");
            }
            self.check_statement(statement);
            first = false;
        }
    }

    fn check_statement(&mut self, statement: &Statement) {
        match &statement.kind {
            StatementKind::VariableDeclaration(symbol) => {
                self.check_variable_declaration(statement.position, symbol);
            }
            StatementKind::ArrayDeclaration(symbol) => {
                self.check_array_declaration(statement.position, symbol);
            }
            StatementKind::Assignment { location, value } => {
                let location_ty = self.check_expression(location);
                let value_ty = self.check_expression(value);
                let assign_ty = location_ty.assign(&value_ty);
                self.set_node_type(statement.id, statement.position, assign_ty);
                self.last_statement_returns = false;
            }
            StatementKind::Call(call) => {
                let ty = self.check_call(call);
                self.set_node_type(statement.id, statement.position, ty);
                self.last_statement_returns = false;
            }
            StatementKind::If {
                condition,
                then_block,
                else_block,
            } => {
                let condition_ty = self.check_expression(condition);
                if !condition_ty.equivalent(&Type::Bool) {
                    self.add_type_error(
                        statement.position,
                        "Condition is not a boolean expression",
                    );
                }

                self.last_statement_returns = false;
                self.check_statement_list(then_block);
                self.last_statement_returns = false;
                self.check_statement_list(else_block);
                self.last_statement_returns = false;
            }
            StatementKind::For {
                init,
                condition,
                increment,
                body,
            } => {
                self.check_statement(init);
                let condition_ty = self.check_expression(condition);
                if !condition_ty.equivalent(&Type::Bool) {
                    self.add_type_error(
                        statement.position,
                        "Condition is not a boolean expression",
                    );
                }

                self.last_statement_returns = false;
                self.check_statement_list(body);
                self.check_statement(increment);
                self.last_statement_returns = false;
            }
            StatementKind::Break => {
                // deliberately does not touch the returns flag
            }
            StatementKind::Return { value } => {
                let value_ty = match value {
                    Some(expression) => self.check_expression(expression),
                    None => Type::Void,
                };

                let declared_ret = match self.current_function.as_deref().map(|s| s.ty()) {
                    Some(Some(Type::Func { ret, .. })) => (**ret).clone(),
                    _ => Type::Error("return outside of a well-typed function".into()),
                };

                if !declared_ret.equivalent(&value_ty) && !value_ty.is_error() {
                    self.add_type_error(
                        statement.position,
                        "The return value's type does not match function's return type",
                    );
                }
                self.last_statement_returns = true;
            }
        }
    }

    fn check_expression(&mut self, expression: &Expression) -> Type {
        let ty = match &expression.kind {
            ExpressionKind::VarAccess(symbol) => self.symbol_type(symbol),
            ExpressionKind::ArrayAccess { base, index } => {
                let index_ty = self.check_expression(index);
                self.symbol_type(base).index(&index_ty)
            }
            ExpressionKind::LiteralBool(_) => Type::Bool,
            ExpressionKind::LiteralInt(_) => Type::Int,
            ExpressionKind::Call(call) => self.check_call(call),
            ExpressionKind::Op { op, lhs, rhs } => {
                let lhs_ty = self.check_expression(lhs);

                match (op, rhs) {
                    (Operation::LogicNot, _) => lhs_ty.not(),
                    (_, Some(rhs)) => {
                        let rhs_ty = self.check_expression(rhs);
                        match op {
                            Operation::Add => lhs_ty.add(&rhs_ty),
                            Operation::Sub => lhs_ty.sub(&rhs_ty),
                            Operation::Mul => lhs_ty.mul(&rhs_ty),
                            Operation::Div => lhs_ty.div(&rhs_ty),
                            Operation::LogicAnd => lhs_ty.and(&rhs_ty),
                            Operation::LogicOr => lhs_ty.or(&rhs_ty),
                            _ => lhs_ty.compare(&rhs_ty),
                        }
                    }
                    (_, None) => Type::Error(format!("binary operation {op} is missing an operand")),
                }
            }
        };

        self.set_node_type(expression.id, expression.position, ty)
    }

    fn check_call(&mut self, call: &Call) -> Type {
        let argument_types = call
            .arguments
            .iter()
            .map(|argument| self.check_expression(argument))
            .collect::<Vec<_>>();

        self.symbol_type(&call.callee).call(&argument_types)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::ast::NodeIdAllocator;

    struct TestAst {
        ids: NodeIdAllocator,
    }

    impl TestAst {
        fn new() -> Self {
            Self {
                ids: NodeIdAllocator::new(),
            }
        }

        fn pos(&self, line: u32) -> Position {
            Position::new(line, 0)
        }

        fn expr(&mut self, line: u32, kind: ExpressionKind) -> Expression {
            Expression {
                id: self.ids.allocate(),
                position: self.pos(line),
                kind,
            }
        }

        fn stmt(&mut self, line: u32, kind: StatementKind) -> Statement {
            Statement {
                id: self.ids.allocate(),
                position: self.pos(line),
                kind,
            }
        }

        fn block(&mut self, line: u32, statements: Vec<Statement>) -> StatementList {
            StatementList {
                id: self.ids.allocate(),
                position: self.pos(line),
                statements,
            }
        }

        fn int(&mut self, line: u32, value: i64) -> Expression {
            self.expr(line, ExpressionKind::LiteralInt(value))
        }

        fn ret(&mut self, line: u32) -> Statement {
            self.stmt(line, StatementKind::Return { value: None })
        }

        fn function(
            &mut self,
            line: u32,
            symbol: Rc<Symbol>,
            parameters: Vec<Rc<Symbol>>,
            body: StatementList,
        ) -> DeclarationList {
            let declaration = Declaration {
                id: self.ids.allocate(),
                position: self.pos(line),
                kind: DeclarationKind::Function(crate::frontend::ast::FunctionDefinition {
                    symbol,
                    parameters,
                    body,
                }),
            };
            DeclarationList {
                declarations: vec![declaration],
            }
        }
    }

    fn void_main_symbol() -> Rc<Symbol> {
        Symbol::new("main", Type::function(vec![], Type::Void))
    }

    #[test]
    fn statement_after_unconditional_return_is_unreachable() {
        let mut ast = TestAst::new();
        let x = Symbol::new("x", Type::Int);

        let first_return = ast.ret(2);
        let dead = ast.stmt(3, StatementKind::VariableDeclaration(x));
        let body = ast.block(1, vec![first_return, dead]);
        let program = ast.function(1, void_main_symbol(), vec![], body);

        let results = TypeChecker::check(&program);

        assert_eq!(results.diagnostics.len(), 1);
        assert_eq!(
            results.diagnostics[0].to_string(),
            "TypeError(3)[Unreachable statement]"
        );
    }

    #[test]
    fn return_in_a_single_if_branch_does_not_make_the_rest_unreachable() {
        let mut ast = TestAst::new();

        let condition = ast.expr(2, ExpressionKind::LiteralBool(true));
        let then_return = ast.ret(2);
        let then_block = ast.block(2, vec![then_return]);
        let else_block = ast.block(2, vec![]);
        let branch = ast.stmt(
            2,
            StatementKind::If {
                condition,
                then_block,
                else_block,
            },
        );
        let after = ast.ret(3);
        let body = ast.block(1, vec![branch, after]);
        let program = ast.function(1, void_main_symbol(), vec![], body);

        let results = TypeChecker::check(&program);

        assert!(results.diagnostics.is_empty(), "{:?}", results.diagnostics);
    }

    #[test]
    fn break_does_not_reset_the_returns_flag() {
        let mut ast = TestAst::new();

        let first_return = ast.ret(2);
        let dead_break = ast.stmt(3, StatementKind::Break);
        let also_dead = ast.ret(4);
        let body = ast.block(1, vec![first_return, dead_break, also_dead]);
        let program = ast.function(1, void_main_symbol(), vec![], body);

        let results = TypeChecker::check(&program);

        // both the break and the return behind it are unreachable
        assert_eq!(results.diagnostics.len(), 2);
        assert!(
            results
                .diagnostics
                .iter()
                .all(|d| d.kind == DiagnosticKind::TypeError
                    && d.message == "Unreachable statement")
        );
    }

    #[test]
    fn entry_function_must_be_void_with_no_parameters() {
        let mut ast = TestAst::new();
        let symbol = Symbol::new("main", Type::function(vec![Type::Int], Type::Int));
        let parameter = Symbol::new("n", Type::Int);

        let value = ast.int(2, 0);
        let ret = ast.stmt(2, StatementKind::Return { value: Some(value) });
        let body = ast.block(1, vec![ret]);
        let program = ast.function(1, symbol, vec![parameter], body);

        let results = TypeChecker::check(&program);

        assert_eq!(results.diagnostics.len(), 2);
        assert!(
            results
                .diagnostics
                .iter()
                .all(|d| d.kind == DiagnosticKind::TypeError)
        );
    }

    #[test]
    fn if_condition_must_be_boolean() {
        let mut ast = TestAst::new();

        let condition = ast.int(2, 1);
        let then_block = ast.block(2, vec![]);
        let else_block = ast.block(2, vec![]);
        let branch = ast.stmt(
            2,
            StatementKind::If {
                condition,
                then_block,
                else_block,
            },
        );
        let body = ast.block(1, vec![branch]);
        let program = ast.function(1, void_main_symbol(), vec![], body);

        let results = TypeChecker::check(&program);

        assert_eq!(results.diagnostics.len(), 1);
        assert_eq!(
            results.diagnostics[0].message,
            "Condition is not a boolean expression"
        );
    }

    #[test]
    fn uses_of_an_error_symbol_propagate_without_crashing() {
        let mut ast = TestAst::new();
        let broken = Symbol::new_error("x");

        let lhs = ast.expr(2, ExpressionKind::VarAccess(broken.clone()));
        let one = ast.int(2, 1);
        let sum = ast.expr(
            2,
            ExpressionKind::Op {
                op: Operation::Add,
                lhs: Box::new(lhs),
                rhs: Some(Box::new(one)),
            },
        );
        let location = ast.expr(2, ExpressionKind::VarAccess(broken));
        let assignment = ast.stmt(
            2,
            StatementKind::Assignment {
                location,
                value: sum,
            },
        );
        let body = ast.block(1, vec![assignment]);
        let program = ast.function(1, void_main_symbol(), vec![], body);

        let results = TypeChecker::check(&program);

        // one diagnostic per node the error type cascades through
        assert!(!results.diagnostics.is_empty());
        assert!(
            results
                .diagnostics
                .iter()
                .all(|d| d.kind == DiagnosticKind::TypeError)
        );
    }

    #[test]
    fn declared_variable_types_are_restricted_to_int_and_bool() {
        let mut ast = TestAst::new();
        let void_var = Symbol::new("v", Type::Void);

        let declaration = ast.stmt(2, StatementKind::VariableDeclaration(void_var));
        let body = ast.block(1, vec![declaration]);
        let program = ast.function(1, void_main_symbol(), vec![], body);

        let results = TypeChecker::check(&program);

        assert_eq!(results.diagnostics.len(), 1);
        assert_eq!(
            results.diagnostics[0].message,
            "Invalid type in variable declaration"
        );
    }
}
