//! The typed AST handed to us by the front end.
//!
//! Nodes are read-only once built. The type checker never writes into the
//! tree; it records the computed type of each node in a side table keyed by
//! [`NodeId`].

use std::rc::Rc;

use crate::{
    frontend::{Position, Symbol},
    index::simple_index,
};

simple_index! {
    /// Identifies an AST node within one program
    pub struct NodeId;
}

/// Hands out the `NodeId`s for one program. Owned by whoever builds the tree.
#[derive(Debug, Default)]
pub struct NodeIdAllocator {
    next: usize,
}

impl NodeIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&mut self) -> NodeId {
        let id = crate::index::Index::new(self.next);
        self.next += 1;
        id
    }
}

/// The root of a program: its top level declarations, in source order
#[derive(Debug)]
pub struct DeclarationList {
    pub declarations: Vec<Declaration>,
}

#[derive(Debug)]
pub struct Declaration {
    pub id: NodeId,
    pub position: Position,
    pub kind: DeclarationKind,
}

#[derive(Debug)]
pub enum DeclarationKind {
    Variable(Rc<Symbol>),
    Array(Rc<Symbol>),
    Function(FunctionDefinition),
}

#[derive(Debug)]
pub struct FunctionDefinition {
    pub symbol: Rc<Symbol>,
    pub parameters: Vec<Rc<Symbol>>,
    pub body: StatementList,
}

#[derive(Debug)]
pub struct StatementList {
    pub id: NodeId,
    pub position: Position,
    pub statements: Vec<Statement>,
}

#[derive(Debug)]
pub struct Statement {
    pub id: NodeId,
    pub position: Position,
    pub kind: StatementKind,
}

#[derive(Debug)]
pub enum StatementKind {
    VariableDeclaration(Rc<Symbol>),
    ArrayDeclaration(Rc<Symbol>),
    Assignment {
        location: Expression,
        value: Expression,
    },
    Call(Call),
    If {
        condition: Expression,
        then_block: StatementList,
        else_block: StatementList,
    },
    For {
        init: Box<Statement>,
        condition: Expression,
        increment: Box<Statement>,
        body: StatementList,
    },
    Break,
    Return {
        value: Option<Expression>,
    },
}

#[derive(Debug)]
pub struct Expression {
    pub id: NodeId,
    pub position: Position,
    pub kind: ExpressionKind,
}

#[derive(Debug)]
pub enum ExpressionKind {
    VarAccess(Rc<Symbol>),
    ArrayAccess {
        base: Rc<Symbol>,
        index: Box<Expression>,
    },
    LiteralBool(bool),
    LiteralInt(i64),
    Call(Call),
    Op {
        op: Operation,
        lhs: Box<Expression>,
        /// `None` only for [`Operation::LogicNot`]
        rhs: Option<Box<Expression>>,
    },
}

#[derive(Debug)]
pub struct Call {
    pub callee: Rc<Symbol>,
    pub arguments: Vec<Expression>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Operation {
    Add,
    Sub,
    Mul,
    Div,
    Ge,
    Gt,
    Le,
    Lt,
    Eq,
    Ne,
    LogicAnd,
    LogicOr,
    LogicNot,
}

impl Operation {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            Operation::Ge
                | Operation::Gt
                | Operation::Le
                | Operation::Lt
                | Operation::Eq
                | Operation::Ne
        )
    }

    pub fn is_arithmetic(self) -> bool {
        matches!(
            self,
            Operation::Add | Operation::Sub | Operation::Mul | Operation::Div
        )
    }
}
