//! The control flow graph IR that sits between the typed AST and the backend.
//!
//! A [`Function`] owns a flat arena of [`Instruction`]s addressed by
//! [`InstId`]. Control flow is the successor links on each instruction: every
//! instruction has at most one successor, except [`InstKind::Jump`] which has
//! two (index 0 taken when the predicate is false, index 1 when true) and
//! [`InstKind::Return`] which has none. Values are virtual registers
//! ([`LocalVar`]) and address registers ([`AddressVar`]); the backend maps
//! both onto stack slots.

pub mod pretty_print;

use std::rc::Rc;

use crate::{
    frontend::Symbol,
    index::{IndexVec, simple_index},
    middle::ty::Type,
};

simple_index! {
    /// Identifies an instruction within one function's arena
    pub struct InstId;
}

simple_index! {
    /// A virtual register holding an `int` or `bool` value
    pub struct LocalVar;
}

simple_index! {
    /// A virtual register holding a computed memory address
    pub struct AddressVar;
}

/// Either kind of virtual register, for backend slot assignment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Variable {
    Local(LocalVar),
    Address(AddressVar),
}

/// An operand that is either a register or an immediate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Value {
    Local(LocalVar),
    Int(i64),
    Bool(bool),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Predicate {
    Ge,
    Gt,
    Le,
    Lt,
    Eq,
    Ne,
}

#[derive(Debug)]
pub enum InstKind {
    /// Computes the address of a global, plus an optional element offset
    /// scaled by the word size
    AddressAt {
        dst: AddressVar,
        base: Rc<Symbol>,
        offset: Option<LocalVar>,
    },
    BinaryOp {
        op: BinaryOp,
        dst: LocalVar,
        lhs: LocalVar,
        rhs: LocalVar,
    },
    Compare {
        predicate: Predicate,
        dst: LocalVar,
        lhs: LocalVar,
        rhs: LocalVar,
    },
    Copy {
        dst: LocalVar,
        src: Value,
    },
    /// Two-way branch on a boolean register: successor 0 when false,
    /// successor 1 when true
    Jump {
        predicate: LocalVar,
    },
    /// Reads the word at an address register
    Load {
        dst: LocalVar,
        src: AddressVar,
    },
    /// Writes a value register to the word at an address register
    Store {
        dst: AddressVar,
        src: LocalVar,
    },
    /// A join point carrying no behavior of its own
    Nop,
    Return {
        value: Option<LocalVar>,
    },
    Call {
        callee: Rc<Symbol>,
        arguments: Vec<LocalVar>,
        /// Present exactly when the callee returns a value
        dst: Option<LocalVar>,
    },
    /// Boolean negation of a 0/1 register
    UnaryNot {
        dst: LocalVar,
        operand: LocalVar,
    },
}

#[derive(Debug)]
pub struct Instruction {
    pub kind: InstKind,
    successors: [Option<InstId>; 2],
}

impl Instruction {
    pub fn new(kind: InstKind) -> Self {
        Self {
            kind,
            successors: [None, None],
        }
    }

    /// How many successor slots this instruction may use
    pub fn max_successors(&self) -> usize {
        match self.kind {
            InstKind::Return { .. } => 0,
            InstKind::Jump { .. } => 2,
            _ => 1,
        }
    }

    pub fn successor(&self, index: usize) -> Option<InstId> {
        self.successors[index]
    }

    pub fn successors(&self) -> impl Iterator<Item = InstId> + '_ {
        self.successors.iter().flatten().copied()
    }
}

/// One function's control flow graph
#[derive(Debug)]
pub struct Function {
    pub name: String,
    pub ty: Type,
    /// The registers the function's parameters arrive in, in order
    pub arguments: Vec<LocalVar>,
    pub entry: Option<InstId>,
    instructions: IndexVec<InstId, Instruction>,
    next_local: usize,
    next_address: usize,
}

impl Function {
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        Self {
            name: name.into(),
            ty,
            arguments: Vec::new(),
            entry: None,
            instructions: IndexVec::new(),
            next_local: 0,
            next_address: 0,
        }
    }

    pub fn new_temp(&mut self) -> LocalVar {
        let var = crate::index::Index::new(self.next_local);
        self.next_local += 1;
        var
    }

    pub fn new_temp_address(&mut self) -> AddressVar {
        let var = crate::index::Index::new(self.next_address);
        self.next_address += 1;
        var
    }

    pub fn temp_value_count(&self) -> usize {
        self.next_local
    }

    pub fn temp_address_count(&self) -> usize {
        self.next_address
    }

    /// Appends an instruction to the arena with no successors wired yet
    pub fn emit(&mut self, kind: InstKind) -> InstId {
        self.instructions.push(Instruction::new(kind))
    }

    /// Wires `from`'s successor slot `index` to `to`, overwriting any
    /// previous link.
    ///
    /// # Panics
    ///
    /// Panics when `index` is outside the instruction's successor arity.
    pub fn set_successor(&mut self, from: InstId, index: usize, to: InstId) {
        let instruction = &mut self.instructions[from];
        assert!(
            index < instruction.max_successors(),
            "successor {index} out of range for {:?}",
            instruction.kind
        );
        instruction.successors[index] = Some(to);
    }

    pub fn instruction(&self, id: InstId) -> &Instruction {
        &self.instructions[id]
    }

    pub fn instructions(&self) -> impl Iterator<Item = (InstId, &'_ Instruction)> {
        self.instructions.enumerate()
    }
}

/// A global variable or array and its element count in words
#[derive(Debug)]
pub struct GlobalDecl {
    pub symbol: Rc<Symbol>,
    pub element_count: u64,
}

/// A whole lowered program
#[derive(Debug, Default)]
pub struct Program {
    pub globals: Vec<GlobalDecl>,
    pub functions: Vec<Function>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn successor_arity_follows_the_instruction_kind() {
        let mut function = Function::new("f", Type::function(vec![], Type::Void));
        let predicate = function.new_temp();

        let jump = function.emit(InstKind::Jump { predicate });
        let nop = function.emit(InstKind::Nop);
        let ret = function.emit(InstKind::Return { value: None });

        assert_eq!(function.instruction(jump).max_successors(), 2);
        assert_eq!(function.instruction(nop).max_successors(), 1);
        assert_eq!(function.instruction(ret).max_successors(), 0);

        function.set_successor(jump, 0, ret);
        function.set_successor(jump, 1, nop);
        function.set_successor(nop, 0, ret);

        assert_eq!(function.instruction(jump).successor(0), Some(ret));
        assert_eq!(function.instruction(jump).successor(1), Some(nop));
        assert_eq!(function.instruction(nop).successors().count(), 1);
        assert_eq!(function.instruction(ret).successors().count(), 0);
    }

    #[test]
    #[should_panic(expected = "successor 0 out of range")]
    fn returns_accept_no_successors() {
        let mut function = Function::new("f", Type::function(vec![], Type::Void));

        let ret = function.emit(InstKind::Return { value: None });
        let nop = function.emit(InstKind::Nop);

        function.set_successor(ret, 0, nop);
    }
}
