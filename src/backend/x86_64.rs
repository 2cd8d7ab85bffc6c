//! x86-64 System V code generation.
//!
//! Every virtual register gets its own 8-byte stack slot, assigned on first
//! use; no register allocation is attempted. Functions are emitted by a depth
//! first walk over the control flow graph: the false edge of a branch is laid
//! out as the fall-through path, the true edge becomes a `jnz`, and
//! re-visiting an already emitted instruction turns into a `jmp` to the label
//! it was given. Labels are assigned in a first pass that mirrors the same
//! walk, so only branch targets and join points ever get one.

use core::fmt::Write;

use hashbrown::{HashMap, HashSet};
use indoc::formatdoc;
use itertools::Itertools;

use crate::middle::ir::{
    BinaryOp, Function, InstId, InstKind, Predicate, Program, Value, Variable,
};

/// Integer argument registers, in parameter order
const ARG_REGISTERS: [&str; 6] = ["%rdi", "%rsi", "%rdx", "%rcx", "%r8", "%r9"];

macro_rules! emit {
    ($out:expr, $($arg:tt)*) => {
        writeln!($out, "    {}", format_args!($($arg)*)).unwrap()
    };
}

pub fn generate_program(program: &Program) -> String {
    let mut next_label = 0u32;

    let globals = program
        .globals
        .iter()
        .map(|global| {
            format!(
                ".comm {}, {}, 8",
                global.symbol.name(),
                global.element_count * 8
            )
        })
        .join("\n");

    let functions = program
        .functions
        .iter()
        .map(|function| FunctionCodegen::new(function).generate(&mut next_label))
        .join("\n");

    if globals.is_empty() {
        formatdoc! {"
            .text
            {functions}"}
    } else {
        formatdoc! {"
            {globals}
            .text
            {functions}"}
    }
}

fn make_label(next: &mut u32) -> String {
    *next += 1;
    format!("L{next}")
}

/// Walks the graph the same way emission will and gives a label to every
/// instruction that will be reached by something other than fall-through:
/// true-edge targets of branches and anything visited twice.
fn assign_labels(function: &Function, next_label: &mut u32) -> HashMap<InstId, String> {
    let mut labels = HashMap::new();
    let mut visited = HashSet::new();

    let Some(entry) = function.entry else {
        return labels;
    };
    let mut stack = vec![entry];

    while let Some(id) = stack.pop() {
        if !visited.insert(id) {
            labels.entry(id).or_insert_with(|| make_label(next_label));
            continue;
        }

        let instruction = function.instruction(id);
        if instruction.max_successors() == 2 {
            if let Some(target) = instruction.successor(1) {
                labels
                    .entry(target)
                    .or_insert_with(|| make_label(next_label));
            }
        }

        for index in (0..instruction.max_successors()).rev() {
            if let Some(successor) = instruction.successor(index) {
                stack.push(successor);
            }
        }
    }

    labels
}

struct FunctionCodegen<'a> {
    function: &'a Function,
    labels: HashMap<InstId, String>,
    /// Stack slot of every virtual register, 1-based
    slots: HashMap<Variable, i64>,
    next_slot: i64,
    out: String,
}

impl<'a> FunctionCodegen<'a> {
    fn new(function: &'a Function) -> Self {
        Self {
            function,
            labels: HashMap::new(),
            slots: HashMap::new(),
            next_slot: 1,
            out: String::new(),
        }
    }

    /// The `%rbp`-relative offset of a register's slot, assigning a fresh
    /// slot on first use
    fn offset_of(&mut self, variable: Variable) -> i64 {
        let next_slot = &mut self.next_slot;
        let slot = *self.slots.entry(variable).or_insert_with(|| {
            let slot = *next_slot;
            *next_slot += 1;
            slot
        });
        -8 * slot
    }

    fn local_offset(&mut self, var: crate::middle::ir::LocalVar) -> i64 {
        self.offset_of(Variable::Local(var))
    }

    fn address_offset(&mut self, var: crate::middle::ir::AddressVar) -> i64 {
        self.offset_of(Variable::Address(var))
    }

    fn generate(mut self, next_label: &mut u32) -> String {
        self.labels = assign_labels(self.function, next_label);

        writeln!(self.out, ".globl {}", self.function.name).unwrap();
        writeln!(self.out, "{}:", self.function.name).unwrap();

        // one slot per virtual register, kept 16-byte aligned
        let mut slot_count =
            self.function.temp_value_count() + self.function.temp_address_count();
        if slot_count % 2 != 0 {
            slot_count += 1;
        }
        emit!(self.out, "enter $(8 * {slot_count}), $0");

        let function = self.function;
        for (index, argument) in function.arguments.iter().enumerate() {
            let offset = self.local_offset(*argument);
            if index < ARG_REGISTERS.len() {
                emit!(self.out, "movq {}, {offset}(%rbp)", ARG_REGISTERS[index]);
            } else {
                // the seventh argument onward was pushed by the caller
                let caller_offset = 16 + 8 * (index - ARG_REGISTERS.len()) as i64;
                emit!(self.out, "movq {caller_offset}(%rbp), %r10");
                emit!(self.out, "movq %r10, {offset}(%rbp)");
            }
        }

        let Some(entry) = self.function.entry else {
            emit!(self.out, "leave");
            emit!(self.out, "ret");
            return self.out;
        };

        let mut visited = HashSet::new();
        let mut stack = vec![entry];

        while let Some(id) = stack.pop() {
            if !visited.insert(id) {
                emit!(self.out, "jmp {}", self.labels[&id]);
                continue;
            }

            if let Some(label) = self.labels.get(&id) {
                writeln!(self.out, "{label}:").unwrap();
            }

            let function = self.function;
            let instruction = function.instruction(id);

            let comment = strip_ansi_escapes::strip_str(instruction.to_string());
            emit!(self.out, "# {comment}");

            self.emit_instruction(id);

            for index in (0..instruction.max_successors()).rev() {
                if let Some(successor) = instruction.successor(index) {
                    stack.push(successor);
                }
            }

            // a dangling exit falls off the end of the function
            let dangles =
                instruction.max_successors() == 1 && instruction.successor(0).is_none();
            if dangles {
                emit!(self.out, "leave");
                emit!(self.out, "ret");
            }
        }

        self.out
    }

    fn emit_instruction(&mut self, id: InstId) {
        let function = self.function;
        let instruction = function.instruction(id);

        match &instruction.kind {
            InstKind::AddressAt { dst, base, offset } => {
                let name = base.name().to_string();
                emit!(self.out, "movq {name}@GOTPCREL(%rip), %rsi");
                if let Some(offset) = offset {
                    let index_offset = self.local_offset(*offset);
                    emit!(self.out, "movq {index_offset}(%rbp), %rdx");
                    emit!(self.out, "shlq $3, %rdx");
                    emit!(self.out, "addq %rdx, %rsi");
                }
                let dst_offset = self.address_offset(*dst);
                emit!(self.out, "movq %rsi, {dst_offset}(%rbp)");
            }
            InstKind::BinaryOp { op, dst, lhs, rhs } => {
                let lhs_offset = self.local_offset(*lhs);
                let rhs_offset = self.local_offset(*rhs);
                let dst_offset = self.local_offset(*dst);

                emit!(self.out, "movq {lhs_offset}(%rbp), %rax");
                match op {
                    BinaryOp::Add => emit!(self.out, "addq {rhs_offset}(%rbp), %rax"),
                    BinaryOp::Sub => emit!(self.out, "subq {rhs_offset}(%rbp), %rax"),
                    BinaryOp::Mul => emit!(self.out, "imulq {rhs_offset}(%rbp), %rax"),
                    BinaryOp::Div => {
                        emit!(self.out, "cqto");
                        emit!(self.out, "idivq {rhs_offset}(%rbp)");
                    }
                }
                emit!(self.out, "movq %rax, {dst_offset}(%rbp)");
            }
            InstKind::Compare {
                predicate,
                dst,
                lhs,
                rhs,
            } => {
                let lhs_offset = self.local_offset(*lhs);
                let rhs_offset = self.local_offset(*rhs);
                let dst_offset = self.local_offset(*dst);
                let condition = match predicate {
                    Predicate::Ge => "ge",
                    Predicate::Gt => "g",
                    Predicate::Le => "le",
                    Predicate::Lt => "l",
                    Predicate::Eq => "e",
                    Predicate::Ne => "ne",
                };

                emit!(self.out, "movq $0, %rcx");
                emit!(self.out, "movq $1, %r8");
                emit!(self.out, "movq {lhs_offset}(%rbp), %rax");
                emit!(self.out, "movq {rhs_offset}(%rbp), %rdx");
                emit!(self.out, "cmpq %rdx, %rax");
                emit!(self.out, "cmov{condition}q %r8, %rcx");
                emit!(self.out, "movq %rcx, {dst_offset}(%rbp)");
            }
            InstKind::Copy { dst, src } => {
                let dst_offset = self.local_offset(*dst);
                match src {
                    Value::Local(src) => {
                        let src_offset = self.local_offset(*src);
                        emit!(self.out, "movq {src_offset}(%rbp), %rax");
                        emit!(self.out, "movq %rax, {dst_offset}(%rbp)");
                    }
                    Value::Int(value) => {
                        // movq only encodes sign-extended 32-bit immediates
                        // against memory
                        if i32::try_from(*value).is_ok() {
                            emit!(self.out, "movq ${value}, {dst_offset}(%rbp)");
                        } else {
                            emit!(self.out, "movabsq ${value}, %rax");
                            emit!(self.out, "movq %rax, {dst_offset}(%rbp)");
                        }
                    }
                    Value::Bool(value) => {
                        emit!(self.out, "movq ${}, {dst_offset}(%rbp)", *value as i64);
                    }
                }
            }
            InstKind::Jump { predicate } => {
                let offset = self.local_offset(*predicate);
                emit!(self.out, "testq $1, {offset}(%rbp)");
                if let Some(target) = instruction.successor(1) {
                    emit!(self.out, "jnz {}", self.labels[&target]);
                }
            }
            InstKind::Load { dst, src } => {
                let src_offset = self.address_offset(*src);
                let dst_offset = self.local_offset(*dst);
                emit!(self.out, "movq {src_offset}(%rbp), %rsi");
                emit!(self.out, "movq (%rsi), %rax");
                emit!(self.out, "movq %rax, {dst_offset}(%rbp)");
            }
            InstKind::Store { dst, src } => {
                let dst_offset = self.address_offset(*dst);
                let src_offset = self.local_offset(*src);
                emit!(self.out, "movq {dst_offset}(%rbp), %rdi");
                emit!(self.out, "movq {src_offset}(%rbp), %rdx");
                emit!(self.out, "movq %rdx, (%rdi)");
            }
            InstKind::Nop => {}
            InstKind::Return { value } => {
                if let Some(value) = value {
                    let offset = self.local_offset(*value);
                    emit!(self.out, "movq {offset}(%rbp), %rax");
                }
                emit!(self.out, "leave");
                emit!(self.out, "ret");
            }
            InstKind::Call {
                callee,
                arguments,
                dst,
            } => {
                let name = callee.name().to_string();

                for (index, argument) in
                    arguments.iter().take(ARG_REGISTERS.len()).enumerate()
                {
                    let offset = self.local_offset(*argument);
                    emit!(self.out, "movq {offset}(%rbp), {}", ARG_REGISTERS[index]);
                }
                // stack arguments go rightmost first
                for argument in arguments.iter().skip(ARG_REGISTERS.len()).rev() {
                    let offset = self.local_offset(*argument);
                    emit!(self.out, "pushq {offset}(%rbp)");
                }

                emit!(self.out, "call {name}");

                if arguments.len() > ARG_REGISTERS.len() {
                    let spilled = 8 * (arguments.len() - ARG_REGISTERS.len());
                    emit!(self.out, "addq ${spilled}, %rsp");
                }
                if let Some(dst) = dst {
                    let offset = self.local_offset(*dst);
                    emit!(self.out, "movq %rax, {offset}(%rbp)");
                }
            }
            InstKind::UnaryNot { dst, operand } => {
                let operand_offset = self.local_offset(*operand);
                let dst_offset = self.local_offset(*dst);
                emit!(self.out, "movq {operand_offset}(%rbp), %rax");
                emit!(self.out, "xorq $1, %rax");
                emit!(self.out, "movq %rax, {dst_offset}(%rbp)");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        frontend::Symbol,
        middle::{
            ir::{GlobalDecl, InstKind, Value},
            ty::Type,
        },
    };

    fn void_function(name: &str) -> Function {
        Function::new(name, Type::function(vec![], Type::Void))
    }

    #[test]
    fn globals_become_comm_directives() {
        let program = Program {
            globals: vec![
                GlobalDecl {
                    symbol: Symbol::new("x", Type::Int),
                    element_count: 1,
                },
                GlobalDecl {
                    symbol: Symbol::new("xs", Type::array(Type::Int, 10)),
                    element_count: 10,
                },
            ],
            functions: vec![],
        };

        let assembly = generate_program(&program);

        assert!(assembly.contains(".comm x, 8, 8"));
        assert!(assembly.contains(".comm xs, 80, 8"));
    }

    #[test]
    fn arguments_spill_into_their_slots() {
        let mut function = Function::new(
            "f",
            Type::function(vec![Type::Int, Type::Int], Type::Void),
        );
        for _ in 0..2 {
            let register = function.new_temp();
            function.arguments.push(register);
        }
        let ret = function.emit(InstKind::Return { value: None });
        function.entry = Some(ret);

        let program = Program {
            globals: vec![],
            functions: vec![function],
        };
        let assembly = generate_program(&program);

        assert!(assembly.contains("movq %rdi, -8(%rbp)"));
        assert!(assembly.contains("movq %rsi, -16(%rbp)"));
        assert!(assembly.ends_with("ret\n"));
    }

    #[test]
    fn extra_call_arguments_go_on_the_stack_and_come_back_off() {
        let callee = Symbol::new(
            "wide",
            Type::function(vec![Type::Int; 8], Type::Void),
        );

        let mut function = void_function("f");
        let arguments = (0..8).map(|_| function.new_temp()).collect::<Vec<_>>();
        let mut previous = None;
        for (i, &argument) in arguments.iter().enumerate() {
            let copy = function.emit(InstKind::Copy {
                dst: argument,
                src: Value::Int(i as i64),
            });
            if let Some(previous) = previous {
                function.set_successor(previous, 0, copy);
            } else {
                function.entry = Some(copy);
            }
            previous = Some(copy);
        }
        let call = function.emit(InstKind::Call {
            callee,
            arguments,
            dst: None,
        });
        function.set_successor(previous.unwrap(), 0, call);

        let program = Program {
            globals: vec![],
            functions: vec![function],
        };
        let assembly = generate_program(&program);

        assert_eq!(assembly.matches("pushq").count(), 2);
        assert!(assembly.contains("addq $16, %rsp"));
        // the last stack argument is pushed first
        let first_push = assembly.find("pushq -64(%rbp)").unwrap();
        let second_push = assembly.find("pushq -56(%rbp)").unwrap();
        assert!(first_push < second_push);
    }

    #[test]
    fn branch_targets_are_labeled_exactly_once() {
        let mut function = void_function("f");
        let predicate = function.new_temp();

        let copy = function.emit(InstKind::Copy {
            dst: predicate,
            src: Value::Bool(true),
        });
        let jump = function.emit(InstKind::Jump { predicate });
        let join = function.emit(InstKind::Nop);
        let ret = function.emit(InstKind::Return { value: None });

        function.entry = Some(copy);
        function.set_successor(copy, 0, jump);
        function.set_successor(jump, 0, join);
        function.set_successor(jump, 1, join);
        function.set_successor(join, 0, ret);

        let program = Program {
            globals: vec![],
            functions: vec![function],
        };
        let assembly = generate_program(&program);

        assert!(assembly.contains("testq $1, -8(%rbp)"));
        assert!(assembly.contains("jnz L1"));
        assert!(assembly.contains("jmp L1"));
        assert_eq!(assembly.matches("L1:").count(), 1);
    }

    #[test]
    fn wide_int_literals_go_through_a_register() {
        let mut function = void_function("f");
        let small = function.new_temp();
        let wide = function.new_temp();

        let first = function.emit(InstKind::Copy {
            dst: small,
            src: Value::Int(7),
        });
        let second = function.emit(InstKind::Copy {
            dst: wide,
            src: Value::Int(1i64 << 40),
        });
        let ret = function.emit(InstKind::Return { value: None });
        function.entry = Some(first);
        function.set_successor(first, 0, second);
        function.set_successor(second, 0, ret);

        let program = Program {
            globals: vec![],
            functions: vec![function],
        };
        let assembly = generate_program(&program);

        assert!(assembly.contains("movq $7, -8(%rbp)"));
        assert!(assembly.contains(&format!("movabsq ${}, %rax", 1i64 << 40)));
        assert!(assembly.contains("movq %rax, -16(%rbp)"));
    }

    #[test]
    fn frames_stay_sixteen_byte_aligned() {
        let mut function = void_function("f");
        let _ = function.new_temp();
        let _ = function.new_temp();
        let _ = function.new_temp();
        let ret = function.emit(InstKind::Return { value: None });
        function.entry = Some(ret);

        let program = Program {
            globals: vec![],
            functions: vec![function],
        };
        let assembly = generate_program(&program);

        assert!(assembly.contains("enter $(8 * 4), $0"));
    }
}
